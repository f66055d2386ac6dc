use crate::constants::KNOWN_ARCHITECTURES;
use crate::error::{BimaError, Result};
use crate::oci::OciImage;
use tracing::warn;

/// Sets the image platform architecture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchOperation {
    pub arch: String,
    line: String,
}

impl ArchOperation {
    pub fn new(arch: &str) -> Self {
        if !KNOWN_ARCHITECTURES.contains(&arch) {
            warn!(arch, "Architecture is not a known OCI platform architecture");
        }
        Self {
            arch: arch.to_string(),
            line: format!("ARCH {}", arch),
        }
    }

    pub(crate) fn parse(line: &str, args: &str) -> Result<Self> {
        if args.is_empty() {
            return Err(BimaError::InvalidArchFormat {
                line: line.to_string(),
            });
        }
        let mut op = Self::new(args);
        op.line = line.to_string();
        Ok(op)
    }

    pub fn line(&self) -> &str {
        &self.line
    }

    pub fn info(&self) -> String {
        format!("Setting image architecture to: {:?}", self.arch)
    }

    pub fn update_image(&self, image: &OciImage) -> Result<OciImage> {
        Ok(image.with_architecture(&self.arch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arch_is_taken_verbatim() {
        let op = ArchOperation::parse("ARCH riscv64", "riscv64").unwrap();
        assert_eq!(op.arch, "riscv64");
        assert_eq!(op.line(), "ARCH riscv64");

        let odd = ArchOperation::parse("ARCH my-custom-cpu", "my-custom-cpu").unwrap();
        assert_eq!(odd.arch, "my-custom-cpu");
    }

    #[test]
    fn test_empty_arch_fails() {
        assert!(matches!(
            ArchOperation::parse("ARCH", ""),
            Err(BimaError::InvalidArchFormat { .. })
        ));
    }

    #[test]
    fn test_arch_only_touches_config() {
        let image = OciImage::scratch("linux");
        let next = ArchOperation::new("arm64").update_image(&image).unwrap();
        assert_eq!(next.config_file().architecture, "arm64");
        assert_eq!(next.config_file().os, "linux");
        assert!(next.layers().is_empty());
    }
}
