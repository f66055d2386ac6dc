//! Build configuration: output selection, containerd import target, image
//! references, build-file discovery and the direct packaging parameters.

use crate::constants::{
    BINARY_ANNOTATION, CMDLINE_ANNOTATION, DEFAULT_CONTAINERD_ADDRESS, DEFAULT_CONTAINERFILE,
    DEFAULT_NAMESPACE, EXTRA_DIR, FALLBACK_DOCKERFILE, HYPERVISOR_ANNOTATION,
    UNIKERNEL_DIR, UNIKERNEL_TYPE_ANNOTATION,
};
use crate::error::{BimaError, Result};
use crate::image::{ArchOperation, CopyOperation, LabelOperation, Operation};
use std::fmt;
use std::path::{Path, PathBuf};

/// What to do with the finished image
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputKind {
    /// Leave an image tarball in the working directory
    Tar,
    /// Import the image into containerd and remove the tarball
    Ctr,
}

/// Where `ctr images import` should put the image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportTarget {
    pub namespace: String,
    pub address: String,
    /// `None` selects containerd's default snapshotter
    pub snapshotter: Option<String>,
}

impl Default for ImportTarget {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            address: DEFAULT_CONTAINERD_ADDRESS.to_string(),
            snapshotter: None,
        }
    }
}

/// A validated `[registry/]path/name[:tag]` image reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub name: String,
    pub tag: String,
}

impl ImageReference {
    pub fn parse(reference: &str) -> Result<Self> {
        let invalid = |reason: &str| BimaError::InvalidReference {
            reference: reference.to_string(),
            reason: reason.to_string(),
        };

        if reference.is_empty() {
            return Err(invalid("reference is empty"));
        }
        if reference.contains('@') {
            return Err(invalid("digest references are not supported"));
        }

        let last_slash = reference.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (name, tag) = match reference[last_slash..].rfind(':') {
            Some(i) => (&reference[..last_slash + i], &reference[last_slash + i + 1..]),
            None => (reference, "latest"),
        };

        if tag.is_empty()
            || tag.len() > 128
            || !tag
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        {
            return Err(invalid("invalid tag"));
        }

        let mut components = name.split('/').peekable();
        let mut first = true;
        while let Some(component) = components.next() {
            let is_registry = first
                && components.peek().is_some()
                && (component.contains('.') || component.contains(':') || component == "localhost");
            first = false;
            if is_registry {
                continue;
            }
            if component.is_empty()
                || !component.chars().all(|c| {
                    c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '.' | '-')
                })
            {
                return Err(invalid("name components must be lowercase alphanumerics"));
            }
        }

        Ok(Self {
            name: name.to_string(),
            tag: tag.to_string(),
        })
    }

    /// File name of the tarball written for this reference
    pub fn file_name(&self) -> String {
        let short = self.name.rsplit('/').next().unwrap_or(&self.name);
        format!("{}:{}", short, self.tag)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)
    }
}

/// Pick the build file: `requested` if it exists, else `Containerfile`, else
/// `Dockerfile` in `search_dir`.
pub fn resolve_containerfile(requested: &Path, search_dir: &Path) -> Result<PathBuf> {
    let requested = search_dir.join(requested);
    let candidates = [
        requested.clone(),
        search_dir.join(DEFAULT_CONTAINERFILE),
        search_dir.join(FALLBACK_DOCKERFILE),
    ];
    candidates
        .into_iter()
        .find(|p| p.is_file())
        .ok_or(BimaError::SourceNotFound { path: requested })
}

/// Fully resolved settings for one `bima build`
#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub context_dir: PathBuf,
    pub containerfile: PathBuf,
    pub reference: ImageReference,
    pub output: OutputKind,
    pub import_target: ImportTarget,
}

impl BuildConfig {
    pub fn resolve(
        context: &Path,
        file: &Path,
        cwd: &Path,
        tag: &str,
        output: OutputKind,
        import_target: ImportTarget,
    ) -> Result<Self> {
        let reference = ImageReference::parse(tag)?;
        let context_dir = cwd.join(context);
        if !context_dir.is_dir() {
            return Err(BimaError::SourceNotFound { path: context_dir });
        }
        let containerfile = resolve_containerfile(file, cwd)?;

        Ok(Self {
            context_dir,
            containerfile,
            reference,
            output,
            import_target,
        })
    }
}

/// Parameters for packaging a unikernel without a build file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageParams {
    pub unikernel: PathBuf,
    pub unikernel_type: String,
    pub hypervisor: String,
    pub cmdline: String,
    pub extra: Vec<PathBuf>,
    pub arch: Option<String>,
}

impl PackageParams {
    /// The operations an equivalent build file would produce
    pub fn to_operations(&self, context_dir: &Path) -> Result<Vec<Operation>> {
        let name = self
            .unikernel
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| BimaError::SourceNotFound {
                path: self.unikernel.clone(),
            })?;

        let mut operations: Vec<Operation> = vec![
            LabelOperation::new(UNIKERNEL_TYPE_ANNOTATION, &self.unikernel_type).into(),
            LabelOperation::new(HYPERVISOR_ANNOTATION, &self.hypervisor).into(),
            LabelOperation::new(BINARY_ANNOTATION, &format!("{}{}", UNIKERNEL_DIR, name)).into(),
            LabelOperation::new(CMDLINE_ANNOTATION, &self.cmdline).into(),
            CopyOperation::new(&self.unikernel, UNIKERNEL_DIR, context_dir).into(),
        ];
        operations.extend(
            self.extra
                .iter()
                .map(|extra| CopyOperation::new(extra, EXTRA_DIR, context_dir).into()),
        );
        if let Some(arch) = &self.arch {
            operations.push(ArchOperation::new(arch).into());
        }
        Ok(operations)
    }
}
