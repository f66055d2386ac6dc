use crate::config::ImportTarget;
use crate::error::{BimaError, Result};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

/// Loads a finished image tarball into a local image store
pub trait ImageImporter: Send + Sync {
    /// Import `tarball` and return the importer's report
    fn import(&self, tarball: &Path, target: &ImportTarget) -> Result<String>;
}

/// Imports through the containerd `ctr` client
#[derive(Debug, Clone)]
pub struct CtrImporter {
    program: PathBuf,
}

impl Default for CtrImporter {
    fn default() -> Self {
        Self::new("ctr")
    }
}

impl CtrImporter {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn command_args(tarball: &Path, target: &ImportTarget) -> Vec<String> {
        let mut args = vec![
            "--address".to_string(),
            target.address.clone(),
            "--namespace".to_string(),
            target.namespace.clone(),
            "images".to_string(),
            "import".to_string(),
        ];
        if let Some(snapshotter) = &target.snapshotter {
            args.push(format!("--snapshotter={}", snapshotter));
        }
        args.push(tarball.display().to_string());
        args
    }
}

impl ImageImporter for CtrImporter {
    fn import(&self, tarball: &Path, target: &ImportTarget) -> Result<String> {
        let args = Self::command_args(tarball, target);
        debug!(program = %self.program.display(), ?args, "Running image import");

        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|e| BimaError::Import {
                message: format!("failed to run {}: {}", self.program.display(), e),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BimaError::Import {
                message: format!(
                    "{} exited with {}: {}",
                    self.program.display(),
                    output.status.code().unwrap_or(1),
                    stderr.trim()
                ),
            });
        }

        info!(namespace = %target.namespace, "Image imported");
        Ok(stdout)
    }
}
