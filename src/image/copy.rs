use crate::error::{BimaError, Result};
use crate::oci::OciImage;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, trace};
use walkdir::WalkDir;

/// Copies a host file or directory tree into a new image layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyOperation {
    /// Absolute host path
    pub source: PathBuf,
    /// Absolute in-image path; a trailing `/` marks a directory target
    pub destination: String,
    line: String,
}

impl CopyOperation {
    /// `source` resolves against `context_dir`, which resolves against the
    /// working directory when relative.
    pub fn new(source: &Path, destination: &str, context_dir: &Path) -> Self {
        let joined = context_dir.join(source);
        let absolute = std::path::absolute(&joined).unwrap_or(joined);
        Self {
            source: normalize_path(&absolute),
            destination: image_path(destination),
            line: format!("COPY {} {}", source.display(), destination),
        }
    }

    /// Parse the argument part of `COPY <src> <dst>`.
    pub(crate) fn parse(line: &str, args: &str, context_dir: &Path) -> Result<Self> {
        let parts: Vec<&str> = args.split_whitespace().collect();
        let [source, destination] = parts.as_slice() else {
            return Err(BimaError::InvalidCopyFormat {
                line: line.to_string(),
            });
        };
        let mut op = Self::new(Path::new(source), destination, context_dir);
        op.line = line.to_string();
        Ok(op)
    }

    pub fn line(&self) -> &str {
        &self.line
    }

    pub fn info(&self) -> String {
        format!(
            "Performing instruction: {:?}\nCopying {:?} to {:?}",
            self.line,
            self.source.display().to_string(),
            self.destination
        )
    }

    /// Read every file the operation copies, keyed by its in-image path.
    pub fn collect_files(&self) -> Result<BTreeMap<String, Vec<u8>>> {
        debug!(source = %self.source.display(), "Checking path");

        let mut files = BTreeMap::new();
        if self.source.is_dir() {
            for file in walk_files(&self.source)? {
                let rel = file.strip_prefix(&self.source).unwrap_or(&file);
                let target = join_image_path(&self.destination, rel);
                trace!("Transformed {:?} to {:?}", file.display().to_string(), target);
                files.insert(target, read_file(&file)?);
            }
        } else if self.source.is_file() {
            let target = self.file_target();
            trace!(
                "Transformed {:?} to {:?}",
                self.source.display().to_string(),
                target
            );
            files.insert(target, read_file(&self.source)?);
        }

        debug!("Found {} files in {:?}", files.len(), self.source.display().to_string());
        if files.is_empty() {
            return Err(BimaError::SourceNotFound {
                path: self.source.clone(),
            });
        }
        Ok(files)
    }

    /// In-image path of a single-file source
    pub fn file_target(&self) -> String {
        if self.destination.ends_with('/') {
            let name = self
                .source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            format!("{}{}", self.destination, name)
        } else {
            self.destination.clone()
        }
    }

    /// Host file that ends up at `image_file` once this copy is applied, if any.
    ///
    /// File sources match on base name; directory sources match when
    /// `image_file` lies under the destination.
    pub fn host_source_for(&self, image_file: &str) -> Option<PathBuf> {
        if self.source.is_dir() {
            let prefix = format!("{}/", self.destination.trim_end_matches('/'));
            let rel = image_file.strip_prefix(&prefix)?;
            let candidate = self.source.join(rel);
            return candidate.is_file().then_some(candidate);
        }
        let wanted = Path::new(image_file).file_name()?;
        let target = self.file_target();
        (Path::new(&target).file_name() == Some(wanted)).then(|| self.source.clone())
    }

    pub fn update_image(&self, image: &OciImage) -> Result<OciImage> {
        let files = self.collect_files()?;
        image.append_layer(files, &format!("bima: {}", self.line))
    }
}

/// Every regular file under `root`, sorted by path
fn walk_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            BimaError::io(path, e.into())
        })?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| BimaError::io(path, e))
}

fn join_image_path(dir: &str, rel: &Path) -> String {
    let rel = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    format!("{}/{}", dir.trim_end_matches('/'), rel)
}

/// Anchor `destination` at the image root, keeping a trailing `/`.
fn image_path(destination: &str) -> String {
    let trailing = destination.ends_with('/') && destination != "/";
    let cleaned = normalize_path(&Path::new("/").join(destination));
    let mut path = cleaned.to_string_lossy().into_owned();
    if trailing {
        path.push('/');
    }
    path
}

/// Lexically resolve `.` and `..` components
fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
