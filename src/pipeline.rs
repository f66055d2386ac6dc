//! End-to-end build: read a build file, fold its operations into an image,
//! finish the image and hand it to the selected output.

use crate::config::{ImageReference, ImportTarget, OutputKind, PackageParams};
use crate::containerfile::parse_containerfile;
use crate::error::{BimaError, Result};
use crate::image::{BimaImage, ImageClass, Operation};
use crate::import::ImageImporter;
use crate::oci::OciImage;
use crate::{log_build_complete, log_build_start};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildOptions {
    /// Probe the unikernel binary when no ARCH instruction was given
    pub detect_architecture: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            detect_architecture: true,
        }
    }
}

/// Read and parse a build file. COPY sources resolve against `context_dir`.
pub fn read_operations(containerfile: &Path, context_dir: &Path) -> Result<Vec<Operation>> {
    let content = fs::read_to_string(containerfile).map_err(|e| BimaError::io(containerfile, e))?;
    parse_containerfile(&content, context_dir)
}

/// Fold `operations` into a fresh image, validate it and finalize it.
pub fn build_image(operations: Vec<Operation>, options: BuildOptions) -> Result<BimaImage> {
    let start = Instant::now();
    let mut image = BimaImage::new();
    debug!("Created new empty image");

    for operation in operations {
        image.apply_operation(operation)?;
    }

    let class = image.validate()?;
    if options.detect_architecture && class == ImageClass::Unikernel && !image.is_architecture_set() {
        image.determine_architecture_from_binary()?;
    }
    image.finalize()?;

    log_build_complete!(
        start.elapsed().as_millis() as u64,
        image.image().layers().len(),
        class
    );
    Ok(image)
}

/// Build the image described by `containerfile`.
pub fn build_containerfile(
    containerfile: &Path,
    context_dir: &Path,
    options: BuildOptions,
) -> Result<BimaImage> {
    log_build_start!(containerfile.display());
    let operations = read_operations(containerfile, context_dir)?;
    build_image(operations, options)
}

/// Package a unikernel straight from parameters, without a build file.
pub fn package(params: &PackageParams, context_dir: &Path, options: BuildOptions) -> Result<BimaImage> {
    log_build_start!(params.unikernel.display());
    build_image(params.to_operations(context_dir)?, options)
}

/// One build in a batch
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub context_dir: PathBuf,
    pub containerfile: PathBuf,
}

/// Build independent contexts in parallel. Results keep the request order.
pub fn build_many(
    requests: &[BuildRequest],
    options: BuildOptions,
) -> Vec<Result<BimaImage>> {
    requests
        .par_iter()
        .map(|req| build_containerfile(&req.containerfile, &req.context_dir, options))
        .collect()
}

/// Where an exported image ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    Tarball(PathBuf),
    Imported { report: String },
}

/// Write `image` as a tarball in `out_dir` and, for `OutputKind::Ctr`,
/// import it and remove the tarball.
pub fn export(
    image: &OciImage,
    reference: &ImageReference,
    output: OutputKind,
    out_dir: &Path,
    target: &ImportTarget,
    importer: &dyn ImageImporter,
) -> Result<ExportOutcome> {
    let tarball = out_dir.join(reference.file_name());
    image.save_tar(&tarball, &reference.to_string())?;
    info!(path = %tarball.display(), reference = %reference, "Image tarball written");

    match output {
        OutputKind::Tar => Ok(ExportOutcome::Tarball(tarball)),
        OutputKind::Ctr => {
            let imported = importer.import(&tarball, target);
            let removed = fs::remove_file(&tarball).map_err(|e| BimaError::io(&tarball, e));
            let report = imported?;
            removed?;
            debug!(path = %tarball.display(), "Removed image tarball");
            Ok(ExportOutcome::Imported { report })
        }
    }
}
