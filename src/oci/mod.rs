pub mod config;
pub mod layer;
pub mod manifest;
pub mod tarball;
pub mod utils;

pub use config::ConfigFile;
pub use layer::Layer;
pub use manifest::OCIManifest;

use crate::error::Result;
use crate::oci::manifest::OCIDescriptor;
use oci_spec::image::MediaType;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Immutable in-memory OCI image.
///
/// Every mutator returns a new image and leaves `self` untouched. Layers are
/// shared between an image and its successors.
#[derive(Debug, Clone)]
pub struct OciImage {
    config: ConfigFile,
    layers: Vec<Arc<Layer>>,
    annotations: BTreeMap<String, String>,
}

impl OciImage {
    /// Empty image with the OS pinned
    pub fn scratch(os: &str) -> Self {
        Self {
            config: ConfigFile::scratch(os),
            layers: Vec::new(),
            annotations: BTreeMap::new(),
        }
    }

    pub fn config_file(&self) -> &ConfigFile {
        &self.config
    }

    pub fn layers(&self) -> &[Arc<Layer>] {
        &self.layers
    }

    /// Manifest annotations
    pub fn annotations(&self) -> &BTreeMap<String, String> {
        &self.annotations
    }

    /// Merge `annotations` into the current set, overwriting existing keys.
    pub fn with_annotations<I>(&self, annotations: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut next = self.clone();
        next.annotations.extend(annotations);
        next
    }

    pub fn append_layer(&self, files: BTreeMap<String, Vec<u8>>, created_by: &str) -> Result<Self> {
        let layer = Layer::from_files(files)?;
        let mut next = self.clone();
        next.config.push_layer(layer.diff_id(), created_by);
        next.layers.push(Arc::new(layer));
        Ok(next)
    }

    pub fn with_architecture(&self, arch: &str) -> Self {
        let mut next = self.clone();
        next.config.architecture = arch.to_string();
        next
    }

    pub fn with_cmd(&self, cmd: Vec<String>) -> Self {
        let mut next = self.clone();
        next.config.config.cmd = Some(cmd);
        next
    }

    /// Serialized config blob, as referenced from the manifest
    pub fn config_blob(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.config)?)
    }

    pub fn manifest(&self) -> Result<OCIManifest> {
        let config_blob = self.config_blob()?;
        let config_digest = utils::digest_of(&config_blob);

        Ok(OCIManifest {
            schema_version: 2,
            media_type: MediaType::ImageManifest.to_string(),
            config: OCIDescriptor::new(
                MediaType::ImageConfig,
                &config_digest,
                config_blob.len() as u64,
            ),
            layers: self
                .layers
                .iter()
                .map(|l| OCIDescriptor::new(MediaType::ImageLayerGzip, l.digest(), l.size()))
                .collect(),
            annotations: self.annotations.clone(),
        })
    }

    /// Find the most recent layer that carries `path`
    pub fn find_file(&self, path: &str) -> Option<&[u8]> {
        self.layers.iter().rev().find_map(|l| l.get(path))
    }

    /// Write the image as a tarball tagged with `reference`
    pub fn save_tar(&self, path: &Path, reference: &str) -> Result<()> {
        tarball::write_image_tarball(self, path, reference)
    }
}
