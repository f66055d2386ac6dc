use crate::constants::{CONTAINERD_NAME_ANNOTATION, OCI_LAYOUT_VERSION, REF_NAME_ANNOTATION};
use crate::error::{BimaError, Result};
use crate::oci::manifest::{DockerManifestEntry, OCIDescriptor, OCIIndex};
use crate::oci::utils::{blob_path, digest_of};
use crate::oci::OciImage;
use oci_spec::image::MediaType;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tar::{Builder, Header};
use tracing::debug;

/// Write `image` to `path` as an OCI image layout tarball.
///
/// The archive also carries a docker-style `manifest.json`, so it can be fed
/// to `ctr images import` as well as `docker load`.
pub fn write_image_tarball(image: &OciImage, path: &Path, reference: &str) -> Result<()> {
    let file = File::create(path).map_err(|e| BimaError::io(path, e))?;
    let mut tar = Builder::new(file);
    append_image(&mut tar, image, reference).map_err(|e| match e {
        BimaError::Io { source, .. } => BimaError::io(path, source),
        other => other,
    })?;
    let mut file = tar.into_inner().map_err(|e| BimaError::io(path, e))?;
    file.flush().map_err(|e| BimaError::io(path, e))?;

    debug!(path = %path.display(), reference, "Saved image tarball");
    Ok(())
}

fn append_image<W: Write>(tar: &mut Builder<W>, image: &OciImage, reference: &str) -> Result<()> {
    let mut written = BTreeSet::new();

    // 1. Layers
    for layer in image.layers() {
        if written.insert(layer.digest().to_string()) {
            append_file(tar, &blob_path(layer.digest()), layer.blob())?;
        }
    }

    // 2. Config
    let config_blob = image.config_blob()?;
    let config_digest = digest_of(&config_blob);
    append_file(tar, &blob_path(&config_digest), &config_blob)?;

    // 3. Manifest
    let manifest = image.manifest()?;
    let manifest_json = serde_json::to_vec(&manifest)?;
    let manifest_digest = digest_of(&manifest_json);
    append_file(tar, &blob_path(&manifest_digest), &manifest_json)?;

    // 4. index.json
    let mut descriptor = OCIDescriptor::new(
        MediaType::ImageManifest,
        &manifest_digest,
        manifest_json.len() as u64,
    );
    descriptor
        .annotations
        .insert(REF_NAME_ANNOTATION.to_string(), reference.to_string());
    descriptor
        .annotations
        .insert(CONTAINERD_NAME_ANNOTATION.to_string(), reference.to_string());
    let index = OCIIndex::single(descriptor);
    append_file(tar, "index.json", &serde_json::to_vec(&index)?)?;

    // 5. oci-layout
    append_file(tar, "oci-layout", OCI_LAYOUT_VERSION.as_bytes())?;

    // 6. manifest.json for docker-compatible loaders
    let docker_manifest = vec![DockerManifestEntry {
        config: blob_path(&config_digest),
        repo_tags: vec![reference.to_string()],
        layers: image.layers().iter().map(|l| blob_path(l.digest())).collect(),
    }];
    append_file(tar, "manifest.json", &serde_json::to_vec(&docker_manifest)?)?;

    tar.finish().map_err(|e| BimaError::io("<tarball>", e))
}

fn append_file<W: Write>(tar: &mut Builder<W>, name: &str, data: &[u8]) -> Result<()> {
    let mut header = Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    tar.append_data(&mut header, name, data)
        .map_err(|e| BimaError::io(name, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, HashMap};
    use std::io::Read;
    use tar::Archive;
    use tempfile::tempdir;

    fn read_tarball(path: &Path) -> HashMap<String, Vec<u8>> {
        let mut archive = Archive::new(File::open(path).unwrap());
        let mut entries = HashMap::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let name = entry.path().unwrap().to_string_lossy().into_owned();
            let mut content = Vec::new();
            entry.read_to_end(&mut content).unwrap();
            entries.insert(name, content);
        }
        entries
    }

    #[test]
    fn test_tarball_layout() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hello");
        let image = OciImage::scratch("linux")
            .with_architecture("amd64")
            .append_layer(
                BTreeMap::from([("/unikernel/app".to_string(), b"bin".to_vec())]),
                "test",
            )
            .unwrap();

        image.save_tar(&path, "docker.io/library/hello:latest").unwrap();
        let entries = read_tarball(&path);

        assert!(entries.contains_key("oci-layout"));
        let index: OCIIndex = serde_json::from_slice(&entries["index.json"]).unwrap();
        let manifest_desc = &index.manifests[0];
        assert_eq!(
            manifest_desc.annotations[REF_NAME_ANNOTATION],
            "docker.io/library/hello:latest"
        );
        let manifest_blob = &entries[&blob_path(&manifest_desc.digest)];
        assert_eq!(digest_of(manifest_blob), manifest_desc.digest);

        let docker: Vec<DockerManifestEntry> =
            serde_json::from_slice(&entries["manifest.json"]).unwrap();
        assert_eq!(docker[0].repo_tags, vec!["docker.io/library/hello:latest"]);
        assert!(entries.contains_key(&docker[0].config));
        assert_eq!(
            entries[&docker[0].layers[0]],
            image.layers()[0].blob().to_vec()
        );
    }

    #[test]
    fn test_tarball_is_reproducible() {
        let dir = tempdir().unwrap();
        let image = OciImage::scratch("linux").with_architecture("arm64");
        image.save_tar(&dir.path().join("a"), "a:latest").unwrap();
        image.save_tar(&dir.path().join("b"), "a:latest").unwrap();
        assert_eq!(
            std::fs::read(dir.path().join("a")).unwrap(),
            std::fs::read(dir.path().join("b")).unwrap()
        );
    }
}
