use crate::error::{BimaError, Result};
use crate::oci::utils::digest_of;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::Path;
use tar::{Builder, EntryType, Header};

/// A filesystem layer: the in-image path → bytes mapping plus its gzipped tar blob.
#[derive(Debug, Clone)]
pub struct Layer {
    files: BTreeMap<String, Vec<u8>>,
    blob: Vec<u8>,
    digest: String,
    diff_id: String,
}

impl Layer {
    /// Pack `files` into a reproducible layer.
    ///
    /// Entries are sorted, parent directories are emitted before their
    /// children and all metadata is normalized, so identical inputs always
    /// produce identical digests.
    pub fn from_files(files: BTreeMap<String, Vec<u8>>) -> Result<Self> {
        let tar = create_layer_tar(&files)?;
        let diff_id = digest_of(&tar);

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&tar)
            .map_err(|e| BimaError::io("<layer>", e))?;
        let blob = encoder.finish().map_err(|e| BimaError::io("<layer>", e))?;
        let digest = digest_of(&blob);

        Ok(Self {
            files,
            blob,
            digest,
            diff_id,
        })
    }

    pub fn files(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.files
    }

    pub fn get(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    /// Compressed blob as stored in the image
    pub fn blob(&self) -> &[u8] {
        &self.blob
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Digest of the uncompressed tar
    pub fn diff_id(&self) -> &str {
        &self.diff_id
    }

    pub fn size(&self) -> u64 {
        self.blob.len() as u64
    }
}

fn create_layer_tar(files: &BTreeMap<String, Vec<u8>>) -> Result<Vec<u8>> {
    let mut dirs = BTreeSet::new();
    for path in files.keys() {
        let mut parent = Path::new(entry_name(path)).parent();
        while let Some(dir) = parent {
            if dir.as_os_str().is_empty() {
                break;
            }
            dirs.insert(dir.to_string_lossy().into_owned());
            parent = dir.parent();
        }
    }

    let mut tar = Builder::new(Vec::new());
    for dir in &dirs {
        let mut header = normalized_header(EntryType::Directory, 0o755, 0);
        tar.append_data(&mut header, format!("{}/", dir), std::io::empty())
            .map_err(|e| BimaError::io(dir, e))?;
    }
    for (path, content) in files {
        let mut header = normalized_header(EntryType::Regular, 0o755, content.len() as u64);
        tar.append_data(&mut header, entry_name(path), content.as_slice())
            .map_err(|e| BimaError::io(path, e))?;
    }
    tar.into_inner().map_err(|e| BimaError::io("<layer>", e))
}

fn normalized_header(entry_type: EntryType, mode: u32, size: u64) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_size(size);
    header.set_mode(mode);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header
}

/// Tar entries are relative to the image root
fn entry_name(path: &str) -> &str {
    path.trim_start_matches('/')
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use tar::Archive;

    fn layer_of(entries: &[(&str, &[u8])]) -> Layer {
        let files = entries
            .iter()
            .map(|(p, c)| (p.to_string(), c.to_vec()))
            .collect();
        Layer::from_files(files).unwrap()
    }

    #[test]
    fn test_layer_is_reproducible() {
        let a = layer_of(&[("/unikernel/app", b"binary"), ("/urunc.json", b"{}")]);
        let b = layer_of(&[("/urunc.json", b"{}"), ("/unikernel/app", b"binary")]);
        assert_eq!(a.digest(), b.digest());
        assert_eq!(a.diff_id(), b.diff_id());
        assert_ne!(a.digest(), a.diff_id());
    }

    #[test]
    fn test_layer_tar_contents() {
        let layer = layer_of(&[("/dst/sub/y", b"yy"), ("/dst/x", b"x")]);
        let mut archive = Archive::new(GzDecoder::new(layer.blob()));
        let mut seen = Vec::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let path = entry
                .path()
                .unwrap()
                .to_string_lossy()
                .trim_end_matches('/')
                .to_string();
            assert_eq!(entry.header().mtime().unwrap(), 0);
            let mut content = Vec::new();
            entry.read_to_end(&mut content).unwrap();
            seen.push((path, content));
        }
        let names: Vec<&str> = seen.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(names, vec!["dst", "dst/sub", "dst/sub/y", "dst/x"]);
        assert_eq!(seen[2].1, b"yy");
    }

    #[test]
    fn test_layer_lookup() {
        let layer = layer_of(&[("/urunc.json", b"{}")]);
        assert_eq!(layer.get("/urunc.json"), Some(&b"{}"[..]));
        assert!(layer.get("/missing").is_none());
        assert_eq!(layer.size(), layer.blob().len() as u64);
    }
}
