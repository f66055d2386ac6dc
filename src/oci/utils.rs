use sha2::{Digest, Sha256};

pub fn sha256_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// `sha256:<hex>` digest as used in OCI descriptors
pub fn digest_of(data: &[u8]) -> String {
    format!("sha256:{}", sha256_bytes(data))
}

/// Blob path inside an OCI layout for the given digest
pub fn blob_path(digest: &str) -> String {
    let hex = digest.strip_prefix("sha256:").unwrap_or(digest);
    format!("blobs/sha256/{}", hex)
}
