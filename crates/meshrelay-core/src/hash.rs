//! Content hashing for uploaded artifacts

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;

/// A SHA-256 digest of an artifact's bytes.
///
/// Reported next to each remote file id so callers can verify what
/// landed in the remote folder.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Compute a hash from bytes
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// Compute a hash by streaming a file's contents
    pub fn from_file<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let mut file = std::fs::File::open(path)?;
        let mut hasher = Sha256::new();
        std::io::copy(&mut file, &mut hasher)?;
        Ok(Self(hasher.finalize().into()))
    }

    /// Get the hash as a hex string
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Get the hash as a prefixed hex string (e.g., "sha256:abcdef...")
    pub fn to_prefixed_hex(&self) -> String {
        format!("sha256:{}", self.to_hex())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consistent_hashing() {
        assert_eq!(ContentHash::from_bytes(b"glb"), ContentHash::from_bytes(b"glb"));
        assert_ne!(ContentHash::from_bytes(b"glb"), ContentHash::from_bytes(b"ply"));
    }

    #[test]
    fn test_file_hash_matches_bytes() {
        let path = std::env::temp_dir().join(format!("meshrelay_hash_{}", uuid::Uuid::new_v4()));
        std::fs::write(&path, b"point cloud").unwrap();

        let from_file = ContentHash::from_file(&path).unwrap();
        assert_eq!(from_file, ContentHash::from_bytes(b"point cloud"));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_prefixed_hex() {
        let h = ContentHash::from_bytes(b"video frames");
        let prefixed = h.to_prefixed_hex();
        assert!(prefixed.starts_with("sha256:"));
        assert_eq!(prefixed.len(), 7 + 64);
        assert_eq!(&prefixed[7..], h.to_hex());
        assert_eq!(h.to_string(), &h.to_hex()[..16]);
    }
}
