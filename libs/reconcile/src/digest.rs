//! Content digests for file maps.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

/// A stable digest of a `path -> content` map.
///
/// Stamped on running containers as a label so a later pass can tell whether
/// the files mounted into a container still match what is desired without
/// reading them back.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Digest a file map. Entries are hashed in key order.
    pub fn of_files(files: &BTreeMap<String, String>) -> Self {
        let mut hasher = Sha256::new();
        for (path, content) in files {
            // Length prefixes keep ("ab", "c") distinct from ("a", "bc").
            hasher.update((path.len() as u64).to_be_bytes());
            hasher.update(path.as_bytes());
            hasher.update((content.len() as u64).to_be_bytes());
            hasher.update(content.as_bytes());
        }
        let result = hasher.finalize();
        Self(format!("sha256:{}", hex::encode(&result[..16])))
    }

    /// Get the digest string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
