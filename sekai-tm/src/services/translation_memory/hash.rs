use sha2::{Digest, Sha256};

use super::normalize;

pub fn hash_norm(norm: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(norm.as_bytes());
    let result = hasher.finalize();
    hex::encode(result)
}

/// Exact-match key for a raw source string.
pub fn source_hash(text: &str, case_sensitive: bool) -> String {
    hash_norm(&normalize::normalize_with(text, case_sensitive))
}
