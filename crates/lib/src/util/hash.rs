//! SHA-256 helpers for source verification.
//!
//! Recipes carry checksums as lowercase hex. A leading `sha256:` tag is
//! tolerated so checksums can be pasted from other tools unchanged.

use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

/// Hash an in-memory buffer, returning lowercase hex.
pub fn hash_bytes(bytes: &[u8]) -> String {
  let mut hasher = Sha256::new();
  hasher.update(bytes);
  hex::encode(hasher.finalize())
}

/// Hash a file on disk without loading it into memory at once.
pub async fn hash_file(path: &Path) -> Result<String, std::io::Error> {
  let mut file = tokio::fs::File::open(path).await?;
  let mut hasher = Sha256::new();
  let mut buf = vec![0u8; 64 * 1024];

  loop {
    let n = file.read(&mut buf).await?;
    if n == 0 {
      break;
    }
    hasher.update(&buf[..n]);
  }

  Ok(hex::encode(hasher.finalize()))
}

/// Canonical form of a checksum string: trimmed, lowercase, without algorithm tag.
pub fn normalize_checksum(checksum: &str) -> String {
  let trimmed = checksum.trim();
  let bare = trimmed.strip_prefix("sha256:").unwrap_or(trimmed);
  bare.to_ascii_lowercase()
}

/// Whether `checksum` looks like a full SHA-256 digest.
pub fn is_sha256_hex(checksum: &str) -> bool {
  let normalized = normalize_checksum(checksum);
  normalized.len() == 64 && normalized.chars().all(|c| c.is_ascii_hexdigit())
}
