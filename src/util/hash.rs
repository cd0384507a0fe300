//! Content hashing for change detection.
//!
//! Hashes are SHA-256 over *normalised* text so that line-ending and
//! trailing-whitespace churn does not produce spurious diffs.

use sha2::{Digest, Sha256};

/// Canonicalise content for hashing:
/// - CRLF / CR line endings become LF
/// - every line is stripped of leading/trailing whitespace
/// - the whole document is trimmed
#[must_use]
pub fn normalize_content(content: &str) -> String {
    let unified = content.replace("\r\n", "\n").replace('\r', "\n");
    unified
        .lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// SHA-256 hex digest of the normalised content.
#[must_use]
pub fn content_hash(content: &str) -> String {
    let normalized = normalize_content(content);
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}
