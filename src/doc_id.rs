//! Document identifiers derived from repository-relative paths.
//!
//! The knowledge engine only accepts identifiers made of letters, digits,
//! `.`, `_` and `-`. [`normalize`] drops every other character, separators
//! included, so `src/lib.rs` becomes `srclib.rs`. Distinct paths can
//! therefore collide (`a/bc.rs` and `ab/c.rs` both become `abc.rs`); the
//! [`IdScheme::Hashed`] scheme appends a path digest to avoid that while
//! keeping the readable form as a prefix.

use serde::Deserialize;
use sha2::{Digest, Sha256};

/// How a relative path is turned into a document identifier.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum IdScheme {
    /// Allowed characters of the path, in order.
    #[default]
    Stripped,
    /// Stripped form, `-`, then the first 16 hex chars of SHA-256(path).
    Hashed,
}

fn is_allowed(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

/// Keep only `[A-Za-z0-9._-]` from `path`, in original order.
pub fn normalize(path: &str) -> String {
    path.chars().filter(|c| is_allowed(*c)).collect()
}

/// Identifier for `path` under the given scheme.
///
/// A path with no allowed characters at all (e.g. `目录/文件`) would
/// normalize to an empty id; it gets the bare path digest under either
/// scheme instead.
pub fn document_id(path: &str, scheme: IdScheme) -> String {
    let stripped = normalize(path);
    if stripped.is_empty() {
        return path_digest(path);
    }
    match scheme {
        IdScheme::Stripped => stripped,
        IdScheme::Hashed => format!("{}-{}", stripped, path_digest(path)),
    }
}

/// First 16 hex chars of SHA-256(path).
fn path_digest(path: &str) -> String {
    let digest = hex::encode(Sha256::digest(path.as_bytes()));
    digest[..16].to_string()
}
