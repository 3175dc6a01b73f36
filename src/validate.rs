//! Pure, I/O-free checks on externally supplied strings. Every mutating or
//! querying operation in [`crate::meta_store`] and [`crate::blob_store`]
//! calls these before touching storage, so a rejected call never reaches
//! either substrate.

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{EngineError, Result};

lazy_static! {
    static ref NAME_RE: Regex = Regex::new(r"^[0-9a-zA-Z_.\-]+$").expect("valid regex");
    static ref SHA256_RE: Regex = Regex::new(r"^[0-9a-f]{64}$").expect("valid regex");
}

/// Checks that `name` is a valid project, version, or file name.
pub fn validate_name(name: &str) -> Result<()> {
    if name == "." || name == ".." || !NAME_RE.is_match(name) {
        return Err(EngineError::InvalidName);
    }
    Ok(())
}

/// Checks that `sha256` is a syntactically valid SHA-256 hex digest.
pub fn validate_sha256(sha256: &str) -> Result<()> {
    if !SHA256_RE.is_match(sha256) {
        return Err(EngineError::InvalidSha256);
    }
    Ok(())
}

/// Parses a boolean coming from an untyped boundary (e.g. a query string)
/// and rejects anything but the literal tokens `true`/`false` — no truthy
/// coercion of `1`, `0`, `"True"`, empty strings, and so on.
///
/// Callers that already hold a `bool` (most of this crate's own API) have
/// nothing to validate; this function exists for boundaries that haven't
/// parsed their payload into a `bool` yet.
pub fn validate_star(raw: &str) -> Result<bool> {
    match raw {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(EngineError::InvalidStarState),
    }
}
