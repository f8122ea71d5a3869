use std::fmt::Write as _;

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Derives a stable idempotency key from the request body.
///
/// The body is serialized through `serde_json::Value`, whose maps keep keys
/// sorted, so field order in the caller's type does not change the key.
pub fn derive_key<T: Serialize>(request: &T) -> serde_json::Result<String> {
    let canonical = serde_json::to_value(request)?.to_string();
    let digest = Sha256::digest(canonical.as_bytes());
    let mut key = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(key, "{byte:02x}");
    }
    Ok(key)
}
