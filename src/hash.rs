//! Drift hash of a Rule definition.

use graph_types::Definition;
use sha2::{Digest, Sha512};

/// SHA-512 over the semantically significant definition fields, hex-encoded.
///
/// Fields are length-prefixed so `("ab", "c")` and `("a", "bc")` differ.
/// The free-text description is not part of the hash.
pub fn definition_hash(definition: &Definition) -> String {
    let mut hasher = Sha512::new();
    for field in [
        &definition.code,
        &definition.version,
        &definition.class,
        &definition.category,
    ] {
        hasher.update((field.len() as u64).to_be_bytes());
        hasher.update(field.as_bytes());
    }
    hex::encode(hasher.finalize())
}
