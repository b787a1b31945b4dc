//! One-way lookup keys for persisted sessions

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha512};
use wssc_core::Identity;

/// Lookup key of an inbound session: base64 SHA-512 of the identifier
pub fn inbound_key_hash(identifier: &str) -> String {
    STANDARD.encode(Sha512::digest(identifier.as_bytes()))
}

/// Lookup key of an outbound session.
///
/// Each part is prefixed with its length so that shifting characters between
/// adjacent parts changes the hash.
pub fn outbound_key_hash(owner: &Identity, service_url: &str) -> String {
    let mut hasher = Sha512::new();
    for part in [
        owner.provider_id.as_str(),
        owner.user_id.as_str(),
        service_url,
    ] {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part.as_bytes());
    }
    STANDARD.encode(hasher.finalize())
}
