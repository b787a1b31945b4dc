//! Session key derivation
//!
//! Implements the WS-Trust computed-key PRF: `P_SHA1(client entropy, server
//! entropy)`, the TLS `P_hash` expansion over HMAC, truncated to the requested
//! key length.

use crate::session::SecretBytes;
use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;
use wssc_core::{ErrorContext, WsscError, WsscResult};

/// Hash underlying the `P_hash` expansion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PrfAlgorithm {
    /// `http://docs.oasis-open.org/ws-sx/ws-trust/200512/CK/PSHA1`
    #[default]
    PSha1,
    PSha256,
}

/// Derives shared secrets from two entropy contributions
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionKeyDeriver {
    algorithm: PrfAlgorithm,
}

impl SessionKeyDeriver {
    pub fn new(algorithm: PrfAlgorithm) -> Self {
        Self { algorithm }
    }

    pub fn algorithm(&self) -> PrfAlgorithm {
        self.algorithm
    }

    /// Derive exactly `key_size` bytes.
    ///
    /// The client entropy keys the HMAC and the server entropy is the seed.
    pub fn derive(
        &self,
        client_entropy: &[u8],
        server_entropy: &[u8],
        key_size: usize,
    ) -> WsscResult<SecretBytes> {
        if key_size == 0 {
            return Err(derivation_error("requested key size must be positive"));
        }
        if client_entropy.is_empty() {
            return Err(derivation_error("client entropy is empty"));
        }
        if server_entropy.is_empty() {
            return Err(derivation_error("server entropy is empty"));
        }

        let mut key = vec![0u8; key_size];
        let expanded = match self.algorithm {
            PrfAlgorithm::PSha1 => p_hash::<Hmac<Sha1>>(client_entropy, server_entropy, &mut key),
            PrfAlgorithm::PSha256 => {
                p_hash::<Hmac<Sha256>>(client_entropy, server_entropy, &mut key)
            }
        };
        expanded.map_err(|e| derivation_error(&format!("unusable key material: {}", e)))?;

        Ok(SecretBytes::new(key))
    }
}

/// Shorthand for `P_SHA1` derivation
pub fn derive_key(
    client_entropy: &[u8],
    server_entropy: &[u8],
    key_size: usize,
) -> WsscResult<SecretBytes> {
    SessionKeyDeriver::default().derive(client_entropy, server_entropy, key_size)
}

/// `P_hash(secret, seed)`: `A(0) = seed`, `A(i) = HMAC(secret, A(i-1))`,
/// output is `HMAC(secret, A(1) + seed) || HMAC(secret, A(2) + seed) || ...`
fn p_hash<M>(secret: &[u8], seed: &[u8], out: &mut [u8]) -> Result<(), hmac::digest::InvalidLength>
where
    M: Mac + KeyInit + Clone,
{
    let keyed = <M as Mac>::new_from_slice(secret)?;

    let mut a = {
        let mut mac = keyed.clone();
        mac.update(seed);
        mac.finalize().into_bytes()
    };

    let mut offset = 0;
    while offset < out.len() {
        let mut mac = keyed.clone();
        mac.update(&a);
        mac.update(seed);
        let block = mac.finalize().into_bytes();

        let n = block.len().min(out.len() - offset);
        out[offset..offset + n].copy_from_slice(&block[..n]);
        offset += n;

        let mut mac = keyed.clone();
        mac.update(&a);
        a = mac.finalize().into_bytes();
    }

    Ok(())
}

fn derivation_error(message: &str) -> WsscError {
    WsscError::KeyDerivation {
        message: message.to_string(),
        context: ErrorContext::new("key_deriver").with_operation("derive"),
    }
}
