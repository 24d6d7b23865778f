//! Deterministic, authenticated encryption for unsubscribe tokens.
//!
//! AES-SIV (RFC 5297) under a key derived from the configured secret. The same
//! plaintext always yields the same token, and a token only opens under the key
//! that produced it.

use std::fmt;

use aes_siv::{KeyInit, siv::Aes256Siv};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::CloakError;

type HmacSha256 = Hmac<Sha256>;

const TAG_LEN: usize = 16;
const HALF_KEY_LEN: usize = 32;

/// Associated data bound into every token.
const TOKEN_CONTEXT: &[u8] = b"unsubscribe";

#[derive(Clone)]
pub struct Cloak {
    key: [u8; HALF_KEY_LEN * 2],
}

impl fmt::Debug for Cloak {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cloak").finish_non_exhaustive()
    }
}

impl Cloak {
    pub fn new(secret: &[u8]) -> Result<Self, CloakError> {
        if secret.is_empty() {
            return Err(CloakError::EmptyKey);
        }

        let mut key = [0u8; HALF_KEY_LEN * 2];
        key[..HALF_KEY_LEN].copy_from_slice(&derive_key(secret, b"cloak:mac")?);
        key[HALF_KEY_LEN..].copy_from_slice(&derive_key(secret, b"cloak:enc")?);

        Ok(Self { key })
    }

    pub fn veil(&self, plaintext: &[u8]) -> Result<String, CloakError> {
        let sealed = self
            .cipher()?
            .encrypt([TOKEN_CONTEXT], plaintext)
            .map_err(|_| CloakError::InvalidKey)?;

        Ok(URL_SAFE_NO_PAD.encode(sealed))
    }

    pub fn unveil(&self, token: &str) -> Result<Vec<u8>, CloakError> {
        let sealed = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| CloakError::Malformed)?;

        if sealed.len() < TAG_LEN {
            return Err(CloakError::Malformed);
        }

        self.cipher()?
            .decrypt([TOKEN_CONTEXT], &sealed)
            .map_err(|_| CloakError::Tampered)
    }

    fn cipher(&self) -> Result<Aes256Siv, CloakError> {
        Aes256Siv::new_from_slice(&self.key).map_err(|_| CloakError::InvalidKey)
    }
}

fn derive_key(secret: &[u8], label: &[u8]) -> Result<[u8; HALF_KEY_LEN], CloakError> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| CloakError::InvalidKey)?;
    mac.update(label);
    let digest = mac.finalize().into_bytes();

    let mut key = [0u8; HALF_KEY_LEN];
    key.copy_from_slice(&digest);
    Ok(key)
}
