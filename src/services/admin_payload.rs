//! Encrypted request bodies for the admin API.
//!
//! Layout: `salt(32) | cipher id(1) | nonce(8) | stream`. The key is
//! argon2id over the admin secret key. The stream is a single final fragment
//! sealed with ChaCha20-Poly1305, whose nonce is the 8-byte prefix followed by
//! a little-endian sequence number.

use crate::services::credentials::{EntropyError, EntropySource};
use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::{
    ChaCha20Poly1305, Key, KeyInit, Nonce,
    aead::{Aead, Payload},
};
use thiserror::Error;

const SALT_LEN: usize = 32;
const NONCE_PREFIX_LEN: usize = 8;
const CHACHA20_POLY1305_ID: u8 = 0x01;
const FINAL_FRAGMENT: u8 = 0x80;

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error(transparent)]
    Entropy(#[from] EntropyError),
    #[error("key derivation: {0}")]
    Kdf(String),
    #[error("encryption: {0}")]
    Seal(String),
}

fn derive_key(password: &str, salt: &[u8]) -> Result<[u8; 32], PayloadError> {
    let params =
        Params::new(64 * 1024, 1, 4, Some(32)).map_err(|err| PayloadError::Kdf(err.to_string()))?;
    let mut key = [0u8; 32];
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .map_err(|err| PayloadError::Kdf(err.to_string()))?;
    Ok(key)
}

fn nonce(prefix: &[u8], sequence: u32) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[..NONCE_PREFIX_LEN].copy_from_slice(prefix);
    nonce[NONCE_PREFIX_LEN..].copy_from_slice(&sequence.to_le_bytes());
    nonce
}

fn seal(
    cipher: &ChaCha20Poly1305,
    nonce: &[u8; 12],
    msg: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, PayloadError> {
    cipher
        .encrypt(Nonce::from_slice(nonce), Payload { msg, aad })
        .map_err(|err| PayloadError::Seal(err.to_string()))
}

/// Encrypt `data` under `password` for the admin API.
pub fn encrypt(
    entropy: &dyn EntropySource,
    password: &str,
    data: &[u8],
) -> Result<Vec<u8>, PayloadError> {
    let mut salt = [0u8; SALT_LEN];
    entropy.fill(&mut salt)?;
    let mut prefix = [0u8; NONCE_PREFIX_LEN];
    entropy.fill(&mut prefix)?;

    let key = derive_key(password, &salt)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));

    let mut ad = vec![FINAL_FRAGMENT];
    ad.extend(seal(&cipher, &nonce(&prefix, 0), &[], &[])?);
    let sealed = seal(&cipher, &nonce(&prefix, 1), data, &ad)?;

    let mut out = Vec::with_capacity(SALT_LEN + 1 + NONCE_PREFIX_LEN + sealed.len());
    out.extend_from_slice(&salt);
    out.push(CHACHA20_POLY1305_ID);
    out.extend_from_slice(&prefix);
    out.extend(sealed);
    Ok(out)
}

/// Inverse of [`encrypt`] for single-fragment payloads.
#[cfg(test)]
pub fn decrypt(password: &str, data: &[u8]) -> Option<Vec<u8>> {
    let header = SALT_LEN + 1 + NONCE_PREFIX_LEN;
    if data.len() < header || data[SALT_LEN] != CHACHA20_POLY1305_ID {
        return None;
    }
    let salt = &data[..SALT_LEN];
    let prefix = &data[SALT_LEN + 1..header];
    let key = derive_key(password, salt).ok()?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));

    let mut ad = vec![FINAL_FRAGMENT];
    ad.extend(seal(&cipher, &nonce(prefix, 0), &[], &[]).ok()?);
    cipher
        .decrypt(
            Nonce::from_slice(&nonce(prefix, 1)),
            Payload {
                msg: &data[header..],
                aad: &ad,
            },
        )
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingEntropy, SeededEntropy};

    #[test]
    fn layout_and_contents() {
        let body = br#"{"secretKey":"abc","status":"enabled"}"#;
        let sealed = encrypt(&SeededEntropy::new(1), "minio-secret", body).unwrap();

        assert_eq!(sealed.len(), 32 + 1 + 8 + body.len() + 16);
        assert_eq!(sealed[32], CHACHA20_POLY1305_ID);
        assert_eq!(decrypt("minio-secret", &sealed).as_deref(), Some(&body[..]));
        assert!(decrypt("other-secret", &sealed).is_none());
    }

    #[test]
    fn fresh_salt_every_call() {
        let entropy = SeededEntropy::new(2);
        let first = encrypt(&entropy, "k", b"x").unwrap();
        let second = encrypt(&entropy, "k", b"x").unwrap();
        assert_ne!(first[..SALT_LEN], second[..SALT_LEN]);
    }

    #[test]
    fn entropy_failure_is_reported() {
        let err = encrypt(&FailingEntropy, "k", b"x").unwrap_err();
        assert!(matches!(err, PayloadError::Entropy(_)));
    }
}
