//! AES-256-GCM encryption/decryption for stored shop credentials.
//!
//! Ciphertext is stored as `base64(iv).base64(tag).base64(ciphertext)`,
//! matching the format the relational store already holds in
//! `auth."googleConfig"` / `auth."bingApiKey"`.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;
use thiserror::Error;

const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("decryption key must be 32 bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("ciphertext envelope must have 3 dot-separated parts, got {0}")]
    MalformedEnvelope(usize),
    #[error("base64 decode failed: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("iv must be {IV_LEN} bytes, got {0}")]
    InvalidIvLength(usize),
    #[error("tag must be {TAG_LEN} bytes, got {0}")]
    InvalidTagLength(usize),
    #[error("AES-GCM operation failed")]
    Aead,
}

/// A 32-byte AES-256 key, already decoded from its hex/env representation.
#[derive(Clone)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKeyLength(bytes.len()));
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    pub fn from_hex(hex: &str) -> Result<Self, CryptoError> {
        let bytes = hex_decode(hex).map_err(|_| CryptoError::InvalidKeyLength(hex.len() / 2))?;
        Self::from_bytes(&bytes)
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }
}

fn hex_decode(s: &str) -> Result<Vec<u8>, std::num::ParseIntError> {
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16))
        .collect()
}

/// Encrypts `plaintext`, returning `base64(iv).base64(tag).base64(ciphertext)`.
pub fn encrypt(key: &EncryptionKey, plaintext: &[u8]) -> Result<String, CryptoError> {
    let mut iv_bytes = [0u8; IV_LEN];
    rand::rng().fill_bytes(&mut iv_bytes);
    let nonce = Nonce::from_slice(&iv_bytes);

    let sealed = key
        .cipher()
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad: &[],
            },
        )
        .map_err(|_| CryptoError::Aead)?;

    let split_at = sealed.len() - TAG_LEN;
    let (ciphertext, tag) = sealed.split_at(split_at);

    Ok(format!(
        "{}.{}.{}",
        BASE64.encode(iv_bytes),
        BASE64.encode(tag),
        BASE64.encode(ciphertext),
    ))
}

/// Decrypts an `iv.tag.ciphertext` envelope back to plaintext bytes.
pub fn decrypt(key: &EncryptionKey, envelope: &str) -> Result<Vec<u8>, CryptoError> {
    let parts: Vec<&str> = envelope.split('.').collect();
    if parts.len() != 3 {
        return Err(CryptoError::MalformedEnvelope(parts.len()));
    }
    let iv = BASE64.decode(parts[0])?;
    let tag = BASE64.decode(parts[1])?;
    let ciphertext = BASE64.decode(parts[2])?;

    if iv.len() != IV_LEN {
        return Err(CryptoError::InvalidIvLength(iv.len()));
    }
    if tag.len() != TAG_LEN {
        return Err(CryptoError::InvalidTagLength(tag.len()));
    }

    let mut sealed = Vec::with_capacity(ciphertext.len() + tag.len());
    sealed.extend_from_slice(&ciphertext);
    sealed.extend_from_slice(&tag);

    let nonce = Nonce::from_slice(&iv);
    key.cipher()
        .decrypt(
            nonce,
            Payload {
                msg: &sealed,
                aad: &[],
            },
        )
        .map_err(|_| CryptoError::Aead)
}

/// Decrypts an envelope into a UTF-8 string, the common case for
/// credential blobs (a JSON service-account document or an API key).
pub fn decrypt_to_string(key: &EncryptionKey, envelope: &str) -> Result<String, CryptoError> {
    let bytes = decrypt(key, envelope)?;
    String::from_utf8(bytes).map_err(|_| CryptoError::Aead)
}
