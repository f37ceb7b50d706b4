//! Sealed envelopes for payloads exchanged with a paired session.
//!
//! A payload is encoded as JSON and then authenticated-and-encrypted with
//! ChaCha20Poly1305 under the session's symmetric key. The sealed blob is
//! `nonce(12) || ciphertext || tag(16)`, with a fresh random nonce per seal.

use std::fmt;

use base64::Engine;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize, Serializer};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::utils::constant_time_compare_array;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Error type for seal/unseal operations.
#[derive(Debug, thiserror::Error)]
pub enum SealError {
    #[error("encoding failed: {0}")]
    Encoding(String),
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("RNG failed")]
    RngError,
    /// Authentication failed, the blob was malformed, or the plaintext was
    /// not valid for the requested payload type.
    #[error("decoding failed")]
    DecodingFailed,
}

/// Symmetric key shared with one paired session.
///
/// Supplied by the pairing handshake; opaque to this crate.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; 32]);

impl SessionKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, SealError> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| SealError::DecodingFailed)?;
        Ok(Self(arr))
    }

    /// Fresh random key, for tests and local tooling.
    pub fn generate() -> Result<Self, SealError> {
        let mut key = [0u8; 32];
        getrandom::getrandom(&mut key).map_err(|_| SealError::RngError)?;
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(&self.0))
    }
}

impl PartialEq for SessionKey {
    fn eq(&self, other: &Self) -> bool {
        constant_time_compare_array(&self.0, &other.0)
    }
}

impl Eq for SessionKey {}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

impl Serialize for SessionKey {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        base64_bytes::serialize(&self.0, s)
    }
}

impl<'de> Deserialize<'de> for SessionKey {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let bytes = base64_bytes::deserialize(d)?;
        SessionKey::from_slice(&bytes).map_err(|_| serde::de::Error::custom("expected 32-byte key"))
    }
}

/// Encrypt raw bytes under `key`.
pub fn seal_bytes(plaintext: &[u8], key: &SessionKey) -> Result<Vec<u8>, SealError> {
    let mut nonce12 = [0u8; NONCE_LEN];
    getrandom::getrandom(&mut nonce12).map_err(|_| SealError::RngError)?;

    let ct = key
        .cipher()
        .encrypt(Nonce::from_slice(&nonce12), plaintext)
        .map_err(|_| SealError::EncryptionFailed)?;

    let mut out = Vec::with_capacity(NONCE_LEN + ct.len());
    out.extend_from_slice(&nonce12);
    out.extend_from_slice(&ct);
    Ok(out)
}

/// Decrypt raw bytes sealed under `key`.
///
/// Tag verification inside the AEAD is constant-time.
pub fn unseal_bytes(sealed: &[u8], key: &SessionKey) -> Result<Vec<u8>, SealError> {
    if sealed.len() < NONCE_LEN + TAG_LEN {
        return Err(SealError::DecodingFailed);
    }
    let (nonce, ct) = sealed.split_at(NONCE_LEN);
    key.cipher()
        .decrypt(Nonce::from_slice(nonce), ct)
        .map_err(|_| SealError::DecodingFailed)
}

/// Serialize `payload` as JSON and seal it.
pub fn seal<T: Serialize>(payload: &T, key: &SessionKey) -> Result<Vec<u8>, SealError> {
    let json = serde_json::to_vec(payload).map_err(|e| SealError::Encoding(e.to_string()))?;
    seal_bytes(&json, key)
}

/// Unseal and parse a JSON payload of type `T`.
pub fn unseal<T: DeserializeOwned>(sealed: &[u8], key: &SessionKey) -> Result<T, SealError> {
    let json = unseal_bytes(sealed, key)?;
    serde_json::from_slice(&json).map_err(|_| SealError::DecodingFailed)
}

/// Seal and base64-encode for text transports.
pub fn seal_base64<T: Serialize>(payload: &T, key: &SessionKey) -> Result<String, SealError> {
    let sealed = seal(payload, key)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(sealed))
}

/// Decode base64 and unseal.
pub fn unseal_base64<T: DeserializeOwned>(sealed: &str, key: &SessionKey) -> Result<T, SealError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(sealed.trim())
        .map_err(|_| SealError::DecodingFailed)?;
    unseal(&bytes, key)
}

/// Serde adapter that writes byte buffers as standard base64 strings.
pub mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(v))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        base64::engine::general_purpose::STANDARD
            .decode(s)
            .map_err(serde::de::Error::custom)
    }
}
