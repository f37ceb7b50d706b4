//! Identity module for the device's long-term signing keypair.
//!
//! Provides Ed25519 signing, the SSH wire encoding of the public key and the
//! fingerprint derived from it. Secret key material is zeroized on drop and
//! is only ever handed out as a seed for the secure store.

use std::fmt;
use std::str::FromStr;

use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::hash::fingerprint;

const SSH_ED25519: &str = "ssh-ed25519";
const SSH_RSA: &str = "ssh-rsa";

/// Error type for identity operations.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(KeyKind),
    #[error("key generation failed: {0}")]
    KeyGeneration(String),
    #[error("invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },
    #[error("invalid wire-format public key: {0}")]
    InvalidWireFormat(&'static str),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid public key")]
    InvalidPublicKey,
}

/// Asymmetric algorithm of an identity keypair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyKind {
    Ed25519,
    /// Known to peers but not implemented by this agent.
    Rsa,
}

impl KeyKind {
    /// SSH key type name used in the wire format.
    pub fn ssh_name(self) -> &'static str {
        match self {
            KeyKind::Ed25519 => SSH_ED25519,
            KeyKind::Rsa => SSH_RSA,
        }
    }
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyKind::Ed25519 => write!(f, "ed25519"),
            KeyKind::Rsa => write!(f, "rsa"),
        }
    }
}

impl FromStr for KeyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ed25519" | "ssh-ed25519" => Ok(KeyKind::Ed25519),
            "rsa" | "ssh-rsa" => Ok(KeyKind::Rsa),
            other => Err(format!("unknown key kind: {}", other)),
        }
    }
}

/// The device's long-term signing identity.
///
/// Not `Clone`, `Debug` or `Serialize`.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Identity {
    #[zeroize(skip)]
    kind: KeyKind,
    #[zeroize(skip)] // SigningKey implements Zeroize internally
    sign_key: SigningKey,
}

impl Identity {
    /// Generate a new random identity of the given kind.
    pub fn generate(kind: KeyKind) -> Result<Self, IdentityError> {
        match kind {
            KeyKind::Ed25519 => Ok(Self {
                kind,
                sign_key: SigningKey::generate(&mut OsRng),
            }),
            other => Err(IdentityError::UnsupportedAlgorithm(other)),
        }
    }

    /// Rebuild an identity from its 32-byte private seed.
    pub fn from_seed(kind: KeyKind, seed: &[u8]) -> Result<Self, IdentityError> {
        match kind {
            KeyKind::Ed25519 => {
                let seed: &[u8; 32] =
                    seed.try_into()
                        .map_err(|_| IdentityError::InvalidKeyLength {
                            expected: 32,
                            got: seed.len(),
                        })?;
                Ok(Self {
                    kind,
                    sign_key: SigningKey::from_bytes(seed),
                })
            }
            other => Err(IdentityError::UnsupportedAlgorithm(other)),
        }
    }

    pub fn kind(&self) -> KeyKind {
        self.kind
    }

    /// Private seed, only for writing into secure storage.
    pub fn seed(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.sign_key.to_bytes())
    }

    /// Raw Ed25519 public key bytes.
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.sign_key.verifying_key().to_bytes()
    }

    /// SSH wire-format public key: string(type) || string(key).
    pub fn wire_public_key(&self) -> Vec<u8> {
        encode_wire(self.kind, &self.public_key_bytes())
    }

    pub fn fingerprint(&self) -> [u8; 32] {
        fingerprint(&self.wire_public_key())
    }

    pub fn public_identity(&self) -> PublicIdentity {
        let wire = self.wire_public_key();
        PublicIdentity {
            kind: self.kind,
            fingerprint: fingerprint(&wire),
            wire_public_key: wire,
        }
    }

    /// Sign a message using Ed25519.
    ///
    /// Returns a 64-byte signature.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        let signature: Signature = self.sign_key.sign(message);
        signature.to_bytes()
    }
}

/// Public half of an identity, safe to hand to peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicIdentity {
    pub kind: KeyKind,
    #[serde(with = "crate::sealed::base64_bytes")]
    pub wire_public_key: Vec<u8>,
    #[serde(with = "hex_32")]
    pub fingerprint: [u8; 32],
}

impl PublicIdentity {
    /// Build from wire-format bytes, recomputing the fingerprint.
    pub fn from_wire(wire: &[u8]) -> Result<Self, IdentityError> {
        let (kind, _key) = decode_wire(wire)?;
        Ok(Self {
            kind,
            wire_public_key: wire.to_vec(),
            fingerprint: fingerprint(wire),
        })
    }

    /// OpenSSH style `SHA256:<base64>` rendering.
    pub fn fingerprint_ssh(&self) -> String {
        format!(
            "SHA256:{}",
            base64::engine::general_purpose::STANDARD_NO_PAD.encode(self.fingerprint)
        )
    }

    pub fn fingerprint_hex(&self) -> String {
        hex::encode(self.fingerprint)
    }

    /// Authorized-keys style line: `<type> <base64 wire>`.
    pub fn authorized_key(&self) -> String {
        format!(
            "{} {}",
            self.kind.ssh_name(),
            base64::engine::general_purpose::STANDARD.encode(&self.wire_public_key)
        )
    }
}

fn encode_wire(kind: KeyKind, key: &[u8]) -> Vec<u8> {
    let name = kind.ssh_name().as_bytes();
    let mut out = Vec::with_capacity(8 + name.len() + key.len());
    out.extend_from_slice(&(name.len() as u32).to_be_bytes());
    out.extend_from_slice(name);
    out.extend_from_slice(&(key.len() as u32).to_be_bytes());
    out.extend_from_slice(key);
    out
}

fn read_string<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8], IdentityError> {
    if buf.len() < 4 {
        return Err(IdentityError::InvalidWireFormat("truncated length"));
    }
    let (len, rest) = buf.split_at(4);
    let len = u32::from_be_bytes([len[0], len[1], len[2], len[3]]) as usize;
    if rest.len() < len {
        return Err(IdentityError::InvalidWireFormat("truncated field"));
    }
    let (field, rest) = rest.split_at(len);
    *buf = rest;
    Ok(field)
}

fn decode_wire(wire: &[u8]) -> Result<(KeyKind, &[u8]), IdentityError> {
    let mut buf = wire;
    let name = read_string(&mut buf)?;
    let kind = match name {
        n if n == SSH_ED25519.as_bytes() => KeyKind::Ed25519,
        n if n == SSH_RSA.as_bytes() => KeyKind::Rsa,
        _ => return Err(IdentityError::InvalidWireFormat("unknown key type")),
    };
    let key = read_string(&mut buf)?;
    if kind == KeyKind::Ed25519 && key.len() != 32 {
        return Err(IdentityError::InvalidKeyLength {
            expected: 32,
            got: key.len(),
        });
    }
    if !buf.is_empty() {
        return Err(IdentityError::InvalidWireFormat("trailing bytes"));
    }
    Ok((kind, key))
}

/// Verify an Ed25519 signature made by the holder of `wire_public_key`.
pub fn verify_signature(
    wire_public_key: &[u8],
    message: &[u8],
    signature: &[u8],
) -> Result<(), IdentityError> {
    let (kind, key) = decode_wire(wire_public_key)?;
    if kind != KeyKind::Ed25519 {
        return Err(IdentityError::UnsupportedAlgorithm(kind));
    }
    let key: [u8; 32] = key.try_into().map_err(|_| IdentityError::InvalidPublicKey)?;
    let verifying_key =
        VerifyingKey::from_bytes(&key).map_err(|_| IdentityError::InvalidPublicKey)?;
    let sig: [u8; 64] = signature
        .try_into()
        .map_err(|_| IdentityError::InvalidSignature)?;
    verifying_key
        .verify_strict(message, &Signature::from_bytes(&sig))
        .map_err(|_| IdentityError::InvalidSignature)
}

mod hex_32 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(v))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(d)?;
        let bytes = hex::decode(s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 32 bytes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::sha256;

    #[test]
    fn test_generate_ed25519() {
        let identity = Identity::generate(KeyKind::Ed25519).unwrap();
        assert_eq!(identity.kind(), KeyKind::Ed25519);

        let wire = identity.wire_public_key();
        assert_eq!(identity.fingerprint(), sha256(&wire));
    }

    #[test]
    fn test_generate_rsa_unsupported() {
        let result = Identity::generate(KeyKind::Rsa);
        assert!(matches!(
            result,
            Err(IdentityError::UnsupportedAlgorithm(KeyKind::Rsa))
        ));
    }

    #[test]
    fn test_wire_format_layout() {
        let identity = Identity::from_seed(KeyKind::Ed25519, &[7u8; 32]).unwrap();
        let wire = identity.wire_public_key();

        assert_eq!(&wire[..4], &11u32.to_be_bytes());
        assert_eq!(&wire[4..15], b"ssh-ed25519");
        assert_eq!(&wire[15..19], &32u32.to_be_bytes());
        assert_eq!(&wire[19..], &identity.public_key_bytes());
        assert_eq!(wire.len(), 51);
    }

    #[test]
    fn test_seed_round_trip_keeps_fingerprint() {
        let original = Identity::generate(KeyKind::Ed25519).unwrap();
        let restored = Identity::from_seed(KeyKind::Ed25519, &original.seed()[..]).unwrap();
        assert_eq!(original.fingerprint(), restored.fingerprint());
    }

    #[test]
    fn test_from_seed_wrong_length() {
        let result = Identity::from_seed(KeyKind::Ed25519, &[1u8; 31]);
        assert!(matches!(
            result,
            Err(IdentityError::InvalidKeyLength { expected: 32, got: 31 })
        ));
    }

    #[test]
    fn test_signature_round_trip() {
        let identity = Identity::generate(KeyKind::Ed25519).unwrap();
        let message = b"git commit payload";
        let signature = identity.sign(message);

        assert!(verify_signature(&identity.wire_public_key(), message, &signature).is_ok());
        assert!(verify_signature(&identity.wire_public_key(), b"tampered", &signature).is_err());
    }

    #[test]
    fn test_signature_wrong_key_fails() {
        let a = Identity::generate(KeyKind::Ed25519).unwrap();
        let b = Identity::generate(KeyKind::Ed25519).unwrap();
        let signature = a.sign(b"message");
        assert!(verify_signature(&b.wire_public_key(), b"message", &signature).is_err());
    }

    #[test]
    fn test_public_identity_from_wire() {
        let identity = Identity::generate(KeyKind::Ed25519).unwrap();
        let public = PublicIdentity::from_wire(&identity.wire_public_key()).unwrap();
        assert_eq!(public, identity.public_identity());
        assert!(public.fingerprint_ssh().starts_with("SHA256:"));
        assert!(public.authorized_key().starts_with("ssh-ed25519 "));
    }

    #[test]
    fn test_from_wire_rejects_garbage() {
        assert!(PublicIdentity::from_wire(&[0, 0, 0]).is_err());
        assert!(PublicIdentity::from_wire(&[0, 0, 0, 3, b'f', b'o', b'o']).is_err());

        let identity = Identity::generate(KeyKind::Ed25519).unwrap();
        let mut wire = identity.wire_public_key();
        wire.push(0);
        assert!(PublicIdentity::from_wire(&wire).is_err());
    }

    #[test]
    fn test_key_kind_parse() {
        assert_eq!("ed25519".parse::<KeyKind>().unwrap(), KeyKind::Ed25519);
        assert_eq!("RSA".parse::<KeyKind>().unwrap(), KeyKind::Rsa);
        assert!("dsa".parse::<KeyKind>().is_err());
    }
}
