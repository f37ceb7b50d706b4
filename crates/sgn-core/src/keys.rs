//! Identity key lifecycle.
//!
//! `KeyManager` owns the device identity. The secret seed lives in the
//! secure storage slot `"me"` and is only ever read back into an [`Identity`];
//! callers get signatures and public material, never the seed.

use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use sgn_crypto::identity::Identity;
use sgn_crypto::sealed::base64_bytes;
use sgn_crypto::{KeyKind, PublicIdentity};
use tracing::{error, info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::errors::CoreError;
use crate::keystore::SecureStorage;
use crate::types::Peer;

const IDENTITY_SLOT: &str = "me";
const EMAIL_KEY: &str = "me_email";

/// Serialized form of the identity inside the secure storage slot.
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct StoredKey {
    #[zeroize(skip)]
    kind: KeyKind,
    #[serde(with = "base64_bytes")]
    seed: Vec<u8>,
}

pub struct KeyManager {
    storage: Arc<dyn SecureStorage>,
    // Serializes signing against generate/destroy within this process.
    slot_lock: RwLock<()>,
}

impl KeyManager {
    pub fn new(storage: Arc<dyn SecureStorage>) -> Self {
        Self {
            storage,
            slot_lock: RwLock::new(()),
        }
    }

    /// Generate a fresh identity and persist it, replacing any prior key.
    pub fn generate(&self, kind: KeyKind) -> Result<PublicIdentity, CoreError> {
        let _guard = self.slot_lock.write().unwrap_or_else(PoisonError::into_inner);

        let identity = Identity::generate(kind)?;
        let stored = StoredKey {
            kind,
            seed: identity.seed().to_vec(),
        };
        let bytes = Zeroizing::new(
            serde_json::to_vec(&stored)
                .map_err(|e| CoreError::KeyGenerationFailed(e.to_string()))?,
        );
        if !self.storage.store(IDENTITY_SLOT, &bytes) {
            return Err(CoreError::KeyGenerationFailed(
                "secure storage rejected key".into(),
            ));
        }

        let public = identity.public_identity();
        info!(fingerprint = %public.fingerprint_hex(), %kind, "identity generated");
        Ok(public)
    }

    /// Load the persisted identity.
    ///
    /// Always reads the slot, so a key generated or destroyed by another
    /// process is seen on the next call.
    pub fn load(&self) -> Result<Identity, CoreError> {
        let _guard = self.slot_lock.read().unwrap_or_else(PoisonError::into_inner);
        self.read_slot()
    }

    fn read_slot(&self) -> Result<Identity, CoreError> {
        let data = self
            .storage
            .load(IDENTITY_SLOT)
            .ok_or(CoreError::KeyDoesNotExist)?;
        let stored: StoredKey = serde_json::from_slice(data.as_bytes()).map_err(|e| {
            warn!(error = %e, "stored identity is unreadable");
            CoreError::KeyDoesNotExist
        })?;
        Identity::from_seed(stored.kind, &stored.seed).map_err(|e| {
            warn!(error = %e, "stored identity is invalid");
            CoreError::KeyDoesNotExist
        })
    }

    /// Irreversibly delete the identity. Returns whether a key was deleted.
    pub fn destroy(&self) -> bool {
        let _guard = self.slot_lock.write().unwrap_or_else(PoisonError::into_inner);
        let deleted = self.storage.delete(IDENTITY_SLOT);
        if deleted {
            info!("identity destroyed");
        }
        deleted
    }

    pub fn has_key(&self) -> bool {
        self.load().is_ok()
    }

    pub fn public_identity(&self) -> Result<PublicIdentity, CoreError> {
        Ok(self.load()?.public_identity())
    }

    /// Sign `data` with the current identity.
    ///
    /// Holds the read side for the whole operation so a concurrent
    /// `generate` or `destroy` cannot swap the key mid-signature.
    pub fn sign(&self, data: &[u8]) -> Result<(Vec<u8>, PublicIdentity), CoreError> {
        let _guard = self.slot_lock.read().unwrap_or_else(PoisonError::into_inner);
        let identity = self.read_slot()?;
        Ok((identity.sign(data).to_vec(), identity.public_identity()))
    }

    /// The local user's identity as published to peers.
    pub fn me(&self) -> Result<Peer, CoreError> {
        let public = self.public_identity()?;
        Ok(Peer {
            email: self.me_email(),
            fingerprint: public.fingerprint_hex(),
            public_key: public.wire_public_key,
        })
    }

    pub fn me_email(&self) -> Option<String> {
        self.storage.get(EMAIL_KEY)
    }

    /// Bind an email to the identity. Failures are logged only.
    pub fn set_me(&self, email: &str) {
        if !self.storage.set(EMAIL_KEY, email) {
            error!("failed to store identity email");
        }
    }

    pub fn clear_me(&self) {
        if !self.storage.remove(EMAIL_KEY) {
            error!("failed to clear identity email");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::MemorySecureStorage;
    use sgn_crypto::identity::verify_signature;

    fn manager() -> (KeyManager, Arc<MemorySecureStorage>) {
        let storage = Arc::new(MemorySecureStorage::new());
        (KeyManager::new(storage.clone()), storage)
    }

    #[test]
    fn test_generate_then_load_matches() {
        let (keys, _) = manager();
        let public = keys.generate(KeyKind::Ed25519).unwrap();
        let loaded = keys.load().unwrap();
        assert_eq!(loaded.public_identity(), public);
    }

    #[test]
    fn test_load_survives_new_manager() {
        let storage = Arc::new(MemorySecureStorage::new());
        let first = KeyManager::new(storage.clone());
        let public = first.generate(KeyKind::Ed25519).unwrap();

        let second = KeyManager::new(storage);
        assert_eq!(second.public_identity().unwrap(), public);
    }

    #[test]
    fn test_load_without_key() {
        let (keys, _) = manager();
        assert!(matches!(keys.load(), Err(CoreError::KeyDoesNotExist)));
        assert!(!keys.has_key());
    }

    #[test]
    fn test_has_key_false_for_corrupt_slot() {
        let (keys, storage) = manager();
        storage.store("me", b"not json");
        assert!(!keys.has_key());
    }

    #[test]
    fn test_generate_rsa_unsupported() {
        let (keys, _) = manager();
        assert!(matches!(
            keys.generate(KeyKind::Rsa),
            Err(CoreError::UnsupportedAlgorithm(KeyKind::Rsa))
        ));
        assert!(!keys.has_key());
    }

    #[test]
    fn test_generate_storage_failure() {
        let (keys, storage) = manager();
        storage.set_fail_writes(true);
        assert!(matches!(
            keys.generate(KeyKind::Ed25519),
            Err(CoreError::KeyGenerationFailed(_))
        ));
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let (keys, _) = manager();
        assert!(!keys.destroy());
        keys.generate(KeyKind::Ed25519).unwrap();
        assert!(keys.destroy());
        assert!(!keys.destroy());
        assert!(matches!(keys.sign(b"x"), Err(CoreError::KeyDoesNotExist)));
    }

    #[test]
    fn test_generate_replaces_prior_key() {
        let (keys, _) = manager();
        let a = keys.generate(KeyKind::Ed25519).unwrap();
        let b = keys.generate(KeyKind::Ed25519).unwrap();
        assert_ne!(a.fingerprint, b.fingerprint);
        assert_eq!(keys.public_identity().unwrap(), b);
    }

    #[test]
    fn test_other_manager_changes_are_seen() {
        let storage = Arc::new(MemorySecureStorage::new());
        let daemon = KeyManager::new(storage.clone());
        let cli = KeyManager::new(storage);

        daemon.generate(KeyKind::Ed25519).unwrap();
        let (_, before) = daemon.sign(b"x").unwrap();

        let replaced = cli.generate(KeyKind::Ed25519).unwrap();
        let (_, after) = daemon.sign(b"x").unwrap();
        assert_ne!(before, after);
        assert_eq!(after, replaced);

        assert!(cli.destroy());
        assert!(!daemon.has_key());
        assert!(matches!(daemon.sign(b"x"), Err(CoreError::KeyDoesNotExist)));
    }

    #[test]
    fn test_sign_verifies() {
        let (keys, _) = manager();
        keys.generate(KeyKind::Ed25519).unwrap();
        let (sig, public) = keys.sign(b"payload").unwrap();
        assert!(verify_signature(&public.wire_public_key, b"payload", &sig).is_ok());
    }

    #[test]
    fn test_email_independent_of_key() {
        let (keys, _) = manager();
        keys.generate(KeyKind::Ed25519).unwrap();
        keys.set_me("dev@example.com");

        let me = keys.me().unwrap();
        assert_eq!(me.email.as_deref(), Some("dev@example.com"));
        assert_eq!(me.fingerprint, keys.public_identity().unwrap().fingerprint_hex());

        keys.destroy();
        assert_eq!(keys.me_email().as_deref(), Some("dev@example.com"));
        assert!(matches!(keys.me(), Err(CoreError::KeyDoesNotExist)));

        keys.generate(KeyKind::Ed25519).unwrap();
        keys.clear_me();
        assert!(keys.me().unwrap().email.is_none());
        assert!(keys.has_key());
    }

    #[test]
    fn test_set_me_failure_is_swallowed() {
        let (keys, storage) = manager();
        storage.set_fail_writes(true);
        keys.set_me("dev@example.com");
        keys.clear_me();
        assert!(keys.me_email().is_none());
    }
}
