//! Test harness for the authorization pipeline.
//!
//! Wires an [`Authorizer`] over in-memory stores, a manual clock and a
//! recording transport so tests can drive whole scenarios.

use std::sync::{Arc, RwLock};

use sgn_crypto::hash::sha256;
use sgn_crypto::{KeyKind, SessionKey};

use crate::audit::MemorySignatureLog;
use crate::authorizer::{Authorizer, DEFAULT_REQUEST_TIME_TOLERANCE};
use crate::clock::{Clock, ManualClock};
use crate::errors::CoreError;
use crate::executor::EffectExecutor;
use crate::keys::KeyManager;
use crate::keystore::MemorySecureStorage;
use crate::pending::MemoryPendingStore;
use crate::policy::PolicyEngine;
use crate::transport::{MemoryNotifier, MemoryTransport};
use crate::types::{Request, Session};

/// Fixed start time for fixtures.
pub const FIXTURE_NOW: u64 = 1_700_000_000;

pub struct Fixture {
    pub storage: Arc<MemorySecureStorage>,
    pub keys: Arc<KeyManager>,
    pub policy: Arc<RwLock<PolicyEngine>>,
    pub pending: Arc<MemoryPendingStore>,
    pub log: Arc<MemorySignatureLog>,
    pub clock: Arc<ManualClock>,
    pub transport: Arc<MemoryTransport>,
    pub notifier: Arc<MemoryNotifier>,
    pub authorizer: Authorizer,
    pub executor: EffectExecutor,
}

impl Fixture {
    /// Fixture with a freshly generated Ed25519 identity.
    pub fn new() -> Result<Self, CoreError> {
        let fixture = Self::without_key();
        fixture.keys.generate(KeyKind::Ed25519)?;
        Ok(fixture)
    }

    pub fn without_key() -> Self {
        let storage = Arc::new(MemorySecureStorage::new());
        let keys = Arc::new(KeyManager::new(storage.clone()));
        let policy = Arc::new(RwLock::new(PolicyEngine::new()));
        let pending = Arc::new(MemoryPendingStore::new());
        let log = Arc::new(MemorySignatureLog::new());
        let clock = Arc::new(ManualClock::new(FIXTURE_NOW));
        let transport = Arc::new(MemoryTransport::new());
        let notifier = Arc::new(MemoryNotifier::new());

        let authorizer = Authorizer::new(
            keys.clone(),
            policy.clone(),
            pending.clone(),
            log.clone(),
            clock.clone(),
            DEFAULT_REQUEST_TIME_TOLERANCE,
        );
        let executor = EffectExecutor::new(transport.clone(), notifier.clone());

        Self {
            storage,
            keys,
            policy,
            pending,
            log,
            clock,
            transport,
            notifier,
            authorizer,
            executor,
        }
    }

    /// Session whose key is derived from its id.
    pub fn session(&self, id: &str) -> Session {
        Session::new(id, format!("{} device", id), SessionKey::from_bytes(sha256(id.as_bytes())))
    }

    /// Request stamped with the fixture's current time.
    pub fn request(&self, id: &str) -> Request {
        Request {
            id: id.to_string(),
            unix_seconds: self.clock.now_unix(),
            command: Some(format!("git commit -m {}", id)),
            data: format!("payload for {}", id).into_bytes(),
        }
    }
}
