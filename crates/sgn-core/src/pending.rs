//! Pending authorizations: requests waiting on a human decision.
//!
//! Entries are keyed by a digest of (session id, request id) and expire after
//! a fixed TTL. `take` is the single atomic check-and-delete; only the caller
//! that gets `Some` back may respond to that request.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use sgn_crypto::hash::sha256;
use tracing::debug;

use crate::errors::CoreError;
use crate::types::{Request, Session};

/// Deterministic key for a (session, request) pair.
pub fn cache_key(session_id: &str, request_id: &str) -> String {
    let mut buf = Vec::with_capacity(session_id.len() + request_id.len() + 1);
    buf.extend_from_slice(session_id.as_bytes());
    buf.push(0);
    buf.extend_from_slice(request_id.as_bytes());
    hex::encode(sha256(&buf))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAuthorization {
    pub session: Session,
    pub request: Request,
    /// Unix seconds at which the entry stops being live.
    pub expires_at: u64,
}

impl PendingAuthorization {
    pub fn cache_key(&self) -> String {
        cache_key(&self.session.id, &self.request.id)
    }

    pub fn is_live(&self, now: u64) -> bool {
        now < self.expires_at
    }
}

pub trait PendingStore: Send + Sync {
    /// Insert or replace the entry for (session, request). A replaced entry
    /// takes the new expiry and moves to the newest position.
    fn add(&self, session: &Session, request: &Request, now: u64, ttl: u64)
        -> Result<(), CoreError>;

    /// Delete by key. Absence is not an error.
    fn remove(&self, session_id: &str, request_id: &str) -> Result<bool, CoreError>;

    /// Atomically remove and return the entry, if still present.
    fn take(&self, key: &str) -> Result<Option<PendingAuthorization>, CoreError>;

    fn purge_expired(&self, now: u64) -> Result<usize, CoreError>;

    /// Live entries, oldest first.
    fn live(&self, now: u64) -> Result<Vec<PendingAuthorization>, CoreError>;

    /// Newest live entry after purging expired ones.
    fn last(&self, now: u64) -> Result<Option<PendingAuthorization>, CoreError> {
        self.purge_expired(now)?;
        Ok(self.live(now)?.pop())
    }
}

// ============================================================================
// In-memory store
// ============================================================================

struct Slot {
    pending: PendingAuthorization,
    seq: u64,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Slot>,
    next_seq: u64,
}

#[derive(Default)]
pub struct MemoryPendingStore {
    inner: Mutex<Inner>,
}

impl MemoryPendingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PendingStore for MemoryPendingStore {
    fn add(
        &self,
        session: &Session,
        request: &Request,
        now: u64,
        ttl: u64,
    ) -> Result<(), CoreError> {
        let pending = PendingAuthorization {
            session: session.clone(),
            request: request.clone(),
            expires_at: now.saturating_add(ttl),
        };
        let key = pending.cache_key();

        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.next_seq += 1;
        let seq = inner.next_seq;
        inner.entries.insert(key, Slot { pending, seq });
        debug!(session_id = %session.id, request_id = %request.id, "pending authorization stored");
        Ok(())
    }

    fn remove(&self, session_id: &str, request_id: &str) -> Result<bool, CoreError> {
        let key = cache_key(session_id, request_id);
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(inner.entries.remove(&key).is_some())
    }

    fn take(&self, key: &str) -> Result<Option<PendingAuthorization>, CoreError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(inner.entries.remove(key).map(|slot| slot.pending))
    }

    fn purge_expired(&self, now: u64) -> Result<usize, CoreError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let before = inner.entries.len();
        inner.entries.retain(|_, slot| slot.pending.is_live(now));
        let purged = before - inner.entries.len();
        if purged > 0 {
            debug!(purged, "expired pending authorizations dropped");
        }
        Ok(purged)
    }

    fn live(&self, now: u64) -> Result<Vec<PendingAuthorization>, CoreError> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let mut slots: Vec<&Slot> = inner
            .entries
            .values()
            .filter(|slot| slot.pending.is_live(now))
            .collect();
        slots.sort_by_key(|slot| slot.seq);
        Ok(slots.into_iter().map(|slot| slot.pending.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sgn_crypto::SessionKey;

    fn session(id: &str) -> Session {
        Session::new(id, "peer", SessionKey::from_bytes([7; 32]))
    }

    fn request(id: &str) -> Request {
        Request {
            id: id.into(),
            unix_seconds: 0,
            command: None,
            data: vec![1, 2, 3],
        }
    }

    #[test]
    fn test_cache_key_separates_fields() {
        assert_ne!(cache_key("ab", "c"), cache_key("a", "bc"));
        assert_eq!(cache_key("s", "r"), cache_key("s", "r"));
        assert_eq!(cache_key("s", "r").len(), 64);
    }

    #[test]
    fn test_last_returns_newest() {
        let store = MemoryPendingStore::new();
        store.add(&session("s"), &request("r1"), 0, 10).unwrap();
        store.add(&session("s"), &request("r2"), 0, 10).unwrap();
        assert_eq!(store.last(1).unwrap().unwrap().request.id, "r2");
    }

    #[test]
    fn test_upsert_moves_to_newest_and_refreshes_expiry() {
        let store = MemoryPendingStore::new();
        store.add(&session("s"), &request("r1"), 0, 10).unwrap();
        store.add(&session("s"), &request("r2"), 0, 10).unwrap();
        store.add(&session("s"), &request("r1"), 5, 10).unwrap();

        assert_eq!(store.len(), 2);
        let last = store.last(6).unwrap().unwrap();
        assert_eq!(last.request.id, "r1");
        assert_eq!(last.expires_at, 15);

        // r2 expired at 10, r1 still live.
        let live = store.live(12).unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].request.id, "r1");
    }

    #[test]
    fn test_expiry_hides_entry() {
        let store = MemoryPendingStore::new();
        store.add(&session("s"), &request("r"), 100, 10).unwrap();
        assert!(store.last(100).unwrap().is_some());
        assert!(store.last(111).unwrap().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_take_is_once() {
        let store = MemoryPendingStore::new();
        store.add(&session("s"), &request("r"), 0, 10).unwrap();
        let key = cache_key("s", "r");
        assert!(store.take(&key).unwrap().is_some());
        assert!(store.take(&key).unwrap().is_none());
    }

    #[test]
    fn test_remove_absent_is_ok() {
        let store = MemoryPendingStore::new();
        assert!(!store.remove("s", "r").unwrap());
        store.add(&session("s"), &request("r"), 0, 10).unwrap();
        assert!(store.remove("s", "r").unwrap());
    }
}
