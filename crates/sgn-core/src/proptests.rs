#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use sgn_crypto::SessionKey;

    use crate::pending::{cache_key, MemoryPendingStore, PendingStore};
    use crate::types::{Request, Session};

    fn session(id: &str) -> Session {
        Session::new(id, "peer", SessionKey::from_bytes([9; 32]))
    }

    fn request(id: &str) -> Request {
        Request {
            id: id.to_string(),
            unix_seconds: 0,
            command: None,
            data: vec![1],
        }
    }

    proptest! {
        // Adding the same pair twice leaves one entry with the later expiry.
        #[test]
        fn test_pending_idempotence(
            sid in "[a-z0-9]{1,12}",
            rid in "[a-z0-9]{1,12}",
            t1 in 0u64..1_000_000,
            dt in 0u64..1_000,
            ttl in 1u64..10_000,
        ) {
            let store = MemoryPendingStore::new();
            store.add(&session(&sid), &request(&rid), t1, ttl).unwrap();
            store.add(&session(&sid), &request(&rid), t1 + dt, ttl).unwrap();

            let live = store.live(t1 + dt).unwrap();
            prop_assert_eq!(live.len(), 1);
            prop_assert_eq!(live[0].expires_at, t1 + dt + ttl);
        }

        // An entry added at t with TTL T is gone from `last` and `live` once now > t + T.
        #[test]
        fn test_pending_expiry(
            t in 0u64..1_000_000,
            ttl in 0u64..10_000,
            later in 1u64..10_000,
        ) {
            let store = MemoryPendingStore::new();
            store.add(&session("s"), &request("r"), t, ttl).unwrap();

            let now = t + ttl + later;
            prop_assert!(store.live(now).unwrap().is_empty());
            prop_assert!(store.last(now).unwrap().is_none());
        }

        #[test]
        fn test_cache_key_injective_on_split(
            a in "[a-z]{0,8}",
            b in "[a-z]{0,8}",
            c in "[a-z]{0,8}",
        ) {
            // Moving characters between the two ids changes the key.
            let left = format!("{}{}", a, b);
            prop_assume!(!b.is_empty());
            prop_assert_ne!(cache_key(&left, &c), cache_key(&a, &format!("{}{}", b, c)));
        }
    }
}
