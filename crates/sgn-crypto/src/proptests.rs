#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde::{Deserialize, Serialize};

    use crate::hash::{fingerprint, sha256};
    use crate::identity::{verify_signature, Identity, KeyKind, PublicIdentity};
    use crate::sealed::{seal, unseal, SealError, SessionKey};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Payload {
        id: String,
        command: Option<String>,
        data: Vec<u8>,
        unix_seconds: u64,
    }

    fn payload() -> impl Strategy<Value = Payload> {
        (
            ".{0,32}",
            proptest::option::of(".{0,32}"),
            proptest::collection::vec(any::<u8>(), 0..256),
            any::<u64>(),
        )
            .prop_map(|(id, command, data, unix_seconds)| Payload {
                id,
                command,
                data,
                unix_seconds,
            })
    }

    proptest! {
        // unseal(seal(p, k), k) == p
        #[test]
        fn test_seal_round_trip(p in payload(), key in any::<[u8; 32]>()) {
            let key = SessionKey::from_bytes(key);
            let sealed = seal(&p, &key).unwrap();
            let opened: Payload = unseal(&sealed, &key).unwrap();
            prop_assert_eq!(opened, p);
        }

        // Sealing under k1 and unsealing under k2 never succeeds.
        #[test]
        fn test_cross_key_rejection(
            p in payload(),
            k1 in any::<[u8; 32]>(),
            k2 in any::<[u8; 32]>(),
        ) {
            prop_assume!(k1 != k2);
            let sealed = seal(&p, &SessionKey::from_bytes(k1)).unwrap();
            let result = unseal::<Payload>(&sealed, &SessionKey::from_bytes(k2));
            prop_assert!(matches!(result, Err(SealError::DecodingFailed)));
        }

        // Same seed, same public key bytes, same fingerprint.
        #[test]
        fn test_fingerprint_determinism(seed in any::<[u8; 32]>()) {
            let a = Identity::from_seed(KeyKind::Ed25519, &seed).unwrap();
            let b = Identity::from_seed(KeyKind::Ed25519, &seed).unwrap();
            prop_assert_eq!(a.wire_public_key(), b.wire_public_key());
            prop_assert_eq!(a.fingerprint(), b.fingerprint());
            prop_assert_eq!(a.fingerprint(), sha256(&a.wire_public_key()));

            let public = PublicIdentity::from_wire(&a.wire_public_key()).unwrap();
            prop_assert_eq!(public.fingerprint, fingerprint(&a.wire_public_key()));
        }

        #[test]
        fn test_identity_signature_round_trip(
            seed in any::<[u8; 32]>(),
            message in proptest::collection::vec(any::<u8>(), 0..512),
        ) {
            let identity = Identity::from_seed(KeyKind::Ed25519, &seed).unwrap();
            let sig = identity.sign(&message);
            prop_assert!(verify_signature(&identity.wire_public_key(), &message, &sig).is_ok());
        }
    }
}
