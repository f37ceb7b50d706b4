#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use sgn_core::policy::PolicyEngine;

    use crate::state::{load_policy, save_policy};

    #[derive(Debug, Clone)]
    enum Change {
        AllowFor(String, u64),
        Always(String),
        Block(String),
        Reset(String),
        Remember(String, String),
        Forget(String),
    }

    fn change() -> impl Strategy<Value = Change> {
        let id = "[a-c]{1,2}";
        prop_oneof![
            (id, 0u64..1_000_000).prop_map(|(s, t)| Change::AllowFor(s, t)),
            id.prop_map(Change::Always),
            id.prop_map(Change::Block),
            id.prop_map(Change::Reset),
            (id, "[a-z ]{1,12}").prop_map(|(s, c)| Change::Remember(s, c)),
            id.prop_map(Change::Forget),
        ]
    }

    proptest! {
        // Whatever sequence of edits was applied, the file reads back equal.
        #[test]
        fn test_policy_file_round_trip(changes in prop::collection::vec(change(), 0..20)) {
            let mut policy = PolicyEngine::new();
            for change in changes {
                match change {
                    Change::AllowFor(s, secs) => policy.allow_for(&s, 1_000, secs),
                    Change::Always(s) => policy.always_allow(&s),
                    Change::Block(s) => policy.block(&s),
                    Change::Reset(s) => policy.reset(&s),
                    Change::Remember(s, c) => policy.allow_command(&s, &c),
                    Change::Forget(s) => {
                        policy.forget_session(&s);
                    }
                }
            }

            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("policy.json");
            save_policy(&path, &policy).unwrap();
            prop_assert_eq!(load_policy(&path).unwrap(), policy);
        }
    }
}
