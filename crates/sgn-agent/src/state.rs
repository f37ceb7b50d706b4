//! On-disk agent state: policy settings and session descriptors.

use std::io::Write;
use std::path::Path;

use anyhow::Context;
use sgn_core::policy::PolicyEngine;
use sgn_core::Session;
use tracing::debug;

/// Load persisted policy settings; a missing file means no settings yet.
pub fn load_policy(path: &Path) -> anyhow::Result<PolicyEngine> {
    match std::fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .with_context(|| format!("malformed policy file {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PolicyEngine::new()),
        Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
    }
}

/// Replace the policy file atomically.
pub fn save_policy(path: &Path, policy: &PolicyEngine) -> anyhow::Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = std::fs::File::create(&tmp)
            .with_context(|| format!("failed to create {}", tmp.display()))?;
        serde_json::to_writer_pretty(&mut file, policy)?;
        file.write_all(b"\n")?;
        file.sync_data()?;
    }
    std::fs::rename(&tmp, path)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    debug!(path = %path.display(), "policy saved");
    Ok(())
}

/// Read a session descriptor: `{"id": .., "name": .., "key": "<base64>"}`.
pub fn load_session(path: &Path) -> anyhow::Result<Session> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("malformed session file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sgn_core::policy::Approval;
    use sgn_crypto::SessionKey;

    #[test]
    fn test_missing_policy_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let policy = load_policy(&dir.path().join("policy.json")).unwrap();
        assert_eq!(policy.settings("anyone").approval, Approval::Ask);
    }

    #[test]
    fn test_policy_survives_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/policy.json");

        let mut policy = PolicyEngine::new();
        policy.always_allow("laptop");
        policy.block("stranger");
        policy.allow_command("ci", "git push");
        save_policy(&path, &policy).unwrap();

        let loaded = load_policy(&path).unwrap();
        assert_eq!(loaded.settings("laptop").approval, Approval::AlwaysAllow);
        assert_eq!(loaded.settings("stranger").approval, Approval::Block);
        assert!(loaded.settings("ci").allowed_commands.contains("git push"));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_corrupt_policy_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.json");
        std::fs::write(&path, b"{not json").unwrap();
        assert!(load_policy(&path).is_err());
    }

    #[test]
    fn test_load_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let session = Session::new("s1", "work laptop", SessionKey::from_bytes([5; 32]));
        std::fs::write(&path, serde_json::to_vec(&session).unwrap()).unwrap();

        let loaded = load_session(&path).unwrap();
        assert_eq!(loaded, session);
    }
}
