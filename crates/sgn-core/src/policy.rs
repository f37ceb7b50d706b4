//! Policy engine deciding whether a request is signed, refused, or asked.
//!
//! Settings are per session. `decide` is a pure read of those settings and
//! the request; queueing an `Ask` is the caller's job.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::CoreError;
use crate::types::{Request, Session};

/// Standing approval for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode", content = "until")]
pub enum Approval {
    /// Ask the user for every request (default).
    #[default]
    Ask,
    /// Approve without asking until the given unix time.
    AllowUntil(u64),
    AlwaysAllow,
    /// Refuse everything.
    Block,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSettings {
    #[serde(default)]
    pub approval: Approval,
    /// Commands the user chose to remember as approved.
    #[serde(default)]
    pub allowed_commands: BTreeSet<String>,
}

impl SessionSettings {
    pub fn is_allowed(&self, request: &Request, now: u64) -> bool {
        match self.approval {
            Approval::AlwaysAllow => true,
            Approval::AllowUntil(until) if now < until => true,
            _ => request
                .command
                .as_ref()
                .is_some_and(|c| self.allowed_commands.contains(c)),
        }
    }
}

/// Outcome of a policy decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied,
    Ask,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyEngine {
    #[serde(default)]
    sessions: HashMap<String, SessionSettings>,
}

impl PolicyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings for a session; unknown sessions get the defaults.
    pub fn settings(&self, session_id: &str) -> SessionSettings {
        self.sessions.get(session_id).cloned().unwrap_or_default()
    }

    fn entry(&mut self, session_id: &str) -> &mut SessionSettings {
        self.sessions.entry(session_id.to_string()).or_default()
    }

    /// Approve without asking for `secs` seconds from `now`.
    pub fn allow_for(&mut self, session_id: &str, now: u64, secs: u64) {
        let until = now.saturating_add(secs);
        self.entry(session_id).approval = Approval::AllowUntil(until);
        info!(session_id, until, "session allowed temporarily");
    }

    pub fn always_allow(&mut self, session_id: &str) {
        self.entry(session_id).approval = Approval::AlwaysAllow;
        info!(session_id, "session always allowed");
    }

    pub fn block(&mut self, session_id: &str) {
        self.entry(session_id).approval = Approval::Block;
        warn!(session_id, "session blocked");
    }

    /// Back to asking for every request. Remembered commands are kept.
    pub fn reset(&mut self, session_id: &str) {
        self.entry(session_id).approval = Approval::Ask;
        info!(session_id, "session approval reset");
    }

    pub fn allow_command(&mut self, session_id: &str, command: &str) {
        self.entry(session_id)
            .allowed_commands
            .insert(command.to_string());
        info!(session_id, command, "command remembered");
    }

    pub fn forget_session(&mut self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    /// Decide what to do with `request` arriving on `session` at `now`.
    pub fn decide(
        &self,
        session: &Session,
        request: &Request,
        now: u64,
    ) -> Result<Decision, CoreError> {
        if request.id.is_empty() {
            return Err(CoreError::PolicyEvaluationError("empty request id".into()));
        }
        if request.data.is_empty() {
            return Err(CoreError::PolicyEvaluationError(
                "nothing to sign".into(),
            ));
        }

        let settings = self.settings(&session.id);
        if settings.approval == Approval::Block {
            return Ok(Decision::Denied);
        }
        if settings.is_allowed(request, now) {
            return Ok(Decision::Allowed);
        }
        Ok(Decision::Ask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sgn_crypto::SessionKey;

    fn session() -> Session {
        Session::new("s1", "laptop", SessionKey::from_bytes([1; 32]))
    }

    fn request(command: Option<&str>) -> Request {
        Request {
            id: "r1".into(),
            unix_seconds: 1_000,
            command: command.map(String::from),
            data: b"data".to_vec(),
        }
    }

    #[test]
    fn test_default_asks() {
        let policy = PolicyEngine::new();
        assert_eq!(
            policy.decide(&session(), &request(None), 1_000).unwrap(),
            Decision::Ask
        );
    }

    #[test]
    fn test_block_denies_even_remembered_commands() {
        let mut policy = PolicyEngine::new();
        policy.allow_command("s1", "git push");
        policy.block("s1");
        assert_eq!(
            policy
                .decide(&session(), &request(Some("git push")), 1_000)
                .unwrap(),
            Decision::Denied
        );
    }

    #[test]
    fn test_allow_until_expires() {
        let mut policy = PolicyEngine::new();
        policy.allow_for("s1", 1_000, 60);
        assert_eq!(
            policy.decide(&session(), &request(None), 1_059).unwrap(),
            Decision::Allowed
        );
        assert_eq!(
            policy.decide(&session(), &request(None), 1_060).unwrap(),
            Decision::Ask
        );
    }

    #[test]
    fn test_always_allow_and_reset() {
        let mut policy = PolicyEngine::new();
        policy.always_allow("s1");
        assert_eq!(
            policy.decide(&session(), &request(None), 0).unwrap(),
            Decision::Allowed
        );
        policy.reset("s1");
        assert_eq!(
            policy.decide(&session(), &request(None), 0).unwrap(),
            Decision::Ask
        );
    }

    #[test]
    fn test_remembered_command() {
        let mut policy = PolicyEngine::new();
        policy.allow_command("s1", "ssh host");
        assert_eq!(
            policy
                .decide(&session(), &request(Some("ssh host")), 0)
                .unwrap(),
            Decision::Allowed
        );
        assert_eq!(
            policy
                .decide(&session(), &request(Some("ssh other")), 0)
                .unwrap(),
            Decision::Ask
        );
    }

    #[test]
    fn test_malformed_request() {
        let policy = PolicyEngine::new();
        let mut req = request(None);
        req.data.clear();
        assert!(matches!(
            policy.decide(&session(), &req, 0),
            Err(CoreError::PolicyEvaluationError(_))
        ));

        let mut req = request(None);
        req.id.clear();
        assert!(matches!(
            policy.decide(&session(), &req, 0),
            Err(CoreError::PolicyEvaluationError(_))
        ));
    }

    #[test]
    fn test_settings_are_per_session() {
        let mut policy = PolicyEngine::new();
        policy.always_allow("other");
        assert_eq!(
            policy.decide(&session(), &request(None), 0).unwrap(),
            Decision::Ask
        );
        assert!(policy.forget_session("other"));
        assert!(!policy.forget_session("other"));
    }

    #[test]
    fn test_policy_serde_round_trip() {
        let mut policy = PolicyEngine::new();
        policy.allow_for("s1", 100, 50);
        policy.allow_command("s2", "git tag");
        policy.block("s3");

        let json = serde_json::to_string(&policy).unwrap();
        let back: PolicyEngine = serde_json::from_str(&json).unwrap();
        assert_eq!(back, policy);
        assert_eq!(back.settings("s1").approval, Approval::AllowUntil(150));
    }
}
