//! Agent configuration.
//!
//! Configuration is TOML. Every section and field is optional; missing values
//! fall back to the defaults below.
//!
//! # Example TOML
//!
//! ```toml
//! [identity]
//! key_dir = ""  # Empty = <state_dir>/keys
//!
//! [policy]
//! request_time_tolerance_secs = 120
//! sweep_interval_secs = 5
//!
//! [storage]
//! state_dir = "/var/lib/signet"
//!
//! [transport]
//! mailbox_url = "https://relay.example.com"
//! outbox_dir = ""  # Used when no mailbox is configured
//!
//! [logging]
//! level = "info"
//! file = "/var/log/signet/agent.log"
//! json = false
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Directory holding the secure key slots.
    #[serde(default)]
    pub key_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Accepted skew between a request's timestamp and local time.
    #[serde(default = "default_tolerance")]
    pub request_time_tolerance_secs: u64,
    /// How often `run` re-evaluates pending authorizations.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_tolerance() -> u64 {
    sgn_core::authorizer::DEFAULT_REQUEST_TIME_TOLERANCE
}

fn default_sweep_interval() -> u64 {
    5
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            request_time_tolerance_secs: default_tolerance(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

fn default_state_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "signet")
        .map(|dirs| dirs.data_local_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".signet"))
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransportConfig {
    /// HTTP mailbox relay. Takes precedence over the outbox.
    #[serde(default)]
    pub mailbox_url: Option<String>,
    #[serde(default)]
    pub outbox_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Daily-rolled log file. Logs go to stderr when unset.
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
            json: false,
        }
    }
}

impl AgentConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AgentConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `SGN_*` overrides resolved through `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup("SGN_STATE_DIR") {
            self.storage.state_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("SGN_KEY_DIR") {
            self.identity.key_dir = Some(PathBuf::from(dir));
        }
        if let Some(url) = lookup("SGN_MAILBOX_URL") {
            self.transport.mailbox_url = Some(url);
        }
        if let Some(secs) = lookup("SGN_REQUEST_TIME_TOLERANCE").and_then(|v| v.parse().ok()) {
            self.policy.request_time_tolerance_secs = secs;
        }
        if let Some(secs) = lookup("SGN_SWEEP_INTERVAL").and_then(|v| v.parse().ok()) {
            self.policy.sweep_interval_secs = secs;
        }
        if let Some(level) = lookup("RUST_LOG") {
            self.logging.level = level;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.policy.request_time_tolerance_secs == 0 {
            return Err(ConfigError::ValidationError(
                "request_time_tolerance_secs must be at least 1".to_string(),
            ));
        }
        if self.policy.sweep_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "sweep_interval_secs must be at least 1".to_string(),
            ));
        }
        if let Some(url) = &self.transport.mailbox_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::ValidationError(format!(
                    "mailbox_url must be an http(s) URL: {}",
                    url
                )));
            }
        }
        Ok(())
    }

    pub fn key_dir(&self) -> PathBuf {
        self.identity
            .key_dir
            .clone()
            .unwrap_or_else(|| self.storage.state_dir.join("keys"))
    }

    pub fn policy_path(&self) -> PathBuf {
        self.storage.state_dir.join("policy.json")
    }

    pub fn pending_db_path(&self) -> PathBuf {
        self.storage.state_dir.join("pending.db")
    }

    pub fn audit_path(&self) -> PathBuf {
        self.storage.state_dir.join("signatures.jsonl")
    }

    pub fn outbox_dir(&self) -> PathBuf {
        self.transport
            .outbox_dir
            .clone()
            .unwrap_or_else(|| self.storage.state_dir.join("outbox"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.policy.request_time_tolerance_secs, 120);
        assert_eq!(config.policy.sweep_interval_secs, 5);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: AgentConfig = toml::from_str(
            r#"
            [storage]
            state_dir = "/tmp/signet"

            [policy]
            sweep_interval_secs = 30
            "#,
        )
        .unwrap();

        assert_eq!(config.policy.sweep_interval_secs, 30);
        assert_eq!(config.policy.request_time_tolerance_secs, 120);
        assert_eq!(config.key_dir(), PathBuf::from("/tmp/signet/keys"));
        assert_eq!(config.policy_path(), PathBuf::from("/tmp/signet/policy.json"));
        assert_eq!(config.outbox_dir(), PathBuf::from("/tmp/signet/outbox"));
    }

    #[test]
    fn test_validation_rejects_zero_values() {
        let mut config = AgentConfig::default();
        config.policy.request_time_tolerance_secs = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));

        let mut config = AgentConfig::default();
        config.policy.sweep_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_bad_mailbox_url() {
        let mut config = AgentConfig::default();
        config.transport.mailbox_url = Some("ftp://relay".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("SGN_STATE_DIR", "/srv/signet"),
            ("SGN_SWEEP_INTERVAL", "9"),
            ("SGN_REQUEST_TIME_TOLERANCE", "not-a-number"),
            ("RUST_LOG", "debug"),
        ]
        .into_iter()
        .collect();

        let mut config = AgentConfig::default();
        config.apply_overrides(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.storage.state_dir, PathBuf::from("/srv/signet"));
        assert_eq!(config.policy.sweep_interval_secs, 9);
        assert_eq!(config.policy.request_time_tolerance_secs, 120);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.toml");
        std::fs::write(&path, "[logging]\nlevel = \"warn\"\njson = true\n").unwrap();

        let config = AgentConfig::load_from_file(&path).unwrap();
        assert_eq!(config.logging.level, "warn");
        assert!(config.logging.json);

        assert!(matches!(
            AgentConfig::load_from_file(&dir.path().join("missing.toml")),
            Err(ConfigError::ReadError(_))
        ));
    }
}
