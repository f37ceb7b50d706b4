//! Append-only signature audit log.
//!
//! Every signature the agent produces gets a matching entry, written before
//! the signed response leaves the signer. Entries are never modified or
//! removed through this module.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::CoreError;

/// Audit record of one completed signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureLogEntry {
    pub session_id: String,
    /// Hex SHA-256 of the signed data.
    pub digest: String,
    /// Hex signature bytes.
    pub signature: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    pub date: DateTime<Utc>,
}

pub trait SignatureLog: Send + Sync {
    /// Durably record `entry`.
    fn append(&self, entry: &SignatureLogEntry) -> Result<(), CoreError>;

    /// Entries for `session_id`, oldest first.
    fn query(&self, session_id: &str) -> Result<Vec<SignatureLogEntry>, CoreError>;
}

/// In-memory log for testing.
#[derive(Debug, Default)]
pub struct MemorySignatureLog {
    entries: RwLock<Vec<SignatureLogEntry>>,
}

impl MemorySignatureLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SignatureLog for MemorySignatureLog {
    fn append(&self, entry: &SignatureLogEntry) -> Result<(), CoreError> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry.clone());
        Ok(())
    }

    fn query(&self, session_id: &str) -> Result<Vec<SignatureLogEntry>, CoreError> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entries
            .iter()
            .filter(|e| e.session_id == session_id)
            .cloned()
            .collect())
    }
}

/// JSON-lines log file. One entry per line, synced before `append` returns.
pub struct FileSignatureLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileSignatureLog {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for FileSignatureLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSignatureLog")
            .field("path", &self.path)
            .finish()
    }
}

impl SignatureLog for FileSignatureLog {
    fn append(&self, entry: &SignatureLogEntry) -> Result<(), CoreError> {
        let mut line = serde_json::to_string(entry)
            .map_err(|e| CoreError::AuditWriteFailed(e.to_string()))?;
        line.push('\n');

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| CoreError::AuditWriteFailed(e.to_string()))?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| CoreError::AuditWriteFailed(e.to_string()))?;
        file.write_all(line.as_bytes())
            .map_err(|e| CoreError::AuditWriteFailed(e.to_string()))?;
        file.sync_data()
            .map_err(|e| CoreError::AuditWriteFailed(e.to_string()))?;

        debug!(session_id = %entry.session_id, digest = %entry.digest, "signature logged");
        Ok(())
    }

    fn query(&self, session_id: &str) -> Result<Vec<SignatureLogEntry>, CoreError> {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CoreError::Storage(e.to_string())),
        };

        let mut out = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| CoreError::Storage(e.to_string()))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<SignatureLogEntry>(&line) {
                Ok(entry) if entry.session_id == session_id => out.push(entry),
                Ok(_) => {}
                Err(e) => warn!(line = idx + 1, error = %e, "skipping malformed audit line"),
            }
        }
        Ok(out)
    }
}
