//! Outbound seams: delivering sealed responses and notifying the user.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use base64::Engine;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::authorizer::Notification;
use crate::errors::CoreError;
use crate::types::Session;

/// Delivers sealed bytes to a session's peer.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, session: &Session, request_id: &str, sealed: &[u8])
        -> Result<(), CoreError>;
}

/// Best-effort user notification.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification);
}

// ============================================================================
// Transports
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub session_id: String,
    pub request_id: String,
    pub sealed: Vec<u8>,
}

/// Records sends in memory. Sessions marked with `fail_for` reject sends.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    sent: Mutex<Vec<SentMessage>>,
    failing: Mutex<HashSet<String>>,
    attempts: Mutex<usize>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for(&self, session_id: &str) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_id.to_string());
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Sends attempted, including failed ones.
    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(
        &self,
        session: &Session,
        request_id: &str,
        sealed: &[u8],
    ) -> Result<(), CoreError> {
        *self.attempts.lock().unwrap_or_else(PoisonError::into_inner) += 1;

        let failing = self
            .failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&session.id);
        if failing {
            return Err(CoreError::TransportSendFailed(format!(
                "peer {} unreachable",
                session.id
            )));
        }

        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SentMessage {
                session_id: session.id.clone(),
                request_id: request_id.to_string(),
                sealed: sealed.to_vec(),
            });
        Ok(())
    }
}

/// Writes each response as base64 to `<dir>/<session>/<request>.sealed` for
/// an external relay to pick up.
#[derive(Debug, Clone)]
pub struct OutboxTransport {
    dir: PathBuf,
}

impl OutboxTransport {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, session_id: &str, request_id: &str) -> PathBuf {
        self.dir
            .join(path_component(session_id))
            .join(format!("{}.sealed", path_component(request_id)))
    }
}

fn path_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "_".to_string()
    } else {
        cleaned
    }
}

#[async_trait]
impl Transport for OutboxTransport {
    async fn send(
        &self,
        session: &Session,
        request_id: &str,
        sealed: &[u8],
    ) -> Result<(), CoreError> {
        let path = self.path_for(&session.id, request_id);
        let send_err = |e: std::io::Error| CoreError::TransportSendFailed(e.to_string());

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(send_err)?;
        }
        let mut file = tokio::fs::File::create(&path).await.map_err(send_err)?;
        let body = base64::engine::general_purpose::STANDARD.encode(sealed);
        file.write_all(body.as_bytes()).await.map_err(send_err)?;
        file.write_all(b"\n").await.map_err(send_err)?;
        file.flush().await.map_err(send_err)?;

        debug!(session_id = %session.id, request_id, path = %path.display(), "response written to outbox");
        Ok(())
    }
}

// ============================================================================
// Notifiers
// ============================================================================

/// Notifies through the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) {
        match notification {
            Notification::Approved {
                session_name,
                request_id,
                command,
                ..
            } => info!(
                session = %session_name,
                request_id = %request_id,
                command = command.as_deref().unwrap_or("-"),
                "request approved"
            ),
            Notification::Error {
                session_name,
                message,
                ..
            } => warn!(session = %session_name, message = %message, "request failed"),
            Notification::AskUser { session, request } => info!(
                session = %session.name,
                request_id = %request.id,
                command = request.command.as_deref().unwrap_or("-"),
                "approval needed"
            ),
        }
    }
}

/// Collects notifications for tests.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    seen: Mutex<Vec<Notification>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn notify(&self, notification: &Notification) {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notification.clone());
    }
}
