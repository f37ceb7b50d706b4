//! Runs pipeline effects against a transport and a notifier.
//!
//! Sends are at-most-once: a failed send is logged and counted, never retried
//! and never put back into the pending store.

use std::sync::Arc;

use tracing::{debug, error};

use crate::authorizer::Effect;
use crate::transport::{Notifier, Transport};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionReport {
    pub delivered: usize,
    pub failed: usize,
    pub notified: usize,
}

pub struct EffectExecutor {
    transport: Arc<dyn Transport>,
    notifier: Arc<dyn Notifier>,
}

impl EffectExecutor {
    pub fn new(transport: Arc<dyn Transport>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            transport,
            notifier,
        }
    }

    pub async fn run(&self, effects: Vec<Effect>) -> ExecutionReport {
        let mut report = ExecutionReport::default();
        for effect in effects {
            match effect {
                Effect::Deliver {
                    session,
                    request_id,
                    sealed,
                    notify,
                } => match self.transport.send(&session, &request_id, &sealed).await {
                    Ok(()) => {
                        report.delivered += 1;
                        debug!(session_id = %session.id, request_id = %request_id, "response delivered");
                        if let Some(notification) = notify {
                            self.notifier.notify(&notification).await;
                            report.notified += 1;
                        }
                    }
                    Err(e) => {
                        report.failed += 1;
                        error!(
                            session_id = %session.id,
                            request_id = %request_id,
                            error = %e,
                            "failed to deliver response"
                        );
                    }
                },
                Effect::Notify(notification) => {
                    self.notifier.notify(&notification).await;
                    report.notified += 1;
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authorizer::Notification;
    use crate::transport::{MemoryNotifier, MemoryTransport};
    use crate::types::Session;
    use sgn_crypto::SessionKey;

    fn deliver(session_id: &str) -> Effect {
        Effect::Deliver {
            session: Session::new(session_id, "peer", SessionKey::from_bytes([1; 32])),
            request_id: "r".into(),
            sealed: vec![0xAA],
            notify: Some(Notification::Error {
                session_id: session_id.into(),
                session_name: "peer".into(),
                message: "request expired".into(),
            }),
        }
    }

    #[tokio::test]
    async fn test_notifies_only_after_successful_send() {
        let transport = Arc::new(MemoryTransport::new());
        let notifier = Arc::new(MemoryNotifier::new());
        transport.fail_for("down");
        let executor = EffectExecutor::new(transport.clone(), notifier.clone());

        let report = executor.run(vec![deliver("up"), deliver("down")]).await;
        assert_eq!(
            report,
            ExecutionReport {
                delivered: 1,
                failed: 1,
                notified: 1
            }
        );
        assert_eq!(transport.attempts(), 2);
        assert_eq!(notifier.notifications().len(), 1);
    }
}
