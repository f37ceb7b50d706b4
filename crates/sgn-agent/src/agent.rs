//! The agent: file-backed stores wired into the authorization pipeline.

use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use anyhow::Context;
use sgn_core::audit::FileSignatureLog;
use sgn_core::clock::{Clock, SystemClock};
use sgn_core::executor::{EffectExecutor, ExecutionReport};
use sgn_core::http_mailbox::HttpMailboxTransport;
use sgn_core::keys::KeyManager;
use sgn_core::keystore::FileSecureStorage;
use sgn_core::pending::PendingAuthorization;
use sgn_core::policy::PolicyEngine;
use sgn_core::sqlite_store::SqlitePendingStore;
use sgn_core::transport::{LogNotifier, Notifier, OutboxTransport, Transport};
use sgn_core::{Authorizer, Session};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::AgentConfig;
use crate::state;

/// Counters from one sweep and the delivery of its answers.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepOutcome {
    pub processed: usize,
    pub failed: usize,
    pub expired: usize,
    pub execution: ExecutionReport,
}

pub struct Agent {
    config: AgentConfig,
    authorizer: Arc<Authorizer>,
    executor: EffectExecutor,
    audit: Arc<FileSignatureLog>,
    clock: Arc<dyn Clock>,
}

impl Agent {
    /// Open the agent's stores under the configured state directory.
    pub fn open(config: AgentConfig) -> anyhow::Result<Self> {
        let transport: Arc<dyn Transport> = match &config.transport.mailbox_url {
            Some(url) => Arc::new(HttpMailboxTransport::new(url.clone())?),
            None => Arc::new(OutboxTransport::new(config.outbox_dir())),
        };
        Self::open_with(config, transport, Arc::new(LogNotifier), Arc::new(SystemClock))
    }

    pub fn open_with(
        config: AgentConfig,
        transport: Arc<dyn Transport>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let state_dir = &config.storage.state_dir;
        std::fs::create_dir_all(state_dir)
            .with_context(|| format!("failed to create state directory {}", state_dir.display()))?;

        let key_dir = config.key_dir();
        let storage = FileSecureStorage::new(&key_dir)
            .with_context(|| format!("failed to open key directory {}", key_dir.display()))?;
        let keys = Arc::new(KeyManager::new(Arc::new(storage)));
        let policy = Arc::new(RwLock::new(state::load_policy(&config.policy_path())?));
        let pending = Arc::new(SqlitePendingStore::new(config.pending_db_path())?);
        let audit = Arc::new(FileSignatureLog::new(config.audit_path()));

        let authorizer = Arc::new(Authorizer::new(
            keys,
            policy,
            pending,
            audit.clone(),
            clock.clone(),
            config.policy.request_time_tolerance_secs,
        ));
        debug!(state_dir = %state_dir.display(), "agent opened");

        Ok(Self {
            config,
            authorizer,
            executor: EffectExecutor::new(transport, notifier),
            audit,
            clock,
        })
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn keys(&self) -> &Arc<KeyManager> {
        self.authorizer.keys()
    }

    pub fn authorizer(&self) -> &Arc<Authorizer> {
        &self.authorizer
    }

    pub fn audit(&self) -> &FileSignatureLog {
        &self.audit
    }

    pub fn now(&self) -> u64 {
        self.clock.now_unix()
    }

    /// Most recent request still waiting for a decision.
    pub fn pending_last(&self) -> anyhow::Result<Option<PendingAuthorization>> {
        Ok(self.authorizer.pending().last(self.now())?)
    }

    pub fn pending_live(&self) -> anyhow::Result<Vec<PendingAuthorization>> {
        Ok(self.authorizer.pending().live(self.now())?)
    }

    /// Apply a change to the latest persisted policy settings and save the
    /// result.
    pub fn update_policy(&self, change: impl FnOnce(&mut PolicyEngine)) -> anyhow::Result<()> {
        let mut policy = self
            .authorizer
            .policy()
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *policy = state::load_policy(&self.config.policy_path())?;
        change(&mut policy);
        state::save_policy(&self.config.policy_path(), &policy)
    }

    /// Pick up policy changes written by another process.
    pub fn reload_policy(&self) -> anyhow::Result<()> {
        let fresh = state::load_policy(&self.config.policy_path())?;
        *self
            .authorizer
            .policy()
            .write()
            .unwrap_or_else(PoisonError::into_inner) = fresh;
        Ok(())
    }

    /// Run one sealed inbound request through the pipeline and execute the
    /// resulting effects.
    pub async fn handle(&self, session: Session, sealed: Vec<u8>) -> anyhow::Result<ExecutionReport> {
        let authorizer = self.authorizer.clone();
        let effects =
            tokio::task::spawn_blocking(move || authorizer.handle_sealed(&session, &sealed))
                .await??;
        Ok(self.executor.run(effects).await)
    }

    /// Answer one pending request with the user's decision. `None` when the
    /// request is no longer pending.
    pub async fn resolve(
        &self,
        session_id: &str,
        request_id: &str,
        allowed: bool,
    ) -> anyhow::Result<Option<ExecutionReport>> {
        let authorizer = self.authorizer.clone();
        let (sid, rid) = (session_id.to_string(), request_id.to_string());
        let effect =
            tokio::task::spawn_blocking(move || authorizer.resolve(&sid, &rid, allowed)).await??;
        match effect {
            Some(effect) => Ok(Some(self.executor.run(vec![effect]).await)),
            None => Ok(None),
        }
    }

    /// Run an allow-sweep (`allow = true`) or a reject-sweep.
    pub async fn sweep(&self, allow: bool) -> anyhow::Result<SweepOutcome> {
        let authorizer = self.authorizer.clone();
        let report = tokio::task::spawn_blocking(move || {
            if allow {
                authorizer.allow_sweep()
            } else {
                authorizer.reject_sweep()
            }
        })
        .await?;

        let execution = self.executor.run(report.effects).await;
        Ok(SweepOutcome {
            processed: report.processed,
            failed: report.failed,
            expired: report.expired,
            execution,
        })
    }

    /// Periodically reload policy and allow-sweep until `shutdown` resolves.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
        let period = Duration::from_secs(self.config.policy.sweep_interval_secs);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(interval_secs = period.as_secs(), "sweep loop started");
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.reload_policy() {
                        warn!(error = %e, "keeping previous policy");
                    }
                    let outcome = self.sweep(true).await?;
                    if outcome.processed > 0 || outcome.expired > 0 {
                        info!(
                            processed = outcome.processed,
                            delivered = outcome.execution.delivered,
                            failed = outcome.failed + outcome.execution.failed,
                            expired = outcome.expired,
                            "sweep answered pending requests"
                        );
                    }
                }
            }
        }
        info!("sweep loop stopped");
        Ok(())
    }
}
