//! The authorization pipeline.
//!
//! `Authorizer` turns an inbound sealed request into a list of [`Effect`]s:
//! sealed responses to deliver and notifications to show. It never performs
//! I/O against the transport or the user itself; an
//! [`EffectExecutor`](crate::executor::EffectExecutor) runs the effects.
//!
//! Pending entries are claimed through [`PendingStore::take`], so when a
//! sweep and a user action race on the same request only one of them
//! responds.

use std::sync::{Arc, PoisonError, RwLock};

use sgn_crypto::sealed::{seal, unseal};
use tracing::{debug, error, info, warn};

use crate::audit::SignatureLog;
use crate::clock::Clock;
use crate::errors::CoreError;
use crate::keys::KeyManager;
use crate::pending::{cache_key, PendingAuthorization, PendingStore};
use crate::policy::{Decision, PolicyEngine};
use crate::signer::ResponseSigner;
use crate::types::{Request, Response, Session};

/// Default tolerance between a request's timestamp and local time.
pub const DEFAULT_REQUEST_TIME_TOLERANCE: u64 = 120;

/// Something to tell the local user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A request was signed and sent.
    Approved {
        session_id: String,
        session_name: String,
        request_id: String,
        command: Option<String>,
    },
    /// A response carried an error back to the peer.
    Error {
        session_id: String,
        session_name: String,
        message: String,
    },
    /// A request needs a decision from the user.
    AskUser { session: Session, request: Request },
}

/// A side effect produced by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Send `sealed` to the session's peer, then show `notify` if the send
    /// succeeded.
    Deliver {
        session: Session,
        request_id: String,
        sealed: Vec<u8>,
        notify: Option<Notification>,
    },
    Notify(Notification),
}

#[derive(Debug, Default)]
pub struct SweepReport {
    pub effects: Vec<Effect>,
    /// Entries claimed from the pending store by this sweep.
    pub processed: usize,
    /// Claimed entries that could not be answered.
    pub failed: usize,
    /// Expired entries dropped before the sweep ran.
    pub expired: usize,
}

pub struct Authorizer {
    keys: Arc<KeyManager>,
    signer: ResponseSigner,
    policy: Arc<RwLock<PolicyEngine>>,
    pending: Arc<dyn PendingStore>,
    clock: Arc<dyn Clock>,
    request_time_tolerance: u64,
}

impl Authorizer {
    pub fn new(
        keys: Arc<KeyManager>,
        policy: Arc<RwLock<PolicyEngine>>,
        pending: Arc<dyn PendingStore>,
        log: Arc<dyn SignatureLog>,
        clock: Arc<dyn Clock>,
        request_time_tolerance: u64,
    ) -> Self {
        Self {
            signer: ResponseSigner::new(keys.clone(), log, request_time_tolerance),
            keys,
            policy,
            pending,
            clock,
            request_time_tolerance,
        }
    }

    pub fn keys(&self) -> &Arc<KeyManager> {
        &self.keys
    }

    pub fn policy(&self) -> &Arc<RwLock<PolicyEngine>> {
        &self.policy
    }

    pub fn pending(&self) -> &Arc<dyn PendingStore> {
        &self.pending
    }

    /// Lifetime of a pending authorization.
    pub fn pending_ttl(&self) -> u64 {
        self.request_time_tolerance.saturating_mul(2)
    }

    fn decide(&self, session: &Session, request: &Request, now: u64) -> Result<Decision, CoreError> {
        self.policy
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .decide(session, request, now)
    }

    /// Unseal an inbound request and run it through the pipeline.
    ///
    /// Fails with `DecodingFailed` when the bytes were not sealed for this
    /// session, distinct from a policy refusal which yields a response.
    pub fn handle_sealed(&self, session: &Session, sealed: &[u8]) -> Result<Vec<Effect>, CoreError> {
        let request: Request = unseal(sealed, &session.key).map_err(|e| {
            warn!(session_id = %session.id, error = %e, "inbound request failed to unseal");
            CoreError::from(e)
        })?;
        self.handle_request(session, request)
    }

    pub fn handle_request(&self, session: &Session, request: Request) -> Result<Vec<Effect>, CoreError> {
        let now = self.clock.now_unix();

        // Stale requests are answered right away and never queued.
        if !request.is_fresh(now, self.request_time_tolerance) {
            let response = self.signer.respond(session, &request, false, now)?;
            return Ok(vec![self.deliver(session, &request, response, false)?]);
        }

        let decision = self.decide(session, &request, now)?;
        debug!(session_id = %session.id, request_id = %request.id, ?decision, "policy decision");

        match decision {
            Decision::Allowed => {
                let response = self.signer.respond(session, &request, true, now)?;
                Ok(vec![self.deliver(session, &request, response, true)?])
            }
            Decision::Denied => {
                let response = self.signer.respond(session, &request, false, now)?;
                Ok(vec![self.deliver(session, &request, response, false)?])
            }
            Decision::Ask => {
                self.pending.add(session, &request, now, self.pending_ttl())?;
                info!(session_id = %session.id, request_id = %request.id, "request awaiting user decision");
                Ok(vec![Effect::Notify(Notification::AskUser {
                    session: session.clone(),
                    request,
                })])
            }
        }
    }

    /// Answer one pending request with an explicit user decision.
    ///
    /// Returns `None` when the entry is gone: already answered, expired, or
    /// never queued.
    pub fn resolve(
        &self,
        session_id: &str,
        request_id: &str,
        allowed: bool,
    ) -> Result<Option<Effect>, CoreError> {
        let now = self.clock.now_unix();
        let key = cache_key(session_id, request_id);
        let Some(pending) = self.pending.take(&key)? else {
            return Ok(None);
        };
        if !pending.is_live(now) {
            debug!(session_id, request_id, "pending authorization expired before decision");
            return Ok(None);
        }
        self.answer(&pending, allowed, now).map(Some)
    }

    /// Re-evaluate every live pending entry and answer the ones policy now
    /// allows. Entries policy still asks about stay queued.
    pub fn allow_sweep(&self) -> SweepReport {
        self.sweep(true)
    }

    /// Refuse every live pending entry.
    pub fn reject_sweep(&self) -> SweepReport {
        self.sweep(false)
    }

    fn sweep(&self, allow: bool) -> SweepReport {
        let now = self.clock.now_unix();
        let mut report = SweepReport::default();

        match self.pending.purge_expired(now) {
            Ok(n) => report.expired = n,
            Err(e) => error!(error = %e, "failed to purge expired pending authorizations"),
        }

        let entries = match self.pending.live(now) {
            Ok(entries) => entries,
            Err(e) => {
                error!(error = %e, "failed to enumerate pending authorizations");
                return report;
            }
        };

        for entry in entries {
            if allow {
                match self.decide(&entry.session, &entry.request, now) {
                    Ok(Decision::Allowed) => {}
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(
                            session_id = %entry.session.id,
                            request_id = %entry.request.id,
                            error = %e,
                            "pending request cannot be evaluated"
                        );
                        continue;
                    }
                }
            }

            let claimed = match self.pending.take(&entry.cache_key()) {
                Ok(Some(claimed)) => claimed,
                // Someone else answered it first.
                Ok(None) => continue,
                Err(e) => {
                    error!(session_id = %entry.session.id, request_id = %entry.request.id, error = %e, "failed to claim pending authorization");
                    report.failed += 1;
                    continue;
                }
            };
            report.processed += 1;

            match self.answer(&claimed, allow, now) {
                Ok(effect) => report.effects.push(effect),
                Err(e) => {
                    error!(
                        session_id = %claimed.session.id,
                        request_id = %claimed.request.id,
                        error = %e,
                        "failed to answer pending authorization"
                    );
                    report.failed += 1;
                }
            }
        }

        info!(
            allow,
            processed = report.processed,
            failed = report.failed,
            expired = report.expired,
            "pending sweep finished"
        );
        report
    }

    fn answer(
        &self,
        pending: &PendingAuthorization,
        allowed: bool,
        now: u64,
    ) -> Result<Effect, CoreError> {
        let response = self
            .signer
            .respond(&pending.session, &pending.request, allowed, now)?;
        self.deliver(&pending.session, &pending.request, response, allowed)
    }

    fn deliver(
        &self,
        session: &Session,
        request: &Request,
        response: Response,
        allowed: bool,
    ) -> Result<Effect, CoreError> {
        let notify = if !allowed {
            None
        } else if let Some(message) = response.body.error.clone() {
            Some(Notification::Error {
                session_id: session.id.clone(),
                session_name: session.name.clone(),
                message,
            })
        } else {
            Some(Notification::Approved {
                session_id: session.id.clone(),
                session_name: session.name.clone(),
                request_id: request.id.clone(),
                command: request.command.clone(),
            })
        };

        let sealed = seal(&response, &session.key)?;
        Ok(Effect::Deliver {
            session: session.clone(),
            request_id: request.id.clone(),
            sealed,
            notify,
        })
    }
}
