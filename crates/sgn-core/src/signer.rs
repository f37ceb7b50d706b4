//! Builds responses to requests, signing and auditing approved ones.

use std::sync::Arc;

use sgn_crypto::hash::digest_hex;
use tracing::{info, warn};

use crate::audit::{SignatureLog, SignatureLogEntry};
use crate::clock::to_datetime;
use crate::errors::CoreError;
use crate::keys::KeyManager;
use crate::types::{Request, Response, Session};

pub const REQUEST_EXPIRED: &str = "request expired";
pub const REJECTED: &str = "rejected";

pub struct ResponseSigner {
    keys: Arc<KeyManager>,
    log: Arc<dyn SignatureLog>,
    request_time_tolerance: u64,
}

impl ResponseSigner {
    pub fn new(
        keys: Arc<KeyManager>,
        log: Arc<dyn SignatureLog>,
        request_time_tolerance: u64,
    ) -> Self {
        Self {
            keys,
            log,
            request_time_tolerance,
        }
    }

    /// Response to `request` given the final decision.
    ///
    /// An approved signature is in the audit log before this returns. Stale
    /// requests are answered with an error and never signed.
    pub fn respond(
        &self,
        session: &Session,
        request: &Request,
        allowed: bool,
        now: u64,
    ) -> Result<Response, CoreError> {
        if !request.is_fresh(now, self.request_time_tolerance) {
            warn!(
                session_id = %session.id,
                request_id = %request.id,
                request_time = request.unix_seconds,
                now,
                "request outside time tolerance"
            );
            return Ok(Response::error(&request.id, REQUEST_EXPIRED));
        }

        if !allowed {
            return Ok(Response::error(&request.id, REJECTED));
        }

        let (signature, public) = self.keys.sign(&request.data)?;
        self.log.append(&SignatureLogEntry {
            session_id: session.id.clone(),
            digest: digest_hex(&request.data),
            signature: hex::encode(&signature),
            command: request.command.clone(),
            date: to_datetime(now),
        })?;

        info!(
            session_id = %session.id,
            request_id = %request.id,
            fingerprint = %public.fingerprint_hex(),
            "request signed"
        );
        Ok(Response::signed(
            &request.id,
            signature,
            public.fingerprint_hex(),
        ))
    }
}
