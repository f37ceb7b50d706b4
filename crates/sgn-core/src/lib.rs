//! Signet Core - the policy-gated authorization pipeline.
//!
//! This crate implements:
//! - Identity key lifecycle over a pluggable secure storage
//! - Request/response model and the response signer
//! - Policy engine deciding allow / deny / ask per session
//! - Pending authorization store with expiry and atomic claim
//! - Append-only signature audit log
//! - Effect execution against transport and notifier seams

#![forbid(unsafe_code)]

// Decision pipeline
pub mod authorizer;
pub mod policy;
pub mod signer;

// Infrastructure
pub mod audit;
pub mod clock;
pub mod executor;
pub mod keys;
pub mod keystore;
pub mod pending;
pub mod transport;

// Supporting modules
pub mod errors;
pub mod harness;
pub mod types;

#[cfg(test)]
mod proptests;

// Optional transport implementations
#[cfg(feature = "http-mailbox")]
pub mod http_mailbox;

// Optional storage implementations
#[cfg(feature = "sqlite")]
pub mod sqlite_store;

pub use authorizer::{Authorizer, Effect, Notification, SweepReport};
pub use errors::CoreError;
pub use types::{Peer, Request, Response, ResponseBody, Session};
