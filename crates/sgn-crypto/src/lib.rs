#![forbid(unsafe_code)]

//! Signet crypto primitives.
//!
//! - Device identity keypair with SSH wire-format public key and fingerprint
//! - Sealed envelopes for payloads exchanged with paired sessions
//! - Constant-time comparison helpers

pub mod hash;
pub mod identity;
pub mod sealed;
pub mod utils;

#[cfg(test)]
mod proptests;

pub use identity::{Identity, IdentityError, KeyKind, PublicIdentity};
pub use sealed::{SealError, SessionKey};
