//! Error taxonomy for the membership protocol.
//!
//! Wire-layer failures never escape the service boundary except as retries
//! or detector verdicts; these are the errors the library itself surfaces.

use vigil_core::{Endpoint, JoinStatusCode};

use crate::settings::SettingsError;
use crate::view::ViewError;

/// Failures surfaced by the membership layer.
///
/// Configuration mismatches never appear here: stale and future messages
/// are dropped at receivers, and a joiner sees them as a retried phase 1.
#[derive(Debug, thiserror::Error)]
pub enum MembershipError {
    /// An RPC failed at the transport level (timeout, connection refused,
    /// no listener). Transient; retried up to the attempt bound.
    #[error("transport failure: {0}")]
    Transport(#[source] anyhow::Error),

    /// A reachable member refused the join. Fatal to the joiner.
    #[error("join rejected with status {0:?}")]
    JoinRejected(JoinStatusCode),

    /// All join attempts were exhausted without admission.
    #[error("join failed after {attempts} attempts")]
    JoinAttemptsExhausted { attempts: usize },

    /// A phase-2 join expired before any view commit admitted the joiner.
    #[error("join of {0} expired before a view commit")]
    JoinExpired(Endpoint),

    /// Internal state contradicted a protocol invariant. Indicates a logic
    /// bug, not a protocol error.
    #[error("membership invariant violated: {0}")]
    InvariantViolation(String),

    /// The operation raced with teardown.
    #[error("operation raced with shutdown")]
    Shutdown,

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    View(#[from] ViewError),
}
