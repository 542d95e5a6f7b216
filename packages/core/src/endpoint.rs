//! Network endpoints and stable node identifiers.
//!
//! An [`Endpoint`] names a network-reachable process as a (host, port)
//! pair; a [`NodeId`] is the 128-bit identifier a node assigns to itself
//! when joining. Both are wire types and derive the ordering used for
//! deterministic ring tie-breaks.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Endpoint
// ---------------------------------------------------------------------------

/// A network-reachable address: host plus port.
///
/// The derived `Ord` (host, then port) is part of the protocol: ring order
/// breaks hash ties by comparing endpoints, so every node must agree on it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Creates an endpoint from a host and port.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Renders the canonical `host:port` form used as ring-hash input.
    #[must_use]
    pub fn canonical(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Error parsing an `Endpoint` from its `host:port` form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EndpointParseError {
    #[error("endpoint `{0}` is missing a `:port` suffix")]
    MissingPort(String),
    #[error("endpoint `{input}` has an invalid port: {reason}")]
    InvalidPort { input: String, reason: String },
    #[error("endpoint `{0}` has an empty host")]
    EmptyHost(String),
}

impl FromStr for Endpoint {
    type Err = EndpointParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Split on the last ':' so IPv6-style hosts with embedded colons parse.
        let Some(idx) = s.rfind(':') else {
            return Err(EndpointParseError::MissingPort(s.to_string()));
        };
        let (host, port_str) = (&s[..idx], &s[idx + 1..]);
        if host.is_empty() {
            return Err(EndpointParseError::EmptyHost(s.to_string()));
        }
        let port = port_str
            .parse::<u16>()
            .map_err(|e| EndpointParseError::InvalidPort {
                input: s.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self::new(host, port))
    }
}

// ---------------------------------------------------------------------------
// NodeId
// ---------------------------------------------------------------------------

/// Opaque 128-bit identifier a joining node assigns to itself.
///
/// Uniqueness within a configuration is an invariant enforced at join
/// admission; identifiers, once admitted, are remembered for the lifetime
/// of the process to reject replays.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(Uuid);

impl NodeId {
    /// Generates a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Builds an identifier from a raw 128-bit value. Intended for tests
    /// and deterministic tooling.
    #[must_use]
    pub const fn from_u128(raw: u128) -> Self {
        Self(Uuid::from_u128(raw))
    }

    /// Returns the identifier's 16 raw bytes (big-endian).
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
