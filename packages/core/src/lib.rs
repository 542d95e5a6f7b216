//! Vigil Core -- endpoints, node identity, configuration hashing, and wire messages.
//!
//! This crate provides the schema layer shared by every node of a vigil
//! cluster:
//!
//! - **Endpoint / `NodeId`** ([`endpoint`]): network addresses and stable
//!   128-bit node identifiers
//! - **Hash** ([`hash`]): FNV-1a utilities and the compiled-in ring seeds
//! - **Configuration** ([`config`]): content-derived configuration ids and
//!   the append-only configuration history with remote comparison
//! - **Messages** ([`messages`]): `MsgPack` wire messages for the join,
//!   link-update, and probe exchanges

pub mod config;
pub mod endpoint;
pub mod hash;
pub mod messages;

// Endpoint
pub use endpoint::{Endpoint, EndpointParseError, NodeId};

// Hash
pub use hash::{fnv1a_64, fnv1a_64_seeded, ring_hash, RING_SEEDS};

// Configuration
pub use config::{ConfigComparison, ConfigurationEntry, ConfigurationId, ConfigurationLog};

// Messages
pub use messages::{
    decode, decode_response, encode, encode_response, JoinPayload, JoinResponsePayload,
    JoinStatusCode, LinkStatus, LinkUpdatePayload, MembershipMessage, MembershipResponse,
    ProbePayload, ProbeResponsePayload, WireError,
};
