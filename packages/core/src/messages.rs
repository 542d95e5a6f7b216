//! Inter-node wire messages for the membership protocol.
//!
//! Three exchanges cross the wire: the two-phase join ceremony, the
//! link-update alerts feeding every member's watermark buffer, and the
//! failure-detector probes. Messages are `MsgPack`-encoded maps
//! (`rmp_serde::to_vec_named()`), internally tagged on `"type"` with
//! `SCREAMING_SNAKE_CASE` discriminants.
//!
//! A `GOSSIP` exchange is reserved for anti-entropy and intentionally has
//! no message pair here yet.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::ConfigurationId;
use crate::endpoint::{Endpoint, NodeId};

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Outcome of a join request, phase 1 or phase 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JoinStatusCode {
    /// Phase 1: proceed to phase 2. Phase 2: admitted into the view.
    SafeToJoin,
    /// The configuration moved between phases; the response carries the
    /// current configuration so the joiner can restart phase 1 against it.
    ConfigChanged,
    /// The presented `NodeId` was already admitted at some point.
    UuidAlreadyInRing,
    /// The endpoint is already a member of the current view.
    HostnameAlreadyInRing,
    /// A member refuses the join outright.
    MembershipRejected,
}

/// Reported status of a monitored link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkStatus {
    Up,
    Down,
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// A join request. Phase 1 (to a seed) omits `ring_number` and
/// `configuration_id`; phase 2 (to a future observer) carries both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinPayload {
    pub sender: Endpoint,
    pub node_id: NodeId,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub ring_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub configuration_id: Option<ConfigurationId>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub metadata: Option<BTreeMap<String, String>>,
}

/// Response to either join phase.
///
/// `hosts` is overloaded the way the protocol needs it: a phase-1
/// `SAFE_TO_JOIN` lists the joiner's K future observers; every other
/// response (phase-2 `SAFE_TO_JOIN`, `CONFIG_CHANGED`, identity
/// conflicts) lists the full member set, with `identifiers` carrying the
/// matching node ids, so a bounced joiner can reconcile against the
/// configuration that bounced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinResponsePayload {
    pub sender: Endpoint,
    pub status: JoinStatusCode,
    pub configuration_id: ConfigurationId,
    pub hosts: Vec<Endpoint>,
    pub identifiers: Vec<NodeId>,
}

/// An observer's report about one monitored edge, broadcast to every
/// member. `joiner_id` and `metadata` ride along when the report is the
/// UP half of a join (the only way non-observers learn the joiner's
/// identity before the commit).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkUpdatePayload {
    pub sender: Endpoint,
    pub link_src: Endpoint,
    pub link_dst: Endpoint,
    pub status: LinkStatus,
    pub ring_number: u32,
    pub configuration_id: ConfigurationId,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub joiner_id: Option<NodeId>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub metadata: Option<BTreeMap<String, String>>,
}

/// A failure-detector probe. The payload bytes are opaque to the core;
/// their meaning belongs to the detector plug-in on both ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbePayload {
    pub sender: Endpoint,
    pub data: Vec<u8>,
}

/// Response to a probe; bytes opaque to the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResponsePayload {
    pub sender: Endpoint,
    pub data: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Top-level message enums
// ---------------------------------------------------------------------------

/// A request sent between cluster nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MembershipMessage {
    Join(JoinPayload),
    LinkUpdate(LinkUpdatePayload),
    Probe(ProbePayload),
}

/// A response to a [`MembershipMessage`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MembershipResponse {
    Join(JoinResponsePayload),
    LinkUpdateAck,
    Probe(ProbeResponsePayload),
}

// ---------------------------------------------------------------------------
// Codec helpers
// ---------------------------------------------------------------------------

/// Wire-level encode/decode failure.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("failed to encode message: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("failed to decode message: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Encodes a request as named `MsgPack`.
///
/// # Errors
///
/// Returns [`WireError::Encode`] if serialization fails.
pub fn encode(msg: &MembershipMessage) -> Result<Vec<u8>, WireError> {
    Ok(rmp_serde::to_vec_named(msg)?)
}

/// Decodes a request from named `MsgPack`.
///
/// # Errors
///
/// Returns [`WireError::Decode`] if the bytes are not a valid message.
pub fn decode(bytes: &[u8]) -> Result<MembershipMessage, WireError> {
    Ok(rmp_serde::from_slice(bytes)?)
}

/// Encodes a response as named `MsgPack`.
///
/// # Errors
///
/// Returns [`WireError::Encode`] if serialization fails.
pub fn encode_response(msg: &MembershipResponse) -> Result<Vec<u8>, WireError> {
    Ok(rmp_serde::to_vec_named(msg)?)
}

/// Decodes a response from named `MsgPack`.
///
/// # Errors
///
/// Returns [`WireError::Decode`] if the bytes are not a valid response.
pub fn decode_response(bytes: &[u8]) -> Result<MembershipResponse, WireError> {
    Ok(rmp_serde::from_slice(bytes)?)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper: encode, decode back, and assert equality.
    fn round_trip(msg: &MembershipMessage) {
        let bytes = encode(msg).expect("serialize failed");
        let decoded = decode(&bytes).expect("deserialize failed");
        assert_eq!(msg, &decoded);
    }

    fn round_trip_response(msg: &MembershipResponse) {
        let bytes = encode_response(msg).expect("serialize failed");
        let decoded = decode_response(&bytes).expect("deserialize failed");
        assert_eq!(msg, &decoded);
    }

    fn ep(host: &str, port: u16) -> Endpoint {
        Endpoint::new(host, port)
    }

    #[test]
    fn serde_phase1_join_without_optionals() {
        round_trip(&MembershipMessage::Join(JoinPayload {
            sender: ep("10.0.0.3", 5000),
            node_id: NodeId::from_u128(3),
            ring_number: None,
            configuration_id: None,
            metadata: None,
        }));
    }

    #[test]
    fn serde_phase2_join_with_ring_config_and_metadata() {
        let mut metadata = BTreeMap::new();
        metadata.insert("zone".to_string(), "us-east-1a".to_string());
        metadata.insert("role".to_string(), "storage".to_string());

        round_trip(&MembershipMessage::Join(JoinPayload {
            sender: ep("10.0.0.3", 5000),
            node_id: NodeId::from_u128(3),
            ring_number: Some(7),
            configuration_id: Some(ConfigurationId::from_u64(0xdead_beef)),
            metadata: Some(metadata),
        }));
    }

    #[test]
    fn serde_link_update_down() {
        round_trip(&MembershipMessage::LinkUpdate(LinkUpdatePayload {
            sender: ep("10.0.0.1", 5000),
            link_src: ep("10.0.0.1", 5000),
            link_dst: ep("10.0.0.9", 5000),
            status: LinkStatus::Down,
            ring_number: 4,
            configuration_id: ConfigurationId::from_u64(17),
            joiner_id: None,
            metadata: None,
        }));
    }

    #[test]
    fn serde_link_update_up_join_carries_joiner_identity() {
        round_trip(&MembershipMessage::LinkUpdate(LinkUpdatePayload {
            sender: ep("10.0.0.1", 5000),
            link_src: ep("10.0.0.1", 5000),
            link_dst: ep("10.0.0.9", 5000),
            status: LinkStatus::Up,
            ring_number: 0,
            configuration_id: ConfigurationId::from_u64(17),
            joiner_id: Some(NodeId::from_u128(9)),
            metadata: Some(BTreeMap::new()),
        }));
    }

    #[test]
    fn serde_probe_with_opaque_bytes() {
        round_trip(&MembershipMessage::Probe(ProbePayload {
            sender: ep("10.0.0.1", 5000),
            data: vec![0xDE, 0xAD, 0xBE, 0xEF],
        }));
    }

    #[test]
    fn serde_join_response_safe_to_join() {
        round_trip_response(&MembershipResponse::Join(JoinResponsePayload {
            sender: ep("10.0.0.1", 5000),
            status: JoinStatusCode::SafeToJoin,
            configuration_id: ConfigurationId::from_u64(99),
            hosts: vec![ep("10.0.0.1", 5000), ep("10.0.0.2", 5000)],
            identifiers: vec![NodeId::from_u128(1), NodeId::from_u128(2)],
        }));
    }

    #[test]
    fn serde_join_response_rejections() {
        for status in [
            JoinStatusCode::ConfigChanged,
            JoinStatusCode::UuidAlreadyInRing,
            JoinStatusCode::HostnameAlreadyInRing,
            JoinStatusCode::MembershipRejected,
        ] {
            round_trip_response(&MembershipResponse::Join(JoinResponsePayload {
                sender: ep("10.0.0.1", 5000),
                status,
                configuration_id: ConfigurationId::from_u64(0),
                hosts: Vec::new(),
                identifiers: Vec::new(),
            }));
        }
    }

    #[test]
    fn serde_link_update_ack_unit_variant() {
        round_trip_response(&MembershipResponse::LinkUpdateAck);
    }

    #[test]
    fn serde_probe_response() {
        round_trip_response(&MembershipResponse::Probe(ProbeResponsePayload {
            sender: ep("10.0.0.9", 5000),
            data: Vec::new(),
        }));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode(&[0xC1, 0x00, 0xFF]).is_err());
    }
}
