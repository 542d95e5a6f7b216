//! Protocol contracts.
//!
//! Trait-only definitions for the pluggable collaborators: the RPC
//! transport pair (`MessagingClient` / `InboundHandler`, tied together by
//! `Transport`), the dissemination substrate (`Broadcaster`), and the
//! per-edge liveness estimator (`LinkFailureDetector`). Implementations
//! are swappable at construction; the engine never names a concrete one.

use std::sync::Arc;

use async_trait::async_trait;
use vigil_core::messages::{
    MembershipMessage, MembershipResponse, ProbePayload, ProbeResponsePayload,
};
use vigil_core::Endpoint;

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Client half of the RPC transport: request out, response back.
///
/// Implementations own connection management and may cache per-peer
/// stubs; callers bound each invocation with their own deadline.
#[async_trait]
pub trait MessagingClient: Send + Sync {
    /// Sends a request to a peer and awaits its response.
    async fn send(
        &self,
        to: &Endpoint,
        msg: MembershipMessage,
    ) -> anyhow::Result<MembershipResponse>;
}

/// Server half of the RPC transport: the membership service implements
/// this and the transport delivers every inbound request through it.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    /// Processes one inbound request and produces the response.
    async fn handle(&self, msg: MembershipMessage) -> anyhow::Result<MembershipResponse>;
}

/// A transport instance: hands out clients and binds listeners.
pub trait Transport: Send + Sync {
    /// Returns the client half for outbound requests.
    fn client(self: Arc<Self>) -> Arc<dyn MessagingClient>;

    /// Starts delivering inbound requests for `addr` to `handler`.
    ///
    /// # Errors
    ///
    /// Fails if the address is already bound.
    fn bind(&self, addr: &Endpoint, handler: Arc<dyn InboundHandler>) -> anyhow::Result<()>;

    /// Stops delivering inbound requests for `addr`. A no-op if unbound.
    fn unbind(&self, addr: &Endpoint);
}

// ---------------------------------------------------------------------------
// Broadcaster
// ---------------------------------------------------------------------------

/// Disseminates a message to every current member, best effort.
///
/// The service refreshes the recipient list at each view change; delivery
/// failures are the watermark design's problem, not the broadcaster's.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// Sends the message to all current members, including the local node.
    async fn broadcast(&self, msg: MembershipMessage);

    /// Replaces the recipient list.
    fn set_members(&self, members: Vec<Endpoint>);
}

// ---------------------------------------------------------------------------
// LinkFailureDetector
// ---------------------------------------------------------------------------

/// Per-edge liveness estimator plug-in.
///
/// The runner drives the observer side (`create_probe`, the success and
/// failure callbacks, `has_failed`); the transport delivers inbound
/// probes to the responder side (`handle_probe`). Probe payload bytes
/// are opaque to everything but the detector.
#[async_trait]
pub trait LinkFailureDetector: Send + Sync {
    /// Builds the next probe for a subject.
    fn create_probe(&self, subject: &Endpoint) -> ProbePayload;

    /// Responder side: answers a probe from a remote observer.
    async fn handle_probe(&self, probe: ProbePayload) -> ProbeResponsePayload;

    /// A probe to `subject` completed with this response.
    fn on_probe_success(&self, subject: &Endpoint, response: &ProbeResponsePayload);

    /// A probe to `subject` failed or timed out.
    fn on_probe_failure(&self, subject: &Endpoint, error: &anyhow::Error);

    /// Whether the detector currently considers the edge to `subject` failed.
    fn has_failed(&self, subject: &Endpoint) -> bool;

    /// The subject set changed; drop stale edge state and start tracking
    /// the new subjects. Invoked once per rotation, at tick start.
    fn on_membership_change(&self, subjects: &[Endpoint]);
}
