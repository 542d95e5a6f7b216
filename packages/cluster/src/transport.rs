//! In-process reference transport.
//!
//! Routes requests between endpoints registered in the same process via a
//! concurrent handler registry. Every request still round-trips through
//! the real wire codec, so tests exercise serialization exactly as a
//! network transport would. `isolate`/`heal` drop traffic addressed to an
//! endpoint, which is enough to drive failure detection and partition
//! scenarios end to end.
//!
//! Production deployments supply their own [`Transport`] (gRPC and
//! friends); this one also serves single-process embeddings.

use std::sync::Arc;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use vigil_core::messages::{MembershipMessage, MembershipResponse};
use vigil_core::Endpoint;

use crate::traits::{InboundHandler, MessagingClient, Transport};

/// Shared in-process message fabric.
#[derive(Default)]
pub struct InProcessNetwork {
    handlers: DashMap<Endpoint, Arc<dyn InboundHandler>>,
    isolated: DashSet<Endpoint>,
}

impl InProcessNetwork {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Starts dropping every request addressed to `endpoint`.
    pub fn isolate(&self, endpoint: &Endpoint) {
        self.isolated.insert(endpoint.clone());
    }

    /// Resumes delivery to `endpoint`.
    pub fn heal(&self, endpoint: &Endpoint) {
        self.isolated.remove(endpoint);
    }
}

#[async_trait]
impl MessagingClient for InProcessNetwork {
    async fn send(
        &self,
        to: &Endpoint,
        msg: MembershipMessage,
    ) -> anyhow::Result<MembershipResponse> {
        if self.isolated.contains(to) {
            return Err(anyhow!("endpoint {to} is unreachable"));
        }
        let handler = self
            .handlers
            .get(to)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| anyhow!("no listener at {to}"))?;

        // Round-trip through the codec so the in-process path exercises
        // the same wire format as a real transport.
        let bytes = vigil_core::encode(&msg).context("encode request")?;
        let msg = vigil_core::decode(&bytes).context("decode request")?;

        let response = handler.handle(msg).await?;

        let bytes = vigil_core::encode_response(&response).context("encode response")?;
        vigil_core::decode_response(&bytes).context("decode response")
    }
}

impl Transport for InProcessNetwork {
    fn client(self: Arc<Self>) -> Arc<dyn MessagingClient> {
        self
    }

    fn bind(&self, addr: &Endpoint, handler: Arc<dyn InboundHandler>) -> anyhow::Result<()> {
        use dashmap::mapref::entry::Entry;
        match self.handlers.entry(addr.clone()) {
            Entry::Occupied(_) => Err(anyhow!("address {addr} is already bound")),
            Entry::Vacant(slot) => {
                slot.insert(handler);
                Ok(())
            }
        }
    }

    fn unbind(&self, addr: &Endpoint) {
        self.handlers.remove(addr);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
