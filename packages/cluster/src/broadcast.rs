//! Fan-out broadcaster.
//!
//! Unicasts an update to every current member in parallel, best effort.
//! Individual failures are logged and otherwise ignored: the watermark
//! thresholds already tolerate H-of-K delivery, so the broadcaster does
//! not retry.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use parking_lot::RwLock;
use tracing::debug;
use vigil_core::messages::MembershipMessage;
use vigil_core::Endpoint;

use crate::traits::{Broadcaster, MessagingClient};

/// Broadcasts by unicasting to the current member list.
pub struct FanoutBroadcaster {
    client: Arc<dyn MessagingClient>,
    members: RwLock<Vec<Endpoint>>,
    send_timeout: Duration,
}

impl FanoutBroadcaster {
    /// Creates a broadcaster with an empty recipient list.
    #[must_use]
    pub fn new(client: Arc<dyn MessagingClient>, send_timeout: Duration) -> Self {
        Self {
            client,
            members: RwLock::new(Vec::new()),
            send_timeout,
        }
    }
}

#[async_trait]
impl Broadcaster for FanoutBroadcaster {
    async fn broadcast(&self, msg: MembershipMessage) {
        let members = self.members.read().clone();
        let sends = members.into_iter().map(|member| {
            let msg = msg.clone();
            async move {
                match tokio::time::timeout(self.send_timeout, self.client.send(&member, msg))
                    .await
                {
                    Ok(Ok(_)) => {}
                    Ok(Err(error)) => {
                        debug!(%member, %error, "broadcast send failed");
                    }
                    Err(_) => {
                        debug!(%member, "broadcast send timed out");
                    }
                }
            }
        });
        join_all(sends).await;
    }

    fn set_members(&self, members: Vec<Endpoint>) {
        *self.members.write() = members;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use vigil_core::messages::{MembershipResponse, ProbePayload};

    use super::*;

    fn ep(n: u16) -> Endpoint {
        Endpoint::new(format!("10.0.0.{n}"), 5000)
    }

    /// Records every (destination, message) pair; errors for one endpoint.
    struct RecordingClient {
        sent: Mutex<Vec<Endpoint>>,
        failing: Option<Endpoint>,
    }

    #[async_trait]
    impl MessagingClient for RecordingClient {
        async fn send(
            &self,
            to: &Endpoint,
            _msg: MembershipMessage,
        ) -> anyhow::Result<MembershipResponse> {
            self.sent.lock().push(to.clone());
            if self.failing.as_ref() == Some(to) {
                anyhow::bail!("connection refused");
            }
            Ok(MembershipResponse::LinkUpdateAck)
        }
    }

    fn probe_msg() -> MembershipMessage {
        MembershipMessage::Probe(ProbePayload {
            sender: ep(1),
            data: Vec::new(),
        })
    }

    #[tokio::test]
    async fn broadcasts_to_every_member() {
        let client = Arc::new(RecordingClient {
            sent: Mutex::new(Vec::new()),
            failing: None,
        });
        let broadcaster =
            FanoutBroadcaster::new(client.clone(), Duration::from_millis(100));
        broadcaster.set_members(vec![ep(1), ep(2), ep(3)]);

        broadcaster.broadcast(probe_msg()).await;

        let mut sent = client.sent.lock().clone();
        sent.sort();
        assert_eq!(sent, vec![ep(1), ep(2), ep(3)]);
    }

    #[tokio::test]
    async fn one_failing_member_does_not_stop_the_fanout() {
        let client = Arc::new(RecordingClient {
            sent: Mutex::new(Vec::new()),
            failing: Some(ep(2)),
        });
        let broadcaster =
            FanoutBroadcaster::new(client.clone(), Duration::from_millis(100));
        broadcaster.set_members(vec![ep(1), ep(2), ep(3)]);

        broadcaster.broadcast(probe_msg()).await;

        assert_eq!(client.sent.lock().len(), 3);
    }

    #[tokio::test]
    async fn set_members_replaces_the_recipient_list() {
        let client = Arc::new(RecordingClient {
            sent: Mutex::new(Vec::new()),
            failing: None,
        });
        let broadcaster =
            FanoutBroadcaster::new(client.clone(), Duration::from_millis(100));

        broadcaster.set_members(vec![ep(1), ep(2)]);
        broadcaster.set_members(vec![ep(3)]);
        broadcaster.broadcast(probe_msg()).await;

        assert_eq!(client.sent.lock().clone(), vec![ep(3)]);
    }

    #[tokio::test]
    async fn empty_member_list_is_a_no_op() {
        let client = Arc::new(RecordingClient {
            sent: Mutex::new(Vec::new()),
            failing: None,
        });
        let broadcaster = FanoutBroadcaster::new(client.clone(), Duration::from_millis(100));

        broadcaster.broadcast(probe_msg()).await;
        assert!(client.sent.lock().is_empty());
    }
}
