//! Public cluster surface: builder, handle, lifecycle.
//!
//! A [`Cluster`] wires the service, the failure-detector runner, and the
//! edge-failure loop over a [`Transport`], either as a seed
//! (single-member initial view) or by joining an existing cluster
//! through a seed address. Shutdown stops the periodic tick, drains
//! pending completions, and unbinds from the transport.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use vigil_core::{ConfigurationId, ConfigurationLog, Endpoint, NodeId};

use crate::broadcast::FanoutBroadcaster;
use crate::detector::{PingPongConfig, PingPongFailureDetector};
use crate::error::MembershipError;
use crate::events::{ClusterEvent, EventKind};
use crate::join::join_cluster;
use crate::runner::FailureDetectorRunner;
use crate::service::{MembershipService, ServiceOptions};
use crate::settings::Settings;
use crate::traits::{LinkFailureDetector, Transport};
use crate::transport::InProcessNetwork;

// ---------------------------------------------------------------------------
// ClusterBuilder
// ---------------------------------------------------------------------------

/// Configures and launches a cluster node.
pub struct ClusterBuilder {
    listen: Endpoint,
    metadata: BTreeMap<String, String>,
    settings: Settings,
    log_proposals: bool,
    detector: Option<Arc<dyn LinkFailureDetector>>,
    transport: Option<Arc<dyn Transport>>,
}

impl ClusterBuilder {
    /// Starts configuring a node that will listen on `listen`.
    #[must_use]
    pub fn new(listen: Endpoint) -> Self {
        Self {
            listen,
            metadata: BTreeMap::new(),
            settings: Settings::default(),
            log_proposals: false,
            detector: None,
            transport: None,
        }
    }

    /// Attaches immutable key/value tags to this node. They ride the join
    /// ceremony and are retained by every member at the admitting commit.
    #[must_use]
    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Replaces the default settings.
    #[must_use]
    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Retains proposal batches for inspection via
    /// [`Cluster::proposal_log`].
    #[must_use]
    pub fn with_log_proposals(mut self, log_proposals: bool) -> Self {
        self.log_proposals = log_proposals;
        self
    }

    /// Overrides the default ping-pong link-failure detector.
    #[must_use]
    pub fn with_link_failure_detector(mut self, detector: Arc<dyn LinkFailureDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    /// Supplies the transport. Without one, a private in-process network
    /// is created, which only ever reaches single-node clusters.
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Boots this node as a seed with a single-member initial view.
    ///
    /// # Errors
    ///
    /// Fails on invalid settings or if the listen address is already
    /// bound on the transport.
    pub async fn start(self) -> Result<Cluster, MembershipError> {
        self.settings.validate()?;
        let node_id = NodeId::generate();
        let members = vec![(self.listen.clone(), node_id)];
        self.launch(node_id, members)
    }

    /// Joins the cluster reachable through `seed` (phase 1 then phase 2),
    /// then boots this node with the committed membership.
    ///
    /// # Errors
    ///
    /// Propagates join rejections and attempt exhaustion on top of the
    /// [`Self::start`] failure modes.
    pub async fn join(mut self, seed: &Endpoint) -> Result<Cluster, MembershipError> {
        self.settings.validate()?;
        let transport: Arc<dyn Transport> = match &self.transport {
            Some(transport) => Arc::clone(transport),
            None => {
                let network: Arc<dyn Transport> = InProcessNetwork::new();
                self.transport = Some(Arc::clone(&network));
                network
            }
        };
        let client = transport.client();
        let outcome =
            join_cluster(&client, seed, &self.listen, &self.metadata, &self.settings).await?;
        self.launch(outcome.node_id, outcome.members)
    }

    fn launch(
        self,
        node_id: NodeId,
        members: Vec<(Endpoint, NodeId)>,
    ) -> Result<Cluster, MembershipError> {
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => InProcessNetwork::new(),
        };
        let client = Arc::clone(&transport).client();

        let settings = Arc::new(self.settings);
        let detector = self.detector.unwrap_or_else(|| {
            Arc::new(PingPongFailureDetector::new(
                self.listen.clone(),
                PingPongConfig::default(),
            ))
        });
        let broadcaster = Arc::new(FanoutBroadcaster::new(
            Arc::clone(&client),
            settings.base_rpc_timeout(),
        ));

        let (service, subjects_rx) = MembershipService::new(
            ServiceOptions {
                local: self.listen.clone(),
                node_id,
                metadata: self.metadata,
                settings: Arc::clone(&settings),
                log_proposals: self.log_proposals,
            },
            broadcaster,
            Arc::clone(&detector),
            members,
        )?;

        let handler: Arc<dyn crate::traits::InboundHandler> = service.clone();
        transport
            .bind(&self.listen, handler)
            .map_err(MembershipError::Transport)?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (failed_tx, failed_rx) = mpsc::unbounded_channel();

        let runner = FailureDetectorRunner::new(
            self.listen.clone(),
            detector,
            client,
            subjects_rx,
            failed_tx,
            &settings,
            shutdown_rx.clone(),
        );
        let runner_task = runner.spawn();
        let edge_task = tokio::spawn(edge_failure_loop(
            Arc::clone(&service),
            failed_rx,
            shutdown_rx,
        ));

        Ok(Cluster {
            listen: self.listen,
            service,
            transport,
            shutdown_tx,
            tasks: vec![runner_task, edge_task],
        })
    }
}

/// Forwards runner-declared edge failures into the service, which turns
/// them into per-ring DOWN alerts.
async fn edge_failure_loop(
    service: Arc<MembershipService>,
    mut failed_rx: mpsc::UnboundedReceiver<Endpoint>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            subject = failed_rx.recv() => {
                match subject {
                    Some(subject) => service.handle_link_failed(&subject).await,
                    None => break,
                }
            }
        }
    }
    debug!(local = %service.local(), "edge failure loop stopped");
}

// ---------------------------------------------------------------------------
// Cluster
// ---------------------------------------------------------------------------

/// A running cluster node.
pub struct Cluster {
    listen: Endpoint,
    service: Arc<MembershipService>,
    transport: Arc<dyn Transport>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Cluster {
    /// Starts configuring a node; alias for [`ClusterBuilder::new`].
    #[must_use]
    pub fn builder(listen: Endpoint) -> ClusterBuilder {
        ClusterBuilder::new(listen)
    }

    /// The address this node is reachable on.
    #[must_use]
    pub fn local_endpoint(&self) -> &Endpoint {
        &self.listen
    }

    /// Ordered snapshot of the current members.
    #[must_use]
    pub fn member_list(&self) -> Vec<Endpoint> {
        self.service.member_list()
    }

    /// Identity of the current configuration.
    #[must_use]
    pub fn configuration_id(&self) -> ConfigurationId {
        self.service.configuration_id()
    }

    /// Registers a callback for a view-event kind. Callbacks run
    /// synchronously after a commit, outside the service mutex.
    pub fn register_subscription<F>(&self, kind: EventKind, callback: F)
    where
        F: Fn(&ClusterEvent) + Send + Sync + 'static,
    {
        self.service.subscribe(kind, callback);
    }

    /// Metadata learned for a member, if any.
    #[must_use]
    pub fn metadata_of(&self, endpoint: &Endpoint) -> Option<BTreeMap<String, String>> {
        self.service.metadata_of(endpoint)
    }

    /// Proposal batches retained under `with_log_proposals(true)`.
    #[must_use]
    pub fn proposal_log(&self) -> Vec<(ConfigurationId, Vec<Endpoint>)> {
        self.service.proposal_log()
    }

    /// Snapshot of this node's configuration history.
    #[must_use]
    pub fn configuration_log(&self) -> ConfigurationLog {
        self.service.configuration_log()
    }

    /// Graceful teardown: stop the periodic tick and the edge-failure
    /// loop, then unbind from the transport. Pending phase-2 responses
    /// observe a shutdown error.
    pub async fn shutdown(self) {
        info!(local = %self.listen, "shutting down");
        let _ = self.shutdown_tx.send(true);
        self.transport.unbind(&self.listen);
        // Tear down in reverse launch order: the edge-failure loop drains
        // before the runner that feeds it.
        for task in self.tasks.into_iter().rev() {
            let abort = task.abort_handle();
            if tokio::time::timeout(Duration::from_secs(1), task)
                .await
                .is_err()
            {
                debug!("task did not stop in time, aborting");
                abort.abort();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(n: u16) -> Endpoint {
        Endpoint::new(format!("10.0.0.{n}"), 5000)
    }

    #[tokio::test]
    async fn seed_bootstraps_a_single_member_view() {
        let net = InProcessNetwork::new();
        let cluster = Cluster::builder(ep(1))
            .with_transport(net)
            .start()
            .await
            .unwrap();

        assert_eq!(cluster.member_list(), vec![ep(1)]);
        // The configuration id is stable across calls.
        assert_eq!(cluster.configuration_id(), cluster.configuration_id());

        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn start_rejects_invalid_settings() {
        let result = Cluster::builder(ep(1))
            .with_settings(Settings {
                ring_count: 2,
                ..Settings::default()
            })
            .start()
            .await;
        assert!(matches!(result, Err(MembershipError::Settings(_))));
    }

    #[tokio::test]
    async fn double_bind_on_one_transport_fails() {
        let net = InProcessNetwork::new();
        let first = Cluster::builder(ep(1))
            .with_transport(Arc::clone(&net) as Arc<dyn Transport>)
            .start()
            .await
            .unwrap();

        let second = Cluster::builder(ep(1))
            .with_transport(Arc::clone(&net) as Arc<dyn Transport>)
            .start()
            .await;
        assert!(matches!(second, Err(MembershipError::Transport(_))));

        first.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_releases_the_listen_address() {
        let net = InProcessNetwork::new();
        let cluster = Cluster::builder(ep(1))
            .with_transport(Arc::clone(&net) as Arc<dyn Transport>)
            .start()
            .await
            .unwrap();
        cluster.shutdown().await;

        let again = Cluster::builder(ep(1))
            .with_transport(Arc::clone(&net) as Arc<dyn Transport>)
            .start()
            .await
            .unwrap();
        again.shutdown().await;
    }

    #[tokio::test]
    async fn join_without_a_reachable_seed_exhausts_attempts() {
        let net = InProcessNetwork::new();
        let result = Cluster::builder(ep(2))
            .with_transport(net)
            .with_settings(Settings {
                join_attempts: 2,
                base_rpc_timeout_ms: 50,
                join_retry_backoff_ms: 1,
                ..Settings::default()
            })
            .join(&ep(1))
            .await;
        assert!(matches!(
            result,
            Err(MembershipError::JoinAttemptsExhausted { attempts: 2 })
        ));
    }
}
