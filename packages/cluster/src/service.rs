//! The membership service: the hub every other component feeds.
//!
//! Owns the current [`MembershipView`] (lock-free reads through
//! `ArcSwap`, replaced wholesale at each commit) and a single mutex over
//! the aggregation state: watermark buffer, per-configuration report
//! dedup, pending joiner identities, and pending phase-2 completions.
//! The mutex is held only for counter updates and view installation;
//! broadcasts, subscriber callbacks, and pending-join settlement all run
//! outside it, so joins never block the mutex on network I/O.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, trace, warn};

use vigil_core::messages::{
    JoinPayload, JoinResponsePayload, JoinStatusCode, LinkStatus, LinkUpdatePayload,
    MembershipMessage, MembershipResponse,
};
use vigil_core::{ConfigurationEntry, ConfigurationId, ConfigurationLog, Endpoint, NodeId};

use crate::error::MembershipError;
use crate::events::{ClusterEvent, EventKind, SubscriberRegistry, ViewChangeSummary};
use crate::settings::Settings;
use crate::traits::{Broadcaster, InboundHandler, LinkFailureDetector};
use crate::view::MembershipView;
use crate::watermark::WatermarkBuffer;

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

/// Per-node inputs to [`MembershipService::new`].
pub struct ServiceOptions {
    pub local: Endpoint,
    pub node_id: NodeId,
    pub metadata: BTreeMap<String, String>,
    pub settings: Arc<Settings>,
    pub log_proposals: bool,
}

/// A joiner identity learned from a phase-2 request or an UP alert,
/// pending until a commit applies it.
#[derive(Clone)]
struct JoinerData {
    node_id: NodeId,
    metadata: BTreeMap<String, String>,
}

/// A phase-2 join held open until the joiner appears in a committed view.
struct PendingJoin {
    joiner: Endpoint,
    respond: oneshot::Sender<JoinResponsePayload>,
}

/// Aggregation state guarded by the service mutex.
struct ProtocolState {
    watermark: WatermarkBuffer,
    /// (observer, subject, ring) triples already counted this configuration.
    seen_reports: HashSet<(Endpoint, Endpoint, u32)>,
    joiner_data: HashMap<Endpoint, JoinerData>,
    pending_joins: Vec<PendingJoin>,
    config_log: ConfigurationLog,
    proposals: Vec<(ConfigurationId, Vec<Endpoint>)>,
    metadata: HashMap<Endpoint, BTreeMap<String, String>>,
}

/// Everything a commit produces that must be acted on outside the mutex.
struct CommitOutcome {
    proposal_config: ConfigurationId,
    batch: Vec<Endpoint>,
    view: Arc<MembershipView>,
    added: Vec<Endpoint>,
    removed: Vec<Endpoint>,
    pending: Vec<PendingJoin>,
}

// ---------------------------------------------------------------------------
// MembershipService
// ---------------------------------------------------------------------------

/// The component hub: receives link-status reports, aggregates them into
/// stable view changes, services joins under the current configuration,
/// and notifies subscribers.
pub struct MembershipService {
    local: Endpoint,
    settings: Arc<Settings>,
    view: ArcSwap<MembershipView>,
    state: Mutex<ProtocolState>,
    subscribers: SubscriberRegistry,
    broadcaster: Arc<dyn Broadcaster>,
    detector: Arc<dyn LinkFailureDetector>,
    subjects_tx: watch::Sender<Arc<Vec<Endpoint>>>,
    log_proposals: bool,
}

impl MembershipService {
    /// Builds a service around an initial member list (the seed's
    /// single-member view, or the membership a join returned). The list
    /// must include the local node.
    ///
    /// Returns the service and the subject-set watch receiver the
    /// failure-detector runner rotates on.
    ///
    /// # Errors
    ///
    /// Fails on invalid settings, duplicate initial members, or a list
    /// that omits the local node.
    pub fn new(
        options: ServiceOptions,
        broadcaster: Arc<dyn Broadcaster>,
        detector: Arc<dyn LinkFailureDetector>,
        initial_members: Vec<(Endpoint, NodeId)>,
    ) -> Result<(Arc<Self>, watch::Receiver<Arc<Vec<Endpoint>>>), MembershipError> {
        options.settings.validate()?;

        let mut view = MembershipView::new(options.settings.ring_count);
        for (endpoint, node_id) in initial_members {
            view.add(endpoint, node_id)?;
        }
        if !view.contains(&options.local) {
            return Err(MembershipError::InvariantViolation(format!(
                "local endpoint {} missing from the initial member list",
                options.local
            )));
        }

        let watermark = WatermarkBuffer::new(
            options.settings.ring_count,
            options.settings.high_watermark,
            options.settings.low_watermark,
        )?;
        let config_log = ConfigurationLog::bootstrap(view.configuration_id(), view.identifiers());

        let mut metadata = HashMap::new();
        if !options.metadata.is_empty() {
            metadata.insert(options.local.clone(), options.metadata);
        }

        broadcaster.set_members(view.members());
        let (subjects_tx, subjects_rx) =
            watch::channel(Arc::new(view.subjects_of(&options.local)));

        info!(
            local = %options.local,
            configuration = %view.configuration_id(),
            members = view.len(),
            "membership service started"
        );

        let service = Arc::new(Self {
            local: options.local,
            settings: options.settings,
            view: ArcSwap::new(Arc::new(view)),
            state: Mutex::new(ProtocolState {
                watermark,
                seen_reports: HashSet::new(),
                joiner_data: HashMap::new(),
                pending_joins: Vec::new(),
                config_log,
                proposals: Vec::new(),
                metadata,
            }),
            subscribers: SubscriberRegistry::new(),
            broadcaster,
            detector,
            subjects_tx,
            log_proposals: options.log_proposals,
        });
        Ok((service, subjects_rx))
    }

    // -- read side ----------------------------------------------------------

    #[must_use]
    pub fn local(&self) -> &Endpoint {
        &self.local
    }

    /// Ordered snapshot of the current members.
    #[must_use]
    pub fn member_list(&self) -> Vec<Endpoint> {
        self.view.load().members()
    }

    #[must_use]
    pub fn configuration_id(&self) -> ConfigurationId {
        self.view.load().configuration_id()
    }

    /// The current immutable view snapshot.
    #[must_use]
    pub fn current_view(&self) -> Arc<MembershipView> {
        self.view.load_full()
    }

    /// Metadata learned for a member, if any.
    #[must_use]
    pub fn metadata_of(&self, endpoint: &Endpoint) -> Option<BTreeMap<String, String>> {
        self.state.lock().metadata.get(endpoint).cloned()
    }

    /// Proposal batches retained when `log_proposals` is on.
    #[must_use]
    pub fn proposal_log(&self) -> Vec<(ConfigurationId, Vec<Endpoint>)> {
        self.state.lock().proposals.clone()
    }

    /// Snapshot of the configuration history.
    #[must_use]
    pub fn configuration_log(&self) -> ConfigurationLog {
        self.state.lock().config_log.clone()
    }

    /// Registers a view-event callback.
    pub fn subscribe<F>(&self, kind: EventKind, callback: F)
    where
        F: Fn(&ClusterEvent) + Send + Sync + 'static,
    {
        self.subscribers.subscribe(kind, callback);
    }

    // -- join admission -----------------------------------------------------

    /// Phase 1: validate the joiner against the current view and name its
    /// K future observers. Mutates nothing.
    ///
    /// Identity conflicts answer with the full current configuration so
    /// the joiner can reconcile instead of retrying blind.
    #[must_use]
    pub fn handle_join_phase1(&self, payload: &JoinPayload) -> JoinResponsePayload {
        let view = self.view.load();
        let status = if view.is_identifier_seen(&payload.node_id) {
            JoinStatusCode::UuidAlreadyInRing
        } else if view.contains(&payload.sender) {
            JoinStatusCode::HostnameAlreadyInRing
        } else {
            JoinStatusCode::SafeToJoin
        };
        debug!(joiner = %payload.sender, ?status, "phase-1 join");
        let (hosts, identifiers) = if status == JoinStatusCode::SafeToJoin {
            (view.expected_observers_of(&payload.sender), Vec::new())
        } else {
            (view.members(), view.identifiers())
        };
        JoinResponsePayload {
            sender: self.local.clone(),
            status,
            configuration_id: view.configuration_id(),
            hosts,
            identifiers,
        }
    }

    /// Phase 2: this node is one of the joiner's future observers. Record
    /// the joiner, vouch for it on the given ring via a broadcast UP
    /// alert, and hold the response until a commit admits it.
    ///
    /// # Errors
    ///
    /// [`MembershipError::JoinExpired`] if no commit admits the joiner
    /// within the phase-2 deadline; [`MembershipError::Shutdown`] if the
    /// service tears down underneath the request.
    pub async fn handle_join_phase2(
        &self,
        payload: JoinPayload,
    ) -> Result<JoinResponsePayload, MembershipError> {
        let Some(ring_number) = payload.ring_number else {
            return Err(MembershipError::InvariantViolation(
                "phase-2 join without a ring number".to_string(),
            ));
        };
        let Some(join_config) = payload.configuration_id else {
            return Err(MembershipError::InvariantViolation(
                "phase-2 join without a configuration id".to_string(),
            ));
        };

        let admission = {
            let mut state = self.state.lock();
            let current = self.view.load().configuration_id();
            if join_config == current {
                state.joiner_data.insert(
                    payload.sender.clone(),
                    JoinerData {
                        node_id: payload.node_id,
                        metadata: payload.metadata.clone().unwrap_or_default(),
                    },
                );
                let (respond, rx) = oneshot::channel();
                state.pending_joins.push(PendingJoin {
                    joiner: payload.sender.clone(),
                    respond,
                });
                Some(rx)
            } else {
                debug!(
                    joiner = %payload.sender,
                    %join_config,
                    %current,
                    "phase-2 join under a stale configuration"
                );
                None
            }
        };
        let Some(rx) = admission else {
            return Ok(self.configuration_response(JoinStatusCode::ConfigChanged));
        };

        // Vouch for the joiner on this ring; every member (including this
        // one) counts the alert in its watermark buffer.
        let alert = LinkUpdatePayload {
            sender: self.local.clone(),
            link_src: self.local.clone(),
            link_dst: payload.sender.clone(),
            status: LinkStatus::Up,
            ring_number,
            configuration_id: join_config,
            joiner_id: Some(payload.node_id),
            metadata: payload.metadata,
        };
        self.broadcaster
            .broadcast(MembershipMessage::LinkUpdate(alert))
            .await;

        match tokio::time::timeout(self.settings.join_phase2_timeout(), rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(MembershipError::Shutdown),
            Err(_) => {
                debug!(joiner = %payload.sender, "phase-2 join expired before a commit");
                Err(MembershipError::JoinExpired(payload.sender))
            }
        }
    }

    /// Builds a response describing the current configuration in full.
    fn configuration_response(&self, status: JoinStatusCode) -> JoinResponsePayload {
        let view = self.view.load();
        JoinResponsePayload {
            sender: self.local.clone(),
            status,
            configuration_id: view.configuration_id(),
            hosts: view.members(),
            identifiers: view.identifiers(),
        }
    }

    // -- link updates -------------------------------------------------------

    /// Feeds one link-status report through fencing, dedup, and the
    /// watermark buffer; commits the view change if a batch stabilizes.
    ///
    /// # Errors
    ///
    /// Only on invariant violations during the commit; stale and
    /// duplicate reports are silently dropped.
    pub fn handle_link_update(&self, payload: &LinkUpdatePayload) -> Result<(), MembershipError> {
        let outcome = {
            let mut state = self.state.lock();
            let current = self.view.load().configuration_id();
            if payload.configuration_id != current {
                trace!(
                    got = %payload.configuration_id,
                    %current,
                    src = %payload.link_src,
                    dst = %payload.link_dst,
                    "dropping link update for another configuration"
                );
                return Ok(());
            }

            let key = (
                payload.link_src.clone(),
                payload.link_dst.clone(),
                payload.ring_number,
            );
            if !state.seen_reports.insert(key) {
                trace!(
                    src = %payload.link_src,
                    dst = %payload.link_dst,
                    ring = payload.ring_number,
                    "dropping duplicate link update"
                );
                return Ok(());
            }

            if payload.status == LinkStatus::Up {
                if let Some(node_id) = payload.joiner_id {
                    state
                        .joiner_data
                        .entry(payload.link_dst.clone())
                        .or_insert_with(|| JoinerData {
                            node_id,
                            metadata: payload.metadata.clone().unwrap_or_default(),
                        });
                }
            }

            let batch = state.watermark.receive(payload);
            if batch.is_empty() {
                None
            } else {
                Some(self.commit_view_change(&mut state, batch)?)
            }
        };

        if let Some(outcome) = outcome {
            self.finish_commit(outcome);
        }
        Ok(())
    }

    /// The runner declared an edge failed: report the subject down, once
    /// per ring on which this node observes it.
    pub async fn handle_link_failed(&self, subject: &Endpoint) {
        let view = self.view.load_full();
        if !view.contains(subject) {
            return;
        }
        let rings = view.observer_rings(&self.local, subject);
        if rings.is_empty() {
            return;
        }
        let configuration_id = view.configuration_id();
        debug!(%subject, ?rings, "reporting failed subject");
        for ring_number in rings {
            let alert = LinkUpdatePayload {
                sender: self.local.clone(),
                link_src: self.local.clone(),
                link_dst: subject.clone(),
                status: LinkStatus::Down,
                ring_number,
                configuration_id,
                joiner_id: None,
                metadata: None,
            };
            self.broadcaster
                .broadcast(MembershipMessage::LinkUpdate(alert))
                .await;
        }
    }

    // -- commit pipeline ----------------------------------------------------

    /// Applies a stable batch while the state mutex is held. Anything that
    /// leaves the mutex (broadcast lists, callbacks, pending responses) is
    /// returned in the outcome for [`Self::finish_commit`].
    fn commit_view_change(
        &self,
        state: &mut ProtocolState,
        batch: Vec<Endpoint>,
    ) -> Result<CommitOutcome, MembershipError> {
        let current = self.view.load_full();
        let proposal_config = current.configuration_id();
        if self.log_proposals {
            state.proposals.push((proposal_config, batch.clone()));
        }

        let mut next = (*current).clone();
        let mut added = Vec::new();
        let mut removed = Vec::new();
        let mut added_ids = Vec::new();
        let mut removed_ids = Vec::new();
        for subject in &batch {
            if let Some(data) = state.joiner_data.get(subject).cloned() {
                next.add(subject.clone(), data.node_id).map_err(|e| {
                    MembershipError::InvariantViolation(format!(
                        "cannot apply join of {subject}: {e}"
                    ))
                })?;
                state.metadata.insert(subject.clone(), data.metadata);
                added_ids.push(data.node_id);
                added.push(subject.clone());
            } else if next.contains(subject) {
                removed_ids.extend(next.identifier_of(subject));
                next.remove(subject);
                state.metadata.remove(subject);
                removed.push(subject.clone());
            } else {
                return Err(MembershipError::InvariantViolation(format!(
                    "batch subject {subject} is neither a pending joiner nor a member"
                )));
            }
        }

        let view = Arc::new(next);
        state.config_log.record(ConfigurationEntry {
            id: view.configuration_id(),
            added: added_ids,
            removed: removed_ids,
        });

        // The new configuration starts with clean aggregation state.
        state.watermark.clear();
        state.seen_reports.clear();
        state.joiner_data.clear();
        let pending = std::mem::take(&mut state.pending_joins);

        self.view.store(Arc::clone(&view));
        if removed.contains(&self.local) {
            warn!(configuration = %view.configuration_id(), "this node was removed from the view");
        }
        info!(
            old = %proposal_config,
            new = %view.configuration_id(),
            members = view.len(),
            added = added.len(),
            removed = removed.len(),
            "view change committed"
        );

        Ok(CommitOutcome {
            proposal_config,
            batch,
            view,
            added,
            removed,
            pending,
        })
    }

    /// The part of a commit that runs outside the mutex: subject rotation,
    /// broadcaster refresh, pending-join settlement, and callbacks.
    fn finish_commit(&self, outcome: CommitOutcome) {
        let view = &outcome.view;
        let _ = self
            .subjects_tx
            .send(Arc::new(view.subjects_of(&self.local)));
        self.broadcaster.set_members(view.members());

        for pending in outcome.pending {
            let status = if view.contains(&pending.joiner) {
                JoinStatusCode::SafeToJoin
            } else {
                // The view moved without admitting this joiner; hand back
                // the new configuration so it can reconcile and retry.
                JoinStatusCode::ConfigChanged
            };
            let response = JoinResponsePayload {
                sender: self.local.clone(),
                status,
                configuration_id: view.configuration_id(),
                hosts: view.members(),
                identifiers: view.identifiers(),
            };
            let _ = pending.respond.send(response);
        }

        self.subscribers.fire(&ClusterEvent::ViewChangeProposal {
            configuration_id: outcome.proposal_config,
            subjects: outcome.batch,
        });
        for endpoint in &outcome.added {
            self.subscribers
                .fire(&ClusterEvent::NodeAdded(endpoint.clone()));
        }
        for endpoint in &outcome.removed {
            self.subscribers
                .fire(&ClusterEvent::NodeRemoved(endpoint.clone()));
        }
        self.subscribers
            .fire(&ClusterEvent::ViewChange(ViewChangeSummary {
                configuration_id: view.configuration_id(),
                members: view.members(),
                added: outcome.added,
                removed: outcome.removed,
            }));
    }
}

// ---------------------------------------------------------------------------
// Inbound dispatch
// ---------------------------------------------------------------------------

#[async_trait]
impl InboundHandler for MembershipService {
    async fn handle(&self, msg: MembershipMessage) -> anyhow::Result<MembershipResponse> {
        match msg {
            MembershipMessage::Probe(probe) => Ok(MembershipResponse::Probe(
                self.detector.handle_probe(probe).await,
            )),
            MembershipMessage::LinkUpdate(update) => {
                if let Err(err) = self.handle_link_update(&update) {
                    error!(error = %err, "link update failed");
                    return Err(err.into());
                }
                Ok(MembershipResponse::LinkUpdateAck)
            }
            MembershipMessage::Join(join) => {
                let response = if join.configuration_id.is_none() {
                    self.handle_join_phase1(&join)
                } else {
                    self.handle_join_phase2(join).await?
                };
                Ok(MembershipResponse::Join(response))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
