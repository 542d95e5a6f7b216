//! Periodic failure-detector driver.
//!
//! One tick per probe interval. Subject-set changes are applied atomically
//! at tick start (stale probe callbacks die with the old set), then every
//! current subject is probed in parallel and the tick waits for all
//! probes to complete or time out. Subjects the detector has declared
//! failed are not probed again; they are reported to the service instead,
//! which turns them into per-ring DOWN alerts.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

use vigil_core::messages::{MembershipMessage, MembershipResponse};
use vigil_core::Endpoint;

use crate::settings::Settings;
use crate::traits::{LinkFailureDetector, MessagingClient};

/// Drives the detector over this node's current subject set.
pub struct FailureDetectorRunner {
    local: Endpoint,
    detector: Arc<dyn LinkFailureDetector>,
    client: Arc<dyn MessagingClient>,
    subjects_rx: watch::Receiver<Arc<Vec<Endpoint>>>,
    failed_tx: mpsc::UnboundedSender<Endpoint>,
    probe_interval: Duration,
    probe_timeout: Duration,
    shutdown_rx: watch::Receiver<bool>,
    subjects: Vec<Endpoint>,
}

impl FailureDetectorRunner {
    #[must_use]
    pub fn new(
        local: Endpoint,
        detector: Arc<dyn LinkFailureDetector>,
        client: Arc<dyn MessagingClient>,
        subjects_rx: watch::Receiver<Arc<Vec<Endpoint>>>,
        failed_tx: mpsc::UnboundedSender<Endpoint>,
        settings: &Settings,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            local,
            detector,
            client,
            subjects_rx,
            failed_tx,
            probe_interval: settings.probe_interval(),
            probe_timeout: settings.base_rpc_timeout(),
            shutdown_rx,
            subjects: Vec::new(),
        }
    }

    /// Spawns the periodic tick loop.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        self.rotate_subjects();
        let mut tick = tokio::time::interval(self.probe_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = tick.tick() => self.tick().await,
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        debug!(local = %self.local, "failure detector runner stopped");
    }

    /// Installs the latest subject set: distinct endpoints, never self.
    fn rotate_subjects(&mut self) {
        let snapshot = self.subjects_rx.borrow_and_update().clone();
        let mut subjects: Vec<Endpoint> = Vec::new();
        for subject in snapshot.iter() {
            if *subject != self.local && !subjects.contains(subject) {
                subjects.push(subject.clone());
            }
        }
        debug!(local = %self.local, ?subjects, "monitoring subjects rotated");
        self.subjects = subjects;
        self.detector.on_membership_change(&self.subjects);
    }

    async fn tick(&mut self) {
        if self.subjects_rx.has_changed().unwrap_or(false) {
            self.rotate_subjects();
        }
        let subjects = self.subjects.clone();
        join_all(subjects.iter().map(|subject| self.probe_subject(subject))).await;
    }

    async fn probe_subject(&self, subject: &Endpoint) {
        if self.detector.has_failed(subject) {
            // Re-reported every tick; the service dedups per (observer,
            // subject, ring) within a configuration.
            let _ = self.failed_tx.send(subject.clone());
            return;
        }

        let probe = self.detector.create_probe(subject);
        let send = self.client.send(subject, MembershipMessage::Probe(probe));
        match tokio::time::timeout(self.probe_timeout, send).await {
            Ok(Ok(MembershipResponse::Probe(response))) => {
                trace!(%subject, "probe answered");
                self.detector.on_probe_success(subject, &response);
            }
            Ok(Ok(_)) => {
                self.detector.on_probe_failure(
                    subject,
                    &anyhow::anyhow!("peer answered a probe with a non-probe response"),
                );
            }
            Ok(Err(error)) => {
                trace!(%subject, %error, "probe failed");
                self.detector.on_probe_failure(subject, &error);
            }
            Err(_) => {
                trace!(%subject, "probe timed out");
                self.detector
                    .on_probe_failure(subject, &anyhow::anyhow!("probe timed out"));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
