//! Default ping-pong link-failure detector.
//!
//! Counts consecutive unanswered probes per subject and flags the edge
//! once the count reaches a threshold. Any successful probe resets the
//! subject's count. Deliberately stateless beyond that: smarter
//! estimators (phi-accrual and friends) plug in through the same trait.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use vigil_core::messages::{ProbePayload, ProbeResponsePayload};
use vigil_core::Endpoint;

use crate::traits::LinkFailureDetector;

/// Configuration for the ping-pong detector.
#[derive(Debug, Clone)]
pub struct PingPongConfig {
    /// Consecutive unanswered probes before the edge is flagged failed.
    pub failure_threshold: u32,
}

impl Default for PingPongConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
        }
    }
}

/// Flags a subject after N consecutive unanswered probes.
pub struct PingPongFailureDetector {
    local: Endpoint,
    config: PingPongConfig,
    failures: RwLock<HashMap<Endpoint, u32>>,
}

impl PingPongFailureDetector {
    /// Creates a detector that stamps probes with `local` as the sender.
    #[must_use]
    pub fn new(local: Endpoint, config: PingPongConfig) -> Self {
        Self {
            local,
            config,
            failures: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl LinkFailureDetector for PingPongFailureDetector {
    fn create_probe(&self, _subject: &Endpoint) -> ProbePayload {
        ProbePayload {
            sender: self.local.clone(),
            data: Vec::new(),
        }
    }

    async fn handle_probe(&self, _probe: ProbePayload) -> ProbeResponsePayload {
        ProbeResponsePayload {
            sender: self.local.clone(),
            data: Vec::new(),
        }
    }

    fn on_probe_success(&self, subject: &Endpoint, _response: &ProbeResponsePayload) {
        self.failures.write().insert(subject.clone(), 0);
    }

    fn on_probe_failure(&self, subject: &Endpoint, _error: &anyhow::Error) {
        let mut failures = self.failures.write();
        let count = failures.entry(subject.clone()).or_insert(0);
        *count = count.saturating_add(1);
    }

    fn has_failed(&self, subject: &Endpoint) -> bool {
        self.failures
            .read()
            .get(subject)
            .is_some_and(|&count| count >= self.config.failure_threshold)
    }

    fn on_membership_change(&self, subjects: &[Endpoint]) {
        let mut failures = self.failures.write();
        failures.retain(|subject, _| subjects.contains(subject));
        for subject in subjects {
            failures.entry(subject.clone()).or_insert(0);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
