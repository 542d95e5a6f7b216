//! Joiner-side two-phase bootstrap.
//!
//! Phase 1 asks a seed whether the (endpoint, identifier) pair may join
//! and learns the current configuration id plus the joiner's K future
//! observers. Phase 2 fans out to every observer, tagged with the ring
//! number and the phase-1 configuration id, and races for the first
//! `SAFE_TO_JOIN` carrying a *different* configuration id -- proof that a
//! view containing the joiner has committed. Identity conflicts regrow a
//! fresh `NodeId`; the whole ceremony retries up to a bounded number of
//! attempts with jittered backoff.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{FuturesUnordered, StreamExt};
use rand::Rng;
use tracing::{debug, info, warn};

use vigil_core::messages::{
    JoinPayload, JoinStatusCode, MembershipMessage, MembershipResponse,
};
use vigil_core::{ConfigurationId, Endpoint, NodeId};

use crate::error::MembershipError;
use crate::settings::Settings;
use crate::traits::MessagingClient;

/// A successful join: the committed membership this node is now part of.
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    /// Members of the configuration that admitted us, with identifiers.
    pub members: Vec<(Endpoint, NodeId)>,
    pub configuration_id: ConfigurationId,
    /// The identifier this node was finally admitted under.
    pub node_id: NodeId,
}

/// How a failed attempt should be retried.
enum AttemptError {
    /// Retry with a freshly generated identifier.
    FreshIdentifier,
    /// Retry with the same identifier (transient failure, or a stale
    /// phase-2 record at the observers that will expire).
    SameIdentifier,
    /// Do not retry.
    Fatal(MembershipError),
}

/// Runs the full join ceremony against a seed.
///
/// # Errors
///
/// [`MembershipError::JoinRejected`] if a member refuses the join,
/// [`MembershipError::JoinAttemptsExhausted`] once the attempt bound is
/// spent.
pub async fn join_cluster(
    client: &Arc<dyn MessagingClient>,
    seed: &Endpoint,
    local: &Endpoint,
    metadata: &BTreeMap<String, String>,
    settings: &Settings,
) -> Result<JoinOutcome, MembershipError> {
    let mut node_id = NodeId::generate();

    for attempt in 1..=settings.join_attempts {
        match join_attempt(client, seed, local, node_id, metadata, settings).await {
            Ok(outcome) => {
                info!(
                    %local,
                    configuration = %outcome.configuration_id,
                    members = outcome.members.len(),
                    attempt,
                    "join complete"
                );
                return Ok(outcome);
            }
            Err(AttemptError::Fatal(error)) => return Err(error),
            Err(AttemptError::FreshIdentifier) => {
                node_id = NodeId::generate();
                debug!(%local, attempt, "retrying join with a fresh identifier");
            }
            Err(AttemptError::SameIdentifier) => {
                debug!(%local, attempt, "retrying join");
            }
        }

        if attempt < settings.join_attempts {
            let jitter = rand::rng().random_range(0..=settings.join_retry_backoff_ms / 2);
            tokio::time::sleep(Duration::from_millis(settings.join_retry_backoff_ms + jitter))
                .await;
        }
    }

    Err(MembershipError::JoinAttemptsExhausted {
        attempts: settings.join_attempts,
    })
}

async fn join_attempt(
    client: &Arc<dyn MessagingClient>,
    seed: &Endpoint,
    local: &Endpoint,
    node_id: NodeId,
    metadata: &BTreeMap<String, String>,
    settings: &Settings,
) -> Result<JoinOutcome, AttemptError> {
    // -- Phase 1 ------------------------------------------------------------
    let phase1 = MembershipMessage::Join(JoinPayload {
        sender: local.clone(),
        node_id,
        ring_number: None,
        configuration_id: None,
        metadata: None,
    });
    let response = match tokio::time::timeout(settings.base_rpc_timeout(), client.send(seed, phase1))
        .await
    {
        Ok(Ok(MembershipResponse::Join(response))) => response,
        Ok(Ok(other)) => {
            warn!(%seed, ?other, "seed answered phase 1 with an unexpected response");
            return Err(AttemptError::SameIdentifier);
        }
        Ok(Err(error)) => {
            debug!(%seed, %error, "phase 1 failed");
            return Err(AttemptError::SameIdentifier);
        }
        Err(_) => {
            debug!(%seed, "phase 1 timed out");
            return Err(AttemptError::SameIdentifier);
        }
    };

    match response.status {
        JoinStatusCode::SafeToJoin => {}
        JoinStatusCode::ConfigChanged | JoinStatusCode::UuidAlreadyInRing => {
            return Err(AttemptError::FreshIdentifier);
        }
        // A previous phase 2 may have died half way; the observers expire
        // the record, so the same identity is worth retrying.
        JoinStatusCode::HostnameAlreadyInRing => return Err(AttemptError::SameIdentifier),
        JoinStatusCode::MembershipRejected => {
            return Err(AttemptError::Fatal(MembershipError::JoinRejected(
                JoinStatusCode::MembershipRejected,
            )));
        }
    }

    let phase1_config = response.configuration_id;
    let observers = response.hosts;
    if observers.is_empty() {
        warn!(%seed, "phase 1 returned no observers");
        return Err(AttemptError::SameIdentifier);
    }

    // -- Phase 2 ------------------------------------------------------------
    // One message per (observer, ring); the same endpoint may observe the
    // joiner on several rings and gets one message for each.
    let mut responses: FuturesUnordered<_> = observers
        .iter()
        .enumerate()
        .map(|(ring, observer)| {
            let msg = MembershipMessage::Join(JoinPayload {
                sender: local.clone(),
                node_id,
                ring_number: Some(u32::try_from(ring).unwrap_or(u32::MAX)),
                configuration_id: Some(phase1_config),
                metadata: Some(metadata.clone()),
            });
            let client = Arc::clone(client);
            let observer = observer.clone();
            async move {
                let outcome =
                    tokio::time::timeout(settings.join_phase2_timeout(), client.send(&observer, msg))
                        .await;
                (observer, outcome)
            }
        })
        .collect();

    let mut saw_config_change = false;
    while let Some((observer, outcome)) = responses.next().await {
        match outcome {
            Ok(Ok(MembershipResponse::Join(response)))
                if response.status == JoinStatusCode::SafeToJoin
                    && response.configuration_id != phase1_config =>
            {
                if response.hosts.len() != response.identifiers.len() {
                    warn!(%observer, "phase 2 response with mismatched hosts and identifiers");
                    return Err(AttemptError::SameIdentifier);
                }
                return Ok(JoinOutcome {
                    members: response
                        .hosts
                        .into_iter()
                        .zip(response.identifiers)
                        .collect(),
                    configuration_id: response.configuration_id,
                    node_id,
                });
            }
            Ok(Ok(MembershipResponse::Join(response))) => {
                debug!(%observer, status = ?response.status, "phase 2 response without admission");
                if response.status == JoinStatusCode::ConfigChanged {
                    saw_config_change = true;
                }
            }
            Ok(Ok(other)) => {
                warn!(%observer, ?other, "observer answered phase 2 with an unexpected response");
            }
            Ok(Err(error)) => {
                debug!(%observer, %error, "phase 2 send failed");
            }
            Err(_) => {
                debug!(%observer, "phase 2 send timed out");
            }
        }
    }

    // No observer reported a committed view containing us.
    if saw_config_change {
        Err(AttemptError::FreshIdentifier)
    } else {
        Err(AttemptError::SameIdentifier)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
