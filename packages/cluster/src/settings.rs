//! Protocol tunables.
//!
//! One flat struct with production defaults; everything time-valued is
//! stored as milliseconds and exposed through `Duration` helpers.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use vigil_core::RING_SEEDS;

/// Configuration for a cluster node.
///
/// The watermark parameters must satisfy `K >= H > L >= 0` with `K >= 3`;
/// [`Settings::validate`] enforces this before any component is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Number of monitoring rings (K). Every node has K observers and K
    /// subjects once the cluster is larger than K.
    pub ring_count: usize,
    /// Hard watermark (H): reports that make a subject ready.
    pub high_watermark: usize,
    /// Soft watermark (L): reports that mark a subject as in progress.
    pub low_watermark: usize,
    /// Interval between failure-detector ticks (ms).
    pub probe_interval_ms: u64,
    /// Deadline for a single outbound RPC (ms).
    pub base_rpc_timeout_ms: u64,
    /// How long an observer holds a phase-2 join open waiting for the
    /// commit (ms). Typically several multiples of the base RPC deadline.
    pub join_phase2_timeout_ms: u64,
    /// Delay between join attempts before jitter (ms).
    pub join_retry_backoff_ms: u64,
    /// Maximum number of full phase-1 + phase-2 join attempts.
    pub join_attempts: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ring_count: 10,
            high_watermark: 8,
            low_watermark: 1,
            probe_interval_ms: 1000,
            base_rpc_timeout_ms: 1000,
            join_phase2_timeout_ms: 5000,
            join_retry_backoff_ms: 500,
            join_attempts: 5,
        }
    }
}

/// Rejected settings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    #[error("ring count must be at least 3, got {0}")]
    RingCountTooSmall(usize),
    #[error("ring count {got} exceeds the {available} compiled-in ring seeds")]
    TooManyRings { got: usize, available: usize },
    #[error(
        "watermarks must satisfy K >= H > L >= 0, got K={ring_count}, H={high}, L={low}"
    )]
    InvalidWatermarks {
        ring_count: usize,
        high: usize,
        low: usize,
    },
}

impl Settings {
    /// Checks the watermark and ring constraints.
    ///
    /// # Errors
    ///
    /// Returns a [`SettingsError`] naming the violated constraint.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.ring_count < 3 {
            return Err(SettingsError::RingCountTooSmall(self.ring_count));
        }
        if self.ring_count > RING_SEEDS.len() {
            return Err(SettingsError::TooManyRings {
                got: self.ring_count,
                available: RING_SEEDS.len(),
            });
        }
        if self.high_watermark > self.ring_count || self.high_watermark <= self.low_watermark {
            return Err(SettingsError::InvalidWatermarks {
                ring_count: self.ring_count,
                high: self.high_watermark,
                low: self.low_watermark,
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    #[must_use]
    pub fn base_rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.base_rpc_timeout_ms)
    }

    #[must_use]
    pub fn join_phase2_timeout(&self) -> Duration {
        Duration::from_millis(self.join_phase2_timeout_ms)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
