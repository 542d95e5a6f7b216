//! Vigil Cluster -- scalable distributed membership.
//!
//! Every node is monitored by K observers drawn from K independent hash
//! rings over the member set. Observers turn per-edge probe verdicts into
//! link-status reports, broadcast to all members; each member aggregates
//! them through a double-watermark buffer that releases whole correlated
//! batches at once; stable batches mutate the membership view atomically
//! and re-derive the configuration id that fences stale traffic. New
//! nodes bind to the current configuration through a two-phase join
//! against their future observers.
//!
//! - **View** ([`view`]): member set, K rings, observer/subject relation
//! - **Watermark** ([`watermark`]): stable-batch aggregation
//! - **Detector** ([`detector`], [`runner`]): pluggable edge liveness
//! - **Service** ([`service`]): the hub tying reports to view changes
//! - **Join** ([`join`]): two-phase bootstrap, bounded retries
//! - **Surface** ([`cluster`]): builder, handle, lifecycle
//! - **Plumbing** ([`traits`], [`broadcast`], [`transport`], [`events`])

pub mod broadcast;
pub mod cluster;
pub mod detector;
pub mod error;
pub mod events;
pub mod join;
pub mod runner;
pub mod service;
pub mod settings;
pub mod traits;
pub mod transport;
pub mod view;
pub mod watermark;

// ---------------------------------------------------------------------------
// Re-exports — flat public API
// ---------------------------------------------------------------------------

pub use broadcast::FanoutBroadcaster;
pub use cluster::{Cluster, ClusterBuilder};
pub use detector::{PingPongConfig, PingPongFailureDetector};
pub use error::MembershipError;
pub use events::{ClusterEvent, EventKind, SubscriberRegistry, ViewChangeSummary};
pub use join::{join_cluster, JoinOutcome};
pub use runner::FailureDetectorRunner;
pub use service::{MembershipService, ServiceOptions};
pub use settings::{Settings, SettingsError};
pub use traits::{Broadcaster, InboundHandler, LinkFailureDetector, MessagingClient, Transport};
pub use transport::InProcessNetwork;
pub use view::{MembershipView, ViewError};
pub use watermark::WatermarkBuffer;

// Core types most callers need alongside the cluster surface.
pub use vigil_core::{ConfigComparison, ConfigurationId, Endpoint, NodeId};

// ---------------------------------------------------------------------------
// Integration tests
// ---------------------------------------------------------------------------
