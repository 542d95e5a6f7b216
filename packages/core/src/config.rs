//! Configuration identity and history.
//!
//! A configuration is a specific set of members with their node ids. Its
//! identity is a content hash over the sorted identifier set, so any two
//! nodes holding the same membership compute the same id without
//! coordination. The append-only [`ConfigurationLog`] records how each
//! configuration was produced and classifies the relationship between two
//! remote histories.

use serde::{Deserialize, Serialize};

use crate::endpoint::NodeId;
use crate::hash::fnv1a_64;

// ---------------------------------------------------------------------------
// ConfigurationId
// ---------------------------------------------------------------------------

/// 64-bit identity of a configuration, derived from its `NodeId` set.
///
/// Two nodes with the same membership view compute the same id; any
/// membership delta produces a different one with overwhelming
/// probability. Used to fence stale and future messages.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ConfigurationId(u64);

impl ConfigurationId {
    /// Derives the id from the node identifiers of a configuration.
    ///
    /// Input order does not matter: identifiers are sorted before hashing.
    #[must_use]
    pub fn derive<'a, I>(ids: I) -> Self
    where
        I: IntoIterator<Item = &'a NodeId>,
    {
        let mut sorted: Vec<&NodeId> = ids.into_iter().collect();
        sorted.sort_unstable();

        let mut bytes = Vec::with_capacity(sorted.len() * 16);
        for id in sorted {
            bytes.extend_from_slice(id.as_bytes());
        }
        Self(fnv1a_64(&bytes))
    }

    /// Wraps a raw id received off the wire.
    #[must_use]
    pub const fn from_u64(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw 64-bit value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConfigurationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

// ---------------------------------------------------------------------------
// ConfigurationLog
// ---------------------------------------------------------------------------

/// One step in a configuration history: the resulting id and the
/// membership delta that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationEntry {
    pub id: ConfigurationId,
    pub added: Vec<NodeId>,
    pub removed: Vec<NodeId>,
}

/// Classification of two configuration histories relative to each other.
///
/// `FastForwardLeft` means the left (local) history strictly extends the
/// right one; `FastForwardRight` the reverse. Resolution of `Merge` and
/// `NoCommonAncestor` is left to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfigComparison {
    Equal,
    FastForwardLeft,
    FastForwardRight,
    NoCommonAncestor,
    Merge,
}

/// Append-only log of configuration ids and the deltas between them,
/// oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationLog {
    entries: Vec<ConfigurationEntry>,
}

impl ConfigurationLog {
    /// Creates a log seeded with a bootstrap configuration.
    #[must_use]
    pub fn bootstrap(id: ConfigurationId, initial: Vec<NodeId>) -> Self {
        Self {
            entries: vec![ConfigurationEntry {
                id,
                added: initial,
                removed: Vec::new(),
            }],
        }
    }

    /// Appends a configuration transition.
    pub fn record(&mut self, entry: ConfigurationEntry) {
        self.entries.push(entry);
    }

    /// Returns the newest configuration id, if any.
    #[must_use]
    pub fn head(&self) -> Option<ConfigurationId> {
        self.entries.last().map(|e| e.id)
    }

    /// Returns `true` if the given id appears anywhere in this history.
    #[must_use]
    pub fn contains(&self, id: ConfigurationId) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    /// All recorded entries, oldest first.
    #[must_use]
    pub fn entries(&self) -> &[ConfigurationEntry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Classifies this history (left) against a remote one (right).
    ///
    /// Matching heads compare `Equal`. Otherwise the remote history is
    /// walked newest-first for the first id also present locally -- the
    /// diverging commit. No shared id means `NoCommonAncestor`; a shared
    /// id equal to the local head means the remote strictly extends us
    /// (`FastForwardRight`); equal to the remote head means we strictly
    /// extend it (`FastForwardLeft`); anything else is a `Merge`.
    #[must_use]
    pub fn compare(&self, remote: &Self) -> ConfigComparison {
        let local_head = self.head();
        let remote_head = remote.head();
        if local_head == remote_head {
            return ConfigComparison::Equal;
        }

        let ancestor = remote
            .entries
            .iter()
            .rev()
            .map(|e| e.id)
            .find(|&id| self.contains(id));

        match ancestor {
            None => ConfigComparison::NoCommonAncestor,
            Some(id) if Some(id) == local_head => ConfigComparison::FastForwardRight,
            Some(id) if Some(id) == remote_head => ConfigComparison::FastForwardLeft,
            Some(_) => ConfigComparison::Merge,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
