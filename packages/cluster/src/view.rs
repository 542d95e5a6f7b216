//! The membership view and its K monitoring rings.
//!
//! A view holds the current member set, each member's stable identifier,
//! the set of every identifier ever admitted (replay rejection), and K
//! independent total orderings ("rings") over the members. Ring `r`
//! orders members by `(ring_hash(RING_SEEDS[r], endpoint), endpoint)`
//! ascending; the subject of a member on ring `r` is its immediate
//! successor there, and its observers are the K immediate predecessors,
//! one per ring.
//!
//! Rings are plain sorted arrays rebuilt point-wise on membership change;
//! at the cluster sizes of interest the O(n) insert is noise next to a
//! view change.

use std::collections::{BTreeMap, HashSet};

use vigil_core::{ring_hash, ConfigurationId, Endpoint, NodeId, RING_SEEDS};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Rejected view mutation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ViewError {
    #[error("endpoint {0} is already in the ring")]
    HostnameAlreadyInRing(Endpoint),
    #[error("identifier {0} was already admitted")]
    UuidAlreadyInRing(NodeId),
}

// ---------------------------------------------------------------------------
// MembershipView
// ---------------------------------------------------------------------------

/// One position on a ring. Ordering is (hash, endpoint): the endpoint
/// breaks hash ties so every node sorts identically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct RingEntry {
    hash: u64,
    endpoint: Endpoint,
}

/// The ordered member set with K observer/subject rings.
///
/// Views are replaced wholesale at each configuration change, never
/// mutated in place across a configuration boundary; `Clone` exists so
/// the service can build the successor view from the current one.
#[derive(Debug, Clone)]
pub struct MembershipView {
    ring_count: usize,
    rings: Vec<Vec<RingEntry>>,
    members: BTreeMap<Endpoint, NodeId>,
    seen: HashSet<NodeId>,
    configuration: ConfigurationId,
}

impl MembershipView {
    /// Creates an empty view with `ring_count` rings.
    ///
    /// # Panics
    ///
    /// Panics if `ring_count` is zero or exceeds the compiled-in ring
    /// seeds; `Settings::validate` rules both out before a view is built.
    #[must_use]
    pub fn new(ring_count: usize) -> Self {
        assert!(
            ring_count >= 1 && ring_count <= RING_SEEDS.len(),
            "ring count {ring_count} outside 1..={}",
            RING_SEEDS.len()
        );
        Self {
            ring_count,
            rings: vec![Vec::new(); ring_count],
            members: BTreeMap::new(),
            seen: HashSet::new(),
            configuration: ConfigurationId::derive(std::iter::empty()),
        }
    }

    #[must_use]
    pub fn ring_count(&self) -> usize {
        self.ring_count
    }

    /// Number of current members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    #[must_use]
    pub fn contains(&self, endpoint: &Endpoint) -> bool {
        self.members.contains_key(endpoint)
    }

    /// Returns `true` if the identifier was admitted at any point in this
    /// process's lifetime, including by members since removed.
    #[must_use]
    pub fn is_identifier_seen(&self, node_id: &NodeId) -> bool {
        self.seen.contains(node_id)
    }

    /// Current members in their canonical (sorted) order.
    #[must_use]
    pub fn members(&self) -> Vec<Endpoint> {
        self.members.keys().cloned().collect()
    }

    /// Identifiers aligned index-for-index with [`Self::members`].
    #[must_use]
    pub fn identifiers(&self) -> Vec<NodeId> {
        self.members.values().copied().collect()
    }

    #[must_use]
    pub fn identifier_of(&self, endpoint: &Endpoint) -> Option<NodeId> {
        self.members.get(endpoint).copied()
    }

    /// The memoised configuration id; recomputed on every mutation.
    #[must_use]
    pub fn configuration_id(&self) -> ConfigurationId {
        self.configuration
    }

    /// Admits a member into every ring.
    ///
    /// # Errors
    ///
    /// Fails with [`ViewError::HostnameAlreadyInRing`] for a present
    /// endpoint, [`ViewError::UuidAlreadyInRing`] for a replayed
    /// identifier.
    pub fn add(&mut self, endpoint: Endpoint, node_id: NodeId) -> Result<(), ViewError> {
        if self.members.contains_key(&endpoint) {
            return Err(ViewError::HostnameAlreadyInRing(endpoint));
        }
        if self.seen.contains(&node_id) {
            return Err(ViewError::UuidAlreadyInRing(node_id));
        }
        for (r, ring) in self.rings.iter_mut().enumerate() {
            let entry = RingEntry {
                hash: ring_hash(RING_SEEDS[r], &endpoint),
                endpoint: endpoint.clone(),
            };
            match ring.binary_search(&entry) {
                Err(pos) => ring.insert(pos, entry),
                Ok(_) => unreachable!("endpoint absent from members but present on ring {r}"),
            }
        }
        self.seen.insert(node_id);
        self.members.insert(endpoint, node_id);
        self.refresh_configuration();
        Ok(())
    }

    /// Removes a member from every ring. A no-op for absent endpoints.
    /// The identifier stays in the seen set to reject replays.
    pub fn remove(&mut self, endpoint: &Endpoint) {
        if self.members.remove(endpoint).is_none() {
            return;
        }
        for (r, ring) in self.rings.iter_mut().enumerate() {
            let entry = RingEntry {
                hash: ring_hash(RING_SEEDS[r], endpoint),
                endpoint: endpoint.clone(),
            };
            if let Ok(pos) = ring.binary_search(&entry) {
                ring.remove(pos);
            }
        }
        self.refresh_configuration();
    }

    fn refresh_configuration(&mut self) {
        self.configuration = ConfigurationId::derive(self.members.values());
    }

    /// The member's immediate successor on a ring (its subject there).
    /// `None` if the endpoint is not a member or the ring is out of range.
    #[must_use]
    pub fn ring_successor(&self, endpoint: &Endpoint, ring: usize) -> Option<Endpoint> {
        self.ring_neighbor(endpoint, ring, 1)
    }

    /// The member's immediate predecessor on a ring (its observer there).
    #[must_use]
    pub fn ring_predecessor(&self, endpoint: &Endpoint, ring: usize) -> Option<Endpoint> {
        self.ring_neighbor(endpoint, ring, -1)
    }

    fn ring_neighbor(&self, endpoint: &Endpoint, ring: usize, offset: isize) -> Option<Endpoint> {
        let entries = self.rings.get(ring)?;
        let entry = RingEntry {
            hash: ring_hash(RING_SEEDS[ring], endpoint),
            endpoint: endpoint.clone(),
        };
        let pos = entries.binary_search(&entry).ok()?;
        let len = entries.len();
        let neighbor = (pos + len).wrapping_add_signed(offset) % len;
        Some(entries[neighbor].endpoint.clone())
    }

    /// The member's K subjects, one per ring. Slots collapse onto the
    /// same endpoints in clusters of at most K members; a single-member
    /// view observes itself on every ring.
    #[must_use]
    pub fn subjects_of(&self, endpoint: &Endpoint) -> Vec<Endpoint> {
        (0..self.ring_count)
            .filter_map(|r| self.ring_successor(endpoint, r))
            .collect()
    }

    /// The member's K observers, one per ring.
    #[must_use]
    pub fn observers_of(&self, endpoint: &Endpoint) -> Vec<Endpoint> {
        (0..self.ring_count)
            .filter_map(|r| self.ring_predecessor(endpoint, r))
            .collect()
    }

    /// The K observers a non-member would have if it were inserted now.
    ///
    /// Phase-1 join uses this to name the joiner's future observers
    /// without mutating the view.
    #[must_use]
    pub fn expected_observers_of(&self, joiner: &Endpoint) -> Vec<Endpoint> {
        let mut observers = Vec::with_capacity(self.ring_count);
        for (r, ring) in self.rings.iter().enumerate() {
            if ring.is_empty() {
                continue;
            }
            let entry = RingEntry {
                hash: ring_hash(RING_SEEDS[r], joiner),
                endpoint: joiner.clone(),
            };
            // Present or not, the observer sits just before the (would-be)
            // position on the ring.
            let pos = match ring.binary_search(&entry) {
                Ok(i) | Err(i) => i,
            };
            observers.push(ring[(pos + ring.len() - 1) % ring.len()].endpoint.clone());
        }
        observers
    }

    /// The rings (if any) on which `observer` monitors `subject`.
    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub fn observer_rings(&self, observer: &Endpoint, subject: &Endpoint) -> Vec<u32> {
        (0..self.ring_count)
            .filter(|&r| self.ring_predecessor(subject, r).as_ref() == Some(observer))
            .map(|r| r as u32)
            .collect()
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

    fn id(n: u128) -> NodeId {
        NodeId::from_u128(n)
    }

    fn view_of(n: u16) -> MembershipView {
        let mut view = MembershipView::new(10);
        for i in 1..=n {
            view.add(ep(i), id(u128::from(i))).unwrap();
        }
        view
    }

    // -- membership bookkeeping --

    #[test]
    fn empty_view_has_no_members() {
        let view = MembershipView::new(10);
        assert!(view.is_empty());
        assert!(view.members().is_empty());
        assert!(view.subjects_of(&ep(1)).is_empty());
    }

    #[test]
    fn add_rejects_present_endpoint() {
        let mut view = view_of(3);
        let err = view.add(ep(1), id(99)).unwrap_err();
        assert_eq!(err, ViewError::HostnameAlreadyInRing(ep(1)));
    }

    #[test]
    fn add_rejects_seen_identifier() {
        let mut view = view_of(3);
        let err = view.add(ep(9), id(1)).unwrap_err();
        assert_eq!(err, ViewError::UuidAlreadyInRing(id(1)));
    }

    #[test]
    fn identifier_stays_seen_after_removal() {
        let mut view = view_of(3);
        view.remove(&ep(2));
        assert!(!view.contains(&ep(2)));

        // Same identifier under a fresh endpoint is still a replay.
        let err = view.add(ep(9), id(2)).unwrap_err();
        assert_eq!(err, ViewError::UuidAlreadyInRing(id(2)));
    }

    #[test]
    fn remove_absent_endpoint_is_a_no_op() {
        let mut view = view_of(3);
        let config = view.configuration_id();
        view.remove(&ep(9));
        assert_eq!(view.len(), 3);
        assert_eq!(view.configuration_id(), config);
    }

    #[test]
    fn members_are_sorted() {
        let mut view = MembershipView::new(10);
        view.add(ep(3), id(3)).unwrap();
        view.add(ep(1), id(1)).unwrap();
        view.add(ep(2), id(2)).unwrap();
        assert_eq!(view.members(), vec![ep(1), ep(2), ep(3)]);
        assert_eq!(view.identifiers(), vec![id(1), id(2), id(3)]);
    }

    // -- configuration identity --

    #[test]
    fn configuration_id_is_a_pure_function_of_identifiers() {
        let mut a = MembershipView::new(10);
        a.add(ep(1), id(1)).unwrap();
        a.add(ep(2), id(2)).unwrap();

        let mut b = MembershipView::new(10);
        b.add(ep(2), id(2)).unwrap();
        b.add(ep(1), id(1)).unwrap();

        assert_eq!(a.configuration_id(), b.configuration_id());
    }

    #[test]
    fn configuration_id_changes_on_every_mutation() {
        let mut view = view_of(2);
        let before = view.configuration_id();

        view.add(ep(3), id(3)).unwrap();
        let grown = view.configuration_id();
        assert_ne!(before, grown);

        view.remove(&ep(3));
        let shrunk = view.configuration_id();
        assert_ne!(grown, shrunk);
        assert_eq!(shrunk, before);
    }

    // -- rings --

    #[test]
    fn rings_are_permutations_of_the_member_set() {
        let view = view_of(9);
        for r in 0..view.ring_count() {
            let mut walked = vec![ep(1)];
            let mut cursor = ep(1);
            loop {
                cursor = view.ring_successor(&cursor, r).unwrap();
                if cursor == ep(1) {
                    break;
                }
                walked.push(cursor.clone());
            }
            walked.sort();
            assert_eq!(walked, view.members(), "ring {r} is not a permutation");
        }
    }

    #[test]
    fn successor_and_predecessor_are_inverse() {
        let view = view_of(7);
        for member in view.members() {
            for r in 0..view.ring_count() {
                let subject = view.ring_successor(&member, r).unwrap();
                assert_eq!(view.ring_predecessor(&subject, r).unwrap(), member);
            }
        }
    }

    #[test]
    fn rings_differ_from_each_other() {
        // With 9 members, at least one pair of rings must order members
        // differently; identical rings would defeat the multi-observer
        // design.
        let view = view_of(9);
        let orders: Vec<Vec<Endpoint>> = (0..view.ring_count())
            .map(|r| {
                let mut order = vec![ep(1)];
                let mut cursor = ep(1);
                for _ in 1..view.len() {
                    cursor = view.ring_successor(&cursor, r).unwrap();
                    order.push(cursor.clone());
                }
                order
            })
            .collect();
        assert!(orders.iter().any(|o| o != &orders[0]));
    }

    // -- observers / subjects --

    #[test]
    fn single_member_observes_itself_on_every_ring() {
        let view = view_of(1);
        let observers = view.observers_of(&ep(1));
        assert_eq!(observers.len(), 10);
        assert!(observers.iter().all(|o| *o == ep(1)));
        assert_eq!(view.subjects_of(&ep(1)), observers);
    }

    #[test]
    fn two_members_observe_each_other_on_every_ring() {
        let view = view_of(2);
        let observers = view.observers_of(&ep(1));
        assert_eq!(observers.len(), 10);
        assert!(observers.iter().all(|o| *o == ep(2)));
    }

    #[test]
    fn observers_fill_all_ring_slots_with_members() {
        let view = view_of(8);
        for member in view.members() {
            let observers = view.observers_of(&member);
            assert_eq!(observers.len(), view.ring_count());
            for o in &observers {
                assert!(view.contains(o));
                assert_ne!(*o, member, "no self-observation above one member");
            }
            let distinct: std::collections::HashSet<_> = observers.iter().collect();
            assert!(distinct.len() <= view.ring_count());
        }
    }

    #[test]
    fn observer_subject_relation_is_symmetric() {
        let view = view_of(6);
        for member in view.members() {
            for r in 0..view.ring_count() {
                let subject = view.ring_successor(&member, r).unwrap();
                let rings = view.observer_rings(&member, &subject);
                assert!(rings.contains(&u32::try_from(r).unwrap()));
            }
        }
    }

    #[test]
    fn expected_observers_match_post_insert_observers() {
        let mut view = view_of(6);
        let joiner = ep(42);

        let expected = view.expected_observers_of(&joiner);
        assert_eq!(expected.len(), view.ring_count());

        view.add(joiner.clone(), id(42)).unwrap();
        assert_eq!(view.observers_of(&joiner), expected);
    }

    #[test]
    fn expected_observers_of_member_are_its_observers() {
        let view = view_of(5);
        assert_eq!(view.expected_observers_of(&ep(3)), view.observers_of(&ep(3)));
    }

    #[test]
    fn observer_rings_cover_all_rings_in_two_member_cluster() {
        let view = view_of(2);
        let rings = view.observer_rings(&ep(1), &ep(2));
        assert_eq!(rings, (0..10).collect::<Vec<u32>>());
    }
}
