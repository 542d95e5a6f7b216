//! FNV-1a hash utilities and the compiled-in ring seeds.
//!
//! Ring order and configuration identity must be computed identically on
//! every node, so the hash is a fixed algorithm over canonical byte forms
//! rather than a per-process randomized hasher. FNV-1a (64-bit) is cheap,
//! has no dependencies, and its seeded variant yields the K independent
//! ring orderings.

use crate::endpoint::Endpoint;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// The ring seeds, one per monitoring ring.
///
/// A fixed sequence of distinct 64-bit constants compiled into every node;
/// ring `r` orders the member set by `ring_hash(RING_SEEDS[r], endpoint)`.
/// Changing these is a wire-protocol break.
pub const RING_SEEDS: [u64; 10] = [
    0x9e37_79b9_7f4a_7c15,
    0xbf58_476d_1ce4_e5b9,
    0x94d0_49bb_1331_11eb,
    0x2545_f491_4f6c_dd1d,
    0xff51_afd7_ed55_8ccd,
    0xc4ce_b9fe_1a85_ec53,
    0x8764_00d4_d2af_40d9,
    0x589d_5310_6a2e_b593,
    0xd6e8_feb8_6659_fd93,
    0xa3aa_c6cf_58d7_c285,
];

/// 64-bit FNV-1a over a byte slice.
#[must_use]
pub fn fnv1a_64(bytes: &[u8]) -> u64 {
    fold(FNV_OFFSET_BASIS, bytes)
}

/// 64-bit FNV-1a with the seed folded in ahead of the data.
///
/// Distinct seeds produce independent orderings of the same inputs, which
/// is what makes the K rings K different permutations.
#[must_use]
pub fn fnv1a_64_seeded(seed: u64, bytes: &[u8]) -> u64 {
    let hash = fold(FNV_OFFSET_BASIS, &seed.to_be_bytes());
    fold(hash, bytes)
}

/// Position of an endpoint on the ring derived from `seed`.
#[must_use]
pub fn ring_hash(seed: u64, endpoint: &Endpoint) -> u64 {
    fnv1a_64_seeded(seed, endpoint.canonical().as_bytes())
}

fn fold(mut hash: u64, bytes: &[u8]) -> u64 {
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a_matches_reference_vectors() {
        // Standard FNV-1a 64 test vectors.
        assert_eq!(fnv1a_64(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a_64(b"a"), 0xaf63_dc4c_8601_ec8c);
        assert_eq!(fnv1a_64(b"foobar"), 0x8594_4171_f739_67e8);
    }

    #[test]
    fn seeded_hash_differs_from_unseeded() {
        assert_ne!(fnv1a_64_seeded(RING_SEEDS[0], b"node"), fnv1a_64(b"node"));
    }

    #[test]
    fn distinct_seeds_give_distinct_hashes() {
        let input = b"10.0.0.1:5000";
        let mut hashes: Vec<u64> = RING_SEEDS
            .iter()
            .map(|&seed| fnv1a_64_seeded(seed, input))
            .collect();
        hashes.sort_unstable();
        hashes.dedup();
        assert_eq!(hashes.len(), RING_SEEDS.len());
    }

    #[test]
    fn ring_seeds_are_distinct() {
        let mut seeds = RING_SEEDS.to_vec();
        seeds.sort_unstable();
        seeds.dedup();
        assert_eq!(seeds.len(), RING_SEEDS.len());
    }

    #[test]
    fn ring_hash_uses_canonical_form() {
        let ep = Endpoint::new("10.0.0.1", 5000);
        assert_eq!(
            ring_hash(RING_SEEDS[3], &ep),
            fnv1a_64_seeded(RING_SEEDS[3], b"10.0.0.1:5000")
        );
    }

    #[test]
    fn ring_hash_is_stable_across_clones() {
        let ep = Endpoint::new("node-7.cluster.local", 9090);
        assert_eq!(
            ring_hash(RING_SEEDS[1], &ep),
            ring_hash(RING_SEEDS[1], &ep.clone())
        );
    }
}
