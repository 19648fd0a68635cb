//! Consistent-hash picker (C7, §4.7), grounded on the ring design
//! referenced from `grpc/balancer/multi/multi.go` in the original source.

use super::{noop_done, Balancer, DoneFn};
use crate::naming::Instance;
use std::collections::BTreeMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Virtual nodes per instance, smoothing out ring imbalance for small
/// instance sets.
const REPLICAS: u32 = 160;

fn hash_str(s: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    s.hash(&mut hasher);
    hasher.finish()
}

/// Builds a weighted ring over the given instances' addresses and routes
/// by hashing a caller-provided key into it. Rebuilt on every pick from
/// the live instance list so the ring always matches the current ready
/// set, with minor reshuffles as that set changes (§4.7).
pub struct HashPicker;

impl HashPicker {
    pub fn new() -> Self {
        HashPicker
    }

    fn build_ring(nodes: &[Instance]) -> BTreeMap<u64, usize> {
        let mut ring = BTreeMap::new();
        for (idx, node) in nodes.iter().enumerate() {
            for replica in 0..REPLICAS {
                let key = format!("{}#{}", node.addr(), replica);
                ring.insert(hash_str(&key), idx);
            }
        }
        ring
    }
}

impl Default for HashPicker {
    fn default() -> Self {
        Self::new()
    }
}

impl Balancer for HashPicker {
    fn pick(&self, nodes: &[Instance], hash_key: Option<&str>) -> (Option<Instance>, DoneFn) {
        if nodes.is_empty() {
            return (None, noop_done());
        }
        let key = match hash_key {
            Some(k) if !k.is_empty() => k,
            _ => {
                // No routing key supplied: fall back to the first ready
                // instance rather than synthesizing randomness for a
                // picker whose whole point is determinism.
                return (Some(nodes[0].clone()), noop_done());
            }
        };
        let ring = Self::build_ring(nodes);
        let target = hash_str(key);
        let idx = ring
            .range(target..)
            .next()
            .or_else(|| ring.iter().next())
            .map(|(_, &idx)| idx)
            .unwrap_or(0);
        (Some(nodes[idx].clone()), noop_done())
    }

    fn schema(&self) -> &'static str {
        "hash"
    }
}
