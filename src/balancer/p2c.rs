//! Power-of-two-choices picker with EWMA latency tracking (C7, §4.7).
//!
//! Grounded on the original's `balancer/p2c` package (not present in the
//! retrieved source, only referenced from `grpc/balancer/multi/multi.go`);
//! the EWMA-of-latency-times-inflight load metric follows the same
//! power-of-two-choices design used throughout the gRPC/Finagle lineage
//! this corpus's balancers descend from.

use super::{Balancer, DoneFn, DoneInfo};
use crate::naming::Instance;
use parking_lot::Mutex;
use rand::seq::index::sample;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// EWMA decay half-life. Shorter reacts faster to changing latency,
/// longer smooths out noise.
const DECAY: f64 = 0.5;

struct Stats {
    ewma_micros: AtomicI64,
    inflight: AtomicI64,
    last_update: Mutex<Instant>,
}

impl Stats {
    fn new() -> Self {
        Stats {
            ewma_micros: AtomicI64::new(0),
            inflight: AtomicI64::new(0),
            last_update: Mutex::new(Instant::now()),
        }
    }

    fn load(&self) -> f64 {
        let ewma = self.ewma_micros.load(Ordering::Relaxed).max(1) as f64;
        let inflight = self.inflight.load(Ordering::Relaxed).max(0) as f64;
        ewma * (inflight + 1.0)
    }

    fn observe(&self, latency_micros: i64) {
        let mut last = self.last_update.lock();
        let elapsed = last.elapsed().as_secs_f64();
        *last = Instant::now();
        let prev = self.ewma_micros.load(Ordering::Relaxed);
        if prev == 0 {
            self.ewma_micros.store(latency_micros, Ordering::Relaxed);
            return;
        }
        let weight = (-elapsed / DECAY).exp();
        let next = (prev as f64 * weight) + (latency_micros as f64 * (1.0 - weight));
        self.ewma_micros.store(next as i64, Ordering::Relaxed);
    }
}

pub struct P2cPicker {
    stats: Mutex<HashMap<String, Arc<Stats>>>,
}

impl P2cPicker {
    pub fn new() -> Self {
        P2cPicker {
            stats: Mutex::new(HashMap::new()),
        }
    }

    fn stats_for(&self, addr: &str) -> Arc<Stats> {
        let mut map = self.stats.lock();
        map.entry(addr.to_string())
            .or_insert_with(|| Arc::new(Stats::new()))
            .clone()
    }
}

impl Default for P2cPicker {
    fn default() -> Self {
        Self::new()
    }
}

impl Balancer for P2cPicker {
    fn pick(&self, nodes: &[Instance], _hash_key: Option<&str>) -> (Option<Instance>, DoneFn) {
        if nodes.is_empty() {
            return (None, Box::new(|_| {}));
        }
        if nodes.len() == 1 {
            let stats = self.stats_for(&nodes[0].addr());
            return self.finalize_pick(nodes[0].clone(), stats);
        }

        let mut rng = rand::thread_rng();
        let idxs = sample(&mut rng, nodes.len(), 2);
        let a = &nodes[idxs.index(0)];
        let b = &nodes[idxs.index(1)];
        let stats_a = self.stats_for(&a.addr());
        let stats_b = self.stats_for(&b.addr());

        let (winner, stats) = if stats_a.load() <= stats_b.load() {
            (a.clone(), stats_a)
        } else {
            (b.clone(), stats_b)
        };
        self.finalize_pick(winner, stats)
    }

    fn schema(&self) -> &'static str {
        "p2c"
    }
}

impl P2cPicker {
    fn finalize_pick(&self, node: Instance, stats: Arc<Stats>) -> (Option<Instance>, DoneFn) {
        stats.inflight.fetch_add(1, Ordering::Relaxed);
        let done: DoneFn = Box::new(move |info: DoneInfo| {
            stats.inflight.fetch_sub(1, Ordering::Relaxed);
            if let Some(latency) = info.latency {
                stats.observe(latency.as_micros() as i64);
            }
        });
        (Some(node), done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::{LocalEnv, Service, Status};
    use std::collections::HashMap as Map;
    use std::time::Duration;

    struct Env;
    impl LocalEnv for Env {
        fn namespace_id(&self) -> String {
            "ns".into()
        }
    }

    fn instance(host: &str) -> Instance {
        Instance {
            service: Service::new("ns", "svc", &Env),
            id: host.into(),
            region: "r".into(),
            host: host.into(),
            port: 1,
            metadata: Map::new(),
            status: Status::Up,
            tags: vec![],
        }
    }

    #[test]
    fn single_node_always_picked() {
        let picker = P2cPicker::new();
        let nodes = vec![instance("a")];
        let (pick, done) = picker.pick(&nodes, None);
        assert_eq!(pick.unwrap().host, "a");
        done(DoneInfo {
            latency: Some(Duration::from_millis(5)),
            err: false,
        });
    }

    #[test]
    fn prefers_lower_load_candidate_over_time() {
        let picker = P2cPicker::new();
        let nodes = vec![instance("slow"), instance("fast")];

        // Seed "slow" with high latency observations via direct picks.
        for _ in 0..5 {
            let stats = picker.stats_for("slow:1");
            stats.observe(50_000);
        }
        for _ in 0..5 {
            let stats = picker.stats_for("fast:1");
            stats.observe(500);
        }

        let mut fast_wins = 0;
        for _ in 0..20 {
            let (pick, done) = picker.pick(&nodes, None);
            let pick = pick.unwrap();
            if pick.host == "fast" {
                fast_wins += 1;
            }
            done(DoneInfo {
                latency: None,
                err: false,
            });
        }
        assert!(fast_wins > 10);
    }
}
