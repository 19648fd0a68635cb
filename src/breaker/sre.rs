//! Google SRE adaptive throttling (C2, §4.2), grounded on
//! `breaker/sre_breaker.go` in the original source.

use crate::counter::RollingCounter;
use crate::error::{MeshError, Result};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

const STATE_CLOSED: i32 = 0;
const STATE_OPEN: i32 = 1;

#[derive(Clone, Debug)]
pub struct SreConfig {
    /// Total window covered by the rolling counter.
    pub window: Duration,
    /// Number of buckets the window is split into.
    pub bucket_count: usize,
    /// Minimum requests in-window before the breaker can start shedding.
    pub request: i64,
    /// Aggressiveness: K > 1 is more permissive (admits more before tripping).
    pub k: f64,
}

impl Default for SreConfig {
    fn default() -> Self {
        SreConfig {
            window: Duration::from_secs(10),
            bucket_count: 10,
            request: 100,
            k: 1.5,
        }
    }
}

pub struct SreBreaker {
    stat: RollingCounter,
    rng: Mutex<StdRng>,
    request: i64,
    k: f64,
    state: AtomicI32,
}

impl SreBreaker {
    pub fn new(cfg: &SreConfig) -> Self {
        SreBreaker {
            stat: RollingCounter::new(cfg.bucket_count, cfg.window),
            rng: Mutex::new(StdRng::from_entropy()),
            request: cfg.request,
            k: cfg.k,
            state: AtomicI32::new(STATE_CLOSED),
        }
    }

    fn summary(&self) -> (i64, i64) {
        let mut success = 0i64;
        let mut total = 0i64;
        self.stat.reduce(|b| {
            total += b.count;
            success += b.points.iter().filter(|&&p| p == 1).count() as i64;
        });
        (success, total)
    }

    /// Admits or rejects the next call per the SRE formula (§4.2).
    pub fn allow(&self) -> Result<()> {
        let (success, total) = self.summary();
        let accepts = self.k * success as f64;

        if total < self.request || (total as f64) < accepts {
            self.state
                .compare_exchange(STATE_OPEN, STATE_CLOSED, Ordering::SeqCst, Ordering::SeqCst)
                .ok();
            return Ok(());
        }
        self.state
            .compare_exchange(STATE_CLOSED, STATE_OPEN, Ordering::SeqCst, Ordering::SeqCst)
            .ok();

        let drop_probability = ((total as f64 - accepts) / (total as f64 + 1.0)).max(0.0);
        let sampled = {
            let mut rng = self.rng.lock();
            rng.gen::<f64>()
        };
        if sampled < drop_probability {
            Err(MeshError::CircuitBreakerOpen)
        } else {
            Ok(())
        }
    }

    pub fn mark_success(&self) {
        self.stat.add(1);
    }

    /// Locally-rejected calls also call this (via the breaker group
    /// middleware), deliberately steepening the drop ratio under
    /// sustained overload (§4.2, Open Question (c)).
    pub fn mark_failed(&self) {
        self.stat.add(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_below_request_threshold() {
        let cfg = SreConfig {
            window: Duration::from_secs(1),
            bucket_count: 10,
            request: 100,
            k: 1.5,
        };
        let b = SreBreaker::new(&cfg);
        for _ in 0..50 {
            b.mark_failed();
        }
        assert!(b.allow().is_ok());
    }

    #[test]
    fn steady_state_drop_rate_tracks_failure_rate() {
        let cfg = SreConfig {
            window: Duration::from_secs(3),
            bucket_count: 10,
            request: 100,
            k: 1.5,
        };
        let b = SreBreaker::new(&cfg);
        let mut admitted = 0u32;
        let mut rejected = 0u32;
        for i in 0..400u32 {
            match b.allow() {
                Ok(()) => {
                    admitted += 1;
                    if i % 2 == 0 {
                        b.mark_success();
                    } else {
                        b.mark_failed();
                    }
                }
                Err(_) => {
                    rejected += 1;
                    b.mark_failed();
                }
            }
        }
        let total = (admitted + rejected) as f64;
        let admit_rate = admitted as f64 / total;
        assert!(admit_rate > 0.0 && admit_rate < 1.0);
    }
}
