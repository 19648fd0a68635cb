//! Keyed breaker map with lazy construction and config hot-swap (C3, §4.3).

use super::sre::{SreBreaker, SreConfig};
use super::{Breaker, NoopBreaker};
use arc_swap::ArcSwap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct BreakerGroupConfig {
    pub sre: SreConfig,
    /// When true, `Get` hands back a no-op breaker for every key (§4.3).
    pub switch_off: bool,
}

impl Default for BreakerGroupConfig {
    fn default() -> Self {
        BreakerGroupConfig {
            sre: SreConfig::default(),
            switch_off: false,
        }
    }
}

/// Operation-key -> breaker map. A breaker is created from the group's
/// current config on first `get` for a key and lives until the group is
/// dropped (§3 Lifecycles).
pub struct BreakerGroup {
    config: ArcSwap<BreakerGroupConfig>,
    breakers: RwLock<HashMap<String, Arc<dyn Breaker>>>,
}

impl BreakerGroup {
    pub fn new(config: BreakerGroupConfig) -> Self {
        BreakerGroup {
            config: ArcSwap::from_pointee(config),
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Hot-swaps the group's config. Existing breakers keep their own
    /// already-constructed state (SRE params only apply to breakers
    /// created afterward) — mirrors the teacher's `reconcile_registry`
    /// pattern of updating shared config without tearing down live state.
    pub fn set_config(&self, config: BreakerGroupConfig) {
        self.config.store(Arc::new(config));
    }

    pub fn get(&self, operation: &str) -> Arc<dyn Breaker> {
        let cfg = self.config.load();
        if cfg.switch_off {
            return Arc::new(NoopBreaker);
        }
        if let Some(b) = self.breakers.read().get(operation) {
            return b.clone();
        }
        let mut write = self.breakers.write();
        write
            .entry(operation.to_string())
            .or_insert_with(|| Arc::new(SreBreaker::new(&cfg.sre)) as Arc<dyn Breaker>)
            .clone()
    }
}
