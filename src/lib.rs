//! Routing and resilience core for a service-mesh client library:
//! dynamic config subscription, rule/lane routing, client-side load
//! balancing, and adaptive circuit breaking. No transport of its own
//! (§1 Non-goals) — a host wires this crate's pieces around whatever
//! RPC stack it already uses.

pub mod balancer;
pub mod breaker;
pub mod config;
pub mod counter;
pub mod error;
pub mod lane;
pub mod metadata;
pub mod middleware;
pub mod naming;
pub mod picker;
pub mod registry;
pub mod route;
pub mod tagrule;

pub use error::{MeshError, Result};

use balancer::{Balancer, HashPicker, P2cPicker, RandomPicker};
use breaker::{BreakerGroup, BreakerGroupConfig};
use config::{ConfigSource, HttpKvClient, HttpKvConfig, KvConfigSource};
use lane::Lane;
use naming::LocalEnv;
use picker::PickerAdapter;
use registry::ReadyInstances;
use route::RuleRouter;
use std::sync::Arc;

/// Which `Balancer` a `MeshClient` picks instances with (§4.7).
#[derive(Clone, Copy, Debug, Default)]
pub enum BalancerKind {
    #[default]
    Random,
    P2c,
    ConsistentHash,
}

/// Bundles the whole client-side stack (C4-C8) behind one handle, the
/// way the teacher's `AppState` bundles config/registry/breaker for its
/// handlers. A host constructs one per process and keeps it alive for
/// the process's lifetime; dropping it does not cancel the background
/// loops owned by `RuleRouter`/`Lane`/`KvConfigSource` (call `shutdown`
/// for that).
pub struct MeshClient {
    pub config: Arc<dyn ConfigSource>,
    pub router: Arc<RuleRouter>,
    pub lane: Arc<Lane>,
    pub breakers: Arc<BreakerGroup>,
    pub ready: Arc<ReadyInstances>,
    pub picker: PickerAdapter,
}

impl MeshClient {
    /// Boots the config subscription, router, and lane engine against an
    /// HTTP KV backend (§4.4/§4.5/§4.6), the way the teacher's `main.rs`
    /// boots its registry and breaker state from `Config::load_from_path`.
    pub fn new(env: Arc<dyn LocalEnv>, kv: HttpKvConfig, balancer: BalancerKind) -> Result<Self> {
        let client = HttpKvClient::new(kv)?;
        let config: Arc<dyn ConfigSource> = Arc::new(KvConfigSource::new(client));
        let router = RuleRouter::new(env.clone(), config.clone());
        let lane = Lane::new(env, config.clone());
        let breakers = Arc::new(BreakerGroup::new(BreakerGroupConfig::default()));
        let ready = Arc::new(ReadyInstances::new());

        let balancer: Arc<dyn Balancer> = match balancer {
            BalancerKind::Random => Arc::new(RandomPicker::new()),
            BalancerKind::P2c => Arc::new(P2cPicker::new()),
            BalancerKind::ConsistentHash => Arc::new(HashPicker::new()),
        };
        let picker = PickerAdapter::new(router.clone(), lane.clone(), balancer, ready.clone());

        Ok(MeshClient {
            config,
            router,
            lane,
            breakers,
            ready,
            picker,
        })
    }

    /// Stops the router's and lane engine's background refresh loops
    /// (§5 cancellation). The config source's per-topic loops stop on
    /// their own once the last watcher detaches.
    pub fn shutdown(&self) {
        self.router.close();
        self.lane.close();
    }
}
