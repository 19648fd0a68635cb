//! Rule-based router (C5, §4.5), grounded on
//! `pkg/route/router/route.go` in the original source.

mod schema;

pub use schema::{Dest, DestItem, Rule, RuleGroup};

use crate::config::{ConfigSource, Watcher};
use crate::metadata::RequestContext;
use crate::naming::{Instance, LocalEnv, Service};
use arc_swap::ArcSwap;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Uniform contract implemented by both the rule router and the lane
/// engine (§4.8: "lane is itself a router implementing the same
/// interface").
pub trait Router: Send + Sync {
    fn select(&self, ctx: &RequestContext, svc: &Service, nodes: &[Instance]) -> Vec<Instance>;
}

/// Destination-weighted rule router.
pub struct RuleRouter {
    services: ArcSwap<HashMap<Service, RuleGroup>>,
    shutdown: CancellationToken,
}

impl RuleRouter {
    /// Subscribes to `route/{local_namespace}/` and spawns the background
    /// refresh loop (§5 "one loop in the Router").
    pub fn new(env: Arc<dyn LocalEnv>, source: Arc<dyn ConfigSource>) -> Arc<Self> {
        let path = format!("route/{}/", env.namespace_id());
        let watcher = source.subscribe(&path);
        let router = Arc::new(RuleRouter {
            services: ArcSwap::from_pointee(HashMap::new()),
            shutdown: CancellationToken::new(),
        });
        let task_router = router.clone();
        let task_env = env.clone();
        tokio::spawn(async move {
            task_router.refresh_loop(watcher, task_env).await;
        });
        router
    }

    pub fn close(&self) {
        self.shutdown.cancel();
    }

    async fn refresh_loop(&self, watcher: Arc<dyn Watcher>, env: Arc<dyn LocalEnv>) {
        loop {
            match watcher.watch(&self.shutdown).await {
                Ok(specs) => {
                    let mut services: HashMap<Service, RuleGroup> = HashMap::new();
                    let mut any_decode_error = false;
                    for spec in &specs {
                        match spec.decode::<Vec<RuleGroup>>() {
                            Ok(groups) if !groups.is_empty() => {
                                let group = groups.into_iter().next().unwrap();
                                let svc =
                                    Service::new(&group.namespace_id, &group.microservice_name, env.as_ref());
                                let register_global =
                                    !group.namespace_id.is_empty() && group.namespace_id != env.namespace_id();
                                if register_global {
                                    services.insert(Service::global(&group.microservice_name), group.clone());
                                }
                                services.insert(svc, group);
                            }
                            Ok(_) => {
                                warn!(key = %spec.key, "route config: empty rule group list, skipping");
                                any_decode_error = true;
                            }
                            Err(e) => {
                                error!(key = %spec.key, error = %e, "route config: decode failed, skipping spec");
                                any_decode_error = true;
                            }
                        }
                    }
                    if services.is_empty() && any_decode_error {
                        warn!("route config: batch collapsed to empty after skipping bad specs, keeping previous snapshot");
                        continue;
                    }
                    info!(services = services.len(), "route config: new snapshot, replacing");
                    self.services.store(Arc::new(services));
                }
                Err(e) => {
                    use crate::error::MeshError;
                    match e {
                        MeshError::WatchTimeout | MeshError::WatchClosed => {
                            debug!(error = %e, "route config: watcher terminated, exiting refresh loop");
                            watcher.close();
                            return;
                        }
                        other => {
                            error!(error = %other, "route config: watch failed, retrying");
                        }
                    }
                }
            }
        }
    }

    /// Weighted random selection among dests whose items all match an
    /// instance's metadata (§4.5 `matchByRule`, Open Question (b): a
    /// dest's weight counts once regardless of how many instances match).
    fn match_by_rule(rule: &Rule, nodes: &[Instance]) -> Vec<Instance> {
        struct Candidate {
            instances: Vec<Instance>,
            weight: i64,
        }
        let mut candidates: HashMap<&str, Candidate> = HashMap::new();
        let mut sum: i64 = 0;

        for node in nodes {
            for dest in &rule.dest_list {
                let matched = dest
                    .dest_item_list
                    .iter()
                    .all(|item| node.metadata_get(&item.field) == Some(item.value.as_str()));
                if !matched {
                    continue;
                }
                let entry = candidates.entry(dest.dest_id.as_str()).or_insert_with(|| {
                    sum += dest.dest_weight;
                    Candidate {
                        instances: Vec::new(),
                        weight: dest.dest_weight,
                    }
                });
                entry.instances.push(node.clone());
            }
        }

        if sum == 0 {
            return Vec::new();
        }

        let draw: i64 = rand::thread_rng().gen_range(0..sum);
        let mut remaining = draw;
        for candidate in candidates.values() {
            if remaining < candidate.weight {
                return candidate.instances.clone();
            }
            remaining -= candidate.weight;
        }
        unreachable!("match_by_rule: weight accounting exhausted without a winner");
    }
}

impl Router for RuleRouter {
    fn select(&self, ctx: &RequestContext, svc: &Service, nodes: &[Instance]) -> Vec<Instance> {
        if nodes.is_empty() {
            return nodes.to_vec();
        }
        let services = self.services.load();
        let Some(rule_group) = services.get(svc) else {
            return nodes.to_vec();
        };
        if rule_group.rule_list.is_empty() {
            return nodes.to_vec();
        }

        let mut hit = false;
        let mut selected = Vec::new();
        for rule in &rule_group.rule_list {
            if rule.tag_rule.hit(ctx) {
                hit = true;
                selected = Self::match_by_rule(rule, nodes);
                if !selected.is_empty() {
                    break;
                }
            }
        }

        if !hit {
            nodes.to_vec()
        } else if selected.is_empty() && rule_group.fallback_status {
            nodes.to_vec()
        } else {
            selected
        }
    }
}
