//! Traffic-lane engine (C6, §4.6), grounded on `route/lane/lane.go` in
//! the original source.

mod schema;

pub use schema::{LaneGroup, LaneInfo, LaneRule};

use crate::config::{ConfigSource, Watcher};
use crate::metadata::RequestContext;
use crate::naming::{Instance, LocalEnv, Service};
use crate::route::Router;
use arc_swap::ArcSwap;
use parking_lot::Mutex as PlMutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// The five derived structures of §4.6.a, published together so readers
/// never observe a torn view (§3 invariant, §5 shared-resource
/// discipline).
struct LaneSnapshot {
    /// All lanes known to the process, keyed by ID (`allLanes`).
    all_lanes: HashMap<String, LaneInfo>,
    /// Lanes this process's group enters (`effectiveLanes`/`lanes`).
    effective_lanes: HashMap<String, LaneInfo>,
    /// Namespace -> lane IDs touching it via a non-entrance group.
    namespaces: HashMap<String, HashSet<String>>,
    /// Group ID -> lane IDs that group participates in.
    groups: HashMap<String, HashSet<String>>,
    /// Effective lane rules, sorted `(priority asc, create_time asc)`.
    rules: Vec<LaneRule>,
    /// Per-destination enrollment memo: `services[lane_id][svc] = hit`.
    services: PlMutex<HashMap<String, HashMap<Service, bool>>>,
}

impl LaneSnapshot {
    fn empty() -> Self {
        LaneSnapshot {
            all_lanes: HashMap::new(),
            effective_lanes: HashMap::new(),
            namespaces: HashMap::new(),
            groups: HashMap::new(),
            rules: Vec::new(),
            services: PlMutex::new(HashMap::new()),
        }
    }
}

pub struct Lane {
    snapshot: ArcSwap<LaneSnapshot>,
    raw_rules: PlMutex<Vec<LaneRule>>,
    env: Arc<dyn LocalEnv>,
    shutdown: CancellationToken,
}

impl Lane {
    /// Subscribes to `lane/rule/` and `lane/info/` and spawns both
    /// background refresh loops (§5: "Two loops in the Lane engine").
    pub fn new(env: Arc<dyn LocalEnv>, source: Arc<dyn ConfigSource>) -> Arc<Self> {
        let rule_watcher = source.subscribe("lane/rule/");
        let info_watcher = source.subscribe("lane/info/");
        let lane = Arc::new(Lane {
            snapshot: ArcSwap::from_pointee(LaneSnapshot::empty()),
            raw_rules: PlMutex::new(Vec::new()),
            env,
            shutdown: CancellationToken::new(),
        });

        let rule_lane = lane.clone();
        tokio::spawn(async move { rule_lane.refresh_all_rule_loop(rule_watcher).await });
        let info_lane = lane.clone();
        tokio::spawn(async move { info_lane.refresh_all_lane_loop(info_watcher).await });
        lane
    }

    pub fn close(&self) {
        self.shutdown.cancel();
    }

    /// Scans effective rules in order; first tag-rule hit whose lane
    /// still exists wins (§4.6.b).
    pub fn get_lane_id(&self, ctx: &RequestContext) -> String {
        let snapshot = self.snapshot.load();
        for rule in &snapshot.rules {
            if !snapshot.all_lanes.contains_key(&rule.lane_id) {
                // Open Question (a): a rule referencing a vanished lane is
                // skipped silently, reproduced verbatim.
                continue;
            }
            if rule.tag_rule.hit(ctx) {
                return rule.lane_id.clone();
            }
        }
        String::new()
    }

    /// Filters `raw_rules` down to those whose lane is in the *effective*
    /// set (§4.6.a: "rules: all allRules whose lane_id belongs to
    /// effectiveLanes") — the lanes this process's own group enters, not
    /// every lane known to the process.
    fn refresh_rules_locked(effective_lanes: &HashMap<String, LaneInfo>, raw_rules: &[LaneRule]) -> Vec<LaneRule> {
        let effective_ids: HashSet<&str> = effective_lanes.keys().map(|s| s.as_str()).collect();
        let mut rules: Vec<LaneRule> = raw_rules
            .iter()
            .filter(|r| effective_ids.contains(r.lane_id.as_str()))
            .cloned()
            .collect();
        rules.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.create_time.cmp(&b.create_time)));
        rules
    }

    async fn refresh_all_rule_loop(&self, watcher: Arc<dyn Watcher>) {
        loop {
            match watcher.watch(&self.shutdown).await {
                Ok(specs) => {
                    let mut rules = Vec::new();
                    let mut any_error = false;
                    for spec in &specs {
                        match spec.decode::<LaneRule>() {
                            Ok(rule) => rules.push(rule),
                            Err(e) => {
                                error!(key = %spec.key, error = %e, "lane rule config: decode failed, skipping spec");
                                any_error = true;
                            }
                        }
                    }
                    if rules.is_empty() && any_error {
                        warn!("lane rule config: batch collapsed to empty after skipping bad specs, keeping previous");
                        continue;
                    }
                    debug!(count = rules.len(), "lane rule config: new rules, replacing");
                    *self.raw_rules.lock() = rules.clone();

                    let old = self.snapshot.load();
                    let new_rules = Self::refresh_rules_locked(&old.effective_lanes, &rules);
                    let new_snapshot = LaneSnapshot {
                        all_lanes: old.all_lanes.clone(),
                        effective_lanes: old.effective_lanes.clone(),
                        namespaces: old.namespaces.clone(),
                        groups: old.groups.clone(),
                        rules: new_rules,
                        services: PlMutex::new(old.services.lock().clone()),
                    };
                    self.snapshot.store(Arc::new(new_snapshot));
                }
                Err(e) => {
                    use crate::error::MeshError;
                    match e {
                        MeshError::WatchTimeout | MeshError::WatchClosed => {
                            debug!(error = %e, "lane rule config: watcher terminated, exiting");
                            watcher.close();
                            return;
                        }
                        other => error!(error = %other, "lane rule config: watch failed, retrying"),
                    }
                }
            }
        }
    }

    async fn refresh_all_lane_loop(&self, watcher: Arc<dyn Watcher>) {
        loop {
            match watcher.watch(&self.shutdown).await {
                Ok(specs) => {
                    let mut all_lanes = HashMap::new();
                    let mut any_error = false;
                    for spec in &specs {
                        match spec.decode::<LaneInfo>() {
                            Ok(lane) => {
                                all_lanes.insert(lane.id.clone(), lane);
                            }
                            Err(e) => {
                                error!(key = %spec.key, error = %e, "lane info config: decode failed, skipping spec");
                                any_error = true;
                            }
                        }
                    }
                    if all_lanes.is_empty() && any_error {
                        warn!("lane info config: batch collapsed to empty after skipping bad specs, keeping previous");
                        continue;
                    }
                    debug!(count = all_lanes.len(), "lane info config: new lanes, replacing");

                    let local_group = self.env.group_id();
                    let mut effective_lanes = HashMap::new();
                    let mut namespaces: HashMap<String, HashSet<String>> = HashMap::new();
                    let mut groups: HashMap<String, HashSet<String>> = HashMap::new();
                    for lane in all_lanes.values() {
                        for group in &lane.group_list {
                            if group.group_id == local_group && group.entrance {
                                effective_lanes.insert(lane.id.clone(), lane.clone());
                            }
                            if !group.entrance {
                                namespaces
                                    .entry(group.namespace_id.clone())
                                    .or_default()
                                    .insert(lane.id.clone());
                            }
                            groups
                                .entry(group.group_id.clone())
                                .or_default()
                                .insert(lane.id.clone());
                        }
                    }

                    let raw_rules = self.raw_rules.lock().clone();
                    let rules = Self::refresh_rules_locked(&effective_lanes, &raw_rules);

                    let new_snapshot = LaneSnapshot {
                        all_lanes,
                        effective_lanes,
                        namespaces,
                        groups,
                        rules,
                        // lane-info refresh resets the enrollment memo
                        // (§4.6.a "rebuilt on each lane-info refresh").
                        services: PlMutex::new(HashMap::new()),
                    };
                    self.snapshot.store(Arc::new(new_snapshot));
                }
                Err(e) => {
                    use crate::error::MeshError;
                    match e {
                        MeshError::WatchTimeout | MeshError::WatchClosed => {
                            debug!(error = %e, "lane info config: watcher terminated, exiting");
                            watcher.close();
                            return;
                        }
                        other => error!(error = %other, "lane info config: watch failed, retrying"),
                    }
                }
            }
        }
    }

    fn select_color(snapshot: &LaneSnapshot, nodes: &[Instance], lane: &LaneInfo) -> Vec<Instance> {
        nodes
            .iter()
            .filter(|node| {
                let group_id = node.metadata_get(crate::naming::KEY_GROUP_ID).unwrap_or("");
                snapshot
                    .groups
                    .get(group_id)
                    .map(|ids| ids.contains(&lane.id))
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    fn select_normal(snapshot: &LaneSnapshot, svc: &Service, nodes: &[Instance]) -> Vec<Instance> {
        let touches_namespace = snapshot
            .namespaces
            .get(&svc.namespace)
            .map(|lanes| !lanes.is_empty())
            .unwrap_or(false);
        if !touches_namespace {
            return nodes.to_vec();
        }
        nodes
            .iter()
            .filter(|node| {
                let group_id = node.metadata_get(crate::naming::KEY_GROUP_ID).unwrap_or("");
                !snapshot
                    .groups
                    .get(group_id)
                    .map(|ids| !ids.is_empty())
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }
}

impl Router for Lane {
    fn select(&self, ctx: &RequestContext, svc: &Service, nodes: &[Instance]) -> Vec<Instance> {
        if nodes.is_empty() {
            return nodes.to_vec();
        }
        let lane_id = ctx.lane_id().unwrap_or("");
        if lane_id.is_empty() {
            let snapshot = self.snapshot.load();
            return Self::select_normal(&snapshot, svc, nodes);
        }

        let snapshot = self.snapshot.load();
        let Some(lane) = snapshot.all_lanes.get(lane_id) else {
            error!(lane_id, "lane.select: no lane info found in allLanes");
            return nodes.to_vec();
        };

        let enrolled = {
            let cached = {
                let cache = snapshot.services.lock();
                cache.get(lane_id).and_then(|m| m.get(svc)).copied()
            };
            match cached {
                Some(hit) => hit,
                None => {
                    let hit = nodes.iter().any(|node| {
                        let app_id = node.metadata_get(crate::naming::KEY_APPLICATION_ID).unwrap_or("");
                        let ns_id = node.metadata_get(crate::naming::KEY_NAMESPACE_ID).unwrap_or("");
                        lane.group_list
                            .iter()
                            .any(|g| g.application_id == app_id && g.namespace_id == ns_id)
                    });
                    snapshot
                        .services
                        .lock()
                        .entry(lane_id.to_string())
                        .or_default()
                        .insert(svc.clone(), hit);
                    hit
                }
            }
        };

        if enrolled {
            Self::select_color(&snapshot, nodes, lane)
        } else {
            Self::select_normal(&snapshot, svc, nodes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::SystemKey;
    use crate::naming::Status;

    struct Env {
        namespace_id: String,
        group_id: String,
    }
    impl LocalEnv for Env {
        fn namespace_id(&self) -> String {
            self.namespace_id.clone()
        }
        fn group_id(&self) -> String {
            self.group_id.clone()
        }
    }

    fn lane_with(snapshot: LaneSnapshot, env: Arc<dyn LocalEnv>) -> Lane {
        Lane {
            snapshot: ArcSwap::from_pointee(snapshot),
            raw_rules: PlMutex::new(Vec::new()),
            env,
            shutdown: CancellationToken::new(),
        }
    }

    fn instance(svc: &Service, id: &str, group: &str, app_id: &str, ns_id: &str) -> Instance {
        let mut metadata = HashMap::new();
        metadata.insert(crate::naming::KEY_GROUP_ID.to_string(), group.to_string());
        metadata.insert(crate::naming::KEY_APPLICATION_ID.to_string(), app_id.to_string());
        metadata.insert(crate::naming::KEY_NAMESPACE_ID.to_string(), ns_id.to_string());
        Instance {
            service: svc.clone(),
            id: id.to_string(),
            region: "r1".into(),
            host: format!("10.0.0.{id}"),
            port: 8080,
            metadata,
            status: Status::Up,
            tags: vec![],
        }
    }

    /// Scenario 4 (§8): two lanes L1 (entrance), L2 (non-entrance) over
    /// namespaces ns1/ns2; service svcX enrolled in L1 via group g1.
    /// Lane-tagged traffic selects only g1; untagged traffic selects
    /// only groups in no lane.
    fn build_two_lane_world(local_group: &str) -> (LaneSnapshot, Service) {
        let svc = Service {
            namespace: "ns1".to_string(),
            name: "svcX".to_string(),
        };
        let l1 = LaneInfo {
            id: "L1".to_string(),
            group_list: vec![LaneGroup {
                group_id: local_group.to_string(),
                namespace_id: "ns1".to_string(),
                application_id: "app-g1".to_string(),
                entrance: true,
            }],
        };
        let l2 = LaneInfo {
            id: "L2".to_string(),
            group_list: vec![LaneGroup {
                group_id: "g2".to_string(),
                namespace_id: "ns2".to_string(),
                application_id: "app-g2".to_string(),
                entrance: false,
            }],
        };

        let mut all_lanes = HashMap::new();
        all_lanes.insert("L1".to_string(), l1.clone());
        all_lanes.insert("L2".to_string(), l2.clone());

        let mut effective_lanes = HashMap::new();
        effective_lanes.insert("L1".to_string(), l1);

        let mut namespaces: HashMap<String, HashSet<String>> = HashMap::new();
        namespaces.entry("ns2".to_string()).or_default().insert("L2".to_string());

        let mut groups: HashMap<String, HashSet<String>> = HashMap::new();
        groups.entry(local_group.to_string()).or_default().insert("L1".to_string());
        groups.entry("g2".to_string()).or_default().insert("L2".to_string());

        let snapshot = LaneSnapshot {
            all_lanes,
            effective_lanes,
            namespaces,
            groups,
            rules: Vec::new(),
            services: PlMutex::new(HashMap::new()),
        };
        (snapshot, svc)
    }

    #[test]
    fn lane_tagged_traffic_selects_only_enrolled_group() {
        let (snapshot, svc) = build_two_lane_world("g1");
        let env: Arc<dyn LocalEnv> = Arc::new(Env {
            namespace_id: "ns1".into(),
            group_id: "g1".into(),
        });
        let lane = lane_with(snapshot, env);

        let nodes = vec![
            instance(&svc, "1", "g1", "app-g1", "ns1"),
            instance(&svc, "2", "other", "app-other", "ns1"),
        ];
        let ctx = RequestContext::new().with_system(SystemKey::LaneId, "L1");
        let result = lane.select(&ctx, &svc, &nodes);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].metadata_get("group_id"), Some("g1"));
    }

    #[test]
    fn untagged_traffic_excludes_colored_groups_when_namespace_touched() {
        let (snapshot, _) = build_two_lane_world("g1");
        let env: Arc<dyn LocalEnv> = Arc::new(Env {
            namespace_id: "ns2".into(),
            group_id: "g2".into(),
        });
        let svc = Service {
            namespace: "ns2".to_string(),
            name: "svcY".to_string(),
        };
        let lane = lane_with(snapshot, env);

        let nodes = vec![
            instance(&svc, "1", "g2", "app-g2", "ns2"),
            instance(&svc, "2", "uncolored", "app-u", "ns2"),
        ];
        let ctx = RequestContext::new();
        let result = lane.select(&ctx, &svc, &nodes);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].metadata_get("group_id"), Some("uncolored"));
    }

    #[test]
    fn untagged_traffic_passes_through_when_namespace_untouched() {
        let (snapshot, svc) = build_two_lane_world("g1");
        let env: Arc<dyn LocalEnv> = Arc::new(Env {
            namespace_id: "ns1".into(),
            group_id: "g1".into(),
        });
        let lane = lane_with(snapshot, env);
        let nodes = vec![instance(&svc, "1", "g1", "app-g1", "ns1")];
        let ctx = RequestContext::new();
        let result = lane.select(&ctx, &svc, &nodes);
        assert_eq!(result.len(), 1);
    }

    #[test]
    fn missing_lane_info_falls_back_to_full_node_set() {
        let (snapshot, svc) = build_two_lane_world("g1");
        let env: Arc<dyn LocalEnv> = Arc::new(Env {
            namespace_id: "ns1".into(),
            group_id: "g1".into(),
        });
        let lane = lane_with(snapshot, env);
        let nodes = vec![instance(&svc, "1", "g1", "app-g1", "ns1")];
        let ctx = RequestContext::new().with_system(SystemKey::LaneId, "L-unknown");
        let result = lane.select(&ctx, &svc, &nodes);
        assert_eq!(result.len(), 1);
    }

    #[test]
    fn get_lane_id_skips_rule_referencing_vanished_lane() {
        let (mut snapshot, _svc) = build_two_lane_world("g1");
        snapshot.rules = vec![
            LaneRule {
                lane_id: "L-ghost".to_string(),
                priority: 0,
                create_time: 0,
                tag_rule: crate::tagrule::TagRule::Always,
            },
            LaneRule {
                lane_id: "L1".to_string(),
                priority: 1,
                create_time: 0,
                tag_rule: crate::tagrule::TagRule::Always,
            },
        ];
        let env: Arc<dyn LocalEnv> = Arc::new(Env {
            namespace_id: "ns1".into(),
            group_id: "g1".into(),
        });
        let lane = lane_with(snapshot, env);
        assert_eq!(lane.get_lane_id(&RequestContext::new()), "L1");
    }

    /// §4.6.a: `rules` is filtered against `effectiveLanes`, not
    /// `allLanes`. A rule referencing L2 (known to the process but not
    /// entered by the local group) must never surface — a non-entrance
    /// process must not stamp a lane ID it isn't the entrance for.
    #[test]
    fn refresh_rules_locked_filters_by_effective_lanes_not_all_lanes() {
        let (snapshot, _svc) = build_two_lane_world("g1");
        let raw_rules = vec![
            LaneRule {
                lane_id: "L2".to_string(),
                priority: 0,
                create_time: 0,
                tag_rule: crate::tagrule::TagRule::Always,
            },
            LaneRule {
                lane_id: "L1".to_string(),
                priority: 1,
                create_time: 0,
                tag_rule: crate::tagrule::TagRule::Always,
            },
        ];
        let effective = Lane::refresh_rules_locked(&snapshot.effective_lanes, &raw_rules);
        assert_eq!(effective.len(), 1);
        assert_eq!(effective[0].lane_id, "L1");

        // Sanity: L2 is present in all_lanes (known to the process) but
        // must still be excluded because it is not in effective_lanes.
        assert!(snapshot.all_lanes.contains_key("L2"));
    }
}
