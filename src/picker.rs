//! Picker adapter (C8, §4.8): composes router, lane, and balancer behind
//! the transport's picker interface, grounded on
//! `grpc/balancer/multi/multi.go` in the original source.

use crate::balancer::{Balancer, DoneFn};
use crate::error::{MeshError, Result};
use crate::metadata::RequestContext;
use crate::naming::{Instance, Service};
use crate::registry::ReadyInstances;
use crate::route::Router;
use std::sync::Arc;
use tracing::debug;

/// What a transport calls once per RPC attempt (§4.8 `Pick`).
pub struct PickerAdapter {
    router: Arc<dyn Router>,
    lane: Arc<dyn Router>,
    balancer: Arc<dyn Balancer>,
    ready: Arc<ReadyInstances>,
}

impl PickerAdapter {
    pub fn new(
        router: Arc<dyn Router>,
        lane: Arc<dyn Router>,
        balancer: Arc<dyn Balancer>,
        ready: Arc<ReadyInstances>,
    ) -> Self {
        PickerAdapter {
            router,
            lane,
            balancer,
            ready,
        }
    }

    /// `svc` is the destination service read from context metadata by the
    /// caller (§4.8 step 1); `hash_key` is forwarded to the consistent-hash
    /// balancer variant if in use, falling back to `ctx.hash_key()` (§4.7)
    /// when the caller doesn't supply one explicitly.
    pub fn pick(
        &self,
        ctx: &RequestContext,
        svc: &Service,
        hash_key: Option<&str>,
    ) -> Result<(Instance, DoneFn)> {
        let all = self.ready.snapshot();
        let routed = self.router.select(ctx, svc, &all);
        let lane_filtered = self.lane.select(ctx, svc, &routed);

        if lane_filtered.is_empty() {
            debug!(svc = %svc, "picker: no instance available after routing/lane filtering");
            return Err(MeshError::NoInstanceAvailable);
        }

        let hash_key = hash_key.or_else(|| ctx.hash_key());
        let (picked, done) = self.balancer.pick(&lane_filtered, hash_key);
        match picked {
            Some(instance) => Ok((instance, done)),
            None => Err(MeshError::NoInstanceAvailable),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balancer::RandomPicker;
    use crate::naming::{LocalEnv, Status};
    use std::collections::HashMap;

    struct Env;
    impl LocalEnv for Env {
        fn namespace_id(&self) -> String {
            "ns".into()
        }
    }

    struct PassThrough;
    impl Router for PassThrough {
        fn select(&self, _ctx: &RequestContext, _svc: &Service, nodes: &[Instance]) -> Vec<Instance> {
            nodes.to_vec()
        }
    }

    fn instance(id: &str) -> Instance {
        Instance {
            service: Service::new("ns", "svc", &Env),
            id: id.into(),
            region: "r".into(),
            host: "h".into(),
            port: 1,
            metadata: HashMap::new(),
            status: Status::Up,
            tags: vec![],
        }
    }

    #[test]
    fn picker_never_synthesizes_instances_outside_the_ready_set() {
        let ready = Arc::new(ReadyInstances::new());
        ready.replace(vec![instance("a"), instance("b")]);
        let adapter = PickerAdapter::new(
            Arc::new(PassThrough),
            Arc::new(PassThrough),
            Arc::new(RandomPicker::new()),
            ready.clone(),
        );
        let ctx = RequestContext::new();
        let svc = Service::new("ns", "svc", &Env);
        for _ in 0..20 {
            let (picked, _done) = adapter.pick(&ctx, &svc, None).unwrap();
            assert!(["a", "b"].contains(&picked.id.as_str()));
        }
    }

    #[test]
    fn empty_ready_set_yields_no_instance_available() {
        let ready = Arc::new(ReadyInstances::new());
        let adapter = PickerAdapter::new(
            Arc::new(PassThrough),
            Arc::new(PassThrough),
            Arc::new(RandomPicker::new()),
            ready,
        );
        let ctx = RequestContext::new();
        let svc = Service::new("ns", "svc", &Env);
        assert!(matches!(adapter.pick(&ctx, &svc, None), Err(MeshError::NoInstanceAvailable)));
    }
}
