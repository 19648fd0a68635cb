//! Uniform random picker (C7, §4.7), grounded on
//! `balancer/random/random.go` in the original source.

use super::{noop_done, Balancer, DoneFn};
use crate::naming::Instance;
use rand::Rng;

pub struct RandomPicker;

impl RandomPicker {
    pub fn new() -> Self {
        RandomPicker
    }
}

impl Default for RandomPicker {
    fn default() -> Self {
        Self::new()
    }
}

impl Balancer for RandomPicker {
    fn pick(&self, nodes: &[Instance], _hash_key: Option<&str>) -> (Option<Instance>, DoneFn) {
        if nodes.is_empty() {
            return (None, noop_done());
        }
        let idx = rand::thread_rng().gen_range(0..nodes.len());
        (Some(nodes[idx].clone()), noop_done())
    }

    fn schema(&self) -> &'static str {
        "random"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::{LocalEnv, Service, Status};
    use std::collections::HashMap;

    struct Env;
    impl LocalEnv for Env {
        fn namespace_id(&self) -> String {
            "ns".into()
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
    fn empty_input_returns_no_instance() {
        let picker = RandomPicker::new();
        let (pick, _done) = picker.pick(&[], None);
        assert!(pick.is_none());
    }

    #[test]
    fn never_synthesizes_an_instance() {
        let nodes = vec![instance("a"), instance("b")];
        let picker = RandomPicker::new();
        for _ in 0..50 {
            let (pick, _done) = picker.pick(&nodes, None);
            let pick = pick.unwrap();
            assert!(nodes.iter().any(|n| n.id == pick.id));
        }
    }
}
