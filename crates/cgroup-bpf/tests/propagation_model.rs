//! Compare the engine against a naive model of attach and propagation on
//! random trees and random sequences of requests.
mod common;

use cgroup_bpf::{AttachMode, CgroupBpf, CgroupId, ProgRef};
use proptest::prelude::*;

use common::*;

#[derive(Debug, Clone)]
enum Op {
    Attach {
        node: usize,
        prog: usize,
        mode: AttachMode,
    },
    Detach {
        node: usize,
    },
}

fn mode_strategy() -> impl Strategy<Value = AttachMode> {
    prop_oneof![
        Just(AttachMode::Exclusive),
        Just(AttachMode::Override),
        Just(AttachMode::Multi),
    ]
}

fn op_strategy(nodes: usize, progs: usize) -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..nodes, 0..progs, mode_strategy())
            .prop_map(|(node, prog, mode)| Op::Attach { node, prog, mode }),
        1 => (0..nodes).prop_map(|node| Op::Detach { node }),
    ]
}

/// Parent of node `i + 1` is one of the nodes `0..=i`, node 0 is the root.
fn tree_strategy() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(any::<prop::sample::Index>(), 1..8).prop_map(|indexes| {
        indexes
            .iter()
            .enumerate()
            .map(|(i, index)| index.index(i + 1))
            .collect()
    })
}

#[derive(Default)]
struct Model {
    parent: Vec<Option<usize>>,
    children: Vec<Vec<usize>>,
    own: Vec<Vec<usize>>,
    mode: Vec<Option<AttachMode>>,
    effective: Vec<Vec<usize>>,
}

impl Model {
    fn new(parents: &[usize]) -> Self {
        let mut model = Model::default();
        model.add(None);
        for parent in parents {
            model.add(Some(*parent));
        }
        model
    }

    fn add(&mut self, parent: Option<usize>) {
        let id = self.parent.len();
        self.parent.push(parent);
        self.children.push(Vec::new());
        self.own.push(Vec::new());
        self.mode.push(None);
        self.effective.push(Vec::new());
        if let Some(parent) = parent {
            self.children[parent].push(id);
        }
    }

    fn allowed(&self, node: usize) -> bool {
        let mut next = self.parent[node];
        while let Some(p) = next {
            match self.mode[p] {
                Some(AttachMode::Multi) => return true,
                Some(mode) => return mode == AttachMode::Override,
                None => next = self.parent[p],
            }
        }
        true
    }

    fn chain(&self, node: usize) -> Vec<usize> {
        let mut chain = Vec::new();
        let mut next = Some(node);
        while let Some(n) = next {
            let multi = self.mode[n] == Some(AttachMode::Multi);
            if chain.is_empty() || multi {
                chain.extend(&self.own[n]);
                if !chain.is_empty() && !multi {
                    break;
                }
            }
            next = self.parent[n];
        }
        chain
    }

    fn propagate(&mut self, node: usize) {
        let chain = self.chain(node);
        let mut stack = vec![node];
        while let Some(n) = stack.pop() {
            if n != node && !self.own[n].is_empty() {
                continue;
            }
            self.effective[n] = chain.clone();
            stack.extend(self.children[n].iter().rev());
        }
    }

    fn apply(&mut self, op: &Op) -> bool {
        let node = match *op {
            Op::Attach { node, .. } | Op::Detach { node } => node,
        };
        match *op {
            Op::Attach { prog, mode, .. } => {
                if !self.allowed(node)
                    || self.mode[node].is_some_and(|current| current != mode)
                    || self.own[node].contains(&prog)
                {
                    return false;
                }
                if mode == AttachMode::Multi || self.own[node].is_empty() {
                    self.own[node].push(prog);
                } else {
                    self.own[node] = vec![prog];
                }
                self.mode[node] = Some(mode);
            }
            Op::Detach { .. } => {
                if self.own[node].pop().is_none() {
                    return false;
                }
                if self.own[node].is_empty() {
                    self.mode[node] = None;
                }
            }
        }
        self.propagate(node);
        true
    }
}

fn prog_name(index: usize) -> String {
    format!("p{index}")
}

proptest! {
    #[test]
    fn engine_matches_model(
        parents in tree_strategy(),
        ops in prop::collection::vec(op_strategy(8, 4), 1..40),
    ) {
        let engine = CgroupBpf::<Packet>::default();
        let mut ids = vec![CgroupId::ROOT];
        for (i, parent) in parents.iter().enumerate() {
            let id = engine.mkdir(ids[*parent], &format!("n{i}")).unwrap().id();
            ids.push(id);
        }
        let pool: Vec<ProgRef<Packet>> = (0..4).map(|i| prog(&prog_name(i))).collect();
        let mut model = Model::new(&parents);

        for op in ops {
            let op = match op {
                Op::Attach { node, prog, mode } => Op::Attach { node: node % ids.len(), prog, mode },
                Op::Detach { node } => Op::Detach { node: node % ids.len() },
            };
            let result = match op {
                Op::Attach { node, prog, mode } => {
                    engine.attach_with_mode(ids[node], HOOK, pool[prog].clone(), mode)
                }
                Op::Detach { node } => engine.detach(ids[node], HOOK),
            };
            let expected = model.apply(&op);
            prop_assert_eq!(result.is_ok(), expected, "{:?} returned {:?}", op, result);

            for (node, id) in ids.iter().enumerate() {
                let expected: Vec<String> = model.effective[node].iter().map(|p| prog_name(*p)).collect();
                prop_assert_eq!(effective(&engine, *id), expected, "effective chain of node {}", node);
                let expected: Vec<String> = model.own[node].iter().map(|p| prog_name(*p)).collect();
                prop_assert_eq!(attached(&engine, *id), expected, "attached programs of node {}", node);
            }
            let active: usize = model.own.iter().map(Vec::len).sum();
            prop_assert_eq!(engine.active_programs(), active);
        }
    }

    /// A cgroup with local programs always runs them first, in attach order.
    #[test]
    fn own_programs_run_first(
        parents in tree_strategy(),
        ops in prop::collection::vec(op_strategy(8, 4), 1..40),
    ) {
        let engine = CgroupBpf::<Packet>::default();
        let mut ids = vec![CgroupId::ROOT];
        for (i, parent) in parents.iter().enumerate() {
            ids.push(engine.mkdir(ids[*parent], &format!("n{i}")).unwrap().id());
        }
        let pool: Vec<ProgRef<Packet>> = (0..4).map(|i| prog(&prog_name(i))).collect();

        for op in ops {
            let _ = match op {
                Op::Attach { node, prog, mode } => {
                    engine.attach_with_mode(ids[node % ids.len()], HOOK, pool[prog].clone(), mode)
                }
                Op::Detach { node } => engine.detach(ids[node % ids.len()], HOOK),
            };
        }
        for id in &ids {
            let own = attached(&engine, *id);
            let effective = effective(&engine, *id);
            prop_assert!(effective.starts_with(&own), "{:?} doesn't start with {:?}", effective, own);
        }
    }
}
