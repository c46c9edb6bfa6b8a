#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use cgroup_bpf::{AttachType, BpfProgram, CgroupBpf, CgroupId, ProgRef, QueryKind};

pub const HOOK: AttachType = AttachType::InetEgress;

/// Context recording which programs ran on it.
#[derive(Default)]
pub struct Packet {
    pub port: u16,
    pub calls: Mutex<Vec<String>>,
}

impl Packet {
    pub fn to_port(port: u16) -> Self {
        Self {
            port,
            calls: Mutex::default(),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

/// Records its name on the packet and returns a fixed value.
pub struct Tagged {
    name: String,
    ret: u32,
}

impl BpfProgram<Packet> for Tagged {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, ctx: &Packet) -> u32 {
        ctx.calls.lock().unwrap().push(self.name.clone());
        self.ret
    }
}

pub fn prog(name: &str) -> ProgRef<Packet> {
    Arc::new(Tagged {
        name: name.to_string(),
        ret: 1,
    })
}

pub fn rejecting(name: &str) -> ProgRef<Packet> {
    Arc::new(Tagged {
        name: name.to_string(),
        ret: 0,
    })
}

pub fn names(progs: &[ProgRef<Packet>]) -> Vec<String> {
    progs.iter().map(|p| p.name().to_string()).collect()
}

pub fn effective(engine: &CgroupBpf<Packet>, cgroup: CgroupId) -> Vec<String> {
    names(&engine.query(cgroup, HOOK, QueryKind::Effective).unwrap().programs)
}

pub fn attached(engine: &CgroupBpf<Packet>, cgroup: CgroupId) -> Vec<String> {
    names(&engine.query(cgroup, HOOK, QueryKind::Attached).unwrap().programs)
}

/// Build a chain `/a/b/...` under the root and return the ids, root first.
pub fn chain(engine: &CgroupBpf<Packet>, depth: usize) -> Vec<CgroupId> {
    let mut ids = vec![CgroupId::ROOT];
    for i in 0..depth {
        let parent = *ids.last().unwrap();
        let name = format!("n{i}");
        ids.push(engine.mkdir(parent, &name).unwrap().id());
    }
    ids
}
