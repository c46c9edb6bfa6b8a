mod common;

use std::{
    sync::{
        Arc, Barrier,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
};

use cgroup_bpf::{BpfProgram, CgroupBpf, Verdict};

use common::*;

/// Readers keep running the chain of a leaf while a writer keeps growing and
/// shrinking the chain of the root: every run must see one of the two
/// published chains, never a mix of them.
#[test]
fn readers_see_whole_chains() {
    let engine = CgroupBpf::<Packet>::default();
    let ids = chain(&engine, 3);
    let leaf = engine.cgroup(ids[3]).unwrap();

    let a = prog("a");
    let b = prog("b");
    let c = prog("c");
    engine.attach(ids[0], HOOK, a, true).unwrap();
    engine.attach(ids[0], HOOK, b, true).unwrap();

    const READERS: usize = 4;
    let barrier = Barrier::new(READERS + 1);
    let done = AtomicBool::new(false);
    let runs = AtomicUsize::new(0);

    thread::scope(|s| {
        for _ in 0..READERS {
            s.spawn(|| {
                barrier.wait();
                while !done.load(Ordering::Acquire) {
                    let packet = Packet::to_port(80);
                    assert_eq!(engine.run(&leaf, HOOK, &packet), Verdict::Accept);
                    let calls = packet.calls();
                    assert!(
                        calls == ["a", "b"] || calls == ["a", "b", "c"],
                        "torn chain: {calls:?}"
                    );
                    runs.fetch_add(1, Ordering::Relaxed);
                }
            });
        }

        barrier.wait();
        for _ in 0..500 {
            engine.attach(ids[0], HOOK, c.clone(), true).unwrap();
            engine.detach_program(ids[0], HOOK, &c).unwrap();
        }
        done.store(true, Ordering::Release);
    });

    assert!(runs.load(Ordering::Relaxed) > 0);
    assert_eq!(effective(&engine, ids[3]), ["a", "b"]);
}

struct Counting {
    dropped: Arc<AtomicUsize>,
}

impl BpfProgram<Packet> for Counting {
    fn name(&self) -> &str {
        "counting"
    }

    fn run(&self, _ctx: &Packet) -> u32 {
        1
    }
}

impl Drop for Counting {
    fn drop(&mut self) {
        self.dropped.fetch_add(1, Ordering::SeqCst);
    }
}

/// Once detached and unreachable from any chain, a program is eventually
/// released together with the last reference to its cgroups.
#[test]
fn detached_program_is_released() {
    let dropped = Arc::new(AtomicUsize::new(0));
    {
        let engine = CgroupBpf::<Packet>::default();
        let ids = chain(&engine, 2);
        let prog: Arc<dyn BpfProgram<Packet>> = Arc::new(Counting {
            dropped: dropped.clone(),
        });
        engine.attach(ids[0], HOOK, prog.clone(), true).unwrap();
        assert_eq!(effective(&engine, ids[2]), ["counting"]);

        engine.detach_program(ids[0], HOOK, &prog).unwrap();
        assert!(effective(&engine, ids[2]).is_empty());
        drop(prog);
    }
    // Old chains are reclaimed lazily, keep pinning until they are collected.
    for _ in 0..100_000 {
        if dropped.load(Ordering::SeqCst) == 1 {
            break;
        }
        crossbeam_epoch::pin().flush();
        thread::yield_now();
    }
    assert_eq!(dropped.load(Ordering::SeqCst), 1);
}
