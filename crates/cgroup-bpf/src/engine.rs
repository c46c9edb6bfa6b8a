use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use parking_lot::Mutex;
use strum::IntoEnumIterator;

use crate::{
    attach_type::AttachType,
    config::EngineConfig,
    effective::{ProgArray, Snapshot, compute_effective_progs},
    error::{AttachError, DenyReason, HierarchyError},
    hierarchy::{Cgroup, CgroupId, Hierarchy, Node},
    policy::{self, AttachMode, HookFlags},
    program::{ProgRef, Verdict},
};

/// Which list of programs a query returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    /// Programs attached to the cgroup itself
    Attached,
    /// Programs currently running for the cgroup
    Effective,
}

pub struct QueryResult<C> {
    /// Mode of the local attachments, `None` if nothing is attached
    pub mode: Option<AttachMode>,
    pub programs: Vec<ProgRef<C>>,
}

enum Change<C> {
    Attach { prog: ProgRef<C>, mode: AttachMode },
    Detach { prog: Option<ProgRef<C>> },
}

/// Local change applied before propagation, so it can be undone if
/// computing the new effective chains fails.
enum Pending<C> {
    Appended {
        old_flags: HookFlags,
    },
    Replaced {
        index: usize,
        old: Option<ProgRef<C>>,
    },
    Tombstoned {
        index: usize,
        prog: Option<ProgRef<C>>,
        old_flags: HookFlags,
    },
}

/// Attachment and propagation engine for a cgroup hierarchy.
///
/// Tree edits, attach and detach requests are serialized by a single lock.
/// Running the effective chains never takes it: see [`Cgroup::run`].
pub struct CgroupBpf<C> {
    hierarchy: Mutex<Hierarchy<C>>,
    /// Number of programs attached anywhere in the hierarchy
    active: AtomicUsize,
    config: EngineConfig,
}

impl<C> Default for CgroupBpf<C> {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl<C> CgroupBpf<C> {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            hierarchy: Mutex::new(Hierarchy::new()),
            active: AtomicUsize::new(0),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// True if at least one program is attached somewhere. Hooks can use it
    /// to skip the chain lookup entirely.
    pub fn enabled(&self) -> bool {
        self.active.load(Ordering::Acquire) > 0
    }

    pub fn active_programs(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn root(&self) -> Arc<Cgroup<C>> {
        self.hierarchy.lock().root().clone()
    }

    pub fn cgroup(&self, id: CgroupId) -> Result<Arc<Cgroup<C>>, HierarchyError> {
        Ok(self.hierarchy.lock().node(id)?.handle.clone())
    }

    pub fn lookup(&self, path: &str) -> Option<Arc<Cgroup<C>>> {
        let hierarchy = self.hierarchy.lock();
        let id = hierarchy.lookup(path)?;
        hierarchy.node(id).ok().map(|node| node.handle.clone())
    }

    /// All cgroups, sorted by path.
    pub fn cgroups(&self) -> Vec<Arc<Cgroup<C>>> {
        let hierarchy = self.hierarchy.lock();
        let mut cgroups: Vec<_> = hierarchy
            .ids()
            .filter_map(|id| hierarchy.node(id).ok())
            .map(|node| node.handle.clone())
            .collect();
        cgroups.sort_by(|a, b| a.path().cmp(b.path()));
        cgroups
    }

    pub fn parent(&self, id: CgroupId) -> Result<Option<CgroupId>, HierarchyError> {
        Ok(self.hierarchy.lock().node(id)?.parent)
    }

    /// Create the cgroup `name` under `parent`. It starts with the effective
    /// chains of its parent.
    pub fn mkdir(&self, parent: CgroupId, name: &str) -> Result<Arc<Cgroup<C>>, HierarchyError> {
        let mut hierarchy = self.hierarchy.lock();
        let id = hierarchy.insert(parent, name)?;
        Self::inherit(&mut hierarchy, id, parent)?;
        let cgroup = hierarchy.node(id)?.handle.clone();
        log::debug!("created {} ({id})", cgroup.path());
        Ok(cgroup)
    }

    /// Remove a cgroup without children, releasing its programs.
    ///
    /// Hooks still holding the [`Cgroup`] keep running, with nothing attached.
    pub fn rmdir(&self, id: CgroupId) -> Result<(), HierarchyError> {
        let mut hierarchy = self.hierarchy.lock();
        let node = hierarchy.remove(id)?;
        log::debug!("removed {} ({id})", node.handle.path());
        self.release(node);
        Ok(())
    }

    /// Copy the effective chains and override policy of `parent` to the
    /// newly created `cgroup`.
    fn inherit(
        hierarchy: &mut Hierarchy<C>,
        cgroup: CgroupId,
        parent: CgroupId,
    ) -> Result<(), HierarchyError> {
        let parent = hierarchy.node(parent)?;
        let inherited: Vec<_> = AttachType::iter()
            .map(|hook| {
                (
                    hook,
                    parent.handle.effective(hook).snapshot(),
                    parent.hook(hook).flags.disallow_override,
                )
            })
            .collect();
        let node = hierarchy.node_mut(cgroup)?;
        for (hook, progs, disallow_override) in inherited {
            node.hook_mut(hook).flags.disallow_override = disallow_override;
            node.handle.effective(hook).publish(ProgArray::from_vec(progs));
        }
        Ok(())
    }

    /// Drop every program attached to a removed cgroup, local and effective.
    fn release(&self, mut node: Node<C>) {
        for hook in AttachType::iter() {
            for prog in node.hook_mut(hook).progs.drain() {
                log::debug!("releasing {} from {hook} of {}", prog.name(), node.handle.path());
                self.active.fetch_sub(1, Ordering::AcqRel);
            }
            node.handle.effective(hook).publish(None);
        }
    }

    /// Attach `prog` to `hook` of `cgroup`, either stacking with the programs
    /// of the ancestors (`multi`) or replacing them while preventing
    /// descendants from attaching their own.
    pub fn attach(
        &self,
        cgroup: CgroupId,
        hook: AttachType,
        prog: ProgRef<C>,
        multi: bool,
    ) -> Result<(), AttachError> {
        self.attach_with_mode(cgroup, hook, prog, AttachMode::from_multi(multi))
    }

    pub fn attach_with_mode(
        &self,
        cgroup: CgroupId,
        hook: AttachType,
        prog: ProgRef<C>,
        mode: AttachMode,
    ) -> Result<(), AttachError> {
        self.update(cgroup, hook, Change::Attach { prog, mode })
    }

    /// Detach the most recently attached program of `hook` from `cgroup`.
    pub fn detach(&self, cgroup: CgroupId, hook: AttachType) -> Result<(), AttachError> {
        self.update(cgroup, hook, Change::Detach { prog: None })
    }

    /// Detach `prog` from `hook` of `cgroup`.
    pub fn detach_program(
        &self,
        cgroup: CgroupId,
        hook: AttachType,
        prog: &ProgRef<C>,
    ) -> Result<(), AttachError> {
        self.update(
            cgroup,
            hook,
            Change::Detach {
                prog: Some(prog.clone()),
            },
        )
    }

    pub fn query(
        &self,
        cgroup: CgroupId,
        hook: AttachType,
        kind: QueryKind,
    ) -> Result<QueryResult<C>, HierarchyError> {
        let hierarchy = self.hierarchy.lock();
        let node = hierarchy.node(cgroup)?;
        let state = node.hook(hook);
        let mode = (!state.progs.is_empty()).then(|| state.flags.mode());
        let programs = match kind {
            QueryKind::Attached => state.progs.iter().cloned().collect(),
            QueryKind::Effective => node.handle.effective(hook).snapshot(),
        };
        Ok(QueryResult { mode, programs })
    }

    /// Run the effective chain of `cgroup` for `hook`.
    ///
    /// This never blocks on attach requests: it runs whatever chain is
    /// published when it starts.
    pub fn run(&self, cgroup: &Cgroup<C>, hook: AttachType, ctx: &C) -> Verdict {
        if !self.enabled() {
            return Verdict::Accept;
        }
        cgroup.run(hook, ctx)
    }

    /// Change the local attachments of `cgroup` and republish the effective
    /// chains of its subtree, skipping descendants with their own programs.
    ///
    /// Failures leave the hierarchy as it was: the local change is applied
    /// tentatively and rolled back if any new chain can't be built.
    fn update(&self, cgroup: CgroupId, hook: AttachType, change: Change<C>) -> Result<(), AttachError> {
        let mut hierarchy = self.hierarchy.lock();
        let pending = Self::prepare(&mut hierarchy, cgroup, hook, change)?;

        let plan = match self.propagation_plan(&hierarchy, cgroup, hook) {
            Ok(plan) => plan,
            Err(err) => {
                log::warn!("update of {hook} for {cgroup} failed, rolling back: {err}");
                Self::rollback(&mut hierarchy, cgroup, hook, pending)?;
                return Err(err);
            }
        };

        let disallow_override = hierarchy.node(cgroup)?.hook(hook).flags.disallow_override;
        for (desc, array) in plan {
            let node = hierarchy.node_mut(desc)?;
            if desc != cgroup {
                node.hook_mut(hook).flags.disallow_override = disallow_override;
            }
            log::trace!(
                "publishing {} programs on {hook} of {}",
                array.as_ref().map_or(0, |array| array.len()),
                node.handle.path()
            );
            node.handle.effective(hook).publish(array);
        }

        let node = hierarchy.node_mut(cgroup)?;
        let handle = node.handle.clone();
        let path = handle.path();
        match pending {
            Pending::Appended { .. } => {
                self.active.fetch_add(1, Ordering::AcqRel);
                if let Some(prog) = node.hook(hook).progs.iter().last() {
                    log::debug!("attached {} to {hook} of {path}", prog.name());
                }
            }
            Pending::Replaced { old, .. } => {
                if let Some(old) = old {
                    log::debug!("replaced {} on {hook} of {path}", old.name());
                }
            }
            Pending::Tombstoned { prog, .. } => {
                node.hook_mut(hook).progs.purge();
                if let Some(prog) = prog {
                    self.active.fetch_sub(1, Ordering::AcqRel);
                    log::debug!("detached {} from {hook} of {path}", prog.name());
                }
            }
        }
        Ok(())
    }

    /// Validate `change` and apply it to the local list of `cgroup`.
    /// Nothing is modified if validation fails.
    fn prepare(
        hierarchy: &mut Hierarchy<C>,
        cgroup: CgroupId,
        hook: AttachType,
        change: Change<C>,
    ) -> Result<Pending<C>, AttachError> {
        let node = hierarchy.node(cgroup)?;
        let state = node.hook(hook);
        let count = state.checked_len(cgroup, hook)?;

        match change {
            Change::Attach { prog, mode } => {
                let flags = mode.flags();
                if !policy::hierarchy_allows_attach(hierarchy, cgroup, hook)? {
                    return Err(AttachError::PermissionDenied {
                        cgroup,
                        hook,
                        reason: DenyReason::AncestorDisallowsOverride,
                    });
                }
                if count > 0 && state.flags != flags {
                    return Err(AttachError::PermissionDenied {
                        cgroup,
                        hook,
                        reason: DenyReason::ModeMismatch,
                    });
                }
                if state.progs.contains(&prog) {
                    return Err(AttachError::AlreadyAttached {
                        cgroup,
                        hook,
                        name: prog.name().to_string(),
                    });
                }

                let state = hierarchy.node_mut(cgroup)?.hook_mut(hook);
                match state.progs.last_live() {
                    Some(index) if mode != AttachMode::Multi => {
                        let old = state.progs.replace(index, prog);
                        Ok(Pending::Replaced { index, old })
                    }
                    _ => {
                        let old_flags = state.flags;
                        state.progs.append(prog);
                        state.flags = flags;
                        Ok(Pending::Appended { old_flags })
                    }
                }
            }
            Change::Detach { prog } => {
                let index = match &prog {
                    Some(prog) => state.progs.position(prog),
                    None => state.progs.last_live(),
                }
                .ok_or(AttachError::NotFound { cgroup, hook })?;
                let inherited_disallow = match node.parent {
                    Some(parent) => hierarchy.node(parent)?.hook(hook).flags.disallow_override,
                    None => false,
                };

                let state = hierarchy.node_mut(cgroup)?.hook_mut(hook);
                let old_flags = state.flags;
                let prog = state.progs.tombstone(index);
                if state.progs.is_empty() {
                    state.flags = HookFlags {
                        allow_multi: false,
                        disallow_override: inherited_disallow,
                    };
                }
                Ok(Pending::Tombstoned {
                    index,
                    prog,
                    old_flags,
                })
            }
        }
    }

    fn rollback(
        hierarchy: &mut Hierarchy<C>,
        cgroup: CgroupId,
        hook: AttachType,
        pending: Pending<C>,
    ) -> Result<(), AttachError> {
        let state = hierarchy.node_mut(cgroup)?.hook_mut(hook);
        match pending {
            Pending::Appended { old_flags } => {
                state.progs.pop();
                state.flags = old_flags;
            }
            Pending::Replaced { index, old } => {
                if let Some(old) = old {
                    state.progs.replace(index, old);
                }
            }
            Pending::Tombstoned {
                index,
                prog,
                old_flags,
            } => {
                if let Some(prog) = prog {
                    state.progs.restore(index, prog);
                }
                state.flags = old_flags;
            }
        }
        Ok(())
    }

    /// Build, without publishing anything, the new effective chains of
    /// `cgroup` and of every descendant inheriting from it.
    ///
    /// Descendants without local programs all inherit the chain of `cgroup`,
    /// so it's computed once and copied for each of them.
    fn propagation_plan(
        &self,
        hierarchy: &Hierarchy<C>,
        cgroup: CgroupId,
        hook: AttachType,
    ) -> Result<Vec<(CgroupId, Snapshot<C>)>, AttachError> {
        let progs = compute_effective_progs(hierarchy, cgroup, hook, self.config.max_progs)?;
        let mut plan = Vec::new();
        let mut walk = hierarchy.descendants_pre(cgroup);
        while let Some((desc, node)) = walk.next() {
            if desc != cgroup && !node.hook(hook).progs.is_empty() {
                walk.skip_subtree();
                continue;
            }
            plan.push((desc, ProgArray::try_from_slice(&progs)?));
        }
        Ok(plan)
    }
}
