//! Effective chains: the flattened list of programs which actually runs for
//! a cgroup and a hook.
//!
//! A chain is computed by walking from the cgroup up to the root. A cgroup
//! contributes its programs if nothing was collected yet or if it was
//! attached in multi mode, so a single-program ancestor yields to programs
//! attached further down. A single program collected from a non-multi cgroup
//! ends the walk: it shadows everything above it. The closest cgroup comes
//! first in the result.
//!
//! Published chains are immutable. Each cgroup owns one [`EffectiveSlot`]
//! per hook holding an epoch-protected pointer to the current chain: readers
//! pin the epoch, load the pointer and run the chain without taking any lock,
//! while writers swap in a new chain and defer the destruction of the old one
//! until every reader pinned before the swap is gone.
use std::sync::atomic::Ordering;

use crossbeam_epoch::{self as epoch, Atomic, Owned, Shared};

use crate::{
    attach_type::AttachType,
    error::AttachError,
    hierarchy::{CgroupId, Hierarchy},
    program::ProgRef,
};

/// Immutable chain of programs, never empty once published.
pub(crate) struct ProgArray<C> {
    progs: Vec<ProgRef<C>>,
}

/// A chain ready to be published, `None` for an empty chain.
pub(crate) type Snapshot<C> = Option<Owned<ProgArray<C>>>;

impl<C> ProgArray<C> {
    /// Copy `progs` into an exact-capacity array.
    pub(crate) fn try_from_slice(progs: &[ProgRef<C>]) -> Result<Snapshot<C>, AttachError> {
        if progs.is_empty() {
            return Ok(None);
        }
        let mut copy = Vec::new();
        copy.try_reserve_exact(progs.len())
            .map_err(|_| AttachError::OutOfMemory)?;
        copy.extend_from_slice(progs);
        Ok(Some(Owned::new(Self { progs: copy })))
    }

    pub(crate) fn from_vec(progs: Vec<ProgRef<C>>) -> Snapshot<C> {
        (!progs.is_empty()).then(|| Owned::new(Self { progs }))
    }

    pub(crate) fn len(&self) -> usize {
        self.progs.len()
    }
}

/// Atomically replaceable pointer to the current effective chain.
pub(crate) struct EffectiveSlot<C> {
    ptr: Atomic<ProgArray<C>>,
}

impl<C> Default for EffectiveSlot<C> {
    fn default() -> Self {
        Self {
            ptr: Atomic::null(),
        }
    }
}

impl<C> EffectiveSlot<C> {
    /// Replace the published chain. The previous one is destroyed once all
    /// readers currently pinned are done with it.
    pub(crate) fn publish(&self, snapshot: Snapshot<C>) {
        let guard = epoch::pin();
        let new = match snapshot {
            Some(array) => array.into_shared(&guard),
            None => Shared::null(),
        };
        let old = self.ptr.swap(new, Ordering::AcqRel, &guard);
        if !old.is_null() {
            // SAFETY: `old` is no longer reachable from the slot, and only
            // readers pinned before the swap can still hold it.
            unsafe { guard.defer_destroy(old) };
        }
    }

    /// Run `f` over the published chain while holding a read-side pin.
    pub(crate) fn with<R>(&self, f: impl FnOnce(&[ProgRef<C>]) -> R) -> R {
        let guard = epoch::pin();
        let shared = self.ptr.load(Ordering::Acquire, &guard);
        // SAFETY: chains are only destroyed through `defer_destroy`, so the
        // pointer stays valid while `guard` is alive.
        let progs = unsafe { shared.as_ref() }
            .map(|array| array.progs.as_slice())
            .unwrap_or(&[]);
        f(progs)
    }

    pub(crate) fn snapshot(&self) -> Vec<ProgRef<C>> {
        self.with(<[_]>::to_vec)
    }
}

impl<C> Drop for EffectiveSlot<C> {
    fn drop(&mut self) {
        // SAFETY: `&mut self` means nobody else can reach this slot anymore.
        unsafe {
            let guard = epoch::unprotected();
            let old = self.ptr.swap(Shared::null(), Ordering::Relaxed, guard);
            if !old.is_null() {
                drop(old.into_owned());
            }
        }
    }
}

/// Compute the effective chain of `cgroup` for `hook` from the local
/// attachments of the cgroup and its ancestors.
pub(crate) fn compute_effective_progs<C>(
    hierarchy: &Hierarchy<C>,
    cgroup: CgroupId,
    hook: AttachType,
    max_progs: usize,
) -> Result<Vec<ProgRef<C>>, AttachError> {
    let mut count = 0;
    for (id, node) in hierarchy.self_and_ancestors(cgroup) {
        let state = node.hook(hook);
        if count == 0 || state.flags.allow_multi {
            let len = state.checked_len(id, hook)?;
            count += len;
            if len > 0 && !state.flags.allow_multi {
                break;
            }
        }
    }
    if count > max_progs {
        return Err(AttachError::TooManyPrograms {
            cgroup,
            hook,
            max: max_progs,
        });
    }

    let mut progs = Vec::new();
    progs
        .try_reserve_exact(count)
        .map_err(|_| AttachError::OutOfMemory)?;
    for (_, node) in hierarchy.self_and_ancestors(cgroup) {
        let state = node.hook(hook);
        if progs.is_empty() || state.flags.allow_multi {
            progs.extend(state.progs.iter().cloned());
            if !progs.is_empty() && !state.flags.allow_multi {
                break;
            }
        }
    }
    Ok(progs)
}
