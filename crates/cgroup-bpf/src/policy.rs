//! Attach modes and the rules deciding whether a cgroup may attach a program
//! given what its ancestors have attached.
use std::{fmt, str::FromStr};

use crate::{
    attach_type::AttachType,
    error::AttachError,
    hierarchy::{CgroupId, Hierarchy},
    prog_list::ProgList,
};

/// How a program is attached to a cgroup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachMode {
    /// Single program, descendants are not allowed to attach their own.
    Exclusive,
    /// Single program, descendants may replace it with their own.
    Override,
    /// Stacks with the programs of ancestors and descendants.
    Multi,
}

impl AttachMode {
    pub fn from_multi(multi: bool) -> Self {
        if multi {
            AttachMode::Multi
        } else {
            AttachMode::Exclusive
        }
    }

    pub(crate) fn flags(self) -> HookFlags {
        match self {
            AttachMode::Exclusive => HookFlags {
                allow_multi: false,
                disallow_override: true,
            },
            AttachMode::Override => HookFlags {
                allow_multi: false,
                disallow_override: false,
            },
            AttachMode::Multi => HookFlags {
                allow_multi: true,
                disallow_override: false,
            },
        }
    }
}

impl fmt::Display for AttachMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttachMode::Exclusive => write!(f, "exclusive"),
            AttachMode::Override => write!(f, "override"),
            AttachMode::Multi => write!(f, "multi"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid attach mode '{0}', expected exclusive, override or multi")]
pub struct InvalidAttachMode(String);

impl FromStr for AttachMode {
    type Err = InvalidAttachMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exclusive" => Ok(AttachMode::Exclusive),
            "override" => Ok(AttachMode::Override),
            "multi" => Ok(AttachMode::Multi),
            other => Err(InvalidAttachMode(other.to_string())),
        }
    }
}

/// Per cgroup, per hook attach flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct HookFlags {
    pub(crate) allow_multi: bool,
    pub(crate) disallow_override: bool,
}

impl HookFlags {
    /// The mode these flags were set by, meaningful only while programs are attached.
    pub(crate) fn mode(self) -> AttachMode {
        if self.allow_multi {
            AttachMode::Multi
        } else if self.disallow_override {
            AttachMode::Exclusive
        } else {
            AttachMode::Override
        }
    }
}

/// Local attachment state of a cgroup for one hook.
pub(crate) struct HookState<C> {
    pub(crate) progs: ProgList<C>,
    pub(crate) flags: HookFlags,
}

impl<C> Default for HookState<C> {
    fn default() -> Self {
        Self {
            progs: ProgList::default(),
            flags: HookFlags::default(),
        }
    }
}

impl<C> HookState<C> {
    /// Number of live programs, refusing a non-multi list holding more than one.
    pub(crate) fn checked_len(&self, cgroup: CgroupId, hook: AttachType) -> Result<usize, AttachError> {
        let count = self.progs.len();
        if count > 1 && !self.flags.allow_multi {
            log::error!("{cgroup} has {count} non-multi programs attached to {hook}");
            return Err(AttachError::InvariantViolation {
                cgroup,
                hook,
                count,
            });
        }
        Ok(count)
    }
}

/// Check whether the ancestors of `cgroup` allow it to attach a program to `hook`.
///
/// The closest ancestor with something attached decides: a multi ancestor
/// always allows stacking, a single-program ancestor allows attaching only if
/// it is overridable. Without any such ancestor attaching is allowed.
pub(crate) fn hierarchy_allows_attach<C>(
    hierarchy: &Hierarchy<C>,
    cgroup: CgroupId,
    hook: AttachType,
) -> Result<bool, AttachError> {
    for (id, ancestor) in hierarchy.ancestors(cgroup) {
        let state = ancestor.hook(hook);
        if state.flags.allow_multi {
            return Ok(true);
        }
        if state.checked_len(id, hook)? == 1 {
            return Ok(!state.flags.disallow_override);
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_round_trips_through_flags() {
        for mode in [AttachMode::Exclusive, AttachMode::Override, AttachMode::Multi] {
            assert_eq!(mode.flags().mode(), mode);
            assert_eq!(mode.to_string().parse::<AttachMode>().unwrap(), mode);
        }
        assert!("stack".parse::<AttachMode>().is_err());
    }

    #[test]
    fn multi_flag_maps_to_exclusive_or_multi() {
        assert_eq!(AttachMode::from_multi(true), AttachMode::Multi);
        assert_eq!(AttachMode::from_multi(false), AttachMode::Exclusive);
        assert!(AttachMode::from_multi(false).flags().disallow_override);
    }
}
