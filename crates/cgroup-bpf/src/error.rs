use thiserror::Error;

use crate::{attach_type::AttachType, hierarchy::CgroupId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HierarchyError {
    #[error("{0} not found")]
    UnknownCgroup(CgroupId),
    #[error("{0} still has children")]
    NotEmpty(CgroupId),
    #[error("the root cgroup can't be removed")]
    RootRemoval,
    #[error("cgroup {0} already exists")]
    NameExists(String),
    #[error("invalid cgroup name '{0}'")]
    InvalidName(String),
}

/// Why an attach request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum DenyReason {
    #[strum(serialize = "an ancestor has a non-overridable program attached")]
    AncestorDisallowsOverride,
    #[strum(serialize = "the attach mode differs from the programs already attached")]
    ModeMismatch,
}

/// Errors returned by attach and detach requests.
///
/// Every failing request leaves the hierarchy untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttachError {
    #[error("attaching to {hook} of {cgroup} denied: {reason}")]
    PermissionDenied {
        cgroup: CgroupId,
        hook: AttachType,
        reason: DenyReason,
    },
    #[error("no program attached to {hook} of {cgroup}")]
    NotFound { cgroup: CgroupId, hook: AttachType },
    #[error("program {name} already attached to {hook} of {cgroup}")]
    AlreadyAttached {
        cgroup: CgroupId,
        hook: AttachType,
        name: String,
    },
    #[error("effective chain of {hook} for {cgroup} would exceed {max} programs")]
    TooManyPrograms {
        cgroup: CgroupId,
        hook: AttachType,
        max: usize,
    },
    #[error("out of memory allocating effective chains")]
    OutOfMemory,
    #[error("corrupted state: {cgroup} has {count} non-multi programs on {hook}")]
    InvariantViolation {
        cgroup: CgroupId,
        hook: AttachType,
        count: usize,
    },
    #[error(transparent)]
    Hierarchy(#[from] HierarchyError),
}
