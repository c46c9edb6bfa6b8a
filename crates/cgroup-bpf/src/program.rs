//! The executable unit attached to cgroups.
//!
//! Loading, verifying and running a program is somebody else's job: the
//! engine only needs to run it against a context and get back the raw
//! return value. Reference counting is provided by [`Arc`], so acquiring a
//! program means cloning its [`ProgRef`] and releasing it means dropping it.
use std::{fmt, sync::Arc};

use nix::errno::Errno;

/// A program which can be attached to a hook of a cgroup.
///
/// `C` is the context handed to the program by the hook (a packet, a socket,
/// a socket operation...).
pub trait BpfProgram<C>: Send + Sync {
    /// Name used for logging and queries
    fn name(&self) -> &str;

    /// Run the program. A return value of `1` lets the operation through,
    /// anything else rejects it.
    fn run(&self, ctx: &C) -> u32;
}

/// Shared handle to an attached program.
pub type ProgRef<C> = Arc<dyn BpfProgram<C>>;

/// Two handles are the same program when they point to the same allocation.
pub fn same_program<C>(a: &ProgRef<C>, b: &ProgRef<C>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Outcome of running a chain of programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject,
}

impl Verdict {
    pub fn from_raw(ret: u32) -> Self {
        if ret == 1 {
            Verdict::Accept
        } else {
            Verdict::Reject
        }
    }

    pub fn is_accept(self) -> bool {
        self == Verdict::Accept
    }

    /// Convert the verdict to the return convention of filter hooks:
    /// success, or `EPERM` when the operation must be dropped.
    pub fn into_errno(self) -> Result<(), Errno> {
        match self {
            Verdict::Accept => Ok(()),
            Verdict::Reject => Err(Errno::EPERM),
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Accept => write!(f, "accept"),
            Verdict::Reject => write!(f, "reject"),
        }
    }
}
