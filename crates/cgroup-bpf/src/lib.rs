//! # Cgroup programs
//!
//! This crate manages filter programs attached to a hierarchy of cgroups and
//! computes, for every cgroup and hook, the chain of programs which actually
//! runs on the traffic of that cgroup.
//!
//! # Attach modes
//!
//! A program is attached to a hook of a cgroup in one of three modes:
//! - exclusive: the program replaces whatever the ancestors attached and
//!   descendants are not allowed to attach anything on that hook
//! - override: same as exclusive, but descendants may replace it
//! - multi: the program stacks with the programs of the ancestors and
//!   descendants may stack their own on top
//!
//! A cgroup can't mix modes on the same hook.
//!
//! # Effective chains
//!
//! The effective chain of a cgroup is computed by walking up to the root:
//! the programs of the cgroup come first, followed by the programs of the
//! closest ancestors attached in multi mode. A cgroup without local programs
//! simply runs the chain of its closest ancestor with programs.
//!
//! Every attach or detach recomputes the chain of the target cgroup and of
//! all its descendants, except for subtrees whose root has its own programs:
//! those were delegated and keep their independent policy.
//!
//! # Concurrency
//!
//! Attach, detach and tree edits are serialized by a single lock held by
//! [`CgroupBpf`]. Running a chain ([`Cgroup::run`]) never takes that lock:
//! chains are immutable and published with an atomic pointer swap, and old
//! chains are reclaimed only once every reader which could still see them is
//! done (epoch based reclamation, see [`crossbeam_epoch`]).

mod attach_type;
pub mod config;
mod effective;
mod engine;
mod error;
mod hierarchy;
mod policy;
mod prog_list;
mod program;

pub use attach_type::AttachType;
pub use config::{ConfigError, EngineConfig, SectionConfig};
pub use engine::{CgroupBpf, QueryKind, QueryResult};
pub use error::{AttachError, DenyReason, HierarchyError};
pub use hierarchy::{Cgroup, CgroupId};
pub use policy::{AttachMode, InvalidAttachMode};
pub use program::{BpfProgram, ProgRef, Verdict, same_program};
