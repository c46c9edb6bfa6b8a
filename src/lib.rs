//! Hookchain loads a cgroup hierarchy and the filter programs attached to it
//! from a configuration file, then lets one inspect what runs where.
//!
//! The attachment rules and the propagation of effective chains live in the
//! [`cgroup_bpf`] crate. This crate adds:
//!
//! - a [configuration](crate::config) format describing cgroups, programs and
//!   attachments
//! - simple [rule programs](crate::filter) to attach
//! - the `hookchain` command line utility ([`cli`])
//!
//! ```sh
//! # Every cgroup with something attached
//! hookchain --config-file hookchain.ini show
//!
//! # What runs on egress traffic of /system/sshd
//! hookchain query /system/sshd inet-egress --effective
//!
//! # Verdict for a connection to port 22 from uid 1000
//! hookchain run /system/sshd inet-egress --port 22 --uid 1000
//! ```

pub mod cli;
pub mod config;
pub mod filter;
pub mod term_print;
pub mod utils;

pub mod metadata {
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}

/// Init logger. We log from info level and above, hide timestamp
/// and module path.
/// If RUST_LOG is set, we assume the user wants to debug something
/// and use env_logger default behaviour.
pub fn init_logger(override_log_level: Option<log::LevelFilter>) {
    if std::env::var_os("RUST_LOG").is_some() {
        env_logger::init();
    } else {
        let level_filter = override_log_level.unwrap_or(log::LevelFilter::Info);

        env_logger::builder()
            .filter_level(level_filter)
            .format_timestamp(None)
            .format_target(false)
            .init();
    }
}
