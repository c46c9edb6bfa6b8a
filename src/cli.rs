use std::path::PathBuf;

use anyhow::Result;
use cgroup_bpf::{AttachType, QueryKind};
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};

use crate::{
    config::{DEFAULT_CONFIG_FILE, HookchainConfig},
    filter::FlowContext,
    term_print::{HookOverview, TermPrintable},
};

#[derive(Parser, Debug, Clone)]
#[clap(name = "hookchain")]
#[clap(about = "Inspect the filter programs attached to a cgroup hierarchy")]
#[clap(version = crate::metadata::VERSION)]
#[clap(disable_help_subcommand = true)]
pub struct Opts {
    /// Hierarchy description
    #[clap(long, short, default_value = DEFAULT_CONFIG_FILE)]
    pub config_file: PathBuf,

    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub verbosity: Verbosity<InfoLevel>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Attached and effective programs of every cgroup
    Show,
    /// Programs attached to, or running for, a hook of a cgroup
    Query {
        path: String,
        hook: AttachType,
        /// Show the effective chain instead of the local attachments
        #[clap(long)]
        effective: bool,
    },
    /// Run the effective chain of a cgroup against a flow
    Run {
        path: String,
        hook: AttachType,
        #[clap(long)]
        port: u16,
        #[clap(long, default_value_t = 0)]
        uid: u32,
    },
}

pub fn run(options: &Opts) -> Result<()> {
    log::trace!("Options: {:?}", options);

    let setup = HookchainConfig::from_file(&options.config_file)?.build()?;
    log::debug!(
        "{} programs attached in {} cgroups",
        setup.engine.active_programs(),
        setup.engine.cgroups().len()
    );

    match &options.command {
        Commands::Show => HookOverview::collect(&setup.engine)?.term_print(),
        Commands::Query {
            path,
            hook,
            effective,
        } => {
            let id = setup.resolve(path)?;
            let kind = if *effective {
                QueryKind::Effective
            } else {
                QueryKind::Attached
            };
            let result = setup.engine.query(id, *hook, kind)?;
            let names: Vec<_> = result.programs.iter().map(|p| p.name()).collect();
            let message = match (kind, result.mode) {
                (QueryKind::Attached, Some(mode)) => format!("{mode}: {}", names.join(", ")),
                _ if names.is_empty() => "No programs".to_string(),
                _ => names.join(" -> "),
            };
            message.term_print()
        }
        Commands::Run {
            path,
            hook,
            port,
            uid,
        } => {
            let id = setup.resolve(path)?;
            let cgroup = setup.engine.cgroup(id)?;
            let flow = FlowContext {
                dst_port: *port,
                uid: *uid,
            };
            let verdict = setup.engine.run(&cgroup, *hook, &flow);
            if let Err(errno) = verdict.into_errno() {
                log::debug!("{path} would fail with {errno}");
            }
            verdict.term_print()
        }
    }?;

    Ok(())
}
