use std::{collections::BTreeMap, path::Path};

use anyhow::{Context, Result, bail};
use cgroup_bpf::{AttachMode, AttachType, CgroupBpf, CgroupId, EngineConfig, ProgRef, SectionConfig};
use strum::IntoEnumIterator;

use crate::filter::{FlowContext, RuleProgram};

pub const DEFAULT_CONFIG_FILE: &str = "/etc/hookchain/hookchain.ini";

const ENGINE_SECTION: &str = "engine";
const PROGRAM_PREFIX: &str = "program.";
const CGROUP_PREFIX: &str = "cgroup.";

/// Description of a cgroup hierarchy and of the programs attached to it.
///
/// It is backed by an `INI` file:
///
/// ```ini
/// [engine]
/// max_progs = 16
///
/// [program.web]
/// verdict = reject
/// deny_ports = 22
///
/// [cgroup./system]
/// inet-egress = web
/// inet-egress.mode = multi
/// ```
#[derive(Debug, Clone, Default)]
pub struct HookchainConfig {
    engine: SectionConfig,
    programs: BTreeMap<String, SectionConfig>,
    cgroups: BTreeMap<String, SectionConfig>,
}

impl HookchainConfig {
    pub fn from_file(config_file: &Path) -> Result<Self> {
        if !config_file.exists() {
            bail!("Configuration file {} not found", config_file.display());
        }
        let conf = ini::Ini::load_from_file(config_file)
            .with_context(|| format!("Error loading configuration from {config_file:?}"))?;
        Self::from_ini(&conf)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let conf = ini::Ini::load_from_str(content).context("Error parsing configuration")?;
        Self::from_ini(&conf)
    }

    fn from_ini(conf: &ini::Ini) -> Result<Self> {
        let mut config = Self::default();
        for (section, prop) in conf {
            let Some(section) = section else {
                continue;
            };
            let target = if section == ENGINE_SECTION {
                &mut config.engine
            } else if let Some(name) = section.strip_prefix(PROGRAM_PREFIX) {
                config.programs.entry(name.to_string()).or_default()
            } else if let Some(path) = section.strip_prefix(CGROUP_PREFIX) {
                config.cgroups.entry(normalize(path)).or_default()
            } else {
                bail!("Unknown configuration section [{section}]");
            };
            for (key, value) in prop.iter() {
                log::debug!("{}.{}={}", section, key, value);
                target.insert(key.to_string(), value.to_string());
            }
        }
        Ok(config)
    }

    /// Create the engine, the cgroups and the programs, then perform the
    /// attachments listed for each cgroup. Parents are configured before
    /// their children.
    pub fn build(&self) -> Result<Setup> {
        let engine_config =
            EngineConfig::try_from(&self.engine).context("Invalid [engine] section")?;
        let engine = CgroupBpf::new(engine_config);

        let mut programs = BTreeMap::new();
        for (name, section) in &self.programs {
            let program = RuleProgram::from_config(name, section)
                .with_context(|| format!("Invalid [{PROGRAM_PREFIX}{name}] section"))?;
            let program: ProgRef<FlowContext> = std::sync::Arc::new(program);
            programs.insert(name.clone(), program);
        }

        let mut cgroups: Vec<_> = self.cgroups.iter().collect();
        cgroups.sort_by_key(|(path, _)| depth(path));
        for (path, section) in cgroups {
            let id = mkdir_all(&engine, path)?;
            for hook in AttachType::iter() {
                let names: Vec<String> = section.parse_list(&hook.to_string())?;
                if names.is_empty() {
                    continue;
                }
                let mode = section.parse_or(&format!("{hook}.mode"), AttachMode::Multi)?;
                for name in names {
                    let Some(program) = programs.get(&name) else {
                        bail!("Program {name} attached to {path} is not defined");
                    };
                    engine
                        .attach_with_mode(id, hook, program.clone(), mode)
                        .with_context(|| format!("Attaching {name} to {hook} of {path}"))?;
                }
            }
        }

        Ok(Setup { engine, programs })
    }
}

/// A configured engine, together with the programs it was configured with.
pub struct Setup {
    pub engine: CgroupBpf<FlowContext>,
    pub programs: BTreeMap<String, ProgRef<FlowContext>>,
}

impl Setup {
    pub fn resolve(&self, path: &str) -> Result<CgroupId> {
        let path = normalize(path);
        match self.engine.lookup(&path) {
            Some(cgroup) => Ok(cgroup.id()),
            None => bail!("Cgroup {path} not found"),
        }
    }
}

/// Create `path` and every missing parent.
fn mkdir_all(engine: &CgroupBpf<FlowContext>, path: &str) -> Result<CgroupId> {
    let mut id = CgroupId::ROOT;
    let mut current = String::new();
    for name in path.split('/').filter(|name| !name.is_empty()) {
        current.push('/');
        current.push_str(name);
        id = match engine.lookup(&current) {
            Some(cgroup) => cgroup.id(),
            None => engine
                .mkdir(id, name)
                .with_context(|| format!("Creating cgroup {current}"))?
                .id(),
        };
    }
    Ok(id)
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim().trim_matches('/');
    format!("/{trimmed}")
}

fn depth(path: &str) -> usize {
    path.split('/').filter(|name| !name.is_empty()).count()
}
