//! Rule based programs used to exercise a configured hierarchy from the
//! command line.
use anyhow::Result;
use cgroup_bpf::{BpfProgram, SectionConfig, Verdict};

/// Socket level information handed to [`RuleProgram`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowContext {
    pub dst_port: u16,
    pub uid: u32,
}

/// A program with a default verdict and two kinds of exceptions: traffic from
/// `allow_uids` is always accepted, traffic to `deny_ports` is otherwise
/// always rejected.
#[derive(Debug, Clone)]
pub struct RuleProgram {
    name: String,
    verdict: Verdict,
    deny_ports: Vec<u16>,
    allow_uids: Vec<u32>,
}

impl RuleProgram {
    pub fn from_config(name: &str, config: &SectionConfig) -> Result<Self> {
        let verdict = match config.get_raw("verdict").unwrap_or("accept") {
            "accept" => Verdict::Accept,
            "reject" => Verdict::Reject,
            other => anyhow::bail!("invalid verdict '{other}', expected accept or reject"),
        };
        Ok(Self {
            name: name.to_string(),
            verdict,
            deny_ports: config.parse_list("deny_ports")?,
            allow_uids: config.parse_list("allow_uids")?,
        })
    }

    fn verdict(&self, ctx: &FlowContext) -> Verdict {
        if self.allow_uids.contains(&ctx.uid) {
            Verdict::Accept
        } else if self.deny_ports.contains(&ctx.dst_port) {
            Verdict::Reject
        } else {
            self.verdict
        }
    }
}

impl BpfProgram<FlowContext> for RuleProgram {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, ctx: &FlowContext) -> u32 {
        match self.verdict(ctx) {
            Verdict::Accept => 1,
            Verdict::Reject => 0,
        }
    }
}
