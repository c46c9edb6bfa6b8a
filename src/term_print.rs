use anyhow::Result;
use cgroup_bpf::{AttachMode, AttachType, Cgroup, CgroupBpf, QueryKind, Verdict};
use comfy_table::{Attribute, Cell, Color, ContentArrangement, Table};
use strum::IntoEnumIterator;

use crate::filter::FlowContext;

pub struct TermPrinted;

pub trait TermPrintable {
    fn term_print(&self) -> Result<TermPrinted>;
}

impl TermPrintable for String {
    fn term_print(&self) -> Result<TermPrinted> {
        println!("{self}");
        Ok(TermPrinted)
    }
}

impl TermPrintable for Verdict {
    fn term_print(&self) -> Result<TermPrinted> {
        let color = match self {
            Verdict::Accept => Color::Green,
            Verdict::Reject => Color::Red,
        };
        let mut table = table();
        table.add_row(vec![
            Cell::new(self.to_string().to_uppercase())
                .fg(color)
                .add_attribute(Attribute::Bold),
        ]);
        println!("{table}");
        Ok(TermPrinted)
    }
}

/// Attached and effective programs of one hook of one cgroup.
#[derive(Debug, Clone)]
pub struct HookOverview {
    pub path: String,
    pub hook: AttachType,
    pub mode: Option<AttachMode>,
    pub attached: Vec<String>,
    pub effective: Vec<String>,
}

impl HookOverview {
    /// Overview of every hook of every cgroup with something to show.
    pub fn collect(engine: &CgroupBpf<FlowContext>) -> Result<Vec<Self>> {
        let mut overviews = Vec::new();
        for cgroup in engine.cgroups() {
            for hook in AttachType::iter() {
                let overview = Self::new(engine, &cgroup, hook)?;
                if !overview.attached.is_empty() || !overview.effective.is_empty() {
                    overviews.push(overview);
                }
            }
        }
        Ok(overviews)
    }

    pub fn new(engine: &CgroupBpf<FlowContext>, cgroup: &Cgroup<FlowContext>, hook: AttachType) -> Result<Self> {
        let attached = engine.query(cgroup.id(), hook, QueryKind::Attached)?;
        let effective = engine.query(cgroup.id(), hook, QueryKind::Effective)?;
        Ok(Self {
            path: cgroup.path().to_string(),
            hook,
            mode: attached.mode,
            attached: attached.programs.iter().map(|p| p.name().to_string()).collect(),
            effective: effective.programs.iter().map(|p| p.name().to_string()).collect(),
        })
    }
}

impl TermPrintable for Vec<HookOverview> {
    fn term_print(&self) -> Result<TermPrinted> {
        let mut table = table();

        table.set_header(vec![
            Cell::new("CGROUP").add_attribute(Attribute::Bold),
            Cell::new("HOOK").add_attribute(Attribute::Bold),
            Cell::new("MODE").add_attribute(Attribute::Bold),
            Cell::new("ATTACHED").add_attribute(Attribute::Bold),
            Cell::new("EFFECTIVE").add_attribute(Attribute::Bold),
        ]);

        for overview in self {
            let mode = overview.mode.map(|mode| mode.to_string()).unwrap_or_default();
            let mode_color = match overview.mode {
                Some(AttachMode::Exclusive) => Color::Red,
                Some(AttachMode::Override) => Color::Yellow,
                Some(AttachMode::Multi) => Color::Green,
                None => Color::White,
            };

            table.add_row(vec![
                Cell::new(&overview.path)
                    .fg(Color::Cyan)
                    .add_attribute(Attribute::Bold),
                Cell::new(overview.hook),
                Cell::new(mode).fg(mode_color),
                Cell::new(overview.attached.join(", ")),
                Cell::new(overview.effective.join(" -> ")),
            ]);
        }

        println!("{table}");
        Ok(TermPrinted)
    }
}

fn table() -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);

    table
}
