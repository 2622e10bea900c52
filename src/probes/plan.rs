//! Declarative description of what a probe attaches to.

use std::fmt;
use std::path::{Path, PathBuf};

/// Direction of a traffic-control classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcDirection {
    Ingress,
    Egress,
}

/// Where a kernel program executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookTarget {
    /// A function symbol inside an ELF binary (uprobe or uretprobe).
    Symbol { function: String, binary: PathBuf },
    /// A network interface (TC classifier).
    Interface { ifname: String, direction: TcDirection },
}

impl fmt::Display for HookTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookTarget::Symbol { function, binary } => {
                write!(f, "{}:{}", binary.display(), function)
            }
            HookTarget::Interface { ifname, direction } => write!(f, "{ifname}:{direction:?}"),
        }
    }
}

/// One attach point of a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookPoint {
    /// ELF section of the program, e.g. `uretprobe/bash_readline`
    pub section: String,
    /// Name of the kernel function (eBPF program) to attach
    pub program: String,
    pub target: HookTarget,
}

impl HookPoint {
    pub fn uprobe(section: &str, program: &str, function: &str, binary: &Path) -> Self {
        Self {
            section: section.to_string(),
            program: program.to_string(),
            target: HookTarget::Symbol {
                function: function.to_string(),
                binary: binary.to_path_buf(),
            },
        }
    }

    pub fn classifier(section: &str, program: &str, ifname: &str, direction: TcDirection) -> Self {
        Self {
            section: section.to_string(),
            program: program.to_string(),
            target: HookTarget::Interface {
                ifname: ifname.to_string(),
                direction,
            },
        }
    }
}

/// Ordered attach points plus the kernel data channels they feed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HookPlan {
    pub points: Vec<HookPoint>,
    pub channels: Vec<String>,
}

impl HookPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hook(mut self, point: HookPoint) -> Self {
        self.points.push(point);
        self
    }

    pub fn channel(mut self, name: &str) -> Self {
        self.channels.push(name.to_string());
        self
    }

    pub fn programs(&self) -> impl Iterator<Item = &str> {
        self.points.iter().map(|p| p.program.as_str())
    }

    /// Interfaces that need a `clsact` qdisc before classifiers attach.
    pub fn interfaces(&self) -> Vec<&str> {
        let mut ifaces: Vec<&str> = self
            .points
            .iter()
            .filter_map(|p| match &p.target {
                HookTarget::Interface { ifname, .. } => Some(ifname.as_str()),
                HookTarget::Symbol { .. } => None,
            })
            .collect();
        ifaces.dedup();
        ifaces
    }
}
