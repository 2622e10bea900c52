//! Shell probe capturing command lines typed into bash.

use std::path::Path;
use std::sync::Arc;
use tracing::info;

use super::attach::Constant;
use super::plan::{HookPlan, HookPoint};
use super::resolve::{resolve_binary, DEFAULT_BASH_PATH};
use super::{Dependencies, Probe, ProbeBase};
use crate::config::Config;
use crate::error::ProbeError;
use crate::event::{Event, EventKind};

pub const BASH_BYTECODE: &str = "bash_kern.o";
pub const BASH_EVENTS_CHANNEL: &str = "events";

/// Uretprobes on `readline` and `execute_command`.
pub struct BashProbe {
    base: ProbeBase,
    plan: Option<HookPlan>,
}

impl BashProbe {
    pub fn init(config: Arc<Config>, deps: &Dependencies) -> Result<Self, ProbeError> {
        Ok(Self {
            base: ProbeBase::new("bash", config, deps.assets.clone()),
            plan: None,
        })
    }

    /// Hooks for a bash executable or a readline shared object at `binary`.
    pub fn plan_for(binary: &Path) -> HookPlan {
        HookPlan::new()
            .hook(HookPoint::uprobe(
                "uretprobe/bash_readline",
                "uretprobe_bash_readline",
                "readline",
                binary,
            ))
            .hook(HookPoint::uprobe(
                "uretprobe/bash_retval",
                "uretprobe_bash_retval",
                "execute_command",
                binary,
            ))
            .channel(BASH_EVENTS_CHANNEL)
    }

    /// Load-time constants, `target_errno` last.
    pub fn constants(&self) -> Vec<Constant> {
        self.base.constants(Constant {
            name: "target_errno",
            value: self.base.config().bash.errno as u64,
        })
    }
}

impl Probe for BashProbe {
    fn base(&self) -> &ProbeBase {
        &self.base
    }

    fn start(&mut self) -> Result<(), ProbeError> {
        let bash = &self.base.config().bash;
        let binary = resolve_binary(
            bash.elf_type,
            bash.bash_path.as_deref(),
            bash.readline_path.as_deref(),
            DEFAULT_BASH_PATH,
        )?;

        let plan = Self::plan_for(&binary);
        for point in &plan.points {
            info!(probe = self.name(), target = %point.target, "HOOK");
        }

        let constants = self.constants();
        self.base.activate(
            BASH_BYTECODE,
            &plan,
            &[(BASH_EVENTS_CHANNEL, EventKind::Bash)],
            &constants,
        )?;

        self.plan = Some(plan);
        info!(probe = self.name(), "module started successfully");
        Ok(())
    }

    fn plan(&self) -> Option<&HookPlan> {
        self.plan.as_ref()
    }

    fn dispatch(&self, event: &Event) {
        if let Event::Bash(e) = event {
            info!(probe = self.name(), "{}", e);
        }
    }

    fn close(&self) -> Result<(), ProbeError> {
        self.base.stop()?;
        info!(probe = self.name(), "module closed");
        Ok(())
    }
}
