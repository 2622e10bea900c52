//! Loading a compiled payload and activating a [`HookPlan`] with aya.

use aya::maps::Map;
use aya::programs::tc::{self, SchedClassifierLinkId};
use aya::programs::uprobe::UProbeLinkId;
use aya::programs::{SchedClassifier, TcAttachType, UProbe};
use aya::{Bpf, BpfLoader};
use aya_log::BpfLogger;
use std::collections::HashSet;
use tracing::{debug, info, warn};

use super::plan::{HookPlan, HookTarget, TcDirection};
use crate::error::ProbeError;

/// A global constant of the payload rewritten at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Constant {
    pub name: &'static str,
    pub value: u64,
}

enum Link {
    UProbe { program: String, id: UProbeLinkId },
    Classifier { program: String, id: SchedClassifierLinkId },
}

/// Live attachments of one plan. Dropping the session unloads everything.
pub struct AttachSession {
    bpf: Bpf,
    links: Vec<Link>,
}

impl AttachSession {
    /// Load `bytecode`, optionally rewriting `constants`, and attach every
    /// point of `plan`. Any failure drops what was attached so far.
    pub fn activate(
        bytecode: &[u8],
        plan: &HookPlan,
        constants: &[Constant],
    ) -> Result<Self, ProbeError> {
        raise_memlock_rlimit();

        let mut loader = BpfLoader::new();
        for constant in constants {
            loader.set_global(constant.name, &constant.value, false);
        }
        let mut bpf = loader.load(bytecode)?;

        if let Err(e) = BpfLogger::init(&mut bpf) {
            // payloads built without aya-log have nothing to forward
            debug!("eBPF logger not initialized: {}", e);
        }

        for ifname in plan.interfaces() {
            // fails harmlessly when the qdisc is already there
            if let Err(e) = tc::qdisc_add_clsact(ifname) {
                if e.kind() != std::io::ErrorKind::AlreadyExists {
                    return Err(ProbeError::Qdisc {
                        ifname: ifname.to_string(),
                        source: e,
                    });
                }
            }
        }

        let mut links = Vec::with_capacity(plan.points.len());
        let mut loaded = HashSet::new();
        for point in &plan.points {
            let program = bpf
                .program_mut(&point.program)
                .ok_or_else(|| ProbeError::ProgramNotFound(point.program.clone()))?;
            let attach_err = |source| ProbeError::Attach {
                program: point.program.clone(),
                target: point.target.to_string(),
                source,
            };

            match &point.target {
                HookTarget::Symbol { function, binary } => {
                    let probe: &mut UProbe = program.try_into().map_err(attach_err)?;
                    if loaded.insert(point.program.clone()) {
                        probe.load().map_err(attach_err)?;
                    }
                    let id = probe
                        .attach(Some(function.as_str()), 0, binary, None)
                        .map_err(attach_err)?;
                    links.push(Link::UProbe {
                        program: point.program.clone(),
                        id,
                    });
                }
                HookTarget::Interface { ifname, direction } => {
                    let classifier: &mut SchedClassifier =
                        program.try_into().map_err(attach_err)?;
                    if loaded.insert(point.program.clone()) {
                        classifier.load().map_err(attach_err)?;
                    }
                    let attach_type = match direction {
                        TcDirection::Ingress => TcAttachType::Ingress,
                        TcDirection::Egress => TcAttachType::Egress,
                    };
                    let id = classifier
                        .attach(ifname, attach_type)
                        .map_err(attach_err)?;
                    links.push(Link::Classifier {
                        program: point.program.clone(),
                        id,
                    });
                }
            }
            info!(
                section = %point.section,
                program = %point.program,
                target = %point.target,
                "Hook attached"
            );
        }

        Ok(Self { bpf, links })
    }

    /// Take ownership of the map backing the channel `name`.
    pub fn take_channel(&mut self, name: &str) -> Result<Map, ProbeError> {
        self.bpf
            .take_map(name)
            .ok_or_else(|| ProbeError::ChannelNotFound(name.to_string()))
    }

    pub fn has_channel(&self, name: &str) -> bool {
        self.bpf.map(name).is_some()
    }

    /// Detach every link. Detach errors are collected; the object is
    /// unloaded regardless once the session is dropped.
    pub fn stop_all(mut self) -> Result<(), ProbeError> {
        let mut failures = Vec::new();

        for link in self.links.drain(..) {
            let result = match link {
                Link::UProbe { program, id } => detach_uprobe(&mut self.bpf, &program, id),
                Link::Classifier { program, id } => {
                    detach_classifier(&mut self.bpf, &program, id)
                }
            };
            if let Err(e) = result {
                warn!("Detach failed: {}", e);
                failures.push(e);
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ProbeError::Detach(failures.join("; ")))
        }
    }
}

fn detach_uprobe(bpf: &mut Bpf, program: &str, id: UProbeLinkId) -> Result<(), String> {
    let probe: &mut UProbe = bpf
        .program_mut(program)
        .ok_or_else(|| format!("{program}: program vanished"))?
        .try_into()
        .map_err(|e| format!("{program}: {e}"))?;
    probe.detach(id).map_err(|e| format!("{program}: {e}"))
}

fn detach_classifier(
    bpf: &mut Bpf,
    program: &str,
    id: SchedClassifierLinkId,
) -> Result<(), String> {
    let classifier: &mut SchedClassifier = bpf
        .program_mut(program)
        .ok_or_else(|| format!("{program}: program vanished"))?
        .try_into()
        .map_err(|e| format!("{program}: {e}"))?;
    classifier.detach(id).map_err(|e| format!("{program}: {e}"))
}

/// Older kernels account BPF memory against `RLIMIT_MEMLOCK`.
fn raise_memlock_rlimit() {
    let rlim = libc::rlimit {
        rlim_cur: libc::RLIM_INFINITY,
        rlim_max: libc::RLIM_INFINITY,
    };
    // SAFETY: `rlim` is a valid rlimit for the duration of the call.
    let ret = unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim) };
    if ret != 0 {
        debug!("remove limit on locked memory failed, ret is: {}", ret);
    }
}
