//! Certificate-free capture of TLS session secrets and shell commands with
//! eBPF uprobes.
//!
//! A [`probes::Probe`] resolves its hook target, attaches a compiled kernel
//! payload and turns the records it emits into [`event::Event`]s. The TLS
//! probe derives NSS key-log lines from captured master secrets and, in
//! traffic-mirroring mode, writes link-layer frames to a pcapng file.

pub mod assets;
pub mod capture;
pub mod config;
pub mod error;
pub mod event;
pub mod keylog;
pub mod probes;

pub use config::Config;
pub use error::{DecodeError, DeriveError, PersistError, ProbeError};
pub use probes::{init_probe, Dependencies, Probe, ProbeKind, ProbeManager};
