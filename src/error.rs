//! Error types for the capture agent.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while bringing a probe up or tearing it down.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("{0} must be set for this hook type")]
    MissingOption(&'static str),

    #[error("target binary {} not found: {source}", path.display())]
    BinaryNotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("couldn't find bytecode asset {name}")]
    AssetNotFound { name: String },

    #[error("couldn't detect the SSL library flavour of {}: {reason}", path.display())]
    DetectFailed { path: PathBuf, reason: String },

    #[error("failed to load BPF object: {0}")]
    Load(#[from] aya::BpfError),

    #[error("program {0} not found in BPF object")]
    ProgramNotFound(String),

    #[error("failed to attach {program} to {target}: {source}")]
    Attach {
        program: String,
        target: String,
        #[source]
        source: aya::programs::ProgramError,
    },

    #[error("failed to set up clsact qdisc on {ifname}: {source}")]
    Qdisc {
        ifname: String,
        #[source]
        source: std::io::Error,
    },

    #[error("can't find map: {0}")]
    ChannelNotFound(String),

    #[error("channel {0} is already registered")]
    ChannelRegistered(String),

    #[error("probe {0} has not been started")]
    NotStarted(&'static str),

    #[error("couldn't stop manager: {0}")]
    Detach(String),

    #[error(transparent)]
    Map(#[from] aya::maps::MapError),

    #[error(transparent)]
    Perf(#[from] aya::maps::perf::PerfBufferError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A raw kernel record that could not be decoded.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("{kind} record truncated: need {expected} bytes, got {actual}")]
    Truncated {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// Reasons a master secret event yields no key-log lines.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeriveError {
    #[error("non-TLSv1.3 cipher suite found, CipherId: {0:#x}")]
    UnsupportedCipherSuite(u32),

    #[error("declared secret length {0} exceeds the captured buffer")]
    InvalidLength(usize),

    #[error("HKDF expand failed")]
    Expand,
}

/// Key-log persistence failure. Fatal to the process.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("save CLIENT_RANDOM to file error: {0}")]
    KeyLog(#[source] std::io::Error),
}
