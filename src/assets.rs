//! Compiled kernel payloads.

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::BtfMode;
use crate::error::ProbeError;

/// Namespace every bytecode asset name is rooted at.
pub const BYTECODE_NAMESPACE: &str = "user/bytecode";

const SYS_BTF_VMLINUX: &str = "/sys/kernel/btf/vmlinux";

/// Source of compiled eBPF objects, addressed by path-like names.
pub trait AssetStore: Send + Sync {
    fn load_asset(&self, name: &str) -> Result<Vec<u8>, ProbeError>;
}

/// Assets laid out on disk below a root directory.
#[derive(Debug, Clone)]
pub struct DirAssetStore {
    root: PathBuf,
}

impl DirAssetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl AssetStore for DirAssetStore {
    fn load_asset(&self, name: &str) -> Result<Vec<u8>, ProbeError> {
        let path = self.root.join(name);
        debug!(path = %path.display(), "Reading bytecode asset");
        std::fs::read(&path).map_err(|_| ProbeError::AssetNotFound {
            name: name.to_string(),
        })
    }
}

/// Full asset name for a bytecode file such as `openssl_1_1_1j_kern.o`.
///
/// CO-RE objects carry a `_core.o` suffix, the others `_noncore.o`.
pub fn bytecode_name(file: &str, mode: BtfMode) -> String {
    let core = match mode {
        BtfMode::Core => true,
        BtfMode::NonCore => false,
        BtfMode::Auto => kernel_has_btf(),
    };
    let stem = file.strip_suffix(".o").unwrap_or(file);
    let suffix = if core { "_core.o" } else { "_noncore.o" };
    format!("{BYTECODE_NAMESPACE}/{stem}{suffix}")
}

pub fn kernel_has_btf() -> bool {
    Path::new(SYS_BTF_VMLINUX).exists()
}
