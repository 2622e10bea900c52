//! Target binary resolution and SSL library flavour selection.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::ElfType;
use crate::error::ProbeError;

/// Function hooked to observe completed master secrets in OpenSSL.
pub const MASTER_KEY_HOOK_FUNC_OPENSSL: &str = "SSL_write";
/// BoringSSL finishes its key schedule before leaving the handshake.
pub const MASTER_KEY_HOOK_FUNC_BORINGSSL: &str = "SSL_in_init";

pub const DEFAULT_BASH_PATH: &str = "/bin/bash";
pub const DEFAULT_LIBSSL_PATH: &str = "/lib/x86_64-linux-gnu/libssl.so.1.1";

const BORINGSSL_BYTECODE: &str = "boringssl_1_1_1_kern.o";

/// Pick the binary to hook from the configured path kind.
///
/// An unset kind falls back to the conventional system path, which is not
/// guaranteed to exist. Every outcome is checked for existence.
pub fn resolve_binary(
    elf_type: ElfType,
    bin: Option<&Path>,
    so: Option<&Path>,
    fallback: &str,
) -> Result<PathBuf, ProbeError> {
    let path = match elf_type {
        ElfType::Bin => bin
            .map(Path::to_path_buf)
            .ok_or(ProbeError::MissingOption("binary path"))?,
        ElfType::So => so
            .map(Path::to_path_buf)
            .ok_or(ProbeError::MissingOption("shared object path"))?,
        ElfType::Unset => PathBuf::from(fallback),
    };

    std::fs::metadata(&path).map_err(|source| ProbeError::BinaryNotFound {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

/// Known library versions and the bytecode compiled for their struct layout.
pub fn ssl_bytecode_table() -> HashMap<String, String> {
    let mut table = HashMap::new();
    let mut add = |version: String, file: &str| {
        table.insert(version, file.to_string());
    };

    for ch in 'a'..='u' {
        add(format!("openssl 1.0.2{ch}"), "openssl_1_0_2a_kern.o");
    }
    for ch in 'a'..='l' {
        add(format!("openssl 1.1.0{ch}"), "openssl_1_1_0a_kern.o");
    }

    // 1.1.1 has four layout groups
    add("openssl 1.1.1a".to_string(), "openssl_1_1_1a_kern.o");
    for ch in 'b'..='c' {
        add(format!("openssl 1.1.1{ch}"), "openssl_1_1_1b_kern.o");
    }
    for ch in 'd'..='i' {
        add(format!("openssl 1.1.1{ch}"), "openssl_1_1_1d_kern.o");
    }
    for ch in 'j'..='w' {
        add(format!("openssl 1.1.1{ch}"), "openssl_1_1_1j_kern.o");
    }

    for patch in 0..=12 {
        add(format!("openssl 3.0.{patch}"), "openssl_3_0_0_kern.o");
    }

    add("boringssl 1.1.1".to_string(), BORINGSSL_BYTECODE);
    add("boringssl_a_13".to_string(), "boringssl_a_13_kern.o");
    add("boringssl_a_14".to_string(), "boringssl_a_14_kern.o");
    table
}

/// Family default for a version that is not listed exactly.
fn family_default(version: &str) -> Option<&'static str> {
    if version.starts_with("openssl 1.0.2") {
        Some("openssl_1_0_2a_kern.o")
    } else if version.starts_with("openssl 1.1.0") {
        Some("openssl_1_1_0a_kern.o")
    } else if version.starts_with("openssl 1.1.1") {
        Some("openssl_1_1_1j_kern.o")
    } else if version.starts_with("openssl 3.") {
        Some("openssl_3_0_0_kern.o")
    } else {
        None
    }
}

/// Library introspection used when no usable version was requested.
pub trait FlavorDetector: Send + Sync {
    /// Bytecode file name matching the library at `path`.
    fn detect(&self, path: &Path) -> Result<String, ProbeError>;
}

/// Scans the library image for the `OpenSSL x.y.z` banner or a BoringSSL
/// marker.
#[derive(Debug, Clone)]
pub struct ElfVersionDetector {
    table: HashMap<String, String>,
}

impl Default for ElfVersionDetector {
    fn default() -> Self {
        Self {
            table: ssl_bytecode_table(),
        }
    }
}

impl ElfVersionDetector {
    fn detect_bytes(&self, image: &[u8]) -> Option<String> {
        for at in find_all(image, b"OpenSSL ") {
            let Some(version) = parse_banner(&image[at + 8..]) else {
                continue;
            };
            let key = format!("openssl {}", version.to_lowercase());
            if let Some(file) = self.table.get(&key) {
                debug!(version = %key, "Exact SSL version match");
                return Some(file.clone());
            }
            if let Some(file) = family_default(&key) {
                debug!(version = %key, file, "Using family default bytecode");
                return Some(file.to_string());
            }
        }

        if find_all(image, b"BoringSSL").next().is_some() {
            return Some(BORINGSSL_BYTECODE.to_string());
        }
        None
    }
}

impl FlavorDetector for ElfVersionDetector {
    fn detect(&self, path: &Path) -> Result<String, ProbeError> {
        let image = std::fs::read(path).map_err(|e| ProbeError::DetectFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        self.detect_bytes(&image).ok_or_else(|| ProbeError::DetectFailed {
            path: path.to_path_buf(),
            reason: "no OpenSSL or BoringSSL version string".to_string(),
        })
    }
}

/// Read `1.1.1f` out of `1.1.1f  31 Mar 2020`.
fn parse_banner(rest: &[u8]) -> Option<String> {
    let end = rest
        .iter()
        .position(|b| !(b.is_ascii_alphanumeric() || *b == b'.'))
        .unwrap_or(rest.len());
    let token = std::str::from_utf8(&rest[..end]).ok()?;
    let mut parts = token.split('.');
    let major = parts.next()?;
    let minor = parts.next()?;
    let patch = parts.next()?;
    if parts.next().is_some()
        || !major.chars().all(|c| c.is_ascii_digit())
        || !minor.chars().all(|c| c.is_ascii_digit())
        || !patch.starts_with(|c: char| c.is_ascii_digit())
        || major.is_empty()
        || minor.is_empty()
    {
        return None;
    }
    Some(token.to_string())
}

fn find_all<'a>(haystack: &'a [u8], needle: &'a [u8]) -> impl Iterator<Item = usize> + 'a {
    haystack
        .windows(needle.len())
        .enumerate()
        .filter(move |(_, w)| *w == needle)
        .map(|(i, _)| i)
}

/// The resolved TLS library family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryFlavor {
    /// Bytecode file, e.g. `openssl_1_1_1j_kern.o`
    pub bytecode: String,
    pub boringssl: bool,
    /// Function hooked to observe completed master secrets
    pub master_hook: &'static str,
}

impl LibraryFlavor {
    pub fn from_bytecode(bytecode: String) -> Self {
        let boringssl = bytecode.contains("boringssl");
        Self {
            bytecode,
            boringssl,
            master_hook: if boringssl {
                MASTER_KEY_HOOK_FUNC_BORINGSSL
            } else {
                MASTER_KEY_HOOK_FUNC_OPENSSL
            },
        }
    }
}

/// Look the requested version up in `table`, falling back to `detector`.
pub fn select_flavor(
    path: &Path,
    requested: Option<&str>,
    table: &HashMap<String, String>,
    detector: &dyn FlavorDetector,
) -> Result<LibraryFlavor, ProbeError> {
    if let Some(version) = requested.map(str::trim).filter(|v| !v.is_empty()) {
        let version = version.to_lowercase();
        info!(version = %version, "OpenSSL/BoringSSL version requested");
        if let Some(file) = table.get(&version) {
            return Ok(LibraryFlavor::from_bytecode(file.clone()));
        }
        warn!(version = %version, "No bytecode for requested version, auto detecting");
    }

    let file = detector.detect(path)?;
    info!(path = %path.display(), bytecode = %file, "Detected SSL library");
    Ok(LibraryFlavor::from_bytecode(file))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str);

    impl FlavorDetector for Fixed {
        fn detect(&self, _: &Path) -> Result<String, ProbeError> {
            Ok(self.0.to_string())
        }
    }

    struct Failing;

    impl FlavorDetector for Failing {
        fn detect(&self, path: &Path) -> Result<String, ProbeError> {
            Err(ProbeError::DetectFailed {
                path: path.to_path_buf(),
                reason: "test".to_string(),
            })
        }
    }

    #[test]
    fn unset_kind_uses_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let fallback = dir.path().join("bash");
        std::fs::write(&fallback, b"").unwrap();

        let path = resolve_binary(ElfType::Unset, None, None, fallback.to_str().unwrap()).unwrap();
        assert_eq!(path, fallback);
    }

    #[test]
    fn missing_binary_is_fatal() {
        let err = resolve_binary(
            ElfType::Bin,
            Some(Path::new("/nonexistent/curl")),
            None,
            DEFAULT_BASH_PATH,
        )
        .unwrap_err();
        assert!(matches!(err, ProbeError::BinaryNotFound { .. }));
    }

    #[test]
    fn so_kind_requires_a_path() {
        let err = resolve_binary(ElfType::So, None, None, DEFAULT_LIBSSL_PATH).unwrap_err();
        assert!(matches!(err, ProbeError::MissingOption(_)));
    }

    #[test]
    fn table_groups() {
        let table = ssl_bytecode_table();
        assert_eq!(table["openssl 1.1.1a"], "openssl_1_1_1a_kern.o");
        assert_eq!(table["openssl 1.1.1c"], "openssl_1_1_1b_kern.o");
        assert_eq!(table["openssl 1.1.1f"], "openssl_1_1_1d_kern.o");
        assert_eq!(table["openssl 1.1.1k"], "openssl_1_1_1j_kern.o");
        assert_eq!(table["openssl 3.0.7"], "openssl_3_0_0_kern.o");
        assert_eq!(table["boringssl 1.1.1"], "boringssl_1_1_1_kern.o");
    }

    #[test]
    fn requested_version_wins_over_detection() {
        let flavor = select_flavor(
            Path::new("/irrelevant"),
            Some("OpenSSL 1.1.1K"),
            &ssl_bytecode_table(),
            &Failing,
        )
        .unwrap();
        assert_eq!(flavor.bytecode, "openssl_1_1_1j_kern.o");
        assert!(!flavor.boringssl);
        assert_eq!(flavor.master_hook, "SSL_write");
    }

    #[test]
    fn unknown_version_falls_back_to_detection() {
        let flavor = select_flavor(
            Path::new("/irrelevant"),
            Some("openssl 9.9.9"),
            &ssl_bytecode_table(),
            &Fixed("boringssl_a_13_kern.o"),
        )
        .unwrap();
        assert!(flavor.boringssl);
        assert_eq!(flavor.master_hook, "SSL_in_init");
    }

    #[test]
    fn failed_detection_is_fatal() {
        let err = select_flavor(Path::new("/lib/x"), None, &ssl_bytecode_table(), &Failing)
            .unwrap_err();
        assert!(matches!(err, ProbeError::DetectFailed { .. }));
    }

    #[test]
    fn detects_openssl_banner() {
        let detector = ElfVersionDetector::default();
        let image = b"\0\0OpenSSL 1.1.1f  31 Mar 2020\0more";
        assert_eq!(
            detector.detect_bytes(image).as_deref(),
            Some("openssl_1_1_1d_kern.o")
        );
    }

    #[test]
    fn skips_non_version_mentions() {
        let detector = ElfVersionDetector::default();
        let image = b"OpenSSL error\0OpenSSL 3.0.13 30 Jan 2024\0";
        assert_eq!(
            detector.detect_bytes(image).as_deref(),
            Some("openssl_3_0_0_kern.o")
        );
    }

    #[test]
    fn detects_boringssl_marker() {
        let detector = ElfVersionDetector::default();
        assert_eq!(
            detector.detect_bytes(b"..BoringSSL..").as_deref(),
            Some("boringssl_1_1_1_kern.o")
        );
        assert_eq!(detector.detect_bytes(b"libfoo"), None);
    }
}
