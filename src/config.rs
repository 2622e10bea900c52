//! Configuration for the capture agent.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::ProbeError;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub bash: BashConfig,
    #[serde(default)]
    pub tls: TlsConfig,
}

/// Settings shared by every probe kind.
#[derive(Debug, Clone, Deserialize)]
pub struct GlobalConfig {
    /// Target process id. `0` or negative traces every process.
    #[serde(default)]
    pub pid: i64,
    /// Target user id. `0` or negative traces every user.
    #[serde(default)]
    pub uid: i64,
    /// Rewrite the filter constants of the kernel payload at load time.
    #[serde(default)]
    pub filters_enabled: bool,
    /// Directory holding the compiled `user/bytecode/*.o` payloads.
    #[serde(default = "default_bytecode_dir")]
    pub bytecode_dir: PathBuf,
    #[serde(default)]
    pub btf: BtfMode,
}

/// Which flavour of compiled payload to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BtfMode {
    /// Pick CO-RE when the running kernel exposes BTF.
    #[default]
    Auto,
    Core,
    NonCore,
}

/// How the hook target was given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ElfType {
    /// Nothing configured, use the conventional system path.
    #[default]
    Unset,
    /// A standalone executable.
    Bin,
    /// A shared object.
    So,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BashConfig {
    #[serde(default)]
    pub elf_type: ElfType,
    #[serde(default)]
    pub bash_path: Option<PathBuf>,
    #[serde(default)]
    pub readline_path: Option<PathBuf>,
    /// Only report commands exiting with this errno (kernel side filter).
    /// [`BASH_ERRNO_DEFAULT`] reports every command.
    #[serde(default = "default_errno")]
    pub errno: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    #[serde(default)]
    pub elf_type: ElfType,
    /// Statically linked client such as curl.
    #[serde(default)]
    pub curl_path: Option<PathBuf>,
    #[serde(default)]
    pub libssl_path: Option<PathBuf>,
    /// Requested library version, e.g. `openssl 1.1.1j` or `boringssl 1.1.1`.
    #[serde(default)]
    pub ssl_version: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Capture file; when set the probe runs in traffic-mirroring mode.
    #[serde(default)]
    pub pcap_file: Option<PathBuf>,
    #[serde(default = "default_ifname")]
    pub ifname: String,
    #[serde(default = "default_keylog_file")]
    pub keylog_file: PathBuf,
}

fn default_bytecode_dir() -> PathBuf {
    PathBuf::from("/usr/share/capture-agent")
}

fn default_errno() -> i32 {
    BASH_ERRNO_DEFAULT
}

fn default_port() -> u16 {
    443
}

fn default_ifname() -> String {
    "eth0".to_string()
}

fn default_keylog_file() -> PathBuf {
    PathBuf::from(MASTER_SECRET_KEYLOG)
}

/// Errno value the bash payload treats as "no filter".
pub const BASH_ERRNO_DEFAULT: i32 = 128;

/// Default key-log file name, relative to the working directory.
pub const MASTER_SECRET_KEYLOG: &str = "capture_masterkey.log";

impl GlobalConfig {
    /// Pid filter as injected into the kernel payload.
    pub fn target_pid(&self) -> u64 {
        self.pid.max(0) as u64
    }

    /// Uid filter as injected into the kernel payload.
    pub fn target_uid(&self) -> u64 {
        self.uid.max(0) as u64
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ProbeError> {
        let builder = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(config::Environment::with_prefix("CAPTURE").separator("__"))
            .set_default("global.pid", 0)?
            .set_default("global.uid", 0)?
            .set_default("global.filters_enabled", false)?
            .set_default("global.btf", "auto")?
            .set_default("bash.elf_type", "unset")?
            .set_default("bash.errno", BASH_ERRNO_DEFAULT)?
            .set_default("tls.elf_type", "unset")?
            .set_default("tls.port", 443)?
            .set_default("tls.ifname", "eth0")?
            .set_default("tls.keylog_file", MASTER_SECRET_KEYLOG)?;

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            pid: 0,
            uid: 0,
            filters_enabled: false,
            bytecode_dir: default_bytecode_dir(),
            btf: BtfMode::Auto,
        }
    }
}

impl Default for BashConfig {
    fn default() -> Self {
        Self {
            elf_type: ElfType::Unset,
            bash_path: None,
            readline_path: None,
            errno: BASH_ERRNO_DEFAULT,
        }
    }
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            elf_type: ElfType::Unset,
            curl_path: None,
            libssl_path: None,
            ssl_version: None,
            port: default_port(),
            pcap_file: None,
            ifname: default_ifname(),
            keylog_file: default_keylog_file(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn negative_filters_mean_everything() {
        let global = GlobalConfig {
            pid: -1,
            uid: -7,
            ..Default::default()
        };
        assert_eq!(global.target_pid(), 0);
        assert_eq!(global.target_uid(), 0);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config.tls.port, 443);
        assert_eq!(config.tls.keylog_file, PathBuf::from(MASTER_SECRET_KEYLOG));
        assert_eq!(config.bash.elf_type, ElfType::Unset);
        assert_eq!(config.bash.errno, BASH_ERRNO_DEFAULT);
        assert_eq!(Config::default().bash.errno, BASH_ERRNO_DEFAULT);
        assert!(!config.global.filters_enabled);
    }

    #[test]
    fn environment_overrides_file() {
        // a key no other test reads, the environment is process wide
        std::env::set_var("CAPTURE__TLS__IFNAME", "capture-test0");
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.yaml"));
        std::env::remove_var("CAPTURE__TLS__IFNAME");

        assert_eq!(config.unwrap().tls.ifname, "capture-test0");
    }

    #[test]
    fn yaml_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "global:\n  pid: 42\n  filters_enabled: true\ntls:\n  elf_type: so\n  libssl_path: /opt/ssl/libssl.so.3\n  ssl_version: openssl 3.0.2"
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.global.target_pid(), 42);
        assert!(config.global.filters_enabled);
        assert_eq!(config.tls.elf_type, ElfType::So);
        assert_eq!(
            config.tls.libssl_path.as_deref(),
            Some(Path::new("/opt/ssl/libssl.so.3"))
        );
        assert_eq!(config.tls.ssl_version.as_deref(), Some("openssl 3.0.2"));
    }
}
