//! TLS probe: plaintext hooks on `SSL_read`/`SSL_write` and session secret
//! capture for OpenSSL and BoringSSL.
//!
//! Secrets are written to an NSS key log so captured traffic can be
//! decrypted without the server certificate. When a capture file is
//! configured the probe mirrors link-layer frames with traffic-control
//! classifiers instead of hooking plaintext, and embeds the session keys
//! into the capture.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::attach::Constant;
use super::plan::{HookPlan, HookPoint, TcDirection};
use super::resolve::{resolve_binary, select_flavor, ssl_bytecode_table, DEFAULT_LIBSSL_PATH};
use super::resolve::{FlavorDetector, LibraryFlavor};
use super::{Dependencies, Probe, ProbeBase};
use crate::capture::{BootClock, CaptureSink, CapturedFrame, FrameBuffer, PcapngWriter};
use crate::config::Config;
use crate::error::{DeriveError, ProbeError};
use crate::event::{Event, EventKind, TcSkbEvent};
use crate::keylog::{derive_boringssl, derive_openssl, KeyLogRecord, Persisted, SecretStore};

pub const TLS_EVENTS_CHANNEL: &str = "tls_events";
pub const CONNECT_EVENTS_CHANNEL: &str = "connect_events";
pub const MASTER_SECRET_CHANNEL: &str = "mastersecret_events";
pub const SKB_EVENTS_CHANNEL: &str = "skb_events";

/// How the probe observes traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    /// Plaintext hooks on the SSL read/write functions.
    Uprobe,
    /// Link-layer frames mirrored by traffic-control classifiers.
    Tc,
}

struct Capture {
    buffer: FrameBuffer,
    /// Injected sink; otherwise a pcapng file is created at `path` on close.
    sink: Option<Arc<dyn CaptureSink>>,
    path: PathBuf,
    clock: BootClock,
}

pub struct TlsProbe {
    base: ProbeBase,
    mode: CaptureMode,
    detector: Arc<dyn FlavorDetector>,
    versions: HashMap<String, String>,
    keylog: SecretStore,
    keylog_path: PathBuf,
    capture: Option<Capture>,
    flavor: Option<LibraryFlavor>,
    plan: Option<HookPlan>,
    closed: AtomicBool,
}

impl TlsProbe {
    /// Open the key log. The capture file, if any, is only written on close.
    pub fn init(config: Arc<Config>, deps: &Dependencies) -> Result<Self, ProbeError> {
        let tls = &config.tls;
        let keylog_path = tls.keylog_file.clone();
        let keylog = SecretStore::open(&keylog_path)?;

        let (mode, capture) = match &tls.pcap_file {
            Some(pcap_file) => {
                info!(
                    pcap_file = %pcap_file.display(),
                    ifname = %tls.ifname,
                    port = tls.port,
                    "TC mode, packets will be saved to the capture file"
                );
                let capture = Capture {
                    buffer: FrameBuffer::new(),
                    sink: deps.capture.clone(),
                    path: pcap_file.clone(),
                    clock: BootClock::now()?,
                };
                (CaptureMode::Tc, Some(capture))
            }
            None => (CaptureMode::Uprobe, None),
        };
        info!(path = %keylog_path.display(), "master key keylogger");

        Ok(Self {
            base: ProbeBase::new("tls", config, deps.assets.clone()),
            mode,
            detector: deps.detector.clone(),
            versions: ssl_bytecode_table(),
            keylog,
            keylog_path,
            capture,
            flavor: None,
            plan: None,
            closed: AtomicBool::new(false),
        })
    }

    pub fn mode(&self) -> CaptureMode {
        self.mode
    }

    pub fn flavor(&self) -> Option<&LibraryFlavor> {
        self.flavor.as_ref()
    }

    pub fn keylog_path(&self) -> &Path {
        &self.keylog_path
    }

    /// Plaintext hooks plus the master secret hook on `binary`.
    pub fn uprobe_plan(binary: &Path, flavor: &LibraryFlavor) -> HookPlan {
        HookPlan::new()
            .hook(HookPoint::uprobe(
                "uprobe/SSL_write",
                "probe_entry_SSL_write",
                "SSL_write",
                binary,
            ))
            .hook(HookPoint::uprobe(
                "uretprobe/SSL_write",
                "probe_ret_SSL_write",
                "SSL_write",
                binary,
            ))
            .hook(HookPoint::uprobe(
                "uprobe/SSL_read",
                "probe_entry_SSL_read",
                "SSL_read",
                binary,
            ))
            .hook(HookPoint::uprobe(
                "uretprobe/SSL_read",
                "probe_ret_SSL_read",
                "SSL_read",
                binary,
            ))
            .hook(Self::master_key_hook(binary, flavor))
            .channel(TLS_EVENTS_CHANNEL)
            .channel(CONNECT_EVENTS_CHANNEL)
            .channel(MASTER_SECRET_CHANNEL)
    }

    /// Classifiers on `ifname` plus the master secret hook on `binary`.
    pub fn tc_plan(binary: &Path, flavor: &LibraryFlavor, ifname: &str) -> HookPlan {
        HookPlan::new()
            .hook(HookPoint::classifier(
                "classifier/egress",
                "egress_cls_func",
                ifname,
                TcDirection::Egress,
            ))
            .hook(HookPoint::classifier(
                "classifier/ingress",
                "ingress_cls_func",
                ifname,
                TcDirection::Ingress,
            ))
            .hook(Self::master_key_hook(binary, flavor))
            .channel(SKB_EVENTS_CHANNEL)
            .channel(MASTER_SECRET_CHANNEL)
    }

    fn master_key_hook(binary: &Path, flavor: &LibraryFlavor) -> HookPoint {
        HookPoint::uprobe(
            "uprobe/SSL_write_key",
            "probe_ssl_master_key",
            flavor.master_hook,
            binary,
        )
    }

    /// Load-time constants, `target_port` last.
    pub fn constants(&self) -> Vec<Constant> {
        self.base.constants(Constant {
            name: "target_port",
            value: u64::from(self.base.config().tls.port),
        })
    }

    /// Decoder bound to each channel of the plan for `mode`.
    pub fn channel_bindings(
        mode: CaptureMode,
        flavor: &LibraryFlavor,
    ) -> Vec<(&'static str, EventKind)> {
        let master = if flavor.boringssl {
            EventKind::MasterSecretBssl
        } else {
            EventKind::MasterSecret
        };
        match mode {
            CaptureMode::Uprobe => vec![
                (TLS_EVENTS_CHANNEL, EventKind::SslData),
                (CONNECT_EVENTS_CHANNEL, EventKind::Connect),
                (MASTER_SECRET_CHANNEL, master),
            ],
            CaptureMode::Tc => vec![
                (SKB_EVENTS_CHANNEL, EventKind::TcSkb),
                (MASTER_SECRET_CHANNEL, master),
            ],
        }
    }

    fn save_derived(&self, derived: Result<Option<KeyLogRecord>, DeriveError>) {
        match derived {
            Ok(Some(record)) => self.save_master_secret(&record),
            Ok(None) => debug!("master secret not ready yet, skipped"),
            Err(e) => warn!("{}", e),
        }
    }

    fn save_master_secret(&self, record: &KeyLogRecord) {
        match self.keylog.persist(record) {
            Ok(Persisted::Written(bytes)) => {
                if let Some(capture) = &self.capture {
                    capture.buffer.push_session_key(record.lines.as_bytes());
                }
                info!(
                    version = %record.version,
                    client_random = %record.key(),
                    bytes,
                    "save CLIENT_RANDOM to file success"
                );
            }
            Ok(Persisted::Duplicate) => {
                debug!(client_random = %record.key(), "client random already saved");
            }
            Err(e) => {
                // key-log write failures are fatal
                error!(path = %self.keylog_path.display(), "{}", e);
                std::process::exit(1);
            }
        }
    }

    fn save_frame(&self, event: &TcSkbEvent) {
        let Some(capture) = &self.capture else {
            return;
        };
        capture.buffer.push_frame(CapturedFrame {
            timestamp_ns: capture.clock.wall_time(event.ts),
            ifindex: event.ifindex,
            len: event.len,
            data: event.payload.clone(),
        });
    }

    fn save_capture(&self, capture: &Capture) -> Result<(), ProbeError> {
        let sink: Arc<dyn CaptureSink> = match &capture.sink {
            Some(sink) => sink.clone(),
            None => Arc::new(PcapngWriter::create(&capture.path)?),
        };
        let frames = capture.buffer.flush_into(sink.as_ref())?;
        if frames == 0 {
            info!(
                ifname = %self.base.config().tls.ifname,
                port = self.base.config().tls.port,
                "nothing captured, please check the interface name and port"
            );
        } else {
            info!(frames, path = %capture.path.display(), "packets saved into the capture file");
        }
        Ok(())
    }
}

impl Probe for TlsProbe {
    fn base(&self) -> &ProbeBase {
        &self.base
    }

    fn start(&mut self) -> Result<(), ProbeError> {
        let tls = &self.base.config().tls;
        let binary = resolve_binary(
            tls.elf_type,
            tls.curl_path.as_deref(),
            tls.libssl_path.as_deref(),
            DEFAULT_LIBSSL_PATH,
        )?;
        let flavor = select_flavor(
            &binary,
            tls.ssl_version.as_deref(),
            &self.versions,
            self.detector.as_ref(),
        )?;
        info!(
            probe = self.name(),
            binary = %binary.display(),
            elf_type = ?tls.elf_type,
            "HOOK"
        );
        info!(probe = self.name(), function = flavor.master_hook, "Hook masterKey function");

        let plan = match self.mode {
            CaptureMode::Uprobe => Self::uprobe_plan(&binary, &flavor),
            CaptureMode::Tc => Self::tc_plan(&binary, &flavor, &tls.ifname),
        };
        for point in &plan.points {
            debug!(probe = self.name(), section = %point.section, target = %point.target, "HOOK");
        }

        let constants = self.constants();
        let bindings = Self::channel_bindings(self.mode, &flavor);
        self.base
            .activate(&flavor.bytecode, &plan, &bindings, &constants)?;

        self.flavor = Some(flavor);
        self.plan = Some(plan);
        self.closed.store(false, Ordering::SeqCst);
        info!(probe = self.name(), mode = ?self.mode, "module started successfully");
        Ok(())
    }

    fn plan(&self) -> Option<&HookPlan> {
        self.plan.as_ref()
    }

    fn dispatch(&self, event: &Event) {
        match event {
            Event::Connect(_) => {}
            Event::MasterSecret(e) => self.save_derived(derive_openssl(e).map(Some)),
            Event::MasterSecretBssl(e) => self.save_derived(derive_boringssl(e)),
            Event::TcSkb(e) => self.save_frame(e),
            Event::SslData(e) => debug!(probe = self.name(), "{}", e),
            Event::Bash(_) => {}
        }
    }

    fn close(&self) -> Result<(), ProbeError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // release every resource before reporting the first failure
        let saved = match &self.capture {
            Some(capture) => self.save_capture(capture),
            None => Ok(()),
        };
        let stopped = self.base.stop();
        let flushed = self.keylog.flush().map_err(ProbeError::from);

        info!(probe = self.name(), "module closed");
        saved.and(stopped).and(flushed)
    }
}
