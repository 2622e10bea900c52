//! eBPF probe management.

use aya::maps::{AsyncPerfEventArray, Map};
use aya::util::online_cpus;
use bytes::BytesMut;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::assets::{bytecode_name, AssetStore, DirAssetStore};
use crate::capture::CaptureSink;
use crate::config::Config;
use crate::error::ProbeError;
use crate::event::{Event, EventKind};

pub mod attach;
pub mod bash;
pub mod plan;
pub mod registry;
pub mod resolve;
pub mod tls;

pub use attach::{AttachSession, Constant};
pub use bash::BashProbe;
pub use plan::{HookPlan, HookPoint, HookTarget, TcDirection};
pub use registry::{ChannelHandle, DecoderRegistry};
pub use resolve::{ElfVersionDetector, FlavorDetector, LibraryFlavor};
pub use tls::{CaptureMode, TlsProbe};

/// The closed set of probe kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ProbeKind {
    /// Shell commands typed into bash
    Bash,
    /// OpenSSL/BoringSSL plaintext and session secrets
    Tls,
}

/// Collaborators a probe needs besides its configuration.
#[derive(Clone)]
pub struct Dependencies {
    pub assets: Arc<dyn AssetStore>,
    pub detector: Arc<dyn FlavorDetector>,
    /// Overrides the capture file writer of the traffic-mirroring mode.
    pub capture: Option<Arc<dyn CaptureSink>>,
}

impl Dependencies {
    pub fn from_config(config: &Config) -> Self {
        Self {
            assets: Arc::new(DirAssetStore::new(&config.global.bytecode_dir)),
            detector: Arc::new(ElfVersionDetector::default()),
            capture: None,
        }
    }
}

/// A kernel data channel taken out of the attachment session.
pub struct KernelChannel {
    pub handle: ChannelHandle,
    pub map: Map,
}

/// Lifecycle shared by every probe kind.
///
/// `init` happens at construction. `dispatch` may be called concurrently
/// from several readers; `close` may race with in-flight dispatches.
pub trait Probe: Send + Sync {
    fn base(&self) -> &ProbeBase;

    fn name(&self) -> &'static str {
        self.base().name()
    }

    /// Resolve the target, build the hook plan, load and attach.
    fn start(&mut self) -> Result<(), ProbeError>;

    /// The plan built by the last successful `start`.
    fn plan(&self) -> Option<&HookPlan>;

    /// Route one decoded event.
    fn dispatch(&self, event: &Event);

    /// Detach everything and flush owned files. Later calls are no-ops.
    fn close(&self) -> Result<(), ProbeError>;

    fn decoder(&self, handle: &ChannelHandle) -> Option<EventKind> {
        self.base().lookup(handle)
    }

    fn take_channels(&self) -> Result<Vec<KernelChannel>, ProbeError> {
        self.base().take_channels()
    }
}

/// Construct and initialize a probe of `kind`.
pub fn init_probe(
    kind: ProbeKind,
    config: Arc<Config>,
    deps: Dependencies,
) -> Result<Box<dyn Probe>, ProbeError> {
    let probe: Box<dyn Probe> = match kind {
        ProbeKind::Bash => Box::new(BashProbe::init(config, &deps)?),
        ProbeKind::Tls => Box::new(TlsProbe::init(config, &deps)?),
    };
    info!(probe = probe.name(), "Probe initialized");
    Ok(probe)
}

/// State common to all probes: configuration, decoder registry and the
/// attachment session.
pub struct ProbeBase {
    name: &'static str,
    config: Arc<Config>,
    assets: Arc<dyn AssetStore>,
    registry: RwLock<DecoderRegistry>,
    session: Mutex<Option<AttachSession>>,
}

impl ProbeBase {
    pub fn new(name: &'static str, config: Arc<Config>, assets: Arc<dyn AssetStore>) -> Self {
        Self {
            name,
            config,
            assets,
            registry: RwLock::new(DecoderRegistry::new()),
            session: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Load-time constants: pid and uid filters plus `extra`, or nothing
    /// when kernel side filtering is disabled.
    pub fn constants(&self, extra: Constant) -> Vec<Constant> {
        let global = &self.config.global;
        if !global.filters_enabled {
            return Vec::new();
        }

        if global.pid <= 0 {
            info!(probe = self.name, "target all process");
        } else {
            info!(probe = self.name, pid = global.pid, "target PID");
        }
        if global.uid <= 0 {
            info!(probe = self.name, "target all users");
        } else {
            info!(probe = self.name, uid = global.uid, "target UID");
        }

        vec![
            Constant {
                name: "target_pid",
                value: global.target_pid(),
            },
            Constant {
                name: "target_uid",
                value: global.target_uid(),
            },
            extra,
        ]
    }

    /// Fetch the bytecode asset, attach `plan` and register a decoder for
    /// every channel in `bindings`. On error nothing stays attached.
    pub fn activate(
        &self,
        bytecode_file: &str,
        plan: &HookPlan,
        bindings: &[(&str, EventKind)],
        constants: &[Constant],
    ) -> Result<(), ProbeError> {
        let asset = bytecode_name(bytecode_file, self.config.global.btf);
        info!(probe = self.name, asset = %asset, "BPF bytecode filename");
        let bytecode = self.assets.load_asset(&asset)?;

        let session = AttachSession::activate(&bytecode, plan, constants)?;
        for (channel, _) in bindings {
            if !session.has_channel(channel) {
                return Err(ProbeError::ChannelNotFound(channel.to_string()));
            }
        }

        let mut registry = self.registry.write();
        registry.clear();
        for (channel, kind) in bindings {
            registry.register(channel, *kind)?;
        }
        *self.session.lock() = Some(session);
        Ok(())
    }

    pub fn lookup(&self, handle: &ChannelHandle) -> Option<EventKind> {
        self.registry.read().lookup(handle)
    }

    pub fn handles(&self) -> Vec<ChannelHandle> {
        self.registry.read().handles()
    }

    pub fn take_channels(&self) -> Result<Vec<KernelChannel>, ProbeError> {
        let mut guard = self.session.lock();
        let session = guard.as_mut().ok_or(ProbeError::NotStarted(self.name))?;
        self.handles()
            .into_iter()
            .map(|handle| {
                let map = session.take_channel(handle.name())?;
                Ok(KernelChannel { handle, map })
            })
            .collect()
    }

    /// Stop every attachment as one unit and forget the channels.
    pub fn stop(&self) -> Result<(), ProbeError> {
        let session = self.session.lock().take();
        self.registry.write().clear();
        match session {
            Some(session) => session.stop_all(),
            None => Ok(()),
        }
    }
}

const PERF_BUFFER_COUNT: usize = 10;
const PERF_BUFFER_SIZE: usize = 8 * 1024;

/// Polls the kernel data channels of a started probe and dispatches every
/// decoded event.
pub struct ProbeManager {
    probe: Arc<dyn Probe>,
    channels: Vec<KernelChannel>,
    readers: Vec<JoinHandle<()>>,
}

impl ProbeManager {
    pub fn new(probe: Arc<dyn Probe>) -> Result<Self, ProbeError> {
        let channels = probe.take_channels()?;
        Ok(Self {
            probe,
            channels,
            readers: Vec::new(),
        })
    }

    /// Spawn one reader per channel and online CPU.
    pub fn spawn_readers(&mut self) -> Result<(), ProbeError> {
        let cpus = online_cpus()?;

        for channel in self.channels.drain(..) {
            let Some(kind) = self.probe.decoder(&channel.handle) else {
                debug!(channel = %channel.handle, "No decoder registered, skipping");
                continue;
            };
            let mut perf = AsyncPerfEventArray::try_from(channel.map)?;

            for &cpu in &cpus {
                let mut buf = perf.open(cpu, None)?;
                let probe = self.probe.clone();
                let name = channel.handle.name().to_string();

                self.readers.push(tokio::spawn(async move {
                    let mut buffers = (0..PERF_BUFFER_COUNT)
                        .map(|_| BytesMut::with_capacity(PERF_BUFFER_SIZE))
                        .collect::<Vec<_>>();

                    loop {
                        let events = match buf.read_events(&mut buffers).await {
                            Ok(events) => events,
                            Err(e) => {
                                warn!(channel = %name, cpu, "Perf buffer read failed: {}", e);
                                break;
                            }
                        };
                        if events.lost > 0 {
                            warn!(channel = %name, cpu, lost = events.lost, "Events lost");
                        }
                        for raw in buffers.iter().take(events.read) {
                            match kind.decode(raw) {
                                Ok(event) => {
                                    debug!(channel = %name, kind = %kind, pid = ?event.pid(), "Event");
                                    probe.dispatch(&event);
                                }
                                Err(e) => warn!(channel = %name, "Failed to decode event: {}", e),
                            }
                        }
                    }
                }));
            }
            info!(channel = %channel.handle, kind = %kind, "Reading kernel channel");
        }
        Ok(())
    }

    /// Run until Ctrl+C, then stop the readers.
    pub async fn run(&mut self) -> Result<(), ProbeError> {
        self.spawn_readers()?;

        tokio::signal::ctrl_c().await?;
        info!(probe = self.probe.name(), "Shutting down");

        for reader in self.readers.drain(..) {
            reader.abort();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PORT: Constant = Constant {
        name: "target_port",
        value: 443,
    };

    fn base(config: Config) -> ProbeBase {
        ProbeBase::new(
            "test",
            Arc::new(config),
            Arc::new(DirAssetStore::new("/nonexistent")),
        )
    }

    #[test]
    fn no_constants_without_filters() {
        let mut config = Config::default();
        config.global.pid = 42;
        assert!(base(config).constants(PORT).is_empty());
    }

    #[test]
    fn constants_are_pid_uid_then_extra() {
        let mut config = Config::default();
        config.global.filters_enabled = true;
        config.global.pid = 42;
        config.global.uid = 1000;

        assert_eq!(
            base(config).constants(PORT),
            vec![
                Constant {
                    name: "target_pid",
                    value: 42
                },
                Constant {
                    name: "target_uid",
                    value: 1000
                },
                PORT,
            ]
        );
    }

    #[test]
    fn negative_filters_inject_zero() {
        let mut config = Config::default();
        config.global.filters_enabled = true;
        config.global.pid = -1;
        config.global.uid = -5;

        let constants = base(config).constants(PORT);
        assert_eq!(constants[0].value, 0);
        assert_eq!(constants[1].value, 0);
    }

    #[test]
    fn take_channels_requires_start() {
        let base = base(Config::default());
        assert!(matches!(
            base.take_channels(),
            Err(ProbeError::NotStarted("test"))
        ));
        assert!(base.stop().is_ok());
    }
}
