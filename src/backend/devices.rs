use crate::backend::types::*;
use crate::backend::xml::XmlNode;
use std::fmt;

// --- Device Kinds ---

/// One kind per device element name. The four character device elements
/// share `CharConfig` but are distinct kinds for capability lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeviceKind {
    Emulator,
    Disk,
    Controller,
    Interface,
    Filesystem,
    Smartcard,
    Serial,
    Parallel,
    Console,
    Channel,
    Input,
    Tpm,
    Graphics,
    Sound,
    Video,
    Hostdev,
    Redirdev,
    Watchdog,
    Memballoon,
    Rng,
    Panic,
    Vsock,
    Unknown,
}

impl DeviceKind {
    pub const ALL: &'static [DeviceKind] = &[
        DeviceKind::Emulator,
        DeviceKind::Disk,
        DeviceKind::Controller,
        DeviceKind::Interface,
        DeviceKind::Filesystem,
        DeviceKind::Smartcard,
        DeviceKind::Serial,
        DeviceKind::Parallel,
        DeviceKind::Console,
        DeviceKind::Channel,
        DeviceKind::Input,
        DeviceKind::Tpm,
        DeviceKind::Graphics,
        DeviceKind::Sound,
        DeviceKind::Video,
        DeviceKind::Hostdev,
        DeviceKind::Redirdev,
        DeviceKind::Watchdog,
        DeviceKind::Memballoon,
        DeviceKind::Rng,
        DeviceKind::Panic,
        DeviceKind::Vsock,
    ];

    pub fn element_name(&self) -> &'static str {
        match self {
            DeviceKind::Emulator => "emulator",
            DeviceKind::Disk => "disk",
            DeviceKind::Controller => "controller",
            DeviceKind::Interface => "interface",
            DeviceKind::Filesystem => "filesystem",
            DeviceKind::Smartcard => "smartcard",
            DeviceKind::Serial => "serial",
            DeviceKind::Parallel => "parallel",
            DeviceKind::Console => "console",
            DeviceKind::Channel => "channel",
            DeviceKind::Input => "input",
            DeviceKind::Tpm => "tpm",
            DeviceKind::Graphics => "graphics",
            DeviceKind::Sound => "sound",
            DeviceKind::Video => "video",
            DeviceKind::Hostdev => "hostdev",
            DeviceKind::Redirdev => "redirdev",
            DeviceKind::Watchdog => "watchdog",
            DeviceKind::Memballoon => "memballoon",
            DeviceKind::Rng => "rng",
            DeviceKind::Panic => "panic",
            DeviceKind::Vsock => "vsock",
            DeviceKind::Unknown => "unknown",
        }
    }

    pub fn from_element_name(s: &str) -> Option<Self> {
        DeviceKind::ALL
            .iter()
            .copied()
            .find(|k| k.element_name() == s)
    }

    pub fn label(&self) -> &'static str {
        match self {
            DeviceKind::Emulator => "Emulator",
            DeviceKind::Disk => "Disk",
            DeviceKind::Controller => "Controller",
            DeviceKind::Interface => "Network Interface",
            DeviceKind::Filesystem => "Filesystem",
            DeviceKind::Smartcard => "Smartcard",
            DeviceKind::Serial => "Serial",
            DeviceKind::Parallel => "Parallel",
            DeviceKind::Console => "Console",
            DeviceKind::Channel => "Channel",
            DeviceKind::Input => "Input",
            DeviceKind::Tpm => "TPM",
            DeviceKind::Graphics => "Graphics",
            DeviceKind::Sound => "Sound",
            DeviceKind::Video => "Video",
            DeviceKind::Hostdev => "Host Device",
            DeviceKind::Redirdev => "USB Redirector",
            DeviceKind::Watchdog => "Watchdog",
            DeviceKind::Memballoon => "Memory Balloon",
            DeviceKind::Rng => "RNG",
            DeviceKind::Panic => "Panic Notifier",
            DeviceKind::Vsock => "VirtIO VSOCK",
            DeviceKind::Unknown => "Unknown",
        }
    }
}

impl From<CharKind> for DeviceKind {
    fn from(kind: CharKind) -> Self {
        match kind {
            CharKind::Serial => DeviceKind::Serial,
            CharKind::Parallel => DeviceKind::Parallel,
            CharKind::Console => DeviceKind::Console,
            CharKind::Channel => DeviceKind::Channel,
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// --- Disk ---

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DiskDriver {
    pub name: Option<String>,
    /// Image format, the `type` attribute (`qcow2`, `raw`).
    pub format: Option<String>,
    pub cache: Option<String>,
    pub io: Option<String>,
    pub discard: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DiskSource {
    pub file: Option<String>,
    pub dev: Option<String>,
    pub dir: Option<String>,
    pub protocol: Option<String>,
    pub name: Option<String>,
    pub pool: Option<String>,
    pub volume: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DiskTarget {
    pub dev: Option<String>,
    pub bus: Option<DiskBus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DiskConfig {
    pub disk_type: Option<DiskType>,
    pub device: Option<DiskDevice>,
    pub driver: Option<DiskDriver>,
    pub source: Option<DiskSource>,
    pub target: Option<DiskTarget>,
    pub readonly: bool,
    pub shareable: bool,
    pub serial: Option<String>,
    pub boot_order: Option<u32>,
}

impl DiskConfig {
    pub fn target_dev(&self) -> Option<&str> {
        self.target.as_ref().and_then(|t| t.dev.as_deref())
    }

    pub fn source_path(&self) -> Option<&str> {
        let src = self.source.as_ref()?;
        src.file
            .as_deref()
            .or(src.dev.as_deref())
            .or(src.dir.as_deref())
            .or(src.name.as_deref())
            .or(src.volume.as_deref())
    }

    pub fn display_name(&self) -> String {
        let kind = match &self.device {
            Some(DiskDevice::Cdrom) => "CD-ROM",
            Some(DiskDevice::Floppy) => "Floppy",
            _ => "Disk",
        };
        match self.target_dev() {
            Some(dev) => format!("{kind} {dev}"),
            None => kind.to_string(),
        }
    }

    pub fn display_subtitle(&self) -> String {
        let bus = self
            .target
            .as_ref()
            .and_then(|t| t.bus.as_ref())
            .map(|b| b.as_str())
            .unwrap_or("default");
        format!("{} ({bus})", self.source_path().unwrap_or("empty"))
    }
}

// --- Network Interface ---

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InterfaceSource {
    pub network: Option<String>,
    pub bridge: Option<String>,
    pub dev: Option<String>,
    pub mode: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InterfaceConfig {
    pub interface_type: Option<InterfaceType>,
    pub mac: Option<String>,
    pub source: Option<InterfaceSource>,
    pub target_dev: Option<String>,
    pub model: Option<NicModel>,
    /// `<link state=…/>`, `up` or `down`.
    pub link_state: Option<String>,
    pub boot_order: Option<u32>,
}

impl InterfaceConfig {
    pub fn display_name(&self) -> String {
        match &self.mac {
            Some(mac) => format!("NIC {mac}"),
            None => "NIC".to_string(),
        }
    }

    pub fn display_subtitle(&self) -> String {
        let source = self.source.as_ref().and_then(|s| {
            s.network
                .as_deref()
                .or(s.bridge.as_deref())
                .or(s.dev.as_deref())
        });
        let model = self.model.as_ref().map(|m| m.as_str()).unwrap_or("default");
        format!("{} ({model})", source.unwrap_or("unconnected"))
    }
}

// --- Controller / Input / Sound ---

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ControllerConfig {
    pub controller_type: Option<ControllerType>,
    pub index: Option<u32>,
    pub model: Option<String>,
    pub ports: Option<u32>,
    pub vectors: Option<u32>,
    /// `<driver queues=…/>`
    pub queues: Option<u32>,
}

impl ControllerConfig {
    pub fn display_name(&self) -> String {
        let ty = self
            .controller_type
            .as_ref()
            .map(|t| t.label())
            .unwrap_or("Generic");
        match self.index {
            Some(index) => format!("{ty} Controller {index}"),
            None => format!("{ty} Controller"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InputConfig {
    pub input_type: Option<InputType>,
    pub bus: Option<InputBus>,
    /// `<source evdev=…/>` for passthrough inputs.
    pub source_evdev: Option<String>,
}

impl InputConfig {
    pub fn display_name(&self) -> String {
        let bus = self.bus.as_ref().map(|b| b.label()).unwrap_or("");
        let kind = self.input_type.as_ref().map(|t| t.label()).unwrap_or("Input");
        format!("{bus} {kind}").trim().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SoundConfig {
    pub model: Option<SoundModel>,
    /// `<codec type=…/>` entries in order.
    pub codecs: Vec<String>,
}

// --- Host Device ---

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HostdevSource {
    pub vendor_id: Option<String>,
    pub product_id: Option<String>,
    /// Host-side address; PCI addresses carry no `type` attribute here.
    pub address: Option<Address>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HostdevConfig {
    pub mode: Option<HostdevMode>,
    pub hostdev_type: Option<HostdevType>,
    pub managed: TriState,
    pub source: Option<HostdevSource>,
    pub boot_order: Option<u32>,
    /// `<rom bar='on|off'/>`
    pub rom_bar: TriState,
}

impl HostdevConfig {
    pub fn display_name(&self) -> String {
        match &self.hostdev_type {
            Some(HostdevType::Usb) => "USB Host Device".to_string(),
            Some(HostdevType::Pci) => "PCI Host Device".to_string(),
            Some(other) => format!("{} Host Device", other.label()),
            None => "Host Device".to_string(),
        }
    }

    pub fn display_subtitle(&self) -> String {
        let Some(src) = &self.source else {
            return String::new();
        };
        if let (Some(v), Some(p)) = (&src.vendor_id, &src.product_id) {
            return format!("{v}:{p}");
        }
        src.address
            .as_ref()
            .map(|a| a.display_subtitle())
            .unwrap_or_default()
    }
}

// --- Character Devices ---

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CharSource {
    pub mode: Option<String>,
    pub path: Option<String>,
    pub host: Option<String>,
    pub service: Option<String>,
    pub channel: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CharTarget {
    pub target_type: Option<String>,
    pub port: Option<u32>,
    pub name: Option<String>,
    pub state: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharConfig {
    pub kind: CharKind,
    pub source_type: Option<CharSourceType>,
    pub source: Option<CharSource>,
    /// `<protocol type=…/>`, tcp only.
    pub protocol: Option<String>,
    pub target: Option<CharTarget>,
}

impl CharConfig {
    pub fn new(kind: CharKind, source_type: CharSourceType) -> Self {
        Self {
            kind,
            source_type: Some(source_type),
            source: None,
            protocol: None,
            target: None,
        }
    }

    pub fn display_name(&self) -> String {
        match self.target.as_ref() {
            Some(CharTarget { port: Some(port), .. }) => format!("{} Port {port}", self.kind),
            Some(CharTarget { name: Some(name), .. }) => format!("{} {name}", self.kind),
            _ => self.kind.label().to_string(),
        }
    }
}

// --- Video / Graphics ---

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VideoConfig {
    /// Set when the `<model>` element is present; the remaining fields are
    /// its attributes and are only written alongside it.
    pub model: Option<VideoModel>,
    pub ram: Option<u32>,
    pub vram: Option<u32>,
    pub vgamem: Option<u32>,
    pub heads: Option<u32>,
    pub primary: TriState,
    pub accel3d: TriState,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GraphicsListen {
    pub listen_type: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GraphicsGl {
    pub enable: TriState,
    pub rendernode: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GraphicsConfig {
    pub graphics_type: Option<GraphicsType>,
    /// `-1` asks the hypervisor to allocate one.
    pub port: Option<i32>,
    pub autoport: TriState,
    /// The legacy `listen` attribute.
    pub listen_address: Option<String>,
    pub passwd: Option<String>,
    pub listen: Option<GraphicsListen>,
    pub gl: Option<GraphicsGl>,
}

// --- Watchdog / Panic / Memballoon ---

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WatchdogConfig {
    pub model: Option<WatchdogModel>,
    pub action: Option<WatchdogAction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PanicConfig {
    pub model: Option<PanicModel>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MemballoonConfig {
    pub model: Option<MemballoonModel>,
    /// `<stats period=…/>` in seconds.
    pub stats_period: Option<u32>,
}

// --- Filesystem / Smartcard / Redirection ---

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FilesystemConfig {
    pub fs_type: Option<FsType>,
    pub access_mode: Option<FsAccessMode>,
    pub driver_type: Option<FsDriverType>,
    pub source_dir: Option<String>,
    pub target_dir: Option<String>,
    pub readonly: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SmartcardConfig {
    pub mode: Option<SmartcardMode>,
    /// Character backend for passthrough mode, the `type` attribute.
    pub passthrough_type: Option<CharSourceType>,
    pub certificates: Vec<String>,
    pub database: Option<String>,
    pub source: Option<CharSource>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RedirdevConfig {
    pub bus: Option<RedirBus>,
    pub redir_type: Option<CharSourceType>,
    pub source: Option<CharSource>,
    pub boot_order: Option<u32>,
}

// --- TPM / RNG / VSOCK ---

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TpmBackend {
    pub backend_type: Option<TpmBackendType>,
    pub version: Option<String>,
    /// `<device path=…/>`, passthrough only.
    pub device_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TpmConfig {
    pub model: Option<TpmModel>,
    pub backend: Option<TpmBackend>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RngRate {
    pub bytes: Option<u32>,
    pub period: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RngBackend {
    pub model: Option<RngBackendModel>,
    /// Character backend type for `egd`.
    pub backend_type: Option<String>,
    /// Host entropy device, the text of a `random` backend.
    pub path: Option<String>,
    pub source: Option<CharSource>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RngConfig {
    pub model: Option<RngModel>,
    pub rate: Option<RngRate>,
    pub backend: Option<RngBackend>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VsockCid {
    pub auto: TriState,
    pub address: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VsockConfig {
    pub model: Option<String>,
    pub cid: Option<VsockCid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EmulatorConfig {
    pub path: String,
}

/// A device element this crate has no mapping for. The element itself lives
/// in the device's raw content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownDevice {
    pub element: String,
}

// --- Device ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceConfig {
    Disk(DiskConfig),
    Interface(InterfaceConfig),
    Controller(ControllerConfig),
    Input(InputConfig),
    Sound(SoundConfig),
    Hostdev(HostdevConfig),
    Char(CharConfig),
    Video(VideoConfig),
    Watchdog(WatchdogConfig),
    Filesystem(FilesystemConfig),
    Smartcard(SmartcardConfig),
    Redirdev(RedirdevConfig),
    Tpm(TpmConfig),
    Rng(RngConfig),
    Panic(PanicConfig),
    Vsock(VsockConfig),
    Graphics(GraphicsConfig),
    Memballoon(MemballoonConfig),
    Emulator(EmulatorConfig),
    Unknown(UnknownDevice),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub config: DeviceConfig,
    pub address: Option<Address>,
    alias: Option<String>,
    raw_extra: RawExtra,
}

impl Device {
    pub fn new(config: DeviceConfig) -> Self {
        Self {
            config,
            address: None,
            alias: None,
            raw_extra: RawExtra::default(),
        }
    }

    pub(crate) fn from_parts(
        config: DeviceConfig,
        address: Option<Address>,
        alias: Option<String>,
        raw_extra: RawExtra,
    ) -> Self {
        Self {
            config,
            address,
            alias,
            raw_extra,
        }
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub(crate) fn set_alias(&mut self, alias: Option<String>) {
        self.alias = alias;
    }

    pub fn raw_extra(&self) -> &RawExtra {
        &self.raw_extra
    }

    pub fn kind(&self) -> DeviceKind {
        match &self.config {
            DeviceConfig::Disk(_) => DeviceKind::Disk,
            DeviceConfig::Interface(_) => DeviceKind::Interface,
            DeviceConfig::Controller(_) => DeviceKind::Controller,
            DeviceConfig::Input(_) => DeviceKind::Input,
            DeviceConfig::Sound(_) => DeviceKind::Sound,
            DeviceConfig::Hostdev(_) => DeviceKind::Hostdev,
            DeviceConfig::Char(c) => c.kind.into(),
            DeviceConfig::Video(_) => DeviceKind::Video,
            DeviceConfig::Watchdog(_) => DeviceKind::Watchdog,
            DeviceConfig::Filesystem(_) => DeviceKind::Filesystem,
            DeviceConfig::Smartcard(_) => DeviceKind::Smartcard,
            DeviceConfig::Redirdev(_) => DeviceKind::Redirdev,
            DeviceConfig::Tpm(_) => DeviceKind::Tpm,
            DeviceConfig::Rng(_) => DeviceKind::Rng,
            DeviceConfig::Panic(_) => DeviceKind::Panic,
            DeviceConfig::Vsock(_) => DeviceKind::Vsock,
            DeviceConfig::Graphics(_) => DeviceKind::Graphics,
            DeviceConfig::Memballoon(_) => DeviceKind::Memballoon,
            DeviceConfig::Emulator(_) => DeviceKind::Emulator,
            DeviceConfig::Unknown(_) => DeviceKind::Unknown,
        }
    }

    /// Field values that the hypervisor's capabilities may restrict, keyed by
    /// the field names used in `CapabilitySnapshot`.
    pub fn constrained_values(&self) -> Vec<(&'static str, String)> {
        fn push<T: XmlValue>(out: &mut Vec<(&'static str, String)>, field: &'static str, v: &Option<T>) {
            if let Some(v) = v {
                out.push((field, v.xml_value().into_owned()));
            }
        }

        let mut out = Vec::new();
        match &self.config {
            DeviceConfig::Disk(d) => {
                push(&mut out, "device", &d.device);
                push(&mut out, "bus", &d.target.as_ref().and_then(|t| t.bus.clone()));
            }
            DeviceConfig::Interface(i) => {
                push(&mut out, "type", &i.interface_type);
                push(&mut out, "model", &i.model);
            }
            DeviceConfig::Controller(c) => {
                push(&mut out, "type", &c.controller_type);
                push(&mut out, "model", &c.model);
            }
            DeviceConfig::Input(i) => {
                push(&mut out, "type", &i.input_type);
                push(&mut out, "bus", &i.bus);
            }
            DeviceConfig::Sound(s) => push(&mut out, "model", &s.model),
            DeviceConfig::Hostdev(h) => {
                push(&mut out, "mode", &h.mode);
                push(&mut out, "type", &h.hostdev_type);
            }
            DeviceConfig::Char(c) => push(&mut out, "type", &c.source_type),
            DeviceConfig::Video(v) => push(&mut out, "model", &v.model),
            DeviceConfig::Watchdog(w) => {
                push(&mut out, "model", &w.model);
                push(&mut out, "action", &w.action);
            }
            DeviceConfig::Filesystem(f) => {
                push(&mut out, "driver_type", &f.driver_type);
                push(&mut out, "accessmode", &f.access_mode);
            }
            DeviceConfig::Smartcard(s) => push(&mut out, "mode", &s.mode),
            DeviceConfig::Redirdev(r) => {
                push(&mut out, "bus", &r.bus);
                push(&mut out, "type", &r.redir_type);
            }
            DeviceConfig::Tpm(t) => {
                push(&mut out, "model", &t.model);
                if let Some(backend) = &t.backend {
                    push(&mut out, "backend_type", &backend.backend_type);
                    push(&mut out, "backend_version", &backend.version);
                }
            }
            DeviceConfig::Rng(r) => {
                push(&mut out, "model", &r.model);
                if let Some(backend) = &r.backend {
                    push(&mut out, "backend_model", &backend.model);
                }
            }
            DeviceConfig::Panic(p) => push(&mut out, "model", &p.model),
            DeviceConfig::Vsock(v) => push(&mut out, "model", &v.model),
            DeviceConfig::Graphics(g) => push(&mut out, "type", &g.graphics_type),
            DeviceConfig::Memballoon(m) => push(&mut out, "model", &m.model),
            DeviceConfig::Emulator(_) | DeviceConfig::Unknown(_) => {}
        }
        out
    }

    pub fn display_name(&self) -> String {
        match &self.config {
            DeviceConfig::Disk(d) => d.display_name(),
            DeviceConfig::Interface(i) => i.display_name(),
            DeviceConfig::Controller(c) => c.display_name(),
            DeviceConfig::Input(i) => i.display_name(),
            DeviceConfig::Hostdev(h) => h.display_name(),
            DeviceConfig::Char(c) => c.display_name(),
            DeviceConfig::Video(v) => match &v.model {
                Some(m) => format!("Video {}", m.label()),
                None => "Video".to_string(),
            },
            DeviceConfig::Sound(s) => match &s.model {
                Some(m) => format!("Sound {}", m.label()),
                None => "Sound".to_string(),
            },
            DeviceConfig::Graphics(g) => match &g.graphics_type {
                Some(t) => format!("Display {}", t.label()),
                None => "Display".to_string(),
            },
            DeviceConfig::Emulator(e) => format!("Emulator {}", e.path),
            DeviceConfig::Unknown(u) => format!("<{}>", u.element),
            _ => self.kind().label().to_string(),
        }
    }
}

// --- Domain Document ---

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Vcpu {
    pub count: u32,
    pub placement: Option<String>,
    pub current: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OsConfig {
    pub firmware: Option<String>,
    /// Text of `<type>`, usually `hvm`.
    pub os_type: Option<String>,
    pub arch: Option<String>,
    pub machine: Option<String>,
    pub boot: Vec<BootDevice>,
}

/// A whole `<domain>` definition: the typed header fields, the ordered
/// device list and everything else kept raw.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DomainDocument {
    /// The `type` attribute of `<domain>` (`kvm`, `qemu`).
    pub virt_type: Option<String>,
    pub name: Option<String>,
    pub uuid: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub memory: Option<MemorySize>,
    pub current_memory: Option<MemorySize>,
    pub vcpu: Option<Vcpu>,
    pub os: Option<OsConfig>,
    pub devices: Vec<Device>,
    pub(crate) devices_section: bool,
    pub(crate) raw_extra: RawExtra,
    pub(crate) prolog: Vec<XmlNode>,
    pub(crate) epilog: Vec<XmlNode>,
}

impl DomainDocument {
    pub fn new(virt_type: &str, name: &str) -> Self {
        Self {
            virt_type: Some(virt_type.to_string()),
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    pub fn raw_extra(&self) -> &RawExtra {
        &self.raw_extra
    }

    pub fn emulator(&self) -> Option<&str> {
        self.devices.iter().find_map(|d| match &d.config {
            DeviceConfig::Emulator(e) => Some(e.path.as_str()),
            _ => None,
        })
    }

    /// Add a device where libvirt would place it: controllers go right after
    /// the last existing controller (or ahead of the first non-emulator
    /// device), everything else is appended. Returns the new index.
    pub fn add_device(&mut self, device: Device) -> usize {
        let index = if device.kind() == DeviceKind::Controller {
            let after_last = self
                .devices
                .iter()
                .rposition(|d| d.kind() == DeviceKind::Controller)
                .map(|i| i + 1);
            after_last.unwrap_or_else(|| {
                self.devices
                    .iter()
                    .position(|d| d.kind() != DeviceKind::Emulator)
                    .unwrap_or(self.devices.len())
            })
        } else {
            self.devices.len()
        };
        self.devices.insert(index, device);
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(index: u32) -> Device {
        Device::new(DeviceConfig::Controller(ControllerConfig {
            controller_type: Some(ControllerType::Usb),
            index: Some(index),
            ..Default::default()
        }))
    }

    fn disk(dev: &str) -> Device {
        Device::new(DeviceConfig::Disk(DiskConfig {
            target: Some(DiskTarget {
                dev: Some(dev.to_string()),
                bus: Some(DiskBus::Virtio),
            }),
            ..Default::default()
        }))
    }

    #[test]
    fn char_kinds_are_distinct_device_kinds() {
        let console = Device::new(DeviceConfig::Char(CharConfig::new(
            CharKind::Console,
            CharSourceType::Pty,
        )));
        assert_eq!(console.kind(), DeviceKind::Console);
        assert_eq!(console.constrained_values(), vec![("type", "pty".to_string())]);
    }

    #[test]
    fn controllers_are_grouped() {
        let mut doc = DomainDocument::new("kvm", "vm");
        doc.add_device(Device::new(DeviceConfig::Emulator(EmulatorConfig {
            path: "/usr/bin/qemu-system-x86_64".into(),
        })));
        doc.add_device(disk("vda"));
        assert_eq!(doc.add_device(controller(0)), 1);
        doc.add_device(disk("vdb"));
        assert_eq!(doc.add_device(controller(1)), 2);
        let kinds: Vec<DeviceKind> = doc.devices.iter().map(Device::kind).collect();
        assert_eq!(
            kinds,
            vec![
                DeviceKind::Emulator,
                DeviceKind::Controller,
                DeviceKind::Controller,
                DeviceKind::Disk,
                DeviceKind::Disk
            ]
        );
    }

    #[test]
    fn tpm_constrained_values_include_backend() {
        let tpm = Device::new(DeviceConfig::Tpm(TpmConfig {
            model: Some(TpmModel::Crb),
            backend: Some(TpmBackend {
                backend_type: Some(TpmBackendType::Emulator),
                version: Some("2.0".into()),
                device_path: None,
            }),
        }));
        assert_eq!(
            tpm.constrained_values(),
            vec![
                ("model", "tpm-crb".to_string()),
                ("backend_type", "emulator".to_string()),
                ("backend_version", "2.0".to_string()),
            ]
        );
    }

    #[test]
    fn new_device_has_no_alias_or_raw_content() {
        let d = disk("vda");
        assert_eq!(d.alias(), None);
        assert!(d.raw_extra().is_empty());
        assert_eq!(d.display_name(), "Disk vda");
    }
}
