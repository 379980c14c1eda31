use crate::backend::xml::XmlNode;
use std::borrow::Cow;
use std::fmt;

/// String form of a typed value as written into an XML attribute or text node.
pub trait XmlValue {
    fn xml_value(&self) -> Cow<'_, str>;
}

impl XmlValue for str {
    fn xml_value(&self) -> Cow<'_, str> {
        Cow::Borrowed(self)
    }
}

impl XmlValue for String {
    fn xml_value(&self) -> Cow<'_, str> {
        Cow::Borrowed(self.as_str())
    }
}

macro_rules! xml_value_via_to_string {
    ($($ty:ty),+) => {
        $(impl XmlValue for $ty {
            fn xml_value(&self) -> Cow<'_, str> {
                Cow::Owned(self.to_string())
            }
        })+
    };
}

xml_value_via_to_string!(u32, u64, i32);

/// Declares a permissive enum for an XML enumeration attribute: known
/// variants map to their libvirt spelling, anything else is kept in
/// `Other` so decoding never loses a value the model disagrees with.
macro_rules! xml_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $($variant:ident => $xml:literal, $label:literal;)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant,)+
            Other(String),
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &str {
                match self {
                    $($name::$variant => $xml,)+
                    $name::Other(s) => s.as_str(),
                }
            }

            pub fn from_xml_str(s: &str) -> Self {
                match s {
                    $($xml => $name::$variant,)+
                    other => $name::Other(other.to_string()),
                }
            }

            pub fn label(&self) -> &str {
                match self {
                    $($name::$variant => $label,)+
                    $name::Other(s) => s.as_str(),
                }
            }

            pub fn is_known(&self) -> bool {
                !matches!(self, $name::Other(_))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.label())
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                $name::from_xml_str(s)
            }
        }

        impl XmlValue for $name {
            fn xml_value(&self) -> Cow<'_, str> {
                Cow::Borrowed(self.as_str())
            }
        }
    };
}

// --- Shared Field Types ---

/// Boolean attribute that may also be absent (hypervisor default).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum TriState {
    #[default]
    Default,
    Yes,
    No,
    Other(String),
}

impl TriState {
    pub fn from_yes_no(s: Option<&str>) -> Self {
        match s {
            None => TriState::Default,
            Some("yes") => TriState::Yes,
            Some("no") => TriState::No,
            Some(other) => TriState::Other(other.to_string()),
        }
    }

    pub fn from_on_off(s: Option<&str>) -> Self {
        match s {
            None => TriState::Default,
            Some("on") => TriState::Yes,
            Some("off") => TriState::No,
            Some(other) => TriState::Other(other.to_string()),
        }
    }

    pub fn as_yes_no(&self) -> Option<&str> {
        match self {
            TriState::Default => None,
            TriState::Yes => Some("yes"),
            TriState::No => Some("no"),
            TriState::Other(s) => Some(s.as_str()),
        }
    }

    pub fn as_on_off(&self) -> Option<&str> {
        match self {
            TriState::Default => None,
            TriState::Yes => Some("on"),
            TriState::No => Some("off"),
            TriState::Other(s) => Some(s.as_str()),
        }
    }

    pub fn is_yes(&self) -> bool {
        *self == TriState::Yes
    }

    pub fn is_default(&self) -> bool {
        *self == TriState::Default
    }
}

impl From<bool> for TriState {
    fn from(v: bool) -> Self {
        if v {
            TriState::Yes
        } else {
            TriState::No
        }
    }
}

xml_enum! {
    pub enum SizeUnit {
        Bytes => "bytes", "bytes";
        B => "b", "bytes";
        Kb => "KB", "KB";
        K => "k", "KiB";
        KiB => "KiB", "KiB";
        Mb => "MB", "MB";
        M => "M", "MiB";
        MiB => "MiB", "MiB";
        Gb => "GB", "GB";
        G => "G", "GiB";
        GiB => "GiB", "GiB";
        Tb => "TB", "TB";
        T => "T", "TiB";
        TiB => "TiB", "TiB";
    }
}

impl SizeUnit {
    /// Bytes per unit, `None` for spellings libvirt does not define.
    pub fn multiplier(&self) -> Option<u64> {
        const KIB: u64 = 1024;
        Some(match self {
            SizeUnit::Bytes | SizeUnit::B => 1,
            SizeUnit::Kb => 1000,
            SizeUnit::K | SizeUnit::KiB => KIB,
            SizeUnit::Mb => 1000 * 1000,
            SizeUnit::M | SizeUnit::MiB => KIB * KIB,
            SizeUnit::Gb => 1000 * 1000 * 1000,
            SizeUnit::G | SizeUnit::GiB => KIB * KIB * KIB,
            SizeUnit::Tb => 1000 * 1000 * 1000 * 1000,
            SizeUnit::T | SizeUnit::TiB => KIB * KIB * KIB * KIB,
            SizeUnit::Other(_) => return None,
        })
    }
}

/// A scaled integer such as `<memory unit="KiB">4194304</memory>`.
/// A missing unit means KiB, as in libvirt.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemorySize {
    pub value: u64,
    pub unit: Option<SizeUnit>,
}

impl MemorySize {
    pub fn kib(value: u64) -> Self {
        Self {
            value,
            unit: Some(SizeUnit::KiB),
        }
    }

    pub fn mib(value: u64) -> Self {
        Self {
            value,
            unit: Some(SizeUnit::MiB),
        }
    }

    pub fn to_bytes(&self) -> Option<u64> {
        let mult = match &self.unit {
            Some(unit) => unit.multiplier()?,
            None => 1024,
        };
        self.value.checked_mul(mult)
    }

    pub fn to_kib(&self) -> Option<u64> {
        self.to_bytes().map(|b| b / 1024)
    }
}

xml_enum! {
    pub enum BootDevice {
        Hd => "hd", "Hard Disk";
        Cdrom => "cdrom", "CD-ROM";
        Network => "network", "Network (PXE)";
        Fd => "fd", "Floppy";
    }
}

/// Bus address of a device. Opaque beyond round-tripping: the `type`
/// attribute plus every other attribute in document order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Address {
    pub address_type: Option<String>,
    pub attrs: Vec<(String, String)>,
}

impl Address {
    pub fn pci(domain: u16, bus: u8, slot: u8, function: u8) -> Self {
        Self {
            address_type: Some("pci".to_string()),
            attrs: vec![
                ("domain".to_string(), format!("0x{domain:04x}")),
                ("bus".to_string(), format!("0x{bus:02x}")),
                ("slot".to_string(), format!("0x{slot:02x}")),
                ("function".to_string(), format!("0x{function:x}")),
            ],
        }
    }

    pub fn drive(controller: u32, bus: u32, target: u32, unit: u32) -> Self {
        Self {
            address_type: Some("drive".to_string()),
            attrs: vec![
                ("controller".to_string(), controller.to_string()),
                ("bus".to_string(), bus.to_string()),
                ("target".to_string(), target.to_string()),
                ("unit".to_string(), unit.to_string()),
            ],
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Index of the controller this address hangs off, for controller-relative types.
    pub fn controller(&self) -> Option<u32> {
        self.get("controller").and_then(|v| v.parse().ok())
    }

    pub fn display_subtitle(&self) -> String {
        match self.address_type.as_deref() {
            Some("pci") | None if self.get("slot").is_some() => format!(
                "PCI {}:{}:{}.{}",
                self.get("domain").unwrap_or("0000").trim_start_matches("0x"),
                self.get("bus").unwrap_or("00").trim_start_matches("0x"),
                self.get("slot").unwrap_or("00").trim_start_matches("0x"),
                self.get("function").unwrap_or("0").trim_start_matches("0x"),
            ),
            Some(kind) => {
                let parts: Vec<String> =
                    self.attrs.iter().map(|(k, v)| format!("{k}={v}")).collect();
                format!("{kind} {}", parts.join(" "))
            }
            None => String::new(),
        }
    }
}

// --- Unrecognized Content ---

/// One step of the path from a device (or domain) element down to the
/// sub-element an unrecognized item was found in: `target[0]` is the first
/// `<target>` child.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeStep {
    pub name: String,
    pub occurrence: usize,
}

impl fmt::Display for ScopeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.name, self.occurrence)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawContent {
    Attribute { name: String, value: String },
    Node(XmlNode),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawItem {
    pub scope: Vec<ScopeStep>,
    /// Index among the attributes (or child nodes) of the scoped element
    /// at the time it was decoded.
    pub position: usize,
    /// For a raw element, how many same-named siblings were decoded into
    /// typed fields. Emitting more than that replaces the raw element.
    pub decoded_siblings: usize,
    pub content: RawContent,
}

/// Content the codec could not map onto typed fields, kept in encounter
/// order. Only the codec writes it; everything else sees it read-only.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawExtra {
    items: Vec<RawItem>,
}

impl RawExtra {
    pub fn items(&self) -> &[RawItem] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Unrecognized child elements directly under the owning element.
    pub fn top_level_elements(&self) -> impl Iterator<Item = &crate::backend::xml::XmlElement> {
        self.items.iter().filter_map(|item| match &item.content {
            RawContent::Node(XmlNode::Element(el)) if item.scope.is_empty() => Some(el),
            _ => None,
        })
    }

    pub(crate) fn push(&mut self, item: RawItem) {
        self.items.push(item);
    }

    pub(crate) fn in_scope<'a>(
        &'a self,
        scope: &'a [ScopeStep],
    ) -> impl Iterator<Item = &'a RawItem> + 'a {
        self.items.iter().filter(move |item| item.scope == scope)
    }

    /// Direct child steps below `scope` that carry raw content somewhere beneath them.
    pub(crate) fn child_steps(&self, scope: &[ScopeStep]) -> Vec<ScopeStep> {
        let mut steps: Vec<ScopeStep> = Vec::new();
        for item in &self.items {
            if item.scope.len() > scope.len() && item.scope.starts_with(scope) {
                let step = &item.scope[scope.len()];
                if !steps.contains(step) {
                    steps.push(step.clone());
                }
            }
        }
        steps
    }
}

// --- Disk / Interface Types ---

xml_enum! {
    pub enum DiskType {
        File => "file", "File";
        Block => "block", "Block device";
        Dir => "dir", "Directory";
        Network => "network", "Network";
        Volume => "volume", "Storage volume";
    }
}

xml_enum! {
    pub enum DiskDevice {
        Disk => "disk", "Disk";
        Cdrom => "cdrom", "CD-ROM";
        Floppy => "floppy", "Floppy";
        Lun => "lun", "LUN";
    }
}

xml_enum! {
    pub enum DiskBus {
        Virtio => "virtio", "VirtIO";
        Sata => "sata", "SATA";
        Scsi => "scsi", "SCSI";
        Ide => "ide", "IDE";
        Usb => "usb", "USB";
        Fdc => "fdc", "Floppy controller";
        Xen => "xen", "Xen";
        Sd => "sd", "SD card";
    }
}

xml_enum! {
    pub enum InterfaceType {
        Network => "network", "Virtual network";
        Bridge => "bridge", "Bridge device";
        Direct => "direct", "Macvtap";
        User => "user", "Usermode networking";
        Ethernet => "ethernet", "Generic ethernet";
        Hostdev => "hostdev", "PCI passthrough";
        Vhostuser => "vhostuser", "vhost-user";
    }
}

xml_enum! {
    pub enum NicModel {
        Virtio => "virtio", "VirtIO";
        E1000 => "e1000", "e1000";
        E1000e => "e1000e", "e1000e";
        Rtl8139 => "rtl8139", "rtl8139";
    }
}

// --- Controller / Input Types ---

xml_enum! {
    pub enum ControllerType {
        Usb => "usb", "USB";
        Pci => "pci", "PCI";
        Scsi => "scsi", "SCSI";
        Sata => "sata", "SATA";
        Ide => "ide", "IDE";
        Fdc => "fdc", "Floppy";
        VirtioSerial => "virtio-serial", "VirtIO Serial";
        Ccid => "ccid", "CCID";
        Xenbus => "xenbus", "Xenbus";
        Isa => "isa", "ISA";
    }
}

xml_enum! {
    pub enum InputType {
        Mouse => "mouse", "Mouse";
        Tablet => "tablet", "Tablet";
        Keyboard => "keyboard", "Keyboard";
        Passthrough => "passthrough", "Passthrough";
        Evdev => "evdev", "Evdev";
    }
}

xml_enum! {
    pub enum InputBus {
        Ps2 => "ps2", "PS/2";
        Usb => "usb", "USB";
        Virtio => "virtio", "VirtIO";
        Xen => "xen", "Xen";
    }
}

// --- Sound / Video / Graphics Types ---

xml_enum! {
    pub enum SoundModel {
        Ich9 => "ich9", "ICH9";
        Ich7 => "ich7", "ICH7";
        Ich6 => "ich6", "ICH6";
        Ac97 => "ac97", "AC97";
        Es1370 => "es1370", "ES1370";
        Sb16 => "sb16", "Sound Blaster 16";
        Pcspk => "pcspk", "PC speaker";
        Usb => "usb", "USB";
        Virtio => "virtio", "VirtIO";
    }
}

xml_enum! {
    pub enum VideoModel {
        Virtio => "virtio", "Virtio";
        Qxl => "qxl", "QXL";
        Vga => "vga", "VGA";
        Cirrus => "cirrus", "Cirrus";
        Vmvga => "vmvga", "VMware SVGA";
        Bochs => "bochs", "Bochs";
        Ramfb => "ramfb", "Ramfb";
        Xen => "xen", "Xen";
        Vbox => "vbox", "VirtualBox";
        None => "none", "None";
    }
}

xml_enum! {
    pub enum GraphicsType {
        Spice => "spice", "Spice";
        Vnc => "vnc", "VNC";
        Sdl => "sdl", "SDL";
        Rdp => "rdp", "RDP";
        Dbus => "dbus", "D-Bus";
        EglHeadless => "egl-headless", "EGL headless";
    }
}

// --- Host Device Types ---

xml_enum! {
    pub enum HostdevMode {
        Subsystem => "subsystem", "Subsystem";
        Capabilities => "capabilities", "Capabilities";
    }
}

xml_enum! {
    pub enum HostdevType {
        Pci => "pci", "PCI";
        Usb => "usb", "USB";
        Scsi => "scsi", "SCSI";
        ScsiHost => "scsi_host", "SCSI host";
        Mdev => "mdev", "Mediated device";
    }
}

// --- Character Device Types ---

/// Which element a character device is written as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CharKind {
    Serial,
    Parallel,
    Console,
    Channel,
}

impl CharKind {
    pub const ALL: &'static [CharKind] = &[
        CharKind::Serial,
        CharKind::Parallel,
        CharKind::Console,
        CharKind::Channel,
    ];

    pub fn element_name(&self) -> &'static str {
        match self {
            CharKind::Serial => "serial",
            CharKind::Parallel => "parallel",
            CharKind::Console => "console",
            CharKind::Channel => "channel",
        }
    }

    pub fn from_element_name(s: &str) -> Option<Self> {
        match s {
            "serial" => Some(CharKind::Serial),
            "parallel" => Some(CharKind::Parallel),
            "console" => Some(CharKind::Console),
            "channel" => Some(CharKind::Channel),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CharKind::Serial => "Serial",
            CharKind::Parallel => "Parallel",
            CharKind::Console => "Console",
            CharKind::Channel => "Channel",
        }
    }
}

impl fmt::Display for CharKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

xml_enum! {
    pub enum CharSourceType {
        Pty => "pty", "Pseudo TTY";
        Tcp => "tcp", "TCP";
        Udp => "udp", "UDP";
        Unix => "unix", "UNIX socket";
        File => "file", "Output to file";
        Dev => "dev", "Physical host device";
        Pipe => "pipe", "Named pipe";
        Stdio => "stdio", "Standard I/O";
        Null => "null", "Null";
        Vc => "vc", "Virtual console";
        Spicevmc => "spicevmc", "Spice channel";
        Spiceport => "spiceport", "Spice port";
        QemuVdagent => "qemu-vdagent", "QEMU vdagent";
    }
}

impl CharSourceType {
    /// Source types that are meaningless without a `path`.
    pub fn needs_path(&self) -> bool {
        matches!(
            self,
            CharSourceType::File | CharSourceType::Dev | CharSourceType::Pipe
        )
    }

    /// Source types that are meaningless without a `service` (port).
    pub fn needs_service(&self) -> bool {
        matches!(self, CharSourceType::Tcp | CharSourceType::Udp)
    }
}

// --- Watchdog / Panic Types ---

xml_enum! {
    pub enum WatchdogModel {
        I6300esb => "i6300esb", "i6300esb";
        Ib700 => "ib700", "ib700";
        Diag288 => "diag288", "diag288";
        Itco => "itco", "iTCO";
    }
}

xml_enum! {
    pub enum WatchdogAction {
        Reset => "reset", "Reset";
        Shutdown => "shutdown", "Shutdown";
        Poweroff => "poweroff", "Power Off";
        Pause => "pause", "Pause";
        None => "none", "None";
        Dump => "dump", "Dump";
        InjectNmi => "inject-nmi", "Inject NMI";
    }
}

xml_enum! {
    pub enum PanicModel {
        Isa => "isa", "ISA (legacy)";
        Pseries => "pseries", "pSeries";
        Hyperv => "hyperv", "Hyper-V (Windows guests)";
        S390 => "s390", "s390";
        Pvpanic => "pvpanic", "PVPanic (Linux guests)";
    }
}

// --- Filesystem Passthrough Types ---

xml_enum! {
    pub enum FsType {
        Mount => "mount", "Mount";
        Template => "template", "Template";
        File => "file", "File";
        Block => "block", "Block";
        Ram => "ram", "RAM";
    }
}

xml_enum! {
    pub enum FsAccessMode {
        Passthrough => "passthrough", "Passthrough";
        Mapped => "mapped", "Mapped";
        Squash => "squash", "Squash";
    }
}

xml_enum! {
    pub enum FsDriverType {
        Virtiofs => "virtiofs", "virtiofs";
        Path => "path", "9p (path)";
        Handle => "handle", "9p (handle)";
        Loop => "loop", "Loop";
        Nbd => "nbd", "NBD";
    }
}

// --- Smartcard / Redirection Types ---

xml_enum! {
    pub enum SmartcardMode {
        Host => "host", "Host (emulated)";
        HostCertificates => "host-certificates", "Host certificates";
        Passthrough => "passthrough", "Passthrough (SPICE)";
    }
}

xml_enum! {
    pub enum RedirBus {
        Usb => "usb", "USB";
    }
}

// --- TPM Types ---

xml_enum! {
    pub enum TpmModel {
        Tis => "tpm-tis", "TIS";
        Crb => "tpm-crb", "CRB";
        Spapr => "tpm-spapr", "sPAPR";
        SpaprProxy => "spapr-tpm-proxy", "sPAPR proxy";
    }
}

xml_enum! {
    pub enum TpmBackendType {
        Passthrough => "passthrough", "Passthrough";
        Emulator => "emulator", "Emulated";
        External => "external", "External";
    }
}

// --- RNG Types ---

xml_enum! {
    pub enum RngModel {
        Virtio => "virtio", "VirtIO";
        VirtioTransitional => "virtio-transitional", "VirtIO (transitional)";
        VirtioNonTransitional => "virtio-non-transitional", "VirtIO (non-transitional)";
    }
}

xml_enum! {
    pub enum RngBackendModel {
        Random => "random", "Host device";
        Egd => "egd", "EGD";
        Builtin => "builtin", "Built-in";
    }
}

// --- Memory Balloon Types ---

xml_enum! {
    pub enum MemballoonModel {
        Virtio => "virtio", "VirtIO";
        VirtioTransitional => "virtio-transitional", "VirtIO (transitional)";
        Xen => "xen", "Xen";
        None => "none", "None (disabled)";
    }
}
