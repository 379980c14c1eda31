//! Hypervisor capability snapshot and device validation against it.

use crate::backend::devices::{Device, DeviceConfig, DeviceKind};
use crate::backend::types::{
    CharSourceType, HostdevType, RngBackendModel, SmartcardMode, TpmBackendType, TriState,
};
use crate::backend::xml::{parse_document, XmlElement};
use crate::error::AppError;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

// --- Snapshot ---

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KindCapabilities {
    pub supported: bool,
    legal: BTreeMap<String, BTreeSet<String>>,
}

impl KindCapabilities {
    pub fn fields(&self) -> impl Iterator<Item = (&str, &BTreeSet<String>)> {
        self.legal.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// What one emulator/arch/machine/virt-type combination advertises.
/// Kinds and fields it says nothing about are unconstrained.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CapabilitySnapshot {
    pub emulator: Option<String>,
    pub virt_type: Option<String>,
    pub machine: Option<String>,
    pub arch: Option<String>,
    kinds: BTreeMap<DeviceKind, KindCapabilities>,
    features: BTreeMap<String, bool>,
}

/// Model field a `<domainCapabilities>` enum constrains.
fn field_for_enum(kind: DeviceKind, enum_name: &str) -> String {
    let field = match (kind, enum_name) {
        (DeviceKind::Disk, "diskDevice") => "device",
        (DeviceKind::Video, "modelType") => "model",
        (DeviceKind::Hostdev, "subsysType") => "type",
        (DeviceKind::Rng, "backendModel") => "backend_model",
        (DeviceKind::Filesystem, "driverType") => "driver_type",
        (DeviceKind::Tpm, "backendModel") => "backend_type",
        (DeviceKind::Tpm, "backendVersion") => "backend_version",
        (_, other) => other,
    };
    field.to_string()
}

impl CapabilitySnapshot {
    pub fn builder() -> CapabilitySnapshotBuilder {
        CapabilitySnapshotBuilder::default()
    }

    /// Parse libvirt `<domainCapabilities>` XML.
    pub fn from_xml(xml: &str) -> Result<Self, AppError> {
        let doc = parse_document(xml)?;
        let root = doc.root;
        if root.name != "domainCapabilities" {
            return Err(AppError::MalformedXml(format!(
                "expected <domainCapabilities> root element, found <{}>",
                root.name
            )));
        }

        let mut builder = CapabilitySnapshot::builder();
        let text_of = |name: &str| root.element(name).map(|e| e.text().trim().to_string());
        builder.snapshot.emulator = text_of("path");
        builder.snapshot.virt_type = text_of("domain");
        builder.snapshot.machine = text_of("machine");
        builder.snapshot.arch = text_of("arch");

        if let Some(devices) = root.element("devices") {
            for el in devices.elements() {
                let Some(kind) = DeviceKind::from_element_name(&el.name) else {
                    log::debug!("Ignoring capabilities for unmodelled device <{}>", el.name);
                    continue;
                };
                builder = builder.kind(kind, supported_attr(el));
                for (enum_name, values) in enums_of(el) {
                    builder = builder.legal(kind, &field_for_enum(kind, &enum_name), values);
                }
            }
        }

        if let Some(features) = root.element("features") {
            for el in features.elements() {
                builder = builder.feature(&el.name, supported_attr(el));
            }
        }

        Ok(builder.build())
    }

    /// `None` when nothing is known about the kind.
    pub fn is_supported(&self, kind: DeviceKind) -> Option<bool> {
        self.kinds.get(&kind).map(|k| k.supported)
    }

    pub fn kind(&self, kind: DeviceKind) -> Option<&KindCapabilities> {
        self.kinds.get(&kind)
    }

    /// Legal values of `field` for `kind`; `None` means unconstrained.
    pub fn legal_values(&self, kind: DeviceKind, field: &str) -> Option<&BTreeSet<String>> {
        self.kind(kind)?.legal.get(field)
    }

    pub fn feature(&self, name: &str) -> Option<bool> {
        self.features.get(name).copied()
    }

    pub fn features(&self) -> impl Iterator<Item = (&str, bool)> {
        self.features.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn kinds(&self) -> impl Iterator<Item = (DeviceKind, &KindCapabilities)> {
        self.kinds.iter().map(|(k, v)| (*k, v))
    }
}

fn supported_attr(el: &XmlElement) -> bool {
    el.attr("supported") == Some("yes")
}

fn enums_of(el: &XmlElement) -> Vec<(String, BTreeSet<String>)> {
    el.elements()
        .filter(|e| e.name == "enum")
        .filter_map(|e| {
            let name = e.attr("name")?.to_string();
            let values = e
                .elements()
                .filter(|v| v.name == "value")
                .map(|v| v.text().trim().to_string())
                .collect();
            Some((name, values))
        })
        .collect()
}

#[derive(Debug, Default)]
pub struct CapabilitySnapshotBuilder {
    snapshot: CapabilitySnapshot,
}

impl CapabilitySnapshotBuilder {
    pub fn emulator(mut self, path: &str) -> Self {
        self.snapshot.emulator = Some(path.to_string());
        self
    }

    pub fn virt_type(mut self, virt_type: &str) -> Self {
        self.snapshot.virt_type = Some(virt_type.to_string());
        self
    }

    pub fn machine(mut self, machine: &str) -> Self {
        self.snapshot.machine = Some(machine.to_string());
        self
    }

    pub fn arch(mut self, arch: &str) -> Self {
        self.snapshot.arch = Some(arch.to_string());
        self
    }

    pub fn kind(mut self, kind: DeviceKind, supported: bool) -> Self {
        self.snapshot.kinds.entry(kind).or_default().supported = supported;
        self
    }

    /// Restrict `field` of `kind` to `values`. Marks the kind supported if
    /// it was not declared yet.
    pub fn legal<I, S>(mut self, kind: DeviceKind, field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entry = self.snapshot.kinds.entry(kind).or_insert_with(|| KindCapabilities {
            supported: true,
            legal: BTreeMap::new(),
        });
        entry
            .legal
            .entry(field.to_string())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    pub fn feature(mut self, name: &str, supported: bool) -> Self {
        self.snapshot.features.insert(name.to_string(), supported);
        self
    }

    pub fn build(self) -> CapabilitySnapshot {
        self.snapshot
    }
}

/// Legal values given an optional snapshot. No snapshot, no constraints.
pub fn legal_values<'a>(
    snapshot: Option<&'a CapabilitySnapshot>,
    kind: DeviceKind,
    field: &str,
) -> Option<&'a BTreeSet<String>> {
    snapshot?.legal_values(kind, field)
}

// --- Validation ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViolationReason {
    NotInLegalSet {
        value: String,
        allowed: BTreeSet<String>,
    },
    Missing,
    MutuallyExclusive {
        other: &'static str,
    },
    KindUnsupported,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub field: &'static str,
    pub reason: ViolationReason,
}

impl Violation {
    fn missing(field: &'static str) -> Self {
        Self {
            field,
            reason: ViolationReason::Missing,
        }
    }

    fn exclusive(field: &'static str, other: &'static str) -> Self {
        Self {
            field,
            reason: ViolationReason::MutuallyExclusive { other },
        }
    }

    /// Whether the violation comes from the capability snapshot rather than
    /// a structural rule.
    pub fn is_capability(&self) -> bool {
        matches!(
            self.reason,
            ViolationReason::NotInLegalSet { .. } | ViolationReason::KindUnsupported
        )
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            ViolationReason::NotInLegalSet { value, allowed } => {
                let allowed: Vec<&str> = allowed.iter().map(String::as_str).collect();
                write!(
                    f,
                    "{}: '{value}' is not supported (allowed: {})",
                    self.field,
                    allowed.join(", ")
                )
            }
            ViolationReason::Missing => write!(f, "{}: required value is missing", self.field),
            ViolationReason::MutuallyExclusive { other } => {
                write!(f, "{}: cannot be combined with {other}", self.field)
            }
            ViolationReason::KindUnsupported => {
                write!(f, "{}: device kind is not supported by the hypervisor", self.field)
            }
        }
    }
}

/// Check a device against the structural rules and, when a snapshot is
/// given, against the values it advertises. Never mutates the device.
pub fn validate(device: &Device, snapshot: Option<&CapabilitySnapshot>) -> Vec<Violation> {
    let mut violations = structural_violations(device);

    let Some(snapshot) = snapshot else {
        return violations;
    };
    let kind = device.kind();
    if snapshot.is_supported(kind) == Some(false) {
        violations.push(Violation {
            field: "kind",
            reason: ViolationReason::KindUnsupported,
        });
        return violations;
    }
    for (field, value) in device.constrained_values() {
        if let Some(allowed) = snapshot.legal_values(kind, field) {
            if !allowed.contains(&value) {
                violations.push(Violation {
                    field,
                    reason: ViolationReason::NotInLegalSet {
                        value,
                        allowed: allowed.clone(),
                    },
                });
            }
        }
    }
    violations
}

fn structural_violations(device: &Device) -> Vec<Violation> {
    let mut out = Vec::new();
    match &device.config {
        DeviceConfig::Disk(disk) => {
            if disk.target_dev().is_none() {
                out.push(Violation::missing("target_dev"));
            }
            if let Some(src) = &disk.source {
                if src.file.is_some() && src.dev.is_some() {
                    out.push(Violation::exclusive("source_file", "source_dev"));
                }
            }
        }
        DeviceConfig::Interface(nic) => {
            if let Some(src) = &nic.source {
                if src.network.is_some() && src.bridge.is_some() {
                    out.push(Violation::exclusive("source_network", "source_bridge"));
                }
            }
        }
        DeviceConfig::Hostdev(hostdev) => {
            let src = hostdev.source.as_ref();
            let has_address = src.is_some_and(|s| s.address.is_some());
            match hostdev.hostdev_type {
                Some(HostdevType::Pci) if !has_address => {
                    out.push(Violation::missing("source_address"));
                }
                Some(HostdevType::Usb) => {
                    let has_ids = src.is_some_and(|s| s.vendor_id.is_some() && s.product_id.is_some());
                    if !has_ids && !has_address {
                        out.push(Violation::missing("source_vendor_product"));
                    }
                }
                _ => {}
            }
        }
        DeviceConfig::Char(chr) => {
            let src = chr.source.as_ref();
            if let Some(ty) = &chr.source_type {
                if ty.needs_service() && src.and_then(|s| s.service.as_ref()).is_none() {
                    out.push(Violation::missing("source_service"));
                }
                if ty.needs_path() && src.and_then(|s| s.path.as_ref()).is_none() {
                    out.push(Violation::missing("source_path"));
                }
            }
        }
        DeviceConfig::Filesystem(fs) => {
            if fs.target_dir.is_none() {
                out.push(Violation::missing("target_dir"));
            }
        }
        DeviceConfig::Smartcard(card) => match card.mode {
            Some(SmartcardMode::HostCertificates) if card.certificates.len() != 3 => {
                out.push(Violation::missing("certificates"));
            }
            Some(SmartcardMode::Passthrough) if card.passthrough_type.is_none() => {
                out.push(Violation::missing("type"));
            }
            _ => {}
        },
        DeviceConfig::Tpm(tpm) => {
            if let Some(backend) = &tpm.backend {
                match backend.backend_type {
                    Some(TpmBackendType::Passthrough) if backend.device_path.is_none() => {
                        out.push(Violation::missing("device_path"));
                    }
                    Some(TpmBackendType::Emulator) if backend.device_path.is_some() => {
                        out.push(Violation::exclusive("device_path", "backend_type"));
                    }
                    _ => {}
                }
            }
        }
        DeviceConfig::Rng(rng) => {
            if let Some(backend) = &rng.backend {
                if backend.model == Some(RngBackendModel::Egd) && backend.source.is_none() {
                    out.push(Violation::missing("backend_source"));
                }
            }
        }
        DeviceConfig::Vsock(vsock) => {
            if let Some(cid) = &vsock.cid {
                if cid.auto == TriState::Yes && cid.address.is_some() {
                    out.push(Violation::exclusive("cid_auto", "cid_address"));
                }
            }
        }
        DeviceConfig::Graphics(gfx) => {
            let explicit_port = gfx.port.is_some_and(|p| p != -1);
            if gfx.autoport == TriState::Yes && explicit_port {
                out.push(Violation::exclusive("autoport", "port"));
            }
        }
        DeviceConfig::Redirdev(redir) => {
            let ty = redir.redir_type.as_ref();
            if ty == Some(&CharSourceType::Tcp)
                && redir.source.as_ref().and_then(|s| s.service.as_ref()).is_none()
            {
                out.push(Violation::missing("source_service"));
            }
        }
        _ => {}
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::devices::*;
    use crate::backend::types::*;

    const DOMCAPS: &str = r#"<domainCapabilities>
  <path>/usr/bin/qemu-system-x86_64</path>
  <domain>kvm</domain>
  <machine>pc-q35-8.2</machine>
  <arch>x86_64</arch>
  <devices>
    <disk supported="yes">
      <enum name="diskDevice">
        <value>disk</value>
        <value>cdrom</value>
      </enum>
      <enum name="bus">
        <value>virtio</value>
        <value>sata</value>
      </enum>
    </disk>
    <video supported="yes">
      <enum name="modelType">
        <value>virtio</value>
        <value>qxl</value>
      </enum>
    </video>
    <tpm supported="yes">
      <enum name="model">
        <value>tpm-crb</value>
      </enum>
      <enum name="backendModel">
        <value>emulator</value>
      </enum>
    </tpm>
    <panic supported="no"/>
    <crypto supported="yes"/>
  </devices>
  <features>
    <sev supported="no"/>
    <genid supported="yes"/>
  </features>
</domainCapabilities>
"#;

    fn video(model: VideoModel) -> Device {
        Device::new(DeviceConfig::Video(VideoConfig {
            model: Some(model),
            ..Default::default()
        }))
    }

    #[test]
    fn parses_domain_capabilities() {
        let caps = CapabilitySnapshot::from_xml(DOMCAPS).unwrap();
        assert_eq!(caps.machine.as_deref(), Some("pc-q35-8.2"));
        assert_eq!(caps.virt_type.as_deref(), Some("kvm"));
        let devices = caps.legal_values(DeviceKind::Disk, "device").unwrap();
        assert!(devices.contains("cdrom"));
        assert!(caps.legal_values(DeviceKind::Video, "model").unwrap().contains("qxl"));
        assert!(caps.legal_values(DeviceKind::Tpm, "backend_type").is_some());
        assert_eq!(caps.is_supported(DeviceKind::Panic), Some(false));
        assert_eq!(caps.is_supported(DeviceKind::Sound), None);
        assert_eq!(caps.feature("sev"), Some(false));
        assert_eq!(caps.feature("genid"), Some(true));
    }

    #[test]
    fn video_model_outside_legal_set() {
        let caps = CapabilitySnapshot::from_xml(DOMCAPS).unwrap();
        let violations = validate(&video(VideoModel::Cirrus), Some(&caps));
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].field, "model");
        assert!(violations[0].is_capability());
        assert!(validate(&video(VideoModel::Qxl), Some(&caps)).is_empty());
    }

    #[test]
    fn no_snapshot_means_no_constraints() {
        assert!(validate(&video(VideoModel::Other("anything".into())), None).is_empty());
        assert!(legal_values(None, DeviceKind::Video, "model").is_none());
    }

    #[test]
    fn unsupported_kind_is_reported() {
        let caps = CapabilitySnapshot::from_xml(DOMCAPS).unwrap();
        let panic = Device::new(DeviceConfig::Panic(PanicConfig {
            model: Some(PanicModel::Isa),
        }));
        let violations = validate(&panic, Some(&caps));
        assert_eq!(violations[0].reason, ViolationReason::KindUnsupported);
    }

    #[test]
    fn disk_structural_rules() {
        let disk = Device::new(DeviceConfig::Disk(DiskConfig {
            source: Some(DiskSource {
                file: Some("/a.img".into()),
                dev: Some("/dev/sda".into()),
                ..Default::default()
            }),
            ..Default::default()
        }));
        let fields: Vec<&str> = validate(&disk, None).iter().map(|v| v.field).collect();
        assert_eq!(fields, vec!["target_dev", "source_file"]);
    }

    #[test]
    fn tpm_backend_rules() {
        let tpm = |ty: TpmBackendType, path: Option<&str>| {
            Device::new(DeviceConfig::Tpm(TpmConfig {
                model: Some(TpmModel::Crb),
                backend: Some(TpmBackend {
                    backend_type: Some(ty),
                    version: None,
                    device_path: path.map(String::from),
                }),
            }))
        };
        assert_eq!(validate(&tpm(TpmBackendType::Passthrough, None), None)[0].reason, ViolationReason::Missing);
        assert!(validate(&tpm(TpmBackendType::Passthrough, Some("/dev/tpm0")), None).is_empty());
        assert!(matches!(
            validate(&tpm(TpmBackendType::Emulator, Some("/dev/tpm0")), None)[0].reason,
            ViolationReason::MutuallyExclusive { .. }
        ));
    }

    #[test]
    fn char_and_graphics_rules() {
        let tcp = Device::new(DeviceConfig::Char(CharConfig::new(CharKind::Serial, CharSourceType::Tcp)));
        assert_eq!(validate(&tcp, None)[0].field, "source_service");

        let gfx = Device::new(DeviceConfig::Graphics(GraphicsConfig {
            graphics_type: Some(GraphicsType::Vnc),
            port: Some(-1),
            autoport: TriState::Yes,
            ..Default::default()
        }));
        assert!(validate(&gfx, None).is_empty());
    }

    #[test]
    fn builder_assembles_snapshot() {
        let caps = CapabilitySnapshot::builder()
            .virt_type("kvm")
            .legal(DeviceKind::Channel, "type", ["unix", "spicevmc"])
            .build();
        assert_eq!(caps.is_supported(DeviceKind::Channel), Some(true));
        let chan = Device::new(DeviceConfig::Char(CharConfig::new(CharKind::Channel, CharSourceType::Pty)));
        let violations = validate(&chan, Some(&caps));
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].field, "type");
    }
}
