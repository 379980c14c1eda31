use crate::backend::capabilities::{validate, CapabilitySnapshot, Violation};
use crate::backend::connection::DomainBackend;
use crate::backend::devices::{Device, DeviceKind, DomainDocument};
use crate::backend::domain_xml::{decode_device, decode_domain, encode_device, encode_domain};
use crate::backend::editor::{EditBuffer, EditFailure, EditState, EditTarget};
use crate::error::AppError;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceViolation {
    pub index: usize,
    pub kind: DeviceKind,
    pub violation: Violation,
}

/// The decoded content of an edit buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditedValue {
    Device { index: usize, device: Device },
    Domain(Box<DomainDocument>),
}

/// The document changed while the editor was open. Nothing was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditConflict {
    pub target: EditTarget,
    pub current: Box<DomainDocument>,
    pub edited: EditedValue,
}

impl From<EditConflict> for AppError {
    fn from(conflict: EditConflict) -> Self {
        AppError::EditConflict(conflict.target.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOutcome {
    Applied,
    Conflict(EditConflict),
    /// The buffer came back byte-identical.
    Cancelled,
}

/// One domain being edited: the in-memory document plus the operations the
/// UI performs on its devices.
#[derive(Debug, Clone)]
pub struct DomainSession {
    uri: String,
    document: DomainDocument,
    temp_dir: Option<PathBuf>,
}

impl DomainSession {
    pub fn new(uri: &str, document: DomainDocument) -> Self {
        Self {
            uri: uri.to_string(),
            document,
            temp_dir: None,
        }
    }

    pub fn from_xml(uri: &str, xml: &str) -> Result<Self, AppError> {
        Ok(Self::new(uri, decode_domain(xml)?))
    }

    pub fn with_temp_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.temp_dir = dir;
        self
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn document(&self) -> &DomainDocument {
        &self.document
    }

    pub fn to_xml(&self) -> Result<String, AppError> {
        encode_domain(&self.document)
    }

    // --- Device list ---

    pub fn devices(&self) -> &[Device] {
        &self.document.devices
    }

    pub fn get_device(&self, index: usize) -> Option<&Device> {
        self.document.devices.get(index)
    }

    /// Replace the device at `index`. An alias the hypervisor assigned to the
    /// old device stays with the slot.
    pub fn set_device(&mut self, index: usize, mut device: Device) -> Result<(), AppError> {
        let slot = self
            .document
            .devices
            .get_mut(index)
            .ok_or(AppError::NoSuchDevice(index))?;
        if let Some(alias) = slot.alias() {
            device.set_alias(Some(alias.to_string()));
        }
        *slot = device;
        Ok(())
    }

    pub fn insert_device(&mut self, index: usize, device: Device) -> Result<(), AppError> {
        if index > self.document.devices.len() {
            return Err(AppError::NoSuchDevice(index));
        }
        self.document.devices.insert(index, device);
        Ok(())
    }

    /// Add a device at its natural position and return its index.
    pub fn push_device(&mut self, device: Device) -> usize {
        self.document.add_device(device)
    }

    pub fn remove_device(&mut self, index: usize) -> Result<Device, AppError> {
        if index >= self.document.devices.len() {
            return Err(AppError::NoSuchDevice(index));
        }
        Ok(self.document.devices.remove(index))
    }

    pub fn reorder_device(&mut self, from: usize, to: usize) -> Result<(), AppError> {
        let len = self.document.devices.len();
        if from >= len {
            return Err(AppError::NoSuchDevice(from));
        }
        if to >= len {
            return Err(AppError::NoSuchDevice(to));
        }
        let device = self.document.devices.remove(from);
        self.document.devices.insert(to, device);
        Ok(())
    }

    // --- Validation ---

    pub fn validate_all(&self, snapshot: Option<&CapabilitySnapshot>) -> Vec<DeviceViolation> {
        self.document
            .devices
            .iter()
            .enumerate()
            .flat_map(|(index, device)| {
                validate(device, snapshot)
                    .into_iter()
                    .map(move |violation| DeviceViolation {
                        index,
                        kind: device.kind(),
                        violation,
                    })
            })
            .collect()
    }

    /// `UnsupportedByCapabilities` listing every capability violation.
    /// Structural problems are not reported here.
    pub fn check_capabilities(&self, snapshot: Option<&CapabilitySnapshot>) -> Result<(), AppError> {
        let problems: Vec<String> = self
            .validate_all(snapshot)
            .into_iter()
            .filter(|v| v.violation.is_capability())
            .map(|v| format!("{} #{}: {}", v.kind, v.index, v.violation))
            .collect();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(AppError::UnsupportedByCapabilities(problems.join("; ")))
        }
    }

    // --- Override editor ---

    pub fn export_for_edit(&self, target: EditTarget) -> Result<EditBuffer, AppError> {
        let text = match target {
            EditTarget::Device(index) => {
                let device = self.get_device(index).ok_or(AppError::NoSuchDevice(index))?;
                encode_device(device)?
            }
            EditTarget::Domain => self.to_xml()?,
        };
        EditBuffer::create(&text, target, self.document.clone(), self.temp_dir.as_deref())
    }

    /// Re-import an edited buffer. Malformed XML hands the buffer back so the
    /// user can fix it; every other outcome consumes it.
    pub fn apply_edit(&mut self, mut buffer: EditBuffer) -> Result<EditOutcome, EditFailure> {
        buffer.set_state(EditState::Reimporting);
        let text = match buffer.read_text() {
            Ok(text) => text,
            Err(error) => return Err(EditFailure { error, buffer }),
        };

        let target = buffer.target();
        if buffer.is_unchanged(&text) {
            log::info!("Edit of {target} left unchanged");
            buffer.set_state(EditState::Cancelled);
            return Ok(EditOutcome::Cancelled);
        }

        let decoded = match target {
            EditTarget::Device(index) => {
                decode_device(&text).map(|device| EditedValue::Device { index, device })
            }
            EditTarget::Domain => decode_domain(&text).map(|doc| EditedValue::Domain(Box::new(doc))),
        };
        let edited = match decoded {
            Ok(edited) => edited,
            Err(error) => {
                log::warn!("Edited {target} is not usable: {error}");
                buffer.set_state(EditState::AwaitingEditor);
                return Err(EditFailure { error, buffer });
            }
        };

        if self.document != *buffer.baseline() {
            log::warn!("Domain changed while {target} was being edited");
            buffer.set_state(EditState::Conflict);
            return Ok(EditOutcome::Conflict(EditConflict {
                target,
                current: Box::new(self.document.clone()),
                edited,
            }));
        }

        match edited {
            EditedValue::Device { index, device } => {
                if let Err(error) = self.set_device(index, device) {
                    return Err(EditFailure { error, buffer });
                }
            }
            EditedValue::Domain(doc) => self.document = *doc,
        }
        buffer.set_state(EditState::Applied);
        log::info!("Applied edit of {target}");
        Ok(EditOutcome::Applied)
    }

    // --- Persisting ---

    /// Define the domain through `backend`. With `strict` set, capability
    /// violations block the call; otherwise they are only logged.
    pub fn define(
        &self,
        backend: &dyn DomainBackend,
        snapshot: Option<&CapabilitySnapshot>,
        strict: bool,
    ) -> Result<(), AppError> {
        if let Err(e) = self.check_capabilities(snapshot) {
            if strict {
                return Err(e);
            }
            log::warn!("Defining despite capability warnings: {e}");
        }
        backend.define_domain(&self.uri, &self.document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::connection::tests::FakeBackend;
    use crate::backend::devices::*;
    use crate::backend::types::*;

    const URI: &str = "qemu:///system";

    const DOMAIN: &str = r#"<domain type="kvm">
  <name>web01</name>
  <devices>
    <emulator>/usr/bin/qemu-system-x86_64</emulator>
    <disk type="file" device="disk">
      <source file="/var/lib/libvirt/images/web01.qcow2"/>
      <target dev="vda" bus="virtio"/>
      <alias name="virtio-disk0"/>
    </disk>
    <controller type="usb" index="0" model="qemu-xhci"/>
    <video>
      <model type="virtio" heads="1" primary="yes"/>
    </video>
  </devices>
</domain>
"#;

    fn session() -> DomainSession {
        DomainSession::from_xml(URI, DOMAIN).unwrap()
    }

    #[test]
    fn set_device_keeps_alias() {
        let mut s = session();
        let replacement = Device::new(DeviceConfig::Disk(DiskConfig {
            target: Some(DiskTarget {
                dev: Some("vdb".into()),
                bus: Some(DiskBus::Virtio),
            }),
            ..Default::default()
        }));
        s.set_device(1, replacement).unwrap();
        assert_eq!(s.get_device(1).unwrap().alias(), Some("virtio-disk0"));
        assert!(matches!(
            s.set_device(9, Device::new(DeviceConfig::Panic(PanicConfig::default()))),
            Err(AppError::NoSuchDevice(9))
        ));
    }

    #[test]
    fn list_operations() {
        let mut s = session();
        let removed = s.remove_device(2).unwrap();
        assert_eq!(removed.kind(), DeviceKind::Controller);
        assert_eq!(s.push_device(removed), 1);
        s.reorder_device(3, 0).unwrap();
        assert_eq!(s.get_device(0).unwrap().kind(), DeviceKind::Video);
        assert!(s.insert_device(5, Device::new(DeviceConfig::Panic(PanicConfig::default()))).is_err());
        assert!(s.reorder_device(0, 4).is_err());
    }

    #[test]
    fn capability_check_ignores_structural_rules() {
        let mut s = session();
        s.push_device(Device::new(DeviceConfig::Disk(DiskConfig::default())));
        let caps = CapabilitySnapshot::builder()
            .legal(DeviceKind::Video, "model", ["qxl"])
            .build();
        let all = s.validate_all(Some(&caps));
        assert_eq!(all.len(), 2);
        let err = s.check_capabilities(Some(&caps)).unwrap_err();
        assert!(matches!(err, AppError::UnsupportedByCapabilities(ref msg) if msg.contains("virtio")));
    }

    #[test]
    fn define_respects_strict_mode() {
        let s = session();
        let caps = CapabilitySnapshot::builder()
            .legal(DeviceKind::Video, "model", ["qxl"])
            .build();
        let backend = FakeBackend::default();
        assert!(s.define(&backend, Some(&caps), true).is_err());
        assert!(backend.defined.lock().unwrap().is_empty());
        s.define(&backend, Some(&caps), false).unwrap();
        assert_eq!(backend.defined.lock().unwrap().len(), 1);
    }

    #[test]
    fn hypervisor_rejection_is_verbatim() {
        let backend = FakeBackend {
            reject_with: Some("unsupported configuration: spice graphics are not supported".into()),
            ..Default::default()
        };
        let err = session().define(&backend, None, false).unwrap_err();
        assert_eq!(err.to_string(), "unsupported configuration: spice graphics are not supported");
    }

    #[test]
    fn applied_device_edit_replaces_value() {
        let mut s = session();
        let buffer = s.export_for_edit(EditTarget::Device(3)).unwrap();
        std::fs::write(
            buffer.path(),
            "<video>\n  <model type=\"qxl\" heads=\"1\" primary=\"yes\"/>\n</video>\n",
        )
        .unwrap();
        assert_eq!(s.apply_edit(buffer).unwrap(), EditOutcome::Applied);
        let DeviceConfig::Video(video) = &s.get_device(3).unwrap().config else {
            panic!("expected video");
        };
        assert_eq!(video.model, Some(VideoModel::Qxl));
    }

    #[test]
    fn untouched_buffer_is_cancelled() {
        let mut s = session();
        let buffer = s.export_for_edit(EditTarget::Domain).unwrap();
        let path = buffer.path().to_path_buf();
        assert_eq!(s.apply_edit(buffer).unwrap(), EditOutcome::Cancelled);
        assert!(!path.exists());
    }
}
