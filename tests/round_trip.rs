use grustyvman_devices::backend::devices::{DeviceConfig, DeviceKind};
use grustyvman_devices::backend::domain_xml::{decode_device, decode_domain, encode_device, encode_domain};
use grustyvman_devices::backend::types::RawContent;
use grustyvman_devices::backend::xml::XmlNode;

const FEDORA: &str = include_str!("fixtures/fedora40.xml");

fn canonical(xml: &str) -> String {
    encode_domain(&decode_domain(xml).unwrap()).unwrap()
}

#[test]
fn libvirt_domain_round_trips_byte_identical() {
    assert_eq!(canonical(FEDORA), FEDORA);
}

#[test]
fn only_unmodelled_devices_decode_as_unknown() {
    let doc = decode_domain(FEDORA).unwrap();
    let unknown: Vec<_> = doc
        .devices
        .iter()
        .filter(|d| d.kind() == DeviceKind::Unknown)
        .map(|d| d.display_name())
        .collect();
    assert_eq!(unknown, vec!["<audio>"]);
    assert_eq!(doc.emulator(), Some("/usr/bin/qemu-system-x86_64"));
    assert_eq!(doc.devices.len(), 23);

    // metadata, features, cpu, clock, on_poweroff, on_reboot
    let kept: Vec<&str> = doc.raw_extra().top_level_elements().map(|e| e.name.as_str()).collect();
    assert_eq!(kept, vec!["metadata", "features", "cpu", "clock", "on_poweroff", "on_reboot"]);
}

#[test]
fn unrecognized_sub_elements_stay_with_their_device() {
    let doc = decode_domain(FEDORA).unwrap();
    let serial = doc
        .devices
        .iter()
        .find(|d| d.kind() == DeviceKind::Serial)
        .unwrap();
    let item = &serial.raw_extra().items()[0];
    assert_eq!(item.scope.len(), 1);
    assert_eq!(item.scope[0].to_string(), "target[0]");
    assert!(matches!(&item.content, RawContent::Node(XmlNode::Element(e)) if e.name == "model"));
}

#[test]
fn encode_is_idempotent_on_hand_written_xml() {
    let messy = r#"<?xml version="1.0"?>
<domain type='kvm'>
    <name>scratch</name>
    <devices>
        <disk device='disk' type='block'>
            <target bus='virtio' dev='vdb'/>
            <source dev='/dev/vg0/scratch'/>
            <iotune><total_iops_sec>500</total_iops_sec></iotune>
        </disk>
        <interface type='bridge'><source bridge='br0'/><boot order='02'/><model type='e1000e'/></interface>
        <video><model type='vga' vram='016384'/></video>
        <!-- keep me -->
        <shmem name='x'><size unit='M'>4</size></shmem>
    </devices>
</domain>"#;
    let once = canonical(messy);
    assert_eq!(canonical(&once), once);
    assert!(once.contains("<total_iops_sec>500</total_iops_sec>"));
    assert!(once.contains("<boot order=\"02\"/>"));
    assert!(once.contains("vram=\"016384\""));
    assert!(once.contains("<!-- keep me -->"));
    assert!(once.contains("<shmem name=\"x\">"));
}

#[test]
fn sound_vendor_extension_is_kept_in_place() {
    let src = r#"<domain type="kvm">
  <name>two-devices</name>
  <devices>
    <disk type="file" device="disk">
      <source file="/var/lib/libvirt/images/a.qcow2"/>
      <target dev="vda" bus="virtio"/>
    </disk>
    <sound model="ich9">
      <codec type="micro"/>
      <custom-vendor-ext/>
      <codec type="duplex"/>
    </sound>
  </devices>
</domain>
"#;
    let doc = decode_domain(src).unwrap();
    assert_eq!(doc.devices.len(), 2);

    let sound = &doc.devices[1];
    let DeviceConfig::Sound(cfg) = &sound.config else {
        panic!("expected sound, got {:?}", sound.config);
    };
    assert_eq!(cfg.codecs, vec!["micro", "duplex"]);
    let items = sound.raw_extra().items();
    assert_eq!(items.len(), 1);
    assert!(items[0].scope.is_empty());
    assert_eq!(items[0].position, 1);
    assert!(matches!(&items[0].content, RawContent::Node(XmlNode::Element(e)) if e.name == "custom-vendor-ext"));

    assert_eq!(encode_domain(&doc).unwrap(), src);
}

#[test]
fn every_device_round_trips_on_its_own() {
    let doc = decode_domain(FEDORA).unwrap();
    for device in &doc.devices {
        let xml = encode_device(device).unwrap();
        let again = decode_device(&xml).unwrap();
        assert_eq!(&again, device, "device {} changed:\n{xml}", device.display_name());
    }
}

#[test]
fn each_device_kind_round_trips_as_libvirt_writes_it() {
    let cases = [
        (
            DeviceKind::Filesystem,
            r#"<filesystem type="mount" accessmode="passthrough">
  <driver type="virtiofs"/>
  <source dir="/srv/share"/>
  <target dir="share"/>
  <alias name="fs0"/>
  <address type="pci" domain="0x0000" bus="0x07" slot="0x00" function="0x0"/>
</filesystem>
"#,
        ),
        (
            DeviceKind::Smartcard,
            r#"<smartcard mode="host">
  <address type="ccid" controller="0" slot="0"/>
</smartcard>
"#,
        ),
        (
            DeviceKind::Smartcard,
            "<smartcard mode=\"passthrough\" type=\"spicevmc\"/>\n",
        ),
        (
            DeviceKind::Vsock,
            r#"<vsock model="virtio">
  <cid auto="yes" address="3"/>
</vsock>
"#,
        ),
        (
            DeviceKind::Hostdev,
            r#"<hostdev mode="subsystem" type="usb" managed="yes">
  <source>
    <vendor id="0x046d"/>
    <product id="0xc52b"/>
  </source>
  <address type="usb" bus="0" port="1"/>
</hostdev>
"#,
        ),
        (
            DeviceKind::Hostdev,
            r#"<hostdev mode="subsystem" type="pci" managed="yes">
  <source>
    <address domain="0x0000" bus="0x06" slot="0x00" function="0x0"/>
  </source>
  <boot order="2"/>
  <alias name="hostdev0"/>
  <rom bar="off"/>
  <address type="pci" domain="0x0000" bus="0x07" slot="0x00" function="0x0"/>
</hostdev>
"#,
        ),
        (
            DeviceKind::Panic,
            r#"<panic model="isa">
  <address type="isa" iobase="0x505"/>
</panic>
"#,
        ),
        (
            DeviceKind::Watchdog,
            r#"<watchdog model="i6300esb" action="reset">
  <alias name="watchdog0"/>
  <address type="pci" domain="0x0000" bus="0x10" slot="0x01" function="0x0"/>
</watchdog>
"#,
        ),
        (
            DeviceKind::Parallel,
            r#"<parallel type="pty">
  <source path="/dev/pts/3"/>
  <target port="0"/>
  <alias name="parallel0"/>
</parallel>
"#,
        ),
        (
            DeviceKind::Tpm,
            r#"<tpm model="tpm-tis">
  <backend type="passthrough">
    <device path="/dev/tpm0"/>
  </backend>
</tpm>
"#,
        ),
        (
            DeviceKind::Rng,
            r#"<rng model="virtio">
  <backend model="egd" type="tcp">
    <source mode="connect" host="localhost" service="1234"/>
  </backend>
</rng>
"#,
        ),
        (
            DeviceKind::Serial,
            r#"<serial type="tcp">
  <source mode="bind" host="127.0.0.1" service="4555"/>
  <protocol type="telnet"/>
  <target port="0"/>
</serial>
"#,
        ),
        (
            DeviceKind::Graphics,
            r#"<graphics type="spice" autoport="yes">
  <listen type="address"/>
  <gl enable="no"/>
</graphics>
"#,
        ),
    ];

    for (kind, xml) in cases {
        let device = decode_device(xml).unwrap();
        assert_eq!(device.kind(), kind, "{xml}");
        assert!(device.raw_extra().is_empty(), "{xml} left {:?}", device.raw_extra());
        assert_eq!(encode_device(&device).unwrap(), xml);
    }
}

#[test]
fn structural_problems_are_malformed() {
    for bad in [
        "",
        "<domain>",
        "<domain><devices></domain>",
        "<domain/><domain/>",
        "text<domain/>",
        "<domain><name>a</name>",
        "<network/>",
    ] {
        let err = decode_domain(bad).unwrap_err();
        assert!(err.is_malformed_xml(), "{bad:?} gave {err}");
    }
}
