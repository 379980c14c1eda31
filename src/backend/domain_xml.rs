use crate::backend::codec::{Cursor, ElementBuilder};
use crate::backend::devices::*;
use crate::backend::types::*;
use crate::backend::xml::{
    parse_document, write_document, write_fragment, XmlDocument, XmlElement, XmlNode,
};
use crate::error::AppError;

/// Paired decode/encode for one device element. `decode` takes what it
/// recognizes out of the cursor; `encode` writes the same fields back in the
/// order libvirt formats them. Alias and address are handled by the caller.
trait DeviceXml: Sized {
    fn decode(c: &mut Cursor) -> Self;
    fn encode(&self, b: &mut ElementBuilder<'_>);
}

pub fn decode_domain(xml: &str) -> Result<DomainDocument, AppError> {
    let doc = parse_document(xml)?;
    if doc.root.name != "domain" {
        return Err(AppError::MalformedXml(format!(
            "expected <domain> root element, found <{}>",
            doc.root.name
        )));
    }

    let mut c = Cursor::new(doc.root);
    let virt_type = c.attr("type");
    let name = c.child("name", Cursor::text);
    let uuid = c.child("uuid", Cursor::text);
    let title = c.child("title", Cursor::text);
    let description = c.child("description", Cursor::text);
    let memory = c.child("memory", decode_memory);
    let current_memory = c.child("currentMemory", decode_memory);
    let vcpu = c.child("vcpu", |v| {
        let count = v.parsed_text()?;
        Some(Vcpu {
            count,
            placement: v.attr("placement"),
            current: v.parsed("current"),
        })
    });
    let os = c.child("os", decode_os);

    let mut devices = Vec::new();
    let devices_section = c
        .child("devices", |d| {
            devices = d.take_elements().into_iter().map(decode_device_element).collect();
            Some(())
        })
        .is_some();

    let raw_extra = c.finish();
    log::debug!(
        "Decoded domain {:?}: {} devices, {} unrecognized items",
        name,
        devices.len(),
        raw_extra.len()
    );

    Ok(DomainDocument {
        virt_type,
        name,
        uuid,
        title,
        description,
        memory,
        current_memory,
        vcpu,
        os,
        devices,
        devices_section,
        raw_extra,
        prolog: doc.prolog,
        epilog: doc.epilog,
    })
}

pub fn encode_domain(doc: &DomainDocument) -> Result<String, AppError> {
    let mut b = ElementBuilder::new("domain", &doc.raw_extra);
    b.attr("type", doc.virt_type.as_ref());
    b.text_child("name", doc.name.as_deref())
        .text_child("uuid", doc.uuid.as_deref())
        .text_child("title", doc.title.as_deref())
        .text_child("description", doc.description.as_deref())
        .child_if("memory", doc.memory.as_ref(), encode_memory)
        .child_if("currentMemory", doc.current_memory.as_ref(), encode_memory)
        .child_if("vcpu", doc.vcpu.as_ref(), |v, vcpu| {
            v.attr("placement", vcpu.placement.as_ref())
                .attr("current", vcpu.current.as_ref())
                .text(&vcpu.count.to_string());
        })
        .child_if("os", doc.os.as_ref(), encode_os);

    if doc.devices_section || !doc.devices.is_empty() {
        b.child("devices", |d| {
            for device in &doc.devices {
                d.element(encode_device_element(device));
            }
        });
    }

    write_document(&XmlDocument {
        prolog: doc.prolog.clone(),
        root: b.build(),
        epilog: doc.epilog.clone(),
    })
}

/// Decode a single device element, the form used by the override editor.
pub fn decode_device(xml: &str) -> Result<Device, AppError> {
    let doc = parse_document(xml)?;
    Ok(decode_device_element(doc.root))
}

pub fn encode_device(device: &Device) -> Result<String, AppError> {
    write_fragment(&encode_device_element(device))
}

fn decode_device_element(el: XmlElement) -> Device {
    let kind = match DeviceKind::from_element_name(&el.name) {
        Some(kind) => kind,
        None => return unknown_device(el),
    };

    let mut c = Cursor::new(el);
    let config = match kind {
        DeviceKind::Disk => DeviceConfig::Disk(DiskConfig::decode(&mut c)),
        DeviceKind::Interface => DeviceConfig::Interface(InterfaceConfig::decode(&mut c)),
        DeviceKind::Controller => DeviceConfig::Controller(ControllerConfig::decode(&mut c)),
        DeviceKind::Input => DeviceConfig::Input(InputConfig::decode(&mut c)),
        DeviceKind::Sound => DeviceConfig::Sound(SoundConfig::decode(&mut c)),
        DeviceKind::Hostdev => DeviceConfig::Hostdev(HostdevConfig::decode(&mut c)),
        DeviceKind::Serial | DeviceKind::Parallel | DeviceKind::Console | DeviceKind::Channel => {
            DeviceConfig::Char(CharConfig::decode(&mut c))
        }
        DeviceKind::Video => DeviceConfig::Video(VideoConfig::decode(&mut c)),
        DeviceKind::Watchdog => DeviceConfig::Watchdog(WatchdogConfig::decode(&mut c)),
        DeviceKind::Filesystem => DeviceConfig::Filesystem(FilesystemConfig::decode(&mut c)),
        DeviceKind::Smartcard => DeviceConfig::Smartcard(SmartcardConfig::decode(&mut c)),
        DeviceKind::Redirdev => DeviceConfig::Redirdev(RedirdevConfig::decode(&mut c)),
        DeviceKind::Tpm => DeviceConfig::Tpm(TpmConfig::decode(&mut c)),
        DeviceKind::Rng => DeviceConfig::Rng(RngConfig::decode(&mut c)),
        DeviceKind::Panic => DeviceConfig::Panic(PanicConfig::decode(&mut c)),
        DeviceKind::Vsock => DeviceConfig::Vsock(VsockConfig::decode(&mut c)),
        DeviceKind::Graphics => DeviceConfig::Graphics(GraphicsConfig::decode(&mut c)),
        DeviceKind::Memballoon => DeviceConfig::Memballoon(MemballoonConfig::decode(&mut c)),
        DeviceKind::Emulator => DeviceConfig::Emulator(EmulatorConfig::decode(&mut c)),
        DeviceKind::Unknown => DeviceConfig::Unknown(UnknownDevice {
            element: c.name().to_string(),
        }),
    };

    let alias = c.child("alias", |a| a.attr("name"));
    let address = c.child("address", |a| Some(decode_address(a)));
    Device::from_parts(config, address, alias, c.finish())
}

fn unknown_device(el: XmlElement) -> Device {
    log::debug!("Keeping unrecognized device <{}> verbatim", el.name);
    let config = DeviceConfig::Unknown(UnknownDevice {
        element: el.name.clone(),
    });
    let mut raw = RawExtra::default();
    raw.push(RawItem {
        scope: Vec::new(),
        position: 0,
        decoded_siblings: 0,
        content: RawContent::Node(XmlNode::Element(el)),
    });
    Device::from_parts(config, None, None, raw)
}

fn encode_device_element(device: &Device) -> XmlElement {
    if let DeviceConfig::Unknown(unknown) = &device.config {
        return device
            .raw_extra()
            .top_level_elements()
            .next()
            .cloned()
            .unwrap_or_else(|| XmlElement::new(unknown.element.as_str()));
    }

    let mut b = ElementBuilder::new(device.kind().element_name(), device.raw_extra());
    match &device.config {
        DeviceConfig::Disk(d) => d.encode(&mut b),
        DeviceConfig::Interface(i) => i.encode(&mut b),
        DeviceConfig::Controller(c) => c.encode(&mut b),
        DeviceConfig::Input(i) => i.encode(&mut b),
        DeviceConfig::Sound(s) => s.encode(&mut b),
        DeviceConfig::Hostdev(h) => h.encode(&mut b),
        DeviceConfig::Char(c) => c.encode(&mut b),
        DeviceConfig::Video(v) => v.encode(&mut b),
        DeviceConfig::Watchdog(w) => w.encode(&mut b),
        DeviceConfig::Filesystem(f) => f.encode(&mut b),
        DeviceConfig::Smartcard(s) => s.encode(&mut b),
        DeviceConfig::Redirdev(r) => r.encode(&mut b),
        DeviceConfig::Tpm(t) => t.encode(&mut b),
        DeviceConfig::Rng(r) => r.encode(&mut b),
        DeviceConfig::Panic(p) => p.encode(&mut b),
        DeviceConfig::Vsock(v) => v.encode(&mut b),
        DeviceConfig::Graphics(g) => g.encode(&mut b),
        DeviceConfig::Memballoon(m) => m.encode(&mut b),
        DeviceConfig::Emulator(e) => e.encode(&mut b),
        DeviceConfig::Unknown(_) => {}
    }

    // libvirt writes boot, alias, rom, address in that order.
    b.child_if("alias", device.alias(), |a, name| {
        a.attr("name", Some(name));
    });
    if let DeviceConfig::Hostdev(h) = &device.config {
        b.child_if("rom", h.rom_bar.as_on_off(), |r, bar| {
            r.attr("bar", Some(bar));
        });
    }
    b.child_if("address", device.address.as_ref(), encode_address);
    b.build()
}

// --- Shared Sub-elements ---

fn decode_address(a: &mut Cursor) -> Address {
    let mut address = Address::default();
    for (key, value) in a.take_attrs() {
        if key == "type" && address.address_type.is_none() {
            address.address_type = Some(value);
        } else {
            address.attrs.push((key, value));
        }
    }
    address
}

fn encode_address(b: &mut ElementBuilder<'_>, address: &Address) {
    b.attr("type", address.address_type.as_ref()).attrs(&address.attrs);
}

fn decode_memory(m: &mut Cursor) -> Option<MemorySize> {
    let value = m.parsed_text()?;
    Some(MemorySize {
        value,
        unit: m.enum_attr("unit"),
    })
}

fn encode_memory(b: &mut ElementBuilder<'_>, size: &MemorySize) {
    b.attr("unit", size.unit.as_ref()).text(&size.value.to_string());
}

fn decode_os(o: &mut Cursor) -> Option<OsConfig> {
    let firmware = o.attr("firmware");
    let (os_type, arch, machine) = o
        .child("type", |t| {
            let arch = t.attr("arch");
            let machine = t.attr("machine");
            let text = t.text();
            if arch.is_none() && machine.is_none() && text.is_none() {
                return None;
            }
            Some((text, arch, machine))
        })
        .unwrap_or_default();
    let boot = o.children("boot", |b| b.enum_attr("dev"));
    Some(OsConfig {
        firmware,
        os_type,
        arch,
        machine,
        boot,
    })
}

fn encode_os(b: &mut ElementBuilder<'_>, os: &OsConfig) {
    b.attr("firmware", os.firmware.as_ref());
    if os.os_type.is_some() || os.arch.is_some() || os.machine.is_some() {
        b.child("type", |t| {
            t.attr("arch", os.arch.as_ref())
                .attr("machine", os.machine.as_ref())
                .text(os.os_type.as_deref().unwrap_or_default());
        });
    }
    for dev in &os.boot {
        b.child("boot", |e| {
            e.attr("dev", Some(dev));
        });
    }
}

fn decode_boot_order(c: &mut Cursor) -> Option<u32> {
    c.child("boot", |b| b.parsed("order"))
}

fn encode_boot_order(b: &mut ElementBuilder<'_>, order: Option<u32>) {
    b.child_if("boot", order.as_ref(), |e, order| {
        e.attr("order", Some(order));
    });
}

fn decode_char_source(s: &mut Cursor) -> Option<CharSource> {
    Some(CharSource {
        mode: s.attr("mode"),
        path: s.attr("path"),
        host: s.attr("host"),
        service: s.attr("service"),
        channel: s.attr("channel"),
    })
}

fn encode_char_source(b: &mut ElementBuilder<'_>, source: &CharSource) {
    b.attr("mode", source.mode.as_ref())
        .attr("path", source.path.as_ref())
        .attr("host", source.host.as_ref())
        .attr("service", source.service.as_ref())
        .attr("channel", source.channel.as_ref());
}

/// Take a single-attribute sub-element such as `<model type='virtio'/>`.
fn single_attr(c: &mut Cursor, element: &str, attr: &str) -> Option<String> {
    c.child(element, |e| e.attr(attr))
}

fn single_attr_child(b: &mut ElementBuilder<'_>, element: &str, attr: &str, value: Option<&String>) {
    b.child_if(element, value, |e, v| {
        e.attr(attr, Some(v));
    });
}

// --- Disk ---

impl DeviceXml for DiskConfig {
    fn decode(c: &mut Cursor) -> Self {
        DiskConfig {
            disk_type: c.enum_attr("type"),
            device: c.enum_attr("device"),
            driver: c.child("driver", |d| {
                Some(DiskDriver {
                    name: d.attr("name"),
                    format: d.attr("type"),
                    cache: d.attr("cache"),
                    io: d.attr("io"),
                    discard: d.attr("discard"),
                })
            }),
            source: c.child("source", |s| {
                Some(DiskSource {
                    file: s.attr("file"),
                    dev: s.attr("dev"),
                    dir: s.attr("dir"),
                    protocol: s.attr("protocol"),
                    name: s.attr("name"),
                    pool: s.attr("pool"),
                    volume: s.attr("volume"),
                })
            }),
            target: c.child("target", |t| {
                Some(DiskTarget {
                    dev: t.attr("dev"),
                    bus: t.enum_attr("bus"),
                })
            }),
            readonly: c.flag("readonly"),
            shareable: c.flag("shareable"),
            serial: c.child("serial", Cursor::text),
            boot_order: decode_boot_order(c),
        }
    }

    fn encode(&self, b: &mut ElementBuilder<'_>) {
        b.attr("type", self.disk_type.as_ref())
            .attr("device", self.device.as_ref());
        b.child_if("driver", self.driver.as_ref(), |d, driver| {
            d.attr("name", driver.name.as_ref())
                .attr("type", driver.format.as_ref())
                .attr("cache", driver.cache.as_ref())
                .attr("io", driver.io.as_ref())
                .attr("discard", driver.discard.as_ref());
        });
        b.child_if("source", self.source.as_ref(), |s, source| {
            s.attr("file", source.file.as_ref())
                .attr("dev", source.dev.as_ref())
                .attr("dir", source.dir.as_ref())
                .attr("protocol", source.protocol.as_ref())
                .attr("name", source.name.as_ref())
                .attr("pool", source.pool.as_ref())
                .attr("volume", source.volume.as_ref());
        });
        b.child_if("target", self.target.as_ref(), |t, target| {
            t.attr("dev", target.dev.as_ref())
                .attr("bus", target.bus.as_ref());
        });
        b.flag("readonly", self.readonly)
            .flag("shareable", self.shareable)
            .text_child("serial", self.serial.as_deref());
        encode_boot_order(b, self.boot_order);
    }
}

// --- Network Interface ---

impl DeviceXml for InterfaceConfig {
    fn decode(c: &mut Cursor) -> Self {
        InterfaceConfig {
            interface_type: c.enum_attr("type"),
            mac: single_attr(c, "mac", "address"),
            source: c.child("source", |s| {
                Some(InterfaceSource {
                    network: s.attr("network"),
                    bridge: s.attr("bridge"),
                    dev: s.attr("dev"),
                    mode: s.attr("mode"),
                })
            }),
            target_dev: single_attr(c, "target", "dev"),
            model: c.child("model", |m| m.enum_attr("type")),
            link_state: single_attr(c, "link", "state"),
            boot_order: decode_boot_order(c),
        }
    }

    fn encode(&self, b: &mut ElementBuilder<'_>) {
        b.attr("type", self.interface_type.as_ref());
        single_attr_child(b, "mac", "address", self.mac.as_ref());
        b.child_if("source", self.source.as_ref(), |s, source| {
            s.attr("network", source.network.as_ref())
                .attr("bridge", source.bridge.as_ref())
                .attr("dev", source.dev.as_ref())
                .attr("mode", source.mode.as_ref());
        });
        single_attr_child(b, "target", "dev", self.target_dev.as_ref());
        b.child_if("model", self.model.as_ref(), |m, model| {
            m.attr("type", Some(model));
        });
        single_attr_child(b, "link", "state", self.link_state.as_ref());
        encode_boot_order(b, self.boot_order);
    }
}

// --- Controller / Input / Sound ---

impl DeviceXml for ControllerConfig {
    fn decode(c: &mut Cursor) -> Self {
        ControllerConfig {
            controller_type: c.enum_attr("type"),
            index: c.parsed("index"),
            model: c.attr("model"),
            ports: c.parsed("ports"),
            vectors: c.parsed("vectors"),
            queues: c.child("driver", |d| d.parsed("queues")),
        }
    }

    fn encode(&self, b: &mut ElementBuilder<'_>) {
        b.attr("type", self.controller_type.as_ref())
            .attr("index", self.index.as_ref())
            .attr("model", self.model.as_ref())
            .attr("ports", self.ports.as_ref())
            .attr("vectors", self.vectors.as_ref());
        b.child_if("driver", self.queues.as_ref(), |d, queues| {
            d.attr("queues", Some(queues));
        });
    }
}

impl DeviceXml for InputConfig {
    fn decode(c: &mut Cursor) -> Self {
        InputConfig {
            input_type: c.enum_attr("type"),
            bus: c.enum_attr("bus"),
            source_evdev: single_attr(c, "source", "evdev"),
        }
    }

    fn encode(&self, b: &mut ElementBuilder<'_>) {
        b.attr("type", self.input_type.as_ref())
            .attr("bus", self.bus.as_ref());
        single_attr_child(b, "source", "evdev", self.source_evdev.as_ref());
    }
}

impl DeviceXml for SoundConfig {
    fn decode(c: &mut Cursor) -> Self {
        SoundConfig {
            model: c.enum_attr("model"),
            codecs: c.children("codec", |codec| codec.attr("type")),
        }
    }

    fn encode(&self, b: &mut ElementBuilder<'_>) {
        b.attr("model", self.model.as_ref());
        for codec in &self.codecs {
            single_attr_child(b, "codec", "type", Some(codec));
        }
    }
}

// --- Host Device ---

impl DeviceXml for HostdevConfig {
    fn decode(c: &mut Cursor) -> Self {
        HostdevConfig {
            mode: c.enum_attr("mode"),
            hostdev_type: c.enum_attr("type"),
            managed: c.yes_no("managed"),
            source: c.child("source", |s| {
                Some(HostdevSource {
                    vendor_id: single_attr(s, "vendor", "id"),
                    product_id: single_attr(s, "product", "id"),
                    address: s.child("address", |a| Some(decode_address(a))),
                })
            }),
            boot_order: decode_boot_order(c),
            rom_bar: c
                .child("rom", |r| {
                    let bar = r.on_off("bar");
                    (!bar.is_default()).then_some(bar)
                })
                .unwrap_or_default(),
        }
    }

    fn encode(&self, b: &mut ElementBuilder<'_>) {
        b.attr("mode", self.mode.as_ref())
            .attr("type", self.hostdev_type.as_ref())
            .attr("managed", self.managed.as_yes_no());
        b.child_if("source", self.source.as_ref(), |s, source| {
            single_attr_child(s, "vendor", "id", source.vendor_id.as_ref());
            single_attr_child(s, "product", "id", source.product_id.as_ref());
            s.child_if("address", source.address.as_ref(), encode_address);
        });
        encode_boot_order(b, self.boot_order);
    }
}

// --- Character Devices ---

impl DeviceXml for CharConfig {
    fn decode(c: &mut Cursor) -> Self {
        let kind = CharKind::from_element_name(c.name()).unwrap_or(CharKind::Serial);
        CharConfig {
            kind,
            source_type: c.enum_attr("type"),
            source: c.child("source", decode_char_source),
            protocol: single_attr(c, "protocol", "type"),
            target: c.child("target", |t| {
                Some(CharTarget {
                    target_type: t.attr("type"),
                    port: t.parsed("port"),
                    name: t.attr("name"),
                    state: t.attr("state"),
                })
            }),
        }
    }

    fn encode(&self, b: &mut ElementBuilder<'_>) {
        b.attr("type", self.source_type.as_ref());
        b.child_if("source", self.source.as_ref(), encode_char_source);
        single_attr_child(b, "protocol", "type", self.protocol.as_ref());
        b.child_if("target", self.target.as_ref(), |t, target| {
            t.attr("type", target.target_type.as_ref())
                .attr("port", target.port.as_ref())
                .attr("name", target.name.as_ref())
                .attr("state", target.state.as_ref());
        });
    }
}

// --- Video / Graphics ---

impl DeviceXml for VideoConfig {
    fn decode(c: &mut Cursor) -> Self {
        let mut video = VideoConfig::default();
        c.child("model", |m| {
            video.model = Some(m.enum_attr("type")?);
            video.ram = m.parsed("ram");
            video.vram = m.parsed("vram");
            video.vgamem = m.parsed("vgamem");
            video.heads = m.parsed("heads");
            video.primary = m.yes_no("primary");
            video.accel3d = m
                .child("acceleration", |a| {
                    let accel3d = a.yes_no("accel3d");
                    (!accel3d.is_default()).then_some(accel3d)
                })
                .unwrap_or_default();
            Some(())
        });
        video
    }

    fn encode(&self, b: &mut ElementBuilder<'_>) {
        b.child_if("model", self.model.as_ref(), |m, model| {
            m.attr("type", Some(model))
                .attr("ram", self.ram.as_ref())
                .attr("vram", self.vram.as_ref())
                .attr("vgamem", self.vgamem.as_ref())
                .attr("heads", self.heads.as_ref())
                .attr("primary", self.primary.as_yes_no());
            m.child_if("acceleration", self.accel3d.as_yes_no(), |a, accel3d| {
                a.attr("accel3d", Some(accel3d));
            });
        });
    }
}

impl DeviceXml for GraphicsConfig {
    fn decode(c: &mut Cursor) -> Self {
        GraphicsConfig {
            graphics_type: c.enum_attr("type"),
            port: c.parsed("port"),
            autoport: c.yes_no("autoport"),
            listen_address: c.attr("listen"),
            passwd: c.attr("passwd"),
            listen: c.child("listen", |l| {
                Some(GraphicsListen {
                    listen_type: l.attr("type"),
                    address: l.attr("address"),
                })
            }),
            gl: c.child("gl", |g| {
                Some(GraphicsGl {
                    enable: g.yes_no("enable"),
                    rendernode: g.attr("rendernode"),
                })
            }),
        }
    }

    fn encode(&self, b: &mut ElementBuilder<'_>) {
        b.attr("type", self.graphics_type.as_ref())
            .attr("port", self.port.as_ref())
            .attr("autoport", self.autoport.as_yes_no())
            .attr("listen", self.listen_address.as_ref())
            .attr("passwd", self.passwd.as_ref());
        b.child_if("listen", self.listen.as_ref(), |l, listen| {
            l.attr("type", listen.listen_type.as_ref())
                .attr("address", listen.address.as_ref());
        });
        b.child_if("gl", self.gl.as_ref(), |g, gl| {
            g.attr("enable", gl.enable.as_yes_no())
                .attr("rendernode", gl.rendernode.as_ref());
        });
    }
}

// --- Watchdog / Panic / Memballoon ---

impl DeviceXml for WatchdogConfig {
    fn decode(c: &mut Cursor) -> Self {
        WatchdogConfig {
            model: c.enum_attr("model"),
            action: c.enum_attr("action"),
        }
    }

    fn encode(&self, b: &mut ElementBuilder<'_>) {
        b.attr("model", self.model.as_ref())
            .attr("action", self.action.as_ref());
    }
}

impl DeviceXml for PanicConfig {
    fn decode(c: &mut Cursor) -> Self {
        PanicConfig {
            model: c.enum_attr("model"),
        }
    }

    fn encode(&self, b: &mut ElementBuilder<'_>) {
        b.attr("model", self.model.as_ref());
    }
}

impl DeviceXml for MemballoonConfig {
    fn decode(c: &mut Cursor) -> Self {
        MemballoonConfig {
            model: c.enum_attr("model"),
            stats_period: c.child("stats", |s| s.parsed("period")),
        }
    }

    fn encode(&self, b: &mut ElementBuilder<'_>) {
        b.attr("model", self.model.as_ref());
        b.child_if("stats", self.stats_period.as_ref(), |s, period| {
            s.attr("period", Some(period));
        });
    }
}

// --- Filesystem / Smartcard / Redirection ---

impl DeviceXml for FilesystemConfig {
    fn decode(c: &mut Cursor) -> Self {
        FilesystemConfig {
            fs_type: c.enum_attr("type"),
            access_mode: c.enum_attr("accessmode"),
            driver_type: c.child("driver", |d| d.enum_attr("type")),
            source_dir: single_attr(c, "source", "dir"),
            target_dir: single_attr(c, "target", "dir"),
            readonly: c.flag("readonly"),
        }
    }

    fn encode(&self, b: &mut ElementBuilder<'_>) {
        b.attr("type", self.fs_type.as_ref())
            .attr("accessmode", self.access_mode.as_ref());
        b.child_if("driver", self.driver_type.as_ref(), |d, driver| {
            d.attr("type", Some(driver));
        });
        single_attr_child(b, "source", "dir", self.source_dir.as_ref());
        single_attr_child(b, "target", "dir", self.target_dir.as_ref());
        b.flag("readonly", self.readonly);
    }
}

impl DeviceXml for SmartcardConfig {
    fn decode(c: &mut Cursor) -> Self {
        SmartcardConfig {
            mode: c.enum_attr("mode"),
            passthrough_type: c.enum_attr("type"),
            certificates: c.children("certificate", Cursor::text),
            database: c.child("database", Cursor::text),
            source: c.child("source", decode_char_source),
        }
    }

    fn encode(&self, b: &mut ElementBuilder<'_>) {
        b.attr("mode", self.mode.as_ref())
            .attr("type", self.passthrough_type.as_ref());
        for cert in &self.certificates {
            b.text_child("certificate", Some(cert.as_str()));
        }
        b.text_child("database", self.database.as_deref());
        b.child_if("source", self.source.as_ref(), encode_char_source);
    }
}

impl DeviceXml for RedirdevConfig {
    fn decode(c: &mut Cursor) -> Self {
        RedirdevConfig {
            bus: c.enum_attr("bus"),
            redir_type: c.enum_attr("type"),
            source: c.child("source", decode_char_source),
            boot_order: decode_boot_order(c),
        }
    }

    fn encode(&self, b: &mut ElementBuilder<'_>) {
        b.attr("bus", self.bus.as_ref())
            .attr("type", self.redir_type.as_ref());
        b.child_if("source", self.source.as_ref(), encode_char_source);
        encode_boot_order(b, self.boot_order);
    }
}

// --- TPM / RNG / VSOCK / Emulator ---

impl DeviceXml for TpmConfig {
    fn decode(c: &mut Cursor) -> Self {
        TpmConfig {
            model: c.enum_attr("model"),
            backend: c.child("backend", |be| {
                Some(TpmBackend {
                    backend_type: be.enum_attr("type"),
                    version: be.attr("version"),
                    device_path: single_attr(be, "device", "path"),
                })
            }),
        }
    }

    fn encode(&self, b: &mut ElementBuilder<'_>) {
        b.attr("model", self.model.as_ref());
        b.child_if("backend", self.backend.as_ref(), |be, backend| {
            be.attr("type", backend.backend_type.as_ref())
                .attr("version", backend.version.as_ref());
            single_attr_child(be, "device", "path", backend.device_path.as_ref());
        });
    }
}

impl DeviceXml for RngConfig {
    fn decode(c: &mut Cursor) -> Self {
        RngConfig {
            model: c.enum_attr("model"),
            rate: c.child("rate", |r| {
                Some(RngRate {
                    bytes: r.parsed("bytes"),
                    period: r.parsed("period"),
                })
            }),
            backend: c.child("backend", |be| {
                Some(RngBackend {
                    model: be.enum_attr("model"),
                    backend_type: be.attr("type"),
                    path: be.text(),
                    source: be.child("source", decode_char_source),
                })
            }),
        }
    }

    fn encode(&self, b: &mut ElementBuilder<'_>) {
        b.attr("model", self.model.as_ref());
        b.child_if("rate", self.rate.as_ref(), |r, rate| {
            r.attr("bytes", rate.bytes.as_ref())
                .attr("period", rate.period.as_ref());
        });
        b.child_if("backend", self.backend.as_ref(), |be, backend| {
            be.attr("model", backend.model.as_ref())
                .attr("type", backend.backend_type.as_ref());
            be.child_if("source", backend.source.as_ref(), encode_char_source);
            be.text(backend.path.as_deref().unwrap_or_default());
        });
    }
}

impl DeviceXml for VsockConfig {
    fn decode(c: &mut Cursor) -> Self {
        VsockConfig {
            model: c.attr("model"),
            cid: c.child("cid", |cid| {
                Some(VsockCid {
                    auto: cid.yes_no("auto"),
                    address: cid.parsed("address"),
                })
            }),
        }
    }

    fn encode(&self, b: &mut ElementBuilder<'_>) {
        b.attr("model", self.model.as_ref());
        b.child_if("cid", self.cid.as_ref(), |e, cid| {
            e.attr("auto", cid.auto.as_yes_no())
                .attr("address", cid.address.as_ref());
        });
    }
}

impl DeviceXml for EmulatorConfig {
    fn decode(c: &mut Cursor) -> Self {
        EmulatorConfig {
            path: c.text().unwrap_or_default(),
        }
    }

    fn encode(&self, b: &mut ElementBuilder<'_>) {
        b.text(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canonical(xml: &str) -> String {
        encode_domain(&decode_domain(xml).unwrap()).unwrap()
    }

    #[test]
    fn decodes_typed_header_fields() {
        let doc = decode_domain(
            r#"<domain type="kvm">
  <name>web01</name>
  <memory unit="KiB">4194304</memory>
  <vcpu placement="static">4</vcpu>
  <os>
    <type arch="x86_64" machine="pc-q35-8.2">hvm</type>
    <boot dev="cdrom"/>
    <boot dev="hd"/>
  </os>
</domain>
"#,
        )
        .unwrap();
        assert_eq!(doc.virt_type.as_deref(), Some("kvm"));
        assert_eq!(doc.name.as_deref(), Some("web01"));
        assert_eq!(doc.memory, Some(MemorySize::kib(4194304)));
        assert_eq!(doc.vcpu.as_ref().map(|v| v.count), Some(4));
        let os = doc.os.unwrap();
        assert_eq!(os.machine.as_deref(), Some("pc-q35-8.2"));
        assert_eq!(os.boot, vec![BootDevice::Cdrom, BootDevice::Hd]);
        assert!(doc.raw_extra.is_empty());
        assert!(!doc.devices_section);
    }

    #[test]
    fn wrong_root_is_malformed() {
        let err = decode_domain("<network><name>x</name></network>").unwrap_err();
        assert!(err.is_malformed_xml());
    }

    #[test]
    fn disk_fields_and_common_children() {
        let dev = decode_device(
            r#"<disk type="file" device="disk">
  <driver name="qemu" type="qcow2" discard="unmap"/>
  <source file="/var/lib/libvirt/images/web01.qcow2"/>
  <target dev="vda" bus="virtio"/>
  <boot order="1"/>
  <alias name="virtio-disk0"/>
  <address type="pci" domain="0x0000" bus="0x04" slot="0x00" function="0x0"/>
</disk>
"#,
        )
        .unwrap();
        let DeviceConfig::Disk(disk) = &dev.config else {
            panic!("expected a disk, got {:?}", dev.config);
        };
        assert_eq!(disk.target_dev(), Some("vda"));
        assert_eq!(disk.boot_order, Some(1));
        assert_eq!(disk.driver.as_ref().unwrap().format.as_deref(), Some("qcow2"));
        assert_eq!(dev.alias(), Some("virtio-disk0"));
        let addr = dev.address.as_ref().unwrap();
        assert_eq!(addr.address_type.as_deref(), Some("pci"));
        assert_eq!(addr.get("bus"), Some("0x04"));
        assert!(dev.raw_extra().is_empty());
    }

    #[test]
    fn unknown_device_element_round_trips_verbatim() {
        let src = "<shmem name=\"ivshmem\">\n  <model type=\"ivshmem-plain\"/>\n  <size unit=\"M\">4</size>\n</shmem>\n";
        let dev = decode_device(src).unwrap();
        assert_eq!(dev.kind(), DeviceKind::Unknown);
        assert_eq!(encode_device(&dev).unwrap(), src);
    }

    #[test]
    fn unknown_attribute_keeps_its_slot() {
        let src = "<video>\n  <model type=\"virtio\" heads=\"1\" blob=\"on\" primary=\"yes\"/>\n</video>\n";
        let dev = decode_device(src).unwrap();
        assert_eq!(dev.raw_extra().len(), 1);
        assert_eq!(encode_device(&dev).unwrap(), src);
    }

    #[test]
    fn unknown_enum_value_decodes_into_other() {
        let dev = decode_device(r#"<video><model type="quantum-gpu"/></video>"#).unwrap();
        let DeviceConfig::Video(video) = &dev.config else {
            panic!("expected video");
        };
        assert_eq!(video.model, Some(VideoModel::Other("quantum-gpu".into())));
        assert!(dev.raw_extra().is_empty());
    }

    #[test]
    fn char_devices_keep_their_element() {
        let src = "<channel type=\"unix\">\n  <source mode=\"bind\"/>\n  <target type=\"virtio\" name=\"org.qemu.guest_agent.0\"/>\n</channel>\n";
        let dev = decode_device(src).unwrap();
        assert_eq!(dev.kind(), DeviceKind::Channel);
        assert_eq!(encode_device(&dev).unwrap(), src);
    }

    #[test]
    fn non_canonical_boot_order_survives() {
        let src = "<interface type=\"network\">\n  <source network=\"default\"/>\n  <boot order=\"01\"/>\n</interface>\n";
        let dev = decode_device(src).unwrap();
        let DeviceConfig::Interface(nic) = &dev.config else {
            panic!("expected interface");
        };
        assert_eq!(nic.boot_order, None);
        assert_eq!(encode_device(&dev).unwrap(), src);
    }

    #[test]
    fn setting_a_rejected_child_replaces_it() {
        let src = "<interface type=\"network\">\n  <source network=\"default\"/>\n  <boot order=\"01\"/>\n</interface>\n";
        let mut dev = decode_device(src).unwrap();
        if let DeviceConfig::Interface(nic) = &mut dev.config {
            nic.boot_order = Some(2);
        }
        let xml = encode_device(&dev).unwrap();
        assert_eq!(xml.matches("<boot").count(), 1, "{xml}");
        assert!(xml.contains("<boot order=\"2\"/>"));
    }

    #[test]
    fn duplicate_singular_child_stays_raw() {
        let src = "<video>\n  <model type=\"virtio\"/>\n  <model type=\"vga\"/>\n</video>\n";
        let dev = decode_device(src).unwrap();
        assert_eq!(dev.raw_extra().len(), 1);
        assert_eq!(encode_device(&dev).unwrap(), src);
    }

    #[test]
    fn hostdev_rom_follows_alias() {
        let src = r#"<hostdev mode="subsystem" type="pci" managed="yes">
  <source>
    <address domain="0x0000" bus="0x06" slot="0x00" function="0x0"/>
  </source>
  <alias name="hostdev0"/>
  <rom bar="off"/>
  <address type="pci" domain="0x0000" bus="0x07" slot="0x00" function="0x0"/>
</hostdev>
"#;
        let dev = decode_device(src).unwrap();
        let DeviceConfig::Hostdev(hostdev) = &dev.config else {
            panic!("expected hostdev");
        };
        assert_eq!(hostdev.rom_bar, TriState::No);
        assert!(dev.raw_extra().is_empty());
        assert_eq!(encode_device(&dev).unwrap(), src);
    }

    #[test]
    fn rng_backend_path_is_text() {
        let src = "<rng model=\"virtio\">\n  <backend model=\"random\">/dev/urandom</backend>\n</rng>\n";
        let dev = decode_device(src).unwrap();
        let DeviceConfig::Rng(rng) = &dev.config else {
            panic!("expected rng");
        };
        assert_eq!(
            rng.backend.as_ref().and_then(|b| b.path.as_deref()),
            Some("/dev/urandom")
        );
        assert_eq!(encode_device(&dev).unwrap(), src);
    }

    #[test]
    fn unknown_domain_children_keep_their_place() {
        let src = r#"<domain type="kvm">
  <name>vm</name>
  <memory unit="KiB">1048576</memory>
  <features>
    <acpi/>
  </features>
  <clock offset="utc"/>
  <devices>
    <emulator>/usr/bin/qemu-system-x86_64</emulator>
  </devices>
  <seclabel type="dynamic"/>
</domain>
"#;
        assert_eq!(canonical(src), src);
    }

    #[test]
    fn empty_devices_section_is_kept() {
        let src = "<domain type=\"kvm\">\n  <name>vm</name>\n  <devices/>\n</domain>\n";
        assert_eq!(canonical(src), src);
    }
}
