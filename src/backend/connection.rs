use crate::backend::capabilities::CapabilitySnapshot;
use crate::backend::devices::DomainDocument;
use crate::error::AppError;
use std::sync::{Arc, RwLock};

/// Which emulator/arch/machine/virt-type combination to ask capabilities for.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DomainRef {
    pub emulator: Option<String>,
    pub arch: Option<String>,
    pub machine: Option<String>,
    pub virt_type: Option<String>,
}

impl DomainRef {
    pub fn from_document(doc: &DomainDocument) -> Self {
        let os = doc.os.as_ref();
        Self {
            emulator: doc.emulator().map(String::from),
            arch: os.and_then(|o| o.arch.clone()),
            machine: os.and_then(|o| o.machine.clone()),
            virt_type: doc.virt_type.clone(),
        }
    }
}

/// The two calls the device model needs from a hypervisor connection.
pub trait DomainBackend: Send + Sync {
    /// Fails with `BackendUnavailable` when the connection cannot be used.
    fn fetch_capabilities(&self, uri: &str, domain: &DomainRef) -> Result<CapabilitySnapshot, AppError>;

    /// Fails with `RejectedByHypervisor` carrying the backend's message as-is.
    fn define_domain(&self, uri: &str, doc: &DomainDocument) -> Result<(), AppError>;
}

// ---------------------------------------------------------------------------
// Capability cache
//
// One snapshot per session, tagged with the connection URI it came from.
// Readers clone the Arc and never see a half-updated value; a refresh swaps
// the whole entry under the write lock. A URI mismatch reads as "nothing
// cached" so callers fall back to unconstrained validation.
// ---------------------------------------------------------------------------

struct CachedSnapshot {
    uri: String,
    snapshot: Arc<CapabilitySnapshot>,
}

#[derive(Default)]
pub struct CapabilityCache {
    entry: RwLock<Option<CachedSnapshot>>,
}

impl CapabilityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached snapshot for `uri`, if any.
    pub fn current(&self, uri: &str) -> Option<Arc<CapabilitySnapshot>> {
        let guard = self.entry.read().unwrap_or_else(|e| e.into_inner());
        guard
            .as_ref()
            .filter(|c| c.uri == uri)
            .map(|c| Arc::clone(&c.snapshot))
    }

    pub fn store(&self, uri: &str, snapshot: CapabilitySnapshot) -> Arc<CapabilitySnapshot> {
        let snapshot = Arc::new(snapshot);
        let mut guard = self.entry.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(CachedSnapshot {
            uri: uri.to_string(),
            snapshot: Arc::clone(&snapshot),
        });
        snapshot
    }

    pub fn invalidate(&self) {
        let mut guard = self.entry.write().unwrap_or_else(|e| e.into_inner());
        *guard = None;
    }

    /// Fetch a fresh snapshot and swap it in. On failure the previous entry
    /// is left alone.
    pub fn refresh(
        &self,
        backend: &dyn DomainBackend,
        uri: &str,
        domain: &DomainRef,
    ) -> Result<Arc<CapabilitySnapshot>, AppError> {
        match backend.fetch_capabilities(uri, domain) {
            Ok(snapshot) => {
                log::info!("Refreshed capabilities for {uri}");
                Ok(self.store(uri, snapshot))
            }
            Err(e) => {
                log::warn!("Failed to fetch capabilities for {uri}: {e}");
                Err(e)
            }
        }
    }
}

#[cfg(feature = "libvirt")]
pub use libvirt::LibvirtBackend;

#[cfg(feature = "libvirt")]
mod libvirt {
    use super::{DomainBackend, DomainRef};
    use crate::backend::capabilities::CapabilitySnapshot;
    use crate::backend::devices::DomainDocument;
    use crate::backend::domain_xml::encode_domain;
    use crate::error::AppError;
    use std::sync::{Mutex, OnceLock};
    use virt::connect::Connect;
    use virt::domain::Domain;

    // libvirt connections hold several file descriptors each, so one
    // connection per URI is kept open and handed out as virConnectRef clones.
    // Any connection error drops the entry and the next call reconnects.

    struct ConnCache {
        uri: String,
        conn: Connect,
    }

    static CONN_CACHE: OnceLock<Mutex<Option<ConnCache>>> = OnceLock::new();

    fn conn_cache() -> &'static Mutex<Option<ConnCache>> {
        CONN_CACHE.get_or_init(|| Mutex::new(None))
    }

    fn get_conn(uri: &str) -> Result<Connect, AppError> {
        let mut guard = conn_cache().lock().unwrap_or_else(|e| e.into_inner());

        if let Some(cached) = guard.as_ref() {
            if cached.uri == uri && cached.conn.is_alive().unwrap_or(false) {
                return Ok(cached.conn.clone());
            }
        }

        *guard = None;
        let conn = Connect::open(Some(uri))
            .map_err(|e| AppError::BackendUnavailable(format!("{uri}: {e}")))?;
        let handle = conn.clone();
        *guard = Some(ConnCache {
            uri: uri.to_string(),
            conn,
        });
        Ok(handle)
    }

    fn invalidate_conn() {
        if let Ok(mut guard) = conn_cache().lock() {
            *guard = None;
        }
    }

    #[derive(Debug, Default, Clone, Copy)]
    pub struct LibvirtBackend;

    impl DomainBackend for LibvirtBackend {
        fn fetch_capabilities(&self, uri: &str, domain: &DomainRef) -> Result<CapabilitySnapshot, AppError> {
            let conn = get_conn(uri)?;
            let xml = conn
                .get_domain_capabilities(
                    domain.emulator.as_deref(),
                    domain.arch.as_deref(),
                    domain.machine.as_deref(),
                    domain.virt_type.as_deref(),
                    0,
                )
                .map_err(|e| {
                    invalidate_conn();
                    AppError::BackendUnavailable(e.to_string())
                })?;
            CapabilitySnapshot::from_xml(&xml)
        }

        fn define_domain(&self, uri: &str, doc: &DomainDocument) -> Result<(), AppError> {
            let xml = encode_domain(doc)?;
            let conn = get_conn(uri)?;
            Domain::define_xml(&conn, &xml).map_err(|e| {
                log::error!("Failed to define domain {:?}: {e}", doc.name);
                AppError::RejectedByHypervisor {
                    detail: e.to_string(),
                }
            })?;
            Ok(())
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// In-memory backend that records every defined document.
    #[derive(Default)]
    pub(crate) struct FakeBackend {
        pub snapshot: Option<CapabilitySnapshot>,
        pub reject_with: Option<String>,
        pub defined: Mutex<Vec<String>>,
    }

    impl DomainBackend for FakeBackend {
        fn fetch_capabilities(&self, uri: &str, _domain: &DomainRef) -> Result<CapabilitySnapshot, AppError> {
            self.snapshot
                .clone()
                .ok_or_else(|| AppError::BackendUnavailable(format!("{uri}: connection refused")))
        }

        fn define_domain(&self, _uri: &str, doc: &DomainDocument) -> Result<(), AppError> {
            if let Some(detail) = &self.reject_with {
                return Err(AppError::RejectedByHypervisor {
                    detail: detail.clone(),
                });
            }
            let xml = crate::backend::domain_xml::encode_domain(doc)?;
            self.defined.lock().unwrap().push(xml);
            Ok(())
        }
    }

    #[test]
    fn cache_is_keyed_by_uri() {
        let cache = CapabilityCache::new();
        let backend = FakeBackend {
            snapshot: Some(CapabilitySnapshot::builder().virt_type("kvm").build()),
            ..Default::default()
        };
        let snap = cache
            .refresh(&backend, "qemu:///system", &DomainRef::default())
            .unwrap();
        assert_eq!(snap.virt_type.as_deref(), Some("kvm"));
        assert!(cache.current("qemu:///system").is_some());
        assert!(cache.current("qemu:///session").is_none());

        cache.invalidate();
        assert!(cache.current("qemu:///system").is_none());
    }

    #[test]
    fn failed_refresh_keeps_previous_snapshot() {
        let cache = CapabilityCache::new();
        cache.store("qemu:///system", CapabilitySnapshot::default());
        let err = cache
            .refresh(&FakeBackend::default(), "qemu:///system", &DomainRef::default())
            .unwrap_err();
        assert!(matches!(err, AppError::BackendUnavailable(_)));
        assert!(cache.current("qemu:///system").is_some());
    }

    #[test]
    fn domain_ref_comes_from_document() {
        let doc = crate::backend::domain_xml::decode_domain(
            r#"<domain type="kvm"><os><type arch="aarch64" machine="virt">hvm</type></os><devices><emulator>/usr/bin/qemu-system-aarch64</emulator></devices></domain>"#,
        )
        .unwrap();
        let r = DomainRef::from_document(&doc);
        assert_eq!(r.arch.as_deref(), Some("aarch64"));
        assert_eq!(r.machine.as_deref(), Some("virt"));
        assert_eq!(r.emulator.as_deref(), Some("/usr/bin/qemu-system-aarch64"));
        assert_eq!(r.virt_type.as_deref(), Some("kvm"));
    }
}
