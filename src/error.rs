use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    /// The XML byte stream is structurally broken (unparseable, unclosed or
    /// mismatched tags). Recoverable: the user fixes the text and retries.
    #[error("Malformed XML: {0}")]
    MalformedXml(String),

    /// One or more device fields fall outside what the hypervisor advertises.
    #[error("Not supported by hypervisor capabilities: {0}")]
    UnsupportedByCapabilities(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Hypervisor refused the definition. `detail` is the backend message, unmodified.
    #[error("{detail}")]
    RejectedByHypervisor { detail: String },

    #[error("Failed to launch editor `{command}`: {reason}")]
    EditorLaunchFailed { command: String, reason: String },

    /// The document changed while the editor was open; nothing was applied.
    #[error("{0} changed while it was being edited")]
    EditConflict(String),

    #[error("No device at index {0}")]
    NoSuchDevice(usize),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    pub fn is_malformed_xml(&self) -> bool {
        matches!(self, AppError::MalformedXml(_))
    }
}

impl From<quick_xml::Error> for AppError {
    fn from(err: quick_xml::Error) -> Self {
        AppError::MalformedXml(err.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for AppError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        AppError::MalformedXml(err.to_string())
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for AppError {
    fn from(err: toml::ser::Error) -> Self {
        AppError::Config(err.to_string())
    }
}

#[cfg(feature = "libvirt")]
impl From<virt::error::Error> for AppError {
    fn from(err: virt::error::Error) -> Self {
        AppError::BackendUnavailable(err.to_string())
    }
}
