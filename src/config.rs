use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// User settings, stored as TOML under the platform config directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Override editor command; falls back to `$VISUAL` / `$EDITOR` when unset.
    pub editor: Option<String>,
    pub connection_uri: String,
    /// Refuse to define a domain while capability violations remain.
    pub strict_capabilities: bool,
    /// Where edit buffers are created; the system temp dir when unset.
    pub temp_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            editor: None,
            connection_uri: "qemu:///system".to_string(),
            strict_capabilities: false,
            temp_dir: None,
        }
    }
}

impl Settings {
    /// Load settings from the default location, or defaults if there is no file.
    pub fn load() -> Result<Self, AppError> {
        Self::load_from(&Self::config_file_path())
    }

    pub fn load_from(path: &Path) -> Result<Self, AppError> {
        if !path.exists() {
            log::debug!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| AppError::Config(format!("Failed to parse {}: {e}", path.display())))
    }

    pub fn save(&self) -> Result<(), AppError> {
        self.save_to(&Self::config_file_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), AppError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_file_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("grustyvman")
            .join("settings.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_from(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.connection_uri, "qemu:///system");
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "editor = \"nano -w\"\n").unwrap();
        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.editor.as_deref(), Some("nano -w"));
        assert!(!settings.strict_capabilities);
    }

    #[test]
    fn save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.toml");
        let settings = Settings {
            editor: Some("vim".into()),
            connection_uri: "qemu:///session".into(),
            strict_capabilities: true,
            temp_dir: Some(dir.path().to_path_buf()),
        };
        settings.save_to(&path).unwrap();
        assert_eq!(Settings::load_from(&path).unwrap(), settings);
    }

    #[test]
    fn bad_toml_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "strict_capabilities = \"maybe\"").unwrap();
        assert!(matches!(Settings::load_from(&path), Err(AppError::Config(_))));
    }
}
