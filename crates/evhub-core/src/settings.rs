// Evhub Settings Module
// Where devices live, how nodes are named and which devices to leave alone

use std::path::{Path, PathBuf};

/// Hub settings, loaded from a TOML file (default:
/// `~/.config/evhub/settings.toml`). Every key is optional.
#[derive(Debug, Clone, PartialEq)]
pub struct HubSettings {
    /// Directory holding `eventN` nodes.
    pub input_dir: PathBuf,

    /// Directory holding heatmap video nodes.
    pub video_dir: PathBuf,

    /// Directories searched for per-device TOML files, in priority order.
    pub device_config_dirs: Vec<PathBuf>,

    pub node_prefix: String,
    pub video_prefix: String,

    /// Device names or node paths never opened.
    pub excluded: Vec<String>,

    /// Whether each scan ensures the fd-less virtual keyboard exists.
    pub virtual_keyboard: bool,

    source_path: Option<PathBuf>,
}

/// Errors that can occur when loading settings
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    #[error("Invalid setting value: {0}")]
    InvalidValue(String),
}

/// TOML representation for deserializing settings
#[derive(Debug, Clone, serde::Deserialize, Default)]
struct SettingsToml {
    #[serde(default)]
    paths: Option<PathSettings>,

    #[serde(default)]
    devices: Option<DeviceSettings>,
}

#[derive(Debug, Clone, serde::Deserialize, Default)]
struct PathSettings {
    #[serde(default)]
    input_dir: Option<PathBuf>,
    #[serde(default)]
    video_dir: Option<PathBuf>,
    #[serde(default)]
    device_config_dirs: Option<Vec<PathBuf>>,
}

#[derive(Debug, Clone, serde::Deserialize, Default)]
struct DeviceSettings {
    #[serde(default)]
    node_prefix: Option<String>,
    #[serde(default)]
    video_prefix: Option<String>,
    #[serde(default)]
    excluded: Option<Vec<String>>,
    #[serde(default)]
    virtual_keyboard: Option<toml::Value>,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self::new()
    }
}

impl HubSettings {
    pub fn new() -> Self {
        Self {
            input_dir: PathBuf::from("/dev/input"),
            video_dir: PathBuf::from("/dev"),
            device_config_dirs: Self::default_device_config_dirs(),
            node_prefix: "event".to_string(),
            video_prefix: "v4l-touch".to_string(),
            excluded: Vec::new(),
            virtual_keyboard: true,
            source_path: None,
        }
    }

    /// `/etc/evhub/devices` then the per-user `evhub/devices`.
    pub fn default_device_config_dirs() -> Vec<PathBuf> {
        let mut dirs = vec![PathBuf::from("/etc/evhub/devices")];
        if let Some(config) = dirs::config_dir() {
            dirs.push(config.join("evhub").join("devices"));
        }
        dirs
    }

    /// Load settings from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(&path)?;
        let mut settings = Self::from_toml(&content)?;
        settings.source_path = Some(path.as_ref().to_path_buf());
        Ok(settings)
    }

    /// Load settings from TOML string
    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        let raw: SettingsToml =
            toml::from_str(content).map_err(|e| SettingsError::TomlParse(e.to_string()))?;

        let mut settings = Self::new();

        if let Some(paths) = raw.paths {
            if let Some(dir) = paths.input_dir {
                settings.input_dir = dir;
            }
            if let Some(dir) = paths.video_dir {
                settings.video_dir = dir;
            }
            if let Some(dirs) = paths.device_config_dirs {
                settings.device_config_dirs = dirs;
            }
        }

        if let Some(devices) = raw.devices {
            if let Some(prefix) = devices.node_prefix {
                if prefix.is_empty() {
                    return Err(SettingsError::InvalidValue(
                        "devices.node_prefix must not be empty".to_string(),
                    ));
                }
                settings.node_prefix = prefix;
            }
            if let Some(prefix) = devices.video_prefix {
                settings.video_prefix = prefix;
            }
            if let Some(excluded) = devices.excluded {
                settings.excluded = excluded;
            }
            if let Some(value) = devices.virtual_keyboard {
                settings.virtual_keyboard = parse_bool_value(&value)?;
            }
        }

        Ok(settings)
    }

    /// Get the default settings path
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("evhub").join("settings.toml"))
    }

    /// Load from the default location, or defaults if there is no file
    pub fn load_default() -> Result<Self, SettingsError> {
        if let Some(path) = Self::default_path() {
            if path.exists() {
                return Self::from_file(path);
            }
        }
        Ok(Self::new())
    }

    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }

    /// Reload settings from the original file
    pub fn reload(&mut self) -> Result<(), SettingsError> {
        if let Some(ref path) = self.source_path {
            let new_settings = Self::from_file(path)?;
            *self = new_settings;
            Ok(())
        } else {
            Err(SettingsError::InvalidValue("No source path set".to_string()))
        }
    }
}

/// Parse a TOML value as a boolean
fn parse_bool_value(value: &toml::Value) -> Result<bool, SettingsError> {
    match value {
        toml::Value::Boolean(b) => Ok(*b),
        toml::Value::Integer(1) => Ok(true),
        toml::Value::Integer(0) => Ok(false),
        toml::Value::String(s) => match s.to_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(true),
            "false" | "no" | "off" | "0" => Ok(false),
            _ => Err(SettingsError::InvalidValue(format!(
                "Cannot convert '{}' to boolean",
                s
            ))),
        },
        _ => Err(SettingsError::InvalidValue(format!(
            "Cannot convert {:?} to boolean",
            value
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_default() {
        let settings = HubSettings::new();
        assert_eq!(settings.input_dir, PathBuf::from("/dev/input"));
        assert_eq!(settings.node_prefix, "event");
        assert!(settings.virtual_keyboard);
        assert_eq!(
            settings.device_config_dirs.first(),
            Some(&PathBuf::from("/etc/evhub/devices"))
        );
    }

    #[test]
    fn test_settings_from_toml() {
        let toml = r#"
[paths]
input_dir = "/tmp/input"
device_config_dirs = ["/opt/devices"]

[devices]
excluded = ["Power Button", "/dev/input/event9"]
virtual_keyboard = "off"
"#;

        let settings = HubSettings::from_toml(toml).unwrap();
        assert_eq!(settings.input_dir, PathBuf::from("/tmp/input"));
        assert_eq!(settings.video_dir, PathBuf::from("/dev"));
        assert_eq!(settings.device_config_dirs, vec![PathBuf::from("/opt/devices")]);
        assert_eq!(settings.excluded.len(), 2);
        assert!(!settings.virtual_keyboard);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            HubSettings::from_toml("[devices]\nvirtual_keyboard = \"maybe\"\n"),
            Err(SettingsError::InvalidValue(_))
        ));
        assert!(matches!(
            HubSettings::from_toml("[devices]\nnode_prefix = \"\"\n"),
            Err(SettingsError::InvalidValue(_))
        ));
        assert!(matches!(
            HubSettings::from_toml("[paths\n"),
            Err(SettingsError::TomlParse(_))
        ));
    }

    #[test]
    fn test_from_file_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "[devices]\nnode_prefix = \"event\"\n").unwrap();
        let mut settings = HubSettings::from_file(&path).unwrap();
        assert_eq!(settings.source_path(), Some(path.as_path()));

        std::fs::write(&path, "[devices]\nnode_prefix = \"touch\"\n").unwrap();
        settings.reload().unwrap();
        assert_eq!(settings.node_prefix, "touch");
        assert!(HubSettings::new().reload().is_err());
    }
}
