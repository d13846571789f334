// Evhub Configuration Loader
// Finds and parses the TOML file describing a device, falling back to Generic.toml

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;
use serde::Deserialize;

use super::character::{KeyCharacter, KeyCharacterMap, KeyboardType};
use super::layout::{AxisInfo, AxisMode, CodeSource, KeyLayoutMap, KeyMapping};
use super::property::PropertyMap;
use super::virtual_keys::{VirtualKeyDefinition, VirtualKeyMap};
use super::KeyMap;
use crate::keycodes::policy_flag_from_name;
use crate::node::InputDeviceIdentifier;

/// File consulted when a device has no key layout of its own.
pub const GENERIC_CONFIG_NAME: &str = "Generic";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    TomlParse { path: PathBuf, message: String },

    #[error("invalid entry in {path}: {message}")]
    Invalid { path: PathBuf, message: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Everything loaded for one device. Missing pieces stay `None`.
#[derive(Debug, Clone, Default)]
pub struct DeviceConfig {
    pub configuration: Option<PropertyMap>,
    pub configuration_file: Option<PathBuf>,
    pub key_map: KeyMap,
    pub virtual_key_map: Option<VirtualKeyMap>,
}

/// Source of per-device configuration.
pub trait ConfigLoader: Send + Sync {
    fn load(&self, identifier: &InputDeviceIdentifier) -> ConfigResult<DeviceConfig>;
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct DeviceFileToml {
    properties: toml::Table,
    keys: Vec<KeyEntryToml>,
    axes: Vec<AxisEntryToml>,
    leds: Vec<LedEntryToml>,
    virtual_keys: Vec<VirtualKeyDefinition>,
    character_map: Option<CharacterMapToml>,
}

#[derive(Debug, Deserialize)]
struct KeyEntryToml {
    scan_code: Option<i32>,
    usage_code: Option<i32>,
    key_code: i32,
    #[serde(default)]
    flags: Vec<String>,
}

#[derive(Debug, Deserialize, Default, Clone, Copy)]
#[serde(rename_all = "snake_case")]
enum AxisModeToml {
    #[default]
    Normal,
    Invert,
    Split,
}

#[derive(Debug, Deserialize)]
struct AxisEntryToml {
    scan_code: i32,
    axis: i32,
    #[serde(default)]
    mode: AxisModeToml,
    high_axis: Option<i32>,
    split_value: Option<i32>,
    flat: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct LedEntryToml {
    scan_code: Option<i32>,
    usage_code: Option<i32>,
    led: i32,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct CharacterMapToml {
    #[serde(rename = "type")]
    keyboard_type: KeyboardType,
    keys: Vec<CharacterKeyToml>,
    mappings: Vec<CharacterMappingToml>,
}

#[derive(Debug, Deserialize)]
struct CharacterKeyToml {
    key_code: i32,
    label: Option<char>,
    number: Option<char>,
}

#[derive(Debug, Deserialize)]
struct CharacterMappingToml {
    scan_code: Option<i32>,
    usage_code: Option<i32>,
    key_code: i32,
}

/// One parsed device file.
#[derive(Debug, Default)]
struct DeviceFile {
    properties: PropertyMap,
    layout: Option<KeyLayoutMap>,
    character_map: Option<KeyCharacterMap>,
    virtual_keys: Option<VirtualKeyMap>,
}

fn code_source(path: &Path, scan: Option<i32>, usage: Option<i32>) -> ConfigResult<CodeSource> {
    match (scan, usage) {
        (_, Some(usage)) => Ok(CodeSource::Usage(usage)),
        (Some(scan), None) => Ok(CodeSource::Scan(scan)),
        (None, None) => Err(ConfigError::Invalid {
            path: path.to_path_buf(),
            message: "entry needs a scan_code or usage_code".to_string(),
        }),
    }
}

fn property_value(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn parse_device_file(path: &Path, content: &str) -> ConfigResult<DeviceFile> {
    let raw: DeviceFileToml = toml::from_str(content).map_err(|e| ConfigError::TomlParse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let mut file = DeviceFile::default();
    for (key, value) in &raw.properties {
        file.properties.add_property(key.clone(), property_value(value));
    }

    if !raw.keys.is_empty() || !raw.axes.is_empty() || !raw.leds.is_empty() {
        let mut layout = KeyLayoutMap::new();
        for entry in &raw.keys {
            let mut flags = 0;
            for name in &entry.flags {
                flags |= policy_flag_from_name(name).ok_or_else(|| ConfigError::Invalid {
                    path: path.to_path_buf(),
                    message: format!("unknown key flag '{}'", name),
                })?;
            }
            layout.add_key(
                code_source(path, entry.scan_code, entry.usage_code)?,
                KeyMapping {
                    key_code: entry.key_code,
                    flags,
                },
            );
        }
        for entry in &raw.axes {
            let mode = match entry.mode {
                AxisModeToml::Normal => AxisMode::Normal,
                AxisModeToml::Invert => AxisMode::Invert,
                AxisModeToml::Split => AxisMode::Split,
            };
            layout.add_axis(
                entry.scan_code,
                AxisInfo {
                    mode,
                    axis: entry.axis,
                    high_axis: entry.high_axis.unwrap_or(-1),
                    split_value: entry.split_value.unwrap_or(0),
                    flat_override: entry.flat,
                },
            );
        }
        for entry in &raw.leds {
            layout.add_led(code_source(path, entry.scan_code, entry.usage_code)?, entry.led);
        }
        file.layout = Some(layout);
    }

    if let Some(kcm) = raw.character_map {
        let mut map = KeyCharacterMap::new(kcm.keyboard_type);
        for key in kcm.keys {
            map.add_key(
                key.key_code,
                KeyCharacter {
                    label: key.label,
                    number: key.number,
                },
            );
        }
        for mapping in &kcm.mappings {
            map.add_mapping(code_source(path, mapping.scan_code, mapping.usage_code)?, mapping.key_code);
        }
        file.character_map = Some(map);
    }

    if !raw.virtual_keys.is_empty() {
        file.virtual_keys = Some(VirtualKeyMap::new(raw.virtual_keys));
    }

    Ok(file)
}

/// Replace anything but ASCII alphanumerics, `-` and `_` with `_`.
pub fn canonical_file_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// File stems tried for a device, most specific first.
pub fn device_file_names(identifier: &InputDeviceIdentifier) -> Vec<String> {
    let mut names = Vec::with_capacity(3);
    if identifier.vendor != 0 && identifier.product != 0 {
        if identifier.version != 0 {
            names.push(format!(
                "Vendor_{:04x}_Product_{:04x}_Version_{:04x}",
                identifier.vendor, identifier.product, identifier.version
            ));
        }
        names.push(format!(
            "Vendor_{:04x}_Product_{:04x}",
            identifier.vendor, identifier.product
        ));
    }
    if !identifier.name.is_empty() {
        names.push(canonical_file_name(&identifier.name));
    }
    names
}

/// Loads `<stem>.toml` device files from a list of directories; earlier
/// directories win.
#[derive(Debug, Clone, Default)]
pub struct TomlConfigLoader {
    dirs: Vec<PathBuf>,
}

impl TomlConfigLoader {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    fn find_file<S: AsRef<str>>(&self, stems: &[S]) -> Option<PathBuf> {
        stems.iter().find_map(|stem| {
            self.dirs
                .iter()
                .map(|dir| dir.join(format!("{}.toml", stem.as_ref())))
                .find(|path| path.is_file())
        })
    }

    fn read_file(path: &Path) -> ConfigResult<DeviceFile> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        parse_device_file(path, &content)
    }

    fn fill_key_map(config: &mut DeviceConfig, path: &Path, file: DeviceFile) {
        let key_map = &mut config.key_map;
        if key_map.key_layout_map.is_none() {
            if let Some(layout) = file.layout {
                key_map.key_layout_map = Some(Arc::new(layout));
                key_map.key_layout_file = Some(path.to_path_buf());
            }
        }
        if key_map.key_character_map.is_none() {
            if let Some(kcm) = file.character_map {
                key_map.key_character_map = Some(Arc::new(kcm));
                key_map.key_character_map_file = Some(path.to_path_buf());
            }
        }
    }
}

impl ConfigLoader for TomlConfigLoader {
    fn load(&self, identifier: &InputDeviceIdentifier) -> ConfigResult<DeviceConfig> {
        let mut config = DeviceConfig::default();

        if let Some(path) = self.find_file(&device_file_names(identifier)) {
            debug!("Loading configuration for '{}' from {}", identifier.name, path.display());
            let mut file = Self::read_file(&path)?;
            config.configuration = Some(std::mem::take(&mut file.properties));
            config.configuration_file = Some(path.clone());
            config.virtual_key_map = file.virtual_keys.take();
            Self::fill_key_map(&mut config, &path, file);
        }

        // A configuration may name separate layout and character map files.
        let named: Vec<String> = ["keyboard.layout", "keyboard.characterMap"]
            .iter()
            .filter_map(|key| {
                config
                    .configuration
                    .as_ref()
                    .and_then(|props| props.get_string(key))
                    .map(str::to_string)
            })
            .collect();
        for stem in named {
            if let Some(path) = self.find_file(&[stem.as_str()]) {
                let file = Self::read_file(&path)?;
                Self::fill_key_map(&mut config, &path, file);
            }
        }

        if !config.key_map.is_complete() {
            if let Some(path) = self.find_file(&[GENERIC_CONFIG_NAME]) {
                let file = Self::read_file(&path)?;
                Self::fill_key_map(&mut config, &path, file);
            }
        }

        Ok(config)
    }
}
