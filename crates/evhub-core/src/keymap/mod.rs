// Evhub Device Configuration
// Key layout, character and virtual-key maps plus the per-device property file

pub mod character;
pub mod layout;
pub mod loader;
pub mod property;
pub mod virtual_keys;

use std::path::PathBuf;
use std::sync::Arc;

pub use character::{KeyCharacter, KeyCharacterMap, KeyboardType};
pub use layout::{AxisInfo, AxisMode, CodeSource, KeyLayoutMap, KeyMapping};
pub use loader::{ConfigError, ConfigLoader, ConfigResult, DeviceConfig, TomlConfigLoader};
pub use property::PropertyMap;
pub use virtual_keys::{VirtualKeyDefinition, VirtualKeyMap};

/// The base key maps loaded for a device and where they came from.
#[derive(Debug, Clone, Default)]
pub struct KeyMap {
    pub key_layout_file: Option<PathBuf>,
    pub key_layout_map: Option<Arc<KeyLayoutMap>>,
    pub key_character_map_file: Option<PathBuf>,
    pub key_character_map: Option<Arc<KeyCharacterMap>>,
}

impl KeyMap {
    pub fn have_key_layout(&self) -> bool {
        self.key_layout_map.is_some()
    }

    pub fn have_key_character_map(&self) -> bool {
        self.key_character_map.is_some()
    }

    pub fn is_complete(&self) -> bool {
        self.have_key_layout() && self.have_key_character_map()
    }
}
