// Evhub Key Character Map
// Keyboard type, key labels and key code overrides, with overlay merging

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Deserialize;

use super::layout::CodeSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyboardType {
    #[default]
    Unknown,
    Numeric,
    Predictive,
    Alpha,
    Full,
    /// Only function keys (power, volume); never a typing keyboard.
    SpecialFunction,
    /// Only meaningful when layered over a base map.
    Overlay,
}

impl fmt::Display for KeyboardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            KeyboardType::Unknown => "UNKNOWN",
            KeyboardType::Numeric => "NUMERIC",
            KeyboardType::Predictive => "PREDICTIVE",
            KeyboardType::Alpha => "ALPHA",
            KeyboardType::Full => "FULL",
            KeyboardType::SpecialFunction => "SPECIAL_FUNCTION",
            KeyboardType::Overlay => "OVERLAY",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyCharacter {
    pub label: Option<char>,
    pub number: Option<char>,
}

/// Character data for one keyboard.
///
/// Shared behind an [`Arc`] between the device record and any caller that
/// asked for it; never mutated after construction. Installing an overlay
/// builds a new combined map instead.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct KeyCharacterMap {
    keyboard_type: KeyboardType,
    keys: IndexMap<i32, KeyCharacter>,
    keys_by_scan_code: IndexMap<i32, i32>,
    keys_by_usage_code: IndexMap<i32, i32>,
}

impl KeyCharacterMap {
    pub fn new(keyboard_type: KeyboardType) -> Self {
        Self {
            keyboard_type,
            ..Self::default()
        }
    }

    pub fn keyboard_type(&self) -> KeyboardType {
        self.keyboard_type
    }

    pub fn add_key(&mut self, key_code: i32, character: KeyCharacter) {
        self.keys.insert(key_code, character);
    }

    /// Route a scan or usage code to `key_code` ahead of the layout map.
    pub fn add_mapping(&mut self, source: CodeSource, key_code: i32) {
        match source {
            CodeSource::Scan(code) => self.keys_by_scan_code.insert(code, key_code),
            CodeSource::Usage(code) => self.keys_by_usage_code.insert(code, key_code),
        };
    }

    pub fn get_display_label(&self, key_code: i32) -> Option<char> {
        self.keys.get(&key_code).and_then(|k| k.label)
    }

    pub fn get_number(&self, key_code: i32) -> Option<char> {
        self.keys.get(&key_code).and_then(|k| k.number)
    }

    /// Usage code is consulted before scan code.
    pub fn map_key(&self, scan_code: i32, usage_code: i32) -> Option<i32> {
        if usage_code != 0 {
            if let Some(key_code) = self.keys_by_usage_code.get(&usage_code) {
                return Some(*key_code);
            }
        }
        if scan_code != 0 {
            if let Some(key_code) = self.keys_by_scan_code.get(&scan_code) {
                return Some(*key_code);
            }
        }
        None
    }

    pub fn has_mappings(&self) -> bool {
        !self.keys_by_scan_code.is_empty() || !self.keys_by_usage_code.is_empty()
    }

    /// Layer `overlay` over `base`. Overlay entries replace base entries with
    /// the same key; the base keyboard type is kept.
    pub fn combine(base: &Arc<KeyCharacterMap>, overlay: Option<&Arc<KeyCharacterMap>>) -> Arc<KeyCharacterMap> {
        let Some(overlay) = overlay else {
            return Arc::clone(base);
        };
        let mut combined = KeyCharacterMap::clone(base);
        for (code, character) in &overlay.keys {
            combined.keys.insert(*code, character.clone());
        }
        for (scan, key) in &overlay.keys_by_scan_code {
            combined.keys_by_scan_code.insert(*scan, *key);
        }
        for (usage, key) in &overlay.keys_by_usage_code {
            combined.keys_by_usage_code.insert(*usage, *key);
        }
        Arc::new(combined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keycodes::{KEYCODE_A, KEYCODE_Q, KEYCODE_Z};

    fn base() -> Arc<KeyCharacterMap> {
        let mut map = KeyCharacterMap::new(KeyboardType::Full);
        map.add_key(
            KEYCODE_Q,
            KeyCharacter {
                label: Some('Q'),
                number: Some('1'),
            },
        );
        map.add_mapping(CodeSource::Scan(16), KEYCODE_Q);
        Arc::new(map)
    }

    #[test]
    fn test_combine_without_overlay_shares_base() {
        let base = base();
        let combined = KeyCharacterMap::combine(&base, None);
        assert!(Arc::ptr_eq(&base, &combined));
    }

    #[test]
    fn test_overlay_replaces_entries() {
        let base = base();
        let mut overlay = KeyCharacterMap::new(KeyboardType::Overlay);
        overlay.add_mapping(CodeSource::Scan(16), KEYCODE_A);
        overlay.add_mapping(CodeSource::Usage(0x0007_001d), KEYCODE_Z);
        overlay.add_key(
            KEYCODE_Q,
            KeyCharacter {
                label: Some('A'),
                number: None,
            },
        );
        let overlay = Arc::new(overlay);

        let combined = KeyCharacterMap::combine(&base, Some(&overlay));
        assert_eq!(combined.keyboard_type(), KeyboardType::Full);
        assert_eq!(combined.map_key(16, 0), Some(KEYCODE_A));
        assert_eq!(combined.map_key(44, 0x0007_001d), Some(KEYCODE_Z));
        assert_eq!(combined.get_display_label(KEYCODE_Q), Some('A'));
        // Base is untouched.
        assert_eq!(base.map_key(16, 0), Some(KEYCODE_Q));
    }

    #[test]
    fn test_keyboard_type_display() {
        assert_eq!(KeyboardType::SpecialFunction.to_string(), "SPECIAL_FUNCTION");
    }
}
