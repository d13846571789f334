// Evhub Key Layout
// Scan code and HID usage to framework key code, axis and LED translation tables

use indexmap::IndexMap;
use smallvec::SmallVec;

/// Result of translating a scan or usage code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyMapping {
    pub key_code: i32,
    /// `POLICY_FLAG_*` bits.
    pub flags: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AxisMode {
    #[default]
    Normal,
    /// The raw value is negated.
    Invert,
    /// Values below `split_value` drive `axis`, values above drive `high_axis`.
    Split,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisInfo {
    pub mode: AxisMode,
    pub axis: i32,
    pub high_axis: i32,
    pub split_value: i32,
    /// Replaces the driver's flat value when set.
    pub flat_override: Option<i32>,
}

impl AxisInfo {
    pub fn normal(axis: i32) -> Self {
        Self {
            mode: AxisMode::Normal,
            axis,
            high_axis: -1,
            split_value: 0,
            flat_override: None,
        }
    }
}

/// Either a kernel scan code or a HID usage code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodeSource {
    Scan(i32),
    Usage(i32),
}

/// Translation tables for one device.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyLayoutMap {
    keys_by_scan_code: IndexMap<i32, KeyMapping>,
    keys_by_usage_code: IndexMap<i32, KeyMapping>,
    axes: IndexMap<i32, AxisInfo>,
    leds_by_scan_code: IndexMap<i32, i32>,
    leds_by_usage_code: IndexMap<i32, i32>,
}

impl KeyLayoutMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_key(&mut self, source: CodeSource, mapping: KeyMapping) {
        match source {
            CodeSource::Scan(code) => self.keys_by_scan_code.insert(code, mapping),
            CodeSource::Usage(code) => self.keys_by_usage_code.insert(code, mapping),
        };
    }

    pub fn add_axis(&mut self, scan_code: i32, info: AxisInfo) {
        self.axes.insert(scan_code, info);
    }

    /// Map a framework LED id from a kernel LED code.
    pub fn add_led(&mut self, source: CodeSource, led: i32) {
        match source {
            CodeSource::Scan(code) => self.leds_by_scan_code.insert(code, led),
            CodeSource::Usage(code) => self.leds_by_usage_code.insert(code, led),
        };
    }

    /// Chainable form of [`add_key`](Self::add_key) for scan codes.
    pub fn with_key(mut self, scan_code: i32, key_code: i32, flags: u32) -> Self {
        self.add_key(CodeSource::Scan(scan_code), KeyMapping { key_code, flags });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.keys_by_scan_code.is_empty()
            && self.keys_by_usage_code.is_empty()
            && self.axes.is_empty()
            && self.leds_by_scan_code.is_empty()
            && self.leds_by_usage_code.is_empty()
    }

    /// Usage code wins over scan code when both are mapped.
    pub fn map_key(&self, scan_code: i32, usage_code: i32) -> Option<KeyMapping> {
        if usage_code != 0 {
            if let Some(mapping) = self.keys_by_usage_code.get(&usage_code) {
                return Some(*mapping);
            }
        }
        if scan_code != 0 {
            if let Some(mapping) = self.keys_by_scan_code.get(&scan_code) {
                return Some(*mapping);
            }
        }
        None
    }

    /// Every scan code that produces `key_code`, in table order.
    pub fn find_scan_codes_for_key(&self, key_code: i32) -> SmallVec<[i32; 4]> {
        self.keys_by_scan_code
            .iter()
            .filter(|(_, mapping)| mapping.key_code == key_code)
            .map(|(scan, _)| *scan)
            .collect()
    }

    pub fn map_axis(&self, scan_code: i32) -> Option<AxisInfo> {
        self.axes.get(&scan_code).copied()
    }

    pub fn find_scan_code_for_led(&self, led: i32) -> Option<i32> {
        self.leds_by_scan_code
            .iter()
            .find(|(_, l)| **l == led)
            .map(|(scan, _)| *scan)
    }

    pub fn find_usage_code_for_led(&self, led: i32) -> Option<i32> {
        self.leds_by_usage_code
            .iter()
            .find(|(_, l)| **l == led)
            .map(|(usage, _)| *usage)
    }

    pub fn key_count(&self) -> usize {
        self.keys_by_scan_code.len() + self.keys_by_usage_code.len()
    }
}
