// Evhub Device Nodes
// Capability interface over one opened input node, plus the identity it reports

#[cfg(feature = "evdev-backend")]
pub mod evdev;

use std::fmt;
use std::io;
use std::os::unix::io::RawFd;
use std::path::Path;
use std::time::Duration;

use strum_macros::{Display, EnumIter};

use crate::ioctl;
use crate::video::VideoNode;

/// Identity of an input device as reported by the kernel plus the derived
/// descriptor used to recognise the same device across reconnects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct InputDeviceIdentifier {
    pub name: String,
    pub location: String,
    pub unique_id: String,
    pub bus: u16,
    pub vendor: u16,
    pub product: u16,
    pub version: u16,
    pub descriptor: String,
    /// Disambiguates devices that share every other identity field.
    pub nonce: u16,
}

impl InputDeviceIdentifier {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// The string hashed into [`descriptor`](Self::descriptor).
    ///
    /// Vendor and product always contribute. A unique id is the strongest
    /// signal when present; otherwise the nonce separates identical devices.
    /// Devices without vendor/product fall back to name, then location.
    pub fn raw_descriptor(&self) -> String {
        let mut raw = format!("{:04x}:{:04x}:", self.vendor, self.product);
        if !self.unique_id.is_empty() {
            raw.push_str("uniqueId:");
            raw.push_str(&self.unique_id);
        }
        if self.nonce != 0 {
            raw.push_str(&format!("nonce:{:04x}", self.nonce));
        }
        if self.vendor == 0 && self.product == 0 {
            if !self.name.is_empty() {
                raw.push_str("name:");
                raw.push_str(&self.name);
            } else if !self.location.is_empty() {
                raw.push_str("location:");
                raw.push_str(&self.location);
            }
        }
        raw
    }

    /// Recompute and store the descriptor from the current fields.
    pub fn generate_descriptor(&mut self) -> &str {
        let raw = self.raw_descriptor();
        self.descriptor = format!("{:08x}", crc32fast::hash(raw.as_bytes()));
        &self.descriptor
    }
}

impl fmt::Display for InputDeviceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bus={:04x}, vendor={:04x}, product={:04x}, version={:04x}",
            self.bus, self.vendor, self.product, self.version
        )
    }
}

/// Range and resolution of one absolute axis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawAbsoluteAxisInfo {
    pub valid: bool,
    pub min_value: i32,
    pub max_value: i32,
    pub flat: i32,
    pub fuzz: i32,
    /// Units per millimetre (or per radian for rotational axes).
    pub resolution: i32,
}

impl RawAbsoluteAxisInfo {
    pub fn from_kernel(info: &libc::input_absinfo) -> Self {
        Self {
            // A zero-width range means the driver never configured the axis.
            valid: info.minimum != info.maximum,
            min_value: info.minimum,
            max_value: info.maximum,
            flat: info.flat,
            fuzz: info.fuzz,
            resolution: info.resolution,
        }
    }
}

impl fmt::Display for RawAbsoluteAxisInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.valid {
            return write!(f, "unknown range");
        }
        write!(
            f,
            "min={}, max={}, flat={}, fuzz={}, resolution={}",
            self.min_value, self.max_value, self.flat, self.fuzz, self.resolution
        )
    }
}

/// Axis range together with the axis value at the moment it was read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AbsoluteAxisSnapshot {
    pub info: RawAbsoluteAxisInfo,
    pub value: i32,
}

/// Which kernel bitmask a [`InputNode::read_bitmask`] call fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum BitmaskKind {
    /// Supported keys and buttons (`EVIOCGBIT(EV_KEY)`).
    Key,
    Abs,
    Rel,
    Switch,
    Led,
    Ff,
    Prop,
    /// Keys currently held (`EVIOCGKEY`).
    KeyState,
    SwitchState,
    LedState,
}

/// One opened input node.
///
/// The production implementation wraps an evdev character device; tests use
/// socket-backed fakes. Every method is a direct kernel round-trip and must
/// not block: the node is opened non-blocking and the hub only reads it after
/// epoll reports it ready.
pub trait InputNode: Send {
    /// Descriptor to register with epoll. Stays valid until the node drops.
    fn raw_fd(&self) -> RawFd;

    /// Kernel-reported identity. The descriptor fields are left empty.
    fn identifier(&self) -> InputDeviceIdentifier;

    /// Fill `buffer` with the requested bitmask, zeroing it first.
    fn read_bitmask(&self, kind: BitmaskKind, buffer: &mut [u32]) -> io::Result<()>;

    fn read_abs_info(&self, axis: u16) -> io::Result<AbsoluteAxisSnapshot>;

    /// Read whole records into `buffer`. `Ok(0)` means the node hit end of file.
    fn read_events(&mut self, buffer: &mut [libc::input_event]) -> io::Result<usize> {
        ioctl::read_input_events(self.raw_fd(), buffer)
    }

    /// Write one record back to the device (LED and force-feedback control).
    fn write_event(&mut self, event_type: u16, code: u16, value: i32) -> io::Result<()> {
        ioctl::write_input_event(self.raw_fd(), event_type, code, value)
    }

    /// Upload a rumble effect and return the id the kernel assigned.
    /// `effect_id` is -1 for a new effect or a previous id to overwrite it.
    fn upload_rumble(
        &mut self,
        effect_id: i16,
        strong_magnitude: u16,
        weak_magnitude: u16,
        duration: Duration,
    ) -> io::Result<i16>;

    fn erase_effect(&mut self, effect_id: i16) -> io::Result<()>;
}

/// Opens device nodes found by the scanner.
pub trait NodeOpener: Send + Sync {
    fn open_input(&self, path: &Path) -> io::Result<Box<dyn InputNode>>;

    fn open_video(&self, path: &Path) -> io::Result<Box<dyn VideoNode>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_raw_descriptor_prefers_unique_id() {
        let mut id = InputDeviceIdentifier::named("Pad");
        id.vendor = 0x045e;
        id.product = 0x028e;
        id.unique_id = "abc".into();
        assert_eq!(id.raw_descriptor(), "045e:028e:uniqueId:abc");
    }

    #[test]
    fn test_raw_descriptor_uses_name_without_vendor() {
        let mut id = InputDeviceIdentifier::named("gpio-keys");
        assert_eq!(id.raw_descriptor(), "0000:0000:name:gpio-keys");

        id.name.clear();
        id.location = "gpio/input0".into();
        assert_eq!(id.raw_descriptor(), "0000:0000:location:gpio/input0");
    }

    #[test]
    fn test_nonce_changes_descriptor() {
        let mut id = InputDeviceIdentifier::named("Twin");
        id.vendor = 1;
        id.product = 2;
        let first = id.generate_descriptor().to_string();
        id.nonce = 1;
        let second = id.generate_descriptor().to_string();
        assert_ne!(first, second);
        assert_eq!(second.len(), 8);
        assert!(id.raw_descriptor().ends_with("nonce:0001"));
    }

    #[test]
    fn test_axis_info_from_kernel() {
        let kernel = libc::input_absinfo {
            value: 5,
            minimum: 0,
            maximum: 1023,
            fuzz: 2,
            flat: 8,
            resolution: 10,
        };
        let info = RawAbsoluteAxisInfo::from_kernel(&kernel);
        assert!(info.valid);
        assert_eq!(info.max_value, 1023);
        assert_eq!(info.flat, 8);

        let flat = libc::input_absinfo { maximum: 0, ..kernel };
        assert!(!RawAbsoluteAxisInfo::from_kernel(&flat).valid);
    }

    #[test]
    fn test_bitmask_kinds_are_distinct() {
        let names: Vec<String> = BitmaskKind::iter().map(|k| k.to_string()).collect();
        assert_eq!(names.len(), 10);
        assert!(names.contains(&"KeyState".to_string()));
    }
}
