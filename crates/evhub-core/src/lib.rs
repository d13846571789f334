// Evhub Core Library
// Input device discovery, event multiplexing and per-device queries over evdev

pub mod bits;
pub mod classes;
pub mod codes;
pub mod controller;
pub mod device;
pub mod error;
pub mod event;
pub mod hub;
pub mod interface;
pub mod ioctl;
pub mod keycodes;
pub mod keymap;
pub mod node;
pub mod poll;
pub mod scanner;
pub mod settings;
pub mod testing;
pub mod vibration;
pub mod video;
pub mod watcher;

pub use bits::BitArray;
pub use codes::{AbsBits, FfBits, KeyBits, LedBits, PropBits, RelBits, SwBits};
pub use classes::InputDeviceClass;
pub use controller::ControllerNumbers;
pub use device::{Device, KeyMapResult};
pub use error::{HubError, HubResult};
pub use event::{RawEvent, DEVICE_ADDED, DEVICE_REMOVED, FINISHED_DEVICE_SCAN, FIRST_SYNTHETIC_EVENT};
pub use hub::{EventHub, BUILT_IN_KEYBOARD_ID, VIRTUAL_KEYBOARD_ID};
pub use interface::EventHubInterface;
pub use keycodes::KeyState;
pub use keymap::{ConfigLoader, DeviceConfig, KeyCharacterMap, KeyLayoutMap, PropertyMap, TomlConfigLoader};
pub use node::{InputDeviceIdentifier, InputNode, NodeOpener, RawAbsoluteAxisInfo};
pub use settings::{HubSettings, SettingsError};
pub use vibration::VibrationElement;
pub use video::{TouchVideoDevice, TouchVideoFrame};
