// Evhub Hub Interface
// Every query and control operation the input reader uses, as one trait

use std::sync::Arc;

use crate::classes::InputDeviceClass;
use crate::device::KeyMapResult;
use crate::error::HubResult;
use crate::event::RawEvent;
use crate::keycodes::KeyState;
use crate::keymap::{AxisInfo, KeyCharacterMap, PropertyMap, VirtualKeyDefinition};
use crate::node::{InputDeviceIdentifier, RawAbsoluteAxisInfo};
use crate::vibration::VibrationElement;
use crate::video::TouchVideoFrame;

/// The event hub as seen by its consumer.
///
/// [`EventHub`](crate::EventHub) is the production implementation and
/// [`FakeEventHub`](crate::testing::FakeEventHub) an in-memory one for tests.
///
/// Unknown device ids never fail loudly: queries return an empty class set,
/// `None`, `false` or [`KeyState::Unknown`]. Only the mapping and
/// enable/disable operations report an error, so callers can tell an unknown
/// device from a missing mapping. Device id 0 always names the built-in
/// keyboard.
pub trait EventHubInterface: Send + Sync {
    fn get_device_classes(&self, device_id: i32) -> InputDeviceClass;

    fn get_device_identifier(&self, device_id: i32) -> Option<InputDeviceIdentifier>;

    /// 0 when the device has no controller number.
    fn get_device_controller_number(&self, device_id: i32) -> i32;

    fn get_configuration(&self, device_id: i32) -> Option<PropertyMap>;

    fn get_absolute_axis_info(&self, device_id: i32, axis: i32) -> Option<RawAbsoluteAxisInfo>;

    fn has_relative_axis(&self, device_id: i32, axis: i32) -> bool;

    fn has_input_property(&self, device_id: i32, property: i32) -> bool;

    fn map_key(&self, device_id: i32, scan_code: i32, usage_code: i32, meta_state: i32) -> HubResult<KeyMapResult>;

    fn map_axis(&self, device_id: i32, scan_code: i32) -> HubResult<AxisInfo>;

    /// Names or node paths of devices to ignore from now on.
    fn set_excluded_devices(&self, devices: &[String]);

    /// See [`EventHub::get_events`](crate::EventHub::get_events).
    fn get_events(&self, timeout_millis: i32, buffer: &mut [RawEvent]) -> usize;

    fn get_video_frames(&self, device_id: i32) -> Vec<TouchVideoFrame>;

    fn get_scan_code_state(&self, device_id: i32, scan_code: i32) -> KeyState;

    fn get_key_code_state(&self, device_id: i32, key_code: i32) -> KeyState;

    fn get_switch_state(&self, device_id: i32, switch: i32) -> KeyState;

    fn get_absolute_axis_value(&self, device_id: i32, axis: i32) -> Option<i32>;

    /// Set `out_flags[i]` when the device can produce `key_codes[i]`. Flags
    /// already set are left alone.
    fn mark_supported_key_codes(&self, device_id: i32, key_codes: &[i32], out_flags: &mut [bool]) -> bool;

    fn has_scan_code(&self, device_id: i32, scan_code: i32) -> bool;

    fn has_led(&self, device_id: i32, led: i32) -> bool;

    fn set_led_state(&self, device_id: i32, led: i32, on: bool);

    fn get_virtual_key_definitions(&self, device_id: i32) -> Vec<VirtualKeyDefinition>;

    fn get_key_character_map(&self, device_id: i32) -> Option<Arc<KeyCharacterMap>>;

    /// Install (or with `None`, remove) a character map layered over the
    /// device's own. Returns false for an unknown device.
    fn set_keyboard_layout_overlay(&self, device_id: i32, map: Option<Arc<KeyCharacterMap>>) -> bool;

    fn vibrate(&self, device_id: i32, element: &VibrationElement);

    fn cancel_vibrate(&self, device_id: i32);

    fn request_reopen_devices(&self);

    fn wake(&self);

    fn dump(&self) -> String;

    fn monitor(&self);

    fn is_device_enabled(&self, device_id: i32) -> bool;

    fn enable_device(&self, device_id: i32) -> HubResult<()>;

    fn disable_device(&self, device_id: i32) -> HubResult<()>;

    /// Add a device with no kernel node and return its id.
    fn add_virtual_device(&self, identifier: InputDeviceIdentifier, classes: InputDeviceClass) -> i32;
}
