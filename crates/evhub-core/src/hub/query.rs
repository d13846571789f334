// Evhub Query Facade
// Per-device capability, state and control operations answered under the hub lock

use std::sync::Arc;

use log::{debug, warn};

use super::EventHub;
use crate::classes::InputDeviceClass;
use crate::codes::{INPUT_PROP_MAX, KEY_MAX, REL_MAX};
use crate::device::{Device, KeyMapResult};
use crate::error::{HubError, HubResult};
use crate::event::RawEvent;
use crate::interface::EventHubInterface;
use crate::keycodes::KeyState;
use crate::keymap::{AxisInfo, KeyCharacterMap, PropertyMap, VirtualKeyDefinition};
use crate::node::{InputDeviceIdentifier, RawAbsoluteAxisInfo};
use crate::vibration::VibrationElement;
use crate::video::TouchVideoFrame;

impl EventHub {
    /// Run `f` against a device under the lock, or return `default` when the
    /// id is unknown.
    fn with_device<R>(&self, device_id: i32, default: R, f: impl FnOnce(&Device) -> R) -> R {
        let state = self.state.lock();
        match state.device(device_id) {
            Some(device) => f(device),
            None => default,
        }
    }

    fn with_device_mut<R>(&self, device_id: i32, default: R, f: impl FnOnce(&mut Device) -> R) -> R {
        let mut state = self.state.lock();
        match state.device_mut(device_id) {
            Some(device) => f(device),
            None => default,
        }
    }
}

// Best effort: missing hardware logs at debug, failed writes at warn.
fn log_control_failure(action: &str, error: HubError) {
    match error {
        HubError::Unsupported { .. } => debug!("Could not {}: {}", action, error),
        _ => warn!("Could not {}: {}", action, error),
    }
}

fn in_range(code: i32, max: u16) -> bool {
    (0..=max as i32).contains(&code)
}

impl EventHubInterface for EventHub {
    fn get_device_classes(&self, device_id: i32) -> InputDeviceClass {
        self.with_device(device_id, InputDeviceClass::empty(), |d| d.classes())
    }

    fn get_device_identifier(&self, device_id: i32) -> Option<InputDeviceIdentifier> {
        self.with_device(device_id, None, |d| Some(d.identifier().clone()))
    }

    fn get_device_controller_number(&self, device_id: i32) -> i32 {
        self.with_device(device_id, 0, |d| d.controller_number())
    }

    fn get_configuration(&self, device_id: i32) -> Option<PropertyMap> {
        self.with_device(device_id, None, |d| d.configuration().cloned())
    }

    fn get_absolute_axis_info(&self, device_id: i32, axis: i32) -> Option<RawAbsoluteAxisInfo> {
        self.with_device(device_id, None, |d| d.absolute_axis_info(axis))
    }

    fn has_relative_axis(&self, device_id: i32, axis: i32) -> bool {
        self.with_device(device_id, false, |d| {
            in_range(axis, REL_MAX) && d.capabilities().rel.test(axis as usize)
        })
    }

    fn has_input_property(&self, device_id: i32, property: i32) -> bool {
        self.with_device(device_id, false, |d| {
            in_range(property, INPUT_PROP_MAX) && d.capabilities().props.test(property as usize)
        })
    }

    fn map_key(&self, device_id: i32, scan_code: i32, usage_code: i32, meta_state: i32) -> HubResult<KeyMapResult> {
        let state = self.state.lock();
        let device = state
            .device(device_id)
            .ok_or(HubError::UnknownDevice(device_id))?;
        device
            .map_key(scan_code, usage_code, meta_state)
            .ok_or(HubError::NotMapped {
                device_id,
                code: scan_code,
            })
    }

    fn map_axis(&self, device_id: i32, scan_code: i32) -> HubResult<AxisInfo> {
        let state = self.state.lock();
        let device = state
            .device(device_id)
            .ok_or(HubError::UnknownDevice(device_id))?;
        device.map_axis(scan_code).ok_or(HubError::NotMapped {
            device_id,
            code: scan_code,
        })
    }

    fn set_excluded_devices(&self, devices: &[String]) {
        self.state.lock().set_excluded(devices.to_vec());
    }

    fn get_events(&self, timeout_millis: i32, buffer: &mut [RawEvent]) -> usize {
        EventHub::get_events(self, timeout_millis, buffer)
    }

    fn get_video_frames(&self, device_id: i32) -> Vec<TouchVideoFrame> {
        self.with_device_mut(device_id, Vec::new(), |d| {
            d.video_mut().map(|v| v.consume_frames()).unwrap_or_default()
        })
    }

    fn get_scan_code_state(&self, device_id: i32, scan_code: i32) -> KeyState {
        self.with_device(device_id, KeyState::Unknown, |d| d.scan_code_state(scan_code))
    }

    fn get_key_code_state(&self, device_id: i32, key_code: i32) -> KeyState {
        self.with_device(device_id, KeyState::Unknown, |d| d.key_code_state(key_code))
    }

    fn get_switch_state(&self, device_id: i32, switch: i32) -> KeyState {
        self.with_device(device_id, KeyState::Unknown, |d| d.switch_state(switch))
    }

    fn get_absolute_axis_value(&self, device_id: i32, axis: i32) -> Option<i32> {
        self.with_device(device_id, None, |d| d.absolute_axis_value(axis))
    }

    fn mark_supported_key_codes(&self, device_id: i32, key_codes: &[i32], out_flags: &mut [bool]) -> bool {
        self.with_device(device_id, false, |d| d.mark_supported_key_codes(key_codes, out_flags))
    }

    fn has_scan_code(&self, device_id: i32, scan_code: i32) -> bool {
        self.with_device(device_id, false, |d| {
            in_range(scan_code, KEY_MAX) && d.capabilities().keys.test(scan_code as usize)
        })
    }

    fn has_led(&self, device_id: i32, led: i32) -> bool {
        self.with_device(device_id, false, |d| d.has_led(led))
    }

    fn set_led_state(&self, device_id: i32, led: i32, on: bool) {
        self.with_device_mut(device_id, (), |d| {
            if let Err(e) = d.set_led_state(led, on) {
                log_control_failure("set LED", e);
            }
        })
    }

    fn get_virtual_key_definitions(&self, device_id: i32) -> Vec<VirtualKeyDefinition> {
        self.with_device(device_id, Vec::new(), |d| d.virtual_keys().to_vec())
    }

    fn get_key_character_map(&self, device_id: i32) -> Option<Arc<KeyCharacterMap>> {
        self.with_device(device_id, None, |d| d.key_character_map())
    }

    fn set_keyboard_layout_overlay(&self, device_id: i32, map: Option<Arc<KeyCharacterMap>>) -> bool {
        self.with_device_mut(device_id, false, |d| {
            d.set_overlay(map);
            true
        })
    }

    fn vibrate(&self, device_id: i32, element: &VibrationElement) {
        self.with_device_mut(device_id, (), |d| {
            debug!("Vibrating device {} with {}", d.id(), element);
            if let Err(e) = d.vibrate(element) {
                log_control_failure("vibrate", e);
            }
        })
    }

    fn cancel_vibrate(&self, device_id: i32) {
        self.with_device_mut(device_id, (), |d| d.cancel_vibrate())
    }

    fn request_reopen_devices(&self) {
        EventHub::request_reopen_devices(self)
    }

    fn wake(&self) {
        EventHub::wake(self)
    }

    fn dump(&self) -> String {
        EventHub::dump(self)
    }

    fn monitor(&self) {
        EventHub::monitor(self)
    }

    fn is_device_enabled(&self, device_id: i32) -> bool {
        self.with_device(device_id, false, |d| d.is_enabled())
    }

    fn enable_device(&self, device_id: i32) -> HubResult<()> {
        self.state.lock().enable_device(device_id, &self.env)
    }

    fn disable_device(&self, device_id: i32) -> HubResult<()> {
        self.state.lock().disable_device(device_id, &self.env)
    }

    fn add_virtual_device(&self, identifier: InputDeviceIdentifier, classes: InputDeviceClass) -> i32 {
        EventHub::add_virtual_device(self, identifier, classes)
    }
}
