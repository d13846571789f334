// Evhub Device Record
// One input device: its node, identity, capabilities, live state and configuration

use std::fmt;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, warn};

use crate::bits::BitArray;
use crate::classes::{classify_capabilities, InputDeviceClass};
use crate::codes::*;
use crate::error::{HubError, HubResult};
use crate::keycodes::{
    default_led_scan_code, KeyState, DPAD_KEYCODES, GAMEPAD_KEYCODES, KEYCODE_Q, LED_CONTROLLER_1,
    MAX_CONTROLLER_LEDS,
};
use crate::keymap::{AxisInfo, DeviceConfig, KeyCharacterMap, KeyMap, PropertyMap, VirtualKeyDefinition};
use crate::node::{AbsoluteAxisSnapshot, BitmaskKind, InputDeviceIdentifier, InputNode, RawAbsoluteAxisInfo};
use crate::vibration::{VibrationElement, STRONG_MAGNITUDE_CHANNEL, WEAK_MAGNITUDE_CHANNEL};
use crate::video::TouchVideoDevice;

/// What a device can report, read once when it is opened.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceCapabilities {
    pub keys: KeyBits,
    pub abs: AbsBits,
    pub rel: RelBits,
    pub switches: SwBits,
    pub leds: LedBits,
    pub ff: FfBits,
    pub props: PropBits,
}

fn load_bits<const BITS: usize, const WORDS: usize>(
    node: &dyn InputNode,
    kind: BitmaskKind,
    bits: &mut BitArray<BITS, WORDS>,
    path: &Path,
) {
    let mut buffer = [0u32; WORDS];
    match node.read_bitmask(kind, &mut buffer) {
        Ok(()) => bits.load_from_buffer(&buffer),
        Err(e) => {
            // The device just reports no support for this domain.
            debug!("Could not read {} bitmask of {}: {}", kind, path.display(), e);
            bits.reset();
        }
    }
}

impl DeviceCapabilities {
    pub fn load(node: &dyn InputNode, path: &Path) -> Self {
        let mut caps = Self::default();
        load_bits(node, BitmaskKind::Key, &mut caps.keys, path);
        load_bits(node, BitmaskKind::Abs, &mut caps.abs, path);
        load_bits(node, BitmaskKind::Rel, &mut caps.rel, path);
        load_bits(node, BitmaskKind::Switch, &mut caps.switches, path);
        load_bits(node, BitmaskKind::Led, &mut caps.leds, path);
        load_bits(node, BitmaskKind::Ff, &mut caps.ff, path);
        load_bits(node, BitmaskKind::Prop, &mut caps.props, path);
        caps
    }
}

/// Live state, tracked from drained events and refreshed from the kernel.
#[derive(Debug, Clone)]
struct DeviceState {
    keys: KeyBits,
    switches: SwBits,
    leds: LedBits,
    abs: Vec<AbsoluteAxisSnapshot>,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            keys: KeyBits::new(),
            switches: SwBits::new(),
            leds: LedBits::new(),
            abs: vec![AbsoluteAxisSnapshot::default(); ABS_CNT],
        }
    }
}

/// Result of [`Device::map_key`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyMapResult {
    pub key_code: i32,
    pub meta_state: i32,
    pub flags: u32,
}

pub struct Device {
    id: i32,
    path: PathBuf,
    identifier: InputDeviceIdentifier,
    node: Option<Box<dyn InputNode>>,
    classes: InputDeviceClass,
    caps: DeviceCapabilities,
    state: DeviceState,
    config: DeviceConfig,
    overlay: Option<Arc<KeyCharacterMap>>,
    combined_key_map: Option<Arc<KeyCharacterMap>>,
    controller_number: i32,
    ff_effect_id: i16,
    ff_effect_playing: bool,
    enabled: bool,
    registered: bool,
    video: Option<TouchVideoDevice>,
}

impl Device {
    /// A device backed by an opened node. Capabilities are read immediately.
    pub fn open(id: i32, path: impl Into<PathBuf>, identifier: InputDeviceIdentifier, node: Box<dyn InputNode>) -> Self {
        let path = path.into();
        let caps = DeviceCapabilities::load(node.as_ref(), &path);
        let mut device = Self::build(id, path, identifier, Some(node));
        device.caps = caps;
        device.refresh_state();
        device
    }

    /// A device with no kernel node.
    pub fn new_virtual(id: i32, identifier: InputDeviceIdentifier, classes: InputDeviceClass) -> Self {
        let path = PathBuf::from(format!("<virtual>/{}", identifier.name));
        let mut device = Self::build(id, path, identifier, None);
        device.classes = classes | InputDeviceClass::VIRTUAL;
        device
    }

    fn build(id: i32, path: PathBuf, identifier: InputDeviceIdentifier, node: Option<Box<dyn InputNode>>) -> Self {
        Self {
            id,
            path,
            identifier,
            node,
            classes: InputDeviceClass::empty(),
            caps: DeviceCapabilities::default(),
            state: DeviceState::default(),
            config: DeviceConfig::default(),
            overlay: None,
            combined_key_map: None,
            controller_number: 0,
            ff_effect_id: -1,
            ff_effect_playing: false,
            enabled: true,
            registered: false,
            video: None,
        }
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn identifier(&self) -> &InputDeviceIdentifier {
        &self.identifier
    }

    pub fn identifier_mut(&mut self) -> &mut InputDeviceIdentifier {
        &mut self.identifier
    }

    pub fn classes(&self) -> InputDeviceClass {
        self.classes
    }

    pub fn set_classes(&mut self, classes: InputDeviceClass) {
        self.classes = classes;
    }

    pub fn capabilities(&self) -> &DeviceCapabilities {
        &self.caps
    }

    pub fn has_fd(&self) -> bool {
        self.node.is_some()
    }

    pub fn raw_fd(&self) -> Option<RawFd> {
        self.node.as_ref().map(|n| n.raw_fd())
    }

    pub fn node_mut(&mut self) -> Option<&mut (dyn InputNode + 'static)> {
        self.node.as_deref_mut()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Whether the node is currently registered for readiness.
    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub fn set_registered(&mut self, registered: bool) {
        self.registered = registered;
    }

    pub fn controller_number(&self) -> i32 {
        self.controller_number
    }

    // Configuration

    pub fn apply_config(&mut self, config: DeviceConfig) {
        self.config = config;
        self.rebuild_combined_key_map();
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn configuration(&self) -> Option<&PropertyMap> {
        self.config.configuration.as_ref()
    }

    pub fn key_map(&self) -> &KeyMap {
        &self.config.key_map
    }

    pub fn virtual_keys(&self) -> &[VirtualKeyDefinition] {
        self.config
            .virtual_key_map
            .as_ref()
            .map(|map| map.keys())
            .unwrap_or(&[])
    }

    /// Base character map merged with the overlay, if any.
    pub fn key_character_map(&self) -> Option<Arc<KeyCharacterMap>> {
        self.combined_key_map.clone()
    }

    pub fn has_overlay(&self) -> bool {
        self.overlay.is_some()
    }

    pub fn set_overlay(&mut self, overlay: Option<Arc<KeyCharacterMap>>) {
        self.overlay = overlay;
        self.rebuild_combined_key_map();
    }

    fn rebuild_combined_key_map(&mut self) {
        self.combined_key_map = match &self.config.key_map.key_character_map {
            Some(base) => Some(KeyCharacterMap::combine(base, self.overlay.as_ref())),
            None => self.overlay.clone(),
        };
    }

    /// True unless the configuration or bus says the device is built in.
    pub fn is_external(&self) -> bool {
        if let Some(internal) = self.configuration().and_then(|c| c.get_bool("device.internal")) {
            return !internal;
        }
        self.identifier.bus == BUS_USB || self.identifier.bus == BUS_BLUETOOTH
    }

    pub fn has_mic(&self) -> bool {
        self.configuration()
            .and_then(|c| c.get_bool("audio.mic"))
            .unwrap_or(false)
    }

    /// Whether any scan code mapped to `key_code` is a key this device has.
    pub fn has_keycode(&self, key_code: i32) -> bool {
        let Some(layout) = &self.config.key_map.key_layout_map else {
            return false;
        };
        layout
            .find_scan_codes_for_key(key_code)
            .iter()
            .any(|&scan| (0..=KEY_MAX as i32).contains(&scan) && self.caps.keys.test(scan as usize))
    }

    /// Compute the device classes from capabilities and loaded configuration.
    /// Returns an empty set when nothing here is usable; the caller drops such
    /// devices.
    pub fn classify(&mut self) -> InputDeviceClass {
        let device_type = self.configuration().and_then(|c| c.get_string("device.type"));
        let mut classes = classify_capabilities(&self.caps, device_type);

        // Virtual keys on a touch screen make it a keyboard too.
        if classes.contains(InputDeviceClass::TOUCH) && !self.virtual_keys().is_empty() {
            classes |= InputDeviceClass::KEYBOARD;
        }

        if classes.contains(InputDeviceClass::KEYBOARD) && self.key_map().have_key_layout() {
            if self.has_keycode(KEYCODE_Q) {
                classes |= InputDeviceClass::ALPHAKEY;
            }
            if DPAD_KEYCODES.iter().all(|&k| self.has_keycode(k)) {
                classes |= InputDeviceClass::DPAD;
            }
            if GAMEPAD_KEYCODES.iter().any(|&k| self.has_keycode(k)) {
                classes |= InputDeviceClass::GAMEPAD;
            }
        }

        if classes.is_empty() {
            self.classes = classes;
            return classes;
        }

        if self.has_mic() {
            classes |= InputDeviceClass::MIC;
        }
        if self.is_external() {
            classes |= InputDeviceClass::EXTERNAL;
        }
        if !self.has_fd() {
            classes |= InputDeviceClass::VIRTUAL;
        }
        self.classes = classes;
        classes
    }

    // State

    /// Re-read key, switch, LED and axis state from the kernel.
    pub fn refresh_state(&mut self) {
        let Some(node) = self.node.as_deref() else {
            return;
        };
        load_bits(node, BitmaskKind::KeyState, &mut self.state.keys, &self.path);
        load_bits(node, BitmaskKind::SwitchState, &mut self.state.switches, &self.path);
        load_bits(node, BitmaskKind::LedState, &mut self.state.leds, &self.path);
        for axis in self.caps.abs.iter_set() {
            match node.read_abs_info(axis as u16) {
                Ok(snapshot) => self.state.abs[axis] = snapshot,
                Err(e) => {
                    debug!("Could not read axis {:#x} of {}: {}", axis, self.path.display(), e);
                    self.state.abs[axis] = AbsoluteAxisSnapshot::default();
                }
            }
        }
    }

    /// Fold one drained record into the tracked state.
    pub fn process_input(&mut self, input: &libc::input_event) {
        let code = input.code as usize;
        let down = input.value != 0;
        match input.type_ {
            EV_KEY => self.state.keys.assign(code, down),
            EV_SW => self.state.switches.assign(code, down),
            EV_LED => self.state.leds.assign(code, down),
            EV_ABS => {
                if let Some(snapshot) = self.state.abs.get_mut(code) {
                    snapshot.value = input.value;
                }
            }
            EV_SYN if input.code == SYN_DROPPED => {
                debug!("Events dropped by {}, resynchronizing state", self.path.display());
                self.refresh_state();
            }
            _ => {}
        }
    }

    fn live(&self) -> bool {
        self.enabled && self.has_fd()
    }

    pub fn scan_code_state(&self, scan_code: i32) -> KeyState {
        if !self.live() || !(0..=KEY_MAX as i32).contains(&scan_code) {
            return KeyState::Unknown;
        }
        KeyState::from_down(self.state.keys.test(scan_code as usize))
    }

    pub fn key_code_state(&self, key_code: i32) -> KeyState {
        if !self.live() {
            return KeyState::Unknown;
        }
        let Some(layout) = &self.config.key_map.key_layout_map else {
            return KeyState::Unknown;
        };
        let scan_codes = layout.find_scan_codes_for_key(key_code);
        if scan_codes.is_empty() {
            return KeyState::Unknown;
        }
        let down = scan_codes
            .iter()
            .any(|&scan| (0..=KEY_MAX as i32).contains(&scan) && self.state.keys.test(scan as usize));
        KeyState::from_down(down)
    }

    pub fn switch_state(&self, switch: i32) -> KeyState {
        if !self.live() || !(0..=SW_MAX as i32).contains(&switch) {
            return KeyState::Unknown;
        }
        KeyState::from_down(self.state.switches.test(switch as usize))
    }

    pub fn absolute_axis_info(&self, axis: i32) -> Option<RawAbsoluteAxisInfo> {
        if !self.has_fd() || !(0..=ABS_MAX as i32).contains(&axis) || !self.caps.abs.test(axis as usize) {
            return None;
        }
        let info = self.state.abs[axis as usize].info;
        info.valid.then_some(info)
    }

    pub fn absolute_axis_value(&self, axis: i32) -> Option<i32> {
        if !self.live() || !(0..=ABS_MAX as i32).contains(&axis) || !self.caps.abs.test(axis as usize) {
            return None;
        }
        Some(self.state.abs[axis as usize].value)
    }

    /// For each key code, set the matching flag when the device has a key
    /// producing it. Returns false when there is no layout to consult.
    pub fn mark_supported_key_codes(&self, key_codes: &[i32], out_flags: &mut [bool]) -> bool {
        let Some(layout) = &self.config.key_map.key_layout_map else {
            return false;
        };
        for (key_code, flag) in key_codes.iter().zip(out_flags.iter_mut()) {
            let supported = layout
                .find_scan_codes_for_key(*key_code)
                .iter()
                .any(|&scan| (0..=KEY_MAX as i32).contains(&scan) && self.caps.keys.test(scan as usize));
            if supported {
                *flag = true;
            }
        }
        true
    }

    // Mapping

    /// Character map first, then the layout. `None` when neither maps it.
    pub fn map_key(&self, scan_code: i32, usage_code: i32, meta_state: i32) -> Option<KeyMapResult> {
        if let Some(kcm) = &self.combined_key_map {
            if let Some(key_code) = kcm.map_key(scan_code, usage_code) {
                return Some(KeyMapResult {
                    key_code,
                    meta_state,
                    flags: 0,
                });
            }
        }
        let layout = self.config.key_map.key_layout_map.as_ref()?;
        layout.map_key(scan_code, usage_code).map(|mapping| KeyMapResult {
            key_code: mapping.key_code,
            meta_state,
            flags: mapping.flags,
        })
    }

    pub fn map_axis(&self, scan_code: i32) -> Option<AxisInfo> {
        self.config.key_map.key_layout_map.as_ref()?.map_axis(scan_code)
    }

    // LEDs

    /// Kernel LED code for a framework LED id.
    fn map_led(&self, led: i32) -> Option<i32> {
        let from_layout = self
            .config
            .key_map
            .key_layout_map
            .as_ref()
            .and_then(|layout| layout.find_scan_code_for_led(led));
        from_layout.or_else(|| default_led_scan_code(led))
    }

    pub fn has_led(&self, led: i32) -> bool {
        if !self.has_fd() {
            return false;
        }
        self.map_led(led)
            .map(|scan| (0..=LED_MAX as i32).contains(&scan) && self.caps.leds.test(scan as usize))
            .unwrap_or(false)
    }

    /// Write an LED through the node. On failure the cached state is left alone.
    pub fn set_led_state(&mut self, led: i32, on: bool) -> HubResult<()> {
        let scan = match self.map_led(led) {
            Some(scan) if self.has_led(led) => scan,
            _ => {
                return Err(HubError::Unsupported {
                    device_id: self.id,
                    what: "this LED",
                })
            }
        };
        let Some(node) = self.node.as_deref_mut() else {
            return Err(HubError::Unsupported {
                device_id: self.id,
                what: "LED writes",
            });
        };
        node.write_event(EV_LED, scan as u16, on as i32)?;
        self.state.leds.assign(scan as usize, on);
        Ok(())
    }

    pub fn led_state(&self, scan_code: i32) -> bool {
        (0..=LED_MAX as i32).contains(&scan_code) && self.state.leds.test(scan_code as usize)
    }

    /// Assign a controller number and light the matching indicator LED.
    pub fn set_controller_number(&mut self, number: i32) {
        self.controller_number = number;
        for index in 0..MAX_CONTROLLER_LEDS {
            let led = LED_CONTROLLER_1 + index;
            if !self.has_led(led) {
                continue;
            }
            if let Err(e) = self.set_led_state(led, number == index + 1) {
                warn!("Could not set controller LED on {}: {}", self.path.display(), e);
            }
        }
    }

    // Vibration

    /// Upload a rumble effect, reusing the previous slot, and start it.
    pub fn vibrate(&mut self, element: &VibrationElement) -> HubResult<()> {
        let unsupported = HubError::Unsupported {
            device_id: self.id,
            what: "rumble",
        };
        if !self.caps.ff.test(FF_RUMBLE as usize) {
            return Err(unsupported);
        }
        let effect_id = self.ff_effect_id;
        let Some(node) = self.node.as_deref_mut() else {
            return Err(unsupported);
        };
        let effect_id = node.upload_rumble(
            effect_id,
            element.magnitude(STRONG_MAGNITUDE_CHANNEL),
            element.magnitude(WEAK_MAGNITUDE_CHANNEL),
            element.duration,
        )?;
        self.ff_effect_id = effect_id;
        node.write_event(EV_FF, effect_id as u16, 1)?;
        self.ff_effect_playing = true;
        Ok(())
    }

    pub fn cancel_vibrate(&mut self) {
        if !self.ff_effect_playing {
            return;
        }
        let effect_id = self.ff_effect_id;
        let Some(node) = self.node.as_deref_mut() else {
            return;
        };
        self.ff_effect_playing = false;
        if let Err(e) = node.write_event(EV_FF, effect_id as u16, 0) {
            warn!("Could not stop force feedback effect on {}: {}", self.path.display(), e);
        }
    }

    pub fn is_vibrating(&self) -> bool {
        self.ff_effect_playing
    }

    pub fn ff_effect_id(&self) -> i16 {
        self.ff_effect_id
    }

    // Video

    pub fn attach_video(&mut self, video: TouchVideoDevice) {
        self.video = Some(video);
    }

    pub fn video(&self) -> Option<&TouchVideoDevice> {
        self.video.as_ref()
    }

    pub fn video_mut(&mut self) -> Option<&mut TouchVideoDevice> {
        self.video.as_mut()
    }

    pub fn take_video(&mut self) -> Option<TouchVideoDevice> {
        self.video.take()
    }

    /// Stop effects and give back the effect slot before the node is dropped.
    pub fn release(&mut self) {
        self.cancel_vibrate();
        if self.ff_effect_id != -1 {
            let effect_id = self.ff_effect_id;
            if let Some(node) = self.node.as_deref_mut() {
                if let Err(e) = node.erase_effect(effect_id) {
                    debug!("Could not erase effect {} on {}: {}", effect_id, self.path.display(), e);
                }
            }
            self.ff_effect_id = -1;
        }
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("name", &self.identifier.name)
            .field("classes", &self.classes)
            .field("enabled", &self.enabled)
            .field("controller_number", &self.controller_number)
            .finish()
    }
}
