// Evhub Device Classes
// Classification flags derived from capability bitsets and identity heuristics

use std::fmt;

use bitflags::bitflags;

use crate::codes::*;
use crate::device::DeviceCapabilities;

bitflags! {
    /// What kind of input a device provides. A device may have several.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct InputDeviceClass: u32 {
        const KEYBOARD = 0x0000_0001;
        /// Keyboard with a full alphabet (it maps `KEYCODE_Q`).
        const ALPHAKEY = 0x0000_0002;
        const TOUCH = 0x0000_0004;
        const CURSOR = 0x0000_0008;
        const TOUCH_MT = 0x0000_0010;
        const DPAD = 0x0000_0020;
        const GAMEPAD = 0x0000_0040;
        const SWITCH = 0x0000_0080;
        const JOYSTICK = 0x0000_0100;
        const VIBRATOR = 0x0000_0200;
        const MIC = 0x0000_0400;
        const EXTERNAL_STYLUS = 0x0000_0800;
        const ROTARY_ENCODER = 0x0000_1000;
        /// Synthetic device with no kernel node.
        const VIRTUAL = 0x4000_0000;
        const EXTERNAL = 0x8000_0000;
    }
}

impl fmt::Display for InputDeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "0x00000000");
        }
        let names: Vec<&str> = self.iter_names().map(|(name, _)| name).collect();
        write!(f, "0x{:08x} ({})", self.bits(), names.join(" | "))
    }
}

/// Keys below the button range or above the button/digitizer block.
pub fn has_keyboard_keys(caps: &DeviceCapabilities) -> bool {
    caps.keys.any(0, BTN_MISC as usize) || caps.keys.any(KEY_OK as usize, KEY_CNT)
}

/// Generic, joystick and gamepad button blocks.
pub fn has_gamepad_buttons(caps: &DeviceCapabilities) -> bool {
    caps.keys.any(BTN_MISC as usize, BTN_MOUSE as usize)
        || caps.keys.any(BTN_JOYSTICK as usize, BTN_DIGI as usize)
}

/// Which class consumes a given absolute axis. Touch devices claim the
/// touch-related axes first, an external stylus claims pressure, and a
/// joystick takes everything left. Returns an empty set when nothing does.
pub fn get_abs_axis_usage(axis: u16, classes: InputDeviceClass) -> InputDeviceClass {
    if classes.contains(InputDeviceClass::TOUCH) {
        match axis {
            ABS_X | ABS_Y | ABS_PRESSURE | ABS_TOOL_WIDTH | ABS_DISTANCE | ABS_TILT_X
            | ABS_TILT_Y | ABS_MT_SLOT..=ABS_MT_DISTANCE => return InputDeviceClass::TOUCH,
            _ => {}
        }
    }

    if classes.contains(InputDeviceClass::EXTERNAL_STYLUS) && axis == ABS_PRESSURE {
        return InputDeviceClass::EXTERNAL_STYLUS;
    }

    classes & InputDeviceClass::JOYSTICK
}

/// Classes that follow from the capability bitsets alone.
///
/// `device_type` is the `device.type` configuration property, if any. Classes
/// that need the loaded key map (ALPHAKEY, DPAD, GAMEPAD) or the rest of the
/// configuration (EXTERNAL, MIC) are added by the device record afterwards.
pub fn classify_capabilities(caps: &DeviceCapabilities, device_type: Option<&str>) -> InputDeviceClass {
    let mut classes = InputDeviceClass::empty();

    let keyboard_keys = has_keyboard_keys(caps);
    let gamepad_buttons = has_gamepad_buttons(caps);
    if keyboard_keys || gamepad_buttons {
        classes |= InputDeviceClass::KEYBOARD;
    }

    if caps.keys.test(BTN_MOUSE as usize)
        && caps.rel.test(REL_X as usize)
        && caps.rel.test(REL_Y as usize)
    {
        classes |= InputDeviceClass::CURSOR;
    }

    if device_type == Some("rotaryEncoder") && caps.rel.test(REL_WHEEL as usize) {
        classes |= InputDeviceClass::ROTARY_ENCODER;
    }

    if caps.abs.test(ABS_MT_POSITION_X as usize) && caps.abs.test(ABS_MT_POSITION_Y as usize) {
        // Some controllers report axes inside the multi-touch range; only
        // trust them as touch when there is a touch button or no gamepad.
        if caps.keys.test(BTN_TOUCH as usize) || !gamepad_buttons {
            classes |= InputDeviceClass::TOUCH | InputDeviceClass::TOUCH_MT;
        }
    } else if caps.keys.test(BTN_TOUCH as usize)
        && caps.abs.test(ABS_X as usize)
        && caps.abs.test(ABS_Y as usize)
    {
        classes |= InputDeviceClass::TOUCH;
    } else if (caps.abs.test(ABS_PRESSURE as usize) || caps.keys.test(BTN_TOUCH as usize))
        && !caps.abs.test(ABS_X as usize)
        && !caps.abs.test(ABS_Y as usize)
    {
        classes |= InputDeviceClass::EXTERNAL_STYLUS;
    }

    // Joysticks always have gamepad buttons; that separates them from
    // accelerometers and other devices that only report absolute axes.
    if gamepad_buttons {
        let assumed = classes | InputDeviceClass::JOYSTICK;
        let claims_axis = caps.abs.iter_set().any(|axis| {
            get_abs_axis_usage(axis as u16, assumed).contains(InputDeviceClass::JOYSTICK)
        });
        if claims_axis {
            classes = assumed;
        }
    }

    if caps.switches.any(0, SW_CNT) {
        classes |= InputDeviceClass::SWITCH;
    }

    if caps.ff.test(FF_RUMBLE as usize) {
        classes |= InputDeviceClass::VIBRATOR;
    }

    classes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps() -> DeviceCapabilities {
        DeviceCapabilities::default()
    }

    #[test]
    fn test_keyboard_from_letter_keys() {
        let mut c = caps();
        c.keys.set(KEY_A as usize);
        assert_eq!(classify_capabilities(&c, None), InputDeviceClass::KEYBOARD);
    }

    #[test]
    fn test_mouse_is_cursor_not_keyboard() {
        let mut c = caps();
        c.keys.set(BTN_LEFT as usize);
        c.rel.set(REL_X as usize);
        c.rel.set(REL_Y as usize);
        assert_eq!(classify_capabilities(&c, None), InputDeviceClass::CURSOR);
    }

    #[test]
    fn test_multitouch_screen() {
        let mut c = caps();
        c.abs.set(ABS_MT_POSITION_X as usize);
        c.abs.set(ABS_MT_POSITION_Y as usize);
        let classes = classify_capabilities(&c, None);
        assert!(classes.contains(InputDeviceClass::TOUCH | InputDeviceClass::TOUCH_MT));
    }

    #[test]
    fn test_gamepad_with_mt_axes_is_joystick_not_touch() {
        let mut c = caps();
        c.keys.set(BTN_A as usize);
        c.abs.set(ABS_X as usize);
        c.abs.set(ABS_MT_POSITION_X as usize);
        c.abs.set(ABS_MT_POSITION_Y as usize);
        let classes = classify_capabilities(&c, None);
        assert!(!classes.contains(InputDeviceClass::TOUCH));
        assert!(classes.contains(InputDeviceClass::JOYSTICK | InputDeviceClass::KEYBOARD));
    }

    #[test]
    fn test_single_touch_and_stylus() {
        let mut touch = caps();
        touch.keys.set(BTN_TOUCH as usize);
        touch.abs.set(ABS_X as usize);
        touch.abs.set(ABS_Y as usize);
        assert!(classify_capabilities(&touch, None).contains(InputDeviceClass::TOUCH));

        let mut stylus = caps();
        stylus.abs.set(ABS_PRESSURE as usize);
        assert_eq!(
            classify_capabilities(&stylus, None),
            InputDeviceClass::EXTERNAL_STYLUS
        );
    }

    #[test]
    fn test_switch_vibrator_and_rotary() {
        let mut c = caps();
        c.switches.set(SW_LID as usize);
        c.ff.set(FF_RUMBLE as usize);
        c.rel.set(REL_WHEEL as usize);
        let classes = classify_capabilities(&c, Some("rotaryEncoder"));
        assert!(classes.contains(InputDeviceClass::SWITCH));
        assert!(classes.contains(InputDeviceClass::VIBRATOR));
        assert!(classes.contains(InputDeviceClass::ROTARY_ENCODER));
        assert!(!classify_capabilities(&c, None).contains(InputDeviceClass::ROTARY_ENCODER));
    }

    #[test]
    fn test_abs_axis_usage() {
        let touch = InputDeviceClass::TOUCH | InputDeviceClass::JOYSTICK;
        assert_eq!(get_abs_axis_usage(ABS_X, touch), InputDeviceClass::TOUCH);
        assert_eq!(get_abs_axis_usage(ABS_RZ, touch), InputDeviceClass::JOYSTICK);
        assert_eq!(
            get_abs_axis_usage(ABS_PRESSURE, InputDeviceClass::EXTERNAL_STYLUS),
            InputDeviceClass::EXTERNAL_STYLUS
        );
        assert!(get_abs_axis_usage(ABS_X, InputDeviceClass::KEYBOARD).is_empty());
    }

    #[test]
    fn test_display_lists_names() {
        let classes = InputDeviceClass::KEYBOARD | InputDeviceClass::ALPHAKEY;
        assert_eq!(classes.to_string(), "0x00000003 (KEYBOARD | ALPHAKEY)");
    }
}
