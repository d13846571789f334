// Evhub Framework Codes
// Framework key codes, LED identifiers and key states seen by the input reader

use std::fmt;

pub const KEYCODE_UNKNOWN: i32 = 0;
pub const KEYCODE_HOME: i32 = 3;
pub const KEYCODE_BACK: i32 = 4;
pub const KEYCODE_DPAD_UP: i32 = 19;
pub const KEYCODE_DPAD_DOWN: i32 = 20;
pub const KEYCODE_DPAD_LEFT: i32 = 21;
pub const KEYCODE_DPAD_RIGHT: i32 = 22;
pub const KEYCODE_DPAD_CENTER: i32 = 23;
pub const KEYCODE_POWER: i32 = 26;
pub const KEYCODE_A: i32 = 29;
pub const KEYCODE_Q: i32 = 45;
pub const KEYCODE_W: i32 = 51;
pub const KEYCODE_Z: i32 = 54;
pub const KEYCODE_SPACE: i32 = 62;
pub const KEYCODE_ENTER: i32 = 66;
pub const KEYCODE_BUTTON_A: i32 = 96;
pub const KEYCODE_BUTTON_B: i32 = 97;
pub const KEYCODE_BUTTON_C: i32 = 98;
pub const KEYCODE_BUTTON_X: i32 = 99;
pub const KEYCODE_BUTTON_Y: i32 = 100;
pub const KEYCODE_BUTTON_Z: i32 = 101;
pub const KEYCODE_BUTTON_L1: i32 = 102;
pub const KEYCODE_BUTTON_R1: i32 = 103;
pub const KEYCODE_BUTTON_L2: i32 = 104;
pub const KEYCODE_BUTTON_R2: i32 = 105;
pub const KEYCODE_BUTTON_THUMBL: i32 = 106;
pub const KEYCODE_BUTTON_THUMBR: i32 = 107;
pub const KEYCODE_BUTTON_START: i32 = 108;
pub const KEYCODE_BUTTON_SELECT: i32 = 109;
pub const KEYCODE_BUTTON_MODE: i32 = 110;
pub const KEYCODE_ESCAPE: i32 = 111;
pub const KEYCODE_CAPS_LOCK: i32 = 115;
pub const KEYCODE_NUM_LOCK: i32 = 143;

/// Key codes whose presence marks a keyboard as a gamepad.
pub const GAMEPAD_KEYCODES: &[i32] = &[
    KEYCODE_BUTTON_A,
    KEYCODE_BUTTON_B,
    KEYCODE_BUTTON_C,
    KEYCODE_BUTTON_X,
    KEYCODE_BUTTON_Y,
    KEYCODE_BUTTON_Z,
    KEYCODE_BUTTON_L1,
    KEYCODE_BUTTON_R1,
    KEYCODE_BUTTON_L2,
    KEYCODE_BUTTON_R2,
    KEYCODE_BUTTON_THUMBL,
    KEYCODE_BUTTON_THUMBR,
    KEYCODE_BUTTON_START,
    KEYCODE_BUTTON_SELECT,
    KEYCODE_BUTTON_MODE,
];

/// Key codes that must all be present for a keyboard to count as a DPAD.
pub const DPAD_KEYCODES: &[i32] = &[
    KEYCODE_DPAD_UP,
    KEYCODE_DPAD_DOWN,
    KEYCODE_DPAD_LEFT,
    KEYCODE_DPAD_RIGHT,
    KEYCODE_DPAD_CENTER,
];

// Framework LED identifiers
pub const LED_NUM_LOCK: i32 = 0x00;
pub const LED_CAPS_LOCK: i32 = 0x01;
pub const LED_SCROLL_LOCK: i32 = 0x02;
pub const LED_COMPOSE: i32 = 0x03;
pub const LED_KANA: i32 = 0x04;
pub const LED_SLEEP: i32 = 0x05;
pub const LED_SUSPEND: i32 = 0x06;
pub const LED_MUTE: i32 = 0x07;
pub const LED_MISC: i32 = 0x08;
pub const LED_MAIL: i32 = 0x09;
pub const LED_CHARGING: i32 = 0x0a;
pub const LED_CONTROLLER_1: i32 = 0x10;
pub const LED_CONTROLLER_2: i32 = 0x11;
pub const LED_CONTROLLER_3: i32 = 0x12;
pub const LED_CONTROLLER_4: i32 = 0x13;

/// Number of controller indicator LEDs driven from the controller number.
pub const MAX_CONTROLLER_LEDS: i32 = 4;

/// Standard HID LED table used when a device's layout has no LED entries.
pub fn default_led_scan_code(led: i32) -> Option<i32> {
    match led {
        LED_NUM_LOCK..=LED_CHARGING => Some(led),
        _ => None,
    }
}

// Key layout policy flags
pub const POLICY_FLAG_WAKE: u32 = 0x0000_0001;
pub const POLICY_FLAG_VIRTUAL: u32 = 0x0000_0002;
pub const POLICY_FLAG_FUNCTION: u32 = 0x0000_0004;
pub const POLICY_FLAG_GESTURE: u32 = 0x0000_0008;

/// Parse a policy flag name as written in device configuration files.
pub fn policy_flag_from_name(name: &str) -> Option<u32> {
    match name.to_ascii_uppercase().as_str() {
        "WAKE" => Some(POLICY_FLAG_WAKE),
        "VIRTUAL" => Some(POLICY_FLAG_VIRTUAL),
        "FUNCTION" => Some(POLICY_FLAG_FUNCTION),
        "GESTURE" => Some(POLICY_FLAG_GESTURE),
        _ => None,
    }
}

/// State of a key, button or switch as reported by the state queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum KeyState {
    /// The device is unknown, disabled, or cannot report this code.
    Unknown = -1,
    Up = 0,
    Down = 1,
    /// Down, but generated by a virtual key.
    Virtual = 2,
}

impl KeyState {
    pub fn from_down(down: bool) -> Self {
        if down {
            KeyState::Down
        } else {
            KeyState::Up
        }
    }

    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for KeyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            KeyState::Unknown => "UNKNOWN",
            KeyState::Up => "UP",
            KeyState::Down => "DOWN",
            KeyState::Virtual => "VIRTUAL",
        };
        write!(f, "{}", s)
    }
}
