// Evhub Virtual Keys
// Touch regions outside the display that act as keys

use serde::Deserialize;

/// One virtual key, in touchscreen coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct VirtualKeyDefinition {
    pub scan_code: i32,
    pub center_x: i32,
    pub center_y: i32,
    pub width: i32,
    pub height: i32,
}

impl VirtualKeyDefinition {
    /// Whether a touch at `(x, y)` lands on this key.
    pub fn contains(&self, x: i32, y: i32) -> bool {
        let half_w = self.width / 2;
        let half_h = self.height / 2;
        x >= self.center_x - half_w
            && x <= self.center_x + half_w
            && y >= self.center_y - half_h
            && y <= self.center_y + half_h
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VirtualKeyMap {
    keys: Vec<VirtualKeyDefinition>,
}

impl VirtualKeyMap {
    pub fn new(keys: Vec<VirtualKeyDefinition>) -> Self {
        Self { keys }
    }

    pub fn keys(&self) -> &[VirtualKeyDefinition] {
        &self.keys
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
