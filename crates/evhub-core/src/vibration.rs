// Evhub Vibration
// Rumble requests expressed per channel and scaled to force-feedback magnitudes

use std::fmt;
use std::time::Duration;

use smallvec::SmallVec;

/// Channel driving the strong (low frequency) rumble motor.
pub const STRONG_MAGNITUDE_CHANNEL: usize = 0;
/// Channel driving the weak (high frequency) rumble motor.
pub const WEAK_MAGNITUDE_CHANNEL: usize = 1;

/// One step of a vibration pattern: how long, and how hard per channel.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VibrationElement {
    pub duration: Duration,
    /// Amplitude per channel, 0 (off) to 255 (full).
    pub channels: SmallVec<[u8; 2]>,
}

impl VibrationElement {
    pub fn new(duration: Duration, channels: &[u8]) -> Self {
        Self {
            duration,
            channels: SmallVec::from_slice(channels),
        }
    }

    /// Amplitude of `channel` scaled to the kernel's 0..=0xFFFF range.
    /// Missing channels are off.
    pub fn magnitude(&self, channel: usize) -> u16 {
        let amplitude = self.channels.get(channel).copied().unwrap_or(0) as u32;
        (amplitude * 0xFFFF / 0xFF) as u16
    }

    pub fn is_on(&self) -> bool {
        !self.duration.is_zero() && self.channels.iter().any(|&a| a != 0)
    }
}

impl fmt::Display for VibrationElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[duration={}ms, channels={:?}]", self.duration.as_millis(), self.channels.as_slice())
    }
}
