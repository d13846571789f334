// Evhub Raw Events
// Device-tagged raw events and the synthetic lifecycle codes injected by the hub

use std::fmt;

use log::warn;

/// Emitted once for every device that becomes active.
pub const DEVICE_ADDED: i32 = 0x1000_0000;
/// Emitted once for every device that was closed.
pub const DEVICE_REMOVED: i32 = 0x2000_0000;
/// Emitted once after every scan, even one that changed nothing.
pub const FINISHED_DEVICE_SCAN: i32 = 0x3000_0000;
/// Start of the synthetic range; every real kernel type is below this.
pub const FIRST_SYNTHETIC_EVENT: i32 = DEVICE_ADDED;

/// Kernel timestamps further ahead than this are treated as bogus.
const MAX_FUTURE_TIMESTAMP_NANOS: i64 = 10 * 1_000_000_000;

/// Current `CLOCK_MONOTONIC` time in nanoseconds.
pub fn monotonic_nanos() -> i64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `ts` is a valid out pointer; CLOCK_MONOTONIC is always present.
    unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    ts.tv_sec as i64 * 1_000_000_000 + ts.tv_nsec as i64
}

/// One entry of the queue returned by `get_events`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawEvent {
    /// Monotonic nanoseconds.
    pub when: i64,
    /// Device the event belongs to; 0 for [`FINISHED_DEVICE_SCAN`].
    pub device_id: i32,
    pub event_type: i32,
    pub code: i32,
    pub value: i32,
}

impl RawEvent {
    pub fn synthetic(when: i64, device_id: i32, event_type: i32) -> Self {
        Self {
            when,
            device_id,
            event_type,
            code: 0,
            value: 0,
        }
    }

    /// Translate one kernel record, tagging it with `device_id`.
    pub fn from_input(device_id: i32, input: &libc::input_event, now: i64) -> Self {
        let kernel_time =
            input.time.tv_sec as i64 * 1_000_000_000 + input.time.tv_usec as i64 * 1_000;
        Self {
            when: sanitize_timestamp(kernel_time, now, device_id),
            device_id,
            event_type: input.type_ as i32,
            code: input.code as i32,
            value: input.value,
        }
    }

    pub fn is_synthetic(&self) -> bool {
        self.event_type >= FIRST_SYNTHETIC_EVENT
    }
}

impl fmt::Display for RawEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.event_type {
            DEVICE_ADDED => write!(f, "{} device {} added", self.when, self.device_id),
            DEVICE_REMOVED => write!(f, "{} device {} removed", self.when, self.device_id),
            FINISHED_DEVICE_SCAN => write!(f, "{} finished device scan", self.when),
            t => write!(
                f,
                "{} device {}: {} code={:#06x} value={}",
                self.when,
                self.device_id,
                crate::codes::event_type_name(t as u16),
                self.code,
                self.value
            ),
        }
    }
}

// A driver with a broken clock can stamp events far in the future, which
// would stall anything that waits on event time. Clamp those to now.
fn sanitize_timestamp(kernel_time: i64, now: i64, device_id: i32) -> i64 {
    if kernel_time - now > MAX_FUTURE_TIMESTAMP_NANOS {
        warn!(
            "Event time {} from device {} is more than 10s ahead of now {}; using now",
            kernel_time, device_id, now
        );
        return now;
    }
    kernel_time
}
