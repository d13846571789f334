// Evhub Event Hub
// Blocking event loop over every device node, with hot-plug and cross-thread wake-up

mod dump;
mod query;
mod registry;

use std::io;
use std::thread;
use std::time::Duration;

use log::{debug, error, info, trace, warn};
use parking_lot::{Mutex, MutexGuard};

use crate::classes::InputDeviceClass;
use crate::error::HubResult;
use crate::event::{monotonic_nanos, RawEvent, DEVICE_ADDED, DEVICE_REMOVED, FINISHED_DEVICE_SCAN};
use crate::ioctl::empty_input_event;
use crate::keymap::ConfigLoader;
use crate::node::{InputDeviceIdentifier, NodeOpener};
use crate::poll::{Poller, ReadyItem, WakePipe};
use crate::scanner::Scanner;
use crate::settings::HubSettings;
use crate::watcher::DirectoryWatcher;

use registry::HubState;

/// Id under which the built-in keyboard is reported, whatever its real id.
pub const BUILT_IN_KEYBOARD_ID: i32 = 0;

/// Id of the fd-less virtual keyboard.
pub const VIRTUAL_KEYBOARD_ID: i32 = -1;

const NO_BUILT_IN_KEYBOARD: i32 = -2;

// Epoll tokens. Device nodes use their id, video nodes their id with the
// video bit set.
const WATCHER_TOKEN: u64 = u64::MAX;
const WAKE_TOKEN: u64 = u64::MAX - 1;
const VIDEO_TOKEN_FLAG: u64 = 1 << 32;

/// Kernel records read from one device per read call.
const INPUT_READ_BATCH: usize = 64;

/// Pause after an unexpected epoll failure so a persistent fault cannot spin.
const POLL_ERROR_BACKOFF: Duration = Duration::from_millis(100);

fn device_token(id: i32) -> u64 {
    id as u32 as u64
}

fn video_token(id: i32) -> u64 {
    VIDEO_TOKEN_FLAG | id as u32 as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Watcher,
    Wake,
    Device(i32),
    Video(i32),
}

fn decode_token(token: u64) -> Source {
    match token {
        WATCHER_TOKEN => Source::Watcher,
        WAKE_TOKEN => Source::Wake,
        t if t & VIDEO_TOKEN_FLAG != 0 => Source::Video(t as u32 as i32),
        t => Source::Device(t as u32 as i32),
    }
}

/// What draining one ready device produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeviceRead {
    Idle,
    Events(usize),
    Closed,
}

/// Collaborators that never change after construction. Only the poller is
/// touched without the lock held, and epoll is safe to use concurrently.
pub(crate) struct HubEnv {
    poller: Poller,
    opener: Box<dyn NodeOpener>,
    loader: Box<dyn ConfigLoader>,
    scanner: Scanner,
    virtual_keyboard: bool,
}

/// Discovers input devices, multiplexes their events and answers queries
/// about them.
///
/// All state sits behind one lock. [`get_events`](Self::get_events) releases
/// it while blocked in epoll, so queries from other threads never wait on a
/// poll timeout. [`wake`](Self::wake) interrupts a blocked wait from any
/// thread.
pub struct EventHub {
    state: Mutex<HubState>,
    env: HubEnv,
    wake_pipe: WakePipe,
}

impl EventHub {
    /// A hub over real evdev nodes, configured from TOML device files.
    #[cfg(feature = "evdev-backend")]
    pub fn new(settings: &HubSettings) -> HubResult<Self> {
        Self::with_backends(
            settings,
            Box::new(crate::node::evdev::EvdevOpener),
            Box::new(crate::keymap::TomlConfigLoader::new(settings.device_config_dirs.clone())),
        )
    }

    /// A hub with caller-supplied node and configuration sources.
    pub fn with_backends(
        settings: &HubSettings,
        opener: Box<dyn NodeOpener>,
        loader: Box<dyn ConfigLoader>,
    ) -> HubResult<Self> {
        let poller = Poller::new()?;
        let wake_pipe = WakePipe::new()?;

        let mut watcher = DirectoryWatcher::new()?;
        watcher.watch(&settings.input_dir)?;
        if settings.video_dir != settings.input_dir {
            if let Err(e) = watcher.watch(&settings.video_dir) {
                warn!("Video devices will not be hot-plugged: {}", e);
            }
        }

        poller.add(watcher.raw_fd(), WATCHER_TOKEN)?;
        poller.add(wake_pipe.read_fd(), WAKE_TOKEN)?;

        let scanner = Scanner {
            input_dir: settings.input_dir.clone(),
            video_dir: settings.video_dir.clone(),
            node_prefix: settings.node_prefix.clone(),
            video_prefix: settings.video_prefix.clone(),
        };
        info!(
            "Event hub watching {} for '{}*' and {} for '{}*'",
            scanner.input_dir.display(),
            scanner.node_prefix,
            scanner.video_dir.display(),
            scanner.video_prefix
        );

        Ok(Self {
            state: Mutex::new(HubState::new(watcher, settings.excluded.clone())),
            env: HubEnv {
                poller,
                opener,
                loader,
                scanner,
                virtual_keyboard: settings.virtual_keyboard,
            },
            wake_pipe,
        })
    }

    /// Fill `buffer` with raw events, blocking up to `timeout_millis` (negative
    /// blocks indefinitely) when nothing is ready. Returns how many events were
    /// written; 0 means the wait timed out or was woken with nothing to report.
    ///
    /// Device additions and removals come first as synthetic events, followed
    /// by one FINISHED_DEVICE_SCAN, then data from ready devices in readiness
    /// order.
    pub fn get_events(&self, timeout_millis: i32, buffer: &mut [RawEvent]) -> usize {
        if buffer.is_empty() {
            error!("get_events called with an empty buffer");
            return 0;
        }

        let capacity = buffer.len();
        let mut count = 0;
        let mut awoken = false;
        let mut input = [empty_input_event(); INPUT_READ_BATCH];
        let mut state = self.state.lock();

        loop {
            let now = monotonic_nanos();

            // Data already drained from the last wait is delivered first.
            if state.need_to_reopen && state.pending_index >= state.pending.len() {
                state.need_to_reopen = false;
                info!("Reopening all input devices due to a configuration change.");
                state.close_all_devices(&self.env);
                state.need_to_scan = true;
            }

            while count < capacity {
                let Some((device_id, device)) = state.closing.pop_front() else {
                    break;
                };
                debug!("Reporting device closed: id={}, name={}", device_id, device.path().display());
                buffer[count] = RawEvent::synthetic(now, device_id, DEVICE_REMOVED);
                count += 1;
                state.need_to_send_finished = true;
            }

            if state.need_to_scan {
                state.need_to_scan = false;
                state.scan_devices(&self.env);
            }

            while count < capacity {
                let Some(device) = state.opening.pop_front() else {
                    break;
                };
                let device_id = state.external_id(device.id());
                debug!("Reporting device opened: id={}, name={}", device_id, device.path().display());
                buffer[count] = RawEvent::synthetic(now, device_id, DEVICE_ADDED);
                count += 1;
                state.activate(device, &self.env);
                state.need_to_send_finished = true;
            }

            if state.need_to_send_finished && count < capacity {
                state.need_to_send_finished = false;
                buffer[count] = RawEvent::synthetic(now, 0, FINISHED_DEVICE_SCAN);
                count += 1;
            }

            if count == capacity {
                break;
            }

            let mut device_changed = false;
            while state.pending_index < state.pending.len() && count < capacity {
                let item = state.pending[state.pending_index];
                state.pending_index += 1;

                match decode_token(item.token) {
                    Source::Watcher => {
                        if item.readable() {
                            state.pending_inotify = true;
                        } else {
                            warn!("Received unexpected epoll event {:#x} for inotify", item.events);
                        }
                    }
                    Source::Wake => {
                        if item.readable() {
                            debug!("awoken after wake()");
                            awoken = true;
                            if let Err(e) = self.wake_pipe.drain() {
                                warn!("Could not drain wake pipe: {}", e);
                            }
                        } else {
                            warn!("Received unexpected epoll event {:#x} for wake read pipe", item.events);
                        }
                    }
                    Source::Video(id) => read_video(&mut state, id, item),
                    Source::Device(id) => {
                        let out = &mut buffer[count..];
                        match read_device(&mut state, &self.env, id, item, &mut input, out, now) {
                            DeviceRead::Events(read) => {
                                count += read;
                                if count == capacity {
                                    // The device may hold more; look at it again next time.
                                    state.pending_index -= 1;
                                }
                            }
                            DeviceRead::Closed => device_changed = true,
                            DeviceRead::Idle => {}
                        }
                    }
                }
            }

            // Rescanning changes the device table, so it waits until every
            // readiness item from this wait has been handled.
            if state.pending_inotify && state.pending_index >= state.pending.len() {
                state.pending_inotify = false;
                state.read_notify(&self.env);
                device_changed = true;
            }

            if device_changed {
                continue;
            }

            if count > 0 || awoken {
                break;
            }

            let mut ready = std::mem::take(&mut state.pending);
            ready.clear();
            state.pending_index = 0;

            let result = MutexGuard::unlocked(&mut state, || self.env.poller.wait(&mut ready, timeout_millis));
            state.pending = ready;

            match result {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    warn!("poll failed (errno={})", e.raw_os_error().unwrap_or(0));
                    MutexGuard::unlocked(&mut state, || thread::sleep(POLL_ERROR_BACKOFF));
                }
            }
        }

        count
    }

    /// Make a blocked (or the next) [`get_events`](Self::get_events) return
    /// promptly. Safe from any thread.
    pub fn wake(&self) {
        trace!("wake() called");
        if let Err(e) = self.wake_pipe.wake() {
            warn!("Could not write wake signal: {}", e);
        }
    }

    /// Close every device and rediscover them on the next cycle.
    pub fn request_reopen_devices(&self) {
        debug!("request_reopen_devices() called");
        self.state.lock().need_to_reopen = true;
        self.wake();
    }

    /// Liveness check: returns once the lock can be taken.
    pub fn monitor(&self) {
        drop(self.state.lock());
    }

    /// Add a device with no kernel node. It is reported with DEVICE_ADDED on
    /// the next cycle. Returns its id.
    pub fn add_virtual_device(&self, identifier: InputDeviceIdentifier, classes: InputDeviceClass) -> i32 {
        let id = self.state.lock().add_virtual_device(identifier, classes, &self.env);
        self.wake();
        id
    }

    /// Number of controller numbers currently handed out.
    pub fn controllers_in_use(&self) -> u32 {
        self.state.lock().controller_numbers().in_use()
    }
}

fn read_video(state: &mut HubState, id: i32, item: ReadyItem) {
    let Some(video) = state.devices.get_mut(&id).and_then(|d| d.video_mut()) else {
        warn!("Received unexpected epoll event {:#x} for unknown video device id {}", item.events, id);
        return;
    };
    if item.readable() {
        let frames = video.read_and_queue_frames();
        trace!("Read {} frames from {}", frames, video);
    } else {
        warn!("Received unexpected epoll event {:#x} for video device {}", item.events, video);
    }
}

fn read_device(
    state: &mut HubState,
    env: &HubEnv,
    id: i32,
    item: ReadyItem,
    input: &mut [libc::input_event],
    out: &mut [RawEvent],
    now: i64,
) -> DeviceRead {
    let external_id = state.external_id(id);
    let outcome = {
        let Some(device) = state.devices.get_mut(&id) else {
            warn!("Received unexpected epoll event {:#x} for unknown device id {}", item.events, id);
            return DeviceRead::Idle;
        };
        if !device.is_registered() {
            // Disabled after the wait returned.
            return DeviceRead::Idle;
        }

        if item.readable() {
            let want = out.len().min(input.len());
            let result = match device.node_mut() {
                Some(node) => node.read_events(&mut input[..want]),
                None => return DeviceRead::Idle,
            };
            match result {
                Ok(0) => {
                    warn!("could not get event, removed? ({})", device.path().display());
                    DeviceRead::Closed
                }
                Ok(read) => {
                    for (record, slot) in input[..read].iter().zip(out.iter_mut()) {
                        device.process_input(record);
                        *slot = RawEvent::from_input(external_id, record, now);
                    }
                    DeviceRead::Events(read)
                }
                Err(e) if e.raw_os_error() == Some(libc::ENODEV) => {
                    warn!("could not get event, removed? ({})", device.path().display());
                    DeviceRead::Closed
                }
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {
                    DeviceRead::Idle
                }
                Err(e) => {
                    warn!("could not get event from {}: {}", device.path().display(), e);
                    DeviceRead::Idle
                }
            }
        } else if item.hung_up() {
            info!("Removing device {} due to epoll hang-up event.", device.identifier().name);
            DeviceRead::Closed
        } else {
            warn!(
                "Received unexpected epoll event {:#x} for device {}",
                item.events,
                device.identifier().name
            );
            DeviceRead::Idle
        }
    };

    if outcome == DeviceRead::Closed {
        state.close_device(id, env);
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_round_trip() {
        assert_eq!(decode_token(device_token(7)), Source::Device(7));
        assert_eq!(decode_token(video_token(7)), Source::Video(7));
        assert_eq!(decode_token(device_token(0x7fff_ffff)), Source::Device(0x7fff_ffff));
        assert_eq!(decode_token(WATCHER_TOKEN), Source::Watcher);
        assert_eq!(decode_token(WAKE_TOKEN), Source::Wake);
    }

    #[test]
    fn test_reserved_ids_are_distinct() {
        assert_ne!(BUILT_IN_KEYBOARD_ID, VIRTUAL_KEYBOARD_ID);
        assert_ne!(NO_BUILT_IN_KEYBOARD, VIRTUAL_KEYBOARD_ID);
        assert_ne!(NO_BUILT_IN_KEYBOARD, BUILT_IN_KEYBOARD_ID);
    }
}
