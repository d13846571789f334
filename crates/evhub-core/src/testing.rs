// Evhub Test Doubles
// Socket-backed fake device nodes for driving the real hub, and an in-memory hub for consumers

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::io::{self, Read, Write};
use std::mem;
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::slice;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::classes::InputDeviceClass;
use crate::codes::*;
use crate::device::KeyMapResult;
use crate::error::{HubError, HubResult};
use crate::event::{monotonic_nanos, RawEvent, DEVICE_ADDED, DEVICE_REMOVED, FINISHED_DEVICE_SCAN};
use crate::keycodes::KeyState;
use crate::keymap::{AxisInfo, ConfigLoader, ConfigResult, DeviceConfig, KeyCharacterMap, PropertyMap, VirtualKeyDefinition};
use crate::interface::EventHubInterface;
use crate::node::{AbsoluteAxisSnapshot, BitmaskKind, InputDeviceIdentifier, InputNode, NodeOpener, RawAbsoluteAxisInfo};
use crate::vibration::VibrationElement;
use crate::video::{TouchVideoFrame, VideoNode};

/// What a fake node reports to capability and state queries.
#[derive(Debug, Clone, Default)]
pub struct FakeDeviceSpec {
    pub identifier: InputDeviceIdentifier,
    pub keys: Vec<u16>,
    pub rel: Vec<u16>,
    pub abs: Vec<(u16, RawAbsoluteAxisInfo)>,
    pub switches: Vec<u16>,
    pub leds: Vec<u16>,
    pub ff: Vec<u16>,
    pub props: Vec<u16>,
}

impl FakeDeviceSpec {
    pub fn new(name: &str) -> Self {
        Self {
            identifier: InputDeviceIdentifier::named(name),
            ..Self::default()
        }
    }

    /// Letter keys, enter and the caps/num lock LEDs.
    pub fn keyboard(name: &str) -> Self {
        Self::new(name)
            .with_keys(&[KEY_ESC, KEY_Q, KEY_W, KEY_A, KEY_Z, KEY_ENTER, KEY_SPACE])
            .with_leds(&[LED_NUML, LED_CAPSL])
    }

    /// Face buttons, two sticks and rumble.
    pub fn gamepad(name: &str) -> Self {
        let stick = RawAbsoluteAxisInfo {
            valid: true,
            min_value: -32768,
            max_value: 32767,
            flat: 128,
            fuzz: 16,
            resolution: 0,
        };
        Self::new(name)
            .with_keys(&[BTN_A, BTN_B, BTN_NORTH, BTN_WEST, BTN_START])
            .with_abs(ABS_X, stick)
            .with_abs(ABS_Y, stick)
            .with_abs(ABS_RX, stick)
            .with_abs(ABS_RY, stick)
            .with_ff(&[FF_RUMBLE])
    }

    pub fn mouse(name: &str) -> Self {
        Self::new(name)
            .with_keys(&[BTN_LEFT, BTN_RIGHT, BTN_MIDDLE])
            .with_rel(&[REL_X, REL_Y, REL_WHEEL])
    }

    pub fn with_bus(mut self, bus: u16, vendor: u16, product: u16) -> Self {
        self.identifier.bus = bus;
        self.identifier.vendor = vendor;
        self.identifier.product = product;
        self
    }

    pub fn with_unique_id(mut self, unique_id: &str) -> Self {
        self.identifier.unique_id = unique_id.to_string();
        self
    }

    pub fn with_keys(mut self, keys: &[u16]) -> Self {
        self.keys.extend_from_slice(keys);
        self
    }

    pub fn with_rel(mut self, axes: &[u16]) -> Self {
        self.rel.extend_from_slice(axes);
        self
    }

    pub fn with_abs(mut self, axis: u16, info: RawAbsoluteAxisInfo) -> Self {
        self.abs.push((axis, info));
        self
    }

    pub fn with_switches(mut self, switches: &[u16]) -> Self {
        self.switches.extend_from_slice(switches);
        self
    }

    pub fn with_leds(mut self, leds: &[u16]) -> Self {
        self.leds.extend_from_slice(leds);
        self
    }

    pub fn with_ff(mut self, effects: &[u16]) -> Self {
        self.ff.extend_from_slice(effects);
        self
    }

    pub fn with_props(mut self, props: &[u16]) -> Self {
        self.props.extend_from_slice(props);
        self
    }
}

fn fill_bitmask(buffer: &mut [u32], codes: impl IntoIterator<Item = u16>) {
    buffer.fill(0);
    for code in codes {
        let code = code as usize;
        if let Some(word) = buffer.get_mut(code / 32) {
            *word |= 1 << (code % 32);
        }
    }
}

/// Kernel-side state of one fake node, shared between the node the hub owns
/// and the handle the test holds.
#[derive(Debug, Default)]
struct FakeNodeState {
    spec: FakeDeviceSpec,
    writer: Option<UnixStream>,
    keys_down: HashSet<u16>,
    switches_on: HashSet<u16>,
    abs_values: HashMap<u16, i32>,
    written: Vec<(u16, u16, i32)>,
    next_effect_id: i16,
    erased_effects: Vec<i16>,
    open_count: usize,
}

struct FakeInputNode {
    reader: UnixStream,
    state: Arc<Mutex<FakeNodeState>>,
}

impl InputNode for FakeInputNode {
    fn raw_fd(&self) -> RawFd {
        self.reader.as_raw_fd()
    }

    fn identifier(&self) -> InputDeviceIdentifier {
        self.state.lock().spec.identifier.clone()
    }

    fn read_bitmask(&self, kind: BitmaskKind, buffer: &mut [u32]) -> io::Result<()> {
        let state = self.state.lock();
        let spec = &state.spec;
        match kind {
            BitmaskKind::Key => fill_bitmask(buffer, spec.keys.iter().copied()),
            BitmaskKind::Abs => fill_bitmask(buffer, spec.abs.iter().map(|(axis, _)| *axis)),
            BitmaskKind::Rel => fill_bitmask(buffer, spec.rel.iter().copied()),
            BitmaskKind::Switch => fill_bitmask(buffer, spec.switches.iter().copied()),
            BitmaskKind::Led => fill_bitmask(buffer, spec.leds.iter().copied()),
            BitmaskKind::Ff => fill_bitmask(buffer, spec.ff.iter().copied()),
            BitmaskKind::Prop => fill_bitmask(buffer, spec.props.iter().copied()),
            BitmaskKind::KeyState => fill_bitmask(buffer, state.keys_down.iter().copied()),
            BitmaskKind::SwitchState => fill_bitmask(buffer, state.switches_on.iter().copied()),
            BitmaskKind::LedState => fill_bitmask(buffer, std::iter::empty()),
        }
        Ok(())
    }

    fn read_abs_info(&self, axis: u16) -> io::Result<AbsoluteAxisSnapshot> {
        let state = self.state.lock();
        let info = state
            .spec
            .abs
            .iter()
            .find(|(code, _)| *code == axis)
            .map(|(_, info)| *info)
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EINVAL))?;
        Ok(AbsoluteAxisSnapshot {
            info,
            value: state.abs_values.get(&axis).copied().unwrap_or(0),
        })
    }

    fn write_event(&mut self, event_type: u16, code: u16, value: i32) -> io::Result<()> {
        self.state.lock().written.push((event_type, code, value));
        Ok(())
    }

    fn upload_rumble(&mut self, effect_id: i16, _strong: u16, _weak: u16, _duration: Duration) -> io::Result<i16> {
        let mut state = self.state.lock();
        if effect_id != -1 {
            return Ok(effect_id);
        }
        let id = state.next_effect_id;
        state.next_effect_id += 1;
        Ok(id)
    }

    fn erase_effect(&mut self, effect_id: i16) -> io::Result<()> {
        self.state.lock().erased_effects.push(effect_id);
        Ok(())
    }
}

/// Test-side control of a fake node: inject records, change the state the
/// kernel would report, or unplug it.
#[derive(Clone)]
pub struct FakeNodeHandle {
    state: Arc<Mutex<FakeNodeState>>,
}

impl FakeNodeHandle {
    /// Send one record to the hub, stamped with the current monotonic time.
    pub fn inject(&self, event_type: u16, code: u16, value: i32) -> io::Result<()> {
        let now = monotonic_nanos();
        let mut record = crate::ioctl::empty_input_event();
        record.time.tv_sec = (now / 1_000_000_000) as _;
        record.time.tv_usec = ((now % 1_000_000_000) / 1_000) as _;
        record.type_ = event_type;
        record.code = code;
        record.value = value;

        // SAFETY: input_event is plain old data; the slice covers exactly one record.
        let bytes = unsafe {
            slice::from_raw_parts(&record as *const libc::input_event as *const u8, mem::size_of::<libc::input_event>())
        };
        let mut state = self.state.lock();
        match state.writer.as_mut() {
            Some(writer) => writer.write_all(bytes),
            None => Err(io::Error::from(io::ErrorKind::NotConnected)),
        }
    }

    /// A key press or release followed by a sync report.
    pub fn press(&self, code: u16, down: bool) -> io::Result<()> {
        self.inject(EV_KEY, code, down as i32)?;
        self.inject(EV_SYN, SYN_REPORT, 0)
    }

    /// Close the writing end; the hub reads end of file.
    pub fn disconnect(&self) {
        self.state.lock().writer = None;
    }

    /// Change the key state the node reports when asked directly.
    pub fn set_key_down(&self, code: u16, down: bool) {
        let mut state = self.state.lock();
        if down {
            state.keys_down.insert(code);
        } else {
            state.keys_down.remove(&code);
        }
    }

    pub fn set_switch(&self, code: u16, on: bool) {
        let mut state = self.state.lock();
        if on {
            state.switches_on.insert(code);
        } else {
            state.switches_on.remove(&code);
        }
    }

    pub fn set_abs_value(&self, axis: u16, value: i32) {
        self.state.lock().abs_values.insert(axis, value);
    }

    /// Records the hub wrote back (LED and force-feedback control).
    pub fn written_events(&self) -> Vec<(u16, u16, i32)> {
        self.state.lock().written.clone()
    }

    pub fn erased_effects(&self) -> Vec<i16> {
        self.state.lock().erased_effects.clone()
    }

    /// How many times the hub opened this node.
    pub fn open_count(&self) -> usize {
        self.state.lock().open_count
    }
}

#[derive(Debug, Default)]
struct FakeVideoState {
    name: String,
    height: u32,
    width: u32,
    writer: Option<UnixStream>,
    frames: VecDeque<TouchVideoFrame>,
}

struct FakeVideoNode {
    reader: UnixStream,
    state: Arc<Mutex<FakeVideoState>>,
}

impl VideoNode for FakeVideoNode {
    fn raw_fd(&self) -> RawFd {
        self.reader.as_raw_fd()
    }

    fn name(&self) -> String {
        self.state.lock().name.clone()
    }

    fn frame_size(&self) -> (u32, u32) {
        let state = self.state.lock();
        (state.height, state.width)
    }

    fn read_frames(&mut self) -> io::Result<Vec<TouchVideoFrame>> {
        // Each queued frame is announced by one byte.
        let mut scratch = [0u8; 64];
        loop {
            match self.reader.read(&mut scratch) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        Ok(self.state.lock().frames.drain(..).collect())
    }
}

/// Test-side control of a fake heatmap node.
#[derive(Clone)]
pub struct FakeVideoHandle {
    state: Arc<Mutex<FakeVideoState>>,
}

impl FakeVideoHandle {
    pub fn push_frame(&self, data: Vec<i16>) -> io::Result<()> {
        let mut state = self.state.lock();
        let frame = TouchVideoFrame {
            height: state.height,
            width: state.width,
            data,
            timestamp: monotonic_nanos(),
        };
        state.frames.push_back(frame);
        match state.writer.as_mut() {
            Some(writer) => writer.write_all(&[1]),
            None => Err(io::Error::from(io::ErrorKind::NotConnected)),
        }
    }
}

#[derive(Default)]
struct FakeOpenerState {
    inputs: HashMap<PathBuf, Arc<Mutex<FakeNodeState>>>,
    videos: HashMap<PathBuf, Arc<Mutex<FakeVideoState>>>,
}

/// Opens fake nodes registered by path. Paths nobody registered fail with
/// `ENOENT`, like a node that vanished between listing and opening.
///
/// Every open creates a fresh socket pair, so a reopened device gets a new
/// descriptor just as a real node would.
#[derive(Clone, Default)]
pub struct FakeNodeOpener {
    inner: Arc<Mutex<FakeOpenerState>>,
}

impl FakeNodeOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, path: impl Into<PathBuf>, spec: FakeDeviceSpec) -> FakeNodeHandle {
        let state = Arc::new(Mutex::new(FakeNodeState {
            spec,
            ..FakeNodeState::default()
        }));
        self.inner.lock().inputs.insert(path.into(), Arc::clone(&state));
        FakeNodeHandle { state }
    }

    pub fn add_video(&self, path: impl Into<PathBuf>, name: &str, height: u32, width: u32) -> FakeVideoHandle {
        let state = Arc::new(Mutex::new(FakeVideoState {
            name: name.to_string(),
            height,
            width,
            ..FakeVideoState::default()
        }));
        self.inner.lock().videos.insert(path.into(), Arc::clone(&state));
        FakeVideoHandle { state }
    }

    /// Forget a node; later opens of `path` fail.
    pub fn remove(&self, path: &Path) {
        let mut inner = self.inner.lock();
        inner.inputs.remove(path);
        inner.videos.remove(path);
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("no fake node at {}", path.display()))
}

impl NodeOpener for FakeNodeOpener {
    fn open_input(&self, path: &Path) -> io::Result<Box<dyn InputNode>> {
        let state = self
            .inner
            .lock()
            .inputs
            .get(path)
            .cloned()
            .ok_or_else(|| not_found(path))?;
        let (reader, writer) = UnixStream::pair()?;
        reader.set_nonblocking(true)?;
        {
            let mut node = state.lock();
            node.writer = Some(writer);
            node.open_count += 1;
        }
        Ok(Box::new(FakeInputNode { reader, state }))
    }

    fn open_video(&self, path: &Path) -> io::Result<Box<dyn VideoNode>> {
        let state = self
            .inner
            .lock()
            .videos
            .get(path)
            .cloned()
            .ok_or_else(|| not_found(path))?;
        let (reader, writer) = UnixStream::pair()?;
        reader.set_nonblocking(true)?;
        state.lock().writer = Some(writer);
        Ok(Box::new(FakeVideoNode { reader, state }))
    }
}

/// Hands out fixed configurations by device name.
#[derive(Debug, Clone, Default)]
pub struct StaticConfigLoader {
    configs: HashMap<String, DeviceConfig>,
    fallback: DeviceConfig,
}

impl StaticConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, device_name: &str, config: DeviceConfig) -> Self {
        self.configs.insert(device_name.to_string(), config);
        self
    }

    /// Configuration for devices without an entry of their own.
    pub fn with_fallback(mut self, config: DeviceConfig) -> Self {
        self.fallback = config;
        self
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self, identifier: &InputDeviceIdentifier) -> ConfigResult<DeviceConfig> {
        Ok(self
            .configs
            .get(&identifier.name)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone()))
    }
}

// In-memory hub

#[derive(Debug, Default)]
struct FakeDevice {
    identifier: InputDeviceIdentifier,
    classes: InputDeviceClass,
    configuration: Option<PropertyMap>,
    enabled: bool,
    controller_number: i32,
    abs_info: HashMap<i32, RawAbsoluteAxisInfo>,
    abs_values: HashMap<i32, i32>,
    rel: HashSet<i32>,
    props: HashSet<i32>,
    scan_codes: HashSet<i32>,
    scan_code_states: HashMap<i32, KeyState>,
    key_code_states: HashMap<i32, KeyState>,
    switch_states: HashMap<i32, KeyState>,
    key_mappings: HashMap<i32, KeyMapResult>,
    axis_mappings: HashMap<i32, AxisInfo>,
    leds: HashMap<i32, bool>,
    virtual_keys: Vec<VirtualKeyDefinition>,
    key_character_map: Option<Arc<KeyCharacterMap>>,
    overlay: Option<Arc<KeyCharacterMap>>,
    frames: Vec<TouchVideoFrame>,
    vibrating: bool,
}

#[derive(Debug, Default)]
struct FakeHubState {
    devices: BTreeMap<i32, FakeDevice>,
    events: VecDeque<RawEvent>,
    excluded: Vec<String>,
    awoken: bool,
    reopen_requested: bool,
    next_virtual_id: i32,
}

/// An [`EventHubInterface`] whose devices and events are scripted by the
/// test. Queries answer from whatever the test configured; `get_events`
/// hands out queued events and otherwise blocks until the timeout or a
/// [`wake`](EventHubInterface::wake).
#[derive(Default)]
pub struct FakeEventHub {
    state: Mutex<FakeHubState>,
    ready: Condvar,
}

impl FakeEventHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, event: RawEvent) {
        self.state.lock().events.push_back(event);
        self.ready.notify_all();
    }

    fn with_device_mut(&self, device_id: i32, f: impl FnOnce(&mut FakeDevice)) {
        if let Some(device) = self.state.lock().devices.get_mut(&device_id) {
            f(device);
        }
    }

    /// Register a device and queue its DEVICE_ADDED.
    pub fn add_device(&self, device_id: i32, name: &str, classes: InputDeviceClass) {
        let device = FakeDevice {
            identifier: InputDeviceIdentifier::named(name),
            classes,
            enabled: true,
            ..FakeDevice::default()
        };
        self.state.lock().devices.insert(device_id, device);
        self.push(RawEvent::synthetic(monotonic_nanos(), device_id, DEVICE_ADDED));
    }

    pub fn remove_device(&self, device_id: i32) {
        self.state.lock().devices.remove(&device_id);
        self.push(RawEvent::synthetic(monotonic_nanos(), device_id, DEVICE_REMOVED));
    }

    pub fn finish_device_scan(&self) {
        self.push(RawEvent::synthetic(monotonic_nanos(), 0, FINISHED_DEVICE_SCAN));
    }

    pub fn enqueue_event(&self, when: i64, device_id: i32, event_type: i32, code: i32, value: i32) {
        self.push(RawEvent {
            when,
            device_id,
            event_type,
            code,
            value,
        });
    }

    pub fn set_controller_number(&self, device_id: i32, number: i32) {
        self.with_device_mut(device_id, |d| d.controller_number = number);
    }

    pub fn set_configuration(&self, device_id: i32, configuration: PropertyMap) {
        self.with_device_mut(device_id, |d| d.configuration = Some(configuration));
    }

    pub fn add_absolute_axis(&self, device_id: i32, axis: i32, info: RawAbsoluteAxisInfo) {
        self.with_device_mut(device_id, |d| {
            d.abs_info.insert(axis, info);
        });
    }

    pub fn set_absolute_axis_value(&self, device_id: i32, axis: i32, value: i32) {
        self.with_device_mut(device_id, |d| {
            d.abs_values.insert(axis, value);
        });
    }

    pub fn add_relative_axis(&self, device_id: i32, axis: i32) {
        self.with_device_mut(device_id, |d| {
            d.rel.insert(axis);
        });
    }

    pub fn add_input_property(&self, device_id: i32, property: i32) {
        self.with_device_mut(device_id, |d| {
            d.props.insert(property);
        });
    }

    /// Map `scan_code` to `key_code`; the scan code also counts as present.
    pub fn add_key(&self, device_id: i32, scan_code: i32, key_code: i32, flags: u32) {
        self.with_device_mut(device_id, |d| {
            d.scan_codes.insert(scan_code);
            d.key_mappings.insert(
                scan_code,
                KeyMapResult {
                    key_code,
                    meta_state: 0,
                    flags,
                },
            );
        });
    }

    pub fn add_axis_mapping(&self, device_id: i32, scan_code: i32, info: AxisInfo) {
        self.with_device_mut(device_id, |d| {
            d.axis_mappings.insert(scan_code, info);
        });
    }

    pub fn set_scan_code_state(&self, device_id: i32, scan_code: i32, state: KeyState) {
        self.with_device_mut(device_id, |d| {
            d.scan_code_states.insert(scan_code, state);
        });
    }

    pub fn set_key_code_state(&self, device_id: i32, key_code: i32, state: KeyState) {
        self.with_device_mut(device_id, |d| {
            d.key_code_states.insert(key_code, state);
        });
    }

    pub fn set_switch_state(&self, device_id: i32, switch: i32, state: KeyState) {
        self.with_device_mut(device_id, |d| {
            d.switch_states.insert(switch, state);
        });
    }

    pub fn add_led(&self, device_id: i32, led: i32, on: bool) {
        self.with_device_mut(device_id, |d| {
            d.leds.insert(led, on);
        });
    }

    pub fn add_virtual_key_definition(&self, device_id: i32, definition: VirtualKeyDefinition) {
        self.with_device_mut(device_id, |d| d.virtual_keys.push(definition));
    }

    pub fn set_key_character_map(&self, device_id: i32, map: Arc<KeyCharacterMap>) {
        self.with_device_mut(device_id, |d| d.key_character_map = Some(map));
    }

    pub fn add_video_frames(&self, device_id: i32, frames: Vec<TouchVideoFrame>) {
        self.with_device_mut(device_id, |d| d.frames.extend(frames));
    }

    /// Current LED state, `None` when the device has no such LED.
    pub fn led_state(&self, device_id: i32, led: i32) -> Option<bool> {
        self.state
            .lock()
            .devices
            .get(&device_id)
            .and_then(|d| d.leds.get(&led).copied())
    }

    pub fn is_vibrating(&self, device_id: i32) -> bool {
        self.state
            .lock()
            .devices
            .get(&device_id)
            .map(|d| d.vibrating)
            .unwrap_or(false)
    }

    pub fn overlay(&self, device_id: i32) -> Option<Arc<KeyCharacterMap>> {
        self.state.lock().devices.get(&device_id).and_then(|d| d.overlay.clone())
    }

    pub fn excluded_devices(&self) -> Vec<String> {
        self.state.lock().excluded.clone()
    }

    pub fn reopen_requested(&self) -> bool {
        self.state.lock().reopen_requested
    }

    fn query<R>(&self, device_id: i32, default: R, f: impl FnOnce(&FakeDevice) -> R) -> R {
        self.state.lock().devices.get(&device_id).map(f).unwrap_or(default)
    }
}

impl EventHubInterface for FakeEventHub {
    fn get_device_classes(&self, device_id: i32) -> InputDeviceClass {
        self.query(device_id, InputDeviceClass::empty(), |d| d.classes)
    }

    fn get_device_identifier(&self, device_id: i32) -> Option<InputDeviceIdentifier> {
        self.query(device_id, None, |d| Some(d.identifier.clone()))
    }

    fn get_device_controller_number(&self, device_id: i32) -> i32 {
        self.query(device_id, 0, |d| d.controller_number)
    }

    fn get_configuration(&self, device_id: i32) -> Option<PropertyMap> {
        self.query(device_id, None, |d| d.configuration.clone())
    }

    fn get_absolute_axis_info(&self, device_id: i32, axis: i32) -> Option<RawAbsoluteAxisInfo> {
        self.query(device_id, None, |d| d.abs_info.get(&axis).copied())
    }

    fn has_relative_axis(&self, device_id: i32, axis: i32) -> bool {
        self.query(device_id, false, |d| d.rel.contains(&axis))
    }

    fn has_input_property(&self, device_id: i32, property: i32) -> bool {
        self.query(device_id, false, |d| d.props.contains(&property))
    }

    fn map_key(&self, device_id: i32, scan_code: i32, _usage_code: i32, meta_state: i32) -> HubResult<KeyMapResult> {
        let state = self.state.lock();
        let device = state
            .devices
            .get(&device_id)
            .ok_or(HubError::UnknownDevice(device_id))?;
        device
            .key_mappings
            .get(&scan_code)
            .map(|mapping| KeyMapResult { meta_state, ..*mapping })
            .ok_or(HubError::NotMapped {
                device_id,
                code: scan_code,
            })
    }

    fn map_axis(&self, device_id: i32, scan_code: i32) -> HubResult<AxisInfo> {
        let state = self.state.lock();
        let device = state
            .devices
            .get(&device_id)
            .ok_or(HubError::UnknownDevice(device_id))?;
        device
            .axis_mappings
            .get(&scan_code)
            .copied()
            .ok_or(HubError::NotMapped {
                device_id,
                code: scan_code,
            })
    }

    fn set_excluded_devices(&self, devices: &[String]) {
        self.state.lock().excluded = devices.to_vec();
    }

    fn get_events(&self, timeout_millis: i32, buffer: &mut [RawEvent]) -> usize {
        let deadline = (timeout_millis >= 0).then(|| Instant::now() + Duration::from_millis(timeout_millis as u64));
        let mut state = self.state.lock();
        loop {
            if !state.events.is_empty() || state.awoken {
                state.awoken = false;
                let count = buffer.len().min(state.events.len());
                for (slot, event) in buffer.iter_mut().zip(state.events.drain(..count)) {
                    *slot = event;
                }
                return count;
            }
            match deadline {
                Some(deadline) => {
                    if self.ready.wait_until(&mut state, deadline).timed_out() {
                        return 0;
                    }
                }
                None => self.ready.wait(&mut state),
            }
        }
    }

    fn get_video_frames(&self, device_id: i32) -> Vec<TouchVideoFrame> {
        self.state
            .lock()
            .devices
            .get_mut(&device_id)
            .map(|d| mem::take(&mut d.frames))
            .unwrap_or_default()
    }

    fn get_scan_code_state(&self, device_id: i32, scan_code: i32) -> KeyState {
        self.query(device_id, KeyState::Unknown, |d| {
            if !d.enabled {
                return KeyState::Unknown;
            }
            d.scan_code_states.get(&scan_code).copied().unwrap_or(KeyState::Up)
        })
    }

    fn get_key_code_state(&self, device_id: i32, key_code: i32) -> KeyState {
        self.query(device_id, KeyState::Unknown, |d| {
            if !d.enabled {
                return KeyState::Unknown;
            }
            d.key_code_states.get(&key_code).copied().unwrap_or(KeyState::Up)
        })
    }

    fn get_switch_state(&self, device_id: i32, switch: i32) -> KeyState {
        self.query(device_id, KeyState::Unknown, |d| {
            if !d.enabled {
                return KeyState::Unknown;
            }
            d.switch_states.get(&switch).copied().unwrap_or(KeyState::Up)
        })
    }

    fn get_absolute_axis_value(&self, device_id: i32, axis: i32) -> Option<i32> {
        self.query(device_id, None, |d| {
            d.enabled.then(|| d.abs_values.get(&axis).copied()).flatten()
        })
    }

    fn mark_supported_key_codes(&self, device_id: i32, key_codes: &[i32], out_flags: &mut [bool]) -> bool {
        self.query(device_id, false, |d| {
            for (key_code, flag) in key_codes.iter().zip(out_flags.iter_mut()) {
                if d.key_mappings.values().any(|m| m.key_code == *key_code) {
                    *flag = true;
                }
            }
            true
        })
    }

    fn has_scan_code(&self, device_id: i32, scan_code: i32) -> bool {
        self.query(device_id, false, |d| d.scan_codes.contains(&scan_code))
    }

    fn has_led(&self, device_id: i32, led: i32) -> bool {
        self.query(device_id, false, |d| d.leds.contains_key(&led))
    }

    fn set_led_state(&self, device_id: i32, led: i32, on: bool) {
        self.with_device_mut(device_id, |d| {
            if let Some(state) = d.leds.get_mut(&led) {
                *state = on;
            }
        });
    }

    fn get_virtual_key_definitions(&self, device_id: i32) -> Vec<VirtualKeyDefinition> {
        self.query(device_id, Vec::new(), |d| d.virtual_keys.clone())
    }

    fn get_key_character_map(&self, device_id: i32) -> Option<Arc<KeyCharacterMap>> {
        self.query(device_id, None, |d| match &d.key_character_map {
            Some(base) => Some(KeyCharacterMap::combine(base, d.overlay.as_ref())),
            None => d.overlay.clone(),
        })
    }

    fn set_keyboard_layout_overlay(&self, device_id: i32, map: Option<Arc<KeyCharacterMap>>) -> bool {
        let mut state = self.state.lock();
        match state.devices.get_mut(&device_id) {
            Some(device) => {
                device.overlay = map;
                true
            }
            None => false,
        }
    }

    fn vibrate(&self, device_id: i32, element: &VibrationElement) {
        let on = element.is_on();
        self.with_device_mut(device_id, |d| d.vibrating = on);
    }

    fn cancel_vibrate(&self, device_id: i32) {
        self.with_device_mut(device_id, |d| d.vibrating = false);
    }

    fn request_reopen_devices(&self) {
        self.state.lock().reopen_requested = true;
        self.wake();
    }

    fn wake(&self) {
        self.state.lock().awoken = true;
        self.ready.notify_all();
    }

    fn dump(&self) -> String {
        let state = self.state.lock();
        let mut out = String::from("Fake Event Hub State:\n");
        for (id, device) in &state.devices {
            out.push_str(&format!("  {}: {} classes={}\n", id, device.identifier.name, device.classes));
        }
        out
    }

    fn monitor(&self) {
        drop(self.state.lock());
    }

    fn is_device_enabled(&self, device_id: i32) -> bool {
        self.query(device_id, false, |d| d.enabled)
    }

    fn enable_device(&self, device_id: i32) -> HubResult<()> {
        let mut state = self.state.lock();
        let device = state
            .devices
            .get_mut(&device_id)
            .ok_or(HubError::UnknownDevice(device_id))?;
        device.enabled = true;
        Ok(())
    }

    fn disable_device(&self, device_id: i32) -> HubResult<()> {
        let mut state = self.state.lock();
        let device = state
            .devices
            .get_mut(&device_id)
            .ok_or(HubError::UnknownDevice(device_id))?;
        device.enabled = false;
        Ok(())
    }

    fn add_virtual_device(&self, identifier: InputDeviceIdentifier, classes: InputDeviceClass) -> i32 {
        let id = {
            let mut state = self.state.lock();
            state.next_virtual_id -= 1;
            // Ids from -2 down, clear of the virtual keyboard at -1.
            let id = state.next_virtual_id - 1;
            state.devices.insert(
                id,
                FakeDevice {
                    identifier,
                    classes: classes | InputDeviceClass::VIRTUAL,
                    enabled: true,
                    ..FakeDevice::default()
                },
            );
            id
        };
        self.push(RawEvent::synthetic(monotonic_nanos(), id, DEVICE_ADDED));
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_fill_bitmask_ignores_codes_past_buffer() {
        let mut buffer = [0u32; 2];
        fill_bitmask(&mut buffer, [1u16, 33, 64, 200]);
        assert_eq!(buffer, [0b10, 0b10]);
    }

    #[test]
    fn test_fake_node_reports_spec() {
        let opener = FakeNodeOpener::new();
        let handle = opener.add("/dev/input/event0", FakeDeviceSpec::keyboard("kbd"));
        let node = opener.open_input(Path::new("/dev/input/event0")).unwrap();
        assert_eq!(node.identifier().name, "kbd");
        assert_eq!(handle.open_count(), 1);

        let mut keys = [0u32; 24];
        node.read_bitmask(BitmaskKind::Key, &mut keys).unwrap();
        assert_ne!(keys[0] & (1 << KEY_Q), 0);
        assert!(node.read_abs_info(ABS_X).is_err());
    }

    #[test]
    fn test_unknown_path_is_not_found() {
        let opener = FakeNodeOpener::new();
        let err = opener.open_input(Path::new("/dev/input/event9")).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_injected_records_are_readable_then_eof() {
        let opener = FakeNodeOpener::new();
        let handle = opener.add("/dev/input/event0", FakeDeviceSpec::keyboard("kbd"));
        let mut node = opener.open_input(Path::new("/dev/input/event0")).unwrap();
        handle.press(KEY_A, true).unwrap();

        let mut buffer = [crate::ioctl::empty_input_event(); 8];
        assert_eq!(node.read_events(&mut buffer).unwrap(), 2);
        assert_eq!(buffer[0].code, KEY_A);
        assert_eq!(buffer[1].type_, EV_SYN);

        handle.disconnect();
        assert_eq!(node.read_events(&mut buffer).unwrap(), 0);
    }

    #[test]
    fn test_fake_hub_queues_events_in_order() {
        let hub = FakeEventHub::new();
        hub.add_device(3, "pad", InputDeviceClass::GAMEPAD);
        hub.finish_device_scan();
        hub.enqueue_event(5, 3, EV_KEY as i32, BTN_A as i32, 1);

        let mut buffer = [RawEvent::default(); 2];
        assert_eq!(hub.get_events(0, &mut buffer), 2);
        assert_eq!(buffer[0].event_type, DEVICE_ADDED);
        assert_eq!(buffer[1].event_type, FINISHED_DEVICE_SCAN);
        assert_eq!(hub.get_events(0, &mut buffer), 1);
        assert_eq!(buffer[0].code, BTN_A as i32);
    }

    #[test]
    fn test_fake_hub_disabled_device_reports_unknown() {
        let hub = FakeEventHub::new();
        hub.add_device(1, "kbd", InputDeviceClass::KEYBOARD);
        hub.set_key_code_state(1, 29, KeyState::Down);
        assert_eq!(hub.get_key_code_state(1, 29), KeyState::Down);
        hub.disable_device(1).unwrap();
        assert_eq!(hub.get_key_code_state(1, 29), KeyState::Unknown);
        assert!(matches!(hub.enable_device(9), Err(HubError::UnknownDevice(9))));
    }

    #[test]
    fn test_fake_hub_wake_unblocks_get_events() {
        let hub = Arc::new(FakeEventHub::new());
        let waker = Arc::clone(&hub);
        let start = Instant::now();
        let thread = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            waker.wake();
        });
        let mut buffer = [RawEvent::default(); 4];
        assert_eq!(hub.get_events(5_000, &mut buffer), 0);
        assert!(start.elapsed() < Duration::from_secs(2));
        thread.join().unwrap();
    }

    #[test]
    fn test_fake_hub_removed_device_is_unknown() {
        let hub = FakeEventHub::new();
        hub.add_device(2, "kbd", InputDeviceClass::KEYBOARD);
        hub.set_controller_number(2, 3);
        assert_eq!(hub.get_device_controller_number(2), 3);
        hub.remove_device(2);

        let mut buffer = [RawEvent::default(); 4];
        assert_eq!(hub.get_events(0, &mut buffer), 2);
        assert_eq!((buffer[1].event_type, buffer[1].device_id), (DEVICE_REMOVED, 2));
        assert!(hub.get_device_identifier(2).is_none());
        assert!(hub.get_device_classes(2).is_empty());
        assert_eq!(hub.get_device_controller_number(2), 0);
    }

    #[test]
    fn test_fake_hub_scan_and_switch_state() {
        let hub = FakeEventHub::new();
        hub.add_device(1, "lid", InputDeviceClass::SWITCH);
        hub.set_scan_code_state(1, KEY_POWER as i32, KeyState::Down);
        hub.set_switch_state(1, SW_LID as i32, KeyState::Down);

        assert_eq!(hub.get_scan_code_state(1, KEY_POWER as i32), KeyState::Down);
        assert_eq!(hub.get_scan_code_state(1, KEY_A as i32), KeyState::Up);
        assert_eq!(hub.get_switch_state(1, SW_LID as i32), KeyState::Down);

        hub.disable_device(1).unwrap();
        assert_eq!(hub.get_scan_code_state(1, KEY_POWER as i32), KeyState::Unknown);
        assert_eq!(hub.get_switch_state(1, SW_LID as i32), KeyState::Unknown);
        assert_eq!(hub.get_switch_state(7, SW_LID as i32), KeyState::Unknown);
    }

    #[test]
    fn test_fake_hub_axes_and_properties() {
        let hub = FakeEventHub::new();
        hub.add_device(4, "touch", InputDeviceClass::TOUCH);
        let info = RawAbsoluteAxisInfo {
            valid: true,
            min_value: 0,
            max_value: 1023,
            flat: 0,
            fuzz: 2,
            resolution: 8,
        };
        hub.add_absolute_axis(4, ABS_X as i32, info);
        hub.set_absolute_axis_value(4, ABS_X as i32, 512);
        hub.add_relative_axis(4, REL_X as i32);
        hub.add_input_property(4, INPUT_PROP_DIRECT as i32);

        assert_eq!(hub.get_absolute_axis_info(4, ABS_X as i32), Some(info));
        assert_eq!(hub.get_absolute_axis_info(4, ABS_Y as i32), None);
        assert_eq!(hub.get_absolute_axis_value(4, ABS_X as i32), Some(512));
        assert!(hub.has_relative_axis(4, REL_X as i32));
        assert!(hub.has_input_property(4, INPUT_PROP_DIRECT as i32));
        assert!(!hub.has_input_property(4, 0));

        hub.disable_device(4).unwrap();
        assert_eq!(hub.get_absolute_axis_value(4, ABS_X as i32), None);
        assert_eq!(hub.get_absolute_axis_info(4, ABS_X as i32), Some(info));
    }

    #[test]
    fn test_fake_hub_key_and_axis_mapping() {
        let hub = FakeEventHub::new();
        hub.add_device(1, "pad", InputDeviceClass::GAMEPAD);
        hub.add_key(1, BTN_A as i32, crate::keycodes::KEYCODE_BUTTON_A, 0);
        hub.add_axis_mapping(1, ABS_X as i32, AxisInfo::normal(0));

        let mapped = hub.map_key(1, BTN_A as i32, 0, 0x10).unwrap();
        assert_eq!(mapped.key_code, crate::keycodes::KEYCODE_BUTTON_A);
        assert_eq!(mapped.meta_state, 0x10);
        assert!(matches!(hub.map_key(1, BTN_B as i32, 0, 0), Err(HubError::NotMapped { .. })));
        assert!(matches!(hub.map_key(8, BTN_A as i32, 0, 0), Err(HubError::UnknownDevice(8))));
        assert_eq!(hub.map_axis(1, ABS_X as i32).unwrap(), AxisInfo::normal(0));
        assert!(matches!(hub.map_axis(1, ABS_Y as i32), Err(HubError::NotMapped { .. })));

        assert!(hub.has_scan_code(1, BTN_A as i32));
        let mut flags = [false, false];
        let codes = [crate::keycodes::KEYCODE_BUTTON_A, crate::keycodes::KEYCODE_BUTTON_B];
        assert!(hub.mark_supported_key_codes(1, &codes, &mut flags));
        assert_eq!(flags, [true, false]);
    }

    #[test]
    fn test_fake_hub_configuration_and_character_maps() {
        use crate::keymap::KeyboardType;

        let hub = FakeEventHub::new();
        hub.add_device(1, "kbd", InputDeviceClass::KEYBOARD);
        assert!(hub.get_configuration(1).is_none());
        assert!(hub.get_key_character_map(1).is_none());

        let mut properties = PropertyMap::new();
        properties.add_property("keyboard.layout", "qwerty");
        hub.set_configuration(1, properties);
        let configuration = hub.get_configuration(1).unwrap();
        assert_eq!(configuration.get_string("keyboard.layout"), Some("qwerty"));

        hub.set_key_character_map(1, Arc::new(KeyCharacterMap::new(KeyboardType::Full)));
        let overlay = Arc::new(KeyCharacterMap::new(KeyboardType::Alpha));
        assert!(hub.set_keyboard_layout_overlay(1, Some(Arc::clone(&overlay))));
        assert!(!hub.set_keyboard_layout_overlay(2, None));
        assert!(hub.overlay(1).is_some_and(|o| Arc::ptr_eq(&o, &overlay)));
        // The base keyboard type survives the overlay.
        assert_eq!(hub.get_key_character_map(1).unwrap().keyboard_type(), KeyboardType::Full);
    }

    #[test]
    fn test_fake_hub_leds_vibration_and_virtual_keys() {
        let hub = FakeEventHub::new();
        hub.add_device(1, "pad", InputDeviceClass::GAMEPAD);
        hub.add_led(1, crate::keycodes::LED_NUM_LOCK, false);
        hub.set_led_state(1, crate::keycodes::LED_NUM_LOCK, true);
        assert!(hub.has_led(1, crate::keycodes::LED_NUM_LOCK));
        assert_eq!(hub.led_state(1, crate::keycodes::LED_NUM_LOCK), Some(true));
        hub.set_led_state(1, 5, true);
        assert_eq!(hub.led_state(1, 5), None);

        hub.vibrate(1, &VibrationElement::new(Duration::from_millis(20), &[255]));
        assert!(hub.is_vibrating(1));
        hub.cancel_vibrate(1);
        assert!(!hub.is_vibrating(1));

        let key = VirtualKeyDefinition {
            scan_code: 158,
            center_x: 100,
            center_y: 1900,
            width: 80,
            height: 60,
        };
        hub.add_virtual_key_definition(1, key);
        assert_eq!(hub.get_virtual_key_definitions(1), vec![key]);
    }

    #[test]
    fn test_fake_hub_video_frames_are_consumed_once() {
        let hub = FakeEventHub::new();
        hub.add_device(1, "touch", InputDeviceClass::TOUCH);
        let frame = TouchVideoFrame {
            height: 1,
            width: 2,
            data: vec![3, 4],
            timestamp: 9,
        };
        hub.add_video_frames(1, vec![frame.clone()]);
        assert_eq!(hub.get_video_frames(1), vec![frame]);
        assert!(hub.get_video_frames(1).is_empty());
        assert!(hub.get_video_frames(6).is_empty());
    }

    #[test]
    fn test_fake_hub_control_requests_are_recorded() {
        let hub = FakeEventHub::new();
        hub.set_excluded_devices(&["Power Button".to_string()]);
        assert_eq!(hub.excluded_devices(), vec!["Power Button"]);

        hub.request_reopen_devices();
        assert!(hub.reopen_requested());
        let mut buffer = [RawEvent::default(); 1];
        assert_eq!(hub.get_events(1_000, &mut buffer), 0);

        let first = hub.add_virtual_device(InputDeviceIdentifier::named("Remote"), InputDeviceClass::KEYBOARD);
        let second = hub.add_virtual_device(InputDeviceIdentifier::named("Stylus"), InputDeviceClass::EXTERNAL_STYLUS);
        assert_eq!((first, second), (-2, -3));
        assert!(hub.get_device_classes(first).contains(InputDeviceClass::VIRTUAL));
        assert!(hub.dump().contains("Remote"));
    }
}
