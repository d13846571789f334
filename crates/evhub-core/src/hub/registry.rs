// Evhub Device Registry
// Device table, open/close transitions, descriptors, controller numbers and video pairing

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use log::{debug, info, warn};

use super::{device_token, video_token, HubEnv, BUILT_IN_KEYBOARD_ID, NO_BUILT_IN_KEYBOARD, VIRTUAL_KEYBOARD_ID};
use crate::classes::InputDeviceClass;
use crate::controller::ControllerNumbers;
use crate::device::Device;
use crate::error::{HubError, HubResult};
use crate::ioctl::empty_input_event;
use crate::keymap::{DeviceConfig, KeyboardType};
use crate::node::InputDeviceIdentifier;
use crate::poll::ReadyItem;
use crate::video::TouchVideoDevice;
use crate::watcher::DirectoryWatcher;

/// Device ids handed out to kernel and caller-added devices start here.
const FIRST_DEVICE_ID: i32 = 1;

/// Upper bound on reads used to throw away input queued while disabled.
const MAX_STALE_READS: usize = 64;

/// Everything guarded by the hub lock.
///
/// A device lives in exactly one of `opening`, `devices` or `closing`.
/// `opening` holds devices whose DEVICE_ADDED has not been delivered yet;
/// `closing` holds devices whose DEVICE_REMOVED has not been delivered yet,
/// together with the id that event must carry.
pub(crate) struct HubState {
    pub(super) devices: IndexMap<i32, Device>,
    pub(super) opening: VecDeque<Device>,
    pub(super) closing: VecDeque<(i32, Device)>,
    pub(super) unattached_video: Vec<TouchVideoDevice>,
    pub(super) watcher: DirectoryWatcher,

    // Readiness items from the last wait and how far they have been handled
    pub(super) pending: Vec<ReadyItem>,
    pub(super) pending_index: usize,

    pub(super) need_to_scan: bool,
    pub(super) need_to_reopen: bool,
    pub(super) need_to_send_finished: bool,
    pub(super) pending_inotify: bool,

    pub(super) built_in_keyboard_id: i32,
    next_device_id: i32,
    controller_numbers: ControllerNumbers,
    excluded: Vec<String>,
    /// Nodes that were opened and turned away (excluded or classless). They
    /// are not opened again until they leave the directory listing.
    ignored: Vec<PathBuf>,
}

impl HubState {
    pub(super) fn new(watcher: DirectoryWatcher, excluded: Vec<String>) -> Self {
        Self {
            devices: IndexMap::new(),
            opening: VecDeque::new(),
            closing: VecDeque::new(),
            unattached_video: Vec::new(),
            watcher,
            pending: Vec::new(),
            pending_index: 0,
            need_to_scan: true,
            need_to_reopen: false,
            need_to_send_finished: false,
            pending_inotify: false,
            built_in_keyboard_id: NO_BUILT_IN_KEYBOARD,
            next_device_id: FIRST_DEVICE_ID,
            controller_numbers: ControllerNumbers::new(),
            excluded,
            ignored: Vec::new(),
        }
    }

    // Lookup

    /// Map a caller-facing id to the registry key. Id 0 names the built-in
    /// keyboard, when there is one.
    fn resolve(&self, device_id: i32) -> Option<i32> {
        if device_id == BUILT_IN_KEYBOARD_ID {
            (self.built_in_keyboard_id != NO_BUILT_IN_KEYBOARD).then_some(self.built_in_keyboard_id)
        } else {
            Some(device_id)
        }
    }

    pub(super) fn device(&self, device_id: i32) -> Option<&Device> {
        self.devices.get(&self.resolve(device_id)?)
    }

    pub(super) fn device_mut(&mut self, device_id: i32) -> Option<&mut Device> {
        let id = self.resolve(device_id)?;
        self.devices.get_mut(&id)
    }

    /// The id events for `id` are reported under.
    pub(super) fn external_id(&self, id: i32) -> i32 {
        if id == self.built_in_keyboard_id {
            BUILT_IN_KEYBOARD_ID
        } else {
            id
        }
    }

    fn contains(&self, id: i32) -> bool {
        self.devices.contains_key(&id) || self.opening.iter().any(|d| d.id() == id)
    }

    fn has_descriptor(&self, descriptor: &str) -> bool {
        self.devices
            .values()
            .chain(self.opening.iter())
            .any(|d| d.identifier().descriptor == descriptor)
    }

    fn input_paths(&self) -> Vec<PathBuf> {
        self.devices
            .values()
            .chain(self.opening.iter())
            .filter(|d| d.has_fd())
            .map(|d| d.path().to_path_buf())
            .chain(self.ignored.iter().cloned())
            .collect()
    }

    fn video_paths(&self) -> Vec<PathBuf> {
        let attached = self
            .devices
            .values()
            .chain(self.opening.iter())
            .filter_map(|d| d.video());
        self.unattached_video
            .iter()
            .chain(attached)
            .map(|v| v.path().to_path_buf())
            .collect()
    }

    pub(super) fn set_excluded(&mut self, excluded: Vec<String>) {
        self.excluded = excluded;
    }

    fn is_excluded(&self, name: &str, path: &Path) -> bool {
        self.excluded
            .iter()
            .any(|entry| entry == name || Path::new(entry) == path)
    }

    fn allocate_id(&mut self) -> i32 {
        let id = self.next_device_id;
        self.next_device_id += 1;
        id
    }

    /// Compute the descriptor, bumping the nonce until it is unique among
    /// devices that have no unique id of their own.
    fn assign_descriptor(&self, identifier: &mut InputDeviceIdentifier) {
        identifier.nonce = 0;
        identifier.generate_descriptor();
        if identifier.unique_id.is_empty() {
            while self.has_descriptor(&identifier.descriptor) {
                identifier.nonce = identifier.nonce.wrapping_add(1);
                identifier.generate_descriptor();
            }
        }
    }

    fn configure(device: &mut Device, env: &HubEnv) {
        let config = match env.loader.load(device.identifier()) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Could not load configuration for '{}', using defaults: {}",
                    device.identifier().name,
                    e
                );
                DeviceConfig::default()
            }
        };
        device.apply_config(config);
    }

    // Scanning

    /// Bring the registry in line with the node directories. Always ends
    /// with a FINISHED_DEVICE_SCAN being owed to the caller.
    pub(super) fn scan_devices(&mut self, env: &HubEnv) {
        let known = self.input_paths();
        match env.scanner.scan_inputs(&known) {
            Ok(delta) => {
                for path in &delta.removed {
                    if let Some(index) = self.ignored.iter().position(|p| p == path) {
                        self.ignored.swap_remove(index);
                        continue;
                    }
                    self.close_device_by_path(path, env);
                }
                for path in &delta.added {
                    self.open_device(path, env);
                }
            }
            Err(e) => warn!("scan dir failed for {}: {}", env.scanner.input_dir.display(), e),
        }

        let known = self.video_paths();
        match env.scanner.scan_videos(&known) {
            Ok(delta) => {
                for path in &delta.removed {
                    self.close_video_device(path, env);
                }
                for path in &delta.added {
                    self.open_video_device(path, env);
                }
            }
            Err(e) => warn!("scan video dir failed for {}: {}", env.scanner.video_dir.display(), e),
        }

        if env.virtual_keyboard && !self.contains(VIRTUAL_KEYBOARD_ID) {
            self.create_virtual_keyboard(env);
        }
        self.need_to_send_finished = true;
    }

    /// Consume directory notifications and rescan. The payloads are only
    /// logged; the listing is the source of truth.
    pub(super) fn read_notify(&mut self, env: &HubEnv) {
        match self.watcher.drain() {
            Ok(changes) => {
                for change in &changes {
                    debug!(
                        "{} {}",
                        if change.created { "Created" } else { "Removed" },
                        change.dir.join(&change.name).display()
                    );
                }
            }
            Err(e) => warn!("could not get inotify events: {}", e),
        }
        self.scan_devices(env);
    }

    // Opening

    pub(super) fn open_device(&mut self, path: &Path, env: &HubEnv) {
        let node = match env.opener.open_input(path) {
            Ok(node) => node,
            Err(e) => {
                warn!("could not open {}: {}", path.display(), e);
                return;
            }
        };

        let identifier = node.identifier();
        if self.is_excluded(&identifier.name, path) {
            info!(
                "ignoring event device {} '{}' because it is excluded",
                path.display(),
                identifier.name
            );
            self.ignored.push(path.to_path_buf());
            return;
        }

        let id = self.allocate_id();
        let mut device = Device::open(id, path, identifier, node);
        self.assign_descriptor(device.identifier_mut());
        Self::configure(&mut device, env);

        let classes = device.classify();
        if classes.is_empty() {
            info!(
                "Dropping device: id={}, path='{}', name='{}'",
                id,
                path.display(),
                device.identifier().name
            );
            self.ignored.push(path.to_path_buf());
            return;
        }

        if classes.contains(InputDeviceClass::KEYBOARD)
            && self.built_in_keyboard_id == NO_BUILT_IN_KEYBOARD
            && is_eligible_built_in_keyboard(&device)
        {
            self.built_in_keyboard_id = id;
        }

        if classes.intersects(InputDeviceClass::GAMEPAD | InputDeviceClass::JOYSTICK) {
            let number = self.controller_numbers.allocate(&device.identifier().name);
            device.set_controller_number(number);
        }

        if let Some(index) = self
            .unattached_video
            .iter()
            .position(|v| v.name() == device.identifier().name)
        {
            let video = self.unattached_video.remove(index);
            info!("Attaching video device {} to {}", video, device.identifier().name);
            device.attach_video(video);
        }

        let key_map = device.key_map();
        info!(
            "New device: id={}, fd={}, path='{}', name='{}', classes={}, configuration='{}', keyLayout='{}', keyCharacterMap='{}', builtinKeyboard={}",
            id,
            device.raw_fd().unwrap_or(-1),
            path.display(),
            device.identifier().name,
            classes,
            display_source(device.config().configuration_file.as_deref()),
            display_source(key_map.key_layout_file.as_deref()),
            display_source(key_map.key_character_map_file.as_deref()),
            id == self.built_in_keyboard_id
        );
        self.opening.push_back(device);
    }

    fn create_virtual_keyboard(&mut self, env: &HubEnv) {
        let mut identifier = InputDeviceIdentifier::named("Virtual");
        identifier.unique_id = "<virtual>".to_string();
        self.assign_descriptor(&mut identifier);

        let classes = InputDeviceClass::KEYBOARD
            | InputDeviceClass::ALPHAKEY
            | InputDeviceClass::DPAD
            | InputDeviceClass::VIRTUAL;
        let mut device = Device::new_virtual(VIRTUAL_KEYBOARD_ID, identifier, classes);
        Self::configure(&mut device, env);
        debug!("Created virtual keyboard with descriptor {}", device.identifier().descriptor);
        self.opening.push_back(device);
    }

    pub(super) fn add_virtual_device(
        &mut self,
        mut identifier: InputDeviceIdentifier,
        classes: InputDeviceClass,
        env: &HubEnv,
    ) -> i32 {
        let id = self.allocate_id();
        self.assign_descriptor(&mut identifier);
        let mut device = Device::new_virtual(id, identifier, classes);
        Self::configure(&mut device, env);
        if classes.intersects(InputDeviceClass::GAMEPAD | InputDeviceClass::JOYSTICK) {
            let number = self.controller_numbers.allocate(&device.identifier().name);
            device.set_controller_number(number);
        }
        info!(
            "New virtual device: id={}, name='{}', classes={}",
            id,
            device.identifier().name,
            device.classes()
        );
        self.opening.push_back(device);
        id
    }

    /// Move a reported device into the active table and start polling it.
    pub(super) fn activate(&mut self, mut device: Device, env: &HubEnv) {
        if device.is_enabled() {
            register_device(&mut device, env);
        }
        self.devices.insert(device.id(), device);
    }

    fn open_video_device(&mut self, path: &Path, env: &HubEnv) {
        let node = match env.opener.open_video(path) {
            Ok(node) => node,
            Err(e) => {
                warn!("could not open video device {}: {}", path.display(), e);
                return;
            }
        };
        let video = TouchVideoDevice::new(path, node);
        info!("Opened video device {}", video);

        let name = video.name().to_string();
        let matches = |d: &Device| d.video().is_none() && d.identifier().name == name;
        if let Some(device) = self.devices.values_mut().find(|d| matches(d)) {
            if device.is_registered() {
                if let Err(e) = env.poller.add(video.raw_fd(), video_token(device.id())) {
                    warn!("Could not add video fd to epoll instance: {} ({})", video, e);
                }
            }
            device.attach_video(video);
            return;
        }
        if let Some(device) = self.opening.iter_mut().find(|d| matches(d)) {
            device.attach_video(video);
            return;
        }
        self.unattached_video.push(video);
    }

    // Closing

    /// Retire a device. A device whose DEVICE_ADDED was never delivered is
    /// dropped silently; any other one owes the caller a DEVICE_REMOVED.
    pub(super) fn close_device(&mut self, id: i32, env: &HubEnv) {
        if let Some(mut device) = self.devices.shift_remove(&id) {
            info!(
                "Removed device: path={} name={} id={} fd={:?} classes={}",
                device.path().display(),
                device.identifier().name,
                id,
                device.raw_fd(),
                device.classes()
            );
            let external_id = self.external_id(id);
            // Epoll must forget the fd before the fd can be released.
            unregister_device(&mut device, env);
            self.retire(&mut device);
            self.closing.push_back((external_id, device));
        } else if let Some(index) = self.opening.iter().position(|d| d.id() == id) {
            if let Some(mut device) = self.opening.remove(index) {
                debug!("Device {} went away before it was reported", device.path().display());
                self.retire(&mut device);
            }
        }
    }

    fn retire(&mut self, device: &mut Device) {
        if device.id() == self.built_in_keyboard_id {
            warn!(
                "built-in keyboard device {} ({}) is closing! the apps will not like this",
                device.path().display(),
                device.id()
            );
            self.built_in_keyboard_id = NO_BUILT_IN_KEYBOARD;
        }
        self.controller_numbers.release(device.controller_number());
        device.release();
        if let Some(video) = device.take_video() {
            debug!("Closing video device {}", video);
        }
    }

    fn close_device_by_path(&mut self, path: &Path, env: &HubEnv) {
        let id = self
            .devices
            .values()
            .chain(self.opening.iter())
            .find(|d| d.has_fd() && d.path() == path)
            .map(|d| d.id());
        match id {
            Some(id) => self.close_device(id, env),
            None => debug!("Remove device: {} not found, device may already have been removed", path.display()),
        }
    }

    fn close_video_device(&mut self, path: &Path, env: &HubEnv) {
        if let Some(index) = self.unattached_video.iter().position(|v| v.path() == path) {
            let video = self.unattached_video.remove(index);
            info!("Removed unattached video device {}", video);
            return;
        }
        let owner = self
            .devices
            .values_mut()
            .chain(self.opening.iter_mut())
            .find(|d| d.video().map(|v| v.path() == path).unwrap_or(false));
        if let Some(device) = owner {
            if device.is_registered() {
                if let Some(video) = device.video() {
                    if let Err(e) = env.poller.remove(video.raw_fd()) {
                        warn!("Could not remove video fd from epoll instance: {} ({})", video, e);
                    }
                }
            }
            if let Some(video) = device.take_video() {
                info!("Removed video device {} from {}", video, device.identifier().name);
            }
        }
    }

    /// Close every device so the next scan rediscovers them.
    pub(super) fn close_all_devices(&mut self, env: &HubEnv) {
        self.unattached_video.clear();
        self.ignored.clear();
        let ids: Vec<i32> = self.devices.keys().copied().collect();
        for id in ids {
            self.close_device(id, env);
        }
        while let Some(mut device) = self.opening.pop_front() {
            self.retire(&mut device);
        }
    }

    // Enable / disable

    pub(super) fn enable_device(&mut self, device_id: i32, env: &HubEnv) -> HubResult<()> {
        let device = self
            .device_mut(device_id)
            .ok_or(HubError::UnknownDevice(device_id))?;
        if device.is_enabled() {
            warn!("Duplicate call to enable_device, input device {} already enabled", device_id);
            return Ok(());
        }
        device.set_enabled(true);
        discard_stale_input(device);
        device.refresh_state();
        register_device(device, env);
        Ok(())
    }

    pub(super) fn disable_device(&mut self, device_id: i32, env: &HubEnv) -> HubResult<()> {
        let device = self
            .device_mut(device_id)
            .ok_or(HubError::UnknownDevice(device_id))?;
        if !device.is_enabled() {
            warn!("Duplicate call to disable_device, input device {} already disabled", device_id);
            return Ok(());
        }
        unregister_device(device, env);
        device.set_enabled(false);
        Ok(())
    }

    pub(super) fn controller_numbers(&self) -> &ControllerNumbers {
        &self.controller_numbers
    }
}

/// A keyboard is the built-in one when it has a real character map, is not
/// external, and either says so in its configuration or is a `-keypad`.
fn is_eligible_built_in_keyboard(device: &Device) -> bool {
    let Some(kcm) = &device.key_map().key_character_map else {
        return false;
    };
    if kcm.keyboard_type() == KeyboardType::SpecialFunction || device.is_external() {
        return false;
    }
    let built_in = device
        .configuration()
        .and_then(|c| c.get_bool("keyboard.builtIn"))
        .unwrap_or(false);
    built_in || device.identifier().name.contains("-keypad")
}

fn display_source(path: Option<&Path>) -> String {
    path.map(|p| p.display().to_string()).unwrap_or_default()
}

pub(super) fn register_device(device: &mut Device, env: &HubEnv) {
    let Some(fd) = device.raw_fd() else {
        return;
    };
    if let Err(e) = env.poller.add(fd, device_token(device.id())) {
        warn!("Could not add device fd to epoll instance: {} ({})", device.path().display(), e);
        return;
    }
    if let Some(video) = device.video() {
        if let Err(e) = env.poller.add(video.raw_fd(), video_token(device.id())) {
            warn!("Could not add video fd to epoll instance: {} ({})", video, e);
        }
    }
    device.set_registered(true);
}

pub(super) fn unregister_device(device: &mut Device, env: &HubEnv) {
    if !device.is_registered() {
        return;
    }
    if let Some(video) = device.video() {
        if let Err(e) = env.poller.remove(video.raw_fd()) {
            warn!("Could not remove video fd from epoll instance: {} ({})", video, e);
        }
    }
    if let Some(fd) = device.raw_fd() {
        if let Err(e) = env.poller.remove(fd) {
            warn!("Could not remove device fd from epoll instance: {} ({})", device.path().display(), e);
        }
    }
    device.set_registered(false);
}

// Input that arrived while the device was disabled must not be reported.
fn discard_stale_input(device: &mut Device) {
    let Some(node) = device.node_mut() else {
        return;
    };
    let mut buffer = [empty_input_event(); 16];
    for _ in 0..MAX_STALE_READS {
        match node.read_events(&mut buffer) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
    }
}
