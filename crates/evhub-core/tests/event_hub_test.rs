// Evhub Event Hub Integration Tests
//
// These tests drive the real hub: inotify on a temporary device directory,
// epoll over socket-backed fake nodes, and the wake pipe.
//
// Run with: cargo test --test event_hub_test

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use evhub_core::codes::*;
use evhub_core::keycodes::{KEYCODE_A, KEYCODE_BUTTON_A, LED_CAPS_LOCK};
use evhub_core::keymap::{KeyMap, KeyboardType};
use evhub_core::testing::{FakeDeviceSpec, FakeNodeHandle, FakeNodeOpener, StaticConfigLoader};
use evhub_core::{
    DeviceConfig, EventHub, EventHubInterface, HubError, HubSettings, InputDeviceClass, InputDeviceIdentifier,
    KeyCharacterMap, KeyLayoutMap, KeyState, PropertyMap, RawAbsoluteAxisInfo, RawEvent, VibrationElement,
    DEVICE_ADDED, DEVICE_REMOVED, FINISHED_DEVICE_SCAN,
};
use tempfile::TempDir;

// =========================================================================
// Test Helpers
// =========================================================================

const WAIT_LIMIT: Duration = Duration::from_secs(5);

struct Harness {
    dir: TempDir,
    opener: FakeNodeOpener,
    hub: Arc<EventHub>,
}

impl Harness {
    fn start(devices: &[(&str, FakeDeviceSpec)]) -> (Self, Vec<FakeNodeHandle>) {
        Self::start_with(devices, StaticConfigLoader::new(), |_| {})
    }

    /// Plug `devices` before the hub exists, then build it.
    fn start_with(
        devices: &[(&str, FakeDeviceSpec)],
        loader: StaticConfigLoader,
        tweak: impl FnOnce(&mut HubSettings),
    ) -> (Self, Vec<FakeNodeHandle>) {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("input")).unwrap();
        fs::create_dir(dir.path().join("video")).unwrap();

        let mut settings = HubSettings::new();
        settings.input_dir = dir.path().join("input");
        settings.video_dir = dir.path().join("video");
        settings.device_config_dirs = Vec::new();
        settings.virtual_keyboard = false;
        tweak(&mut settings);

        let opener = FakeNodeOpener::new();
        let handles = devices
            .iter()
            .map(|(name, spec)| {
                let path = dir.path().join("input").join(name);
                let handle = opener.add(&path, spec.clone());
                fs::write(&path, b"").unwrap();
                handle
            })
            .collect();

        let hub = EventHub::with_backends(&settings, Box::new(opener.clone()), Box::new(loader)).unwrap();
        (
            Self {
                dir,
                opener,
                hub: Arc::new(hub),
            },
            handles,
        )
    }

    fn node_path(&self, name: &str) -> PathBuf {
        self.dir.path().join("input").join(name)
    }

    fn plug(&self, name: &str, spec: FakeDeviceSpec) -> FakeNodeHandle {
        let path = self.node_path(name);
        let handle = self.opener.add(&path, spec);
        fs::write(&path, b"").unwrap();
        handle
    }

    fn unplug(&self, name: &str) {
        let path = self.node_path(name);
        fs::remove_file(&path).unwrap();
        self.opener.remove(&path);
    }

    fn poll(&self, timeout_millis: i32) -> Vec<RawEvent> {
        let mut buffer = [RawEvent::default(); 32];
        let count = self.hub.get_events(timeout_millis, &mut buffer);
        buffer[..count].to_vec()
    }

    /// Keep polling until `done` holds for everything collected so far.
    fn collect_until(&self, done: impl Fn(&[RawEvent]) -> bool) -> Vec<RawEvent> {
        let deadline = Instant::now() + WAIT_LIMIT;
        let mut events = Vec::new();
        while !done(&events) {
            assert!(Instant::now() < deadline, "gave up waiting, collected {:?}", events);
            events.extend(self.poll(200));
        }
        events
    }

    fn until_finished(&self) -> Vec<RawEvent> {
        self.collect_until(|events| events.iter().any(|e| e.event_type == FINISHED_DEVICE_SCAN))
    }
}

fn kinds(events: &[RawEvent]) -> Vec<(i32, i32)> {
    events.iter().map(|e| (e.event_type, e.device_id)).collect()
}

fn built_in_keyboard_config() -> DeviceConfig {
    let mut properties = PropertyMap::new();
    properties.add_property("keyboard.builtIn", "1");
    DeviceConfig {
        configuration: Some(properties),
        key_map: KeyMap {
            key_character_map: Some(Arc::new(KeyCharacterMap::new(KeyboardType::Full))),
            ..KeyMap::default()
        },
        ..DeviceConfig::default()
    }
}

fn touchscreen(name: &str) -> FakeDeviceSpec {
    let axis = RawAbsoluteAxisInfo {
        valid: true,
        min_value: 0,
        max_value: 4095,
        flat: 0,
        fuzz: 0,
        resolution: 10,
    };
    FakeDeviceSpec::new(name)
        .with_keys(&[BTN_TOUCH])
        .with_abs(ABS_MT_POSITION_X, axis)
        .with_abs(ABS_MT_POSITION_Y, axis)
}

// =========================================================================
// Discovery
// =========================================================================

#[test]
fn test_initial_scan_reports_devices_then_finished() {
    let (h, _) = Harness::start(&[
        ("event0", FakeDeviceSpec::keyboard("USB Keyboard")),
        ("event1", FakeDeviceSpec::mouse("USB Mouse")),
    ]);

    let events = h.poll(0);
    assert_eq!(
        kinds(&events),
        vec![(DEVICE_ADDED, 1), (DEVICE_ADDED, 2), (FINISHED_DEVICE_SCAN, 0)]
    );
    assert_eq!(h.hub.get_device_identifier(1).unwrap().name, "USB Keyboard");
    assert!(h.hub.get_device_classes(1).contains(InputDeviceClass::KEYBOARD));
    assert!(h.hub.get_device_classes(2).contains(InputDeviceClass::CURSOR));
    assert!(h.hub.has_relative_axis(2, REL_WHEEL as i32));
    assert!(!h.hub.has_relative_axis(1, REL_WHEEL as i32));

    // Nothing further without a change.
    assert!(h.poll(50).is_empty());
}

#[test]
fn test_empty_directory_still_finishes_scan() {
    let (h, _) = Harness::start(&[]);
    assert_eq!(kinds(&h.poll(0)), vec![(FINISHED_DEVICE_SCAN, 0)]);
}

#[test]
fn test_virtual_keyboard_is_reported() {
    let (h, _) = Harness::start_with(&[], StaticConfigLoader::new(), |s| s.virtual_keyboard = true);

    let events = h.poll(0);
    assert_eq!(kinds(&events), vec![(DEVICE_ADDED, -1), (FINISHED_DEVICE_SCAN, 0)]);
    let classes = h.hub.get_device_classes(-1);
    assert!(classes.contains(InputDeviceClass::KEYBOARD | InputDeviceClass::VIRTUAL));
    assert_eq!(h.hub.get_scan_code_state(-1, KEY_A as i32), KeyState::Unknown);
}

#[test]
fn test_built_in_keyboard_reports_as_id_zero() {
    let loader = StaticConfigLoader::new().with("AT Translated Set 2 keyboard", built_in_keyboard_config());
    let (h, _) = Harness::start_with(
        &[("event0", FakeDeviceSpec::keyboard("AT Translated Set 2 keyboard"))],
        loader,
        |_| {},
    );

    assert_eq!(kinds(&h.poll(0)), vec![(DEVICE_ADDED, 0), (FINISHED_DEVICE_SCAN, 0)]);
    assert_eq!(
        h.hub.get_device_identifier(0).unwrap().name,
        "AT Translated Set 2 keyboard"
    );
    assert!(h.hub.get_key_character_map(0).is_some());

    h.unplug("event0");
    let events = h.until_finished();
    assert_eq!(kinds(&events), vec![(DEVICE_REMOVED, 0), (FINISHED_DEVICE_SCAN, 0)]);
    assert!(h.hub.get_device_classes(0).is_empty());
}

#[test]
fn test_excluded_devices_are_skipped() {
    let (h, handles) = Harness::start_with(
        &[
            ("event0", FakeDeviceSpec::keyboard("Power Button")),
            ("event1", FakeDeviceSpec::keyboard("USB Keyboard")),
        ],
        StaticConfigLoader::new(),
        |s| s.excluded = vec!["Power Button".to_string()],
    );
    assert_eq!(kinds(&h.poll(0)), vec![(DEVICE_ADDED, 1), (FINISHED_DEVICE_SCAN, 0)]);
    assert_eq!(h.hub.get_device_identifier(1).unwrap().name, "USB Keyboard");

    let path = h.node_path("event2");
    h.hub.set_excluded_devices(&[path.display().to_string()]);
    h.plug("event2", FakeDeviceSpec::mouse("Tablet Mouse"));
    let events = h.until_finished();
    assert!(events.iter().all(|e| e.event_type != DEVICE_ADDED), "{:?}", events);

    // The power button was turned away once and stays that way until it is replugged.
    assert_eq!(handles[0].open_count(), 1);
    assert!(h.hub.get_device_identifier(2).is_none());
}

#[test]
fn test_device_without_classes_is_dropped() {
    let (h, handles) = Harness::start(&[("event0", FakeDeviceSpec::new("Lonely Accelerometer"))]);
    assert_eq!(kinds(&h.poll(0)), vec![(FINISHED_DEVICE_SCAN, 0)]);
    assert_eq!(handles[0].open_count(), 1);
}

#[test]
fn test_dropped_node_is_not_reopened_until_replugged() {
    let (h, handles) = Harness::start(&[("event0", FakeDeviceSpec::new("Lonely Accelerometer"))]);
    assert_eq!(kinds(&h.poll(0)), vec![(FINISHED_DEVICE_SCAN, 0)]);

    // Unrelated directory churn rescans without touching the dropped node.
    fs::write(h.dir.path().join("input").join("mice"), b"").unwrap();
    assert_eq!(kinds(&h.until_finished()), vec![(FINISHED_DEVICE_SCAN, 0)]);
    assert_eq!(handles[0].open_count(), 1);

    // Its removal is silent, and a new node at the same path is opened.
    h.unplug("event0");
    assert_eq!(kinds(&h.until_finished()), vec![(FINISHED_DEVICE_SCAN, 0)]);
    let replugged = h.plug("event0", FakeDeviceSpec::keyboard("USB Keyboard"));
    // Id 1 went to the accelerometer when it was first opened.
    assert_eq!(kinds(&h.until_finished()), vec![(DEVICE_ADDED, 2), (FINISHED_DEVICE_SCAN, 0)]);
    assert_eq!(replugged.open_count(), 1);
}

// =========================================================================
// Hot-plug
// =========================================================================

#[test]
fn test_hotplug_add_and_remove() {
    let (h, _) = Harness::start(&[]);
    assert_eq!(kinds(&h.poll(0)), vec![(FINISHED_DEVICE_SCAN, 0)]);

    h.plug("event3", FakeDeviceSpec::keyboard("Hotplug Keyboard"));
    let added = h.until_finished();
    assert_eq!(kinds(&added), vec![(DEVICE_ADDED, 1), (FINISHED_DEVICE_SCAN, 0)]);
    assert!(added.iter().all(|e| e.when > 0));

    h.unplug("event3");
    let removed = h.until_finished();
    assert_eq!(kinds(&removed), vec![(DEVICE_REMOVED, 1), (FINISHED_DEVICE_SCAN, 0)]);
    assert!(h.hub.get_device_identifier(1).is_none());
}

#[test]
fn test_non_matching_file_only_finishes() {
    let (h, _) = Harness::start(&[]);
    h.poll(0);

    fs::write(h.dir.path().join("input").join("mice"), b"").unwrap();
    let events = h.until_finished();
    assert_eq!(kinds(&events), vec![(FINISHED_DEVICE_SCAN, 0)]);
    assert!(h.poll(50).is_empty());
}

#[test]
fn test_end_of_file_removes_device() {
    let (h, handles) = Harness::start(&[("event0", FakeDeviceSpec::keyboard("Flaky Keyboard"))]);
    h.poll(0);

    handles[0].disconnect();
    let events = h.until_finished();
    assert_eq!(kinds(&events), vec![(DEVICE_REMOVED, 1), (FINISHED_DEVICE_SCAN, 0)]);
    assert!(h.hub.get_device_classes(1).is_empty());
}

#[test]
fn test_reopen_reports_removal_then_addition() {
    let (h, handles) = Harness::start(&[("event0", FakeDeviceSpec::keyboard("USB Keyboard"))]);
    h.poll(0);

    h.hub.request_reopen_devices();
    let events = h.until_finished();
    assert_eq!(
        kinds(&events),
        vec![(DEVICE_REMOVED, 1), (DEVICE_ADDED, 2), (FINISHED_DEVICE_SCAN, 0)]
    );
    assert_eq!(handles[0].open_count(), 2);
    assert_eq!(h.hub.get_device_identifier(2).unwrap().name, "USB Keyboard");
}

#[test]
fn test_virtual_device_added_at_runtime() {
    let (h, _) = Harness::start(&[]);
    h.poll(0);

    let id = h
        .hub
        .add_virtual_device(InputDeviceIdentifier::named("Remote"), InputDeviceClass::KEYBOARD);
    let events = h.until_finished();
    assert_eq!(kinds(&events), vec![(DEVICE_ADDED, id), (FINISHED_DEVICE_SCAN, 0)]);
    assert!(h.hub.get_device_classes(id).contains(InputDeviceClass::VIRTUAL));
}

// =========================================================================
// Input
// =========================================================================

#[test]
fn test_records_are_tagged_with_device_and_time() {
    let (h, handles) = Harness::start(&[
        ("event0", FakeDeviceSpec::keyboard("Left Keyboard")),
        ("event1", FakeDeviceSpec::keyboard("Right Keyboard")),
    ]);
    h.poll(0);

    let before = evhub_core::event::monotonic_nanos();
    handles[1].press(KEY_A, true).unwrap();
    let events = h.collect_until(|events| events.len() >= 2);
    assert_eq!(events.len(), 2);

    assert_eq!(events[0].device_id, 2);
    assert_eq!(events[0].event_type, EV_KEY as i32);
    assert_eq!(events[0].code, KEY_A as i32);
    assert_eq!(events[0].value, 1);
    assert!(events[0].when >= before - 1_000);
    assert_eq!(events[1].event_type, EV_SYN as i32);

    assert_eq!(h.hub.get_scan_code_state(2, KEY_A as i32), KeyState::Down);
    assert_eq!(h.hub.get_scan_code_state(1, KEY_A as i32), KeyState::Up);
}

#[test]
fn test_small_buffer_delivers_everything_in_order() {
    let (h, handles) = Harness::start(&[("event0", FakeDeviceSpec::keyboard("USB Keyboard"))]);
    h.poll(0);

    let codes = [KEY_Q, KEY_W, KEY_A, KEY_Z, KEY_ENTER];
    for code in codes {
        handles[0].press(code, true).unwrap();
    }

    let deadline = Instant::now() + WAIT_LIMIT;
    let mut events = Vec::new();
    while events.len() < codes.len() * 2 {
        assert!(Instant::now() < deadline);
        let mut buffer = [RawEvent::default(); 3];
        let count = h.hub.get_events(200, &mut buffer);
        events.extend_from_slice(&buffer[..count]);
    }

    let keys: Vec<i32> = events
        .iter()
        .filter(|e| e.event_type == EV_KEY as i32)
        .map(|e| e.code)
        .collect();
    assert_eq!(keys, codes.iter().map(|&c| c as i32).collect::<Vec<_>>());
}

#[test]
fn test_empty_buffer_returns_nothing() {
    let (h, _) = Harness::start(&[]);
    assert_eq!(h.hub.get_events(0, &mut []), 0);
}

// =========================================================================
// Enable / disable and controllers
// =========================================================================

#[test]
fn test_disable_discards_input_and_keeps_controller_number() {
    let layout = KeyLayoutMap::new().with_key(BTN_A as i32, KEYCODE_BUTTON_A, 0);
    let mut config = DeviceConfig::default();
    config.key_map.key_layout_map = Some(Arc::new(layout));
    let loader = StaticConfigLoader::new().with("Gamepad", config);
    let (h, handles) = Harness::start_with(&[("event0", FakeDeviceSpec::gamepad("Gamepad"))], loader, |_| {});
    h.poll(0);
    assert!(h.hub.get_device_classes(1).contains(InputDeviceClass::JOYSTICK));
    assert_eq!(h.hub.get_device_controller_number(1), 1);
    assert_eq!(h.hub.get_key_code_state(1, KEYCODE_BUTTON_A), KeyState::Up);

    h.hub.disable_device(1).unwrap();
    assert!(!h.hub.is_device_enabled(1));
    assert!(h.hub.get_absolute_axis_info(1, ABS_X as i32).is_some());

    // The button goes down while nobody is listening.
    handles[0].set_key_down(BTN_A, true);
    handles[0].press(BTN_A, true).unwrap();
    assert!(h.poll(100).is_empty());
    assert_eq!(h.hub.get_scan_code_state(1, BTN_A as i32), KeyState::Unknown);
    assert_eq!(h.hub.get_key_code_state(1, KEYCODE_BUTTON_A), KeyState::Unknown);

    h.hub.enable_device(1).unwrap();
    assert!(h.hub.is_device_enabled(1));
    assert_eq!(h.hub.get_device_controller_number(1), 1);
    assert_eq!(h.hub.get_scan_code_state(1, BTN_A as i32), KeyState::Down);
    assert_eq!(h.hub.get_key_code_state(1, KEYCODE_BUTTON_A), KeyState::Down);
    assert_eq!(handles[0].open_count(), 1);
    assert!(h.poll(100).is_empty());

    handles[0].press(BTN_B, true).unwrap();
    let events = h.collect_until(|events| events.len() >= 2);
    assert_eq!(events[0].code, BTN_B as i32);

    assert!(matches!(h.hub.enable_device(42), Err(HubError::UnknownDevice(42))));
}

#[test]
fn test_controller_numbers_are_reused() {
    let (h, _) = Harness::start(&[
        ("event0", FakeDeviceSpec::gamepad("Pad One")),
        ("event1", FakeDeviceSpec::gamepad("Pad Two")),
    ]);
    h.poll(0);
    assert_eq!(h.hub.get_device_controller_number(1), 1);
    assert_eq!(h.hub.get_device_controller_number(2), 2);
    assert_eq!(h.hub.controllers_in_use(), 2);

    h.unplug("event0");
    h.until_finished();
    assert_eq!(h.hub.controllers_in_use(), 1);

    h.plug("event2", FakeDeviceSpec::gamepad("Pad Three"));
    let events = h.until_finished();
    assert_eq!(kinds(&events), vec![(DEVICE_ADDED, 3), (FINISHED_DEVICE_SCAN, 0)]);
    assert_eq!(h.hub.get_device_controller_number(3), 1);
}

// =========================================================================
// Blocking behavior
// =========================================================================

#[test]
fn test_timeout_bounds_the_wait() {
    let (h, _) = Harness::start(&[]);
    h.poll(0);

    let start = Instant::now();
    assert!(h.poll(80).is_empty());
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(70), "returned after {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(2), "returned after {:?}", elapsed);
}

#[test]
fn test_wake_interrupts_infinite_wait() {
    let (h, _) = Harness::start(&[]);
    h.poll(0);

    let hub = Arc::clone(&h.hub);
    let waker = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        hub.wake();
    });

    let start = Instant::now();
    assert!(h.poll(-1).is_empty());
    assert!(start.elapsed() < Duration::from_secs(2));
    waker.join().unwrap();
}

#[test]
fn test_queries_answer_while_get_events_blocks() {
    let (h, _) = Harness::start(&[("event0", FakeDeviceSpec::keyboard("USB Keyboard"))]);
    h.poll(0);

    let hub = Arc::clone(&h.hub);
    let blocked = thread::spawn(move || {
        let mut buffer = [RawEvent::default(); 4];
        hub.get_events(-1, &mut buffer)
    });
    thread::sleep(Duration::from_millis(50));

    let start = Instant::now();
    assert!(h.hub.get_device_classes(1).contains(InputDeviceClass::KEYBOARD));
    h.hub.monitor();
    assert!(start.elapsed() < Duration::from_secs(1));

    h.hub.wake();
    assert_eq!(blocked.join().unwrap(), 0);
}

// =========================================================================
// Queries
// =========================================================================

#[test]
fn test_unknown_device_queries_are_neutral() {
    let (h, _) = Harness::start(&[]);
    h.poll(0);

    assert!(h.hub.get_device_classes(99).is_empty());
    assert!(h.hub.get_device_identifier(99).is_none());
    assert_eq!(h.hub.get_device_controller_number(99), 0);
    assert_eq!(h.hub.get_key_code_state(99, KEYCODE_A), KeyState::Unknown);
    assert!(!h.hub.has_scan_code(99, KEY_A as i32));
    assert!(!h.hub.set_keyboard_layout_overlay(99, None));
    assert!(matches!(h.hub.map_key(99, 30, 0, 0), Err(HubError::UnknownDevice(99))));
    // No built-in keyboard yet, so id 0 is unknown too.
    assert!(h.hub.get_device_identifier(0).is_none());
}

#[test]
fn test_key_mapping_through_layout() {
    let layout = KeyLayoutMap::new().with_key(KEY_A as i32, KEYCODE_A, 0);
    let mut config = DeviceConfig::default();
    config.key_map.key_layout_map = Some(Arc::new(layout));
    let loader = StaticConfigLoader::new().with("USB Keyboard", config);
    let (h, handles) = Harness::start_with(&[("event0", FakeDeviceSpec::keyboard("USB Keyboard"))], loader, |_| {});
    h.poll(0);

    assert!(h.hub.get_device_classes(1).contains(InputDeviceClass::KEYBOARD));
    let mapped = h.hub.map_key(1, KEY_A as i32, 0, 0x1).unwrap();
    assert_eq!((mapped.key_code, mapped.meta_state), (KEYCODE_A, 0x1));
    assert!(matches!(
        h.hub.map_key(1, KEY_ESC as i32, 0, 0),
        Err(HubError::NotMapped { device_id: 1, .. })
    ));

    let mut flags = [false, false];
    assert!(h.hub.mark_supported_key_codes(1, &[KEYCODE_A, 9999], &mut flags));
    assert_eq!(flags, [true, false]);

    handles[0].press(KEY_A, true).unwrap();
    h.collect_until(|events| events.len() >= 2);
    assert_eq!(h.hub.get_key_code_state(1, KEYCODE_A), KeyState::Down);
}

#[test]
fn test_led_and_vibration_reach_the_node() {
    let (h, handles) = Harness::start(&[
        ("event0", FakeDeviceSpec::keyboard("USB Keyboard")),
        ("event1", FakeDeviceSpec::gamepad("Gamepad")),
    ]);
    h.poll(0);

    assert!(h.hub.has_led(1, LED_CAPS_LOCK));
    h.hub.set_led_state(1, LED_CAPS_LOCK, true);
    assert!(handles[0].written_events().contains(&(EV_LED, LED_CAPSL, 1)));

    assert!(h.hub.get_device_classes(2).contains(InputDeviceClass::VIBRATOR));
    h.hub
        .vibrate(2, &VibrationElement::new(Duration::from_millis(30), &[200, 100]));
    assert!(handles[1].written_events().iter().any(|&(t, _, v)| t == EV_FF && v == 1));
    h.hub.cancel_vibrate(2);
    assert!(handles[1].written_events().iter().any(|&(t, _, v)| t == EV_FF && v == 0));
}

#[test]
fn test_keyboard_layout_overlay() {
    let (h, _) = Harness::start(&[("event0", FakeDeviceSpec::keyboard("USB Keyboard"))]);
    h.poll(0);

    assert!(h.hub.get_key_character_map(1).is_none());
    let overlay = Arc::new(KeyCharacterMap::new(KeyboardType::Overlay));
    assert!(h.hub.set_keyboard_layout_overlay(1, Some(overlay)));
    assert!(h.hub.get_key_character_map(1).is_some());
    assert!(h.hub.dump().contains("HaveKeyboardLayoutOverlay: true"));
    assert!(h.hub.set_keyboard_layout_overlay(1, None));
    assert!(h.hub.get_key_character_map(1).is_none());
}

// =========================================================================
// Video and dump
// =========================================================================

#[test]
fn test_video_device_pairs_and_delivers_frames() {
    let (h, _) = Harness::start(&[("event0", touchscreen("sec_touchscreen"))]);
    let video_path = h.dir.path().join("video").join("v4l-touch0");
    let video = h.opener.add_video(&video_path, "sec_touchscreen", 2, 2);
    fs::write(&video_path, b"").unwrap();

    let events = h.until_finished();
    assert_eq!(kinds(&events), vec![(DEVICE_ADDED, 1), (FINISHED_DEVICE_SCAN, 0)]);
    assert!(h.hub.get_device_classes(1).contains(InputDeviceClass::TOUCH_MT));

    // The video node shows up through the video directory watch.
    let deadline = Instant::now() + WAIT_LIMIT;
    while !h.hub.dump().contains("v4l-touch0") {
        assert!(Instant::now() < deadline, "{}", h.hub.dump());
        h.poll(100);
    }

    video.push_frame(vec![1, 2, 3, 4]).unwrap();
    let deadline = Instant::now() + WAIT_LIMIT;
    let frames = loop {
        h.poll(100);
        let frames = h.hub.get_video_frames(1);
        if !frames.is_empty() {
            break frames;
        }
        assert!(Instant::now() < deadline);
    };
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].data, vec![1, 2, 3, 4]);
    assert_eq!((frames[0].height, frames[0].width), (2, 2));
    assert!(h.hub.get_video_frames(1).is_empty());
}

#[test]
fn test_dump_lists_devices() {
    let (h, _) = Harness::start(&[
        ("event0", FakeDeviceSpec::keyboard("USB Keyboard").with_bus(BUS_USB, 0x046d, 0xc31c)),
        ("event1", FakeDeviceSpec::mouse("USB Mouse")),
    ]);
    h.poll(0);

    let dump = h.hub.dump();
    assert!(dump.starts_with("Event Hub State:"));
    assert!(dump.contains("BuiltInKeyboardId: -2"));
    assert!(dump.contains("USB Keyboard"));
    assert!(dump.contains("USB Mouse"));
    assert!(dump.contains(&h.node_path("event1").display().to_string()));
    assert!(dump.contains("EXTERNAL"));
}
