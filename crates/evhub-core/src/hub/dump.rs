// Evhub Dump
// Human readable snapshot of the device table for diagnostics

use std::fmt::Write;
use std::path::Path;

use super::registry::HubState;
use super::EventHub;
use crate::codes::bus_name;
use crate::device::Device;

fn source(path: Option<&Path>) -> String {
    path.map(|p| p.display().to_string()).unwrap_or_default()
}

fn dump_device(out: &mut String, id: i32, device: &Device) {
    let identifier = device.identifier();
    let key_map = device.key_map();
    let _ = writeln!(out, "    {}: {}", id, identifier.name);
    let _ = writeln!(out, "      Classes: {}", device.classes());
    let _ = writeln!(out, "      Path: {}", device.path().display());
    let _ = writeln!(out, "      Enabled: {}", device.is_enabled());
    let _ = writeln!(out, "      Descriptor: {}", identifier.descriptor);
    let _ = writeln!(out, "      Location: {}", identifier.location);
    let _ = writeln!(out, "      ControllerNumber: {}", device.controller_number());
    let _ = writeln!(out, "      UniqueId: {}", identifier.unique_id);
    let _ = writeln!(out, "      Identifier: {} ({})", identifier, bus_name(identifier.bus));
    let _ = writeln!(out, "      KeyLayoutFile: {}", source(key_map.key_layout_file.as_deref()));
    let _ = writeln!(
        out,
        "      KeyCharacterMapFile: {}",
        source(key_map.key_character_map_file.as_deref())
    );
    let _ = writeln!(
        out,
        "      ConfigurationFile: {}",
        source(device.config().configuration_file.as_deref())
    );
    let _ = writeln!(out, "      HaveKeyboardLayoutOverlay: {}", device.has_overlay());
    match device.video() {
        Some(video) => {
            let _ = writeln!(out, "      VideoDevice: {}", video);
        }
        None => {
            let _ = writeln!(out, "      VideoDevice: <none>");
        }
    }
}

impl HubState {
    pub(super) fn dump_into(&self, out: &mut String) {
        let _ = writeln!(out, "Event Hub State:");
        let _ = writeln!(out, "  BuiltInKeyboardId: {}", self.built_in_keyboard_id);
        let _ = writeln!(out, "  Devices:");
        for (id, device) in &self.devices {
            dump_device(out, *id, device);
        }
        let _ = writeln!(out, "  Unattached video devices:");
        if self.unattached_video.is_empty() {
            let _ = writeln!(out, "    <none>");
        }
        for video in &self.unattached_video {
            let _ = writeln!(out, "    {}", video);
        }
    }
}

impl EventHub {
    /// Multi-line description of every device, for bug reports.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        self.state.lock().dump_into(&mut out);
        out
    }
}
