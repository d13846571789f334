// Evhub evdev Backend
// Production input and video nodes over real kernel character devices

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;
use std::time::Duration;

use evdev::{Device, EventType, FFEffect, FFEffectData, FFEffectKind, FFReplay, FFTrigger, InputEvent};
use log::debug;

use super::{AbsoluteAxisSnapshot, BitmaskKind, InputDeviceIdentifier, InputNode, NodeOpener, RawAbsoluteAxisInfo};
use crate::codes::{EV_ABS, EV_FF, EV_KEY, EV_LED, EV_REL, EV_SW};
use crate::ioctl;
use crate::video::{v4l::V4lNode, VideoNode};

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    // SAFETY: fcntl on a descriptor we own; no pointers involved.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: as above.
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// An opened `/dev/input/eventN` node.
pub struct EvdevNode {
    device: Device,
    /// Uploaded force-feedback effects by kernel id. Dropping one erases it.
    effects: HashMap<i16, FFEffect>,
}

fn rumble_data(strong_magnitude: u16, weak_magnitude: u16, duration: Duration) -> FFEffectData {
    FFEffectData {
        direction: 0,
        trigger: FFTrigger {
            button: 0,
            interval: 0,
        },
        replay: FFReplay {
            length: duration.as_millis().min(u16::MAX as u128) as u16,
            delay: 0,
        },
        kind: FFEffectKind::Rumble {
            strong_magnitude,
            weak_magnitude,
        },
    }
}

impl EvdevNode {
    pub fn open(path: &Path) -> io::Result<Self> {
        let device = Device::open(path)?;
        let fd = device.as_raw_fd();
        set_nonblocking(fd)?;
        // Timestamps must be comparable with the hub's monotonic clock.
        if let Err(e) = ioctl::set_clock_id(fd, libc::CLOCK_MONOTONIC) {
            debug!("Could not set monotonic clock on {}: {}", path.display(), e);
        }
        Ok(Self {
            device,
            effects: HashMap::new(),
        })
    }
}

impl InputNode for EvdevNode {
    fn raw_fd(&self) -> RawFd {
        self.device.as_raw_fd()
    }

    fn identifier(&self) -> InputDeviceIdentifier {
        let input_id = self.device.input_id();
        InputDeviceIdentifier {
            name: self.device.name().unwrap_or_default().to_string(),
            location: self.device.physical_path().unwrap_or_default().to_string(),
            unique_id: self.device.unique_name().unwrap_or_default().to_string(),
            bus: input_id.bus_type().0,
            vendor: input_id.vendor(),
            product: input_id.product(),
            version: input_id.version(),
            ..InputDeviceIdentifier::default()
        }
    }

    fn read_bitmask(&self, kind: BitmaskKind, buffer: &mut [u32]) -> io::Result<()> {
        let fd = self.raw_fd();
        match kind {
            BitmaskKind::Key => ioctl::read_event_bits(fd, EV_KEY, buffer),
            BitmaskKind::Abs => ioctl::read_event_bits(fd, EV_ABS, buffer),
            BitmaskKind::Rel => ioctl::read_event_bits(fd, EV_REL, buffer),
            BitmaskKind::Switch => ioctl::read_event_bits(fd, EV_SW, buffer),
            BitmaskKind::Led => ioctl::read_event_bits(fd, EV_LED, buffer),
            BitmaskKind::Ff => ioctl::read_event_bits(fd, EV_FF, buffer),
            BitmaskKind::Prop => ioctl::read_bitmask(fd, ioctl::eviocgprop, buffer),
            BitmaskKind::KeyState => ioctl::read_bitmask(fd, ioctl::eviocgkey, buffer),
            BitmaskKind::SwitchState => ioctl::read_bitmask(fd, ioctl::eviocgsw, buffer),
            BitmaskKind::LedState => ioctl::read_bitmask(fd, ioctl::eviocgled, buffer),
        }
    }

    fn read_abs_info(&self, axis: u16) -> io::Result<AbsoluteAxisSnapshot> {
        let info = ioctl::read_abs_info(self.raw_fd(), axis)?;
        Ok(AbsoluteAxisSnapshot {
            info: RawAbsoluteAxisInfo::from_kernel(&info),
            value: info.value,
        })
    }

    fn write_event(&mut self, event_type: u16, code: u16, value: i32) -> io::Result<()> {
        self.device
            .send_events(&[InputEvent::new(EventType(event_type), code, value)])
    }

    fn upload_rumble(
        &mut self,
        effect_id: i16,
        strong_magnitude: u16,
        weak_magnitude: u16,
        duration: Duration,
    ) -> io::Result<i16> {
        let data = rumble_data(strong_magnitude, weak_magnitude, duration);
        if let Some(effect) = self.effects.get_mut(&effect_id) {
            effect.update(data)?;
            return Ok(effect_id);
        }
        let effect = self.device.upload_ff_effect(data)?;
        let id = effect.id() as i16;
        self.effects.insert(id, effect);
        Ok(id)
    }

    fn erase_effect(&mut self, effect_id: i16) -> io::Result<()> {
        if self.effects.remove(&effect_id).is_none() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no force-feedback effect with id {}", effect_id),
            ));
        }
        Ok(())
    }
}

/// Opens real device nodes.
#[derive(Debug, Default, Clone, Copy)]
pub struct EvdevOpener;

impl NodeOpener for EvdevOpener {
    fn open_input(&self, path: &Path) -> io::Result<Box<dyn InputNode>> {
        Ok(Box::new(EvdevNode::open(path)?))
    }

    fn open_video(&self, path: &Path) -> io::Result<Box<dyn VideoNode>> {
        let file: File = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK | libc::O_CLOEXEC)
            .open(path)?;
        Ok(Box::new(V4lNode::new(file)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rumble_data() {
        let data = rumble_data(0xffff, 0x8000, Duration::from_millis(250));
        assert_eq!(data.replay.length, 250);
        assert_eq!(data.replay.delay, 0);
        match data.kind {
            FFEffectKind::Rumble {
                strong_magnitude,
                weak_magnitude,
            } => {
                assert_eq!(strong_magnitude, 0xffff);
                assert_eq!(weak_magnitude, 0x8000);
            }
            _ => panic!("expected a rumble effect"),
        }
    }

    #[test]
    fn test_rumble_length_saturates() {
        let data = rumble_data(1, 1, Duration::from_secs(3600));
        assert_eq!(data.replay.length, u16::MAX);
    }
}
