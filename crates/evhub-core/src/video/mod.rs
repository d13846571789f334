// Evhub Heatmap Video
// Touch video devices that deliver capacitive heatmap frames alongside a touchscreen

pub mod v4l;

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};

use log::{error, warn};

/// Oldest frames are discarded once this many are queued.
pub const MAX_VIDEO_QUEUE_SIZE: usize = 10;

/// One heatmap frame. `data` is row-major, `height * width` samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TouchVideoFrame {
    pub height: u32,
    pub width: u32,
    pub data: Vec<i16>,
    /// Monotonic capture time in nanoseconds.
    pub timestamp: i64,
}

/// Raw access to an opened video node.
pub trait VideoNode: Send {
    fn raw_fd(&self) -> RawFd;

    /// Name reported by the driver; used to pair with an input device.
    fn name(&self) -> String;

    /// `(height, width)` of each frame.
    fn frame_size(&self) -> (u32, u32);

    /// Read every frame currently available without blocking.
    fn read_frames(&mut self) -> io::Result<Vec<TouchVideoFrame>>;
}

/// A heatmap node and the frames read from it but not yet handed out.
pub struct TouchVideoDevice {
    path: PathBuf,
    name: String,
    height: u32,
    width: u32,
    node: Box<dyn VideoNode>,
    frames: VecDeque<TouchVideoFrame>,
}

impl TouchVideoDevice {
    pub fn new(path: impl Into<PathBuf>, node: Box<dyn VideoNode>) -> Self {
        let (height, width) = node.frame_size();
        Self {
            path: path.into(),
            name: node.name(),
            height,
            width,
            node,
            frames: VecDeque::with_capacity(MAX_VIDEO_QUEUE_SIZE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn raw_fd(&self) -> RawFd {
        self.node.raw_fd()
    }

    /// Pull pending frames from the node into the queue. Returns how many
    /// frames were read.
    pub fn read_and_queue_frames(&mut self) -> usize {
        let frames = match self.node.read_frames() {
            Ok(frames) => frames,
            Err(e) => {
                warn!("Could not read frames from {}: {}", self.path.display(), e);
                return 0;
            }
        };
        let count = frames.len();
        self.frames.extend(frames);
        if self.frames.len() > MAX_VIDEO_QUEUE_SIZE {
            let dropped = self.frames.len() - MAX_VIDEO_QUEUE_SIZE;
            error!(
                "Video device {} dropping {} frames, consumer is not keeping up",
                self.name, dropped
            );
            self.frames.drain(..dropped);
        }
        count
    }

    /// Hand out every queued frame, oldest first.
    pub fn consume_frames(&mut self) -> Vec<TouchVideoFrame> {
        self.frames.drain(..).collect()
    }

    pub fn queued_frames(&self) -> usize {
        self.frames.len()
    }
}

impl fmt::Debug for TouchVideoDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TouchVideoDevice")
            .field("path", &self.path)
            .field("name", &self.name)
            .field("height", &self.height)
            .field("width", &self.width)
            .field("queued", &self.frames.len())
            .finish()
    }
}

impl fmt::Display for TouchVideoDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "path={}, name='{}', size={}x{}, queued={}",
            self.path.display(),
            self.name,
            self.height,
            self.width,
            self.frames.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ScriptedNode {
        batches: Vec<usize>,
    }

    impl VideoNode for ScriptedNode {
        fn raw_fd(&self) -> RawFd {
            -1
        }

        fn name(&self) -> String {
            "sec_touchscreen".to_string()
        }

        fn frame_size(&self) -> (u32, u32) {
            (2, 3)
        }

        fn read_frames(&mut self) -> io::Result<Vec<TouchVideoFrame>> {
            let count = if self.batches.is_empty() { 0 } else { self.batches.remove(0) };
            Ok((0..count)
                .map(|i| TouchVideoFrame {
                    height: 2,
                    width: 3,
                    data: vec![i as i16; 6],
                    timestamp: i as i64,
                })
                .collect())
        }
    }

    #[test]
    fn test_frames_are_queued_and_consumed() {
        let node = ScriptedNode { batches: vec![3] };
        let mut device = TouchVideoDevice::new("/dev/v4l-touch0", Box::new(node));
        assert_eq!(device.name(), "sec_touchscreen");
        assert_eq!(device.read_and_queue_frames(), 3);
        let frames = device.consume_frames();
        assert_eq!(frames.len(), 3);
        assert_eq!(device.queued_frames(), 0);
    }

    #[test]
    fn test_queue_keeps_newest_frames() {
        let node = ScriptedNode { batches: vec![8, 8] };
        let mut device = TouchVideoDevice::new("/dev/v4l-touch0", Box::new(node));
        device.read_and_queue_frames();
        device.read_and_queue_frames();
        assert_eq!(device.queued_frames(), MAX_VIDEO_QUEUE_SIZE);
        let frames = device.consume_frames();
        // Second batch timestamps are 0..8; the last frame kept is its final one.
        assert_eq!(frames.last().map(|f| f.timestamp), Some(7));
    }
}
