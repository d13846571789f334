// Evhub V4L2 Touch Node
// Minimal V4L2 access for touch heatmap nodes: capability name, frame format and read()

use std::ffi::CStr;
use std::fs::File;
use std::io::{self, Read};
use std::mem;
use std::os::unix::io::{AsRawFd, RawFd};

use super::{TouchVideoFrame, VideoNode};
use crate::event::monotonic_nanos;
use crate::ioctl::{ior, iowr};

const V4L2_BUF_TYPE_VIDEO_CAPTURE: u32 = 1;

#[repr(C)]
#[derive(Clone, Copy)]
struct V4lCapability {
    driver: [u8; 16],
    card: [u8; 32],
    bus_info: [u8; 32],
    version: u32,
    capabilities: u32,
    device_caps: u32,
    reserved: [u32; 3],
}

#[repr(C)]
#[derive(Clone, Copy)]
struct V4lPixFormat {
    width: u32,
    height: u32,
    pixelformat: u32,
    field: u32,
    bytesperline: u32,
    sizeimage: u32,
    colorspace: u32,
    private: u32,
    flags: u32,
    ycbcr_enc: u32,
    quantization: u32,
    xfer_func: u32,
}

// Some union members carry pointers, which sets the alignment.
#[repr(C)]
#[derive(Clone, Copy)]
union V4lFormatData {
    pix: V4lPixFormat,
    raw: [u8; 200],
    _align: *const libc::c_void,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct V4lFormat {
    buf_type: u32,
    fmt: V4lFormatData,
}

const VIDIOC_QUERYCAP: u64 = ior(b'V', 0, mem::size_of::<V4lCapability>());
const VIDIOC_G_FMT: u64 = iowr(b'V', 4, mem::size_of::<V4lFormat>());

fn c_string(bytes: &[u8]) -> String {
    CStr::from_bytes_until_nul(bytes)
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|_| String::from_utf8_lossy(bytes).into_owned())
}

/// An opened `/dev/v4l-touchN` node producing 16-bit signed heatmap samples.
pub struct V4lNode {
    file: File,
    name: String,
    height: u32,
    width: u32,
}

impl V4lNode {
    pub fn new(file: File) -> io::Result<Self> {
        let fd = file.as_raw_fd();

        // SAFETY: plain integer/byte arrays; all-zero is valid.
        let mut cap: V4lCapability = unsafe { mem::zeroed() };
        // SAFETY: the request is sized for V4lCapability.
        if unsafe { libc::ioctl(fd, VIDIOC_QUERYCAP as _, &mut cap as *mut V4lCapability) } < 0 {
            return Err(io::Error::last_os_error());
        }

        // SAFETY: as above, the pointer member is never dereferenced.
        let mut format: V4lFormat = unsafe { mem::zeroed() };
        format.buf_type = V4L2_BUF_TYPE_VIDEO_CAPTURE;
        // SAFETY: the request is sized for V4lFormat.
        if unsafe { libc::ioctl(fd, VIDIOC_G_FMT as _, &mut format as *mut V4lFormat) } < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: G_FMT for a capture buffer fills the pix member.
        let pix = unsafe { format.fmt.pix };

        Ok(Self {
            file,
            name: c_string(&cap.card),
            height: pix.height,
            width: pix.width,
        })
    }

    fn frame_bytes(&self) -> usize {
        self.height as usize * self.width as usize * mem::size_of::<i16>()
    }
}

impl VideoNode for V4lNode {
    fn raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn frame_size(&self) -> (u32, u32) {
        (self.height, self.width)
    }

    fn read_frames(&mut self) -> io::Result<Vec<TouchVideoFrame>> {
        let size = self.frame_bytes();
        let mut frames = Vec::new();
        if size == 0 {
            return Ok(frames);
        }
        let mut buffer = vec![0u8; size];
        loop {
            match self.file.read(&mut buffer) {
                Ok(n) if n == size => {
                    let data = buffer
                        .chunks_exact(2)
                        .map(|pair| i16::from_ne_bytes([pair[0], pair[1]]))
                        .collect();
                    frames.push(TouchVideoFrame {
                        height: self.height,
                        width: self.width,
                        data,
                        timestamp: monotonic_nanos(),
                    });
                }
                Ok(_) => break,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_struct_sizes_match_kernel() {
        assert_eq!(mem::size_of::<V4lCapability>(), 104);
        #[cfg(target_pointer_width = "64")]
        assert_eq!(mem::size_of::<V4lFormat>(), 208);
        assert_eq!(VIDIOC_QUERYCAP, 0x8068_5600);
    }

    #[test]
    fn test_c_string_stops_at_nul() {
        let mut raw = [0u8; 32];
        raw[..5].copy_from_slice(b"touch");
        assert_eq!(c_string(&raw), "touch");
    }
}
