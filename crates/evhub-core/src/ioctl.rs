// Evhub Kernel Requests
// ioctl request encoding and thin wrappers over the evdev character-device interface

use std::io;
use std::mem;
use std::os::unix::io::RawFd;

const IOC_NRBITS: u32 = 8;
const IOC_TYPEBITS: u32 = 8;
const IOC_SIZEBITS: u32 = 14;

const IOC_NRSHIFT: u32 = 0;
const IOC_TYPESHIFT: u32 = IOC_NRSHIFT + IOC_NRBITS;
const IOC_SIZESHIFT: u32 = IOC_TYPESHIFT + IOC_TYPEBITS;
const IOC_DIRSHIFT: u32 = IOC_SIZESHIFT + IOC_SIZEBITS;

const IOC_WRITE: u32 = 1;
const IOC_READ: u32 = 2;

/// Encode a request number the way `_IOC` does on the common Linux targets.
pub const fn ioc(dir: u32, ty: u8, nr: u32, size: usize) -> u64 {
    ((dir as u64) << IOC_DIRSHIFT)
        | ((ty as u64) << IOC_TYPESHIFT)
        | ((nr as u64) << IOC_NRSHIFT)
        | ((size as u64) << IOC_SIZESHIFT)
}

pub const fn ior(ty: u8, nr: u32, size: usize) -> u64 {
    ioc(IOC_READ, ty, nr, size)
}

pub const fn iow(ty: u8, nr: u32, size: usize) -> u64 {
    ioc(IOC_WRITE, ty, nr, size)
}

pub const fn iowr(ty: u8, nr: u32, size: usize) -> u64 {
    ioc(IOC_READ | IOC_WRITE, ty, nr, size)
}

pub const EVIOCSCLOCKID: u64 = iow(b'E', 0xa0, mem::size_of::<libc::c_int>());

/// `EVIOCGBIT(ev, len)`: supported codes for one event type.
pub const fn eviocgbit(ev: u16, len: usize) -> u64 {
    ior(b'E', 0x20 + ev as u32, len)
}

/// `EVIOCGKEY(len)`: current key state.
pub const fn eviocgkey(len: usize) -> u64 {
    ior(b'E', 0x18, len)
}

/// `EVIOCGLED(len)`: current LED state.
pub const fn eviocgled(len: usize) -> u64 {
    ior(b'E', 0x19, len)
}

/// `EVIOCGSW(len)`: current switch state.
pub const fn eviocgsw(len: usize) -> u64 {
    ior(b'E', 0x1b, len)
}

/// `EVIOCGPROP(len)`: device properties.
pub const fn eviocgprop(len: usize) -> u64 {
    ior(b'E', 0x09, len)
}

/// `EVIOCGABS(abs)`: range and current value of one absolute axis.
pub const fn eviocgabs(abs: u16) -> u64 {
    ior(b'E', 0x40 + abs as u32, mem::size_of::<libc::input_absinfo>())
}

fn check(ret: libc::c_int) -> io::Result<libc::c_int> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

/// Fill `buffer` from a variable-length bitmask request built by `request`.
pub fn read_bitmask(fd: RawFd, request: fn(usize) -> u64, buffer: &mut [u32]) -> io::Result<()> {
    buffer.fill(0);
    let len = mem::size_of_val(buffer);
    // SAFETY: the request encodes `len`, which is exactly the size of `buffer`.
    check(unsafe { libc::ioctl(fd, request(len) as _, buffer.as_mut_ptr()) })?;
    Ok(())
}

/// Fill `buffer` with the supported codes of `event_type`.
pub fn read_event_bits(fd: RawFd, event_type: u16, buffer: &mut [u32]) -> io::Result<()> {
    buffer.fill(0);
    let len = mem::size_of_val(buffer);
    // SAFETY: the request encodes `len`, which is exactly the size of `buffer`.
    check(unsafe { libc::ioctl(fd, eviocgbit(event_type, len) as _, buffer.as_mut_ptr()) })?;
    Ok(())
}

pub fn read_abs_info(fd: RawFd, axis: u16) -> io::Result<libc::input_absinfo> {
    // SAFETY: input_absinfo is plain old data.
    let mut info: libc::input_absinfo = unsafe { mem::zeroed() };
    // SAFETY: the request is sized for input_absinfo.
    check(unsafe { libc::ioctl(fd, eviocgabs(axis) as _, &mut info as *mut libc::input_absinfo) })?;
    Ok(info)
}

/// Ask the kernel to stamp events with `clock_id` instead of wall time.
pub fn set_clock_id(fd: RawFd, clock_id: libc::clockid_t) -> io::Result<()> {
    let clock: libc::c_int = clock_id as libc::c_int;
    // SAFETY: the request is sized for c_int.
    check(unsafe { libc::ioctl(fd, EVIOCSCLOCKID as _, &clock as *const libc::c_int) })?;
    Ok(())
}

/// Write one input record to an event node.
pub fn write_input_event(fd: RawFd, event_type: u16, code: u16, value: i32) -> io::Result<()> {
    // SAFETY: input_event is plain old data.
    let mut event: libc::input_event = unsafe { mem::zeroed() };
    event.type_ = event_type;
    event.code = code;
    event.value = value;
    let size = mem::size_of::<libc::input_event>();
    // SAFETY: writing exactly one initialized record from a live stack value.
    let written = unsafe { libc::write(fd, &event as *const _ as *const libc::c_void, size) };
    if written < 0 {
        return Err(io::Error::last_os_error());
    }
    if written as usize != size {
        return Err(io::Error::new(io::ErrorKind::WriteZero, "short input event write"));
    }
    Ok(())
}

/// Read as many whole input records as fit in `buffer`.
///
/// Returns the number of records read; 0 means end of file, which for an
/// event node means the device went away.
pub fn read_input_events(fd: RawFd, buffer: &mut [libc::input_event]) -> io::Result<usize> {
    let record = mem::size_of::<libc::input_event>();
    // SAFETY: the destination is a live, writable slice of plain records.
    let read = unsafe {
        libc::read(
            fd,
            buffer.as_mut_ptr() as *mut libc::c_void,
            mem::size_of_val(buffer),
        )
    };
    if read < 0 {
        return Err(io::Error::last_os_error());
    }
    let read = read as usize;
    if read % record != 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("read {} bytes, not a multiple of {}", read, record),
        ));
    }
    Ok(read / record)
}

/// A zeroed input record, for sizing read buffers.
pub fn empty_input_event() -> libc::input_event {
    // SAFETY: input_event is plain old data.
    unsafe { mem::zeroed() }
}
