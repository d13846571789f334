// Evhub Readiness Polling
// epoll registration set and the self-pipe used to interrupt a blocked wait

use std::io;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};

/// Upper bound on readiness items fetched by one wait.
pub const EPOLL_MAX_EVENTS: usize = 16;

/// One readiness report: the token it was registered with and the epoll flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyItem {
    pub token: u64,
    pub events: u32,
}

impl ReadyItem {
    pub fn readable(&self) -> bool {
        self.events & libc::EPOLLIN as u32 != 0
    }

    pub fn hung_up(&self) -> bool {
        self.events & (libc::EPOLLHUP | libc::EPOLLERR) as u32 != 0
    }
}

fn cvt(ret: libc::c_int) -> io::Result<libc::c_int> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

/// An epoll instance keyed by caller-chosen tokens.
#[derive(Debug)]
pub struct Poller {
    epoll: OwnedFd,
}

impl Poller {
    pub fn new() -> io::Result<Self> {
        // SAFETY: no pointers; the returned descriptor is owned below.
        let fd = cvt(unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) })?;
        // SAFETY: `fd` is a fresh descriptor nobody else owns.
        Ok(Self {
            epoll: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    /// Watch `fd` for input, reporting it under `token`.
    pub fn add(&self, fd: RawFd, token: u64) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: libc::EPOLLIN as u32,
            u64: token,
        };
        // SAFETY: `event` outlives the call.
        cvt(unsafe { libc::epoll_ctl(self.epoll.as_raw_fd(), libc::EPOLL_CTL_ADD, fd, &mut event) })?;
        Ok(())
    }

    /// Stop watching `fd`. Must happen before `fd` is closed.
    pub fn remove(&self, fd: RawFd) -> io::Result<()> {
        // SAFETY: a null event is accepted for EPOLL_CTL_DEL since Linux 2.6.9.
        cvt(unsafe {
            libc::epoll_ctl(self.epoll.as_raw_fd(), libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut())
        })?;
        Ok(())
    }

    /// Block up to `timeout_millis` (negative waits forever) and append what
    /// became ready to `out`. Returns how many items were added.
    pub fn wait(&self, out: &mut Vec<ReadyItem>, timeout_millis: i32) -> io::Result<usize> {
        let mut events = [libc::epoll_event { events: 0, u64: 0 }; EPOLL_MAX_EVENTS];
        // SAFETY: the buffer holds EPOLL_MAX_EVENTS entries.
        let count = cvt(unsafe {
            libc::epoll_wait(
                self.epoll.as_raw_fd(),
                events.as_mut_ptr(),
                EPOLL_MAX_EVENTS as libc::c_int,
                timeout_millis,
            )
        })? as usize;
        for event in &events[..count] {
            // Copy out of the (possibly packed) struct before use.
            let token = event.u64;
            let flags = event.events;
            out.push(ReadyItem { token, events: flags });
        }
        Ok(count)
    }
}

/// Non-blocking pipe whose read end is registered with the poller; writing a
/// byte wakes whoever is waiting.
#[derive(Debug)]
pub struct WakePipe {
    read: OwnedFd,
    write: OwnedFd,
}

impl WakePipe {
    pub fn new() -> io::Result<Self> {
        let mut fds = [0 as RawFd; 2];
        // SAFETY: `fds` has room for both ends.
        cvt(unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC | libc::O_NONBLOCK) })?;
        // SAFETY: both descriptors are fresh and owned from here on.
        Ok(unsafe {
            Self {
                read: OwnedFd::from_raw_fd(fds[0]),
                write: OwnedFd::from_raw_fd(fds[1]),
            }
        })
    }

    pub fn read_fd(&self) -> RawFd {
        self.read.as_raw_fd()
    }

    /// Safe from any thread. A full pipe already guarantees a wakeup.
    pub fn wake(&self) -> io::Result<()> {
        let byte = 1u8;
        loop {
            // SAFETY: writing one byte from a live stack value.
            let n = unsafe { libc::write(self.write.as_raw_fd(), &byte as *const u8 as *const libc::c_void, 1) };
            if n == 1 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::Interrupted => continue,
                io::ErrorKind::WouldBlock => return Ok(()),
                _ => return Err(err),
            }
        }
    }

    /// Consume every pending wake byte.
    pub fn drain(&self) -> io::Result<()> {
        let mut buffer = [0u8; 16];
        loop {
            // SAFETY: reading into a live stack buffer of the stated size.
            let n = unsafe {
                libc::read(self.read.as_raw_fd(), buffer.as_mut_ptr() as *mut libc::c_void, buffer.len())
            };
            if n > 0 {
                continue;
            }
            if n == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::Interrupted => continue,
                io::ErrorKind::WouldBlock => return Ok(()),
                _ => return Err(err),
            }
        }
    }
}
