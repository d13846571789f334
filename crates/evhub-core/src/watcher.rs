// Evhub Hot-plug Watcher
// inotify watches on the device directories; any change only means "rescan"

use std::ffi::{CString, OsStr};
use std::io;
use std::mem;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::error::{HubError, HubResult};

const WATCH_MASK: u32 = libc::IN_CREATE | libc::IN_DELETE | libc::IN_MOVED_FROM | libc::IN_MOVED_TO;
const EVENT_HEADER: usize = mem::size_of::<libc::inotify_event>();

/// A change reported for a watched directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryChange {
    pub dir: PathBuf,
    pub name: PathBuf,
    pub created: bool,
}

#[derive(Debug)]
struct Watch {
    descriptor: i32,
    dir: PathBuf,
}

/// Watches directories for entries being created or removed.
///
/// A directory that does not exist yet is watched through its parent and
/// picked up once it appears.
#[derive(Debug)]
pub struct DirectoryWatcher {
    fd: OwnedFd,
    watches: Vec<Watch>,
    awaiting: Vec<PathBuf>,
}

impl DirectoryWatcher {
    pub fn new() -> io::Result<Self> {
        // SAFETY: no pointers; the descriptor is owned below.
        let fd = unsafe { libc::inotify_init1(libc::IN_NONBLOCK | libc::IN_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            // SAFETY: fresh descriptor, owned from here on.
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
            watches: Vec::new(),
            awaiting: Vec::new(),
        })
    }

    pub fn raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    fn add_watch(&mut self, dir: &Path) -> HubResult<()> {
        if self.watches.iter().any(|w| w.dir == dir) {
            return Ok(());
        }
        let watch_error = |source: io::Error| HubError::Watch {
            path: dir.to_path_buf(),
            source,
        };
        let c_path = CString::new(dir.as_os_str().as_bytes())
            .map_err(|e| watch_error(io::Error::new(io::ErrorKind::InvalidInput, e)))?;
        // SAFETY: `c_path` is a valid NUL-terminated string for the call.
        let descriptor = unsafe { libc::inotify_add_watch(self.fd.as_raw_fd(), c_path.as_ptr(), WATCH_MASK) };
        if descriptor < 0 {
            return Err(watch_error(io::Error::last_os_error()));
        }
        debug!("Watching {} for device changes", dir.display());
        self.watches.push(Watch {
            descriptor,
            dir: dir.to_path_buf(),
        });
        Ok(())
    }

    /// Watch `dir`, or its parent until `dir` is created.
    pub fn watch(&mut self, dir: &Path) -> HubResult<()> {
        if dir.is_dir() {
            return self.add_watch(dir);
        }
        let parent = dir.parent().filter(|p| !p.as_os_str().is_empty()).ok_or_else(|| HubError::Watch {
            path: dir.to_path_buf(),
            source: io::Error::new(io::ErrorKind::NotFound, "directory and parent missing"),
        })?;
        info!("{} does not exist yet, watching {} for it", dir.display(), parent.display());
        self.add_watch(parent)?;
        if !self.awaiting.iter().any(|d| d == dir) {
            self.awaiting.push(dir.to_path_buf());
        }
        Ok(())
    }

    pub fn is_watching(&self, dir: &Path) -> bool {
        self.watches.iter().any(|w| w.dir == dir)
    }

    /// Read every pending notification. Directories that were being waited
    /// for and now exist get their own watch.
    pub fn drain(&mut self) -> io::Result<Vec<DirectoryChange>> {
        let mut changes = Vec::new();
        let mut buffer = vec![0u8; 4096];
        loop {
            // SAFETY: reading into a live buffer of the stated size.
            let n = unsafe { libc::read(self.fd.as_raw_fd(), buffer.as_mut_ptr() as *mut libc::c_void, buffer.len()) };
            if n < 0 {
                let err = io::Error::last_os_error();
                match err.kind() {
                    io::ErrorKind::Interrupted => continue,
                    io::ErrorKind::WouldBlock => break,
                    _ => return Err(err),
                }
            }
            if n == 0 {
                break;
            }
            self.parse_events(&buffer[..n as usize], &mut changes);
        }

        let (ready, still_waiting): (Vec<PathBuf>, Vec<PathBuf>) =
            self.awaiting.drain(..).partition(|dir| dir.is_dir());
        self.awaiting = still_waiting;
        for dir in ready {
            match self.add_watch(&dir) {
                Ok(()) => changes.push(DirectoryChange {
                    dir: dir.clone(),
                    name: PathBuf::new(),
                    created: true,
                }),
                Err(e) => {
                    info!("{}", e);
                    self.awaiting.push(dir);
                }
            }
        }
        Ok(changes)
    }

    fn parse_events(&self, mut bytes: &[u8], changes: &mut Vec<DirectoryChange>) {
        while bytes.len() >= EVENT_HEADER {
            // SAFETY: at least a header's worth of bytes remain; the read is unaligned-safe.
            let header: libc::inotify_event = unsafe { std::ptr::read_unaligned(bytes.as_ptr() as *const libc::inotify_event) };
            let total = EVENT_HEADER + header.len as usize;
            if bytes.len() < total {
                break;
            }
            let raw_name = &bytes[EVENT_HEADER..total];
            let name_len = raw_name.iter().position(|&b| b == 0).unwrap_or(raw_name.len());
            let name = PathBuf::from(OsStr::from_bytes(&raw_name[..name_len]));
            if let Some(watch) = self.watches.iter().find(|w| w.descriptor == header.wd) {
                changes.push(DirectoryChange {
                    dir: watch.dir.clone(),
                    name,
                    created: header.mask & (libc::IN_CREATE | libc::IN_MOVED_TO) != 0,
                });
            }
            bytes = &bytes[total..];
        }
    }
}
