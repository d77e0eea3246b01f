//! # Map Module
//!
//! Owned handle for the eBPF array map a generated program logs through.
//! The handle is move-only: the fd is closed exactly once, when the
//! `LogMap` drops, which rules out the double-close hazard of passing raw
//! fds around.

use crate::error::{Error, Result};

use std::io;
use std::os::unix::io::RawFd;

/// `BPF_MAP_CREATE` command number for the `bpf(2)` syscall.
const BPF_MAP_CREATE: libc::c_long = 0;
/// `BPF_MAP_TYPE_ARRAY` from the kernel's map-type enum.
const BPF_MAP_TYPE_ARRAY: u32 = 2;

/// Attribute block for `BPF_MAP_CREATE`, the leading fields of the
/// kernel's `union bpf_attr`.
#[repr(C)]
struct MapCreateAttr {
    map_type: u32,
    key_size: u32,
    value_size: u32,
    max_entries: u32,
    map_flags: u32,
}

/// An exclusively owned eBPF map file descriptor.
#[derive(Debug)]
pub struct LogMap {
    fd: RawFd,
    max_entries: u32,
}

impl LogMap {
    /// Creates an array map with 4-byte keys, 8-byte values, and the given
    /// number of entries.
    ///
    /// # Errors
    /// Returns `MapCreationFailed` when the syscall fails (typically for
    /// lack of `CAP_BPF`).
    pub fn create(max_entries: u32) -> Result<LogMap> {
        let attr = MapCreateAttr {
            map_type: BPF_MAP_TYPE_ARRAY,
            key_size: 4,
            value_size: 8,
            max_entries,
            map_flags: 0,
        };

        // The kernel requires the attr size as the third argument.
        let fd = unsafe {
            libc::syscall(
                libc::SYS_bpf,
                BPF_MAP_CREATE,
                &attr as *const MapCreateAttr,
                std::mem::size_of::<MapCreateAttr>(),
            )
        };

        if fd < 0 {
            Err(Error::map_creation_failed(format!(
                "could not create log map: {}",
                io::Error::last_os_error()
            )))
        } else {
            Ok(LogMap {
                fd: fd as RawFd,
                max_entries,
            })
        }
    }

    /// Wraps an already-open fd, taking ownership of it. Used by embedders
    /// (and tests) that acquire the map through other means.
    pub fn from_raw_fd(fd: RawFd, max_entries: u32) -> LogMap {
        LogMap { fd, max_entries }
    }

    /// The underlying file descriptor.
    #[inline]
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Number of entries the map was created with.
    #[inline]
    pub fn max_entries(&self) -> u32 {
        self.max_entries
    }
}

impl Drop for LogMap {
    fn drop(&mut self) {
        if self.fd >= 0 {
            unsafe {
                libc::close(self.fd);
            }
        }
    }
}
