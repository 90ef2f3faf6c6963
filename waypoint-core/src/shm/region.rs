// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! SharedInputRegion - System V shared input buffer.
//!
//! The driver owns the segment and writes each test case into it: a native
//! `u32` length followed by the bytes. This side attaches read-only and copies
//! the current test case out on demand.

use std::ptr::NonNull;

use crate::error::SharedMemoryError;

/// Size of the length field at the start of the segment.
pub const LENGTH_FIELD: usize = std::mem::size_of::<u32>();

/// A shared input segment attached into this process.
///
/// Detached on drop. The segment itself belongs to the driver.
pub struct SharedInputRegion {
    id: i32,
    ptr: NonNull<u8>,
    capacity: usize,
}

impl SharedInputRegion {
    /// Parse a segment identifier as exported by the driver.
    pub fn parse_id(value: &str) -> Result<i32, SharedMemoryError> {
        value
            .trim()
            .parse::<i32>()
            .ok()
            .filter(|id| *id >= 0)
            .ok_or_else(|| SharedMemoryError::InvalidId {
                value: value.to_string(),
            })
    }

    /// Attach segment `id` read-only.
    ///
    /// # Errors
    /// `Attach` if the segment cannot be attached or queried, `NullBuffer`
    /// if the kernel hands back a null address.
    pub fn attach(id: i32) -> Result<Self, SharedMemoryError> {
        // SAFETY: shmat validates id; a null address lets the kernel choose.
        let raw = unsafe { libc::shmat(id, std::ptr::null(), libc::SHM_RDONLY) };
        if raw as isize == -1 {
            return Err(SharedMemoryError::Attach {
                id,
                reason: format!("shmat failed: {}", std::io::Error::last_os_error()),
            });
        }

        let Some(ptr) = NonNull::new(raw as *mut u8) else {
            return Err(SharedMemoryError::NullBuffer { id });
        };

        // SAFETY: shmid_ds is plain data, filled by IPC_STAT.
        let mut stat: libc::shmid_ds = unsafe { std::mem::zeroed() };
        if unsafe { libc::shmctl(id, libc::IPC_STAT, &mut stat) } < 0 {
            let reason = format!("shmctl failed: {}", std::io::Error::last_os_error());
            // SAFETY: raw was returned by shmat above.
            unsafe { libc::shmdt(raw) };
            return Err(SharedMemoryError::Attach { id, reason });
        }

        let capacity = stat.shm_segsz as usize;
        if capacity < LENGTH_FIELD {
            unsafe { libc::shmdt(raw) };
            return Err(SharedMemoryError::Attach {
                id,
                reason: format!("segment of {} bytes has no room for a length", capacity),
            });
        }

        tracing::debug!(id = id, capacity = capacity, "Attached shared input segment");

        Ok(Self { id, ptr, capacity })
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    /// Total segment size, length field included.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Copy the current test case into `buf`, replacing its contents.
    ///
    /// A zero length is not an error but is logged, since the driver should
    /// never hand out an empty test case.
    pub fn read_into(&self, buf: &mut Vec<u8>) -> Result<usize, SharedMemoryError> {
        // SAFETY: capacity >= LENGTH_FIELD was checked at attach; the driver
        // may write concurrently, so the length is read once, unaligned.
        let len = unsafe { std::ptr::read_unaligned(self.ptr.as_ptr() as *const u32) } as usize;

        buf.clear();
        if len == 0 {
            tracing::warn!(id = self.id, "Shared input has zero length");
            return Ok(0);
        }

        let room = self.capacity - LENGTH_FIELD;
        if len > room {
            return Err(SharedMemoryError::InputTooLarge {
                len,
                capacity: room,
            });
        }

        // SAFETY: LENGTH_FIELD + len <= capacity.
        let data = unsafe { std::slice::from_raw_parts(self.ptr.as_ptr().add(LENGTH_FIELD), len) };
        buf.extend_from_slice(data);
        Ok(len)
    }
}

impl Drop for SharedInputRegion {
    fn drop(&mut self) {
        // SAFETY: ptr was returned by shmat and is detached exactly once.
        if unsafe { libc::shmdt(self.ptr.as_ptr() as *const libc::c_void) } < 0 {
            tracing::error!(
                id = self.id,
                error = %std::io::Error::last_os_error(),
                "Failed to detach shared input segment"
            );
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Driver-side stand-in: a private segment holding one test case.
    pub(crate) struct DriverSegment {
        pub id: i32,
    }

    impl DriverSegment {
        pub fn new(size: usize, input: &[u8]) -> Self {
            let id = unsafe { libc::shmget(libc::IPC_PRIVATE, size, libc::IPC_CREAT | 0o600) };
            assert!(id >= 0, "shmget: {}", std::io::Error::last_os_error());
            let segment = Self { id };
            segment.write(input);
            segment
        }

        pub fn write_raw(&self, len: u32, input: &[u8]) {
            unsafe {
                let ptr = libc::shmat(self.id, std::ptr::null(), 0) as *mut u8;
                assert_ne!(ptr as isize, -1);
                std::ptr::write_unaligned(ptr as *mut u32, len);
                std::ptr::copy_nonoverlapping(input.as_ptr(), ptr.add(LENGTH_FIELD), input.len());
                libc::shmdt(ptr as *const libc::c_void);
            }
        }

        pub fn write(&self, input: &[u8]) {
            self.write_raw(input.len() as u32, input);
        }
    }

    impl Drop for DriverSegment {
        fn drop(&mut self) {
            unsafe { libc::shmctl(self.id, libc::IPC_RMID, std::ptr::null_mut()) };
        }
    }

    #[test]
    fn test_parse_id() {
        assert_eq!(SharedInputRegion::parse_id(" 42 ").unwrap(), 42);
        assert!(SharedInputRegion::parse_id("-3").is_err());
        assert!(SharedInputRegion::parse_id("shm").is_err());
    }

    #[test]
    fn test_read_current_input() {
        let segment = DriverSegment::new(4096, b"GET / HTTP/1.0");
        let region = SharedInputRegion::attach(segment.id).unwrap();
        assert!(region.capacity() >= 4096);

        let mut buf = Vec::new();
        assert_eq!(region.read_into(&mut buf).unwrap(), 14);
        assert_eq!(buf, b"GET / HTTP/1.0");

        segment.write(b"next");
        assert_eq!(region.read_into(&mut buf).unwrap(), 4);
        assert_eq!(buf, b"next");
    }

    #[test]
    fn test_zero_length_is_empty() {
        let segment = DriverSegment::new(4096, b"");
        let region = SharedInputRegion::attach(segment.id).unwrap();
        let mut buf = vec![1, 2, 3];
        assert_eq!(region.read_into(&mut buf).unwrap(), 0);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_length_beyond_segment_rejected() {
        let segment = DriverSegment::new(4096, b"");
        segment.write_raw(1_000_000, b"x");
        let region = SharedInputRegion::attach(segment.id).unwrap();
        assert!(matches!(
            region.read_into(&mut Vec::new()),
            Err(SharedMemoryError::InputTooLarge { len: 1_000_000, .. })
        ));
    }

    #[test]
    fn test_attach_unknown_segment() {
        assert!(matches!(
            SharedInputRegion::attach(i32::MAX),
            Err(SharedMemoryError::Attach { .. })
        ));
    }
}
