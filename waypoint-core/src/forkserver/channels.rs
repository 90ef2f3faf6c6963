// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Reserved handshake descriptors.
//!
//! Two fixed descriptor numbers carry the driver handshake: a control channel
//! this process reads and a status channel it writes. Acquisition evicts any
//! existing occupant, installs one end of a fresh pipe on each number, and
//! publishes where they point so the driver can open the other ends through
//! `/proc`. Both numbers are closed again on release or drop.

use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};

use nix::fcntl::{fcntl, FcntlArg};
use nix::unistd::{close, dup2, pipe};

use crate::error::HandshakeError;
use crate::types::ChannelLayout;

/// Exclusive ownership of the reserved descriptor pair.
#[derive(Debug)]
pub struct HandshakeChannels {
    layout: ChannelLayout,
    released: bool,
}

impl HandshakeChannels {
    /// Reserve both numbers and install fresh pipe ends on them.
    pub fn acquire(layout: ChannelLayout) -> Result<Self, HandshakeError> {
        for fd in [layout.control_fd(), layout.status_fd()] {
            evict(fd)?;
        }

        let (control_read, control_write) = pipe().map_err(|e| HandshakeError::Pipe {
            reason: e.to_string(),
        })?;
        let (status_read, status_write) = pipe().map_err(|e| HandshakeError::Pipe {
            reason: e.to_string(),
        })?;

        // The unused ends are dropped here; the driver reopens them via /proc.
        drop(control_write);
        drop(status_read);

        let control_read = clear_of(control_read, &layout)?;
        let status_write = clear_of(status_write, &layout)?;

        install(control_read, layout.control_fd())?;
        let channels = Self {
            layout,
            released: false,
        };
        // From here on, drop closes whatever was installed.
        install(status_write, layout.status_fd())?;

        tracing::info!(
            control_fd = layout.control_fd(),
            status_fd = layout.status_fd(),
            "Handshake channels installed"
        );

        Ok(channels)
    }

    pub fn layout(&self) -> ChannelLayout {
        self.layout
    }

    /// Resolved targets of both descriptors, control first.
    pub fn discovery_entries(&self) -> Result<[PathBuf; 2], HandshakeError> {
        let resolve = |fd: RawFd| {
            let link = PathBuf::from(format!("/proc/self/fd/{}", fd));
            std::fs::read_link(&link).map_err(|e| HandshakeError::Discovery {
                path: link,
                reason: e.to_string(),
            })
        };
        Ok([
            resolve(self.layout.control_fd())?,
            resolve(self.layout.status_fd())?,
        ])
    }

    /// Write both resolved targets, one per line, to `path`.
    pub fn publish(&self, path: &Path) -> Result<(), HandshakeError> {
        let [control, status] = self.discovery_entries()?;
        let content = format!("{}\n{}\n", control.display(), status.display());
        std::fs::write(path, content).map_err(|e| HandshakeError::Discovery {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        tracing::info!(path = %path.display(), "Handshake channels published");
        Ok(())
    }

    /// Reader over the control channel.
    pub fn control(&self) -> ChannelReader<'_> {
        // SAFETY: the descriptor stays installed for as long as self lives.
        ChannelReader {
            fd: unsafe { BorrowedFd::borrow_raw(self.layout.control_fd()) },
        }
    }

    /// Writer over the status channel.
    pub fn status(&self) -> ChannelWriter<'_> {
        // SAFETY: as for control().
        ChannelWriter {
            fd: unsafe { BorrowedFd::borrow_raw(self.layout.status_fd()) },
        }
    }

    /// Close both reserved descriptors.
    pub fn release(mut self) {
        self.close_all();
    }

    fn close_all(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        for fd in [self.layout.control_fd(), self.layout.status_fd()] {
            if let Err(e) = close(fd) {
                tracing::debug!(fd = fd, error = %e, "Reserved descriptor already closed");
            }
        }
    }
}

impl Drop for HandshakeChannels {
    fn drop(&mut self) {
        self.close_all();
    }
}

/// Close whatever currently occupies `fd`.
fn evict(fd: RawFd) -> Result<(), HandshakeError> {
    if fcntl(fd, FcntlArg::F_GETFD).is_err() {
        return Ok(());
    }

    tracing::warn!(fd = fd, "Closing existing occupant of reserved descriptor");
    close(fd).map_err(|e| HandshakeError::Reserve {
        fd,
        reason: e.to_string(),
    })
}

/// Move `fd` above the reserved pair if the kernel handed out one of its numbers.
fn clear_of(fd: OwnedFd, layout: &ChannelLayout) -> Result<OwnedFd, HandshakeError> {
    let raw = fd.as_raw_fd();
    if raw != layout.control_fd() && raw != layout.status_fd() {
        return Ok(fd);
    }

    let floor = layout.control_fd().max(layout.status_fd()) + 1;
    let moved = fcntl(raw, FcntlArg::F_DUPFD_CLOEXEC(floor)).map_err(|e| {
        HandshakeError::Reserve {
            fd: raw,
            reason: e.to_string(),
        }
    })?;
    // SAFETY: F_DUPFD_CLOEXEC returned a new descriptor owned by nobody else.
    Ok(unsafe { OwnedFd::from_raw_fd(moved) })
}

/// Duplicate `end` onto `target` and close the original.
fn install(end: OwnedFd, target: RawFd) -> Result<(), HandshakeError> {
    dup2(end.as_raw_fd(), target).map_err(|e| HandshakeError::Install {
        fd: target,
        reason: e.to_string(),
    })?;
    Ok(())
}

/// Borrowed read side of the control channel.
pub struct ChannelReader<'a> {
    fd: BorrowedFd<'a>,
}

impl Read for ChannelReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        nix::unistd::read(self.fd.as_raw_fd(), buf).map_err(io::Error::from)
    }
}

/// Borrowed write side of the status channel.
pub struct ChannelWriter<'a> {
    fd: BorrowedFd<'a>,
}

impl Write for ChannelWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        nix::unistd::write(self.fd, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{File, OpenOptions};
    use tempfile::TempDir;

    fn is_open(fd: RawFd) -> bool {
        fcntl(fd, FcntlArg::F_GETFD).is_ok()
    }

    #[test]
    fn test_acquire_and_publish() {
        let dir = TempDir::new().unwrap();
        let layout = ChannelLayout::new(210, 211).unwrap();
        let channels = HandshakeChannels::acquire(layout).unwrap();

        assert!(is_open(210));
        assert!(is_open(211));

        let pipes = dir.path().join("pipes");
        channels.publish(&pipes).unwrap();
        let content = std::fs::read_to_string(&pipes).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| l.starts_with("pipe:[")));
        assert_ne!(lines[0], lines[1]);
        assert!(content.ends_with('\n'));

        channels.release();
        assert!(!is_open(210));
        assert!(!is_open(211));
    }

    #[test]
    fn test_existing_occupant_replaced() {
        let dir = TempDir::new().unwrap();
        let file = File::create(dir.path().join("target-owned")).unwrap();
        let layout = ChannelLayout::new(212, 213).unwrap();
        dup2(file.as_raw_fd(), 212).unwrap();

        let channels = HandshakeChannels::acquire(layout).unwrap();
        let [control, _] = channels.discovery_entries().unwrap();
        assert!(control.to_string_lossy().starts_with("pipe:["));
        drop(channels);
        assert!(!is_open(212));
    }

    #[test]
    fn test_round_trip_through_proc() {
        let layout = ChannelLayout::new(214, 215).unwrap();
        let channels = HandshakeChannels::acquire(layout).unwrap();

        // Driver side: reopen the opposite ends through /proc.
        let pid = std::process::id();
        let mut to_control = OpenOptions::new()
            .write(true)
            .open(format!("/proc/{}/fd/214", pid))
            .unwrap();
        let mut from_status = File::open(format!("/proc/{}/fd/215", pid)).unwrap();

        to_control.write_all(b"go").unwrap();
        let mut buf = [0u8; 2];
        channels.control().read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"go");

        channels.status().write_all(b"ok").unwrap();
        from_status.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ok");
    }
}
