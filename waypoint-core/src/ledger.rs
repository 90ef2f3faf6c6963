// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Descriptor bookkeeping.
//!
//! Every descriptor the target creates through `socket` or `accept` gets a
//! file named by its number under the bookkeeping directory, so a restored
//! execution can map descriptor numbers back to their role. With capture
//! enabled, bytes the target sends are appended to that file.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::os::fd::RawFd;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{WaypointError, WaypointResult};
use crate::trigger::SocketOp;

/// How a descriptor came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DescriptorRole {
    /// Created by `socket`.
    Endpoint,
    /// Returned by `accept`.
    Accepted,
}

impl DescriptorRole {
    pub fn from_op(op: SocketOp) -> Option<Self> {
        match op {
            SocketOp::Socket => Some(Self::Endpoint),
            SocketOp::Accept => Some(Self::Accepted),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct DescriptorLedger {
    dir: PathBuf,
    capture: bool,
    known: BTreeMap<RawFd, DescriptorRole>,
}

impl DescriptorLedger {
    /// Ledger rooted at `dir`, created if missing.
    pub fn open(dir: impl Into<PathBuf>, capture: bool) -> WaypointResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| WaypointError::Io {
            context: "creating descriptor directory",
            source: e,
        })?;

        Ok(Self {
            dir,
            capture,
            known: BTreeMap::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn role(&self, fd: RawFd) -> Option<DescriptorRole> {
        self.known.get(&fd).copied()
    }

    fn entry_path(&self, fd: RawFd) -> PathBuf {
        self.dir.join(fd.to_string())
    }

    /// Record `fd`. A descriptor number reused by the target starts a fresh,
    /// empty entry.
    pub fn register(&mut self, fd: RawFd, role: DescriptorRole) -> WaypointResult<PathBuf> {
        let path = self.entry_path(fd);
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| WaypointError::Io {
                context: "registering descriptor",
                source: e,
            })?;

        self.known.insert(fd, role);
        tracing::debug!(fd = fd, role = ?role, path = %path.display(), "Descriptor registered");
        Ok(path)
    }

    /// Move the ledger to a new directory, recreating an empty entry for
    /// every known descriptor. Used after a restore changed the working
    /// directory.
    pub fn retarget(&mut self, dir: impl Into<PathBuf>, capture: bool) -> WaypointResult<()> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| WaypointError::Io {
            context: "creating descriptor directory",
            source: e,
        })?;
        self.dir = dir;
        self.capture = capture;

        let known: Vec<_> = self.known.iter().map(|(fd, role)| (*fd, *role)).collect();
        for (fd, role) in known {
            self.register(fd, role)?;
        }
        Ok(())
    }

    /// Append sent bytes to the descriptor's entry. No-op when capture is
    /// off or the descriptor was never registered.
    pub fn capture_output(&mut self, fd: RawFd, bytes: &[u8]) -> WaypointResult<()> {
        if !self.capture || !self.known.contains_key(&fd) {
            return Ok(());
        }

        let mut file = OpenOptions::new()
            .append(true)
            .open(self.entry_path(fd))
            .map_err(|e| WaypointError::Io {
                context: "opening captured output",
                source: e,
            })?;
        file.write_all(bytes).map_err(|e| WaypointError::Io {
            context: "capturing output",
            source: e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_register_creates_entry() {
        let dir = TempDir::new().unwrap();
        let mut ledger = DescriptorLedger::open(dir.path().join("fd"), false).unwrap();

        let path = ledger.register(5, DescriptorRole::Accepted).unwrap();
        assert_eq!(path, dir.path().join("fd").join("5"));
        assert!(path.exists());
        assert_eq!(ledger.role(5), Some(DescriptorRole::Accepted));
        assert_eq!(ledger.role(6), None);
    }

    #[test]
    fn test_capture_appends_per_descriptor() {
        let dir = TempDir::new().unwrap();
        let mut ledger = DescriptorLedger::open(dir.path(), true).unwrap();
        ledger.register(4, DescriptorRole::Endpoint).unwrap();

        ledger.capture_output(4, b"HELLO ").unwrap();
        ledger.capture_output(4, b"WORLD").unwrap();
        // Unregistered descriptors are ignored.
        ledger.capture_output(9, b"lost").unwrap();

        assert_eq!(std::fs::read(dir.path().join("4")).unwrap(), b"HELLO WORLD");
        assert!(!dir.path().join("9").exists());
    }

    #[test]
    fn test_reused_number_starts_fresh() {
        let dir = TempDir::new().unwrap();
        let mut ledger = DescriptorLedger::open(dir.path(), true).unwrap();
        ledger.register(4, DescriptorRole::Endpoint).unwrap();
        ledger.capture_output(4, b"old").unwrap();

        ledger.register(4, DescriptorRole::Accepted).unwrap();
        assert_eq!(std::fs::read(dir.path().join("4")).unwrap(), b"");
        assert_eq!(ledger.role(4), Some(DescriptorRole::Accepted));
    }

    #[test]
    fn test_retarget_recreates_entries() {
        let dir = TempDir::new().unwrap();
        let mut ledger = DescriptorLedger::open(dir.path().join("old"), false).unwrap();
        ledger.register(3, DescriptorRole::Endpoint).unwrap();
        ledger.register(7, DescriptorRole::Accepted).unwrap();

        ledger.retarget(dir.path().join("new"), true).unwrap();
        assert!(dir.path().join("new").join("3").exists());
        assert!(dir.path().join("new").join("7").exists());

        ledger.capture_output(7, b"out").unwrap();
        assert_eq!(std::fs::read(dir.path().join("new").join("7")).unwrap(), b"out");
    }

    #[test]
    fn test_capture_disabled() {
        let dir = TempDir::new().unwrap();
        let mut ledger = DescriptorLedger::open(dir.path(), false).unwrap();
        ledger.register(4, DescriptorRole::Endpoint).unwrap();
        ledger.capture_output(4, b"data").unwrap();
        assert_eq!(std::fs::read(dir.path().join("4")).unwrap(), b"");
    }
}
