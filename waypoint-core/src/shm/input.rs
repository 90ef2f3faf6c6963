// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Where the target's test case comes from.

use std::path::PathBuf;

use super::region::SharedInputRegion;
use crate::config::RuntimeConfig;
use crate::error::{WaypointError, WaypointResult};

/// Negotiated input delivery.
pub enum InputSource {
    /// Driver-managed shared buffer.
    SharedMemory(SharedInputRegion),
    /// A named file, reread on every call.
    File(PathBuf),
    /// Nothing configured; reads yield no data.
    Unavailable,
}

impl InputSource {
    /// Pick the source from configuration. A shared buffer id wins over a file.
    ///
    /// # Errors
    /// `SharedMemory` errors when an id is configured but cannot be attached.
    pub fn negotiate(config: &RuntimeConfig) -> WaypointResult<Self> {
        let source = match (config.shm_fuzz_id, &config.input_file) {
            (Some(id), _) => Self::SharedMemory(SharedInputRegion::attach(id)?),
            (None, Some(path)) => Self::File(path.clone()),
            (None, None) => Self::Unavailable,
        };

        tracing::info!(mode = source.mode_name(), "Input source selected");
        Ok(source)
    }

    pub fn mode_name(&self) -> &'static str {
        match self {
            Self::SharedMemory(_) => "shared-memory",
            Self::File(_) => "file",
            Self::Unavailable => "unavailable",
        }
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, Self::SharedMemory(_))
    }

    /// Replace `buf` with the current test case and return its length.
    pub fn read_into(&self, buf: &mut Vec<u8>) -> WaypointResult<usize> {
        match self {
            Self::SharedMemory(region) => Ok(region.read_into(buf)?),
            Self::File(path) => {
                *buf = std::fs::read(path).map_err(|e| WaypointError::Io {
                    context: "reading input file",
                    source: e,
                })?;
                Ok(buf.len())
            }
            Self::Unavailable => {
                buf.clear();
                Ok(0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shm::region::tests::DriverSegment;
    use tempfile::TempDir;

    #[test]
    fn test_shared_memory_preferred() {
        let dir = TempDir::new().unwrap();
        let segment = DriverSegment::new(4096, b"from-shm");
        let config = RuntimeConfig {
            shm_fuzz_id: Some(segment.id),
            input_file: Some(dir.path().join("input")),
            ..Default::default()
        };

        let source = InputSource::negotiate(&config).unwrap();
        assert!(source.is_shared());

        let mut buf = Vec::new();
        source.read_into(&mut buf).unwrap();
        assert_eq!(buf, b"from-shm");
    }

    #[test]
    fn test_file_source() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("input");
        std::fs::write(&path, b"from-file").unwrap();
        let config = RuntimeConfig {
            input_file: Some(path),
            ..Default::default()
        };

        let source = InputSource::negotiate(&config).unwrap();
        assert_eq!(source.mode_name(), "file");

        let mut buf = Vec::new();
        assert_eq!(source.read_into(&mut buf).unwrap(), 9);
        assert_eq!(buf, b"from-file");
    }

    #[test]
    fn test_unavailable_reads_nothing() {
        let source = InputSource::negotiate(&RuntimeConfig::default()).unwrap();
        let mut buf = vec![7];
        assert_eq!(source.read_into(&mut buf).unwrap(), 0);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_bad_segment_is_error() {
        let config = RuntimeConfig {
            shm_fuzz_id: Some(i32::MAX),
            ..Default::default()
        };
        assert!(matches!(
            InputSource::negotiate(&config),
            Err(WaypointError::SharedMemory(_))
        ));
    }
}
