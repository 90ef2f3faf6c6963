// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Persisted exit code read by the driver after this process exits.

use std::path::{Path, PathBuf};

use crate::error::{WaypointError, WaypointResult};

/// Exit code when a checkpoint image was written.
pub const DUMPED: i32 = 42;
/// Exit code when a checkpoint request failed.
pub const FAILED: i32 = -1;
/// Continuation code after a restore.
pub const RESTORED: i32 = 0;

/// A single decimal integer in a well-known file, no trailing newline.
#[derive(Debug, Clone)]
pub struct ExitCodeFile {
    path: PathBuf,
}

impl ExitCodeFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Overwrite the file with `code`.
    pub fn write(&self, code: i32) -> WaypointResult<()> {
        std::fs::write(&self.path, code.to_string()).map_err(|e| WaypointError::Io {
            context: "persisting exit code",
            source: e,
        })?;

        tracing::debug!(path = %self.path.display(), code = code, "Exit code persisted");
        Ok(())
    }

    /// Read the last persisted code. `None` if the file does not exist.
    pub fn read(&self) -> WaypointResult<Option<i32>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(WaypointError::Io {
                    context: "reading exit code",
                    source: e,
                })
            }
        };

        content
            .trim()
            .parse::<i32>()
            .map(Some)
            .map_err(|e| WaypointError::Io {
                context: "parsing exit code",
                source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            })
    }
}

/// Driver-facing meaning of a persisted code.
pub fn describe(code: i32) -> &'static str {
    match code {
        DUMPED => "checkpoint written, boundary reached cleanly",
        RESTORED => "restored and resumed",
        c if c < 0 => "checkpoint request failed",
        _ => "ordinary program exit",
    }
}
