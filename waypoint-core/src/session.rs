// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Session identity and marker files.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{WaypointError, WaypointResult};
use crate::types::SessionId;

/// One execution session. Immutable after creation.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    id: SessionId,
    marker_path: PathBuf,
    snapshot_dir: Option<PathBuf>,
}

impl Session {
    /// Start a session: draw a fresh id and create `<marker_dir>/<id>` as a
    /// zero-length marker so out-of-band tooling can see it started.
    ///
    /// # Errors
    /// Returns `WaypointError::Io` if the marker cannot be created.
    pub fn start(marker_dir: &Path, snapshot_dir: Option<PathBuf>) -> WaypointResult<Self> {
        let id = SessionId::generate();
        let marker_path = marker_dir.join(id.to_string());

        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&marker_path)
            .map_err(|e| WaypointError::Io {
                context: "creating session marker",
                source: e,
            })?;

        tracing::info!(
            session = %id,
            marker = %marker_path.display(),
            "Session started"
        );

        Ok(Self {
            id,
            marker_path,
            snapshot_dir,
        })
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn marker_path(&self) -> &Path {
        &self.marker_path
    }

    pub fn snapshot_dir(&self) -> Option<&Path> {
        self.snapshot_dir.as_deref()
    }
}
