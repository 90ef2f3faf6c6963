// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `waypoint dump` command - Self-checkpoint through the full lifecycle.
//!
//! Exits with the dumped sentinel once the image is written, with the
//! failure sentinel on any error, and returns normally when resumed from
//! the image.

use std::path::Path;

use waypoint_core::criu::{select_transport, DumpSettings};
use waypoint_core::{EnvResolver, ExitCodeFile, RuntimeConfig, Session, SnapshotCoordinator};

pub fn execute(env_file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = RuntimeConfig::load(&EnvResolver::new(env_file))?;
    let session = Session::start(&config.marker_dir, config.snapshot_dir.clone())?;
    let settings = DumpSettings::from_config(&config)?;
    let mut transport = select_transport(&config)?;

    let mut coordinator = SnapshotCoordinator::new(
        *session.id(),
        settings,
        ExitCodeFile::new(&config.exit_code_file),
    );

    coordinator.checkpoint(transport.as_mut()).enact();

    println!("Restored from checkpoint (session {})", session.id());
    Ok(())
}
