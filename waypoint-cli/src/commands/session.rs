// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `waypoint session` command - Start a session and print its identity.

use std::path::Path;

use waypoint_core::{EnvResolver, RuntimeConfig, Session};

pub fn execute(env_file: &Path, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = RuntimeConfig::load(&EnvResolver::new(env_file))?;
    let session = Session::start(&config.marker_dir, config.snapshot_dir.clone())?;

    if json {
        println!("{}", serde_json::to_string_pretty(&session)?);
        return Ok(());
    }

    println!("Session:  {}", session.id());
    println!("Marker:   {}", session.marker_path().display());
    match session.snapshot_dir() {
        Some(dir) => println!("Snapshot: {}", dir.display()),
        None => println!("Snapshot: (not configured)"),
    }
    Ok(())
}
