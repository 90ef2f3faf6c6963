// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `waypoint channels` command - Reserve the handshake descriptors.
//!
//! Installs the pipe ends, writes the discovery file and prints what a
//! driver would read from it.

use std::path::Path;

use waypoint_core::forkserver::HandshakeChannels;
use waypoint_core::{ChannelLayout, EnvResolver, RuntimeConfig};

pub fn execute(
    env_file: &Path,
    control_fd: i32,
    status_fd: i32,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = RuntimeConfig::load(&EnvResolver::new(env_file))?;
    let layout = ChannelLayout::new(control_fd, status_fd)?;

    let channels = HandshakeChannels::acquire(layout)?;
    channels.publish(&config.pipes_file)?;

    let [control, status] = channels.discovery_entries()?;
    println!("Layout:   {}", layout);
    println!("Control:  {}", control.display());
    println!("Status:   {}", status.display());
    println!("Published to {}", config.pipes_file.display());

    channels.release();
    Ok(())
}
