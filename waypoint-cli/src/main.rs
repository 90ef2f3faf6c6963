// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Waypoint CLI
//!
//! Command-line interface over the waypoint checkpoint core, for drivers and
//! operators inspecting a state folder.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

/// Waypoint - checkpoint coordination for snapshot-based fuzzing
#[derive(Parser)]
#[command(name = "waypoint")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Env file consulted before the process environment
    #[arg(short, long, default_value = waypoint_core::config::ENV_FILE_NAME)]
    pub env_file: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print machine-readable JSON where supported
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Resolve one configuration value
    Resolve {
        /// Key to look up
        name: String,
    },

    /// Start a session and create its marker file
    Session,

    /// Reserve the handshake channels and publish the discovery file
    Channels {
        /// Control channel descriptor
        #[arg(long, default_value_t = waypoint_core::ChannelLayout::DEFAULT_CONTROL_FD)]
        control_fd: i32,

        /// Status channel descriptor
        #[arg(long, default_value_t = waypoint_core::ChannelLayout::DEFAULT_STATUS_FD)]
        status_fd: i32,
    },

    /// Run socket operations through the trigger policy
    Classify {
        /// Boundary policy for recv without a prior send
        #[arg(long, default_value = "after-send")]
        policy: waypoint_core::RecvPolicy,

        /// Operations in order, e.g. `socket=3 connect send recv`
        #[arg(required = true)]
        ops: Vec<String>,
    },

    /// Checkpoint this process through the full lifecycle
    Dump,

    /// Explain the persisted exit code
    Status,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG wins when set.
    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Dispatch to command handlers
    match cli.command {
        Commands::Resolve { name } => commands::resolve::execute(&cli.env_file, &name),
        Commands::Session => commands::session::execute(&cli.env_file, cli.json),
        Commands::Channels {
            control_fd,
            status_fd,
        } => commands::channels::execute(&cli.env_file, control_fd, status_fd),
        Commands::Classify { policy, ops } => commands::classify::execute(policy, &ops, cli.json),
        Commands::Dump => commands::dump::execute(&cli.env_file),
        Commands::Status => commands::status::execute(&cli.env_file, cli.json),
    }
}
