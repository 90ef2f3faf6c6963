// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Waypoint Core Library
//!
//! Checkpoint coordination for processes running under an emulator inside a
//! fuzzing loop. Decides when the target may be checkpointed, drives the
//! checkpoint service request, interprets dump versus restore, and hands
//! control to the fuzzing driver through a fast-restart handshake.

pub mod config;
pub mod criu;
pub mod error;
pub mod exit_code;
pub mod forkserver;
pub mod ledger;
pub mod runtime;
pub mod session;
pub mod shm;
pub mod state;
pub mod trigger;
pub mod types;

// Re-export commonly used types
pub use config::{EnvResolver, RuntimeConfig};
pub use criu::{CheckpointTransport, SnapshotCoordinator, Verdict};
pub use error::{
    ConfigError, HandshakeError, SharedMemoryError, StateTransitionError, TransportError,
    WaypointError, WaypointResult,
};
pub use exit_code::ExitCodeFile;
pub use runtime::Runtime;
pub use session::Session;
pub use state::{CheckpointState, CheckpointStateMachine};
pub use trigger::{Classification, RecvPolicy, SocketCall, SocketOp, TriggerPolicy};
pub use types::{ChannelLayout, CriuLogLevel, SessionId};
