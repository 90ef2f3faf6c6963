// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Custom error types for waypoint.
//!
//! Every failure is an explicit enum variant. Helpers below the snapshot
//! lifecycle only surface errors; the lifecycle alone decides whether an
//! error persists the failure sentinel and terminates the process.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::SessionId;

/// Top-level error type for the checkpoint core.
#[derive(Debug, Error)]
pub enum WaypointError {
    // =========================================================================
    // Configuration Errors - recoverable, caller decides the fallback
    // =========================================================================
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    // =========================================================================
    // Checkpoint Errors - fatal to the current checkpoint attempt
    // =========================================================================
    #[error("Checkpoint transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Checkpoint service reported failure (code: {code:?}): {}", .message.as_deref().unwrap_or("no message"))]
    CheckpointService {
        code: Option<i32>,
        message: Option<String>,
    },

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(#[from] StateTransitionError),

    // =========================================================================
    // Startup Errors - fuzzing cannot proceed without the handshake
    // =========================================================================
    #[error("Handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("Shared memory error: {0}")]
    SharedMemory(#[from] SharedMemoryError),

    // =========================================================================
    // System Errors
    // =========================================================================
    #[error("Resource exhausted: could not allocate {size} bytes for {what}")]
    ResourceExhausted { what: &'static str, size: usize },

    #[error("IO error: {context} - {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Configuration resolution and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Required configuration value is missing: {name}")]
    Missing { name: String },

    #[error("Invalid configuration value: {name} = {value:?} - {reason}")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("Failed to read configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Checkpoint transport errors. No partial-frame retry exists; every variant
/// aborts the current request.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Checkpoint service socket error at {address}: {reason}")]
    Socket { address: PathBuf, reason: String },

    #[error("Short write: sent {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },

    #[error("Short read: checkpoint service closed the channel without a response")]
    ShortRead,

    #[error("Frame too large: {size} > {max} bytes")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Failed to encode frame: {reason}")]
    Encode { reason: String },

    #[error("Failed to decode frame: {reason}")]
    Decode { reason: String },

    #[error("Unexpected response type {actual}, expected {expected}")]
    UnexpectedResponse { expected: u32, actual: u32 },

    #[error("Unexpected dump result code: {code}")]
    UnexpectedDumpCode { code: i32 },

    #[error("Checkpoint library unavailable: {reason}")]
    LibraryUnavailable { reason: String },
}

/// Fast-restart handshake errors - fatal at startup.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("Failed to reserve descriptor {fd}: {reason}")]
    Reserve { fd: i32, reason: String },

    #[error("Failed to create pipe: {reason}")]
    Pipe { reason: String },

    #[error("Failed to install pipe end on descriptor {fd}: {reason}")]
    Install { fd: i32, reason: String },

    #[error("Failed to publish discovery file {path}: {reason}")]
    Discovery { path: PathBuf, reason: String },

    #[error("Handshake protocol violation: {reason}")]
    Protocol { reason: String },
}

/// Shared input buffer errors.
#[derive(Debug, Error)]
pub enum SharedMemoryError {
    #[error("Invalid shared memory identifier: {value:?}")]
    InvalidId { value: String },

    #[error("Failed to attach shared memory segment {id}: {reason}")]
    Attach { id: i32, reason: String },

    #[error("Shared memory segment {id} attached at a null address")]
    NullBuffer { id: i32 },

    #[error("Shared input of {len} bytes exceeds segment capacity {capacity}")]
    InputTooLarge { len: usize, capacity: usize },
}

/// State transition errors for the checkpoint lifecycle.
#[derive(Debug, Error)]
pub enum StateTransitionError {
    #[error("Cannot transition from {from} to {to} in session {session}")]
    InvalidTransition {
        session: SessionId,
        from: &'static str,
        to: &'static str,
    },

    #[error("Session {session} is in terminal state: {state}")]
    TerminalState {
        session: SessionId,
        state: &'static str,
    },
}

/// Result type alias using WaypointError.
pub type WaypointResult<T> = Result<T, WaypointError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::Missing {
            name: "CRIU_SNAPSHOT_OUT_DIR".to_string(),
        };
        assert!(err.to_string().contains("CRIU_SNAPSHOT_OUT_DIR"));
    }

    #[test]
    fn test_error_chain() {
        let transport_err = TransportError::FrameTooLarge {
            size: 2048,
            max: 1024,
        };
        let err: WaypointError = transport_err.into();
        assert!(matches!(err, WaypointError::Transport(_)));
        assert!(err.to_string().contains("2048"));
    }

    #[test]
    fn test_service_error_without_message() {
        let err = WaypointError::CheckpointService {
            code: Some(-5),
            message: None,
        };
        let text = err.to_string();
        assert!(text.contains("-5"));
        assert!(text.contains("no message"));
    }
}
