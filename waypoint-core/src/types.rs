// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Newtype wrappers for validated inputs.
//!
//! Following the "Newtype" pattern in Rust to ensure valid state by construction.
//! All types validate their invariants at creation time.

use std::fmt;
use std::os::fd::RawFd;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ConfigError;

/// Highest verbosity understood by the checkpoint service.
const MAX_CRIU_LOG_LEVEL: u8 = 4;

/// Unique session identifier.
///
/// Backed by a version 4 UUID drawn from the operating system's CSPRNG, so
/// concurrent fuzzing workers never collide. Displays as the canonical
/// lowercase hyphenated form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a canonical identifier.
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        Uuid::parse_str(value)
            .map(Self)
            .map_err(|e| ConfigError::InvalidValue {
                name: "session_id",
                value: value.to_string(),
                reason: e.to_string(),
            })
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl TryFrom<String> for SessionId {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.to_string()
    }
}

/// Validated checkpoint service log level (0-4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct CriuLogLevel(u8);

impl CriuLogLevel {
    /// Most verbose level, used unless configured otherwise.
    pub const VERBOSE: Self = Self(MAX_CRIU_LOG_LEVEL);

    /// Create a new log level with bounds validation.
    pub fn new(level: u8) -> Result<Self, ConfigError> {
        if level > MAX_CRIU_LOG_LEVEL {
            return Err(ConfigError::InvalidValue {
                name: "log_level",
                value: level.to_string(),
                reason: format!("Log level must be between 0 and {}", MAX_CRIU_LOG_LEVEL),
            });
        }
        Ok(Self(level))
    }

    /// Get the inner level.
    pub fn value(&self) -> u8 {
        self.0
    }
}

impl Default for CriuLogLevel {
    fn default() -> Self {
        Self::VERBOSE
    }
}

impl fmt::Display for CriuLogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u8> for CriuLogLevel {
    type Error = ConfigError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CriuLogLevel> for u8 {
    fn from(level: CriuLogLevel) -> Self {
        level.0
    }
}

/// Reserved descriptor numbers of the fast-restart handshake.
///
/// The control channel is read by this process, the status channel is
/// written. Both numbers are owned exclusively by the handshake subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelLayout {
    control_fd: RawFd,
    status_fd: RawFd,
}

impl ChannelLayout {
    /// Descriptor the driver writes commands to.
    pub const DEFAULT_CONTROL_FD: RawFd = 198;
    /// Descriptor this process reports status on.
    pub const DEFAULT_STATUS_FD: RawFd = Self::DEFAULT_CONTROL_FD + 1;

    /// Create a layout, rejecting stdio numbers and identical pairs.
    pub fn new(control_fd: RawFd, status_fd: RawFd) -> Result<Self, ConfigError> {
        for (name, fd) in [("control_fd", control_fd), ("status_fd", status_fd)] {
            if fd <= libc::STDERR_FILENO {
                return Err(ConfigError::InvalidValue {
                    name,
                    value: fd.to_string(),
                    reason: "Reserved descriptors must not overlap stdio".to_string(),
                });
            }
        }

        if control_fd == status_fd {
            return Err(ConfigError::InvalidValue {
                name: "status_fd",
                value: status_fd.to_string(),
                reason: "Control and status descriptors must differ".to_string(),
            });
        }

        Ok(Self {
            control_fd,
            status_fd,
        })
    }

    /// Descriptor number of the read channel.
    pub fn control_fd(&self) -> RawFd {
        self.control_fd
    }

    /// Descriptor number of the write channel.
    pub fn status_fd(&self) -> RawFd {
        self.status_fd
    }
}

impl Default for ChannelLayout {
    fn default() -> Self {
        Self {
            control_fd: Self::DEFAULT_CONTROL_FD,
            status_fd: Self::DEFAULT_STATUS_FD,
        }
    }
}

impl fmt::Display for ChannelLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.control_fd, self.status_fd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_format() {
        let id = SessionId::generate().to_string();
        assert_eq!(id.len(), 36);
        assert_eq!(id, id.to_lowercase());
        assert_eq!(id.matches('-').count(), 4);
    }

    #[test]
    fn test_session_id_unique() {
        assert_ne!(SessionId::generate(), SessionId::generate());
    }

    #[test]
    fn test_session_id_parse() {
        let id = SessionId::generate();
        assert_eq!(SessionId::parse(&id.to_string()).unwrap(), id);
        assert!(SessionId::parse("not-a-uuid").is_err());
    }

    #[test]
    fn test_log_level_valid() {
        assert!(CriuLogLevel::new(0).is_ok());
        assert!(CriuLogLevel::new(4).is_ok());
        assert_eq!(CriuLogLevel::default().value(), 4);
    }

    #[test]
    fn test_log_level_invalid() {
        assert!(CriuLogLevel::new(5).is_err());
    }

    #[test]
    fn test_channel_layout() {
        let layout = ChannelLayout::default();
        assert_eq!(layout.control_fd(), 198);
        assert_eq!(layout.status_fd(), 199);
        assert!(ChannelLayout::new(2, 199).is_err());
        assert!(ChannelLayout::new(200, 200).is_err());
        assert!(ChannelLayout::new(220, 221).is_ok());
    }
}
