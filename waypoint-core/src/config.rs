// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Configuration resolution with strict validation.
//!
//! Values come from a line-oriented `KEY=VALUE` env file in the working
//! directory. When that file does not exist the process environment is
//! consulted instead. A present file shadows the environment entirely: a key
//! missing from the file is absent even if the environment defines it.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::criu::TransportPreference;
use crate::error::{ConfigError, WaypointResult};
use crate::shm::SharedInputRegion;
use crate::trigger::RecvPolicy;
use crate::types::CriuLogLevel;

/// File name of the env file, resolved relative to the working directory.
pub const ENV_FILE_NAME: &str = "envfile";

/// Snapshot output directory.
pub const KEY_SNAPSHOT_DIR: &str = "CRIU_SNAPSHOT_OUT_DIR";
/// Checkpoint service socket address.
pub const KEY_SERVICE_SOCKET: &str = "WAYPOINT_CRIU_SOCKET";
/// Checkpoint service log level.
pub const KEY_LOG_LEVEL: &str = "WAYPOINT_CRIU_LOG_LEVEL";
/// Leave the process running after a dump.
pub const KEY_LEAVE_RUNNING: &str = "WAYPOINT_LEAVE_RUNNING";
/// Transport selection.
pub const KEY_TRANSPORT: &str = "WAYPOINT_TRANSPORT";
/// Enables checkpoint requests at boundaries.
pub const KEY_SNAPSHOT: &str = "WAYPOINT_SNAPSHOT";
/// Recv boundary policy.
pub const KEY_RECV_POLICY: &str = "WAYPOINT_RECV_POLICY";
/// Capture sent bytes per descriptor.
pub const KEY_CAPTURE_OUTPUTS: &str = "WAYPOINT_CAPTURE_OUTPUTS";
/// Descriptor bookkeeping directory.
pub const KEY_FD_DIR: &str = "WAYPOINT_FD_DIR";
/// Scratch directory for session markers.
pub const KEY_MARKER_DIR: &str = "WAYPOINT_MARKER_DIR";
/// Persisted exit code file.
pub const KEY_EXIT_CODE_FILE: &str = "WAYPOINT_EXIT_CODE_FILE";
/// Handshake discovery file.
pub const KEY_PIPES_FILE: &str = "WAYPOINT_PIPES_FILE";
/// File-mode input path.
pub const KEY_INPUT_FILE: &str = "WAYPOINT_INPUT_FILE";
/// Shared input buffer identifier, as exported by the fuzzer.
pub const KEY_SHM_FUZZ_ID: &str = "__AFL_SHM_FUZZ_ID";

fn default_service_socket() -> PathBuf {
    PathBuf::from("/tmp/criu_service.socket")
}

fn default_fd_dir() -> PathBuf {
    PathBuf::from("fd")
}

fn default_marker_dir() -> PathBuf {
    PathBuf::from("/tmp")
}

fn default_exit_code_file() -> PathBuf {
    PathBuf::from("exit_code")
}

fn default_pipes_file() -> PathBuf {
    PathBuf::from("pipes")
}

/// Resolves named values from the env file, falling back to the environment.
#[derive(Debug, Clone)]
pub struct EnvResolver {
    path: PathBuf,
}

impl EnvResolver {
    /// Resolver backed by an explicit env file path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Resolver backed by `envfile` in the current working directory.
    pub fn in_current_dir() -> Self {
        Self::new(ENV_FILE_NAME)
    }

    /// Path of the backing env file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolve `name`.
    ///
    /// Returns `Ok(None)` when the key is absent, which is distinct from a key
    /// with an empty value. Each call returns an independently owned copy.
    ///
    /// # Errors
    /// Returns `ConfigError::Io` only when the env file exists but cannot be read.
    pub fn resolve(&self, name: &str) -> Result<Option<String>, ConfigError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(lookup(&content, name)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(std::env::var(name)
                .ok()
                .map(|value| first_line(&value).to_string())),
            Err(e) => Err(ConfigError::Io {
                path: self.path.clone(),
                source: e,
            }),
        }
    }

    /// Resolve `name`, turning absence into `ConfigError::Missing`.
    pub fn require(&self, name: &str) -> Result<String, ConfigError> {
        self.resolve(name)?.ok_or_else(|| ConfigError::Missing {
            name: name.to_string(),
        })
    }
}

impl Default for EnvResolver {
    fn default() -> Self {
        Self::in_current_dir()
    }
}

/// Find `name` in env file content. The first matching line wins.
fn lookup(content: &str, name: &str) -> Option<String> {
    content.lines().find_map(|line| {
        let (key, value) = line.split_once('=')?;
        (key.trim() == name).then(|| value.to_string())
    })
}

fn first_line(value: &str) -> &str {
    value.split('\n').next().unwrap_or_default()
}

/// Validated runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub snapshot_dir: Option<PathBuf>,
    pub service_socket: PathBuf,
    pub log_level: CriuLogLevel,
    pub leave_running: bool,
    pub transport: TransportPreference,
    pub snapshots_enabled: bool,
    pub recv_policy: RecvPolicy,
    pub capture_outputs: bool,
    pub fd_dir: PathBuf,
    pub marker_dir: PathBuf,
    pub exit_code_file: PathBuf,
    pub pipes_file: PathBuf,
    pub input_file: Option<PathBuf>,
    pub shm_fuzz_id: Option<i32>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            snapshot_dir: None,
            service_socket: default_service_socket(),
            log_level: CriuLogLevel::default(),
            leave_running: true,
            transport: TransportPreference::default(),
            snapshots_enabled: false,
            recv_policy: RecvPolicy::default(),
            capture_outputs: false,
            fd_dir: default_fd_dir(),
            marker_dir: default_marker_dir(),
            exit_code_file: default_exit_code_file(),
            pipes_file: default_pipes_file(),
            input_file: None,
            shm_fuzz_id: None,
        }
    }
}

impl RuntimeConfig {
    /// Resolve and validate every key.
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidValue` for any malformed value and
    /// `ConfigError::Io` if the env file cannot be read.
    pub fn load(resolver: &EnvResolver) -> WaypointResult<Self> {
        let path = |key: &str, default: fn() -> PathBuf| -> Result<PathBuf, ConfigError> {
            Ok(resolver.resolve(key)?.map(PathBuf::from).unwrap_or_else(default))
        };

        let log_level = match resolver.resolve(KEY_LOG_LEVEL)? {
            Some(raw) => {
                let level = raw
                    .trim()
                    .parse::<u8>()
                    .map_err(|e| ConfigError::InvalidValue {
                        name: KEY_LOG_LEVEL,
                        value: raw.clone(),
                        reason: e.to_string(),
                    })?;
                CriuLogLevel::new(level).map_err(|_| ConfigError::InvalidValue {
                    name: KEY_LOG_LEVEL,
                    value: raw.clone(),
                    reason: format!("must be at most {}", CriuLogLevel::VERBOSE),
                })?
            }
            None => CriuLogLevel::default(),
        };

        let transport = match resolver.resolve(KEY_TRANSPORT)? {
            Some(raw) => raw
                .parse::<TransportPreference>()
                .map_err(|reason| ConfigError::InvalidValue {
                    name: KEY_TRANSPORT,
                    value: raw.clone(),
                    reason,
                })?,
            None => TransportPreference::default(),
        };

        let recv_policy = match resolver.resolve(KEY_RECV_POLICY)? {
            Some(raw) => raw
                .parse::<RecvPolicy>()
                .map_err(|reason| ConfigError::InvalidValue {
                    name: KEY_RECV_POLICY,
                    value: raw.clone(),
                    reason,
                })?,
            None => RecvPolicy::default(),
        };

        let shm_fuzz_id = match resolver.resolve(KEY_SHM_FUZZ_ID)? {
            Some(raw) => Some(SharedInputRegion::parse_id(&raw).map_err(|e| {
                ConfigError::InvalidValue {
                    name: KEY_SHM_FUZZ_ID,
                    value: raw.clone(),
                    reason: e.to_string(),
                }
            })?),
            None => None,
        };

        let config = Self {
            snapshot_dir: resolver.resolve(KEY_SNAPSHOT_DIR)?.map(PathBuf::from),
            service_socket: path(KEY_SERVICE_SOCKET, default_service_socket)?,
            log_level,
            leave_running: parse_flag(resolver, KEY_LEAVE_RUNNING, true)?,
            transport,
            snapshots_enabled: parse_flag(resolver, KEY_SNAPSHOT, false)?,
            recv_policy,
            capture_outputs: parse_flag(resolver, KEY_CAPTURE_OUTPUTS, false)?,
            fd_dir: path(KEY_FD_DIR, default_fd_dir)?,
            marker_dir: path(KEY_MARKER_DIR, default_marker_dir)?,
            exit_code_file: path(KEY_EXIT_CODE_FILE, default_exit_code_file)?,
            pipes_file: path(KEY_PIPES_FILE, default_pipes_file)?,
            input_file: resolver.resolve(KEY_INPUT_FILE)?.map(PathBuf::from),
            shm_fuzz_id,
        };

        tracing::debug!(
            env_file = %resolver.path().display(),
            snapshots_enabled = config.snapshots_enabled,
            transport = %config.transport,
            recv_policy = %config.recv_policy,
            "Runtime configuration resolved"
        );

        Ok(config)
    }

    /// Snapshot directory, required once a checkpoint is requested.
    pub fn require_snapshot_dir(&self) -> Result<&Path, ConfigError> {
        self.snapshot_dir
            .as_deref()
            .ok_or_else(|| ConfigError::Missing {
                name: KEY_SNAPSHOT_DIR.to_string(),
            })
    }
}

/// Parse a boolean flag. An empty value counts as false.
fn parse_flag(
    resolver: &EnvResolver,
    name: &'static str,
    default: bool,
) -> Result<bool, ConfigError> {
    let Some(raw) = resolver.resolve(name)? else {
        return Ok(default);
    };

    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            name,
            value: raw,
            reason: "Expected a boolean (1/0, true/false, yes/no, on/off)".to_string(),
        }),
    }
}
