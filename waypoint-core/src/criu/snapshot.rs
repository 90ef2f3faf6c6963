// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Snapshot lifecycle coordination.
//!
//! The coordinator is the only place that decides between persisting a
//! sentinel and terminating, or resuming. The call site of [`checkpoint`] is
//! reached twice: once when the image is taken and once in every execution
//! restored from it. Nothing opened before the call is assumed valid after
//! it; the snapshot directory is reopened on every attempt.
//!
//! [`checkpoint`]: SnapshotCoordinator::checkpoint

use std::fs::OpenOptions;
use std::io::Write;
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;

use super::transport::{CheckpointTransport, ServiceHandles};
use super::wire::{SnapshotRequest, SnapshotResult, SnapshotStatus};
use crate::config::RuntimeConfig;
use crate::error::{WaypointError, WaypointResult};
use crate::exit_code::{self, ExitCodeFile};
use crate::state::{CheckpointState, CheckpointStateMachine};
use crate::types::{CriuLogLevel, SessionId};

/// Parameters of one dump request.
#[derive(Debug, Clone)]
pub struct DumpSettings {
    pub snapshot_dir: PathBuf,
    pub log_level: CriuLogLevel,
    pub leave_running: bool,
}

impl DumpSettings {
    /// Settings from a resolved configuration.
    ///
    /// # Errors
    /// `ConfigError::Missing` if no snapshot directory is configured.
    pub fn from_config(config: &RuntimeConfig) -> WaypointResult<Self> {
        Ok(Self {
            snapshot_dir: config.require_snapshot_dir()?.to_path_buf(),
            log_level: config.log_level,
            leave_running: config.leave_running,
        })
    }
}

/// What the caller must do after a checkpoint attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Verdict {
    /// Return normally from the call site.
    Resume,
    /// End the process with `code`, skipping exit handlers.
    Terminate { code: i32 },
}

impl Verdict {
    /// Carry out the verdict. Returns only for `Resume`.
    pub fn enact(self) {
        if let Self::Terminate { code } = self {
            terminate(code);
        }
    }
}

/// Flush stdio and end the process without running exit handlers, which
/// could touch state that is already part of a checkpoint image.
pub fn terminate(code: i32) -> ! {
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();
    // SAFETY: _exit never returns and takes no pointers.
    unsafe { libc::_exit(code) }
}

/// Drives one session's checkpoint requests.
pub struct SnapshotCoordinator {
    machine: CheckpointStateMachine,
    settings: DumpSettings,
    exit_codes: ExitCodeFile,
}

impl SnapshotCoordinator {
    pub fn new(session: SessionId, settings: DumpSettings, exit_codes: ExitCodeFile) -> Self {
        Self {
            machine: CheckpointStateMachine::new(session),
            settings,
            exit_codes,
        }
    }

    pub fn state(&self) -> CheckpointState {
        self.machine.state()
    }

    pub fn settings(&self) -> &DumpSettings {
        &self.settings
    }

    /// Replace the dump settings, e.g. after re-resolving configuration in a
    /// restored execution.
    pub fn update_settings(&mut self, settings: DumpSettings) {
        self.settings = settings;
    }

    /// Request a checkpoint and interpret the outcome.
    ///
    /// Every path rewrites the persisted exit code before returning.
    pub fn checkpoint(&mut self, transport: &mut dyn CheckpointTransport) -> Verdict {
        if let Err(e) = self.machine.transition_to(CheckpointState::Requesting) {
            return self.fail(e.into(), ServiceHandles::default());
        }

        let images_dir = match self.open_snapshot_dir() {
            Ok(fd) => fd,
            Err(e) => return self.fail(e, ServiceHandles::default()),
        };

        let request = SnapshotRequest::dump(
            images_dir.as_raw_fd(),
            self.settings.log_level,
            self.settings.leave_running,
        );
        let mut handles = ServiceHandles::with_images_dir(images_dir);

        tracing::info!(
            session = %self.machine.session(),
            transport = transport.name(),
            snapshot_dir = %self.settings.snapshot_dir.display(),
            transitions = self.machine.transition_count(),
            "Requesting checkpoint"
        );

        // Handles stay open until control is back here.
        match transport.dump(&request, &mut handles) {
            Ok(result) => self.interpret(result, handles),
            Err(e) => self.fail(e, handles),
        }
    }

    fn interpret(&mut self, result: SnapshotResult, handles: ServiceHandles) -> Verdict {
        match result.status {
            SnapshotStatus::Error => self.fail(
                WaypointError::CheckpointService {
                    code: result.service_code,
                    message: result.message,
                },
                handles,
            ),
            SnapshotStatus::DumpedAndExited => {
                handles.release();
                self.settle(CheckpointState::Dumped);
                self.persist(exit_code::DUMPED);
                tracing::info!(session = %self.machine.session(), "Checkpoint written");
                Verdict::Terminate {
                    code: exit_code::DUMPED,
                }
            }
            SnapshotStatus::Restored => {
                handles.release();
                self.settle(CheckpointState::Restored);
                self.persist(exit_code::RESTORED);
                tracing::info!(
                    session = %self.machine.session(),
                    already_restored = ?result.restored_flag,
                    "Resumed from checkpoint"
                );
                Verdict::Resume
            }
        }
    }

    /// End a restored execution that could not rebuild its state.
    ///
    /// Overwrites the restored sentinel so the driver never sees a resumed
    /// execution that went on to die.
    pub fn fail_after_restore(&mut self, error: WaypointError) -> Verdict {
        self.fail(error, ServiceHandles::default())
    }

    /// Failure path: the socket is deliberately left open.
    fn fail(&mut self, error: WaypointError, handles: ServiceHandles) -> Verdict {
        let abandoned = handles.abandon();

        eprintln!("waypoint: checkpoint failed: {}", error);
        tracing::error!(
            session = %self.machine.session(),
            error = %error,
            abandoned_socket = ?abandoned,
            "Checkpoint failed"
        );

        self.settle(CheckpointState::Failed);
        self.persist(exit_code::FAILED);
        Verdict::Terminate {
            code: exit_code::FAILED,
        }
    }

    fn settle(&mut self, target: CheckpointState) {
        if let Err(e) = self.machine.transition_to(target) {
            tracing::warn!(error = %e, "Lifecycle transition rejected");
        }
    }

    fn persist(&self, code: i32) {
        if let Err(e) = self.exit_codes.write(code) {
            eprintln!("waypoint: {}", e);
            tracing::error!(error = %e, code = code, "Failed to persist exit code");
        }
    }

    fn open_snapshot_dir(&self) -> WaypointResult<OwnedFd> {
        let dir = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_DIRECTORY)
            .open(&self.settings.snapshot_dir)
            .map_err(|e| WaypointError::Io {
                context: "opening snapshot directory",
                source: e,
            })?;
        Ok(dir.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use std::fs::File;
    use std::os::fd::RawFd;
    use tempfile::TempDir;

    /// Returns a fixed dump code and parks a stand-in socket in the handles.
    struct Scripted {
        code: i32,
        socket_path: PathBuf,
        socket_fd: Option<RawFd>,
    }

    impl CheckpointTransport for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn dump(
            &mut self,
            request: &SnapshotRequest,
            handles: &mut ServiceHandles,
        ) -> WaypointResult<SnapshotResult> {
            assert!(request.images_dir_fd >= 0);
            let socket: OwnedFd = File::create(&self.socket_path).unwrap().into();
            self.socket_fd = Some(socket.as_raw_fd());
            handles.socket = Some(socket);
            Ok(SnapshotResult::from_dump_code(self.code)?)
        }
    }

    struct Fixture {
        dir: TempDir,
        coordinator: SnapshotCoordinator,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let snapshot_dir = dir.path().join("snapshot");
        std::fs::create_dir(&snapshot_dir).unwrap();
        let settings = DumpSettings {
            snapshot_dir,
            log_level: CriuLogLevel::default(),
            leave_running: true,
        };
        let coordinator = SnapshotCoordinator::new(
            SessionId::generate(),
            settings,
            ExitCodeFile::new(dir.path().join("exit_code")),
        );
        Fixture { dir, coordinator }
    }

    fn scripted(fixture: &Fixture, code: i32) -> Scripted {
        Scripted {
            code,
            socket_path: fixture.dir.path().join("socket-stand-in"),
            socket_fd: None,
        }
    }

    fn persisted(fixture: &Fixture) -> String {
        std::fs::read_to_string(fixture.dir.path().join("exit_code")).unwrap()
    }

    #[test]
    fn test_dumped_terminates_with_sentinel() {
        let mut f = fixture();
        let mut transport = scripted(&f, 0);

        let verdict = f.coordinator.checkpoint(&mut transport);

        assert_eq!(verdict, Verdict::Terminate { code: 42 });
        assert_eq!(f.coordinator.state(), CheckpointState::Dumped);
        assert_eq!(persisted(&f), "42");
    }

    #[test]
    fn test_restored_resumes() {
        let mut f = fixture();
        let mut transport = scripted(&f, 1);

        assert_eq!(f.coordinator.checkpoint(&mut transport), Verdict::Resume);
        assert_eq!(f.coordinator.state(), CheckpointState::Restored);
        assert_eq!(persisted(&f), "0");

        // A restored execution may checkpoint again.
        let mut transport = scripted(&f, 0);
        assert_eq!(
            f.coordinator.checkpoint(&mut transport),
            Verdict::Terminate { code: 42 }
        );
    }

    #[test]
    fn test_failure_after_restore_overwrites_sentinel() {
        let mut f = fixture();
        let mut transport = scripted(&f, 1);
        assert_eq!(f.coordinator.checkpoint(&mut transport), Verdict::Resume);
        assert_eq!(persisted(&f), "0");

        let error = WaypointError::Io {
            context: "reopening descriptor directory",
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert_eq!(
            f.coordinator.fail_after_restore(error),
            Verdict::Terminate { code: -1 }
        );
        assert_eq!(f.coordinator.state(), CheckpointState::Failed);
        assert_eq!(persisted(&f), "-1");
    }

    #[test]
    fn test_service_error_leaves_socket_open() {
        let mut f = fixture();
        let mut transport = scripted(&f, -5);

        let verdict = f.coordinator.checkpoint(&mut transport);

        assert_eq!(verdict, Verdict::Terminate { code: -1 });
        assert_eq!(f.coordinator.state(), CheckpointState::Failed);
        assert_eq!(persisted(&f), "-1");

        let fd = transport.socket_fd.unwrap();
        assert!(nix::fcntl::fcntl(fd, nix::fcntl::FcntlArg::F_GETFD).is_ok());
        nix::unistd::close(fd).unwrap();
    }

    #[test]
    fn test_failed_then_dumped_keeps_last_code() {
        let mut f = fixture();
        let mut failing = scripted(&f, -5);
        let _ = f.coordinator.checkpoint(&mut failing);
        if let Some(fd) = failing.socket_fd {
            nix::unistd::close(fd).unwrap();
        }
        assert_eq!(persisted(&f), "-1");

        // A fresh process instance writing to the same file.
        let mut second = SnapshotCoordinator::new(
            SessionId::generate(),
            f.coordinator.settings().clone(),
            ExitCodeFile::new(f.dir.path().join("exit_code")),
        );
        let mut dumping = scripted(&f, 0);
        let _ = second.checkpoint(&mut dumping);

        assert_eq!(persisted(&f), "42");
    }

    #[test]
    fn test_missing_snapshot_dir_fails() {
        let mut f = fixture();
        f.coordinator.update_settings(DumpSettings {
            snapshot_dir: f.dir.path().join("absent"),
            log_level: CriuLogLevel::default(),
            leave_running: true,
        });
        let mut transport = scripted(&f, 0);

        assert_eq!(
            f.coordinator.checkpoint(&mut transport),
            Verdict::Terminate { code: -1 }
        );
        // Transport never reached.
        assert!(transport.socket_fd.is_none());
        assert_eq!(persisted(&f), "-1");
    }

    #[test]
    fn test_transport_error_is_fatal() {
        struct Broken;
        impl CheckpointTransport for Broken {
            fn name(&self) -> &'static str {
                "broken"
            }
            fn dump(
                &mut self,
                _request: &SnapshotRequest,
                _handles: &mut ServiceHandles,
            ) -> WaypointResult<SnapshotResult> {
                Err(TransportError::ShortRead.into())
            }
        }

        let mut f = fixture();
        assert_eq!(
            f.coordinator.checkpoint(&mut Broken),
            Verdict::Terminate { code: -1 }
        );
        assert_eq!(persisted(&f), "-1");
    }

    #[test]
    fn test_settings_require_snapshot_dir() {
        let config = RuntimeConfig::default();
        assert!(DumpSettings::from_config(&config).is_err());
    }
}
