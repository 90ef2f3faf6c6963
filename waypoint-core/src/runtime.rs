// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Emulator-facing entry points.
//!
//! [`Runtime`] owns one session's components and is driven by the emulator:
//! every socket primitive goes through [`Runtime::on_socket_call`], sent
//! bytes through [`Runtime::on_send`], and test case reads through
//! [`Runtime::read_input`].

use std::os::fd::RawFd;

use crate::config::{EnvResolver, RuntimeConfig};
use crate::criu::{select_transport, CheckpointTransport, DumpSettings, SnapshotCoordinator, Verdict};
use crate::error::WaypointResult;
use crate::exit_code::ExitCodeFile;
use crate::forkserver::{ChannelReader, ChannelWriter, Handshake, HandshakeChannels, InputMode};
use crate::ledger::{DescriptorLedger, DescriptorRole};
use crate::session::Session;
use crate::shm::InputSource;
use crate::state::CheckpointState;
use crate::trigger::{Classification, SocketCall, TriggerPolicy};
use crate::types::ChannelLayout;

/// Coordinator and transport, present only when snapshots are enabled.
struct Checkpointing {
    coordinator: SnapshotCoordinator,
    transport: Box<dyn CheckpointTransport>,
}

pub struct Runtime {
    resolver: EnvResolver,
    config: RuntimeConfig,
    session: Session,
    policy: TriggerPolicy,
    ledger: DescriptorLedger,
    checkpointing: Option<Checkpointing>,
    channels: Option<HandshakeChannels>,
    input: InputSource,
}

impl Runtime {
    /// Resolve configuration and bring every component up.
    ///
    /// With snapshots enabled this also selects the transport, reserves the
    /// handshake channels on `layout` and publishes the discovery file. The
    /// option word is only announced once a restored execution runs with the
    /// driver's pipes inherited on `layout`.
    pub fn start(resolver: EnvResolver, layout: ChannelLayout) -> WaypointResult<Self> {
        let config = RuntimeConfig::load(&resolver)?;
        let session = Session::start(&config.marker_dir, config.snapshot_dir.clone())?;
        let ledger = DescriptorLedger::open(&config.fd_dir, config.capture_outputs)?;
        let policy = TriggerPolicy::new(config.recv_policy);

        let (checkpointing, channels) = if config.snapshots_enabled {
            let coordinator = SnapshotCoordinator::new(
                *session.id(),
                DumpSettings::from_config(&config)?,
                ExitCodeFile::new(&config.exit_code_file),
            );
            let transport = select_transport(&config)?;
            let channels = HandshakeChannels::acquire(layout)?;
            channels.publish(&config.pipes_file)?;
            (
                Some(Checkpointing {
                    coordinator,
                    transport,
                }),
                Some(channels),
            )
        } else {
            tracing::info!(session = %session.id(), "Snapshots disabled");
            (None, None)
        };

        let mut runtime = Self {
            resolver,
            config,
            session,
            policy,
            ledger,
            checkpointing,
            channels,
            input: InputSource::Unavailable,
        };
        runtime.negotiate_input(false)?;
        Ok(runtime)
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn policy(&self) -> &TriggerPolicy {
        &self.policy
    }

    /// Lifecycle state, when snapshots are enabled.
    pub fn checkpoint_state(&self) -> Option<CheckpointState> {
        self.checkpointing.as_ref().map(|c| c.coordinator.state())
    }

    /// Observe one socket call.
    ///
    /// Returns `Verdict::Terminate` when a checkpoint ended this execution;
    /// the caller must enact it before running any more target code. A call
    /// whose sequence number was already observed never acts twice.
    pub fn on_socket_call(&mut self, call: &SocketCall) -> WaypointResult<Verdict> {
        let replayed = self.policy.has_seen(call.seq);
        match self.policy.classify(call) {
            _ if replayed => Ok(Verdict::Resume),
            Classification::Irrelevant => Ok(Verdict::Resume),
            Classification::Descriptor(fd) => {
                if let Some(role) = DescriptorRole::from_op(call.op) {
                    self.ledger.register(fd, role)?;
                }
                Ok(Verdict::Resume)
            }
            Classification::Boundary => self.checkpoint(),
        }
    }

    /// Record bytes the target sent on `fd`.
    pub fn on_send(&mut self, fd: RawFd, bytes: &[u8]) -> WaypointResult<()> {
        self.ledger.capture_output(fd, bytes)
    }

    /// Replace `buf` with the current test case.
    pub fn read_input(&self, buf: &mut Vec<u8>) -> WaypointResult<usize> {
        self.input.read_into(buf)
    }

    /// Handshake over the reserved channels, if they were acquired.
    pub fn handshake(&self) -> Option<Handshake<ChannelReader<'_>, ChannelWriter<'_>>> {
        let channels = self.channels.as_ref()?;
        Some(Handshake::new(
            channels.control(),
            channels.status(),
            InputMode::from_config(&self.config),
        ))
    }

    fn checkpoint(&mut self) -> WaypointResult<Verdict> {
        let Some(checkpointing) = self.checkpointing.as_mut() else {
            tracing::debug!(session = %self.session.id(), "Boundary reached, snapshots disabled");
            return Ok(Verdict::Resume);
        };

        let verdict = checkpointing
            .coordinator
            .checkpoint(checkpointing.transport.as_mut());
        if verdict != Verdict::Resume {
            return Ok(verdict);
        }

        // A restored execution that cannot rebuild its state is a terminal
        // failure, decided by the coordinator like any other.
        match (self.on_restored(), self.checkpointing.as_mut()) {
            (Ok(()), _) => Ok(Verdict::Resume),
            (Err(e), Some(checkpointing)) => Ok(checkpointing.coordinator.fail_after_restore(e)),
            (Err(e), None) => Err(e),
        }
    }

    /// Rebuild state from durable inputs after resuming inside an image.
    fn on_restored(&mut self) -> WaypointResult<()> {
        self.config = RuntimeConfig::load(&self.resolver)?;
        self.ledger
            .retarget(&self.config.fd_dir, self.config.capture_outputs)?;

        if let Some(checkpointing) = self.checkpointing.as_mut() {
            match DumpSettings::from_config(&self.config) {
                Ok(settings) => checkpointing.coordinator.update_settings(settings),
                Err(e) => tracing::warn!(error = %e, "Keeping previous dump settings"),
            }
        }

        // The driver's pipes now sit on the reserved numbers.
        self.negotiate_input(true)
    }

    /// Select the input source and, when `announce` is set and the driver is
    /// attached, send the option word.
    ///
    /// On first start the reserved numbers hold freshly published pipes with
    /// no peer yet, so the handshake waits for the first restored execution.
    fn negotiate_input(&mut self, announce: bool) -> WaypointResult<()> {
        // Detach any previous segment before attaching the new one.
        self.input = InputSource::Unavailable;
        self.input = InputSource::negotiate(&self.config)?;

        let mode = InputMode::from_config(&self.config);
        if !mode.is_shared() {
            tracing::warn!(session = %self.session.id(), "forkserver not started");
            return Ok(());
        }

        match self.handshake() {
            None => tracing::warn!(
                session = %self.session.id(),
                reason = "handshake channels not reserved",
                "forkserver not started"
            ),
            Some(_) if !announce => tracing::info!(
                session = %self.session.id(),
                pipes_file = %self.config.pipes_file.display(),
                "Handshake waits for the driver to attach"
            ),
            Some(mut handshake) => handshake.announce()?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ENV_FILE_NAME;
    use crate::shm::DriverSegment;
    use crate::trigger::SocketOp;
    use tempfile::TempDir;

    fn runtime_with(dir: &TempDir, extra: &str) -> Runtime {
        let content = format!(
            "WAYPOINT_MARKER_DIR={0}\nWAYPOINT_FD_DIR={0}/fd\nWAYPOINT_CAPTURE_OUTPUTS=1\n{1}",
            dir.path().display(),
            extra
        );
        let env = dir.path().join(ENV_FILE_NAME);
        std::fs::write(&env, content).unwrap();
        Runtime::start(EnvResolver::new(env), ChannelLayout::default()).unwrap()
    }

    #[test]
    fn test_disabled_snapshots_resume_at_boundaries() {
        let dir = TempDir::new().unwrap();
        let mut runtime = runtime_with(&dir, "");
        assert!(runtime.checkpoint_state().is_none());
        assert!(runtime.handshake().is_none());

        let socket = SocketCall::new(0, SocketOp::Socket, -1).with_result(9);
        let send = SocketCall::new(1, SocketOp::Send, 9);
        let recv = SocketCall::new(2, SocketOp::Recv, 9);

        assert_eq!(runtime.on_socket_call(&socket).unwrap(), Verdict::Resume);
        runtime.on_send(9, b"hello").unwrap();
        assert_eq!(runtime.on_socket_call(&send).unwrap(), Verdict::Resume);
        assert_eq!(runtime.on_socket_call(&recv).unwrap(), Verdict::Resume);

        assert_eq!(runtime.policy().boundary_count(), 1);
        assert_eq!(std::fs::read(dir.path().join("fd").join("9")).unwrap(), b"hello");
        assert!(runtime.session().marker_path().exists());
    }

    #[test]
    fn test_input_from_file() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("case");
        std::fs::write(&input, b"case-bytes").unwrap();
        let runtime = runtime_with(&dir, &format!("WAYPOINT_INPUT_FILE={}\n", input.display()));

        let mut buf = Vec::new();
        assert_eq!(runtime.read_input(&mut buf).unwrap(), 10);
        assert_eq!(buf, b"case-bytes");
    }

    #[test]
    fn test_shared_input_without_snapshots() {
        let dir = TempDir::new().unwrap();
        let segment = DriverSegment::new(4096, b"shared-case");
        let runtime = runtime_with(&dir, &format!("__AFL_SHM_FUZZ_ID={}\n", segment.id));

        // No channels to announce on; input still comes from the segment.
        assert!(runtime.handshake().is_none());
        let mut buf = Vec::new();
        assert_eq!(runtime.read_input(&mut buf).unwrap(), 11);
        assert_eq!(buf, b"shared-case");
    }

    #[test]
    fn test_snapshots_require_output_dir() {
        let dir = TempDir::new().unwrap();
        let env = dir.path().join(ENV_FILE_NAME);
        std::fs::write(
            &env,
            format!(
                "WAYPOINT_SNAPSHOT=1\nWAYPOINT_MARKER_DIR={0}\nWAYPOINT_FD_DIR={0}/fd\n",
                dir.path().display()
            ),
        )
        .unwrap();

        assert!(Runtime::start(EnvResolver::new(env), ChannelLayout::default()).is_err());
    }
}
