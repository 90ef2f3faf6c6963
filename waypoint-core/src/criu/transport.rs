// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Checkpoint transports.
//!
//! Two strategies implement [`CheckpointTransport`]: framed RPC over a
//! `SOCK_SEQPACKET` unix socket, and direct calls into a dynamically loaded
//! checkpoint library. The strategy is chosen once at startup by probing
//! which integration is available.

use std::fmt;
use std::os::fd::{AsRawFd, IntoRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use nix::sys::socket::{
    connect, recv, send, socket, AddressFamily, MsgFlags, SockFlag, SockType, UnixAddr,
};

use super::libcriu::{DirectTransport, LibCriu};
use super::wire::{SnapshotRequest, SnapshotResponse, SnapshotResult, MAX_MSG_SIZE};
use crate::config::RuntimeConfig;
use crate::error::{TransportError, WaypointError, WaypointResult};

/// Transport selection from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransportPreference {
    /// Direct calls if the library loads, RPC otherwise.
    #[default]
    Auto,
    Rpc,
    Direct,
}

impl FromStr for TransportPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "rpc" => Ok(Self::Rpc),
            "direct" => Ok(Self::Direct),
            _ => Err("Expected one of: auto, rpc, direct".to_string()),
        }
    }
}

impl fmt::Display for TransportPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Auto => "auto",
            Self::Rpc => "rpc",
            Self::Direct => "direct",
        };
        f.write_str(name)
    }
}

/// Descriptors opened to talk to the checkpoint service.
///
/// Must not be closed while a dump is in flight. After the transport returns,
/// the lifecycle either releases them (dumped or restored) or abandons the
/// socket (failed) so a half-open connection is left untouched.
#[derive(Debug, Default)]
pub struct ServiceHandles {
    pub images_dir: Option<OwnedFd>,
    pub socket: Option<OwnedFd>,
}

impl ServiceHandles {
    pub fn with_images_dir(images_dir: OwnedFd) -> Self {
        Self {
            images_dir: Some(images_dir),
            socket: None,
        }
    }

    /// Close every handle.
    pub fn release(self) {
        drop(self);
    }

    /// Close the directory handle but leave the socket open.
    ///
    /// Returns the raw number of the socket left behind, if any.
    pub fn abandon(mut self) -> Option<RawFd> {
        self.images_dir.take();
        self.socket.take().map(IntoRawFd::into_raw_fd)
    }
}

/// One checkpoint request/response exchange.
pub trait CheckpointTransport {
    /// Short strategy name for logs.
    fn name(&self) -> &'static str;

    /// Issue `request` and block until the service answers.
    ///
    /// Any descriptor opened for the exchange is handed to `handles` before
    /// it is used, so the caller controls when it gets closed.
    fn dump(
        &mut self,
        request: &SnapshotRequest,
        handles: &mut ServiceHandles,
    ) -> WaypointResult<SnapshotResult>;
}

/// Framed RPC over a connection-oriented unix socket.
#[derive(Debug, Clone)]
pub struct RpcTransport {
    address: PathBuf,
}

impl RpcTransport {
    pub fn new(address: impl Into<PathBuf>) -> Self {
        Self {
            address: address.into(),
        }
    }

    pub fn address(&self) -> &Path {
        &self.address
    }

    fn socket_error(&self, reason: impl fmt::Display) -> TransportError {
        TransportError::Socket {
            address: self.address.clone(),
            reason: reason.to_string(),
        }
    }
}

impl CheckpointTransport for RpcTransport {
    fn name(&self) -> &'static str {
        "rpc"
    }

    fn dump(
        &mut self,
        request: &SnapshotRequest,
        handles: &mut ServiceHandles,
    ) -> WaypointResult<SnapshotResult> {
        let frame = request.encode()?;

        let sock = socket(
            AddressFamily::Unix,
            SockType::SeqPacket,
            SockFlag::empty(),
            None,
        )
        .map_err(|e| self.socket_error(format!("socket: {}", e)))?;
        let fd = sock.as_raw_fd();
        handles.socket = Some(sock);

        let addr = UnixAddr::new(&self.address).map_err(|e| self.socket_error(e))?;
        connect(fd, &addr).map_err(|e| self.socket_error(format!("connect: {}", e)))?;

        let written = send(fd, &frame, MsgFlags::empty())
            .map_err(|e| self.socket_error(format!("send: {}", e)))?;
        if written != frame.len() {
            return Err(TransportError::ShortWrite {
                written,
                expected: frame.len(),
            }
            .into());
        }

        tracing::debug!(
            address = %self.address.display(),
            frame_len = frame.len(),
            "Checkpoint request sent"
        );

        let mut buf = Vec::new();
        buf.try_reserve_exact(MAX_MSG_SIZE)
            .map_err(|_| WaypointError::ResourceExhausted {
                what: "response frame",
                size: MAX_MSG_SIZE,
            })?;
        buf.resize(MAX_MSG_SIZE, 0);

        // MSG_TRUNC reports the full packet length even when it exceeds the buffer.
        let received = recv(fd, &mut buf, MsgFlags::MSG_TRUNC)
            .map_err(|e| self.socket_error(format!("recv: {}", e)))?;
        if received == 0 {
            return Err(TransportError::ShortRead.into());
        }
        if received > MAX_MSG_SIZE {
            return Err(TransportError::FrameTooLarge {
                size: received,
                max: MAX_MSG_SIZE,
            }
            .into());
        }

        tracing::debug!(frame_len = received, "Checkpoint response received");

        let response = SnapshotResponse::decode(&buf[..received])?;
        Ok(SnapshotResult::from_response(response, request.kind)?)
    }
}

/// Pick the transport for `config` by probing what is available.
///
/// # Errors
/// `TransportError::LibraryUnavailable` when direct calls are explicitly
/// requested but the library cannot be loaded.
pub fn select_transport(config: &RuntimeConfig) -> WaypointResult<Box<dyn CheckpointTransport>> {
    let transport: Box<dyn CheckpointTransport> = match config.transport {
        TransportPreference::Rpc => Box::new(RpcTransport::new(&config.service_socket)),
        TransportPreference::Direct => Box::new(DirectTransport::new(
            LibCriu::load()?,
            &config.service_socket,
        )),
        TransportPreference::Auto => match LibCriu::load() {
            Ok(library) => Box::new(DirectTransport::new(library, &config.service_socket)),
            Err(e) => {
                tracing::debug!(error = %e, "Checkpoint library not available, using RPC");
                Box::new(RpcTransport::new(&config.service_socket))
            }
        },
    };

    tracing::info!(
        transport = transport.name(),
        preference = %config.transport,
        address = %config.service_socket.display(),
        "Checkpoint transport selected"
    );

    Ok(transport)
}
