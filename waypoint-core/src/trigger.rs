// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Syscall trigger policy.
//!
//! Observes the target's socket primitives and picks checkpoint boundaries.
//! A `recv` that follows at least one `send` is a boundary: the target has
//! produced output and now blocks for more input, so an image taken here can
//! be reused for many different next inputs.
//!
//! Calls carry a sequence number from the emulator. Re-observing a sequence
//! number already seen returns the earlier answer without counting again.

use std::collections::BTreeSet;
use std::fmt;
use std::os::fd::RawFd;
use std::str::FromStr;

use serde::Serialize;

/// Socket primitives the emulator reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SocketOp {
    Socket,
    Bind,
    Connect,
    Setsockopt,
    Getsockopt,
    Listen,
    Accept,
    Send,
    Recv,
}

impl SocketOp {
    pub const ALL: [SocketOp; 9] = [
        Self::Socket,
        Self::Bind,
        Self::Connect,
        Self::Setsockopt,
        Self::Getsockopt,
        Self::Listen,
        Self::Accept,
        Self::Send,
        Self::Recv,
    ];

    pub const fn name(&self) -> &'static str {
        match self {
            Self::Socket => "socket",
            Self::Bind => "bind",
            Self::Connect => "connect",
            Self::Setsockopt => "setsockopt",
            Self::Getsockopt => "getsockopt",
            Self::Listen => "listen",
            Self::Accept => "accept",
            Self::Send => "send",
            Self::Recv => "recv",
        }
    }

    /// Creates a descriptor the target will keep using.
    pub const fn creates_descriptor(&self) -> bool {
        matches!(self, Self::Socket | Self::Accept)
    }
}

impl fmt::Display for SocketOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SocketOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|op| op.name() == name)
            .ok_or_else(|| format!("Unknown socket operation: {}", s))
    }
}

/// Whether a `recv` with no earlier `send` may be a boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecvPolicy {
    /// Only a `recv` after at least one `send`.
    #[default]
    AfterSend,
    /// Every `recv`.
    Always,
}

impl FromStr for RecvPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "after-send" => Ok(Self::AfterSend),
            "always" => Ok(Self::Always),
            _ => Err("Expected one of: after-send, always".to_string()),
        }
    }
}

impl fmt::Display for RecvPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AfterSend => f.write_str("after-send"),
            Self::Always => f.write_str("always"),
        }
    }
}

/// One observed socket call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SocketCall {
    /// Monotonic position in the target's call stream.
    pub seq: u64,
    pub op: SocketOp,
    pub fd: RawFd,
    /// Return value, when known.
    pub result: Option<i64>,
}

impl SocketCall {
    pub fn new(seq: u64, op: SocketOp, fd: RawFd) -> Self {
        Self {
            seq,
            op,
            fd,
            result: None,
        }
    }

    pub fn with_result(mut self, result: i64) -> Self {
        self.result = Some(result);
        self
    }

    /// Descriptor produced by a successful `socket` or `accept`.
    fn created_descriptor(&self) -> Option<RawFd> {
        if !self.op.creates_descriptor() {
            return None;
        }
        self.result
            .filter(|r| *r >= 0)
            .and_then(|r| RawFd::try_from(r).ok())
    }
}

/// Policy answer for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "fd", rename_all = "lowercase")]
pub enum Classification {
    Irrelevant,
    Boundary,
    /// A new descriptor that must be recorded, not a scheduling point.
    Descriptor(RawFd),
}

/// Stateful classifier over one session's socket calls.
#[derive(Debug, Clone, Default)]
pub struct TriggerPolicy {
    recv_policy: RecvPolicy,
    sends: u64,
    high_water: Option<u64>,
    boundaries: BTreeSet<u64>,
}

impl TriggerPolicy {
    pub fn new(recv_policy: RecvPolicy) -> Self {
        Self {
            recv_policy,
            ..Default::default()
        }
    }

    pub fn recv_policy(&self) -> RecvPolicy {
        self.recv_policy
    }

    /// `send` calls observed so far.
    pub fn sends(&self) -> u64 {
        self.sends
    }

    /// Distinct boundaries classified so far.
    pub fn boundary_count(&self) -> usize {
        self.boundaries.len()
    }

    /// Whether a call with sequence number `seq` was already observed.
    pub fn has_seen(&self, seq: u64) -> bool {
        self.high_water.is_some_and(|hw| seq <= hw)
    }

    /// Classify `call`, updating the history only the first time its
    /// sequence number is seen.
    pub fn classify(&mut self, call: &SocketCall) -> Classification {
        let replayed = self.has_seen(call.seq);

        let classification = if replayed {
            if self.boundaries.contains(&call.seq) {
                Classification::Boundary
            } else {
                Self::stateless(call)
            }
        } else {
            self.high_water = Some(call.seq);
            self.observe(call)
        };

        tracing::debug!(
            seq = call.seq,
            op = call.op.name(),
            fd = call.fd,
            replayed = replayed,
            classification = ?classification,
            "Socket call classified"
        );

        classification
    }

    fn observe(&mut self, call: &SocketCall) -> Classification {
        match call.op {
            SocketOp::Send => {
                self.sends += 1;
                Classification::Irrelevant
            }
            SocketOp::Recv if self.recv_policy == RecvPolicy::Always || self.sends > 0 => {
                self.boundaries.insert(call.seq);
                Classification::Boundary
            }
            _ => Self::stateless(call),
        }
    }

    fn stateless(call: &SocketCall) -> Classification {
        call.created_descriptor()
            .map_or(Classification::Irrelevant, Classification::Descriptor)
    }
}
