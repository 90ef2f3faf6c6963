// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Checkpoint service integration.
//!
//! Request framing, the two transport strategies, and the lifecycle that
//! interprets their results.

mod libcriu;
mod snapshot;
mod transport;
pub mod wire;

pub use libcriu::{DirectTransport, DumpLibrary, LibCriu};
pub use snapshot::{terminate, DumpSettings, SnapshotCoordinator, Verdict};
pub use transport::{
    select_transport, CheckpointTransport, RpcTransport, ServiceHandles, TransportPreference,
};
pub use wire::{SnapshotRequest, SnapshotResponse, SnapshotResult, SnapshotStatus};
