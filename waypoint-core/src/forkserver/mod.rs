// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Fast-restart handshake with the supervising driver.

mod channels;
mod handshake;

pub use channels::{ChannelReader, ChannelWriter, HandshakeChannels};
pub use handshake::{Handshake, InputMode, FS_OPT_ENABLED, FS_OPT_SHDMEM_FUZZ};
