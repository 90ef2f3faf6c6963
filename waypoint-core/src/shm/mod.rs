// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Shared input delivery.
//!
//! The driver places each test case in a System V segment; the target reads
//! it from there instead of from a file when a segment id is configured.

mod input;
mod region;

pub use input::InputSource;
pub use region::{SharedInputRegion, LENGTH_FIELD};

#[cfg(test)]
pub(crate) use region::tests::DriverSegment;
