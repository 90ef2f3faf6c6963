// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! CLI command modules.

pub mod channels;
pub mod classify;
pub mod dump;
pub mod resolve;
pub mod session;
pub mod status;
