// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Checkpoint lifecycle state machine with typed state transitions.
//!
//! Running → Requesting → {Failed, Dumped, Restored}; a restored process may
//! request again, or fail while rebuilding its state. Invalid transitions
//! result in StateTransitionError.

use serde::{Deserialize, Serialize};

use crate::error::StateTransitionError;
use crate::types::SessionId;

/// Checkpoint lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckpointState {
    /// Executing normally, no request in flight.
    Running,

    /// A dump request has been issued and not yet answered.
    Requesting,

    /// The request failed. The failure sentinel has been persisted.
    Failed,

    /// Image written. This instance terminates with the dumped sentinel.
    Dumped,

    /// Execution resumed inside a restored image.
    Restored,
}

impl CheckpointState {
    /// Get the state name for error messages.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Running => "Running",
            Self::Requesting => "Requesting",
            Self::Failed => "Failed",
            Self::Dumped => "Dumped",
            Self::Restored => "Restored",
        }
    }

    /// Check if transition to the target state is valid.
    pub fn can_transition_to(&self, target: CheckpointState) -> bool {
        matches!(
            (self, target),
            (Self::Running, Self::Requesting)
                | (Self::Requesting, Self::Failed)
                | (Self::Requesting, Self::Dumped)
                | (Self::Requesting, Self::Restored)
                | (Self::Restored, Self::Requesting)
                | (Self::Restored, Self::Failed)
        )
    }

    /// Failed and Dumped end the process.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Dumped)
    }
}

impl std::fmt::Display for CheckpointState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// State machine for one session's checkpoint lifecycle.
#[derive(Debug)]
pub struct CheckpointStateMachine {
    session: SessionId,
    current_state: CheckpointState,
    transition_count: u64,
}

impl CheckpointStateMachine {
    pub fn new(session: SessionId) -> Self {
        Self {
            session,
            current_state: CheckpointState::Running,
            transition_count: 0,
        }
    }

    pub fn state(&self) -> CheckpointState {
        self.current_state
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    /// Attempt to transition to a new state.
    pub fn transition_to(&mut self, target: CheckpointState) -> Result<(), StateTransitionError> {
        if self.current_state.is_terminal() {
            return Err(StateTransitionError::TerminalState {
                session: self.session,
                state: self.current_state.name(),
            });
        }

        if !self.current_state.can_transition_to(target) {
            return Err(StateTransitionError::InvalidTransition {
                session: self.session,
                from: self.current_state.name(),
                to: target.name(),
            });
        }

        tracing::debug!(
            session = %self.session,
            from = self.current_state.name(),
            to = target.name(),
            "State transition"
        );

        self.current_state = target;
        self.transition_count += 1;

        Ok(())
    }
}
