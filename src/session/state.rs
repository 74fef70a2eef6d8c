//! Session lifecycle state machine
//!
//! `Uninitialized → Active → Closed`. No transition skips `Active` and
//! nothing leaves `Closed`.

use std::fmt;

use thiserror::Error;

/// Session lifecycle states
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SessionState {
    /// Registered, waiting for the initialize handshake
    Uninitialized,
    /// Handshake done; visible to dispatch
    Active,
    /// Terminal
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Uninitialized => write!(f, "Uninitialized"),
            SessionState::Active => write!(f, "Active"),
            SessionState::Closed => write!(f, "Closed"),
        }
    }
}

/// Attempted an invalid state transition
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Invalid session transition: {from} → {to}")]
pub struct InvalidTransition {
    pub from: SessionState,
    pub to: SessionState,
}

impl SessionState {
    /// Attempt to move to `to`, returning the new state
    pub fn transition(self, to: SessionState) -> Result<SessionState, InvalidTransition> {
        let valid = matches!(
            (self, to),
            (SessionState::Uninitialized, SessionState::Active)
                | (SessionState::Active, SessionState::Closed)
        );

        if valid {
            tracing::debug!(from = %self, to = %to, "session state transition");
            Ok(to)
        } else {
            Err(InvalidTransition { from: self, to })
        }
    }

    pub fn is_active(self) -> bool {
        self == SessionState::Active
    }
}
