//! Session and refresh state machines using rust-fsm.
//!
//! ## Session machine
//!
//! ```text
//! ┌─────────────────┐  SessionRestored   ┌─────────────────┐
//! │    LoggedOut    │ ─────────────────► │  Authenticated  │ ◄─┐
//! └────────┬────────┘                    └────────┬────────┘   │ RefreshSucceeded
//!          │ LoginAttempt / RestoreAttempt        │ ──────────┘
//!          ▼                                      │
//! ┌─────────────────┐  LoginSucceeded             │ LogoutRequested / SessionLost
//! │ Authenticating  │ ────────────────────────────┤
//! └────────┬────────┘                             ▼
//!          │ LoginFailed                      LoggedOut
//!          ▼
//!      LoggedOut
//! ```
//!
//! ## Refresh machine
//!
//! ```text
//! Idle ──Begin──► Refreshing ──Succeed──► Succeeded ──Reset──► Idle
//!                  │   ▲  │
//!                  └───┘  └──Fail──► Failed ──Reset──► Idle
//!                  Retry
//! ```

use rust_fsm::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use storefront_config::SessionTimings;

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub session_machine(LoggedOut)

    LoggedOut => {
        LoginAttempt => Authenticating,
        // Stored token expired; restoring through one refresh
        RestoreAttempt => Authenticating,
        // Stored token still valid
        SessionRestored => Authenticated
    },
    Authenticating => {
        LoginSucceeded => Authenticated,
        LoginFailed => LoggedOut
    },
    Authenticated => {
        RefreshSucceeded => Authenticated,
        LogoutRequested => LoggedOut,
        // Refresh failed after the token ran out
        SessionLost => LoggedOut
    }
}

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub refresh_machine(Idle)

    Idle => {
        Begin => Refreshing
    },
    Refreshing => {
        Retry => Refreshing,
        Succeed => Succeeded,
        Fail => Failed
    },
    Succeeded => {
        Reset => Idle
    },
    Failed => {
        Reset => Idle
    }
}

pub use session_machine::Input as SessionMachineInput;
pub use session_machine::State as SessionMachineState;
pub use session_machine::StateMachine as SessionMachine;

pub use refresh_machine::Input as RefreshMachineInput;
pub use refresh_machine::State as RefreshMachineState;
pub use refresh_machine::StateMachine as RefreshMachine;

/// Session state for external consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No session.
    LoggedOut,
    /// Login or restore in progress.
    Authenticating,
    /// Session active, watchers running.
    Authenticated,
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated)
    }
}

impl From<&SessionMachineState> for SessionState {
    fn from(state: &SessionMachineState) -> Self {
        match state {
            SessionMachineState::LoggedOut => SessionState::LoggedOut,
            SessionMachineState::Authenticating => SessionState::Authenticating,
            SessionMachineState::Authenticated => SessionState::Authenticated,
        }
    }
}

/// Retry policy for token refresh.
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Attempts per refresh, including the first.
    pub max_attempts: u32,
    /// Backoff base in milliseconds.
    pub base_delay_ms: u64,
    /// Backoff cap in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self::from(&SessionTimings::default())
    }
}

impl From<&SessionTimings> for RefreshConfig {
    fn from(timings: &SessionTimings) -> Self {
        Self {
            max_attempts: timings.refresh_max_attempts,
            base_delay_ms: timings.refresh_base_delay_ms,
            max_delay_ms: timings.refresh_max_delay_ms,
        }
    }
}

impl RefreshConfig {
    /// Delay before the given attempt (1-indexed). The first attempt starts
    /// immediately; attempt `n` waits `base * 2^(n-1)`.
    pub fn delay_before_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 2u64.saturating_pow(attempt - 1);
        let delay_ms = self.base_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }
}
