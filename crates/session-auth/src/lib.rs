//! Session lifecycle and token refresh for the storefront client.
//!
//! This crate provides:
//! - Token decoding (expiry and role claims) without network calls
//! - Debounced remaining-time tracking
//! - Single-flight token refresh with bounded, backed-off retries
//! - A session supervisor with explicit FSM-based state and background
//!   expiry watchers
//! - The HTTP auth backend client

mod auth_fsm;
mod backend;
mod clock;
mod error;
mod profile;
mod refresh;
mod session_clock;
mod supervisor;
pub mod token_codec;

#[cfg(test)]
mod tests;

pub use auth_fsm::{refresh_machine, session_machine};
pub use auth_fsm::{
    RefreshConfig, RefreshMachine, RefreshMachineInput, RefreshMachineState,
    SessionMachine, SessionMachineInput, SessionMachineState, SessionState,
};
pub use backend::{ApiPhoto, ApiRole, ApiUser, AuthBackend, AuthPayload, HttpAuthBackend};
pub use clock::{Clock, SystemClock};
pub use error::{AuthError, AuthResult, BackendError};
pub use profile::{normalize_user, IssuedTokens};
pub use refresh::RefreshCoordinator;
pub use session_clock::{remaining_ms, SessionClock};
pub use supervisor::{SessionEvent, SessionSnapshot, SessionSupervisor};
pub use token_codec::{DecodeError, RoleClaim, TokenClaims};
