//! Session error types.

use crate::token_codec::DecodeError;
use thiserror::Error;

/// Failure reported by an [`AuthBackend`](crate::AuthBackend).
///
/// Backends classify their own failures; translation into [`AuthError`]
/// happens once, through the `From` impl below.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Transport failure: no response was received.
    #[error("Network error: {0}")]
    Network(String),

    /// The backend refused the credential (401/403).
    #[error("Credential rejected (HTTP {status})")]
    Rejected { status: u16 },

    /// Any other non-success status.
    #[error("Unexpected HTTP status {status}")]
    Status { status: u16 },

    /// A success status with a body that could not be parsed.
    #[error("Invalid response body: {0}")]
    InvalidBody(String),
}

/// Session error type.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Empty or malformed credential, rejected before any network call
    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    /// Transport failure talking to the backend
    #[error("Network error: {0}")]
    Network(String),

    /// Backend refused the credential
    #[error("Authentication rejected (HTTP {status})")]
    AuthRejected { status: u16 },

    /// Access token could not be decoded
    #[error("Token decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Refresh retries exhausted
    #[error("Token refresh failed after {0} attempts")]
    RefreshExhausted(u32),

    /// User object lacks a display name or email
    #[error("Incomplete user profile: {0}")]
    IncompleteProfile(String),

    /// Backend answered with success but the payload is unusable
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Any other backend failure
    #[error("Backend error: {0}")]
    Backend(String),

    /// A login is already being processed
    #[error("Login already in progress")]
    LoginInProgress,

    /// A session is already active
    #[error("Already authenticated")]
    AlreadyAuthenticated,

    /// Invalid state transition in a session FSM
    #[error("Invalid session state transition: {0}")]
    InvalidStateTransition(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] session_storage::StorageError),
}

impl From<BackendError> for AuthError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Network(reason) => AuthError::Network(reason),
            BackendError::Rejected { status } => AuthError::AuthRejected { status },
            BackendError::InvalidBody(reason) => AuthError::MalformedResponse(reason),
            BackendError::Status { status } => {
                AuthError::Backend(format!("unexpected HTTP status {}", status))
            }
        }
    }
}

impl AuthError {
    /// Returns true if the failure may go away on its own and retrying makes
    /// sense.
    pub fn is_transient(&self) -> bool {
        match self {
            AuthError::Network(_) => true,
            AuthError::Backend(_) => true,
            _ => false,
        }
    }

    /// Short message suitable for showing to the user.
    pub fn user_message(&self) -> &'static str {
        match self {
            AuthError::InvalidCredential(_) => "Sign-in failed. Please try again.",
            AuthError::Network(_) => "Unable to reach the server. Check your connection.",
            AuthError::AuthRejected { status: 403 } => {
                "This account is not allowed to sign in to the store."
            }
            AuthError::AuthRejected { .. } => "Your sign-in was not accepted.",
            AuthError::IncompleteProfile(_) => "Your account profile is incomplete.",
            AuthError::LoginInProgress => "Sign-in is already in progress.",
            AuthError::AlreadyAuthenticated => "You are already signed in.",
            AuthError::RefreshExhausted(_) => "Your session has expired. Please sign in again.",
            AuthError::Decode(_) | AuthError::MalformedResponse(_) | AuthError::Backend(_) => {
                "Something went wrong. Please try again."
            }
            AuthError::InvalidStateTransition(_) | AuthError::Storage(_) => {
                "Something went wrong. Please try again."
            }
        }
    }
}

/// Result type alias using AuthError.
pub type AuthResult<T> = Result<T, AuthError>;
