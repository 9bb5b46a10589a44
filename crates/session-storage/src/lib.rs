//! Session persistence for the storefront client.
//!
//! Two storage tiers back every session:
//! - **durable**: survives restarts (a JSON file under the base directory)
//! - **session-scoped**: lost when the browser or process session ends
//!
//! [`TokenStore`] decides which tier holds the tokens and profile and keeps
//! the two from disagreeing.

mod file;
mod keys;
mod memory;
mod profile;
mod tokens;
mod traits;

pub use file::FileStorage;
pub use keys::StorageKeys;
pub use memory::MemoryStorage;
pub use profile::{UserProfile, UserRole};
pub use tokens::{SessionId, StoreChange, StoreChangeCallback, StoredSession, TokenStore};
pub use traits::SessionStorage;

use thiserror::Error;

/// Error type for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Encoding/decoding error
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
