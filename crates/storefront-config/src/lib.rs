//! Configuration, paths, and logging setup for the storefront session client.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{
    Config, SessionTimings, DEFAULT_API_URL, DEFAULT_LOG_LEVEL, DEFAULT_REQUEST_TIMEOUT_SECS,
};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, SERVICE_NAME};
pub use paths::Paths;
