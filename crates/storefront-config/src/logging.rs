//! Logging initialization for the session client.
//!
//! Wraps the observability crate so binaries make one call at startup.

use crate::Paths;
use observability::LogConfig;

/// Service name written into every JSONL entry.
pub const SERVICE_NAME: &str = "storefront-session";

/// Initialize logging.
///
/// - stderr output always on
/// - JSONL file at `paths.log_file()` when `log_to_file` is set
/// - `RUST_LOG` overrides `level`
pub fn init_logging(level: &str, paths: Option<&Paths>, log_to_file: bool) {
    let log_path = if log_to_file {
        paths.map(Paths::log_file)
    } else {
        None
    };

    observability::init_with_config(LogConfig {
        service_name: SERVICE_NAME.into(),
        default_level: level.into(),
        log_path,
        also_stderr: true,
        ..LogConfig::default()
    });
}
