//! # Observability
//!
//! Logging initialisation for the storefront session crates.
//!
//! Library crates only emit `tracing` events. Binaries call
//! [`init_with_config`] once at startup to decide where those events go:
//!
//! - a compact, human-readable stderr stream, and/or
//! - a structured JSONL file (one object per line) that can be tailed with
//!   `tail -f ~/.storefront/logs/session.jsonl | jq`.
//!
//! Credential-bearing fields (`token`, `refresh_token`, `id_token`, ...) are
//! redacted by the JSON layer before they reach disk. The file itself is
//! owner-only and rotated once it reaches [`LogConfig::max_log_bytes`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! observability::init_with_config(LogConfig {
//!     service_name: "storefront-session".into(),
//!     log_path: Some(paths.log_file()),
//!     ..Default::default()
//! });
//! ```

mod json_layer;
mod writer;

use std::io;
use std::path::PathBuf;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

pub use json_layer::{JsonLayer, LogEntry};
pub use writer::{SessionLogFile, DEFAULT_MAX_LOG_BYTES};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service, written into every JSONL entry.
    pub service_name: String,

    /// Default level filter (e.g. "debug", "info").
    /// `RUST_LOG` takes precedence when set.
    pub default_level: String,

    /// JSONL log file. `None` disables the file layer.
    pub log_path: Option<PathBuf>,

    /// Emit compact logs on stderr.
    pub also_stderr: bool,

    /// Size at which the JSONL file is rotated.
    pub max_log_bytes: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: true,
            max_log_bytes: DEFAULT_MAX_LOG_BYTES,
        }
    }
}

/// Initialise logging with a custom configuration.
///
/// A log file that cannot be opened is reported on stderr and skipped;
/// logging setup never aborts the process. Calling this twice is a no-op
/// for the second call.
pub fn init_with_config(config: LogConfig) {
    let json_layer = config.log_path.as_ref().and_then(|path| {
        match SessionLogFile::open(path, config.max_log_bytes) {
            Ok(log) => Some(
                JsonLayer::new(config.service_name.clone(), log)
                    .with_filter(env_filter(&config.default_level)),
            ),
            Err(e) => {
                eprintln!("failed to open log file {}: {}", path.display(), e);
                None
            }
        }
    });

    let stderr_layer = config.also_stderr.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_writer(io::stderr)
            .with_filter(env_filter(&config.default_level))
    });

    let installed = tracing_subscriber::registry()
        .with(json_layer)
        .with(stderr_layer)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!(
            service = %config.service_name,
            log_path = ?config.log_path,
            "observability initialized"
        );
    }
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}
