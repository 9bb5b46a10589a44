//! File system paths for the session client.

use crate::{CoreError, CoreResult};
use std::path::{Path, PathBuf};

/// Directory name under the home directory for durable files.
const BASE_DIR_NAME: &str = ".storefront";
/// Directory name under the runtime (or temp) dir for session-scoped files.
const EPHEMERAL_DIR_NAME: &str = "storefront-session";

/// Manages file system paths for the session client.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Durable files: config, remembered session, logs (~/.storefront)
    base_dir: PathBuf,
    /// Session-scoped files, discarded with the user's runtime dir
    ephemeral_dir: PathBuf,
}

impl Paths {
    /// Uses `~/.storefront` for durable files. Session-scoped files go to
    /// `$XDG_RUNTIME_DIR/storefront-session`, or to a per-user directory
    /// under the OS temp dir where there is no runtime dir.
    pub fn new() -> CoreResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| CoreError::Path("Could not determine home directory".to_string()))?;

        Ok(Self {
            base_dir: home.join(BASE_DIR_NAME),
            ephemeral_dir: ephemeral_root(),
        })
    }

    /// Create a new Paths instance rooted at a custom directory.
    /// Session-scoped files go to `<base>/ephemeral`.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self {
            ephemeral_dir: base_dir.join("ephemeral"),
            base_dir,
        }
    }

    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// ~/.storefront/config.json
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Durable ("remember me") session tier.
    pub fn durable_session_file(&self) -> PathBuf {
        self.base_dir.join("session.json")
    }

    /// Session-scoped tier.
    pub fn ephemeral_session_file(&self) -> PathBuf {
        self.ephemeral_dir.join("session.json")
    }

    /// ~/.storefront/logs
    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// ~/.storefront/logs/session.jsonl
    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join("session.jsonl")
    }

    /// Ensure all required directories exist, readable by the owner only.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        create_private_dir(&self.base_dir)?;
        create_private_dir(&self.ephemeral_dir)?;
        create_private_dir(&self.logs_dir())?;
        Ok(())
    }
}

fn ephemeral_root() -> PathBuf {
    if let Some(runtime) = dirs::runtime_dir() {
        return runtime.join(EPHEMERAL_DIR_NAME);
    }
    let user: String = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
        .collect();
    let name = if user.is_empty() {
        EPHEMERAL_DIR_NAME.to_string()
    } else {
        format!("{}-{}", EPHEMERAL_DIR_NAME, user)
    };
    std::env::temp_dir().join(name)
}

/// Create `dir` as 0700 and tighten it if it already exists with wider
/// permissions. A directory someone else owns cannot be chmod-ed and fails here.
fn create_private_dir(dir: &Path) -> CoreResult<()> {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir)?;

    let metadata = std::fs::symlink_metadata(dir)?;
    if !metadata.is_dir() {
        return Err(CoreError::Path(format!("{} is not a directory", dir.display())));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if metadata.permissions().mode() & 0o077 != 0 {
            std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
        }
    }
    Ok(())
}
