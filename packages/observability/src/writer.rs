//! Size-capped JSONL log file.
//!
//! The log can hold user identifiers and request context, so it is created
//! owner-only (0600, directory 0700 on unix). Once the file would grow past
//! its cap it is moved aside to `<name>.1`, replacing any previous backup,
//! and a fresh file is started. At most two files exist at any time.

use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;

/// Default cap for a single log file.
pub const DEFAULT_MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;

struct OpenLog {
    file: BufWriter<File>,
    len: u64,
}

/// Shared handle to the session log. Every clone appends to the same file.
#[derive(Clone)]
pub struct SessionLogFile {
    path: Arc<PathBuf>,
    max_bytes: u64,
    open: Arc<Mutex<OpenLog>>,
}

impl SessionLogFile {
    pub fn open(path: &Path, max_bytes: u64) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            create_private_dir(parent)?;
        }
        let open = open_private(path)?;
        Ok(Self {
            path: Arc::new(path.to_path_buf()),
            max_bytes: max_bytes.max(1),
            open: Arc::new(Mutex::new(open)),
        })
    }

    /// Where the previous file goes on rotation.
    pub fn backup_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".1");
        PathBuf::from(name)
    }

    fn rotate(&self, open: &mut OpenLog) -> io::Result<()> {
        open.file.flush()?;
        std::fs::rename(self.path.as_ref(), self.backup_path())?;
        *open = open_private(&self.path)?;
        Ok(())
    }
}

impl Write for SessionLogFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut open = self.open.lock();
        let incoming = buf.len() as u64;
        // An entry larger than the cap still goes into a fresh file whole.
        if open.len > 0 && open.len.saturating_add(incoming) > self.max_bytes {
            self.rotate(&mut open)?;
        }
        let written = open.file.write(buf)?;
        open.len = open.len.saturating_add(written as u64);
        // Entries show up in `tail -f` immediately.
        open.file.flush()?;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.open.lock().file.flush()
    }
}

impl<'a> MakeWriter<'a> for SessionLogFile {
    type Writer = SessionLogFile;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn open_private(path: &Path) -> io::Result<OpenLog> {
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let file = options.open(path)?;
    let len = file.metadata()?.len();
    Ok(OpenLog {
        file: BufWriter::with_capacity(8192, file),
        len,
    })
}

fn create_private_dir(dir: &Path) -> io::Result<()> {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir)
}
