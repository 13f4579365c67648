//! Tracing setup. Events go to stderr and, when a log directory is set, are
//! appended to a file there as well. Stdout is left to the console.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};

pub const DEFAULT_LOG_FILE: &str = "ritual-bot.log";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// Filter used when `RUST_LOG` is unset.
    pub level: String,
    pub dir: Option<PathBuf>,
    pub file_name: String,
}

impl LogSettings {
    /// `--debug` wins, then an explicit level, then `info`.
    pub fn resolve(debug: bool, level: Option<String>, dir: &str, file_name: &str) -> Self {
        let level = if debug {
            "debug".to_string()
        } else {
            level
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| "info".to_string())
        };
        let dir = Some(dir.trim())
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from);
        let file_name = match file_name.trim() {
            "" => DEFAULT_LOG_FILE.to_string(),
            name => name.to_string(),
        };
        Self {
            level,
            dir,
            file_name,
        }
    }

    pub fn file_path(&self) -> Option<PathBuf> {
        self.dir.as_ref().map(|dir| dir.join(&self.file_name))
    }
}

/// Keeps the shared log file handle alive for the life of the process.
pub struct LogGuard {
    file: Option<SharedFile>,
}

type SharedFile = Arc<Mutex<File>>;

/// Install the global subscriber. Returns `None` if one was already set.
pub fn init(settings: &LogSettings) -> Option<LogGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level));
    let file = match settings.file_path() {
        Some(path) => match open_append(&path) {
            Ok(file) => Some(Arc::new(Mutex::new(file))),
            Err(err) => {
                eprintln!("log_file_error: {}: {err}", path.display());
                None
            }
        },
        None => None,
    };

    let shared = file.clone();
    let make_writer = BoxMakeWriter::new(move || TeeWriter::new(io::stderr(), shared.clone()));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok()?;
    Some(LogGuard { file })
}

impl LogGuard {
    pub fn has_file(&self) -> bool {
        self.file.is_some()
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Writes every record to the primary stream and, best effort, to the file.
struct TeeWriter<W> {
    primary: W,
    file: Option<SharedFile>,
}

impl<W: Write> TeeWriter<W> {
    fn new(primary: W, file: Option<SharedFile>) -> Self {
        Self { primary, file }
    }
}

impl<W: Write> Write for TeeWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = self.primary.write_all(buf);
        if let Some(file) = &self.file {
            let _ = file
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .write_all(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = self.primary.flush();
        if let Some(file) = &self.file {
            let _ = file.lock().unwrap_or_else(PoisonError::into_inner).flush();
        }
        Ok(())
    }
}
