use std::{
    fs::{self, File, OpenOptions},
    io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use tauri::{AppHandle, Manager, Runtime};
use tracing::info;
use tracing_subscriber::{fmt::MakeWriter, prelude::*, EnvFilter};

const LOG_FILE_NAME: &str = "translator.log";
const ROTATED_LOG_SUFFIX: &str = "translator.log.1";
const LOG_FILTER_ENV_VAR: &str = "TRANSLATOR_LOG";
const DEFAULT_LOG_FILTER: &str = "info,quick_translator_lib=debug";
const MAX_LOG_FILE_BYTES: u64 = 2 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct LoggingState {
    log_file_path: Arc<PathBuf>,
}

impl LoggingState {
    pub fn new(log_file_path: PathBuf) -> Self {
        Self {
            log_file_path: Arc::new(log_file_path),
        }
    }

    pub fn log_file_path(&self) -> &Path {
        self.log_file_path.as_ref().as_path()
    }
}

/// Installs the global tracing subscriber with two sinks: the app-data log
/// file and stderr. `TRANSLATOR_LOG` overrides the default filter.
pub fn initialize<R: Runtime>(app: &AppHandle<R>) -> Result<LoggingState, String> {
    let log_file_path = resolve_log_file_path(app)?;
    let log_file = prepare_log_file(&log_file_path)?;
    let file_writer = LogFileWriterFactory::new(log_file);
    let env_filter = EnvFilter::try_from_env(LOG_FILTER_ENV_VAR)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_level(true)
                .with_writer(file_writer),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_writer(std::io::stderr),
        );

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|error| format!("Failed to initialize logger: {error}"))?;

    info!(log_file = %log_file_path.display(), "logging initialized");
    Ok(LoggingState::new(log_file_path))
}

pub fn export_log_contents(state: &LoggingState) -> Result<String, String> {
    read_log_contents(state.log_file_path())
}

fn resolve_log_file_path<R: Runtime>(app: &AppHandle<R>) -> Result<PathBuf, String> {
    let app_data_dir = app
        .path()
        .app_data_dir()
        .map_err(|error| format!("Failed to resolve app data directory for logs: {error}"))?;

    Ok(app_data_dir.join(LOG_FILE_NAME))
}

fn prepare_log_file(log_file_path: &Path) -> Result<File, String> {
    if let Some(parent_dir) = log_file_path.parent() {
        fs::create_dir_all(parent_dir).map_err(|error| {
            format!(
                "Failed to create log directory `{}`: {error}",
                parent_dir.display()
            )
        })?;
    }

    rotate_oversized_log(log_file_path, MAX_LOG_FILE_BYTES)?;
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file_path)
        .map_err(|error| {
            format!(
                "Failed to open log file `{}`: {error}",
                log_file_path.display()
            )
        })
}

/// Moves an oversized log aside as `translator.log.1` so a fresh file starts
/// while the previous session's tail stays on disk. One rotation deep; the
/// older rotated file is overwritten.
fn rotate_oversized_log(log_file_path: &Path, max_bytes: u64) -> Result<(), String> {
    let metadata = match fs::metadata(log_file_path) {
        Ok(metadata) => metadata,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(error) => {
            return Err(format!(
                "Failed to inspect log file `{}`: {error}",
                log_file_path.display()
            ))
        }
    };

    if metadata.len() <= max_bytes {
        return Ok(());
    }

    let rotated_path = rotated_log_path(log_file_path);
    fs::rename(log_file_path, &rotated_path).map_err(|error| {
        format!(
            "Failed to rotate oversized log file `{}` to `{}`: {error}",
            log_file_path.display(),
            rotated_path.display()
        )
    })?;

    Ok(())
}

fn rotated_log_path(log_file_path: &Path) -> PathBuf {
    log_file_path.with_file_name(ROTATED_LOG_SUFFIX)
}

fn read_log_contents(log_file_path: &Path) -> Result<String, String> {
    let contents = match fs::read(log_file_path) {
        Ok(contents) => contents,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(String::new()),
        Err(error) => {
            return Err(format!(
                "Failed to read log file `{}`: {error}",
                log_file_path.display()
            ))
        }
    };

    Ok(String::from_utf8_lossy(&contents).into_owned())
}

#[derive(Debug, Clone)]
struct LogFileWriterFactory {
    file: Arc<Mutex<File>>,
}

impl LogFileWriterFactory {
    fn new(file: File) -> Self {
        Self {
            file: Arc::new(Mutex::new(file)),
        }
    }
}

impl<'a> MakeWriter<'a> for LogFileWriterFactory {
    type Writer = LogFileWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogFileWriter {
            file: Arc::clone(&self.file),
        }
    }
}

struct LogFileWriter {
    file: Arc<Mutex<File>>,
}

impl io::Write for LogFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut file = self
            .file
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?;
        file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut file = self
            .file
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?;
        file.flush()
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, time::SystemTime};

    use super::{read_log_contents, rotate_oversized_log, rotated_log_path};

    fn temp_log_path(prefix: &str) -> std::path::PathBuf {
        let nanos = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .expect("clock should progress")
            .as_nanos();
        std::env::temp_dir()
            .join(format!("{prefix}-{nanos}"))
            .join("translator.log")
    }

    #[test]
    fn oversized_log_is_moved_aside_and_remains_readable() {
        let path = temp_log_path("translator-log-rotate");
        fs::create_dir_all(path.parent().expect("log path should have a parent"))
            .expect("should create test log directory");
        fs::write(&path, "x".repeat(1024)).expect("should write test log file");

        rotate_oversized_log(&path, 128).expect("rotation should succeed");

        assert!(!path.exists());
        let rotated = fs::read_to_string(rotated_log_path(&path))
            .expect("rotated file should be readable");
        assert_eq!(rotated.len(), 1024);

        let _ = fs::remove_dir_all(path.parent().expect("log path should have a parent"));
    }

    #[test]
    fn undersized_log_is_left_in_place() {
        let path = temp_log_path("translator-log-keep");
        fs::create_dir_all(path.parent().expect("log path should have a parent"))
            .expect("should create test log directory");
        fs::write(&path, "short").expect("should write test log file");

        rotate_oversized_log(&path, 128).expect("rotation check should succeed");

        assert!(path.exists());
        assert!(!rotated_log_path(&path).exists());

        let _ = fs::remove_dir_all(path.parent().expect("log path should have a parent"));
    }

    #[test]
    fn reading_missing_log_file_returns_empty_string() {
        let path = temp_log_path("translator-log-missing");

        let contents = read_log_contents(&path).expect("reading missing log should succeed");
        assert!(contents.is_empty());
    }
}
