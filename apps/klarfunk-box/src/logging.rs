//! Logging setup: `env_logger` to stderr, optionally teed into a
//! size-rotated log file.

use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};
use file_rotate::compression::Compression;
use file_rotate::suffix::AppendCount;
use file_rotate::{ContentLimit, FileRotate};

/// Rotate once the active file exceeds this size.
pub const MAX_LOG_BYTES: usize = 5 * 1024 * 1024;

/// Number of rotated files kept (`PATH.1` … `PATH.3`).
pub const LOG_BACKUPS: usize = 3;

/// Opens `path` for appending, rotating into `PATH.1` … `PATH.<backups>`.
fn rotating_file(
    path: &Path,
    max_bytes: usize,
    backups: usize,
) -> io::Result<FileRotate<AppendCount>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(FileRotate::new(
        path,
        AppendCount::new(backups),
        ContentLimit::BytesSurpassed(max_bytes),
        Compression::None,
        #[cfg(unix)]
        None,
    ))
}

/// Writes every record to stderr and the log file.
///
/// File errors are swallowed so a full disk never stops the radio.
struct Tee<W> {
    file: W,
}

impl<W: Write> Write for Tee<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        let _ = self.file.write_all(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = self.file.flush();
        io::stderr().flush()
    }
}

/// Initializes the global logger.
pub fn init(level: log::LevelFilter, log_file: Option<&Path>) -> Result<()> {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level).format_timestamp_millis();

    if let Some(path) = log_file {
        let file = rotating_file(path, MAX_LOG_BYTES, LOG_BACKUPS)
            .with_context(|| format!("Failed to open log file: {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(Tee { file })));
    }

    builder.try_init().context("Logger already initialized")?;
    Ok(())
}
