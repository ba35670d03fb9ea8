//! General utilities shared across the application.

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{CommandError, CommandResult};
use crate::protocol_constants::COMMAND_POLL_INTERVAL_MS;

// ─────────────────────────────────────────────────────────────────────────────
// Subprocess Execution
// ─────────────────────────────────────────────────────────────────────────────

/// Captured result of a finished subprocess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if the process was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Trimmed stderr, or stdout when stderr is empty. Used in error messages.
    #[must_use]
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

/// Runs `program` with `args`, killing it if it runs longer than `timeout`.
///
/// stdout and stderr are captured on helper threads so a chatty child cannot
/// block on a full pipe while we wait for it.
pub fn run_command(program: &str, args: &[&str], timeout: Duration) -> CommandResult<CommandOutput> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| spawn_error(program, e))?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let code = wait_with_timeout(&mut child, program, timeout)?;

    Ok(CommandOutput {
        code,
        stdout: stdout.join().unwrap_or_default(),
        stderr: stderr.join().unwrap_or_default(),
    })
}

/// Maps a spawn failure, distinguishing a missing program.
pub(crate) fn spawn_error(program: &str, e: std::io::Error) -> CommandError {
    if e.kind() == std::io::ErrorKind::NotFound {
        CommandError::NotFound(program.to_string())
    } else {
        CommandError::Io {
            program: program.to_string(),
            source: e,
        }
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = String::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_string(&mut buf);
        }
        buf
    })
}

/// Polls `child` until it exits or `timeout` elapses; kills it on overrun.
fn wait_with_timeout(
    child: &mut Child,
    program: &str,
    timeout: Duration,
) -> CommandResult<Option<i32>> {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status.code()),
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(CommandError::Timeout {
                    program: program.to_string(),
                    timeout,
                });
            }
            Ok(None) => thread::sleep(Duration::from_millis(COMMAND_POLL_INTERVAL_MS)),
            Err(e) => {
                let _ = child.kill();
                return Err(CommandError::Io {
                    program: program.to_string(),
                    source: e,
                });
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Platform Diagnostics
// ─────────────────────────────────────────────────────────────────────────────

/// Logs the process file-descriptor limits.
///
/// Every player instance holds a subprocess plus a socket, so a slow leak
/// shows up as creeping descriptor usage long before anything else fails.
pub fn log_fd_limits() {
    #[cfg(unix)]
    {
        let mut limit = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        // SAFETY: getrlimit writes into the struct we own; RLIMIT_NOFILE is valid.
        let result = unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) };
        if result == 0 {
            log::info!(
                "File descriptor limits: soft={} hard={}",
                limit.rlim_cur,
                limit.rlim_max
            );
        } else {
            log::warn!(
                "Failed to read file descriptor limits: {}",
                std::io::Error::last_os_error()
            );
        }
    }

    #[cfg(not(unix))]
    log::debug!("File descriptor limits not available on this platform");
}

/// Device-tree model file that names the board on ARM Linux.
const DEVICE_TREE_MODEL: &str = "/sys/firmware/devicetree/base/model";

/// Returns `true` when running on a Raspberry Pi.
#[must_use]
pub fn is_raspberry_pi() -> bool {
    std::fs::read_to_string(DEVICE_TREE_MODEL)
        .map(|model| model_names_raspberry_pi(&model))
        .unwrap_or(false)
}

fn model_names_raspberry_pi(model: &str) -> bool {
    model.to_ascii_lowercase().contains("raspberry pi")
}
