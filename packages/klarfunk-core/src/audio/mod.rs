//! Audio playback and reconnection engine.
//!
//! The engine drives short-lived player backend instances:
//!
//! - [`backend`]: the player backend contract and scoped instance guard
//! - [`mpv`]: production backend speaking mpv's JSON IPC
//! - [`engine`]: announcements, stream connection with retries, and the
//!   announcement → stream handoff
//! - [`watchdog`]: background stall detection and reconnect with backoff
//! - [`reachability`]: TCP probe used before reconnecting
//!
//! Operations block the calling thread and report a boolean outcome. Backend
//! errors are logged inside the engine and never reach the caller.

pub mod backend;
pub mod engine;
#[cfg(unix)]
pub mod mpv;
pub mod reachability;
pub(crate) mod session;
pub mod watchdog;

use std::path::Path;
use std::time::Duration;

pub use backend::{
    BackendFactory, BackendGuard, BackendOptions, EndFileHandler, EndFileReason, PlayerBackend,
    PlaylistPositionHandler,
};
pub use engine::{AudioEngine, EngineConfig};
pub use reachability::{ReachabilityProbe, TcpProbe};
pub use session::SessionSnapshot;

use crate::protocol_constants::{
    ANNOUNCEMENT_TIMEOUT_SECS, CONNECT_POLL_ATTEMPTS, CONNECT_POLL_INTERVAL_MS,
    HANDOFF_POLL_ATTEMPTS, HANDOFF_TRANSITION_TIMEOUT_SECS, WATCHDOG_JOIN_TIMEOUT_MS,
};

/// Audio operations the radio controller depends on.
///
/// All methods block until the operation finishes and may be called from any
/// thread. Failures are reported as `false`, never as errors.
pub trait AudioPlayer: Send + Sync {
    /// Plays a local file to completion (bounded by a timeout).
    fn play_announcement(&self, file: &Path) -> bool;

    /// Connects to `url` with retries. `announce_retry` plays the "retrying"
    /// announcement between attempts.
    fn play_stream(&self, url: &str, announce_retry: bool) -> bool;

    /// Plays `announcement` and continues gaplessly into `url`.
    fn play_announcement_with_preload(&self, announcement: &Path, url: &str) -> bool;

    /// Cancels in-flight work and stops playback. Idempotent.
    fn stop(&self);

    /// Whether a stream is confirmed playing.
    fn is_playing(&self) -> bool;

    /// Releases every resource held by the engine.
    fn shutdown(&self);
}

/// Fixed timing parameters of the engine.
///
/// Production uses [`EngineTimings::default`]; tests shrink them so retry and
/// watchdog scenarios finish quickly.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineTimings {
    pub announcement_timeout: Duration,
    pub connect_poll_attempts: u32,
    pub connect_poll_interval: Duration,
    pub handoff_timeout: Duration,
    pub handoff_poll_attempts: u32,
    pub watchdog_join_timeout: Duration,
}

impl Default for EngineTimings {
    fn default() -> Self {
        Self {
            announcement_timeout: Duration::from_secs(ANNOUNCEMENT_TIMEOUT_SECS),
            connect_poll_attempts: CONNECT_POLL_ATTEMPTS,
            connect_poll_interval: Duration::from_millis(CONNECT_POLL_INTERVAL_MS),
            handoff_timeout: Duration::from_secs(HANDOFF_TRANSITION_TIMEOUT_SECS),
            handoff_poll_attempts: HANDOFF_POLL_ATTEMPTS,
            watchdog_join_timeout: Duration::from_millis(WATCHDOG_JOIN_TIMEOUT_MS),
        }
    }
}

impl EngineTimings {
    /// Time a single connection attempt is given to start flowing.
    #[must_use]
    pub fn connect_window(&self) -> Duration {
        self.connect_poll_interval * self.connect_poll_attempts
    }
}
