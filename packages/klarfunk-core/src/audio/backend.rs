//! Player backend contract.
//!
//! A backend instance is a black-box media player bound to one playlist. The
//! engine never shares an instance between operations: each announcement,
//! connection attempt and handoff creates a fresh one through a
//! [`BackendFactory`] and terminates it when done.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::PlayerResult;
use crate::state::{AudioConfig, StreamBufferConfig};

/// Why the backend finished a playlist item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndFileReason {
    /// Reached the end of the item.
    Eof,
    /// Stopped by a command (replace, stop).
    Stop,
    /// The player is shutting down.
    Quit,
    /// Playback failed (network error, undecodable file).
    Error,
    /// The item redirected to another URL.
    Redirect,
    Unknown,
}

impl EndFileReason {
    /// Parses the `reason` field of an mpv `end-file` event.
    #[must_use]
    pub fn from_mpv(reason: &str) -> Self {
        match reason {
            "eof" => Self::Eof,
            "stop" => Self::Stop,
            "quit" => Self::Quit,
            "error" => Self::Error,
            "redirect" => Self::Redirect,
            _ => Self::Unknown,
        }
    }

    #[must_use]
    pub fn is_error(self) -> bool {
        self == Self::Error
    }
}

/// Called when the backend finishes a playlist item.
pub type EndFileHandler = Arc<dyn Fn(EndFileReason) + Send + Sync>;

/// Called when the backend's playlist position changes (`None` when idle).
pub type PlaylistPositionHandler = Arc<dyn Fn(Option<i64>) + Send + Sync>;

/// How a backend instance should be configured.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendOptions {
    /// Audio output driver.
    pub audio_output: String,
    /// Explicit output device, `None` for the driver default.
    pub audio_device: Option<String>,
    pub volume: u8,
    /// Network buffering; `Some` only for streaming instances.
    pub buffer: Option<StreamBufferConfig>,
    /// Start loading the next playlist item while the current one plays.
    pub prefetch: bool,
}

impl BackendOptions {
    /// Options for local announcement files.
    #[must_use]
    pub fn announcement(audio: &AudioConfig) -> Self {
        Self {
            audio_output: audio.backend.clone(),
            audio_device: audio.audio_device(),
            volume: audio.volume,
            buffer: None,
            prefetch: false,
        }
    }

    /// Options for network streams, with buffering applied when enabled.
    #[must_use]
    pub fn stream(audio: &AudioConfig) -> Self {
        Self {
            buffer: audio.buffer.enabled.then(|| audio.buffer.clone()),
            ..Self::announcement(audio)
        }
    }

    /// Options for the announcement → stream handoff playlist.
    #[must_use]
    pub fn prefetch(audio: &AudioConfig) -> Self {
        Self {
            prefetch: true,
            ..Self::stream(audio)
        }
    }
}

/// One live media-player instance.
///
/// Implementations must be safe to call from several threads: the engine's
/// worker, the watchdog and the backend's own event thread all touch the
/// same instance.
pub trait PlayerBackend: Send + Sync {
    /// Process-unique identity of this instance.
    fn id(&self) -> u64;

    /// Replaces the playlist with `target` and starts playing it.
    fn play(&self, target: &str) -> PlayerResult<()>;

    /// Appends `target` to the playlist.
    fn playlist_append(&self, target: &str) -> PlayerResult<()>;

    /// Current playback position in seconds, `None` while nothing is flowing.
    fn playback_position(&self) -> Option<f64>;

    /// Registers the end-of-item handler, replacing any previous one.
    fn on_end_of_item(&self, handler: EndFileHandler);

    /// Registers the playlist-position handler and starts observing.
    fn on_playlist_position_changed(&self, handler: PlaylistPositionHandler) -> PlayerResult<()>;

    /// Releases the instance. Idempotent and infallible.
    fn terminate(&self);
}

/// Creates backend instances.
pub trait BackendFactory: Send + Sync {
    fn create(&self, options: &BackendOptions) -> PlayerResult<Arc<dyn PlayerBackend>>;
}

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

/// Allocates a process-unique backend instance id.
#[must_use]
pub fn next_instance_id() -> u64 {
    NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Terminates the wrapped instance when dropped.
///
/// Every temporary backend (announcements, handoff probes) lives inside one
/// of these so that no exit path can leak the player process.
pub struct BackendGuard {
    backend: Arc<dyn PlayerBackend>,
}

impl BackendGuard {
    #[must_use]
    pub fn new(backend: Arc<dyn PlayerBackend>) -> Self {
        Self { backend }
    }

    #[must_use]
    pub fn backend(&self) -> &Arc<dyn PlayerBackend> {
        &self.backend
    }
}

impl std::ops::Deref for BackendGuard {
    type Target = dyn PlayerBackend;

    fn deref(&self) -> &Self::Target {
        self.backend.as_ref()
    }
}

impl Drop for BackendGuard {
    fn drop(&mut self) {
        self.backend.terminate();
    }
}
