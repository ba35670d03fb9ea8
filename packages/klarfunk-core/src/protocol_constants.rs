//! Fixed constants that should NOT be changed casually.
//!
//! Timing values here bound every blocking wait in the audio engine and the
//! controller. Tunable behavior (retry counts, watchdog intervals) lives in
//! configuration instead; see [`crate::state`].

// ─────────────────────────────────────────────────────────────────────────────
// Announcements
// ─────────────────────────────────────────────────────────────────────────────

/// Upper bound for a single announcement to finish (seconds).
///
/// Generous for the longest recorded announcement. A corrupt file that never
/// produces an end-of-file event is abandoned after this long.
pub const ANNOUNCEMENT_TIMEOUT_SECS: u64 = 15;

/// Upper bound for the announcement → stream transition in the handoff
/// protocol (seconds).
pub const HANDOFF_TRANSITION_TIMEOUT_SECS: u64 = 15;

// ─────────────────────────────────────────────────────────────────────────────
// Stream Connection
// ─────────────────────────────────────────────────────────────────────────────

/// Number of polls per connection attempt.
pub const CONNECT_POLL_ATTEMPTS: u32 = 50;

/// Delay between connection polls (milliseconds).
///
/// 50 × 100ms gives each attempt roughly five seconds to start flowing.
pub const CONNECT_POLL_INTERVAL_MS: u64 = 100;

/// Number of polls after the handoff transition before falling back.
///
/// The stream has been prefetching during the announcement, so it should
/// report progress almost immediately once it becomes the current item.
pub const HANDOFF_POLL_ATTEMPTS: u32 = 20;

/// Upper bound for the reconnect backoff (seconds).
pub const MAX_RECONNECT_BACKOFF_SECS: f64 = 60.0;

/// Minimum playback-position advance that counts as progress (seconds).
///
/// Filters sub-second jitter in the reported position.
pub const PROGRESS_EPSILON_SECS: f64 = 0.25;

// ─────────────────────────────────────────────────────────────────────────────
// Thread Joins
// ─────────────────────────────────────────────────────────────────────────────

/// Bounded wait for the watchdog thread to exit (milliseconds).
pub const WATCHDOG_JOIN_TIMEOUT_MS: u64 = 1000;

/// Bounded wait for the previous worker when dispatching (milliseconds).
pub const WORKER_JOIN_TIMEOUT_MS: u64 = 2000;

/// Bounded wait for the worker during controller shutdown (milliseconds).
pub const SHUTDOWN_JOIN_TIMEOUT_MS: u64 = 3000;

// ─────────────────────────────────────────────────────────────────────────────
// mpv JSON IPC
// ─────────────────────────────────────────────────────────────────────────────

/// Property polled to decide whether audio is actually flowing.
pub const MPV_PROP_PLAYBACK_TIME: &str = "playback-time";

/// Property observed to detect the playlist advancing to the stream.
pub const MPV_PROP_PLAYLIST_POS: &str = "playlist-pos";

/// Observer id used for `playlist-pos` observation.
pub const MPV_PLAYLIST_POS_OBSERVER_ID: u64 = 1;

/// How long to wait for the IPC socket to appear after spawning mpv
/// (milliseconds).
pub const MPV_SOCKET_CONNECT_TIMEOUT_MS: u64 = 3000;

/// How long to wait for a reply to a single IPC command (milliseconds).
pub const MPV_COMMAND_TIMEOUT_MS: u64 = 2000;

/// Grace period for mpv to exit after `quit` before it is killed
/// (milliseconds).
pub const MPV_QUIT_GRACE_MS: u64 = 500;

// ─────────────────────────────────────────────────────────────────────────────
// GPIO
// ─────────────────────────────────────────────────────────────────────────────

/// Pin polling interval (milliseconds).
pub const GPIO_POLL_INTERVAL_MS: u64 = 10;

/// How long one key press keeps a simulated button held (milliseconds).
///
/// Holding a key down autorepeats and keeps extending the hold, so a held
/// key eventually crosses the long-press threshold.
pub const MOCK_KEY_HOLD_WINDOW_MS: u64 = 1000;

/// Poll timeout of the keyboard mock's stdin reader (milliseconds).
pub const MOCK_KEY_POLL_MS: i32 = 100;

// ─────────────────────────────────────────────────────────────────────────────
// Subprocess Collaborators
// ─────────────────────────────────────────────────────────────────────────────

/// Timeout for a single TTS subprocess (seconds).
pub const TTS_TIMEOUT_SECS: u64 = 10;

/// Polling interval while waiting for a subprocess to exit (milliseconds).
pub const COMMAND_POLL_INTERVAL_MS: u64 = 10;
