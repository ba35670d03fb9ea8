//! Playback session and reconnect backoff.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::backend::{EndFileReason, PlayerBackend};
use crate::protocol_constants::MAX_RECONNECT_BACKOFF_SECS;

/// The engine's view of what is playing and what should be playing.
///
/// Lives behind the engine's session mutex. `desired_url` survives teardown
/// so the watchdog can keep retrying; it is cleared only by an explicit stop.
#[derive(Default)]
pub(crate) struct PlaybackSession {
    /// The single live streaming backend, if any.
    pub backend: Option<Arc<dyn PlayerBackend>>,
    /// URL the live backend is bound to; set only while `active`.
    pub current_url: Option<String>,
    /// URL the system wants to be playing.
    pub desired_url: Option<String>,
    /// A backend is confirmed to be producing audio.
    pub active: bool,
    /// A connect cycle or handoff owns the session right now.
    pub connecting: bool,
    /// Bumped by every controller-initiated operation. Work started under an
    /// older generation must not commit.
    pub generation: u64,
}

impl PlaybackSession {
    /// Returns `true` if `id` is the live backend.
    pub fn owns(&self, id: u64) -> bool {
        self.backend.as_ref().is_some_and(|b| b.id() == id)
    }

    /// Detaches the live backend, keeping `desired_url`.
    ///
    /// The caller terminates the returned instance after releasing the lock.
    pub fn take_backend(&mut self) -> Option<Arc<dyn PlayerBackend>> {
        self.active = false;
        self.current_url = None;
        self.backend.take()
    }

    /// Forgets everything, including the desired URL.
    pub fn clear(&mut self) -> Option<Arc<dyn PlayerBackend>> {
        self.desired_url = None;
        self.connecting = false;
        self.take_backend()
    }
}

/// Read-only view of the session for diagnostics and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub active: bool,
    pub current_url: Option<String>,
    pub desired_url: Option<String>,
}

impl From<&PlaybackSession> for SessionSnapshot {
    fn from(session: &PlaybackSession) -> Self {
        Self {
            active: session.active,
            current_url: session.current_url.clone(),
            desired_url: session.desired_url.clone(),
        }
    }
}

/// Error raised asynchronously by the live backend's end-of-item observer.
///
/// Observers run on the backend's event thread and must not take the session
/// lock, so the flag carries its own copy of the live instance id. A report
/// from any other instance is dropped.
#[derive(Debug, Default)]
pub(crate) struct BackendErrorFlag {
    live_id: AtomicU64,
    reason: Mutex<Option<EndFileReason>>,
}

impl BackendErrorFlag {
    /// Binds the flag to instance `id`. Called under the session lock.
    pub fn bind(&self, id: u64) {
        self.live_id.store(id, Ordering::Release);
    }

    pub fn unbind(&self) {
        self.live_id.store(0, Ordering::Release);
    }

    /// Records `reason` if `id` is the bound instance.
    pub fn raise(&self, id: u64, reason: EndFileReason) -> bool {
        if id == 0 || self.live_id.load(Ordering::Acquire) != id {
            return false;
        }
        *self.reason.lock() = Some(reason);
        true
    }

    pub fn is_raised(&self) -> bool {
        self.reason.lock().is_some()
    }

    pub fn take(&self) -> Option<EndFileReason> {
        self.reason.lock().take()
    }
}

/// Exponential reconnect delay: doubles per failed cycle, capped, reset on
/// success.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ReconnectBackoff {
    base: f64,
    current: f64,
    max: f64,
}

impl ReconnectBackoff {
    pub fn new(base_seconds: f64) -> Self {
        let base = base_seconds.min(MAX_RECONNECT_BACKOFF_SECS);
        Self {
            base,
            current: base,
            max: MAX_RECONNECT_BACKOFF_SECS,
        }
    }

    pub fn current(&self) -> Duration {
        Duration::from_secs_f64(self.current)
    }

    pub fn current_seconds(&self) -> f64 {
        self.current
    }

    pub fn increase(&mut self) {
        self.current = (self.current * 2.0).min(self.max);
    }

    pub fn reset(&mut self) {
        self.current = self.base;
    }
}
