//! Announcement, stream connection and handoff.
//!
//! # Session ownership
//!
//! All shared state lives in one [`PlaybackSession`] behind the session
//! mutex. Every controller-initiated operation (stream, handoff, stop) bumps
//! the session generation; work started under an older generation re-checks
//! it before committing and quietly gives up when superseded.
//!
//! Backend instances are never terminated while the session lock is held.
//! Termination joins the backend's event thread, and that thread may itself
//! be waiting to report an error.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use super::backend::{BackendFactory, BackendGuard, BackendOptions, EndFileReason, PlayerBackend};
use super::reachability::{ReachabilityProbe, TcpProbe};
use super::session::{BackendErrorFlag, PlaybackSession, ReconnectBackoff, SessionSnapshot};
use super::watchdog::WatchdogHandle;
use super::{AudioPlayer, EngineTimings};
use crate::error::{ErrorCode, PlayerResult};
use crate::state::{AppConfig, AudioConfig, RetryConfig, WatchdogConfig};
use crate::sync::Signal;

/// Configuration slice the engine needs.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub audio: AudioConfig,
    pub retry: RetryConfig,
    pub watchdog: WatchdogConfig,
    pub retrying_announcement: PathBuf,
    pub failed_announcement: PathBuf,
    pub no_internet_announcement: PathBuf,
}

impl EngineConfig {
    #[must_use]
    pub fn from_app(config: &AppConfig) -> Self {
        Self {
            audio: config.audio.clone(),
            retry: config.retry.clone(),
            watchdog: config.watchdog.clone(),
            retrying_announcement: config.announcements.retrying.clone(),
            failed_announcement: config.announcements.failed.clone(),
            no_internet_announcement: config.announcements.no_internet.clone(),
        }
    }
}

/// Result of one connection attempt that did not fail outright.
enum AttemptOutcome {
    Connected,
    /// Cancelled or superseded; not a failure.
    Aborted,
    /// The backend never reported a playback position.
    NoAudio,
}

/// The production [`AudioPlayer`].
pub struct AudioEngine {
    inner: Arc<EngineInner>,
}

pub(super) struct EngineInner {
    pub(super) factory: Arc<dyn BackendFactory>,
    pub(super) config: EngineConfig,
    pub(super) timings: EngineTimings,
    pub(super) probe: Arc<dyn ReachabilityProbe>,
    pub(super) session: Mutex<PlaybackSession>,
    pub(super) backoff: Mutex<ReconnectBackoff>,
    pub(super) error_flag: Arc<BackendErrorFlag>,
    pub(super) cancel: Signal,
    pub(super) watchdog: Mutex<Option<WatchdogHandle>>,
}

impl AudioEngine {
    /// Creates an engine probing reachability with the configured hosts.
    pub fn new(factory: Arc<dyn BackendFactory>, config: EngineConfig) -> Self {
        let probe = Arc::new(TcpProbe::from_config(&config.watchdog));
        Self::with_parts(factory, config, probe, EngineTimings::default())
    }

    /// Creates an engine with explicit collaborators and timings.
    pub fn with_parts(
        factory: Arc<dyn BackendFactory>,
        config: EngineConfig,
        probe: Arc<dyn ReachabilityProbe>,
        timings: EngineTimings,
    ) -> Self {
        let backoff = ReconnectBackoff::new(config.watchdog.reconnect_delay_seconds);
        Self {
            inner: Arc::new(EngineInner {
                factory,
                config,
                timings,
                probe,
                session: Mutex::new(PlaybackSession::default()),
                backoff: Mutex::new(backoff),
                error_flag: Arc::new(BackendErrorFlag::default()),
                cancel: Signal::new(),
                watchdog: Mutex::new(None),
            }),
        }
    }

    /// Current session state.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot::from(&*self.inner.session.lock())
    }

    /// Current reconnect backoff in seconds.
    #[must_use]
    pub fn backoff_seconds(&self) -> f64 {
        self.inner.backoff.lock().current_seconds()
    }

    /// Whether the watchdog thread is running.
    #[must_use]
    pub fn watchdog_running(&self) -> bool {
        self.inner
            .watchdog
            .lock()
            .as_ref()
            .is_some_and(WatchdogHandle::is_running)
    }

    #[cfg(test)]
    pub(super) fn inner(&self) -> &Arc<EngineInner> {
        &self.inner
    }
}

impl AudioPlayer for AudioEngine {
    fn play_announcement(&self, file: &Path) -> bool {
        self.inner.play_announcement(file)
    }

    fn play_stream(&self, url: &str, announce_retry: bool) -> bool {
        self.inner.play_stream(url, announce_retry)
    }

    fn play_announcement_with_preload(&self, announcement: &Path, url: &str) -> bool {
        self.inner.play_with_handoff(announcement, url)
    }

    fn stop(&self) {
        self.inner.stop();
    }

    fn is_playing(&self) -> bool {
        self.inner.session.lock().active
    }

    fn shutdown(&self) {
        self.inner.stop();
        log::info!("[Audio] Engine shut down");
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.inner.stop();
    }
}

/// Terminates a detached backend. Must be called without the session lock.
fn release(backend: Option<Arc<dyn PlayerBackend>>) {
    if let Some(backend) = backend {
        backend.terminate();
    }
}

impl EngineInner {
    // ─────────────────────────────────────────────────────────────────────────
    // Announcements
    // ─────────────────────────────────────────────────────────────────────────

    /// Plays `file` on a fresh instance and waits for it to end.
    ///
    /// Not cancellable: announcements are short and always allowed to finish
    /// or time out.
    pub(super) fn play_announcement(&self, file: &Path) -> bool {
        if !file.is_file() {
            log::warn!("[Audio] Announcement not found: {}", file.display());
            return false;
        }

        let backend = match self
            .factory
            .create(&BackendOptions::announcement(&self.config.audio))
        {
            Ok(backend) => BackendGuard::new(backend),
            Err(e) => {
                log::warn!("[Audio] Cannot create announcement player [{}]: {}", e.code(), e);
                return false;
            }
        };

        let finished = Arc::new(Signal::new());
        let outcome: Arc<Mutex<Option<EndFileReason>>> = Arc::new(Mutex::new(None));
        {
            let finished = Arc::clone(&finished);
            let outcome = Arc::clone(&outcome);
            backend.on_end_of_item(Arc::new(move |reason: EndFileReason| {
                *outcome.lock() = Some(reason);
                finished.set();
            }));
        }

        if let Err(e) = backend.play(&file.to_string_lossy()) {
            log::warn!(
                "[Audio] Announcement {} failed [{}]: {}",
                file.display(),
                e.code(),
                e
            );
            return false;
        }

        if !finished.wait_timeout(self.timings.announcement_timeout) {
            log::warn!(
                "[Audio] Announcement {} did not finish within {:?}",
                file.display(),
                self.timings.announcement_timeout
            );
            return false;
        }

        let reason = *outcome.lock();
        match reason {
            Some(EndFileReason::Error) => {
                log::warn!("[Audio] Announcement {} could not be played", file.display());
                false
            }
            _ => true,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Session Helpers
    // ─────────────────────────────────────────────────────────────────────────

    /// Starts a new controller-initiated operation targeting `url`.
    ///
    /// Supersedes everything in flight and returns the new generation.
    fn begin_operation(&self, url: &str) -> u64 {
        self.cancel.clear();
        let (generation, previous) = {
            let mut session = self.session.lock();
            session.generation += 1;
            session.connecting = true;
            session.desired_url = Some(url.to_string());
            self.error_flag.unbind();
            (session.generation, session.take_backend())
        };
        self.error_flag.take();
        release(previous);
        generation
    }

    /// `true` once `generation` has been cancelled or superseded.
    pub(super) fn is_cancelled(&self, generation: u64) -> bool {
        self.cancel.is_set() || self.session.lock().generation != generation
    }

    /// Sleeps up to `duration`, waking early on cancellation.
    ///
    /// Returns `true` if the wait was cut short by cancellation.
    fn pause(&self, generation: u64, duration: std::time::Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled(generation) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.cancel
                .wait_timeout((deadline - now).min(self.timings.connect_poll_interval));
        }
    }

    /// Tears down the live backend if `generation` still owns the session.
    ///
    /// Keeps the desired URL. Returns `false` if superseded.
    pub(super) fn teardown(&self, generation: u64) -> bool {
        let previous = {
            let mut session = self.session.lock();
            if session.generation != generation {
                return false;
            }
            self.error_flag.unbind();
            session.take_backend()
        };
        release(previous);
        true
    }

    /// Makes `backend` the live instance, unless `generation` is stale.
    ///
    /// `leading_eofs` end-of-file events are expected before the stream item
    /// (announcements queued ahead of it); any later end-of-file means the
    /// server closed the stream and raises the error flag.
    fn install(
        &self,
        backend: &Arc<dyn PlayerBackend>,
        generation: u64,
        leading_eofs: usize,
    ) -> bool {
        let previous = {
            let mut session = self.session.lock();
            if session.generation != generation {
                return false;
            }
            let previous = session.take_backend();
            session.backend = Some(Arc::clone(backend));
            self.error_flag.bind(backend.id());
            previous
        };
        release(previous);

        let flag = Arc::clone(&self.error_flag);
        let id = backend.id();
        let expected_eofs = AtomicUsize::new(leading_eofs);
        backend.on_end_of_item(Arc::new(move |reason: EndFileReason| {
            let failed = match reason {
                EndFileReason::Error => true,
                EndFileReason::Eof => expected_eofs
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_err(),
                _ => false,
            };
            if failed && flag.raise(id, reason) {
                log::warn!("[Audio] Backend {} reported a playback error", id);
            }
        }));
        true
    }

    /// Marks `backend` as playing `url`, if it is still the live instance.
    fn commit(
        self: &Arc<Self>,
        backend: &Arc<dyn PlayerBackend>,
        url: &str,
        generation: u64,
    ) -> bool {
        {
            let mut session = self.session.lock();
            if session.generation != generation || !session.owns(backend.id()) {
                return false;
            }
            session.active = true;
            session.connecting = false;
            session.current_url = Some(url.to_string());
            session.desired_url = Some(url.to_string());
        }
        self.backoff.lock().reset();
        log::info!("[Audio] Stream playing: {}", url);
        if self.config.watchdog.enabled {
            self.ensure_watchdog(generation);
        }
        true
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Stream Connection
    // ─────────────────────────────────────────────────────────────────────────

    pub(super) fn play_stream(self: &Arc<Self>, url: &str, announce_retry: bool) -> bool {
        let generation = self.begin_operation(url);
        self.connect_cycle(url, announce_retry, generation)
    }

    /// Runs up to `max_attempts` connection attempts for `url`.
    ///
    /// On exhaustion `current` is cleared but `desired` stays set, and the
    /// watchdog is started so it keeps retrying in the background.
    pub(super) fn connect_cycle(
        self: &Arc<Self>,
        url: &str,
        announce_retry: bool,
        generation: u64,
    ) -> bool {
        let max_attempts = self.config.retry.max_attempts;

        for attempt in 1..=max_attempts {
            if self.is_cancelled(generation) {
                log::info!("[Audio] Connection to {} cancelled", url);
                return false;
            }

            {
                let mut session = self.session.lock();
                if session.generation != generation {
                    return false;
                }
                session.connecting = true;
                session.desired_url = Some(url.to_string());
            }
            if !self.teardown(generation) {
                return false;
            }

            log::info!(
                "[Audio] Connecting to {} (attempt {}/{})",
                url,
                attempt,
                max_attempts
            );
            match self.try_connect(url, generation) {
                Ok(AttemptOutcome::Connected) => return true,
                Ok(AttemptOutcome::Aborted) => {
                    log::info!("[Audio] Connection to {} cancelled", url);
                    return false;
                }
                Ok(AttemptOutcome::NoAudio) => log::warn!(
                    "[Audio] No audio from {} within {:?}",
                    url,
                    self.timings.connect_window()
                ),
                Err(e) => log::warn!(
                    "[Audio] Attempt {}/{} failed [{}]: {}",
                    attempt,
                    max_attempts,
                    e.code(),
                    e
                ),
            }

            if !self.teardown(generation) {
                return false;
            }

            if attempt < max_attempts {
                if announce_retry && !self.is_cancelled(generation) {
                    self.play_announcement(&self.config.retrying_announcement);
                }
                if self.pause(generation, self.config.retry.delay()) {
                    log::info!("[Audio] Connection to {} cancelled", url);
                    return false;
                }
            }
        }

        log::error!(
            "[Audio] Giving up on {} after {} attempts",
            url,
            max_attempts
        );
        let still_owner = {
            let mut session = self.session.lock();
            if session.generation == generation {
                session.connecting = false;
                session.active = false;
                session.current_url = None;
                true
            } else {
                false
            }
        };
        if still_owner && self.config.watchdog.enabled {
            self.ensure_watchdog(generation);
        }
        false
    }

    fn try_connect(self: &Arc<Self>, url: &str, generation: u64) -> PlayerResult<AttemptOutcome> {
        let backend = self
            .factory
            .create(&BackendOptions::stream(&self.config.audio))?;
        if !self.install(&backend, generation, 0) {
            backend.terminate();
            return Ok(AttemptOutcome::Aborted);
        }

        backend.play(url)?;

        for _ in 0..self.timings.connect_poll_attempts {
            if self.is_cancelled(generation) {
                return Ok(AttemptOutcome::Aborted);
            }
            if backend.playback_position().is_some() {
                return Ok(if self.commit(&backend, url, generation) {
                    AttemptOutcome::Connected
                } else {
                    AttemptOutcome::Aborted
                });
            }
            self.cancel.wait_timeout(self.timings.connect_poll_interval);
        }
        Ok(AttemptOutcome::NoAudio)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Handoff
    // ─────────────────────────────────────────────────────────────────────────

    /// Announcement followed gaplessly by the stream on one prefetching
    /// instance. Any failure falls back to [`Self::connect_cycle`].
    pub(super) fn play_with_handoff(self: &Arc<Self>, announcement: &Path, url: &str) -> bool {
        if !announcement.is_file() {
            log::warn!(
                "[Audio] Announcement {} missing, connecting directly",
                announcement.display()
            );
            return self.play_stream(url, true);
        }

        let generation = self.begin_operation(url);
        match self.try_handoff(announcement, url, generation) {
            Ok(true) => return true,
            Ok(false) => {}
            Err(e) => log::warn!("[Audio] Handoff failed [{}]: {}", e.code(), e),
        }

        if self.is_cancelled(generation) {
            log::info!("[Audio] Handoff to {} cancelled", url);
            return false;
        }
        if !self.teardown(generation) {
            return false;
        }
        log::info!("[Audio] Falling back to direct connection for {}", url);
        self.connect_cycle(url, true, generation)
    }

    fn try_handoff(
        self: &Arc<Self>,
        announcement: &Path,
        url: &str,
        generation: u64,
    ) -> PlayerResult<bool> {
        let backend = self
            .factory
            .create(&BackendOptions::prefetch(&self.config.audio))?;
        if !self.install(&backend, generation, 1) {
            backend.terminate();
            return Ok(false);
        }

        let transitioned = Arc::new(Signal::new());
        {
            let transitioned = Arc::clone(&transitioned);
            backend.on_playlist_position_changed(Arc::new(move |position: Option<i64>| {
                if position == Some(1) {
                    transitioned.set();
                }
            }))?;
        }

        backend.play(&announcement.to_string_lossy())?;
        backend.playlist_append(url)?;
        log::info!(
            "[Audio] Playing {} while prefetching {}",
            announcement.display(),
            url
        );

        // The observers fire on the backend's event thread; no lock is held here.
        let deadline = Instant::now() + self.timings.handoff_timeout;
        while !transitioned.wait_timeout(self.timings.connect_poll_interval) {
            if self.is_cancelled(generation) {
                return Ok(false);
            }
            if Instant::now() >= deadline {
                log::warn!(
                    "[Audio] No transition to {} within {:?}",
                    url,
                    self.timings.handoff_timeout
                );
                return Ok(false);
            }
        }

        if let Some(reason) = self.error_flag.take() {
            log::warn!("[Audio] Stream {} failed during handoff ({:?})", url, reason);
            return Ok(false);
        }

        for _ in 0..self.timings.handoff_poll_attempts {
            if self.is_cancelled(generation) {
                return Ok(false);
            }
            if backend.playback_position().is_some_and(|p| p > 0.0) {
                return Ok(self.commit(&backend, url, generation));
            }
            self.cancel.wait_timeout(self.timings.connect_poll_interval);
        }
        log::warn!("[Audio] Stream {} silent after handoff", url);
        Ok(false)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Stop
    // ─────────────────────────────────────────────────────────────────────────

    pub(super) fn stop(&self) {
        self.cancel.set();
        let previous = {
            let mut session = self.session.lock();
            session.generation += 1;
            self.error_flag.unbind();
            session.clear()
        };
        self.error_flag.take();
        let had_backend = previous.is_some();
        release(previous);
        self.stop_watchdog();
        if had_backend {
            log::info!("[Audio] Playback stopped");
        }
    }
}
