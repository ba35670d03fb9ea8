//! Stream watchdog.
//!
//! One background thread per engine ticks every `check_interval` and decides
//! whether the stream needs recovering:
//!
//! - no active stream but a desired URL: retry once the backoff has elapsed
//! - active stream with a backend-reported error, or with no playback
//!   progress for `stall_seconds`: recover
//!
//! Recovery probes internet reachability first. Without internet it only
//! announces the outage, waits out the backoff and grows it. With internet
//! it announces the retry and runs one connect cycle without per-attempt
//! announcements. The backoff is only ever changed here and on a successful
//! connection.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::engine::EngineInner;
use crate::protocol_constants::PROGRESS_EPSILON_SECS;
use crate::sync::{join_bounded, Signal};

/// Handle to the running watchdog thread.
pub(crate) struct WatchdogHandle {
    stop: Arc<Signal>,
    thread: JoinHandle<()>,
}

impl WatchdogHandle {
    pub fn is_running(&self) -> bool {
        !self.thread.is_finished()
    }
}

/// Per-thread progress tracking.
#[derive(Debug, Clone)]
pub struct StallMonitor {
    backend_id: Option<u64>,
    last_position: Option<f64>,
    last_progress: Instant,
    last_attempt: Instant,
}

impl StallMonitor {
    #[must_use]
    pub fn new(now: Instant) -> Self {
        Self {
            backend_id: None,
            last_position: None,
            last_progress: now,
            last_attempt: now,
        }
    }

    /// Records a position sample; returns `true` if it counts as progress.
    ///
    /// A new backend instance restarts tracking. The first sample of an
    /// instance counts as progress.
    pub fn observe(&mut self, backend_id: u64, position: Option<f64>, now: Instant) -> bool {
        if self.backend_id != Some(backend_id) {
            self.backend_id = Some(backend_id);
            self.last_position = None;
            self.last_progress = now;
        }

        let progressed = match (position, self.last_position) {
            (Some(current), Some(last)) => current > last + PROGRESS_EPSILON_SECS,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if progressed {
            self.last_position = position;
            self.last_progress = now;
        }
        progressed
    }

    #[must_use]
    pub fn since_progress(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_progress)
    }

    #[must_use]
    pub fn since_attempt(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_attempt)
    }

    pub fn mark_attempt(&mut self, now: Instant) {
        self.last_attempt = now;
    }

    /// Forgets the tracked instance so the next sample starts fresh.
    pub fn reset(&mut self, now: Instant) {
        self.backend_id = None;
        self.last_position = None;
        self.last_progress = now;
    }
}

impl EngineInner {
    /// Starts the watchdog unless it is already running.
    ///
    /// Does nothing once `generation` is stale, so a racing stop cannot be
    /// followed by a fresh watchdog.
    pub(super) fn ensure_watchdog(self: &Arc<Self>, generation: u64) {
        let mut slot = self.watchdog.lock();
        if slot.as_ref().is_some_and(WatchdogHandle::is_running) {
            return;
        }
        if self.session.lock().generation != generation {
            return;
        }

        let stop = Arc::new(Signal::new());
        let spawned = {
            let inner = Arc::clone(self);
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name("stream-watchdog".into())
                .spawn(move || inner.run_watchdog(&stop))
        };
        match spawned {
            Ok(thread) => *slot = Some(WatchdogHandle { stop, thread }),
            Err(e) => log::error!("[Watchdog] Failed to start: {}", e),
        }
    }

    /// Stops the watchdog and waits a bounded time for it to exit.
    pub(super) fn stop_watchdog(&self) {
        let Some(handle) = self.watchdog.lock().take() else {
            return;
        };
        handle.stop.set();
        if !join_bounded(handle.thread, self.timings.watchdog_join_timeout) {
            log::warn!("[Watchdog] Thread did not exit in time, detaching");
        }
    }

    fn run_watchdog(self: Arc<Self>, stop: &Signal) {
        let interval = self.config.watchdog.check_interval();
        log::info!(
            "[Watchdog] Started (interval {:?}, stall threshold {:?})",
            interval,
            self.config.watchdog.stall_threshold()
        );
        let mut monitor = StallMonitor::new(Instant::now());
        while !stop.wait_timeout(interval) {
            self.watchdog_tick(&mut monitor, stop);
        }
        log::info!("[Watchdog] Stopped");
    }

    /// One watchdog evaluation.
    pub(super) fn watchdog_tick(self: &Arc<Self>, monitor: &mut StallMonitor, stop: &Signal) {
        let (active, backend, url, generation) = {
            let session = self.session.lock();
            if session.connecting {
                return;
            }
            let url = if session.active {
                session.current_url.clone()
            } else {
                session.desired_url.clone()
            };
            (session.active, session.backend.clone(), url, session.generation)
        };
        let Some(url) = url else {
            return;
        };
        let now = Instant::now();

        let backend = match backend {
            Some(backend) if active => backend,
            _ => {
                let backoff = self.backoff.lock().current();
                if monitor.since_attempt(now) >= backoff {
                    log::info!("[Watchdog] No active stream, retrying {}", url);
                    self.recover(&url, generation, monitor, stop);
                }
                return;
            }
        };

        let position = backend.playback_position();
        let progressed = monitor.observe(backend.id(), position, now);

        if self.error_flag.is_raised() {
            log::warn!("[Watchdog] Backend reported an error on {}", url);
        } else if !progressed
            && monitor.since_progress(now) >= self.config.watchdog.stall_threshold()
        {
            log::warn!(
                "[Watchdog] No progress on {} for {:?} (position {:?})",
                url,
                monitor.since_progress(now),
                position
            );
        } else {
            return;
        }
        self.recover(&url, generation, monitor, stop);
    }

    /// Tears down the stream and tries to bring `url` back.
    fn recover(
        self: &Arc<Self>,
        url: &str,
        generation: u64,
        monitor: &mut StallMonitor,
        stop: &Signal,
    ) {
        monitor.mark_attempt(Instant::now());
        self.error_flag.take();
        if !self.teardown(generation) {
            return;
        }

        if self.config.watchdog.internet_check_enabled && !self.probe.is_reachable() {
            let delay = self.backoff.lock().current();
            log::warn!(
                "[Watchdog] Internet unreachable, next attempt in {:?}",
                delay
            );
            self.play_announcement(&self.config.no_internet_announcement);
            if !stop.wait_timeout(delay) && !self.is_cancelled(generation) {
                self.backoff.lock().increase();
            }
            return;
        }

        if self.is_cancelled(generation) {
            return;
        }
        self.play_announcement(&self.config.retrying_announcement);

        if self.connect_cycle(url, false, generation) {
            log::info!("[Watchdog] Recovered {}", url);
            monitor.reset(Instant::now());
        } else if !self.is_cancelled(generation) {
            self.play_announcement(&self.config.failed_announcement);
            let mut backoff = self.backoff.lock();
            backoff.increase();
            log::warn!(
                "[Watchdog] Reconnect failed, backing off {:?}",
                backoff.current()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioEngine, AudioPlayer};
    use crate::test_support::{engine_config, fast_timings, FakeFactory, StaticProbe};

    const URL: &str = "http://radio.example/stream";

    // ─────────────────────────────────────────────────────────────────────────
    // StallMonitor Tests
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn jitter_below_epsilon_is_not_progress() {
        let start = Instant::now();
        let mut monitor = StallMonitor::new(start);
        assert!(monitor.observe(1, Some(10.0), start));
        assert!(!monitor.observe(1, Some(10.1), start + Duration::from_secs(1)));
        assert!(monitor.observe(1, Some(10.5), start + Duration::from_secs(2)));
        assert_eq!(
            monitor.since_progress(start + Duration::from_secs(5)),
            Duration::from_secs(3)
        );
    }

    #[test]
    fn missing_position_is_not_progress() {
        let start = Instant::now();
        let mut monitor = StallMonitor::new(start);
        assert!(!monitor.observe(1, None, start + Duration::from_secs(1)));
        assert_eq!(
            monitor.since_progress(start + Duration::from_secs(4)),
            Duration::from_secs(3)
        );
    }

    #[test]
    fn new_backend_restarts_tracking() {
        let start = Instant::now();
        let mut monitor = StallMonitor::new(start);
        monitor.observe(1, Some(50.0), start);
        let later = start + Duration::from_secs(20);
        assert!(monitor.observe(2, Some(0.5), later));
        assert_eq!(monitor.since_progress(later), Duration::ZERO);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Tick Tests
    // ─────────────────────────────────────────────────────────────────────────

    fn stale_monitor() -> StallMonitor {
        let long_ago = Instant::now()
            .checked_sub(Duration::from_secs(1))
            .unwrap_or_else(Instant::now);
        StallMonitor::new(long_ago)
    }

    #[test]
    fn tick_after_exhaustion_runs_one_more_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let factory = FakeFactory::new();
        factory.set_fail_streams(true);
        let mut config = engine_config(dir.path());
        config.retry.max_attempts = 1;
        config.watchdog.enabled = false;
        let engine = AudioEngine::with_parts(
            factory.clone(),
            config.clone(),
            Arc::new(StaticProbe::new(true)),
            fast_timings(),
        );

        assert!(!engine.play_stream(URL, false));
        assert_eq!(factory.stream_play_count(), 1);

        factory.set_fail_streams(false);
        let mut monitor = stale_monitor();
        engine.inner().watchdog_tick(&mut monitor, &Signal::new());

        assert_eq!(factory.stream_play_count(), 2);
        assert_eq!(factory.plays_of(&config.retrying_announcement), 1);
        assert!(engine.snapshot().active);
        engine.stop();
    }

    #[test]
    fn failed_recovery_doubles_backoff_and_announces() {
        let dir = tempfile::tempdir().unwrap();
        let factory = FakeFactory::new();
        factory.set_fail_streams(true);
        let mut config = engine_config(dir.path());
        config.retry.max_attempts = 1;
        config.watchdog.enabled = false;
        config.watchdog.reconnect_delay_seconds = 0.05;
        let engine = AudioEngine::with_parts(
            factory.clone(),
            config.clone(),
            Arc::new(StaticProbe::new(true)),
            fast_timings(),
        );

        assert!(!engine.play_stream(URL, false));
        let mut monitor = stale_monitor();
        engine.inner().watchdog_tick(&mut monitor, &Signal::new());

        assert_eq!(factory.plays_of(&config.failed_announcement), 1);
        assert_eq!(engine.backoff_seconds(), 0.1);
        assert_eq!(engine.snapshot().desired_url.as_deref(), Some(URL));
    }

    #[test]
    fn no_internet_announces_and_skips_reconnect() {
        let dir = tempfile::tempdir().unwrap();
        let factory = FakeFactory::new();
        factory.set_fail_streams(true);
        let mut config = engine_config(dir.path());
        config.retry.max_attempts = 1;
        config.watchdog.enabled = false;
        config.watchdog.reconnect_delay_seconds = 0.05;
        let engine = AudioEngine::with_parts(
            factory.clone(),
            config.clone(),
            Arc::new(StaticProbe::new(false)),
            fast_timings(),
        );

        assert!(!engine.play_stream(URL, false));
        let streams_before = factory.stream_play_count();

        let mut monitor = stale_monitor();
        engine.inner().watchdog_tick(&mut monitor, &Signal::new());

        assert_eq!(factory.stream_play_count(), streams_before);
        assert_eq!(factory.plays_of(&config.no_internet_announcement), 1);
        assert_eq!(engine.backoff_seconds(), 0.1);
    }

    #[test]
    fn tick_ignores_idle_engine() {
        let dir = tempfile::tempdir().unwrap();
        let factory = FakeFactory::new();
        let engine = AudioEngine::with_parts(
            factory.clone(),
            engine_config(dir.path()),
            Arc::new(StaticProbe::new(true)),
            fast_timings(),
        );

        let mut monitor = stale_monitor();
        engine.inner().watchdog_tick(&mut monitor, &Signal::new());
        assert_eq!(factory.created_count(), 0);
    }

    #[test]
    fn backend_error_triggers_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let factory = FakeFactory::new();
        let mut config = engine_config(dir.path());
        config.watchdog.enabled = false;
        let engine = AudioEngine::with_parts(
            factory.clone(),
            config,
            Arc::new(StaticProbe::new(true)),
            fast_timings(),
        );

        assert!(engine.play_stream(URL, false));
        let first = factory.last_stream().unwrap();
        first.fire_end_file(crate::audio::EndFileReason::Error);

        let mut monitor = StallMonitor::new(Instant::now());
        engine.inner().watchdog_tick(&mut monitor, &Signal::new());

        assert_eq!(factory.stream_play_count(), 2);
        assert!(first.is_terminated());
        assert!(engine.snapshot().active);
        engine.stop();
    }

    #[test]
    fn server_closed_stream_triggers_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let factory = FakeFactory::new();
        let mut config = engine_config(dir.path());
        config.watchdog.enabled = false;
        let engine = AudioEngine::with_parts(
            factory.clone(),
            config,
            Arc::new(StaticProbe::new(true)),
            fast_timings(),
        );

        assert!(engine.play_stream(URL, false));
        let first = factory.last_stream().unwrap();
        first.fire_end_file(crate::audio::EndFileReason::Eof);

        let mut monitor = StallMonitor::new(Instant::now());
        engine.inner().watchdog_tick(&mut monitor, &Signal::new());

        assert_eq!(factory.stream_play_count(), 2);
        assert!(first.is_terminated());
        assert!(engine.snapshot().active);
        engine.stop();
    }

    #[test]
    fn no_internet_retry_spacing_follows_current_backoff() {
        let dir = tempfile::tempdir().unwrap();
        let factory = FakeFactory::new();
        factory.set_fail_streams(true);
        let mut config = engine_config(dir.path());
        config.retry.max_attempts = 1;
        config.watchdog.enabled = false;
        config.watchdog.reconnect_delay_seconds = 0.05;
        let engine = AudioEngine::with_parts(
            factory.clone(),
            config.clone(),
            Arc::new(StaticProbe::new(false)),
            fast_timings(),
        );
        assert!(!engine.play_stream(URL, false));

        let mut monitor = stale_monitor();
        let before = Instant::now();
        engine.inner().watchdog_tick(&mut monitor, &Signal::new());

        // The attempt is stamped before the backoff wait, not after it.
        assert!(monitor.since_attempt(Instant::now()) >= Duration::from_millis(50));
        assert!(monitor.since_attempt(before) == Duration::ZERO);
        assert_eq!(engine.backoff_seconds(), 0.1);
    }

    #[test]
    fn superseded_no_internet_wait_leaves_backoff_alone() {
        let dir = tempfile::tempdir().unwrap();
        let factory = FakeFactory::new();
        factory.set_fail_streams(true);
        let mut config = engine_config(dir.path());
        config.retry.max_attempts = 1;
        config.watchdog.enabled = false;
        config.watchdog.reconnect_delay_seconds = 0.3;
        let engine = Arc::new(AudioEngine::with_parts(
            factory.clone(),
            config,
            Arc::new(StaticProbe::new(false)),
            fast_timings(),
        ));
        assert!(!engine.play_stream(URL, false));

        let ticking = {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                let mut monitor = stale_monitor();
                engine.inner().watchdog_tick(&mut monitor, &Signal::new());
            })
        };
        thread::sleep(Duration::from_millis(100));
        engine.stop();
        ticking.join().unwrap();

        assert_eq!(engine.backoff_seconds(), 0.3);
    }

    #[test]
    fn frozen_stream_reconnects_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let factory = FakeFactory::new();
        let mut config = engine_config(dir.path());
        config.watchdog.check_interval_seconds = 0.1;
        config.watchdog.stall_seconds = 0.5;
        let engine = AudioEngine::with_parts(
            factory.clone(),
            config,
            Arc::new(StaticProbe::new(true)),
            fast_timings(),
        );

        assert!(engine.play_stream(URL, false));
        assert!(engine.watchdog_running());

        thread::sleep(Duration::from_millis(950));
        assert_eq!(factory.stream_play_count(), 2);
        assert!(engine.snapshot().active);
        engine.stop();
        assert!(!engine.watchdog_running());
    }
}
