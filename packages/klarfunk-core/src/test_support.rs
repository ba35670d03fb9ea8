//! Test doubles shared by the unit tests.
//!
//! - [`FakeFactory`] / [`FakeBackend`]: scripted player backends that count
//!   live instances and record every played target
//! - [`StaticProbe`]: fixed reachability answer
//! - [`RecordingAudioPlayer`]: records controller calls instead of playing
//! - fake network and TTS collaborators for controller tests

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::audio::backend::next_instance_id;
use crate::audio::{
    AudioPlayer, BackendFactory, BackendOptions, EndFileHandler, EndFileReason, EngineConfig,
    EngineTimings, PlayerBackend, PlaylistPositionHandler, ReachabilityProbe,
};
use crate::error::{NetworkError, NetworkResult, PlayerError, PlayerResult, TtsError, TtsResult};
use crate::network::{ActiveWifi, ConnectivityChecker, ConnectivityStatus, SavedWifi, WifiManager};
use crate::state::{
    AnnouncementFiles, AppConfig, AudioConfig, Channel, DebugConfig, GpioConfig, RetryConfig,
    TtsConfig, WatchdogConfig, WifiConfig,
};
use crate::sync::Signal;
use crate::tts::TtsSpeaker;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration Fixtures
// ─────────────────────────────────────────────────────────────────────────────

/// Engine timings small enough for unit tests.
pub fn fast_timings() -> EngineTimings {
    EngineTimings {
        announcement_timeout: Duration::from_millis(300),
        connect_poll_attempts: 10,
        connect_poll_interval: Duration::from_millis(10),
        handoff_timeout: Duration::from_millis(200),
        handoff_poll_attempts: 10,
        watchdog_join_timeout: Duration::from_millis(500),
    }
}

/// Writes a placeholder audio file and returns its path.
pub fn touch(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"not really audio").expect("write fixture");
    path
}

/// Engine configuration with announcement files created under `dir`.
pub fn engine_config(dir: &Path) -> EngineConfig {
    EngineConfig {
        audio: AudioConfig::default(),
        retry: RetryConfig {
            max_attempts: 3,
            delay_seconds: 0.02,
        },
        watchdog: WatchdogConfig {
            check_interval_seconds: 0.05,
            stall_seconds: 30.0,
            reconnect_delay_seconds: 0.05,
            ..WatchdogConfig::default()
        },
        retrying_announcement: touch(dir, "retrying.mp3"),
        failed_announcement: touch(dir, "failed.mp3"),
        no_internet_announcement: touch(dir, "no_internet.mp3"),
    }
}

/// Three-channel application configuration with every file created.
pub fn make_app_config(dir: &Path) -> AppConfig {
    let channels = (0..3)
        .map(|index| Channel {
            index,
            name: format!("Channel {}", index + 1),
            stream_url: format!("http://radio.example/{index}"),
            announcement_file: touch(dir, &format!("channel_{index}.mp3")),
        })
        .collect();

    AppConfig {
        audio: AudioConfig::default(),
        gpio: GpioConfig::default(),
        retry: RetryConfig::default(),
        watchdog: WatchdogConfig::default(),
        wifi: WifiConfig::default(),
        tts: TtsConfig::default(),
        debug: DebugConfig {
            enabled: true,
            selection_timeout_seconds: 0.5,
            ..DebugConfig::default()
        },
        channels,
        default_channel_index: 0,
        audio_dir: dir.to_path_buf(),
        announcements: AnnouncementFiles {
            retrying: touch(dir, "retrying.mp3"),
            failed: touch(dir, "failed.mp3"),
            no_internet: touch(dir, "no_internet.mp3"),
            boot_connected: touch(dir, "boot_connected.mp3"),
            boot_no_internet: touch(dir, "boot_no_internet.mp3"),
            startup_branding: touch(dir, "branding.mp3"),
            goodbye: touch(dir, "goodbye.mp3"),
            selector_off: touch(dir, "selector_off.mp3"),
            shutdown: touch(dir, "shutdown.mp3"),
        },
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Fake Player Backend
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct FakeSettings {
    fail_create: bool,
    fail_streams: bool,
    streams_flow: bool,
    announcements_finish: bool,
    announcement_duration: Duration,
    handoff_transitions: bool,
    handoff_stream_error: bool,
}

impl Default for FakeSettings {
    fn default() -> Self {
        Self {
            fail_create: false,
            fail_streams: false,
            streams_flow: true,
            announcements_finish: true,
            announcement_duration: Duration::ZERO,
            handoff_transitions: true,
            handoff_stream_error: false,
        }
    }
}

#[derive(Default)]
struct FakeShared {
    settings: Mutex<FakeSettings>,
    created: AtomicUsize,
    live: AtomicUsize,
    max_live: AtomicUsize,
    plays: Mutex<Vec<String>>,
    appended: Mutex<Vec<String>>,
    instances: Mutex<Vec<Arc<FakeBackend>>>,
}

/// Backend factory with scripted behavior.
///
/// Targets containing `://` are treated as streams; anything else is a local
/// announcement file.
#[derive(Default)]
pub struct FakeFactory {
    shared: Arc<FakeShared>,
}

impl FakeFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn update(&self, f: impl FnOnce(&mut FakeSettings)) {
        f(&mut self.shared.settings.lock());
    }

    /// `create` fails for every instance.
    pub fn set_fail_create(&self, fail: bool) {
        self.update(|s| s.fail_create = fail);
    }

    /// `play` fails for stream URLs.
    pub fn set_fail_streams(&self, fail: bool) {
        self.update(|s| s.fail_streams = fail);
    }

    /// Streams report a playback position once played.
    pub fn set_streams_flow(&self, flow: bool) {
        self.update(|s| s.streams_flow = flow);
    }

    /// Announcements fire end-of-file when done.
    pub fn set_announcements_finish(&self, finish: bool) {
        self.update(|s| s.announcements_finish = finish);
    }

    pub fn set_announcement_duration(&self, duration: Duration) {
        self.update(|s| s.announcement_duration = duration);
    }

    /// Prefetch playlists advance to the stream after the announcement.
    pub fn set_handoff_transitions(&self, transitions: bool) {
        self.update(|s| s.handoff_transitions = transitions);
    }

    /// The prefetched stream reports an error before the transition.
    pub fn set_handoff_stream_error(&self, error: bool) {
        self.update(|s| s.handoff_stream_error = error);
    }

    pub fn created_count(&self) -> usize {
        self.shared.created.load(Ordering::SeqCst)
    }

    pub fn live_count(&self) -> usize {
        self.shared.live.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously live instances seen so far.
    pub fn max_live(&self) -> usize {
        self.shared.max_live.load(Ordering::SeqCst)
    }

    /// Number of `play` calls with a stream URL.
    pub fn stream_play_count(&self) -> usize {
        self.shared
            .plays
            .lock()
            .iter()
            .filter(|target| target.contains("://"))
            .count()
    }

    /// Number of `play` calls for `file`.
    pub fn plays_of(&self, file: &Path) -> usize {
        let target = file.to_string_lossy();
        self.shared
            .plays
            .lock()
            .iter()
            .filter(|played| **played == target)
            .count()
    }

    pub fn appended(&self) -> Vec<String> {
        self.shared.appended.lock().clone()
    }

    /// Most recently created plain streaming instance.
    pub fn last_stream(&self) -> Option<Arc<FakeBackend>> {
        self.shared
            .instances
            .lock()
            .iter()
            .rev()
            .find(|b| b.options.buffer.is_some() && !b.options.prefetch)
            .cloned()
    }
}

impl BackendFactory for FakeFactory {
    fn create(&self, options: &BackendOptions) -> PlayerResult<Arc<dyn PlayerBackend>> {
        if self.shared.settings.lock().fail_create {
            return Err(PlayerError::Spawn("scripted failure".into()));
        }

        let backend = Arc::new(FakeBackend {
            id: next_instance_id(),
            options: options.clone(),
            shared: Arc::clone(&self.shared),
            position: Arc::new(Mutex::new(None)),
            end_file: Mutex::new(None),
            playlist_position: Mutex::new(None),
            terminated: Arc::new(AtomicBool::new(false)),
        });

        self.shared.created.fetch_add(1, Ordering::SeqCst);
        let live = self.shared.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.max_live.fetch_max(live, Ordering::SeqCst);
        self.shared.instances.lock().push(Arc::clone(&backend));
        Ok(backend)
    }
}

pub struct FakeBackend {
    id: u64,
    options: BackendOptions,
    shared: Arc<FakeShared>,
    position: Arc<Mutex<Option<f64>>>,
    end_file: Mutex<Option<EndFileHandler>>,
    playlist_position: Mutex<Option<PlaylistPositionHandler>>,
    terminated: Arc<AtomicBool>,
}

impl FakeBackend {
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    pub fn set_position(&self, position: Option<f64>) {
        *self.position.lock() = position;
    }

    /// Invokes the registered end-of-item handler.
    pub fn fire_end_file(&self, reason: EndFileReason) {
        let handler = self.end_file.lock().clone();
        if let Some(handler) = handler {
            handler(reason);
        }
    }
}

impl PlayerBackend for FakeBackend {
    fn id(&self) -> u64 {
        self.id
    }

    fn play(&self, target: &str) -> PlayerResult<()> {
        if self.is_terminated() {
            return Err(PlayerError::Terminated);
        }
        self.shared.plays.lock().push(target.to_string());
        let settings = self.shared.settings.lock().clone();

        if target.contains("://") {
            if settings.fail_streams {
                return Err(PlayerError::Command {
                    command: "loadfile".into(),
                    reason: "scripted failure".into(),
                });
            }
            if settings.streams_flow {
                self.set_position(Some(0.1));
            }
            return Ok(());
        }

        if self.options.prefetch || !settings.announcements_finish {
            return Ok(());
        }
        let handler = self.end_file.lock().clone();
        let terminated = Arc::clone(&self.terminated);
        thread::spawn(move || {
            thread::sleep(settings.announcement_duration);
            if let Some(handler) = handler {
                if !terminated.load(Ordering::SeqCst) {
                    handler(EndFileReason::Eof);
                }
            }
        });
        Ok(())
    }

    fn playlist_append(&self, target: &str) -> PlayerResult<()> {
        if self.is_terminated() {
            return Err(PlayerError::Terminated);
        }
        self.shared.appended.lock().push(target.to_string());
        let settings = self.shared.settings.lock().clone();
        if !self.options.prefetch || !settings.handoff_transitions {
            return Ok(());
        }

        let end_file = self.end_file.lock().clone();
        let playlist_position = self.playlist_position.lock().clone();
        let position = Arc::clone(&self.position);
        let terminated = Arc::clone(&self.terminated);
        thread::spawn(move || {
            thread::sleep(settings.announcement_duration);
            if terminated.load(Ordering::SeqCst) {
                return;
            }
            if let Some(end_file) = &end_file {
                end_file(EndFileReason::Eof);
                if settings.handoff_stream_error {
                    end_file(EndFileReason::Error);
                }
            }
            if settings.streams_flow && !settings.handoff_stream_error {
                *position.lock() = Some(0.5);
            }
            if let Some(playlist_position) = playlist_position {
                playlist_position(Some(1));
            }
        });
        Ok(())
    }

    fn playback_position(&self) -> Option<f64> {
        if self.is_terminated() {
            None
        } else {
            *self.position.lock()
        }
    }

    fn on_end_of_item(&self, handler: EndFileHandler) {
        *self.end_file.lock() = Some(handler);
    }

    fn on_playlist_position_changed(&self, handler: PlaylistPositionHandler) -> PlayerResult<()> {
        *self.playlist_position.lock() = Some(handler);
        Ok(())
    }

    fn terminate(&self) {
        if !self.terminated.swap(true, Ordering::SeqCst) {
            self.shared.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Reachability probe with a fixed answer.
pub struct StaticProbe {
    reachable: AtomicBool,
}

impl StaticProbe {
    pub fn new(reachable: bool) -> Self {
        Self {
            reachable: AtomicBool::new(reachable),
        }
    }

    pub fn set(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }
}

impl ReachabilityProbe for StaticProbe {
    fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Recording Audio Player
// ─────────────────────────────────────────────────────────────────────────────

/// A call received by [`RecordingAudioPlayer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioCall {
    Announcement(PathBuf),
    Stream(String),
    Handoff(PathBuf, String),
    Stop,
    Shutdown,
}

/// Audio player that records calls.
///
/// Stream and handoff calls can be made to block until `stop()` so tests can
/// observe cancellation of an in-flight task.
pub struct RecordingAudioPlayer {
    calls: Mutex<Vec<AudioCall>>,
    stream_result: AtomicBool,
    block_streams: AtomicBool,
    playing: AtomicBool,
    stopped: Signal,
}

impl Default for RecordingAudioPlayer {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            stream_result: AtomicBool::new(true),
            block_streams: AtomicBool::new(false),
            playing: AtomicBool::new(false),
            stopped: Signal::new(),
        }
    }
}

impl RecordingAudioPlayer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<AudioCall> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Result returned by stream and handoff calls.
    pub fn set_stream_result(&self, ok: bool) {
        self.stream_result.store(ok, Ordering::SeqCst);
    }

    /// Stream and handoff calls block until `stop()` and then fail.
    pub fn set_block_streams(&self, block: bool) {
        self.block_streams.store(block, Ordering::SeqCst);
    }

    /// Number of stream or handoff calls so far.
    pub fn playback_calls(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, AudioCall::Stream(_) | AudioCall::Handoff(..)))
            .count()
    }

    fn begin_stream(&self, call: AudioCall) {
        if self.block_streams.load(Ordering::SeqCst) {
            self.stopped.clear();
        }
        self.calls.lock().push(call);
    }

    fn finish_stream(&self) -> bool {
        if self.block_streams.load(Ordering::SeqCst) {
            self.stopped.wait_timeout(Duration::from_secs(5));
            return false;
        }
        let ok = self.stream_result.load(Ordering::SeqCst);
        self.playing.store(ok, Ordering::SeqCst);
        ok
    }
}

impl AudioPlayer for RecordingAudioPlayer {
    fn play_announcement(&self, file: &Path) -> bool {
        self.calls
            .lock()
            .push(AudioCall::Announcement(file.to_path_buf()));
        true
    }

    fn play_stream(&self, url: &str, _announce_retry: bool) -> bool {
        self.begin_stream(AudioCall::Stream(url.to_string()));
        self.finish_stream()
    }

    fn play_announcement_with_preload(&self, announcement: &Path, url: &str) -> bool {
        self.begin_stream(AudioCall::Handoff(
            announcement.to_path_buf(),
            url.to_string(),
        ));
        self.finish_stream()
    }

    fn stop(&self) {
        self.calls.lock().push(AudioCall::Stop);
        self.playing.store(false, Ordering::SeqCst);
        self.stopped.set();
    }

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    fn shutdown(&self) {
        self.calls.lock().push(AudioCall::Shutdown);
        self.playing.store(false, Ordering::SeqCst);
        self.stopped.set();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Network & TTS Fakes
// ─────────────────────────────────────────────────────────────────────────────

/// Network collaborator with canned answers.
pub struct FakeNetwork {
    pub connected: AtomicBool,
    pub active: Mutex<Option<ActiveWifi>>,
    pub saved: Mutex<Vec<SavedWifi>>,
    pub connect_calls: Mutex<Vec<String>>,
    pub connect_fails: AtomicBool,
}

impl FakeNetwork {
    pub fn new(connected: bool) -> Arc<Self> {
        Arc::new(Self {
            connected: AtomicBool::new(connected),
            active: Mutex::new(None),
            saved: Mutex::new(Vec::new()),
            connect_calls: Mutex::new(Vec::new()),
            connect_fails: AtomicBool::new(false),
        })
    }

    pub fn with_saved(self: Arc<Self>, names: &[&str]) -> Arc<Self> {
        *self.saved.lock() = names
            .iter()
            .map(|name| SavedWifi {
                name: (*name).to_string(),
                ssid: (*name).to_string(),
                security: "wpa-psk".to_string(),
                active: false,
            })
            .collect();
        self
    }
}

impl ConnectivityChecker for FakeNetwork {
    fn check_connectivity(&self) -> ConnectivityStatus {
        let connected = self.connected.load(Ordering::SeqCst);
        ConnectivityStatus {
            is_connected: connected,
            detail: if connected { "full" } else { "none" }.to_string(),
        }
    }
}

impl WifiManager for FakeNetwork {
    fn active_wifi(&self) -> NetworkResult<Option<ActiveWifi>> {
        Ok(self.active.lock().clone())
    }

    fn saved_wifi(&self) -> NetworkResult<Vec<SavedWifi>> {
        Ok(self.saved.lock().clone())
    }

    fn connect_saved(&self, name: &str) -> NetworkResult<()> {
        self.connect_calls.lock().push(name.to_string());
        if self.connect_fails.load(Ordering::SeqCst) {
            Err(NetworkError::Failed("scripted failure".into()))
        } else {
            Ok(())
        }
    }
}

/// TTS speaker that records what it was asked to say.
#[derive(Default)]
pub struct RecordingTts {
    pub spoken: Mutex<Vec<String>>,
}

impl RecordingTts {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().clone()
    }
}

impl TtsSpeaker for RecordingTts {
    fn speak(&self, text: &str) -> TtsResult<()> {
        let text = text.trim();
        if text.is_empty() {
            return Err(TtsError::EmptyText);
        }
        self.spoken.lock().push(text.to_string());
        Ok(())
    }
}
