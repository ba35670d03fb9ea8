//! Radio controller: the device state machine.
//!
//! Hardware events arrive on the GPIO thread and must return at once. The
//! controller updates [`RadioState`] synchronously and hands every
//! audio-affecting action to the [`Dispatcher`], which runs one task at a
//! time on a worker thread and cancels the previous one first.

pub mod debug;
pub mod dispatcher;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

pub use debug::{build_readout, SelectionWindow};
pub use dispatcher::{CancelToken, Dispatcher};

use crate::audio::AudioPlayer;
use crate::network::{ConnectivityChecker, SavedWifi, WifiManager};
use crate::protocol_constants::{SHUTDOWN_JOIN_TIMEOUT_MS, WORKER_JOIN_TIMEOUT_MS};
use crate::state::{AppConfig, Channel, RadioState, SwitchPosition};
use crate::sync::Signal;
use crate::tts::TtsSpeaker;

/// External collaborators of the controller.
#[derive(Clone)]
pub struct Collaborators {
    pub audio: Arc<dyn AudioPlayer>,
    pub connectivity: Arc<dyn ConnectivityChecker>,
    pub wifi: Arc<dyn WifiManager>,
    pub tts: Arc<dyn TtsSpeaker>,
}

/// What a long press on a channel button means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LongPressAction {
    Shutdown,
    Debug,
}

/// Cheaply cloneable handle to the controller.
#[derive(Clone)]
pub struct RadioController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    config: AppConfig,
    audio: Arc<dyn AudioPlayer>,
    connectivity: Arc<dyn ConnectivityChecker>,
    wifi: Arc<dyn WifiManager>,
    tts: Arc<dyn TtsSpeaker>,
    state: Mutex<RadioState>,
    dispatcher: Dispatcher,
    selection: Mutex<Option<Arc<SelectionWindow>>>,
    debug_running: AtomicBool,
    shutdown_join_timeout: Duration,
}

impl RadioController {
    pub fn new(config: AppConfig, collaborators: Collaborators) -> Self {
        Self::with_timeouts(
            config,
            collaborators,
            Duration::from_millis(WORKER_JOIN_TIMEOUT_MS),
            Duration::from_millis(SHUTDOWN_JOIN_TIMEOUT_MS),
        )
    }

    pub fn with_timeouts(
        config: AppConfig,
        collaborators: Collaborators,
        worker_join_timeout: Duration,
        shutdown_join_timeout: Duration,
    ) -> Self {
        let state = RadioState::initial(config.default_channel_index);
        Self {
            inner: Arc::new(ControllerInner {
                dispatcher: Dispatcher::new(Arc::clone(&collaborators.audio), worker_join_timeout),
                config,
                audio: collaborators.audio,
                connectivity: collaborators.connectivity,
                wifi: collaborators.wifi,
                tts: collaborators.tts,
                state: Mutex::new(state),
                selection: Mutex::new(None),
                debug_running: AtomicBool::new(false),
                shutdown_join_timeout,
            }),
        }
    }

    /// Current state snapshot.
    #[must_use]
    pub fn state(&self) -> RadioState {
        *self.inner.state.lock()
    }

    /// Announces boot connectivity and starts playback if the switch is ON.
    pub fn startup(&self, initial_switch: SwitchPosition) {
        let state = self.inner.update(|s| s.with_switch(initial_switch));
        log::info!(
            "[Controller] Startup with switch {}, channel {}",
            initial_switch,
            state.selected_channel_index + 1
        );

        self.inner.announce_boot_connectivity();

        match state.switch_position {
            SwitchPosition::On => self.dispatch_channel(state.selected_channel_index),
            SwitchPosition::Off => {
                self.inner
                    .play_announcement(&self.inner.config.announcements.selector_off);
            }
        }
    }

    /// Channel button pressed.
    pub fn handle_channel_button(&self, index: usize) {
        if let Some(window) = self.inner.selection.lock().as_ref() {
            log::info!("[Controller] Button {} selects saved network", index + 1);
            window.choose(index);
            return;
        }

        {
            let mut state = self.inner.state.lock();
            if state.switch_position == SwitchPosition::Off {
                log::debug!("[Controller] Ignoring channel button: switch is OFF");
                return;
            }
            if state.selected_channel_index == index && state.is_stream_active {
                log::debug!("[Controller] Ignoring channel button: already playing");
                return;
            }
            if self.inner.config.channel(index).is_none() {
                log::warn!("[Controller] Invalid channel index: {}", index);
                return;
            }
            *state = state.with_channel(index).with_stream_active(false);
        }

        log::info!("[Controller] Channel {} selected", index + 1);
        self.dispatch_channel(index);
    }

    /// Selector switch moved.
    pub fn handle_switch_change(&self, position: SwitchPosition) {
        let (previous, state) = {
            let mut state = self.inner.state.lock();
            let previous = state.switch_position;
            *state = state.with_switch(position);
            (previous, *state)
        };
        if previous == position {
            return;
        }

        match position {
            SwitchPosition::On => {
                log::info!("[Controller] Switch ON, starting playback");
                self.dispatch_channel(state.selected_channel_index);
            }
            SwitchPosition::Off => {
                log::info!("[Controller] Switch OFF, stopping playback");
                let inner = Arc::clone(&self.inner);
                self.inner
                    .dispatcher
                    .dispatch("switch-off", move |token| inner.switch_off_task(token));
            }
        }
    }

    /// Maps a long press on channel button `index` to its action.
    #[must_use]
    pub fn long_press_action(&self, index: usize) -> Option<LongPressAction> {
        let gpio = &self.inner.config.gpio;
        if index == gpio.shutdown_button {
            Some(LongPressAction::Shutdown)
        } else if gpio.debug_button == Some(index) {
            Some(LongPressAction::Debug)
        } else {
            None
        }
    }

    /// Stops everything and plays the shutdown announcement. Blocks until
    /// the announcement has finished.
    pub fn request_shutdown(&self) {
        log::info!("[Controller] Shutdown requested");
        self.inner.dispatcher.cancel();
        self.inner.update(|s| s.with_stream_active(false));
        self.inner
            .play_announcement(&self.inner.config.announcements.shutdown);
    }

    /// Speaks the diagnostic readout, optionally offers network selection
    /// and resumes playback afterwards.
    pub fn request_debug(&self) {
        if !self.inner.config.debug.enabled {
            log::debug!("[Controller] Debug readout disabled");
            return;
        }
        if self.inner.debug_running.swap(true, Ordering::SeqCst) {
            log::debug!("[Controller] Debug readout already running");
            return;
        }

        let was_active = self.state().is_stream_active;
        let inner = Arc::clone(&self.inner);
        if self.inner.config.debug.interrupt_audio {
            log::info!("[Controller] Debug readout (interrupting audio)");
            self.inner.dispatcher.dispatch("debug", move |token| {
                inner.update(|s| s.with_stream_active(false));
                inner.debug_task(token);
                if was_active && !token.is_set() {
                    let state = *inner.state.lock();
                    if state.switch_position == SwitchPosition::On {
                        log::info!("[Controller] Resuming playback after debug readout");
                        inner.play_channel_task(state.selected_channel_index, token);
                    }
                }
                inner.debug_running.store(false, Ordering::SeqCst);
            });
        } else {
            log::info!("[Controller] Debug readout");
            let spawned = thread::Builder::new()
                .name("radio-debug".into())
                .spawn(move || {
                    inner.debug_task(&Arc::new(Signal::new()));
                    inner.debug_running.store(false, Ordering::SeqCst);
                });
            if let Err(e) = spawned {
                log::error!("[Controller] Failed to start debug readout: {}", e);
                self.inner.debug_running.store(false, Ordering::SeqCst);
            }
        }
    }

    /// Cancels work, waits for the worker and releases the audio engine.
    pub fn shutdown(&self) {
        log::info!("[Controller] Shutting down");
        if let Some(window) = self.inner.selection.lock().take() {
            window.choose(usize::MAX);
        }
        self.inner
            .dispatcher
            .shutdown(self.inner.shutdown_join_timeout);
        self.inner.audio.shutdown();
    }

    fn dispatch_channel(&self, index: usize) {
        let inner = Arc::clone(&self.inner);
        self.inner
            .dispatcher
            .dispatch("play-channel", move |token| inner.play_channel_task(index, token));
    }
}

impl ControllerInner {
    /// Applies `f` to the state under the lock and returns the new state.
    fn update(&self, f: impl FnOnce(RadioState) -> RadioState) -> RadioState {
        let mut state = self.state.lock();
        *state = f(*state);
        *state
    }

    fn play_announcement(&self, file: &Path) {
        if !self.audio.play_announcement(file) {
            log::warn!("[Controller] Announcement {} did not play", file.display());
        }
    }

    fn announce_boot_connectivity(&self) {
        let status = self.connectivity.check_connectivity();
        log::info!(
            "[Controller] Boot connectivity: {} ({})",
            if status.is_connected { "online" } else { "offline" },
            status.detail
        );
        let announcements = &self.config.announcements;
        let file = if status.is_connected {
            &announcements.boot_connected
        } else {
            &announcements.boot_no_internet
        };
        self.play_announcement(file);
    }

    fn play_channel_task(&self, index: usize, token: &CancelToken) {
        let Some(channel) = self.config.channel(index) else {
            log::warn!("[Controller] Invalid channel index: {}", index);
            return;
        };
        log::info!("[Controller] Announcing channel: {}", channel.name);

        let ok = self
            .audio
            .play_announcement_with_preload(&channel.announcement_file, &channel.stream_url);

        if token.is_set() {
            log::info!("[Controller] Playback of {} superseded", channel.name);
            return;
        }

        if ok {
            self.mark_playing(channel);
        } else {
            log::error!("[Controller] Failed to start stream for {}", channel.name);
            self.update(|s| s.with_stream_active(false));
            self.play_announcement(&self.config.announcements.failed);
        }
    }

    fn mark_playing(&self, channel: &Channel) {
        let mut state = self.state.lock();
        if state.selected_channel_index == channel.index
            && state.switch_position == SwitchPosition::On
        {
            *state = state.with_stream_active(true);
            log::info!("[Controller] Playing {}", channel.name);
        }
    }

    fn switch_off_task(&self, _token: &CancelToken) {
        self.audio.stop();
        self.update(|s| s.with_stream_active(false));
        self.play_announcement(&self.config.announcements.goodbye);
    }

    fn debug_task(&self, token: &CancelToken) {
        let status = self.connectivity.check_connectivity();
        let active = self.wifi.active_wifi().unwrap_or_else(|e| {
            log::warn!("[Controller] Cannot read active Wi-Fi: {}", e);
            None
        });
        let saved = self.wifi.saved_wifi().unwrap_or_else(|e| {
            log::warn!("[Controller] Cannot list saved Wi-Fi: {}", e);
            Vec::new()
        });

        let selectable = if self.config.debug.offer_network_selection {
            saved.len().min(self.config.gpio.channel_pins.len())
        } else {
            0
        };
        let lines = build_readout(&status, active.as_ref(), &saved, selectable);
        if let Err(e) = self.tts.speak_lines(&lines) {
            log::warn!("[Controller] Debug readout failed: {}", e);
        }

        if selectable == 0 || token.is_set() {
            return;
        }
        if let Some(network) = self.await_network_choice(&saved[..selectable], token) {
            self.connect_saved(&network);
        }
    }

    fn await_network_choice(&self, offered: &[SavedWifi], token: &CancelToken) -> Option<SavedWifi> {
        let window = Arc::new(SelectionWindow::default());
        *self.selection.lock() = Some(Arc::clone(&window));
        let choice = window.wait(self.config.debug.selection_timeout(), token);
        *self.selection.lock() = None;

        match choice.and_then(|index| offered.get(index)) {
            Some(network) => Some(network.clone()),
            None => {
                log::info!("[Controller] No network selected");
                None
            }
        }
    }

    fn connect_saved(&self, network: &SavedWifi) {
        log::info!("[Controller] Connecting to saved network {}", network.name);
        let line = match self.wifi.connect_saved(&network.name) {
            Ok(()) => format!("Verbunden mit {}.", network.ssid),
            Err(e) => {
                log::warn!("[Controller] Connecting to {} failed: {}", network.name, e);
                format!("Verbindung mit {} fehlgeschlagen.", network.ssid)
            }
        };
        if let Err(e) = self.tts.speak(&line) {
            log::warn!("[Controller] Cannot speak connection result: {}", e);
        }
    }
}
