//! Core domain and configuration types.
//!
//! This module provides the immutable values the rest of the crate passes
//! around:
//! - [`Channel`] and [`RadioState`], the controller's domain model
//! - per-concern configuration sections ([`AudioConfig`], [`RetryConfig`],
//!   [`WatchdogConfig`], ...) with serde defaults and `validate()`
//! - [`AppConfig`], the fully resolved configuration built once at startup
//!
//! Configuration sections deserialize directly from the YAML file; every
//! field has a default so a minimal file only lists channels.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ─────────────────────────────────────────────────────────────────────────────
// Domain Model
// ─────────────────────────────────────────────────────────────────────────────

/// Selector switch position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchPosition {
    Off,
    On,
}

impl SwitchPosition {
    /// Maps a raw pin level to a position, honoring inversion.
    #[must_use]
    pub fn from_level(high: bool, inverted: bool) -> Self {
        if high != inverted {
            Self::On
        } else {
            Self::Off
        }
    }
}

impl std::fmt::Display for SwitchPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Off => f.write_str("OFF"),
            Self::On => f.write_str("ON"),
        }
    }
}

/// A preconfigured radio channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    /// 0-based position, stable for the process lifetime.
    pub index: usize,
    /// Display name (used in logs and the debug readout).
    pub name: String,
    /// Internet stream URL.
    pub stream_url: String,
    /// Spoken channel announcement played before the stream.
    pub announcement_file: PathBuf,
}

/// Snapshot of the radio's state.
///
/// Values are replaced, never mutated. `is_stream_active` can only be `true`
/// while the switch is [`SwitchPosition::On`]; the `with_*` constructors
/// enforce that.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RadioState {
    pub selected_channel_index: usize,
    pub switch_position: SwitchPosition,
    pub is_stream_active: bool,
}

impl RadioState {
    /// Initial state: switch OFF, given channel selected, nothing playing.
    #[must_use]
    pub fn initial(default_channel_index: usize) -> Self {
        Self {
            selected_channel_index: default_channel_index,
            switch_position: SwitchPosition::Off,
            is_stream_active: false,
        }
    }

    #[must_use]
    pub fn with_channel(self, index: usize) -> Self {
        Self {
            selected_channel_index: index,
            ..self
        }
    }

    /// Turning the switch OFF also clears the stream-active flag.
    #[must_use]
    pub fn with_switch(self, position: SwitchPosition) -> Self {
        Self {
            switch_position: position,
            is_stream_active: self.is_stream_active && position == SwitchPosition::On,
            ..self
        }
    }

    /// A stream can only be marked active while the switch is ON.
    #[must_use]
    pub fn with_stream_active(self, active: bool) -> Self {
        Self {
            is_stream_active: active && self.switch_position == SwitchPosition::On,
            ..self
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Audio
// ─────────────────────────────────────────────────────────────────────────────

/// Network buffering parameters applied to streaming player instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamBufferConfig {
    pub enabled: bool,
    pub cache_seconds: f64,
    /// mpv size string, e.g. `32MiB`.
    pub demuxer_max_bytes: String,
    pub network_timeout_seconds: f64,
}

impl Default for StreamBufferConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_seconds: 8.0,
            demuxer_max_bytes: "32MiB".to_string(),
            network_timeout_seconds: 10.0,
        }
    }
}

impl StreamBufferConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_seconds <= 0.0 {
            return Err(ConfigError::new("audio.buffer.cache_seconds", "must be > 0"));
        }
        if self.network_timeout_seconds <= 0.0 {
            return Err(ConfigError::new(
                "audio.buffer.network_timeout_seconds",
                "must be > 0",
            ));
        }
        if !is_valid_byte_size(&self.demuxer_max_bytes) {
            return Err(ConfigError::new(
                "audio.buffer.demuxer_max_bytes",
                format!(
                    "'{}' is not a size like 32MiB or 1048576",
                    self.demuxer_max_bytes
                ),
            ));
        }
        Ok(())
    }
}

/// Accepts plain digits or digits followed by `KiB`, `MiB` or `GiB`.
fn is_valid_byte_size(value: &str) -> bool {
    let digits_end = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    if digits_end == 0 {
        return false;
    }
    matches!(&value[digits_end..], "" | "KiB" | "MiB" | "GiB")
}

/// Audio output configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Audio output driver passed to the backend (`alsa`, `pipewire`, ...).
    pub backend: String,
    /// Output device; `default` lets the driver choose.
    pub device: String,
    /// Output volume, 0-100.
    pub volume: u8,
    /// Path to the mpv executable.
    pub mpv_path: String,
    pub buffer: StreamBufferConfig,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            backend: "alsa".to_string(),
            device: "default".to_string(),
            volume: 80,
            mpv_path: "mpv".to_string(),
            buffer: StreamBufferConfig::default(),
        }
    }
}

impl AudioConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.volume > 100 {
            return Err(ConfigError::new("audio.volume", "must be between 0 and 100"));
        }
        if self.backend.trim().is_empty() {
            return Err(ConfigError::new("audio.backend", "must not be empty"));
        }
        if self.mpv_path.trim().is_empty() {
            return Err(ConfigError::new("audio.mpv_path", "must not be empty"));
        }
        self.buffer.validate()
    }

    /// Explicit audio device for the backend, or `None` for the default.
    #[must_use]
    pub fn audio_device(&self) -> Option<String> {
        (self.device != "default").then(|| format!("{}/{}", self.backend, self.device))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// GPIO
// ─────────────────────────────────────────────────────────────────────────────

/// GPIO pin configuration (BCM numbering).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpioConfig {
    /// One pin per channel button, in channel order.
    pub channel_pins: Vec<u32>,
    pub switch_pin: u32,
    pub debounce_ms: u64,
    /// Treat a LOW switch level as ON.
    pub invert_switch: bool,
    /// Hold time that turns a button press into a long press.
    pub long_press_seconds: f64,
    /// Channel button whose long press requests shutdown.
    pub shutdown_button: usize,
    /// Channel button whose long press requests the debug readout.
    pub debug_button: Option<usize>,
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            channel_pins: vec![17, 22, 23, 24, 25],
            switch_pin: 27,
            debounce_ms: 200,
            invert_switch: false,
            long_press_seconds: 3.0,
            shutdown_button: 0,
            debug_button: None,
        }
    }
}

impl GpioConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel_pins.is_empty() {
            return Err(ConfigError::new("gpio.channel_pins", "must not be empty"));
        }
        if self.channel_pins.contains(&self.switch_pin) {
            return Err(ConfigError::new(
                "gpio.switch_pin",
                "must not also be a channel pin",
            ));
        }
        if self.long_press_seconds <= 0.0 {
            return Err(ConfigError::new("gpio.long_press_seconds", "must be > 0"));
        }
        if self.shutdown_button >= self.channel_pins.len() {
            return Err(ConfigError::new(
                "gpio.shutdown_button",
                "must index a channel pin",
            ));
        }
        if let Some(debug) = self.debug_button {
            if debug >= self.channel_pins.len() {
                return Err(ConfigError::new("gpio.debug_button", "must index a channel pin"));
            }
            if debug == self.shutdown_button {
                return Err(ConfigError::new(
                    "gpio.debug_button",
                    "must differ from gpio.shutdown_button",
                ));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    #[must_use]
    pub fn long_press(&self) -> Duration {
        Duration::from_secs_f64(self.long_press_seconds)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Retry & Watchdog
// ─────────────────────────────────────────────────────────────────────────────

/// Stream retry configuration for one connection cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub delay_seconds: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_seconds: 5.0,
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts < 1 {
            return Err(ConfigError::new("retry.max_attempts", "must be >= 1"));
        }
        if self.delay_seconds < 0.5 {
            return Err(ConfigError::new("retry.delay_seconds", "must be >= 0.5"));
        }
        Ok(())
    }

    #[must_use]
    pub fn delay(&self) -> Duration {
        Duration::from_secs_f64(self.delay_seconds)
    }
}

/// Stream watchdog configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub enabled: bool,
    pub check_interval_seconds: f64,
    /// Seconds without playback-position progress that count as a stall.
    pub stall_seconds: f64,
    /// Base reconnect backoff.
    pub reconnect_delay_seconds: f64,
    pub internet_check_enabled: bool,
    pub internet_check_hosts: Vec<String>,
    pub internet_check_port: u16,
    pub internet_check_timeout_seconds: f64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_seconds: 2.0,
            stall_seconds: 8.0,
            reconnect_delay_seconds: 2.0,
            internet_check_enabled: true,
            internet_check_hosts: vec![
                "1.1.1.1".to_string(),
                "8.8.8.8".to_string(),
                "9.9.9.9".to_string(),
            ],
            internet_check_port: 53,
            internet_check_timeout_seconds: 1.5,
        }
    }
}

impl WatchdogConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.check_interval_seconds <= 0.0 {
            return Err(ConfigError::new(
                "watchdog.check_interval_seconds",
                "must be > 0",
            ));
        }
        if self.stall_seconds <= 0.0 {
            return Err(ConfigError::new("watchdog.stall_seconds", "must be > 0"));
        }
        if self.reconnect_delay_seconds <= 0.0 {
            return Err(ConfigError::new(
                "watchdog.reconnect_delay_seconds",
                "must be > 0",
            ));
        }
        if self.internet_check_hosts.is_empty()
            || self.internet_check_hosts.iter().any(|h| h.trim().is_empty())
        {
            return Err(ConfigError::new(
                "watchdog.internet_check_hosts",
                "must be a non-empty list of host names",
            ));
        }
        if self.internet_check_port == 0 {
            return Err(ConfigError::new(
                "watchdog.internet_check_port",
                "must be between 1 and 65535",
            ));
        }
        if self.internet_check_timeout_seconds < 0.0 {
            return Err(ConfigError::new(
                "watchdog.internet_check_timeout_seconds",
                "must not be negative",
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs_f64(self.check_interval_seconds)
    }

    #[must_use]
    pub fn stall_threshold(&self) -> Duration {
        Duration::from_secs_f64(self.stall_seconds)
    }

    #[must_use]
    pub fn internet_check_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.internet_check_timeout_seconds)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Collaborators (nmcli, TTS, debug readout)
// ─────────────────────────────────────────────────────────────────────────────

/// NetworkManager CLI configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WifiConfig {
    pub nmcli_path: String,
    pub command_timeout_seconds: f64,
    pub connect_timeout_seconds: f64,
}

impl Default for WifiConfig {
    fn default() -> Self {
        Self {
            nmcli_path: "nmcli".to_string(),
            command_timeout_seconds: 5.0,
            connect_timeout_seconds: 20.0,
        }
    }
}

impl WifiConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nmcli_path.trim().is_empty() {
            return Err(ConfigError::new("wifi.nmcli_path", "must not be empty"));
        }
        if self.command_timeout_seconds < 0.0 {
            return Err(ConfigError::new(
                "wifi.command_timeout_seconds",
                "must not be negative",
            ));
        }
        if self.connect_timeout_seconds < 0.0 {
            return Err(ConfigError::new(
                "wifi.connect_timeout_seconds",
                "must not be negative",
            ));
        }
        Ok(())
    }
}

/// Speech engine used for the synthesized debug readout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TtsEngine {
    #[serde(rename = "espeak-ng")]
    EspeakNg,
    #[serde(rename = "pico2wave")]
    Pico2Wave,
}

impl TtsEngine {
    #[must_use]
    pub fn program(&self) -> &'static str {
        match self {
            Self::EspeakNg => "espeak-ng",
            Self::Pico2Wave => "pico2wave",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    pub enabled: bool,
    pub engine: TtsEngine,
    pub voice: Option<String>,
    /// Words per minute (espeak-ng only).
    pub rate: u32,
    /// Amplitude 0-200 (espeak-ng only).
    pub volume: u32,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            engine: TtsEngine::EspeakNg,
            voice: None,
            rate: 140,
            volume: 150,
        }
    }
}

impl TtsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.volume > 200 {
            return Err(ConfigError::new("tts.volume", "must be between 0 and 200"));
        }
        if self.rate == 0 {
            return Err(ConfigError::new("tts.rate", "must be > 0"));
        }
        Ok(())
    }
}

/// Spoken diagnostics triggered by a long press.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub enabled: bool,
    /// Stop the running stream while the readout is spoken.
    pub interrupt_audio: bool,
    /// Offer "press channel N to connect to saved network N" afterwards.
    pub offer_network_selection: bool,
    pub selection_timeout_seconds: f64,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interrupt_audio: true,
            offer_network_selection: true,
            selection_timeout_seconds: 10.0,
        }
    }
}

impl DebugConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.selection_timeout_seconds < 0.0 {
            return Err(ConfigError::new(
                "debug.selection_timeout_seconds",
                "must not be negative",
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn selection_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.selection_timeout_seconds)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Resolved Application Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Informational and error announcements, resolved to absolute paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnouncementFiles {
    pub retrying: PathBuf,
    pub failed: PathBuf,
    pub no_internet: PathBuf,
    pub boot_connected: PathBuf,
    pub boot_no_internet: PathBuf,
    pub startup_branding: PathBuf,
    pub goodbye: PathBuf,
    pub selector_off: PathBuf,
    pub shutdown: PathBuf,
}

impl AnnouncementFiles {
    /// Every announcement with a short label, for startup checks.
    #[must_use]
    pub fn labeled(&self) -> Vec<(&'static str, &PathBuf)> {
        vec![
            ("retrying", &self.retrying),
            ("failed", &self.failed),
            ("no_internet", &self.no_internet),
            ("boot_connected", &self.boot_connected),
            ("boot_no_internet", &self.boot_no_internet),
            ("startup_branding", &self.startup_branding),
            ("goodbye", &self.goodbye),
            ("selector_off", &self.selector_off),
            ("shutdown", &self.shutdown),
        ]
    }
}

/// Complete configuration, loaded once at startup and immutable thereafter.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub gpio: GpioConfig,
    pub retry: RetryConfig,
    pub watchdog: WatchdogConfig,
    pub wifi: WifiConfig,
    pub tts: TtsConfig,
    pub debug: DebugConfig,
    pub channels: Vec<Channel>,
    pub default_channel_index: usize,
    pub audio_dir: PathBuf,
    pub announcements: AnnouncementFiles,
}

/// Maximum number of channels (one per physical button).
pub const MAX_CHANNELS: usize = 5;

impl AppConfig {
    /// Validates every section and the cross-section invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.audio.validate()?;
        self.gpio.validate()?;
        self.retry.validate()?;
        self.watchdog.validate()?;
        self.wifi.validate()?;
        self.tts.validate()?;
        self.debug.validate()?;

        if self.channels.is_empty() {
            return Err(ConfigError::new(
                "channels",
                "at least one channel must be configured",
            ));
        }
        if self.channels.len() > MAX_CHANNELS {
            return Err(ConfigError::new(
                "channels",
                format!("at most {MAX_CHANNELS} channels are supported"),
            ));
        }
        if self.channels.len() > self.gpio.channel_pins.len() {
            return Err(ConfigError::new(
                "gpio.channel_pins",
                format!(
                    "{} channels configured but only {} button pins",
                    self.channels.len(),
                    self.gpio.channel_pins.len()
                ),
            ));
        }
        for channel in &self.channels {
            if channel.stream_url.trim().is_empty() {
                return Err(ConfigError::new(
                    format!("channels[{}].stream_url", channel.index),
                    "must not be empty",
                ));
            }
        }
        if self.default_channel_index >= self.channels.len() {
            return Err(ConfigError::new(
                "default_channel",
                format!(
                    "{} exceeds channel count {}",
                    self.default_channel_index,
                    self.channels.len()
                ),
            ));
        }
        Ok(())
    }

    /// Returns the channel at `index`, if configured.
    #[must_use]
    pub fn channel(&self, index: usize) -> Option<&Channel> {
        self.channels.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::make_app_config;

    // ─────────────────────────────────────────────────────────────────────────
    // RadioState Tests
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn initial_state_is_off_and_inactive() {
        let state = RadioState::initial(2);
        assert_eq!(state.selected_channel_index, 2);
        assert_eq!(state.switch_position, SwitchPosition::Off);
        assert!(!state.is_stream_active);
    }

    #[test]
    fn stream_cannot_be_active_while_switch_off() {
        let state = RadioState::initial(0).with_stream_active(true);
        assert!(!state.is_stream_active);
    }

    #[test]
    fn switching_off_clears_stream_active() {
        let state = RadioState::initial(0)
            .with_switch(SwitchPosition::On)
            .with_stream_active(true);
        assert!(state.is_stream_active);

        let off = state.with_switch(SwitchPosition::Off);
        assert!(!off.is_stream_active);
        assert_eq!(off.selected_channel_index, 0);
    }

    #[test]
    fn with_channel_keeps_other_fields() {
        let state = RadioState::initial(0)
            .with_switch(SwitchPosition::On)
            .with_stream_active(true)
            .with_channel(3);
        assert_eq!(state.selected_channel_index, 3);
        assert_eq!(state.switch_position, SwitchPosition::On);
        assert!(state.is_stream_active);
    }

    #[test]
    fn switch_level_inversion() {
        assert_eq!(SwitchPosition::from_level(true, false), SwitchPosition::On);
        assert_eq!(SwitchPosition::from_level(false, false), SwitchPosition::Off);
        assert_eq!(SwitchPosition::from_level(true, true), SwitchPosition::Off);
        assert_eq!(SwitchPosition::from_level(false, true), SwitchPosition::On);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Validation Tests
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn byte_size_accepts_mpv_suffixes() {
        assert!(is_valid_byte_size("32MiB"));
        assert!(is_valid_byte_size("512KiB"));
        assert!(is_valid_byte_size("1048576"));
        assert!(!is_valid_byte_size("invalid"));
        assert!(!is_valid_byte_size("MiB"));
        assert!(!is_valid_byte_size("32MB"));
    }

    #[test]
    fn default_sections_are_valid() {
        assert!(AudioConfig::default().validate().is_ok());
        assert!(GpioConfig::default().validate().is_ok());
        assert!(RetryConfig::default().validate().is_ok());
        assert!(WatchdogConfig::default().validate().is_ok());
        assert!(WifiConfig::default().validate().is_ok());
        assert!(TtsConfig::default().validate().is_ok());
        assert!(DebugConfig::default().validate().is_ok());
    }

    #[test]
    fn volume_above_100_rejected() {
        let audio = AudioConfig {
            volume: 150,
            ..AudioConfig::default()
        };
        assert_eq!(audio.validate().unwrap_err().field, "audio.volume");
    }

    #[test]
    fn retry_delay_below_minimum_rejected() {
        let retry = RetryConfig {
            max_attempts: 3,
            delay_seconds: 0.1,
        };
        assert_eq!(retry.validate().unwrap_err().field, "retry.delay_seconds");
    }

    #[test]
    fn default_channel_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = make_app_config(dir.path());
        config.default_channel_index = config.channels.len();
        assert_eq!(config.validate().unwrap_err().field, "default_channel");
    }

    #[test]
    fn channels_required() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = make_app_config(dir.path());
        config.channels.clear();
        assert_eq!(config.validate().unwrap_err().field, "channels");
    }

    #[test]
    fn audio_device_uses_backend_prefix() {
        let audio = AudioConfig {
            backend: "pipewire".to_string(),
            device: "speakers".to_string(),
            ..AudioConfig::default()
        };
        assert_eq!(audio.audio_device().as_deref(), Some("pipewire/speakers"));
        assert_eq!(AudioConfig::default().audio_device(), None);
    }

    #[test]
    fn tts_engine_deserializes_program_names() {
        let engine: TtsEngine = serde_json::from_str("\"pico2wave\"").unwrap();
        assert_eq!(engine, TtsEngine::Pico2Wave);
        assert_eq!(engine.program(), "pico2wave");
    }
}
