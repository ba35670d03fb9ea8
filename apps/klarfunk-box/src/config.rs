//! Daemon configuration.
//!
//! Loads the YAML file, applies environment overrides, resolves every audio
//! file against `audio_dir` and validates the result into an [`AppConfig`].

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use klarfunk_core::state::{
    AnnouncementFiles, AudioConfig, DebugConfig, GpioConfig, RetryConfig, TtsConfig,
    WatchdogConfig, WifiConfig,
};
use klarfunk_core::{AppConfig, Channel};
use serde::Deserialize;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/config.yaml";

/// One channel entry as written in the file.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelEntry {
    pub name: String,
    pub stream_url: String,
    pub announcement_file: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ErrorAnnouncements {
    pub retrying: String,
    pub failed: String,
    pub no_internet: String,
}

impl Default for ErrorAnnouncements {
    fn default() -> Self {
        Self {
            retrying: "error_retrying.mp3".to_string(),
            failed: "error_failed.mp3".to_string(),
            no_internet: "error_no_internet.mp3".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BootAnnouncements {
    pub connected: String,
    pub no_internet: String,
}

impl Default for BootAnnouncements {
    fn default() -> Self {
        Self {
            connected: "boot_connected.mp3".to_string(),
            no_internet: "boot_no_internet.mp3".to_string(),
        }
    }
}

/// The YAML file as written. Every section is optional except `channels`.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub audio: AudioConfig,
    pub gpio: GpioConfig,
    pub retry: RetryConfig,
    pub watchdog: WatchdogConfig,
    pub wifi: WifiConfig,
    pub tts: TtsConfig,
    pub debug: DebugConfig,
    pub channels: Vec<ChannelEntry>,
    pub default_channel: usize,
    /// Relative paths are resolved against the config file's directory.
    pub audio_dir: PathBuf,
    pub error_announcements: ErrorAnnouncements,
    pub boot_announcements: BootAnnouncements,
    pub startup_branding_announcement: String,
    pub goodbye_announcement: String,
    pub selector_off_announcement: String,
    pub shutdown_announcement: String,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            gpio: GpioConfig::default(),
            retry: RetryConfig::default(),
            watchdog: WatchdogConfig::default(),
            wifi: WifiConfig::default(),
            tts: TtsConfig::default(),
            debug: DebugConfig::default(),
            channels: Vec::new(),
            default_channel: 0,
            audio_dir: PathBuf::from("audio"),
            error_announcements: ErrorAnnouncements::default(),
            boot_announcements: BootAnnouncements::default(),
            startup_branding_announcement: "startup_branding.mp3".to_string(),
            goodbye_announcement: "goodbye.mp3".to_string(),
            selector_off_announcement: "selector_off.mp3".to_string(),
            shutdown_announcement: "shutdown.mp3".to_string(),
        }
    }
}

impl FileConfig {
    /// Parses YAML text.
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Invalid YAML configuration")
    }

    /// Applies environment variable overrides.
    ///
    /// `KLARFUNK_LOG_LEVEL` is handled by clap in main.rs.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(val) = var("KLARFUNK_VOLUME") {
            match val.trim().parse() {
                Ok(volume) => self.audio.volume = volume,
                Err(_) => log::warn!("Ignoring invalid KLARFUNK_VOLUME={}", val),
            }
        }
        if let Some(val) = var("KLARFUNK_AUDIO_DEVICE") {
            if !val.trim().is_empty() {
                self.audio.device = val.trim().to_string();
            }
        }
    }

    /// Resolves paths against `config_dir` and validates the result.
    pub fn resolve(self, config_dir: &Path) -> Result<AppConfig> {
        let audio_dir = if self.audio_dir.is_absolute() {
            self.audio_dir.clone()
        } else {
            config_dir.join(&self.audio_dir)
        };
        let file = |name: &str| audio_dir.join(name);

        let channels = self
            .channels
            .iter()
            .enumerate()
            .map(|(index, entry)| Channel {
                index,
                name: entry.name.clone(),
                stream_url: entry.stream_url.clone(),
                announcement_file: file(&entry.announcement_file),
            })
            .collect();

        let announcements = AnnouncementFiles {
            retrying: file(&self.error_announcements.retrying),
            failed: file(&self.error_announcements.failed),
            no_internet: file(&self.error_announcements.no_internet),
            boot_connected: file(&self.boot_announcements.connected),
            boot_no_internet: file(&self.boot_announcements.no_internet),
            startup_branding: file(&self.startup_branding_announcement),
            goodbye: file(&self.goodbye_announcement),
            selector_off: file(&self.selector_off_announcement),
            shutdown: file(&self.shutdown_announcement),
        };

        let config = AppConfig {
            audio: self.audio,
            gpio: self.gpio,
            retry: self.retry,
            watchdog: self.watchdog,
            wifi: self.wifi,
            tts: self.tts,
            debug: self.debug,
            channels,
            default_channel_index: self.default_channel,
            audio_dir,
            announcements,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Loads, overrides, resolves and validates the configuration at `path`.
pub fn load(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let mut file = FileConfig::from_yaml(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    file.apply_env_overrides();

    let config_dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    file.resolve(config_dir)
        .with_context(|| format!("Invalid configuration in {}", path.display()))
}

/// Logs a warning for every announcement or channel file that is missing.
///
/// Returns the number of missing files.
pub fn warn_missing_files(config: &AppConfig) -> usize {
    let mut missing = 0;
    for (label, path) in config.announcements.labeled() {
        if !path.exists() {
            log::warn!("Missing {} announcement: {}", label, path.display());
            missing += 1;
        }
    }
    for channel in &config.channels {
        if !channel.announcement_file.exists() {
            log::warn!(
                "Missing announcement for channel {} ({}): {}",
                channel.index + 1,
                channel.name,
                channel.announcement_file.display()
            );
            missing += 1;
        }
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use klarfunk_core::state::TtsEngine;
    use std::collections::HashMap;
    use tempfile::TempDir;

    const MINIMAL: &str = r#"
channels:
  - name: Deutschlandfunk
    stream_url: https://st01.sslstream.dlf.de/dlf/01/128/mp3/stream.mp3
    announcement_file: channel_1.mp3
"#;

    #[test]
    fn minimal_file_uses_defaults() {
        let config = FileConfig::from_yaml(MINIMAL)
            .unwrap()
            .resolve(Path::new("/etc/klarfunk"))
            .unwrap();

        assert_eq!(config.channels.len(), 1);
        assert_eq!(config.audio.volume, 80);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.gpio.channel_pins, vec![17, 22, 23, 24, 25]);
        assert_eq!(config.audio_dir, PathBuf::from("/etc/klarfunk/audio"));
        assert_eq!(
            config.channels[0].announcement_file,
            PathBuf::from("/etc/klarfunk/audio/channel_1.mp3")
        );
        assert_eq!(
            config.announcements.retrying,
            PathBuf::from("/etc/klarfunk/audio/error_retrying.mp3")
        );
    }

    #[test]
    fn full_file_parses_every_section() {
        let yaml = r#"
audio:
  backend: pulse
  device: hw:1,0
  volume: 65
  buffer:
    cache_seconds: 12
    demuxer_max_bytes: 64MiB
gpio:
  channel_pins: [5, 6, 13]
  switch_pin: 26
  invert_switch: true
  debug_button: 2
retry:
  max_attempts: 5
  delay_seconds: 1.5
watchdog:
  stall_seconds: 12
  internet_check_hosts: ["192.0.2.1"]
tts:
  engine: pico2wave
  voice: de-DE
debug:
  enabled: true
channels:
  - {name: A, stream_url: "http://a.example/", announcement_file: a.mp3}
  - {name: B, stream_url: "http://b.example/", announcement_file: b.mp3}
default_channel: 1
audio_dir: /opt/klarfunk/audio
goodbye_announcement: tschuess.mp3
"#;
        let config = FileConfig::from_yaml(yaml)
            .unwrap()
            .resolve(Path::new("/ignored"))
            .unwrap();

        assert_eq!(config.audio.audio_device().as_deref(), Some("pulse/hw:1,0"));
        assert_eq!(config.audio.buffer.demuxer_max_bytes, "64MiB");
        assert_eq!(config.gpio.switch_pin, 26);
        assert_eq!(config.gpio.debug_button, Some(2));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.watchdog.internet_check_hosts, vec!["192.0.2.1"]);
        assert_eq!(config.tts.engine, TtsEngine::Pico2Wave);
        assert!(config.debug.enabled);
        assert_eq!(config.default_channel_index, 1);
        assert_eq!(
            config.announcements.goodbye,
            PathBuf::from("/opt/klarfunk/audio/tschuess.mp3")
        );
    }

    #[test]
    fn invalid_values_are_rejected() {
        let too_many_default = format!("{MINIMAL}default_channel: 3\n");
        let err = FileConfig::from_yaml(&too_many_default)
            .unwrap()
            .resolve(Path::new("."))
            .unwrap_err();
        assert!(err.to_string().contains("default_channel"));

        let bad_retry = format!("{MINIMAL}retry:\n  max_attempts: 0\n");
        assert!(FileConfig::from_yaml(&bad_retry)
            .unwrap()
            .resolve(Path::new("."))
            .is_err());

        let no_channels = "audio:\n  volume: 50\n";
        assert!(FileConfig::from_yaml(no_channels)
            .unwrap()
            .resolve(Path::new("."))
            .is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let mut file = FileConfig::from_yaml(MINIMAL).unwrap();
        let vars: HashMap<&str, &str> =
            [("KLARFUNK_VOLUME", "42"), ("KLARFUNK_AUDIO_DEVICE", "hw:2,0")].into();
        file.apply_overrides(|key| vars.get(key).map(|v| (*v).to_string()));

        assert_eq!(file.audio.volume, 42);
        assert_eq!(file.audio.device, "hw:2,0");
    }

    #[test]
    fn invalid_volume_override_is_ignored() {
        let mut file = FileConfig::from_yaml(MINIMAL).unwrap();
        file.apply_overrides(|key| (key == "KLARFUNK_VOLUME").then(|| "loud".to_string()));
        assert_eq!(file.audio.volume, 80);
    }

    #[test]
    fn load_resolves_relative_to_config_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, MINIMAL).unwrap();

        let config = load(&path).unwrap();
        assert_eq!(config.audio_dir, dir.path().join("audio"));
        // No audio files exist in the temp dir.
        assert_eq!(warn_missing_files(&config), 10);
    }

    #[test]
    fn example_config_is_valid() {
        let example = include_str!("../../../config/config.example.yaml");
        let config = FileConfig::from_yaml(example)
            .unwrap()
            .resolve(Path::new("/opt/klarfunk/config"))
            .unwrap();
        assert_eq!(config.channels.len(), 3);
        assert_eq!(config.tts.voice.as_deref(), Some("de"));
        assert_eq!(config.audio_dir, PathBuf::from("/opt/klarfunk/config/../audio"));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = load(Path::new("/nonexistent/klarfunk.yaml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
