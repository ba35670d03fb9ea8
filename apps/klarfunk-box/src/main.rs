//! Klarfunk Box - headless daemon for the button-driven internet radio.
//!
//! Wires the audio engine, network and speech collaborators, GPIO input and
//! the radio controller together, then waits for SIGINT/SIGTERM or a
//! long-press shutdown request.

mod config;
mod logging;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use klarfunk_core::gpio::KeyboardGpio;
use klarfunk_core::protocol_constants::ANNOUNCEMENT_TIMEOUT_SECS;
use klarfunk_core::sync::{join_bounded, Signal};
use klarfunk_core::utils::{is_raspberry_pi, log_fd_limits};
use klarfunk_core::{
    AppConfig, AudioEngine, AudioPlayer, Collaborators, CommandTtsSpeaker, EngineConfig,
    GpioCallbacks, GpioController, GpioInterface, Lifecycle, LongPressAction, MpvFactory,
    NetworkManager, NoopLifecycle, RadioController, SysfsGpio, SystemLifecycle, TcpProbe,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Interval between heartbeat file writes.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Pin access backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum GpioMode {
    /// Raspberry Pi pins via sysfs.
    Rpi,
    /// Keyboard mock: 1-5 press buttons, s toggles the switch.
    Mock,
}

/// Klarfunk Box - internet radio driven by buttons and a selector switch.
#[derive(Parser, Debug)]
#[command(name = "klarfunk-box")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE", default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "KLARFUNK_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Shorthand for --log-level debug.
    #[arg(short, long)]
    verbose: bool,

    /// GPIO backend. Defaults to rpi on a Raspberry Pi, mock elsewhere.
    #[arg(long, value_enum)]
    gpio: Option<GpioMode>,

    /// Also write logs to this file (rotated at 5 MiB, 3 backups).
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Touch this file with a timestamp every 30 seconds.
    #[arg(long, value_name = "FILE")]
    heartbeat_file: Option<PathBuf>,
}

impl Args {
    fn effective_log_level(&self) -> log::LevelFilter {
        if self.verbose {
            self.log_level.max(log::LevelFilter::Debug)
        } else {
            self.log_level
        }
    }

    fn gpio_mode(&self) -> GpioMode {
        self.gpio.unwrap_or_else(|| {
            if is_raspberry_pi() {
                GpioMode::Rpi
            } else {
                GpioMode::Mock
            }
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    logging::init(args.effective_log_level(), args.log_file.as_deref())?;

    log::info!("Klarfunk Box v{}", env!("CARGO_PKG_VERSION"));
    log_fd_limits();

    let config = config::load(&args.config).context("Failed to load configuration")?;
    log::info!(
        "Configuration: {} channels, default channel {}, audio dir {}",
        config.channels.len(),
        config.default_channel_index + 1,
        config.audio_dir.display()
    );
    let missing = config::warn_missing_files(&config);
    if missing > 0 {
        log::warn!("{} audio files are missing", missing);
    }

    let gpio_mode = args.gpio_mode();
    log::info!("GPIO mode: {:?}", gpio_mode);

    let engine: Arc<dyn AudioPlayer> = Arc::new(AudioEngine::new(
        Arc::new(MpvFactory::new(config.audio.mpv_path.clone())),
        EngineConfig::from_app(&config),
    ));

    let branding = play_in_background(
        Arc::clone(&engine),
        config.announcements.startup_branding.clone(),
    );

    let network = Arc::new(NetworkManager::new(
        config.wifi.clone(),
        TcpProbe::from_config(&config.watchdog),
    ));
    let collaborators = Collaborators {
        audio: Arc::clone(&engine),
        connectivity: network.clone(),
        wifi: network,
        tts: Arc::new(CommandTtsSpeaker::new(config.tts.clone())),
    };

    let pins = open_gpio(gpio_mode, &config)?;
    let gpio = GpioController::new(pins, config.gpio.clone())
        .context("Failed to initialize GPIO")?;

    if let Some(handle) = branding {
        if !join_bounded(handle, Duration::from_secs(ANNOUNCEMENT_TIMEOUT_SECS)) {
            log::warn!("Startup branding still playing; continuing");
        }
    }

    let controller = RadioController::new(config, collaborators);
    let shutdown_requested = CancellationToken::new();

    let initial_switch = gpio
        .read_switch()
        .context("Failed to read selector switch")?;
    {
        let controller = controller.clone();
        tokio::task::spawn_blocking(move || controller.startup(initial_switch))
            .await
            .context("Startup task panicked")?;
    }

    gpio.start(
        callbacks(&controller, &shutdown_requested),
        initial_switch,
    )
    .context("Failed to start GPIO polling")?;
    log::info!("Ready");

    let heartbeat = args.heartbeat_file.as_deref().map(start_heartbeat);

    let long_press_shutdown = tokio::select! {
        _ = shutdown_signal() => false,
        _ = shutdown_requested.cancelled() => true,
    };

    if long_press_shutdown {
        log::info!("Shutdown requested by long press");
        let lifecycle: Box<dyn Lifecycle> = match gpio_mode {
            GpioMode::Rpi => Box::new(SystemLifecycle),
            GpioMode::Mock => Box::new(NoopLifecycle),
        };
        let controller = controller.clone();
        tokio::task::spawn_blocking(move || {
            controller.request_shutdown();
            lifecycle.request_shutdown();
        })
        .await
        .context("Shutdown task panicked")?;
    } else {
        log::info!("Shutdown signal received, cleaning up...");
    }

    tokio::task::spawn_blocking(move || {
        gpio.stop();
        controller.shutdown();
        if let Some((stop, handle)) = heartbeat {
            stop.set();
            let _ = handle.join();
        }
    })
    .await
    .context("Cleanup task panicked")?;

    log::info!("Shutdown complete");
    Ok(())
}

/// Opens the pin backend for `mode`.
fn open_gpio(mode: GpioMode, config: &AppConfig) -> Result<Arc<dyn GpioInterface>> {
    Ok(match mode {
        GpioMode::Rpi => Arc::new(SysfsGpio::new().context("Failed to open sysfs GPIO")?),
        GpioMode::Mock => {
            log::info!("Keyboard mock: keys 1-5 press channel buttons, s toggles the switch, hold a key for a long press");
            Arc::new(
                KeyboardGpio::new(config.gpio.channel_pins.clone(), config.gpio.switch_pin)
                    .context("Failed to start keyboard GPIO mock")?,
            )
        }
    })
}

/// Routes hardware events to the controller.
fn callbacks(controller: &RadioController, shutdown: &CancellationToken) -> GpioCallbacks {
    let on_channel = controller.clone();
    let on_switch = controller.clone();
    let on_long_press = controller.clone();
    let shutdown = shutdown.clone();

    GpioCallbacks {
        on_channel: Box::new(move |index| on_channel.handle_channel_button(index)),
        on_switch: Box::new(move |position| on_switch.handle_switch_change(position)),
        on_long_press: Box::new(move |index| match on_long_press.long_press_action(index) {
            Some(LongPressAction::Shutdown) => shutdown.cancel(),
            Some(LongPressAction::Debug) => on_long_press.request_debug(),
            None => log::debug!("Long press on button {} has no action", index + 1),
        }),
    }
}

/// Plays `file` on a background thread.
fn play_in_background(audio: Arc<dyn AudioPlayer>, file: PathBuf) -> Option<JoinHandle<()>> {
    let spawned = thread::Builder::new()
        .name("startup-branding".into())
        .spawn(move || {
            if !audio.play_announcement(&file) {
                log::warn!("Startup branding announcement failed");
            }
        });
    match spawned {
        Ok(handle) => Some(handle),
        Err(e) => {
            log::warn!("Failed to start branding thread: {}", e);
            None
        }
    }
}

/// Writes the current local time to `path` every [`HEARTBEAT_INTERVAL`]
/// until the returned signal is set.
fn start_heartbeat(path: &Path) -> (Arc<Signal>, JoinHandle<()>) {
    let stop = Arc::new(Signal::new());
    let thread_stop = Arc::clone(&stop);
    let path = path.to_path_buf();
    let handle = thread::spawn(move || loop {
        if let Err(e) = write_heartbeat(&path) {
            log::warn!("Failed to write heartbeat {}: {}", path.display(), e);
        }
        if thread_stop.wait_timeout(HEARTBEAT_INTERVAL) {
            break;
        }
    });
    (stop, handle)
}

fn write_heartbeat(path: &Path) -> std::io::Result<()> {
    std::fs::write(path, format!("{}\n", chrono::Local::now().to_rfc3339()))
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
