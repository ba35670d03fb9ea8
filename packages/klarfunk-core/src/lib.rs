//! Klarfunk Core - shared library for the Klarfunk Box internet radio.
//!
//! The box has a selector switch, up to five channel buttons and a speaker.
//! Everything it says is a recorded announcement or synthesized speech, so
//! every failure must be audible.
//!
//! # Architecture
//!
//! - [`audio`]: player backend contract, mpv backend, and the audio engine
//!   (announcements, stream connection with retries, announcement → stream
//!   handoff, stall watchdog with reconnect backoff)
//! - [`controller`]: radio state machine and single-slot task dispatcher
//! - [`gpio`]: button and switch polling over sysfs or a keyboard mock
//! - [`network`]: connectivity and Wi-Fi via NetworkManager
//! - [`tts`]: speech synthesis for the debug readout
//! - [`state`]: domain values and configuration sections
//! - [`error`]: centralized error types
//!
//! # Abstraction Traits
//!
//! Collaborators sit behind traits so the controller and engine run against
//! fakes in tests:
//!
//! - [`PlayerBackend`](audio::PlayerBackend) / [`BackendFactory`](audio::BackendFactory)
//! - [`AudioPlayer`](audio::AudioPlayer)
//! - [`ConnectivityChecker`](network::ConnectivityChecker) / [`WifiManager`](network::WifiManager)
//! - [`TtsSpeaker`](tts::TtsSpeaker)
//! - [`GpioInterface`](gpio::GpioInterface)
//! - [`Lifecycle`](lifecycle::Lifecycle)

#![warn(clippy::all)]

pub mod audio;
pub mod controller;
pub mod error;
pub mod gpio;
pub mod lifecycle;
pub mod network;
pub mod protocol_constants;
pub mod state;
pub mod sync;
pub mod tts;
pub mod utils;

#[cfg(test)]
mod test_support;

// Re-export commonly used types at the crate root
pub use audio::{AudioEngine, AudioPlayer, BackendFactory, EngineConfig, TcpProbe};
#[cfg(unix)]
pub use audio::mpv::MpvFactory;
pub use controller::{Collaborators, LongPressAction, RadioController};
pub use error::{
    CommandError, ConfigError, ErrorCode, GpioError, NetworkError, PlayerError, TtsError,
};
pub use gpio::{GpioCallbacks, GpioController, GpioInterface, SysfsGpio};
pub use lifecycle::{Lifecycle, NoopLifecycle, SystemLifecycle};
pub use network::NetworkManager;
pub use state::{AppConfig, Channel, RadioState, SwitchPosition};
pub use tts::CommandTtsSpeaker;
