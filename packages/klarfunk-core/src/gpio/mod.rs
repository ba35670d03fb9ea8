//! Hardware input: channel buttons and the selector switch.
//!
//! [`GpioController`] polls every configured pin from one thread and turns
//! level samples into controller events through [`GpioCallbacks`]. Pin
//! access goes through [`GpioInterface`] so the same controller runs on
//! sysfs hardware and on the keyboard mock.

pub mod input;
#[cfg(unix)]
pub mod keyboard;
pub mod sysfs;

use std::collections::HashSet;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

pub use input::{ButtonEvent, ButtonTracker, SwitchTracker};
#[cfg(unix)]
pub use keyboard::KeyboardGpio;
pub use sysfs::SysfsGpio;

use crate::error::{GpioError, GpioResult};
use crate::protocol_constants::GPIO_POLL_INTERVAL_MS;
use crate::state::{GpioConfig, SwitchPosition};
use crate::sync::{join_bounded, Signal};

/// Raw pin access.
pub trait GpioInterface: Send + Sync {
    /// Configures `pin` (BCM numbering) as an input.
    fn setup_input(&self, pin: u32, pull_up: bool) -> GpioResult<()>;

    /// Reads the pin level, `true` meaning HIGH.
    fn read(&self, pin: u32) -> GpioResult<bool>;

    /// Releases every configured pin. Idempotent.
    fn cleanup(&self);
}

/// Event sinks invoked on the polling thread. They must return quickly.
pub struct GpioCallbacks {
    pub on_channel: Box<dyn Fn(usize) + Send>,
    pub on_switch: Box<dyn Fn(SwitchPosition) + Send>,
    pub on_long_press: Box<dyn Fn(usize) + Send>,
}

/// Polls buttons and switch and reports debounced events.
pub struct GpioController {
    interface: Arc<dyn GpioInterface>,
    config: GpioConfig,
    poll_interval: Duration,
    stop: Arc<Signal>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl GpioController {
    /// Configures every channel pin and the switch pin as pulled-up inputs.
    pub fn new(interface: Arc<dyn GpioInterface>, config: GpioConfig) -> GpioResult<Self> {
        for (index, &pin) in config.channel_pins.iter().enumerate() {
            interface.setup_input(pin, true)?;
            log::info!("[Gpio] Channel {} button on GPIO {}", index + 1, pin);
        }
        interface.setup_input(config.switch_pin, true)?;
        log::info!("[Gpio] Selector switch on GPIO {}", config.switch_pin);

        Ok(Self {
            interface,
            config,
            poll_interval: Duration::from_millis(GPIO_POLL_INTERVAL_MS),
            stop: Arc::new(Signal::new()),
            thread: Mutex::new(None),
        })
    }

    /// Current switch position, inversion applied.
    pub fn read_switch(&self) -> GpioResult<SwitchPosition> {
        let high = self.interface.read(self.config.switch_pin)?;
        Ok(SwitchPosition::from_level(high, self.config.invert_switch))
    }

    /// Starts the polling thread.
    ///
    /// `initial_switch` is the position the caller already acted on; only
    /// changes from it are reported.
    pub fn start(&self, callbacks: GpioCallbacks, initial_switch: SwitchPosition) -> GpioResult<()> {
        let mut slot = self.thread.lock();
        if slot.as_ref().is_some_and(|t| !t.is_finished()) {
            log::warn!("[Gpio] Polling already running");
            return Ok(());
        }
        self.stop.clear();

        let poller = Poller {
            interface: Arc::clone(&self.interface),
            config: self.config.clone(),
            callbacks,
            buttons: self
                .config
                .channel_pins
                .iter()
                .map(|_| ButtonTracker::new(self.config.debounce(), self.config.long_press()))
                .collect(),
            switch: SwitchTracker::new(initial_switch, self.config.debounce()),
            failing: HashSet::new(),
        };
        let stop = Arc::clone(&self.stop);
        let interval = self.poll_interval;
        let handle = thread::Builder::new()
            .name("gpio-poll".into())
            .spawn(move || poller.run(&stop, interval))
            .map_err(GpioError::Thread)?;
        *slot = Some(handle);
        log::info!("[Gpio] Polling started (switch {})", initial_switch);
        Ok(())
    }

    /// Stops polling and releases the pins.
    pub fn stop(&self) {
        self.stop.set();
        if let Some(handle) = self.thread.lock().take() {
            if !join_bounded(handle, Duration::from_secs(1)) {
                log::warn!("[Gpio] Polling thread did not exit in time");
            }
        }
        self.interface.cleanup();
        log::info!("[Gpio] Stopped");
    }
}

struct Poller {
    interface: Arc<dyn GpioInterface>,
    config: GpioConfig,
    callbacks: GpioCallbacks,
    buttons: Vec<ButtonTracker>,
    switch: SwitchTracker,
    failing: HashSet<u32>,
}

impl Poller {
    fn run(mut self, stop: &Signal, interval: Duration) {
        while !stop.wait_timeout(interval) {
            self.poll(Instant::now());
        }
    }

    fn poll(&mut self, now: Instant) {
        for index in 0..self.buttons.len() {
            let pin = self.config.channel_pins[index];
            let Some(high) = self.sample(pin) else {
                continue;
            };
            match self.buttons[index].update(!high, now) {
                Some(ButtonEvent::Press) => {
                    log::info!("[Gpio] Channel {} button pressed", index + 1);
                    (self.callbacks.on_channel)(index);
                }
                Some(ButtonEvent::LongPress) => {
                    log::info!("[Gpio] Channel {} button long press", index + 1);
                    (self.callbacks.on_long_press)(index);
                }
                None => {}
            }
        }

        if let Some(high) = self.sample(self.config.switch_pin) {
            let position = SwitchPosition::from_level(high, self.config.invert_switch);
            if let Some(changed) = self.switch.update(position, now) {
                log::info!("[Gpio] Selector switch changed to {}", changed);
                (self.callbacks.on_switch)(changed);
            }
        }
    }

    /// Reads one pin, logging only transitions between working and failing.
    fn sample(&mut self, pin: u32) -> Option<bool> {
        match self.interface.read(pin) {
            Ok(level) => {
                if self.failing.remove(&pin) {
                    log::info!("[Gpio] GPIO {} readable again", pin);
                }
                Some(level)
            }
            Err(e) => {
                if self.failing.insert(pin) {
                    log::warn!("[Gpio] Failed to read GPIO {}: {}", pin, e);
                }
                None
            }
        }
    }
}
