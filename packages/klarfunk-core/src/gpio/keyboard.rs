//! Keyboard-driven GPIO mock for running on a development machine.
//!
//! Keys `1`-`5` press the matching channel button, `s` toggles the selector
//! switch. Every key press holds the button for a short window; a held key
//! autorepeats and keeps extending the hold, which simulates a long press.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::GpioInterface;
use crate::error::{GpioError, GpioResult};
use crate::protocol_constants::{MOCK_KEY_HOLD_WINDOW_MS, MOCK_KEY_POLL_MS};
use crate::sync::{join_bounded, Signal};

/// Simulated pin levels.
#[derive(Debug)]
pub struct MockPins {
    channel_pins: Vec<u32>,
    switch_pin: u32,
    switch_high: bool,
    held_until: HashMap<u32, Instant>,
    hold_window: Duration,
}

impl MockPins {
    pub fn new(channel_pins: Vec<u32>, switch_pin: u32, hold_window: Duration) -> Self {
        Self {
            channel_pins,
            switch_pin,
            switch_high: true,
            held_until: HashMap::new(),
            hold_window,
        }
    }

    /// Applies one key press received at `now`. Unknown keys are ignored.
    pub fn key(&mut self, key: char, now: Instant) {
        match key {
            '1'..='9' => {
                let index = key as usize - '1' as usize;
                if let Some(&pin) = self.channel_pins.get(index) {
                    self.held_until.insert(pin, now + self.hold_window);
                }
            }
            's' | 'S' => {
                self.switch_high = !self.switch_high;
                log::info!(
                    "[Gpio] Mock switch level {}",
                    if self.switch_high { "HIGH" } else { "LOW" }
                );
            }
            _ => {}
        }
    }

    /// Pin level at `now` (`true` = HIGH). Buttons are active-low.
    pub fn level(&mut self, pin: u32, now: Instant) -> bool {
        if pin == self.switch_pin {
            return self.switch_high;
        }
        match self.held_until.get(&pin) {
            Some(&until) if now < until => false,
            Some(_) => {
                self.held_until.remove(&pin);
                true
            }
            None => true,
        }
    }

    fn knows(&self, pin: u32) -> bool {
        pin == self.switch_pin || self.channel_pins.contains(&pin)
    }
}

/// [`GpioInterface`] fed from stdin.
pub struct KeyboardGpio {
    pins: Arc<Mutex<MockPins>>,
    stop: Arc<Signal>,
    reader: Mutex<Option<JoinHandle<()>>>,
    terminal: Mutex<Option<libc::termios>>,
}

impl KeyboardGpio {
    /// Starts reading keys from stdin; switches a TTY to unbuffered input.
    pub fn new(channel_pins: Vec<u32>, switch_pin: u32) -> GpioResult<Self> {
        let channels = channel_pins.len();
        let pins = Arc::new(Mutex::new(MockPins::new(
            channel_pins,
            switch_pin,
            Duration::from_millis(MOCK_KEY_HOLD_WINDOW_MS),
        )));
        let stop = Arc::new(Signal::new());

        let terminal = enter_cbreak();
        if terminal.is_none() {
            log::warn!("[Gpio] stdin is not a terminal; mock keys are read line-buffered");
        }

        let reader = {
            let pins = Arc::clone(&pins);
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name("gpio-keyboard".into())
                .spawn(move || read_keys(&pins, &stop))
                .map_err(GpioError::Thread)?
        };

        log::info!(
            "[Gpio] Mock mode (keys: 1-{} = channels, s = toggle switch)",
            channels
        );
        Ok(Self {
            pins,
            stop,
            reader: Mutex::new(Some(reader)),
            terminal: Mutex::new(terminal),
        })
    }
}

impl GpioInterface for KeyboardGpio {
    fn setup_input(&self, pin: u32, _pull_up: bool) -> GpioResult<()> {
        if self.pins.lock().knows(pin) {
            Ok(())
        } else {
            Err(GpioError::NotConfigured(pin))
        }
    }

    fn read(&self, pin: u32) -> GpioResult<bool> {
        Ok(self.pins.lock().level(pin, Instant::now()))
    }

    fn cleanup(&self) {
        self.stop.set();
        if let Some(reader) = self.reader.lock().take() {
            join_bounded(reader, Duration::from_secs(1));
        }
        if let Some(original) = self.terminal.lock().take() {
            restore_terminal(&original);
        }
    }
}

impl Drop for KeyboardGpio {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn read_keys(pins: &Mutex<MockPins>, stop: &Signal) {
    while !stop.is_set() {
        match read_stdin_byte(MOCK_KEY_POLL_MS) {
            StdinRead::Byte(byte) => pins.lock().key(char::from(byte), Instant::now()),
            StdinRead::Idle => {}
            StdinRead::Closed => {
                log::info!("[Gpio] stdin closed, mock keyboard stopped");
                break;
            }
        }
    }
}

enum StdinRead {
    Byte(u8),
    Idle,
    Closed,
}

fn read_stdin_byte(timeout_ms: i32) -> StdinRead {
    let mut fds = libc::pollfd {
        fd: libc::STDIN_FILENO,
        events: libc::POLLIN,
        revents: 0,
    };
    // SAFETY: one valid pollfd for the process's stdin.
    let ready = unsafe { libc::poll(&mut fds, 1, timeout_ms) };
    if ready <= 0 {
        return StdinRead::Idle;
    }

    let mut byte = 0u8;
    // SAFETY: reads at most one byte into a local buffer of one byte.
    let n = unsafe { libc::read(libc::STDIN_FILENO, (&mut byte as *mut u8).cast(), 1) };
    match n {
        1 => StdinRead::Byte(byte),
        0 => StdinRead::Closed,
        _ => StdinRead::Idle,
    }
}

/// Disables canonical mode and echo; returns the previous settings.
fn enter_cbreak() -> Option<libc::termios> {
    // SAFETY: termios is plain data filled in by tcgetattr; stdin is a valid fd.
    unsafe {
        if libc::isatty(libc::STDIN_FILENO) == 0 {
            return None;
        }
        let mut original: libc::termios = std::mem::zeroed();
        if libc::tcgetattr(libc::STDIN_FILENO, &mut original) != 0 {
            return None;
        }
        let mut cbreak = original;
        cbreak.c_lflag &= !(libc::ICANON | libc::ECHO);
        cbreak.c_cc[libc::VMIN] = 1;
        cbreak.c_cc[libc::VTIME] = 0;
        if libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, &cbreak) != 0 {
            return None;
        }
        Some(original)
    }
}

fn restore_terminal(original: &libc::termios) {
    // SAFETY: restores settings previously read from the same fd.
    let result = unsafe { libc::tcsetattr(libc::STDIN_FILENO, libc::TCSADRAIN, original) };
    if result != 0 {
        log::warn!(
            "[Gpio] Failed to restore terminal: {}",
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(1000);

    fn pins() -> MockPins {
        MockPins::new(vec![17, 22, 23], 27, WINDOW)
    }

    #[test]
    fn key_press_holds_button_for_window() {
        let t0 = Instant::now();
        let mut pins = pins();

        pins.key('2', t0);
        assert!(!pins.level(22, t0 + Duration::from_millis(500)));
        assert!(pins.level(17, t0));
        assert!(pins.level(22, t0 + WINDOW));
    }

    #[test]
    fn repeated_presses_extend_hold() {
        let t0 = Instant::now();
        let mut pins = pins();

        for step in 0..5 {
            pins.key('1', t0 + Duration::from_millis(step * 500));
        }
        assert!(!pins.level(17, t0 + Duration::from_millis(2_900)));
        assert!(pins.level(17, t0 + Duration::from_millis(3_000)));
    }

    #[test]
    fn switch_toggles() {
        let t0 = Instant::now();
        let mut pins = pins();

        assert!(pins.level(27, t0));
        pins.key('s', t0);
        assert!(!pins.level(27, t0));
        pins.key('S', t0);
        assert!(pins.level(27, t0));
    }

    #[test]
    fn keys_beyond_channel_count_are_ignored() {
        let t0 = Instant::now();
        let mut pins = pins();

        pins.key('5', t0);
        pins.key('x', t0);
        assert!(pins.held_until.is_empty());
        assert!(pins.knows(23));
        assert!(!pins.knows(24));
    }
}
