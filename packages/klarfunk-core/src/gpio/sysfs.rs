//! Linux sysfs GPIO adapter (`/sys/class/gpio`).
//!
//! Pins are configured with BCM numbers. Recent kernels register the SoC
//! pin controller at a non-zero base, so the sysfs number is the BCM number
//! plus the base of the `pinctrl-*` chip.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::GpioInterface;
use crate::error::{GpioError, GpioResult};

/// Default sysfs GPIO root.
pub const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

/// How long to wait for udev to expose a freshly exported pin.
const EXPORT_SETTLE_TIMEOUT: Duration = Duration::from_secs(1);

/// GPIO access through the sysfs class interface.
pub struct SysfsGpio {
    root: PathBuf,
    base: u32,
    exported: Mutex<Vec<u32>>,
}

impl SysfsGpio {
    /// Opens the default sysfs root.
    pub fn new() -> GpioResult<Self> {
        Self::with_root(SYSFS_GPIO_ROOT)
    }

    /// Opens a sysfs root at `root` and detects the pin controller base.
    pub fn with_root(root: impl Into<PathBuf>) -> GpioResult<Self> {
        let root = root.into();
        let base = detect_pinctrl_base(&root)?;
        log::info!(
            "[Gpio] Using sysfs at {} (pin base {})",
            root.display(),
            base
        );
        Ok(Self {
            root,
            base,
            exported: Mutex::new(Vec::new()),
        })
    }

    /// Sysfs number for BCM `pin`.
    #[must_use]
    pub fn sysfs_number(&self, pin: u32) -> u32 {
        self.base + pin
    }

    fn pin_dir(&self, pin: u32) -> PathBuf {
        self.root.join(format!("gpio{}", self.sysfs_number(pin)))
    }

    fn write(&self, pin: u32, path: &Path, value: &str) -> GpioResult<()> {
        fs::write(path, value).map_err(|source| GpioError::Io { pin, source })
    }
}

impl GpioInterface for SysfsGpio {
    fn setup_input(&self, pin: u32, pull_up: bool) -> GpioResult<()> {
        let dir = self.pin_dir(pin);
        if !dir.exists() {
            let number = self.sysfs_number(pin).to_string();
            self.write(pin, &self.root.join("export"), &number)?;
        }

        let direction = dir.join("direction");
        let deadline = Instant::now() + EXPORT_SETTLE_TIMEOUT;
        loop {
            match fs::write(&direction, "in") {
                Ok(()) => break,
                Err(_) if Instant::now() < deadline => thread::sleep(Duration::from_millis(20)),
                Err(source) => return Err(GpioError::Io { pin, source }),
            }
        }

        if pull_up {
            // sysfs has no bias control; pull-ups come from the board or config.txt.
            log::debug!("[Gpio] GPIO {} expects an external or firmware pull-up", pin);
        }

        let mut exported = self.exported.lock();
        if !exported.contains(&pin) {
            exported.push(pin);
        }
        Ok(())
    }

    fn read(&self, pin: u32) -> GpioResult<bool> {
        if !self.exported.lock().contains(&pin) {
            return Err(GpioError::NotConfigured(pin));
        }
        let value = fs::read_to_string(self.pin_dir(pin).join("value"))
            .map_err(|source| GpioError::Io { pin, source })?;
        Ok(value.trim() == "1")
    }

    fn cleanup(&self) {
        let pins: Vec<u32> = std::mem::take(&mut *self.exported.lock());
        for pin in pins {
            let number = self.sysfs_number(pin).to_string();
            if let Err(e) = self.write(pin, &self.root.join("unexport"), &number) {
                log::debug!("[Gpio] Unexport failed: {}", e);
            }
        }
    }
}

/// Finds the base of the SoC pin controller chip.
///
/// Falls back to 0 when chips exist but none is labeled `pinctrl-*`.
fn detect_pinctrl_base(root: &Path) -> GpioResult<u32> {
    let entries = fs::read_dir(root)
        .map_err(|e| GpioError::ChipNotFound(format!("{}: {e}", root.display())))?;

    let mut chips = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with("gpiochip") {
            continue;
        }
        let path = entry.path();
        let label = fs::read_to_string(path.join("label")).unwrap_or_default();
        let base = fs::read_to_string(path.join("base"))
            .ok()
            .and_then(|b| b.trim().parse::<u32>().ok());
        if let Some(base) = base {
            chips.push((label.trim().to_string(), base));
        }
    }

    Ok(chips
        .iter()
        .filter(|(label, _)| label.starts_with("pinctrl"))
        .map(|(_, base)| *base)
        .min()
        .unwrap_or(0))
}
