//! Device lifecycle abstraction.
//!
//! The controller plays the shutdown announcement; powering the device off
//! afterwards is the surrounding process's job. The [`Lifecycle`] trait is
//! that seam, so the daemon can run real OS commands while tests and the
//! keyboard mock stay harmless.

use std::time::Duration;

use crate::utils::run_command;

/// Trait for device lifecycle operations.
pub trait Lifecycle: Send + Sync {
    /// Powers the device off.
    fn request_shutdown(&self);
}

/// Runs `sudo shutdown -h now`.
pub struct SystemLifecycle;

impl Lifecycle for SystemLifecycle {
    fn request_shutdown(&self) {
        log::info!("[Lifecycle] Powering off");
        match run_command("sudo", &["shutdown", "-h", "now"], Duration::from_secs(10)) {
            Ok(output) if output.success() => {}
            Ok(output) => log::error!("[Lifecycle] shutdown failed: {}", output.diagnostic()),
            Err(e) => log::error!("[Lifecycle] shutdown failed: {}", e),
        }
    }
}

/// No-op lifecycle for tests and mock hardware.
pub struct NoopLifecycle;

impl Lifecycle for NoopLifecycle {
    fn request_shutdown(&self) {
        log::info!("[Lifecycle] Shutdown requested (no-op)");
    }
}
