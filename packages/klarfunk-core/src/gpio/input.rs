//! Debounce and long-press detection on sampled pin levels.
//!
//! Both trackers are fed one sample per poll together with the sample time,
//! so they are deterministic and need no hardware to test.

use std::time::{Duration, Instant};

use crate::state::SwitchPosition;

/// Event produced by a channel button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEvent {
    /// Pressed and released before the long-press threshold.
    Press,
    /// Held for at least the long-press threshold.
    LongPress,
}

/// Tracks one active-low push button.
///
/// A short press is reported on release. A long press is reported once while
/// still held and suppresses the short press of the same hold.
#[derive(Debug, Clone)]
pub struct ButtonTracker {
    debounce: Duration,
    long_press: Duration,
    pressed_since: Option<Instant>,
    long_fired: bool,
    last_edge: Option<Instant>,
}

impl ButtonTracker {
    pub fn new(debounce: Duration, long_press: Duration) -> Self {
        Self {
            debounce,
            long_press,
            pressed_since: None,
            long_fired: false,
            last_edge: None,
        }
    }

    /// Feeds one raw sample taken at `now`.
    pub fn update(&mut self, pressed: bool, now: Instant) -> Option<ButtonEvent> {
        match (pressed, self.pressed_since) {
            (true, None) => {
                if self.within_debounce(now) {
                    return None;
                }
                self.pressed_since = Some(now);
                self.long_fired = false;
                self.last_edge = Some(now);
                None
            }
            (true, Some(since)) => {
                if !self.long_fired && now.saturating_duration_since(since) >= self.long_press {
                    self.long_fired = true;
                    return Some(ButtonEvent::LongPress);
                }
                None
            }
            (false, Some(_)) => {
                self.pressed_since = None;
                self.last_edge = Some(now);
                (!self.long_fired).then_some(ButtonEvent::Press)
            }
            (false, None) => None,
        }
    }

    /// Whether the button is currently considered held.
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.pressed_since.is_some()
    }

    fn within_debounce(&self, now: Instant) -> bool {
        self.last_edge
            .is_some_and(|edge| now.saturating_duration_since(edge) < self.debounce)
    }
}

/// Tracks the selector switch; a new position must be stable for the
/// debounce time before it is reported.
#[derive(Debug, Clone)]
pub struct SwitchTracker {
    debounce: Duration,
    stable: SwitchPosition,
    candidate: Option<(SwitchPosition, Instant)>,
}

impl SwitchTracker {
    pub fn new(initial: SwitchPosition, debounce: Duration) -> Self {
        Self {
            debounce,
            stable: initial,
            candidate: None,
        }
    }

    #[must_use]
    pub fn position(&self) -> SwitchPosition {
        self.stable
    }

    /// Feeds one sample; returns the new position once it has settled.
    pub fn update(&mut self, position: SwitchPosition, now: Instant) -> Option<SwitchPosition> {
        if position == self.stable {
            self.candidate = None;
            return None;
        }
        let since = match self.candidate {
            Some((candidate, since)) if candidate == position => since,
            _ => {
                self.candidate = Some((position, now));
                now
            }
        };
        if now.saturating_duration_since(since) >= self.debounce {
            self.stable = position;
            self.candidate = None;
            return Some(position);
        }
        None
    }
}
