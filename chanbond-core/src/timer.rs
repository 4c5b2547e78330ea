//! One-shot timer bounding the correlation window.

use std::time::Duration;

use crate::phy::{EventScheduler, TimerEvent, TimerHandle};

/// At most one outstanding window-expiry timer
#[derive(Debug, Default)]
pub struct ReceptionWindowTimer {
    pending: Option<TimerHandle>,
}

impl ReceptionWindowTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel any pending expiry and schedule a fresh one `duration` from now.
    pub fn rearm<S: EventScheduler>(&mut self, scheduler: &mut S, duration: Duration) {
        if let Some(previous) = self.pending.take() {
            scheduler.cancel(previous);
        }
        self.pending = Some(scheduler.schedule(duration, TimerEvent::WindowExpired));
    }

    /// Cancel the pending expiry, if any
    pub fn cancel<S: EventScheduler>(&mut self, scheduler: &mut S) {
        if let Some(previous) = self.pending.take() {
            scheduler.cancel(previous);
        }
    }

    /// Consume a fired handle. Returns `false` for handles that are no longer
    /// the pending one.
    pub fn fire(&mut self, handle: TimerHandle) -> bool {
        if self.pending == Some(handle) {
            self.pending = None;
            true
        } else {
            false
        }
    }

    pub fn is_armed(&self) -> bool {
        self.pending.is_some()
    }
}
