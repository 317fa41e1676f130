//! Debouncer
//!
//! Coalesces rapid derivation-path edits so that re-derivation and the
//! balance lookups that follow it run once per settled value.

use std::time::{Duration, Instant};

/// Window used by the reference UI
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(1200);

/// Coalesces a stream of edits into settled values
#[derive(Debug)]
pub struct Debouncer<T> {
    window: Duration,
    pending: Option<(T, Instant)>,
    last_emitted: Option<T>,
}

impl<T: Clone + PartialEq> Debouncer<T> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: None,
            last_emitted: None,
        }
    }

    /// Seed the last emitted value, e.g. with the path restored from session
    pub fn with_initial(mut self, value: T) -> Self {
        self.last_emitted = Some(value);
        self
    }

    /// Record an edit made at `now`; restarts the window
    pub fn push(&mut self, value: T, now: Instant) {
        self.pending = Some((value, now));
    }

    #[cfg(test)]
    fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Return the settled value once the window has elapsed since the last
    /// edit. A value equal to the last one emitted is swallowed.
    pub fn poll(&mut self, now: Instant) -> Option<T> {
        let ready = match &self.pending {
            Some((_, at)) => now.saturating_duration_since(*at) >= self.window,
            None => false,
        };
        if !ready {
            return None;
        }

        let (value, _) = self.pending.take()?;
        if self.last_emitted.as_ref() == Some(&value) {
            return None;
        }
        self.last_emitted = Some(value.clone());
        Some(value)
    }
}

impl<T: Clone + PartialEq> Default for Debouncer<T> {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}
