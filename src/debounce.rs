use std::time::{Duration, Instant};

pub const DEFAULT_DELAY: Duration = Duration::from_millis(300);

/// Holds the latest value until it has been quiet for `delay`.
///
/// Each `set` replaces the pending value and restarts the timer; nothing in
/// flight is cancelled, the older value is simply never released.
#[derive(Debug)]
pub struct Debounced<T> {
    delay: Duration,
    pending: Option<(T, Instant)>,
}

impl<T> Debounced<T> {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    pub fn set(&mut self, value: T, now: Instant) {
        self.pending = Some((value, now + self.delay));
    }

    /// Releases the pending value once its deadline has passed.
    pub fn take_ready(&mut self, now: Instant) -> Option<T> {
        match &self.pending {
            Some((_, deadline)) if *deadline <= now => self.pending.take().map(|(v, _)| v),
            _ => None,
        }
    }

    pub fn cancel(&mut self) -> Option<T> {
        self.pending.take().map(|(v, _)| v)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|(_, d)| *d)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

impl<T> Default for Debounced<T> {
    fn default() -> Self {
        Self::new(DEFAULT_DELAY)
    }
}

/// How long the event loop may block before some debounce fires.
pub fn poll_timeout(deadlines: &[Option<Instant>], now: Instant, idle: Duration) -> Duration {
    deadlines
        .iter()
        .flatten()
        .map(|d| d.saturating_duration_since(now))
        .min()
        .map_or(idle, |d| d.min(idle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_value_wins_after_quiet_period() {
        let start = Instant::now();
        let mut search = Debounced::default();
        search.set("a", start);
        search.set("ab", start + Duration::from_millis(200));

        assert_eq!(search.take_ready(start + Duration::from_millis(300)), None);
        assert_eq!(search.take_ready(start + Duration::from_millis(500)), Some("ab"));
        assert!(!search.is_pending());
    }

    #[test]
    fn test_cancel_drops_pending_value() {
        let start = Instant::now();
        let mut filters = Debounced::new(Duration::from_millis(300));
        filters.set(vec![1], start);
        assert_eq!(filters.cancel(), Some(vec![1]));
        assert_eq!(filters.take_ready(start + Duration::from_secs(1)), None);
    }

    #[test]
    fn test_poll_timeout_tracks_nearest_deadline() {
        let now = Instant::now();
        let idle = Duration::from_millis(250);
        assert_eq!(poll_timeout(&[None, None], now, idle), idle);
        let soon = Some(now + Duration::from_millis(40));
        let later = Some(now + Duration::from_millis(120));
        assert_eq!(poll_timeout(&[later, soon], now, idle), Duration::from_millis(40));
    }
}
