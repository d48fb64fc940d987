use std::time::{Duration, Instant};

/// Fixed-window call budget for the high tier.
///
/// The window opens when the budget is created. The first consumption
/// attempt after the window has elapsed refills the budget and opens a new
/// window at that instant, so up to twice the limit can be spent across a
/// window boundary.
#[derive(Debug, Clone)]
pub struct RouterBudget {
    limit: u32,
    remaining: u32,
    window: Duration,
    window_start: Instant,
}

impl RouterBudget {
    /// Creates a full budget whose window opens now.
    #[must_use]
    pub fn new(limit: u32, window: Duration) -> Self {
        Self::starting_at(limit, window, Instant::now())
    }

    /// Creates a full budget whose window opens at `start`.
    #[must_use]
    pub fn starting_at(limit: u32, window: Duration, start: Instant) -> Self {
        Self {
            limit,
            remaining: limit,
            window,
            window_start: start,
        }
    }

    /// Calls permitted per window.
    #[must_use]
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Calls left in the current window.
    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// When the current window opened.
    #[must_use]
    pub fn window_start(&self) -> Instant {
        self.window_start
    }

    /// Takes one call from the budget, refilling first if the window elapsed.
    ///
    /// Returns false when the budget is empty.
    pub fn try_consume(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.window_start) >= self.window {
            tracing::debug!(limit = self.limit, "Router budget window reset");
            self.remaining = self.limit;
            self.window_start = now;
        }

        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consumes_until_empty() {
        let start = Instant::now();
        let mut budget = RouterBudget::starting_at(2, Duration::from_secs(60), start);

        assert!(budget.try_consume(start));
        assert!(budget.try_consume(start));
        assert!(!budget.try_consume(start));
        assert_eq!(budget.remaining(), 0);
    }

    #[test]
    fn test_refills_lazily_after_window() {
        let start = Instant::now();
        let window = Duration::from_secs(60);
        let mut budget = RouterBudget::starting_at(1, window, start);
        assert!(budget.try_consume(start));

        let later = start + window;
        assert!(budget.try_consume(later));
        assert_eq!(budget.window_start(), later);
        assert_eq!(budget.remaining(), 0);
    }

    #[test]
    fn test_zero_limit_never_permits() {
        let start = Instant::now();
        let mut budget = RouterBudget::starting_at(0, Duration::from_secs(1), start);
        assert!(!budget.try_consume(start));
        assert!(!budget.try_consume(start + Duration::from_secs(5)));
    }
}
