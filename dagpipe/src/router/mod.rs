//! Complexity-based provider routing.
//!
//! The router owns no clients. It is handed three providers (low, high and
//! fallback) and only decides which one a unit of work should use:
//!
//! - complexity below the threshold goes to the low tier;
//! - otherwise the high tier is used while its rate budget lasts;
//! - once the budget is spent the fallback tier takes over until the
//!   window resets.
//!
//! On retries the complexity is escalated by `0.2` per attempt, and errors
//! that look like provider trouble skip the high tier entirely.

mod budget;
mod complexity;

pub use budget::RouterBudget;
pub use complexity::classify_complexity;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

/// Default complexity at which work escalates to the high tier.
pub const DEFAULT_COMPLEXITY_THRESHOLD: f64 = 0.7;

/// Default number of high-tier calls per window.
pub const DEFAULT_RATE_LIMIT: u32 = 30;

/// Default budget window in seconds.
pub const DEFAULT_WINDOW_SECS: u64 = 60;

/// Complexity added per retry attempt.
pub const ESCALATION_STEP: f64 = 0.2;

/// Error fragments that send a retry straight to the fallback tier.
pub const DEFAULT_TRANSIENT_MARKERS: [&str; 3] = ["access denied", "apierror", "rate limit"];

/// Provider tier chosen by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Cheap provider for simple work.
    Low,
    /// Capable, rate-limited provider.
    High,
    /// Used when the high tier is exhausted or misbehaving.
    Fallback,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::High => "high",
            Self::Fallback => "fallback",
        };
        write!(f, "{s}")
    }
}

/// Router tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterSettings {
    /// Scores at or above this go to the high tier.
    pub complexity_threshold: f64,
    /// High-tier calls permitted per window.
    pub rate_limit: u32,
    /// Window length in seconds.
    pub window_secs: u64,
    /// Case-insensitive fragments marking transient provider errors.
    pub transient_markers: Vec<String>,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            complexity_threshold: DEFAULT_COMPLEXITY_THRESHOLD,
            rate_limit: DEFAULT_RATE_LIMIT,
            window_secs: DEFAULT_WINDOW_SECS,
            transient_markers: DEFAULT_TRANSIENT_MARKERS
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

impl RouterSettings {
    /// Returns the window as a duration.
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// A routing decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route<P> {
    /// The chosen provider.
    pub provider: P,
    /// Human-readable label of the chosen provider.
    pub label: String,
    /// The tier the provider belongs to.
    pub tier: Tier,
}

#[derive(Debug, Clone)]
struct Slot<P> {
    provider: P,
    label: String,
}

/// Chooses between three providers by complexity and rate budget.
#[derive(Debug)]
pub struct ModelRouter<P> {
    low: Slot<P>,
    high: Slot<P>,
    fallback: Slot<P>,
    threshold: f64,
    markers: Vec<String>,
    budget: Mutex<RouterBudget>,
}

impl<P: Clone> ModelRouter<P> {
    /// Creates a router with default labels and settings.
    #[must_use]
    pub fn new(low: P, high: P, fallback: P) -> Self {
        let settings = RouterSettings::default();
        let budget = RouterBudget::new(settings.rate_limit, settings.window());
        Self {
            low: Slot {
                provider: low,
                label: Tier::Low.to_string(),
            },
            high: Slot {
                provider: high,
                label: Tier::High.to_string(),
            },
            fallback: Slot {
                provider: fallback,
                label: Tier::Fallback.to_string(),
            },
            threshold: settings.complexity_threshold,
            markers: settings.transient_markers,
            budget: Mutex::new(budget),
        }
    }

    /// Sets the labels reported for each tier.
    #[must_use]
    pub fn with_labels(
        mut self,
        low: impl Into<String>,
        high: impl Into<String>,
        fallback: impl Into<String>,
    ) -> Self {
        self.low.label = low.into();
        self.high.label = high.into();
        self.fallback.label = fallback.into();
        self
    }

    /// Applies threshold, budget and marker settings.
    ///
    /// The budget starts a fresh window.
    #[must_use]
    pub fn with_settings(mut self, settings: &RouterSettings) -> Self {
        self.threshold = settings.complexity_threshold;
        self.markers = settings
            .transient_markers
            .iter()
            .map(|m| m.to_lowercase())
            .collect();
        self.budget = Mutex::new(RouterBudget::new(settings.rate_limit, settings.window()));
        self
    }

    /// Sets the complexity threshold.
    #[must_use]
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Sets the high-tier rate limit and window, starting a fresh window.
    #[must_use]
    pub fn with_rate_limit(mut self, limit: u32, window: Duration) -> Self {
        self.budget = Mutex::new(RouterBudget::new(limit, window));
        self
    }

    /// Returns the complexity threshold.
    #[must_use]
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Returns the high-tier calls left in the current window.
    ///
    /// Does not reset an elapsed window.
    #[must_use]
    pub fn remaining_budget(&self) -> u32 {
        self.budget.lock().remaining()
    }

    /// Routes a unit of work by complexity.
    pub fn route(&self, complexity: f64) -> Route<P> {
        self.route_at(complexity, Instant::now())
    }

    /// Routes a unit of work by complexity as of `now`.
    pub fn route_at(&self, complexity: f64, now: Instant) -> Route<P> {
        if complexity < self.threshold {
            return self.pick(Tier::Low);
        }

        if self.budget.lock().try_consume(now) {
            self.pick(Tier::High)
        } else {
            tracing::debug!(complexity, "High tier budget exhausted, using fallback");
            self.pick(Tier::Fallback)
        }
    }

    /// Routes a retry of a failed unit of work.
    ///
    /// Transient provider errors go straight to the fallback tier. Anything
    /// else is routed at `min(1.0, complexity + 0.2 * attempt)`.
    pub fn route_for_retry(&self, complexity: f64, attempt: usize, last_error: &str) -> Route<P> {
        self.route_for_retry_at(complexity, attempt, last_error, Instant::now())
    }

    /// Same as [`route_for_retry`](Self::route_for_retry) as of `now`.
    pub fn route_for_retry_at(
        &self,
        complexity: f64,
        attempt: usize,
        last_error: &str,
        now: Instant,
    ) -> Route<P> {
        if self.is_transient(last_error) {
            return self.pick(Tier::Fallback);
        }

        #[allow(clippy::cast_precision_loss)]
        let escalated = (complexity + ESCALATION_STEP * attempt as f64).min(1.0);
        self.route_at(escalated, now)
    }

    /// Returns true if the error text contains a transient marker.
    #[must_use]
    pub fn is_transient(&self, error: &str) -> bool {
        if error.is_empty() {
            return false;
        }
        let lowered = error.to_lowercase();
        self.markers.iter().any(|m| lowered.contains(m.as_str()))
    }

    fn pick(&self, tier: Tier) -> Route<P> {
        let slot = match tier {
            Tier::Low => &self.low,
            Tier::High => &self.high,
            Tier::Fallback => &self.fallback,
        };
        Route {
            provider: slot.provider.clone(),
            label: slot.label.clone(),
            tier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn router() -> ModelRouter<&'static str> {
        ModelRouter::new("low_fn", "high_fn", "fallback_fn")
    }

    #[test]
    fn test_low_complexity_routes_to_low() {
        let route = router().route(0.3);
        assert_eq!(route.provider, "low_fn");
        assert_eq!(route.tier, Tier::Low);
        assert_eq!(route.label, "low");
    }

    #[test]
    fn test_high_complexity_routes_to_high() {
        let router = router();
        let route = router.route(0.8);
        assert_eq!(route.provider, "high_fn");
        assert_eq!(router.remaining_budget(), DEFAULT_RATE_LIMIT - 1);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        assert_eq!(router().route(0.7).tier, Tier::High);
        assert_eq!(router().route(0.69).tier, Tier::Low);
    }

    #[test]
    fn test_zero_budget_routes_to_fallback() {
        let router = router().with_rate_limit(0, Duration::from_secs(60));
        let route = router.route(0.9);
        assert_eq!(route.provider, "fallback_fn");
        assert_eq!(route.tier, Tier::Fallback);
    }

    #[test]
    fn test_budget_exhaustion_switches_to_fallback() {
        let router = router().with_rate_limit(2, Duration::from_secs(60));
        assert_eq!(router.route(0.9).tier, Tier::High);
        assert_eq!(router.route(0.9).tier, Tier::High);
        assert_eq!(router.route(0.9).tier, Tier::Fallback);
        assert_eq!(router.remaining_budget(), 0);
    }

    #[test]
    fn test_low_tier_does_not_consume_budget() {
        let router = router().with_rate_limit(1, Duration::from_secs(60));
        for _ in 0..5 {
            router.route(0.1);
        }
        assert_eq!(router.remaining_budget(), 1);
    }

    #[test]
    fn test_budget_resets_after_window() {
        let window = Duration::from_secs(60);
        let router = router().with_rate_limit(1, window);
        let start = Instant::now();

        assert_eq!(router.route_at(0.9, start).tier, Tier::High);
        assert_eq!(router.route_at(0.9, start).tier, Tier::Fallback);
        assert_eq!(
            router.route_at(0.9, start + window + Duration::from_secs(1)).tier,
            Tier::High
        );
    }

    #[test]
    fn test_retry_escalates_complexity() {
        let router = router();
        assert_eq!(router.route(0.5).tier, Tier::Low);
        assert_eq!(router.route_for_retry(0.5, 1, "").tier, Tier::High);
        assert_eq!(router.route_for_retry(0.1, 2, "").tier, Tier::Low);
        assert_eq!(router.route_for_retry(0.1, 3, "").tier, Tier::High);
    }

    #[test]
    fn test_retry_escalation_is_capped() {
        let router = router().with_threshold(1.0);
        assert_eq!(router.route_for_retry(0.9, 10, "").tier, Tier::High);
    }

    #[test]
    fn test_transient_errors_route_to_fallback() {
        let router = router();
        for error in [
            "Access denied for key sk-123",
            "APIError: 502 bad gateway",
            "rate limit exceeded: 429",
            "RATE LIMIT hit",
        ] {
            let route = router.route_for_retry(0.1, 1, error);
            assert_eq!(route.tier, Tier::Fallback, "error {error:?}");
        }
        assert_eq!(router.remaining_budget(), DEFAULT_RATE_LIMIT);
    }

    #[test]
    fn test_custom_labels_and_settings() {
        let settings = RouterSettings {
            complexity_threshold: 0.4,
            rate_limit: 5,
            window_secs: 10,
            transient_markers: vec!["Timeout".to_string()],
        };
        let router = router()
            .with_labels("groq-8b", "groq-70b", "gemini")
            .with_settings(&settings);

        let route = router.route(0.5);
        assert_eq!(route.label, "groq-70b");
        assert_eq!(router.remaining_budget(), 4);
        assert_eq!(router.route_for_retry(0.1, 1, "socket timeout").label, "gemini");
        assert!(!router.is_transient("rate limit"));
    }
}
