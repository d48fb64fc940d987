//! Keyword and size heuristic for task complexity.

const BASELINE: f64 = 0.5;
const KEYWORD_WEIGHT: f64 = 0.1;

const HIGH_KEYWORDS: &[&str] = &[
    "integrate",
    "refactor",
    "across files",
    "multi-file",
    "authentication",
    "payment",
    "real-time",
    "websocket",
    "complex",
    "full-stack",
    "oauth",
    "stripe",
    "database migration",
];

const LOW_KEYWORDS: &[&str] = &[
    "simple",
    "basic",
    "single",
    "one file",
    "style",
    "css",
    "readme",
    "deploy",
    "config",
    "env",
    "rename",
    "typo",
    "comment",
];

/// Estimates the complexity of a task without calling a provider.
///
/// Starts at `0.5`, adds `0.1` for each high-complexity keyword and subtracts
/// `0.1` for each low-complexity keyword found in the description (case
/// insensitive, each keyword counted once). Large contexts push the score up:
/// `+0.15` above 4000 tokens, `+0.05` above 2000. The result is clamped to
/// `[0.0, 1.0]`.
#[must_use]
pub fn classify_complexity(description: &str, token_count: usize) -> f64 {
    let lowered = description.to_lowercase();
    let hits = |keywords: &[&str]| keywords.iter().filter(|kw| lowered.contains(*kw)).count();

    #[allow(clippy::cast_precision_loss)]
    let mut score = BASELINE + KEYWORD_WEIGHT * hits(HIGH_KEYWORDS) as f64
        - KEYWORD_WEIGHT * hits(LOW_KEYWORDS) as f64;

    if token_count > 4000 {
        score += 0.15;
    } else if token_count > 2000 {
        score += 0.05;
    }

    score.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_neutral_description_is_baseline() {
        assert!(approx(classify_complexity("write a poem about rust", 0), 0.5));
    }

    #[test]
    fn test_high_keywords_raise_score() {
        let score = classify_complexity("Integrate Stripe payment with OAuth", 0);
        assert!(approx(score, 0.9));
    }

    #[test]
    fn test_low_keywords_lower_score() {
        let score = classify_complexity("fix a typo in the README", 0);
        assert!(approx(score, 0.3));
    }

    #[test]
    fn test_token_count_bumps() {
        assert!(approx(classify_complexity("", 2001), 0.55));
        assert!(approx(classify_complexity("", 4001), 0.65));
        assert!(approx(classify_complexity("", 2000), 0.5));
    }

    #[test]
    fn test_score_is_clamped() {
        let many_high = "integrate refactor multi-file authentication payment real-time websocket";
        assert!(approx(classify_complexity(many_high, 10_000), 1.0));

        let many_low = "simple basic single one file style css readme typo";
        assert!(approx(classify_complexity(many_low, 0), 0.0));
    }
}
