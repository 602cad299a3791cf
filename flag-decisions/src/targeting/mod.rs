pub mod ab_testing;
pub mod conversions;
pub mod rollout;

use chrono::{DateTime, Utc};

pub use ab_testing::{ABTestConfig, ABTestEngine, Experiment, Variant, VariantAssignment};
pub use conversions::{ConversionLog, VariantConversionStats};
pub use rollout::{RolloutConfig, RolloutEngine, RolloutOutcome};

/// Inclusive `[start, end]` check; a missing bound is open.
pub(crate) fn within_window(
    at: DateTime<Utc>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> bool {
    start.map_or(true, |start| at >= start) && end.map_or(true, |end| at <= end)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn test_within_window_bounds_are_inclusive() {
        let now = Utc::now();
        assert!(within_window(now, None, None));
        assert!(within_window(now, Some(now), Some(now)));
        assert!(!within_window(now, Some(now + Duration::seconds(1)), None));
        assert!(!within_window(now, None, Some(now - Duration::seconds(1))));
    }
}
