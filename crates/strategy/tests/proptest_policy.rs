use std::collections::HashMap;

use chrono::{TimeZone, Utc};
use common::{Action, PatternMatch};
use proptest::prelude::*;
use strategy::{DecisionPolicy, FirstStrong, ThresholdVote};

const NAMES: &[&str] = &["engulfing", "hammer", "trend", "rsi_extremes", "two_crows"];

fn matches_strategy() -> impl Strategy<Value = Vec<PatternMatch>> {
    let t = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    prop::collection::vec((0usize..NAMES.len(), -1.0f64..=1.0), 0..12).prop_map(move |v| {
        v.into_iter()
            .map(|(i, s)| PatternMatch::new(t, NAMES[i], s))
            .collect()
    })
}

proptest! {
    /// Same matches in, same signal out.
    #[test]
    fn threshold_vote_is_deterministic(
        matches in matches_strategy(),
        buy in 0.0f64..3.0,
        sell in 0.0f64..3.0,
    ) {
        let policy = ThresholdVote::new(buy, sell, HashMap::from([("trend".to_string(), 0.5)])).unwrap();
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let a = policy.decide(t, &matches);
        let b = policy.decide(t, &matches);
        prop_assert_eq!(&a, &b);
        prop_assert!(a.contributing_patterns.iter().all(|m| !m.is_neutral()));
    }

    /// BUY only above the buy threshold, SELL only below the negative sell threshold.
    #[test]
    fn threshold_vote_respects_thresholds(matches in matches_strategy(), threshold in 0.0f64..3.0) {
        let policy = ThresholdVote::new(threshold, threshold, HashMap::new()).unwrap();
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let sum: f64 = matches.iter().map(|m| m.strength).sum();
        let expected = if sum > threshold {
            Action::Buy
        } else if sum < -threshold {
            Action::Sell
        } else {
            Action::Hold
        };
        prop_assert_eq!(policy.decide(t, &matches).action, expected);
    }

    #[test]
    fn first_strong_is_deterministic(matches in matches_strategy(), min in 0.01f64..=1.0) {
        let policy = FirstStrong::new(min).unwrap();
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        prop_assert_eq!(policy.decide(t, &matches), policy.decide(t, &matches));
    }
}
