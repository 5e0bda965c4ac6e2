use std::collections::HashMap;

use chrono::{DateTime, Utc};

use common::{Action, Error, PatternMatch, Result, Signal};

use crate::config::DecisionConfig;

/// Turns one cycle's pattern matches into a trading signal.
///
/// Implementations must be pure: the same matches always give the same signal.
pub trait DecisionPolicy: Send + Sync {
    fn name(&self) -> &str;

    fn decide(&self, candle_time: DateTime<Utc>, matches: &[PatternMatch]) -> Signal;
}

/// Build the configured policy.
pub fn build_policy(cfg: &DecisionConfig) -> Result<Box<dyn DecisionPolicy>> {
    match cfg.policy.as_str() {
        "threshold_vote" => Ok(Box::new(ThresholdVote::new(
            cfg.buy_threshold,
            cfg.sell_threshold,
            cfg.weights.clone(),
        )?)),
        "first_strong" => Ok(Box::new(FirstStrong::new(cfg.min_strength)?)),
        other => Err(Error::Config(format!("unknown decision policy '{other}'"))),
    }
}

fn non_neutral(matches: &[PatternMatch]) -> Vec<PatternMatch> {
    matches.iter().filter(|m| !m.is_neutral()).cloned().collect()
}

// ─── Threshold vote ───────────────────────────────────────────────────────────

/// Weighted sum of strengths compared against a buy and a sell threshold.
/// A sum exactly on a threshold holds.
#[derive(Debug, Clone)]
pub struct ThresholdVote {
    buy_threshold: f64,
    sell_threshold: f64,
    weights: HashMap<String, f64>,
}

impl ThresholdVote {
    pub fn new(buy_threshold: f64, sell_threshold: f64, weights: HashMap<String, f64>) -> Result<Self> {
        if !(buy_threshold >= 0.0 && sell_threshold >= 0.0) {
            return Err(Error::Config(
                "buy_threshold and sell_threshold must be non-negative".into(),
            ));
        }
        if let Some((name, w)) = weights.iter().find(|(_, w)| !w.is_finite()) {
            return Err(Error::Config(format!("weight for '{name}' is not finite: {w}")));
        }
        Ok(Self {
            buy_threshold,
            sell_threshold,
            weights,
        })
    }

    fn weight(&self, pattern: &str) -> f64 {
        self.weights.get(pattern).copied().unwrap_or(1.0)
    }
}

impl DecisionPolicy for ThresholdVote {
    fn name(&self) -> &str {
        "threshold_vote"
    }

    fn decide(&self, candle_time: DateTime<Utc>, matches: &[PatternMatch]) -> Signal {
        let contributing = non_neutral(matches);
        if contributing.is_empty() {
            return Signal::hold(candle_time, "no patterns");
        }

        let sum: f64 = contributing
            .iter()
            .map(|m| self.weight(&m.pattern_name) * m.strength)
            .sum();

        let action = if sum > self.buy_threshold {
            Action::Buy
        } else if sum < -self.sell_threshold {
            Action::Sell
        } else {
            Action::Hold
        };

        let terms: Vec<String> = contributing
            .iter()
            .map(|m| format!("{}={:+.2}", m.pattern_name, m.strength))
            .collect();
        let rationale = format!(
            "score {sum:+.3} vs buy>{} sell<-{} [{}]",
            self.buy_threshold,
            self.sell_threshold,
            terms.join(", ")
        );

        Signal {
            candle_time,
            action,
            contributing_patterns: contributing,
            rationale,
        }
    }
}

// ─── First strong ─────────────────────────────────────────────────────────────

/// The first match (in registry order) strong enough decides alone.
#[derive(Debug, Clone)]
pub struct FirstStrong {
    min_strength: f64,
}

impl FirstStrong {
    pub fn new(min_strength: f64) -> Result<Self> {
        if !(min_strength > 0.0 && min_strength <= 1.0) {
            return Err(Error::Config(format!(
                "min_strength must be in (0, 1], got {min_strength}"
            )));
        }
        Ok(Self { min_strength })
    }
}

impl DecisionPolicy for FirstStrong {
    fn name(&self) -> &str {
        "first_strong"
    }

    fn decide(&self, candle_time: DateTime<Utc>, matches: &[PatternMatch]) -> Signal {
        let contributing = non_neutral(matches);
        let Some(decisive) = contributing
            .iter()
            .find(|m| m.strength.abs() >= self.min_strength)
        else {
            return Signal {
                candle_time,
                action: Action::Hold,
                rationale: format!("no pattern with |strength| >= {}", self.min_strength),
                contributing_patterns: contributing,
            };
        };

        let action = if decisive.strength > 0.0 {
            Action::Buy
        } else {
            Action::Sell
        };
        let rationale = format!("{} {:+.2}", decisive.pattern_name, decisive.strength);

        Signal {
            candle_time,
            action,
            contributing_patterns: contributing,
            rationale,
        }
    }
}
