//! Candlestick pattern recognizers.
//!
//! Every recognizer is a plain function from the trailing candles of the
//! window to a signed strength in `[-1.0, 1.0]`. Positive values are bullish,
//! negative values bearish and `0.0` means the pattern is absent. The
//! [`RecognizerSet`] runs the enabled ones in registry order.

mod helpers;
mod single_bar;
mod three_bar;
mod trend;
mod two_bar;
mod validators;

pub use validators::TrendValidator;

use common::{Candle, Error, PatternMatch, Result};

use crate::window::CandleWindow;

/// One registry entry.
#[derive(Debug, Clone, Copy)]
pub struct Recognizer {
    pub name: &'static str,
    /// Number of trailing candles the detection function looks at.
    pub lookback: usize,
    detect: fn(&[Candle]) -> f64,
    validator: Option<TrendValidator>,
}

impl Recognizer {
    const fn new(name: &'static str, lookback: usize, detect: fn(&[Candle]) -> f64) -> Self {
        Self {
            name,
            lookback,
            detect,
            validator: None,
        }
    }

    const fn validated(mut self, validator: TrendValidator) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Candles needed before this recognizer can report anything but neutral.
    pub fn required_bars(&self) -> usize {
        self.validator
            .map(|v| v.required_bars())
            .unwrap_or(0)
            .max(self.lookback)
    }

    pub fn score(&self, bars: &[Candle]) -> f64 {
        if bars.len() < self.required_bars() {
            return 0.0;
        }
        let strength = (self.detect)(bars);
        if strength == 0.0 || !strength.is_finite() {
            return 0.0;
        }
        if let Some(validator) = &self.validator {
            if !validator.confirms(strength, bars) {
                return 0.0;
            }
        }
        strength.clamp(-1.0, 1.0)
    }
}

// ─── Registry ─────────────────────────────────────────────────────────────────

const BUILTIN: &[Recognizer] = &[
    Recognizer::new("abandoned_baby", 3, three_bar::abandoned_baby)
        .validated(TrendValidator::REVERSAL),
    Recognizer::new("dark_cloud_cover", 2, two_bar::dark_cloud_cover)
        .validated(TrendValidator::REVERSAL_SKIP_1),
    Recognizer::new("dragonfly_doji", 1, single_bar::dragonfly_doji)
        .validated(TrendValidator::LONG_REVERSAL),
    Recognizer::new("engulfing", 2, two_bar::engulfing)
        .validated(TrendValidator::REVERSAL_SKIP_1),
    Recognizer::new("evening_doji_star", 3, three_bar::evening_doji_star)
        .validated(TrendValidator::LONG_REVERSAL),
    Recognizer::new("evening_star", 3, three_bar::evening_star)
        .validated(TrendValidator::REVERSAL),
    Recognizer::new("hammer", 1, single_bar::hammer).validated(TrendValidator::LONG_REVERSAL),
    Recognizer::new("hanging_man", 1, single_bar::hanging_man)
        .validated(TrendValidator::LONG_REVERSAL),
    Recognizer::new("morning_doji_star", 3, three_bar::morning_doji_star)
        .validated(TrendValidator::LONG_REVERSAL),
    Recognizer::new("morning_star", 3, three_bar::morning_star)
        .validated(TrendValidator::REVERSAL),
    Recognizer::new("shooting_star", 1, single_bar::shooting_star)
        .validated(TrendValidator::REVERSAL),
    Recognizer::new("three_white_soldiers", 3, three_bar::three_white_soldiers)
        .validated(TrendValidator::REVERSAL_SKIP_3),
    Recognizer::new("three_black_crows", 3, three_bar::three_black_crows)
        .validated(TrendValidator::REVERSAL_SKIP_3),
    Recognizer::new("three_inside", 3, three_bar::three_inside)
        .validated(TrendValidator::REVERSAL_SKIP_3),
    Recognizer::new("three_line_strike", 4, three_bar::three_line_strike)
        .validated(TrendValidator::REVERSAL_SKIP_3),
    Recognizer::new("three_outside", 3, three_bar::three_outside)
        .validated(TrendValidator::REVERSAL_SKIP_3),
    Recognizer::new("two_crows", 3, three_bar::two_crows)
        .validated(TrendValidator::REVERSAL_SKIP_1),
    Recognizer::new("upside_gap_two_crows", 3, three_bar::upside_gap_two_crows)
        .validated(TrendValidator::REVERSAL_SKIP_1),
];

const EXTRA: &[Recognizer] = &[
    Recognizer::new("trend", trend::TREND_LOOKBACK, trend::trend),
    Recognizer::new("rsi_extremes", trend::RSI_LOOKBACK, trend::rsi_extremes),
];

fn lookup(name: &str) -> Option<Recognizer> {
    BUILTIN.iter().chain(EXTRA).find(|r| r.name == name).copied()
}

/// Names of every recognizer that can be enabled.
pub fn available() -> impl Iterator<Item = &'static str> {
    BUILTIN.iter().chain(EXTRA).map(|r| r.name)
}

// ─── Set ──────────────────────────────────────────────────────────────────────

/// The enabled recognizers, in the order they were configured.
#[derive(Debug, Clone)]
pub struct RecognizerSet {
    recognizers: Vec<Recognizer>,
}

impl RecognizerSet {
    /// The candlestick pattern library without the extra indicators.
    pub fn candlestick() -> Self {
        Self {
            recognizers: BUILTIN.to_vec(),
        }
    }

    /// Build a set from configured names. Unknown or repeated names are a
    /// configuration error.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        let mut recognizers: Vec<Recognizer> = Vec::with_capacity(names.len());
        for name in names {
            let name = name.as_ref();
            let recognizer = lookup(name)
                .ok_or_else(|| Error::Config(format!("unknown recognizer '{name}'")))?;
            if recognizers.iter().any(|r| r.name == recognizer.name) {
                return Err(Error::Config(format!("recognizer '{name}' enabled twice")));
            }
            recognizers.push(recognizer);
        }
        if recognizers.is_empty() {
            return Err(Error::Config("no recognizers enabled".into()));
        }
        Ok(Self { recognizers })
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.recognizers.iter().map(|r| r.name).collect()
    }

    pub fn len(&self) -> usize {
        self.recognizers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recognizers.is_empty()
    }

    /// Largest number of candles any enabled recognizer needs.
    pub fn required_bars(&self) -> usize {
        self.recognizers
            .iter()
            .map(Recognizer::required_bars)
            .max()
            .unwrap_or(0)
    }

    /// Run every recognizer over the window. Returns one match per
    /// recognizer, neutral ones included, stamped with the newest candle's
    /// open time. An empty window yields no matches.
    pub fn evaluate(&self, window: &CandleWindow) -> Vec<PatternMatch> {
        let bars = window.snapshot();
        let Some(last) = bars.last() else {
            return Vec::new();
        };
        self.recognizers
            .iter()
            .map(|r| PatternMatch::new(last.open_time, r.name, r.score(bars)))
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use common::Candle;

    pub fn t(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minute)
    }

    pub fn bar(minute: i64, open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            open_time: t(minute),
            open,
            high,
            low,
            close,
            volume: 10.0,
        }
    }

    /// Flat-bodied bars at the given closes, one minute apart.
    pub fn closes(values: &[f64]) -> Vec<Candle> {
        values
            .iter()
            .enumerate()
            .map(|(i, &c)| bar(i as i64, c, c + 0.5, c - 0.5, c))
            .collect()
    }
}
