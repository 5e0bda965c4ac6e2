use common::{Candle, Error, Result};

/// Relative Strength Index over candle closes, with Wilder smoothing.
///
/// Needs `period + 1` closes; fewer yield `None`.
#[derive(Debug, Clone, Copy)]
pub struct RsiIndicator {
    period: usize,
    overbought: f64,
    oversold: f64,
}

impl Default for RsiIndicator {
    fn default() -> Self {
        Self {
            period: 14,
            overbought: 70.0,
            oversold: 30.0,
        }
    }
}

impl RsiIndicator {
    pub fn new(period: usize, overbought: f64, oversold: f64) -> Result<Self> {
        if period < 2 {
            return Err(Error::Config(format!("RSI period must be >= 2, got {period}")));
        }
        if !(0.0 < oversold && oversold < overbought && overbought < 100.0) {
            return Err(Error::Config(format!(
                "RSI bands must satisfy 0 < oversold < overbought < 100, got {oversold}/{overbought}"
            )));
        }
        Ok(Self {
            period,
            overbought,
            oversold,
        })
    }

    pub fn period(&self) -> usize {
        self.period
    }

    /// RSI of the closes of `bars` (oldest first).
    pub fn compute(&self, bars: &[Candle]) -> Option<f64> {
        if bars.len() <= self.period {
            return None;
        }
        let n = self.period as f64;
        let mut changes = bars.windows(2).map(|w| w[1].close - w[0].close);

        // Seed with the plain average of the first `period` changes.
        let (mut gain, mut loss) = changes
            .by_ref()
            .take(self.period)
            .fold((0.0, 0.0), |(g, l), c| (g + c.max(0.0), l + (-c).max(0.0)));
        gain /= n;
        loss /= n;

        for c in changes {
            gain = (gain * (n - 1.0) + c.max(0.0)) / n;
            loss = (loss * (n - 1.0) + (-c).max(0.0)) / n;
        }

        Some(match (gain == 0.0, loss == 0.0) {
            (true, true) => 50.0,
            (_, true) => 100.0,
            _ => 100.0 - 100.0 / (1.0 + gain / loss),
        })
    }

    /// Signed strength of a reading: oversold is bullish, overbought bearish.
    /// Touching a band scores ±0.5, the extremes (0 or 100) ±1.0.
    pub fn strength(&self, rsi: f64) -> f64 {
        if rsi <= self.oversold {
            0.5 + 0.5 * (self.oversold - rsi) / self.oversold
        } else if rsi >= self.overbought {
            -(0.5 + 0.5 * (rsi - self.overbought) / (100.0 - self.overbought))
        } else {
            0.0
        }
    }

    /// `strength` of the latest reading, 0 when there is not enough data.
    pub fn score(&self, bars: &[Candle]) -> f64 {
        self.compute(bars).map_or(0.0, |v| self.strength(v))
    }
}
