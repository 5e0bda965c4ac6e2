use common::Candle;

use crate::indicators::RsiIndicator;

use super::helpers::last_index;

pub(super) const TREND_LOOKBACK: usize = 5;
pub(super) const RSI_LOOKBACK: usize = 15;

/// Net direction of the last few close-to-close steps: +1 when every step
/// rises, -1 when every step falls.
pub(super) fn trend(bars: &[Candle]) -> f64 {
    let Some(i) = last_index(bars, TREND_LOOKBACK) else {
        return 0.0;
    };
    let recent = &bars[i + 1 - TREND_LOOKBACK..=i];

    let net: i32 = recent
        .windows(2)
        .map(|w| match w[1].close.partial_cmp(&w[0].close) {
            Some(std::cmp::Ordering::Greater) => 1,
            Some(std::cmp::Ordering::Less) => -1,
            _ => 0,
        })
        .sum();
    net as f64 / (TREND_LOOKBACK - 1) as f64
}

/// Oversold / overbought readings of a 14-period RSI.
pub(super) fn rsi_extremes(bars: &[Candle]) -> f64 {
    RsiIndicator::default().score(bars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognizers::testing::closes;

    #[test]
    fn rising_closes_score_full_uptrend() {
        assert_eq!(trend(&closes(&[1.0, 2.0, 3.0, 4.0, 5.0])), 1.0);
        assert_eq!(trend(&closes(&[5.0, 4.0, 3.0, 2.0, 1.0])), -1.0);
    }

    #[test]
    fn mixed_steps_partially_cancel() {
        assert_eq!(trend(&closes(&[1.0, 2.0, 1.5, 2.5, 3.0])), 0.5);
        assert_eq!(trend(&closes(&[1.0, 1.0, 1.0, 1.0, 1.0])), 0.0);
    }

    #[test]
    fn only_the_trailing_bars_count() {
        assert_eq!(trend(&closes(&[9.0, 8.0, 7.0, 1.0, 2.0, 3.0, 4.0, 5.0])), 1.0);
    }

    #[test]
    fn rsi_extremes_after_selloff() {
        let falling: Vec<f64> = (0..20).map(|i| 100.0 - i as f64).collect();
        assert_eq!(rsi_extremes(&closes(&falling)), 1.0);
        assert_eq!(rsi_extremes(&closes(&falling[..10])), 0.0);
    }
}
