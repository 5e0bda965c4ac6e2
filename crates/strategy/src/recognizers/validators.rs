use common::Candle;

/// Confirms that a reversal pattern appears after the trend it reverses.
///
/// The average close of the latest `factor + skip` bars is compared with the
/// average close of the `4 * factor` bars before them: a bullish reading needs
/// the recent average below the earlier one, a bearish reading above it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrendValidator {
    factor: usize,
    skip: usize,
}

impl TrendValidator {
    pub const REVERSAL: Self = Self { factor: 1, skip: 0 };
    pub const LONG_REVERSAL: Self = Self { factor: 2, skip: 0 };
    pub const REVERSAL_SKIP_1: Self = Self { factor: 1, skip: 1 };
    pub const REVERSAL_SKIP_3: Self = Self { factor: 1, skip: 3 };

    /// Bars needed before the validator can say anything.
    pub fn required_bars(&self) -> usize {
        5 * self.factor + self.skip
    }

    pub fn confirms(&self, strength: f64, bars: &[Candle]) -> bool {
        let n = bars.len();
        if n < self.required_bars() || strength == 0.0 {
            return false;
        }

        let recent_start = n - self.factor - self.skip;
        let earlier_start = recent_start - 4 * self.factor;
        let recent = mean_close(&bars[recent_start..]);
        let earlier = mean_close(&bars[earlier_start..recent_start]);

        if strength > 0.0 {
            recent < earlier
        } else {
            recent > earlier
        }
    }
}

fn mean_close(bars: &[Candle]) -> f64 {
    bars.iter().map(|c| c.close).sum::<f64>() / bars.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognizers::testing::closes;

    #[test]
    fn bullish_needs_prior_decline() {
        let falling = closes(&[10.0, 9.0, 8.0, 7.0, 6.0]);
        assert!(TrendValidator::REVERSAL.confirms(1.0, &falling));
        assert!(!TrendValidator::REVERSAL.confirms(-1.0, &falling));
    }

    #[test]
    fn bearish_needs_prior_advance() {
        let rising = closes(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert!(TrendValidator::REVERSAL_SKIP_1.confirms(-1.0, &rising));
        assert!(!TrendValidator::REVERSAL_SKIP_1.confirms(1.0, &rising));
    }

    #[test]
    fn too_short_never_confirms() {
        let bars = closes(&[10.0, 9.0, 8.0]);
        assert!(!TrendValidator::LONG_REVERSAL.confirms(1.0, &bars));
        assert_eq!(TrendValidator::LONG_REVERSAL.required_bars(), 10);
        assert_eq!(TrendValidator::REVERSAL_SKIP_3.required_bars(), 8);
    }
}
