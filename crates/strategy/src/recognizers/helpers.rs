//! Shape thresholds shared by the candlestick recognizers.
//!
//! Body and shadow sizes are judged against the average high-low range of the
//! trailing bars (current bar included), so the same pattern is recognized at
//! any price scale.

use common::Candle;

const RANGE_PERIOD: usize = 10;

const BODY_LONG: f64 = 0.5;
const BODY_SHORT: f64 = 0.3;
const BODY_DOJI: f64 = 0.1;
const SHADOW_VERY_SHORT: f64 = 0.1;
const NEAR: f64 = 0.2;

/// Penetration into the first body required by star patterns.
pub(super) const STAR_PENETRATION: f64 = 0.3;
/// Penetration into the first body required by dark cloud cover.
pub(super) const CLOUD_PENETRATION: f64 = 0.5;

/// Index of the last bar if at least `needed` bars are present.
pub(super) fn last_index(bars: &[Candle], needed: usize) -> Option<usize> {
    if needed == 0 || bars.len() < needed {
        None
    } else {
        Some(bars.len() - 1)
    }
}

pub(super) fn avg_range(bars: &[Candle], i: usize) -> f64 {
    let start = (i + 1).saturating_sub(RANGE_PERIOD);
    let slice = &bars[start..=i];
    slice.iter().map(Candle::range).sum::<f64>() / slice.len() as f64
}

pub(super) fn is_long_body(bars: &[Candle], i: usize) -> bool {
    let body = bars[i].body();
    body > 0.0 && body >= BODY_LONG * avg_range(bars, i)
}

pub(super) fn is_short_body(bars: &[Candle], i: usize) -> bool {
    bars[i].body() <= BODY_SHORT * avg_range(bars, i)
}

pub(super) fn is_doji(bars: &[Candle], i: usize) -> bool {
    bars[i].body() <= BODY_DOJI * avg_range(bars, i)
}

pub(super) fn is_shadow_very_short(shadow: f64, bars: &[Candle], i: usize) -> bool {
    shadow <= SHADOW_VERY_SHORT * avg_range(bars, i)
}

pub(super) fn near(bars: &[Candle], i: usize) -> f64 {
    NEAR * avg_range(bars, i)
}

/// Real-body gap up: the whole body of `later` sits above the body of `earlier`.
pub(super) fn body_gap_up(earlier: &Candle, later: &Candle) -> bool {
    later.body_bottom() > earlier.body_top()
}

pub(super) fn body_gap_down(earlier: &Candle, later: &Candle) -> bool {
    later.body_top() < earlier.body_bottom()
}
