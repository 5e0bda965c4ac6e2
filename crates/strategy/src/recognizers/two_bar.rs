use common::Candle;

use super::helpers::{is_long_body, last_index, CLOUD_PENETRATION};

/// Second body engulfs the first, opposite colour. Sign follows the second bar.
pub(super) fn engulfing(bars: &[Candle]) -> f64 {
    let Some(i) = last_index(bars, 2) else {
        return 0.0;
    };
    let (first, second) = (&bars[i - 1], &bars[i]);

    if first.is_bearish()
        && second.is_bullish()
        && ((second.close >= first.open && second.open < first.close)
            || (second.close > first.open && second.open <= first.close))
    {
        return 1.0;
    }
    if first.is_bullish()
        && second.is_bearish()
        && ((second.open >= first.close && second.close < first.open)
            || (second.open > first.close && second.close <= first.open))
    {
        return -1.0;
    }
    0.0
}

/// Long white bar followed by a black bar opening above its high and closing
/// deep into its body.
pub(super) fn dark_cloud_cover(bars: &[Candle]) -> f64 {
    let Some(i) = last_index(bars, 2) else {
        return 0.0;
    };
    let (first, second) = (&bars[i - 1], &bars[i]);

    if first.is_bullish()
        && is_long_body(bars, i - 1)
        && second.is_bearish()
        && second.open > first.high
        && second.close > first.open
        && second.close < first.close - first.body() * CLOUD_PENETRATION
    {
        -1.0
    } else {
        0.0
    }
}
