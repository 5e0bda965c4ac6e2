//! One-candle reversal shapes. Each reads the previous bar for context.

use common::Candle;

use super::helpers::{
    is_doji, is_shadow_very_short, is_short_body, last_index, near, avg_range,
};

/// Small body at the top of the range with a long lower shadow, printed at or
/// below the previous bar's low.
pub(super) fn hammer(bars: &[Candle]) -> f64 {
    let Some(i) = last_index(bars, 2) else {
        return 0.0;
    };
    let (prev, c) = (&bars[i - 1], &bars[i]);

    if has_hammer_shape(bars, i) && c.body_bottom() <= prev.low + near(bars, i) {
        1.0
    } else {
        0.0
    }
}

/// Same shape as the hammer, printed at or above the previous bar's high.
pub(super) fn hanging_man(bars: &[Candle]) -> f64 {
    let Some(i) = last_index(bars, 2) else {
        return 0.0;
    };
    let (prev, c) = (&bars[i - 1], &bars[i]);

    if has_hammer_shape(bars, i) && c.body_bottom() >= prev.high - near(bars, i) {
        -1.0
    } else {
        0.0
    }
}

/// Small body at the bottom of the range with a long upper shadow, gapping up
/// from the previous body.
pub(super) fn shooting_star(bars: &[Candle]) -> f64 {
    let Some(i) = last_index(bars, 2) else {
        return 0.0;
    };
    let (prev, c) = (&bars[i - 1], &bars[i]);

    let long_upper = c.upper_shadow() > 0.0 && c.upper_shadow() > 2.0 * c.body();
    if is_short_body(bars, i)
        && long_upper
        && is_shadow_very_short(c.lower_shadow(), bars, i)
        && c.body_bottom() > prev.body_top()
    {
        -1.0
    } else {
        0.0
    }
}

/// Doji with no upper shadow and a visible lower shadow.
pub(super) fn dragonfly_doji(bars: &[Candle]) -> f64 {
    let Some(i) = last_index(bars, 1) else {
        return 0.0;
    };
    let c = &bars[i];

    if is_doji(bars, i)
        && is_shadow_very_short(c.upper_shadow(), bars, i)
        && c.lower_shadow() > 0.1 * avg_range(bars, i)
    {
        1.0
    } else {
        0.0
    }
}

fn has_hammer_shape(bars: &[Candle], i: usize) -> bool {
    let c = &bars[i];
    let long_lower = c.lower_shadow() > 0.0 && c.lower_shadow() > 2.0 * c.body();
    is_short_body(bars, i) && long_lower && is_shadow_very_short(c.upper_shadow(), bars, i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognizers::testing::bar;

    #[test]
    fn hammer_below_previous_low() {
        let bars = vec![bar(0, 105.0, 106.0, 100.0, 101.0), bar(1, 99.5, 100.0, 95.0, 100.0)];
        assert_eq!(hammer(&bars), 1.0);
        assert_eq!(hanging_man(&bars), 0.0);
    }

    #[test]
    fn hanging_man_above_previous_high() {
        let bars = vec![bar(0, 100.0, 104.0, 99.0, 103.0), bar(1, 104.5, 105.0, 100.0, 105.0)];
        assert_eq!(hanging_man(&bars), -1.0);
        assert_eq!(hammer(&bars), 0.0);
    }

    #[test]
    fn shooting_star_gaps_up() {
        let bars = vec![bar(0, 100.0, 104.0, 99.0, 103.0), bar(1, 104.0, 110.0, 104.0, 104.5)];
        assert_eq!(shooting_star(&bars), -1.0);
    }

    #[test]
    fn dragonfly_doji_needs_lower_shadow() {
        let dragonfly = vec![bar(0, 100.0, 100.05, 95.0, 100.0)];
        assert_eq!(dragonfly_doji(&dragonfly), 1.0);

        let flat = vec![bar(0, 100.0, 100.0, 100.0, 100.0)];
        assert_eq!(dragonfly_doji(&flat), 0.0);
    }

    #[test]
    fn too_few_bars_is_neutral() {
        assert_eq!(hammer(&[]), 0.0);
        assert_eq!(hanging_man(&[bar(0, 1.0, 1.0, 0.5, 1.0)]), 0.0);
    }
}
