//! Three- and four-candle continuation and reversal formations.

use common::Candle;

use super::helpers::{
    body_gap_down, body_gap_up, is_doji, is_long_body, is_shadow_very_short, is_short_body,
    last_index, STAR_PENETRATION,
};

/// Long black, short star gapping down, white bar closing well into the first body.
pub(super) fn morning_star(bars: &[Candle]) -> f64 {
    star(bars, false, 1.0)
}

/// Long white, short star gapping up, black bar closing well into the first body.
pub(super) fn evening_star(bars: &[Candle]) -> f64 {
    star(bars, false, -1.0)
}

pub(super) fn morning_doji_star(bars: &[Candle]) -> f64 {
    star(bars, true, 1.0)
}

pub(super) fn evening_doji_star(bars: &[Candle]) -> f64 {
    star(bars, true, -1.0)
}

fn star(bars: &[Candle], doji: bool, direction: f64) -> f64 {
    let Some(i) = last_index(bars, 3) else {
        return 0.0;
    };
    let (first, middle, third) = (&bars[i - 2], &bars[i - 1], &bars[i]);

    let middle_ok = if doji {
        is_doji(bars, i - 1)
    } else {
        is_short_body(bars, i - 1)
    };
    if !is_long_body(bars, i - 2) || !middle_ok {
        return 0.0;
    }

    let penetration = first.body() * STAR_PENETRATION;
    let matched = if direction > 0.0 {
        first.is_bearish()
            && body_gap_down(first, middle)
            && third.is_bullish()
            && third.close > first.close + penetration
    } else {
        first.is_bullish()
            && body_gap_up(first, middle)
            && third.is_bearish()
            && third.close < first.close - penetration
    };

    if matched {
        direction
    } else {
        0.0
    }
}

/// Star pattern whose doji gaps completely (shadows included) away from both
/// neighbours.
pub(super) fn abandoned_baby(bars: &[Candle]) -> f64 {
    let Some(i) = last_index(bars, 3) else {
        return 0.0;
    };
    let (first, baby, third) = (&bars[i - 2], &bars[i - 1], &bars[i]);

    if !is_long_body(bars, i - 2) || !is_doji(bars, i - 1) {
        return 0.0;
    }
    let penetration = first.body() * STAR_PENETRATION;

    if first.is_bearish()
        && baby.high < first.low
        && third.is_bullish()
        && third.low > baby.high
        && third.close > first.close + penetration
    {
        return 1.0;
    }
    if first.is_bullish()
        && baby.low > first.high
        && third.is_bearish()
        && third.high < baby.low
        && third.close < first.close - penetration
    {
        return -1.0;
    }
    0.0
}

/// Three rising white bars, each opening inside the previous body and closing
/// near its high.
pub(super) fn three_white_soldiers(bars: &[Candle]) -> f64 {
    let Some(i) = last_index(bars, 3) else {
        return 0.0;
    };
    let run = &bars[i - 2..=i];

    let all_white = run.iter().all(Candle::is_bullish);
    let rising = run.windows(2).all(|w| w[1].close > w[0].close);
    let opens_inside = run
        .windows(2)
        .all(|w| w[1].open > w[0].open && w[1].open <= w[0].close);
    let short_uppers = (i - 2..=i).all(|k| is_shadow_very_short(bars[k].upper_shadow(), bars, k));

    if all_white && rising && opens_inside && short_uppers {
        1.0
    } else {
        0.0
    }
}

/// Three falling black bars, each opening inside the previous body and closing
/// near its low.
pub(super) fn three_black_crows(bars: &[Candle]) -> f64 {
    let Some(i) = last_index(bars, 3) else {
        return 0.0;
    };
    let run = &bars[i - 2..=i];

    let all_black = run.iter().all(Candle::is_bearish);
    let falling = run.windows(2).all(|w| w[1].close < w[0].close);
    let opens_inside = run
        .windows(2)
        .all(|w| w[1].open < w[0].open && w[1].open >= w[0].close);
    let short_lowers = (i - 2..=i).all(|k| is_shadow_very_short(bars[k].lower_shadow(), bars, k));

    if all_black && falling && opens_inside && short_lowers {
        -1.0
    } else {
        0.0
    }
}

/// Harami followed by a confirmation close beyond the first bar's open.
pub(super) fn three_inside(bars: &[Candle]) -> f64 {
    let Some(i) = last_index(bars, 3) else {
        return 0.0;
    };
    let (first, second, third) = (&bars[i - 2], &bars[i - 1], &bars[i]);

    let harami = is_long_body(bars, i - 2)
        && is_short_body(bars, i - 1)
        && second.body_top() < first.body_top()
        && second.body_bottom() > first.body_bottom();
    if !harami {
        return 0.0;
    }

    if first.is_bearish() && third.is_bullish() && third.close > first.open {
        1.0
    } else if first.is_bullish() && third.is_bearish() && third.close < first.open {
        -1.0
    } else {
        0.0
    }
}

/// Engulfing pair followed by a third bar closing further in the same direction.
pub(super) fn three_outside(bars: &[Candle]) -> f64 {
    let Some(i) = last_index(bars, 3) else {
        return 0.0;
    };
    let (first, second, third) = (&bars[i - 2], &bars[i - 1], &bars[i]);

    let engulfs = second.body_top() > first.body_top() && second.body_bottom() < first.body_bottom();
    if !engulfs {
        return 0.0;
    }

    if first.is_bearish() && second.is_bullish() && third.close > second.close {
        1.0
    } else if first.is_bullish() && second.is_bearish() && third.close < second.close {
        -1.0
    } else {
        0.0
    }
}

/// Three same-colour bars marching one way, then a fourth opening beyond the
/// third close and wiping out the whole run. Sign follows the run's colour.
pub(super) fn three_line_strike(bars: &[Candle]) -> f64 {
    let Some(i) = last_index(bars, 4) else {
        return 0.0;
    };
    let run = &bars[i - 3..i];
    let strike = &bars[i];

    let opens_inside = run.windows(2).all(|w| {
        w[1].open >= w[0].body_bottom() && w[1].open <= w[0].body_top()
    });
    if !opens_inside {
        return 0.0;
    }

    let white_run = run.iter().all(Candle::is_bullish) && run.windows(2).all(|w| w[1].close > w[0].close);
    if white_run && strike.is_bearish() && strike.open > run[2].close && strike.close < run[0].open {
        return 1.0;
    }

    let black_run = run.iter().all(Candle::is_bearish) && run.windows(2).all(|w| w[1].close < w[0].close);
    if black_run && strike.is_bullish() && strike.open < run[2].close && strike.close > run[0].open {
        return -1.0;
    }
    0.0
}

/// Long white bar, black bar gapping up, second black bar closing inside the
/// white body.
pub(super) fn two_crows(bars: &[Candle]) -> f64 {
    let Some(i) = last_index(bars, 3) else {
        return 0.0;
    };
    let (first, second, third) = (&bars[i - 2], &bars[i - 1], &bars[i]);

    if first.is_bullish()
        && is_long_body(bars, i - 2)
        && second.is_bearish()
        && body_gap_up(first, second)
        && third.is_bearish()
        && third.open < second.open
        && third.open > second.close
        && third.close > first.open
        && third.close < first.close
    {
        -1.0
    } else {
        0.0
    }
}

/// Long white bar, small black bar gapping up, larger black bar engulfing it
/// while still holding the gap above the white close.
pub(super) fn upside_gap_two_crows(bars: &[Candle]) -> f64 {
    let Some(i) = last_index(bars, 3) else {
        return 0.0;
    };
    let (first, second, third) = (&bars[i - 2], &bars[i - 1], &bars[i]);

    if first.is_bullish()
        && is_long_body(bars, i - 2)
        && second.is_bearish()
        && is_short_body(bars, i - 1)
        && body_gap_up(first, second)
        && third.is_bearish()
        && third.open > second.open
        && third.close < second.close
        && third.close > first.close
    {
        -1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognizers::testing::bar;

    #[test]
    fn morning_star_and_doji_variant() {
        let star = vec![
            bar(0, 110.0, 110.5, 99.5, 100.0),
            bar(1, 98.0, 98.6, 96.5, 97.0),
            bar(2, 99.0, 106.5, 98.5, 106.0),
        ];
        assert_eq!(morning_star(&star), 1.0);
        assert_eq!(morning_doji_star(&star), 0.0);

        let doji = vec![
            bar(0, 110.0, 110.5, 99.5, 100.0),
            bar(1, 97.0, 98.0, 96.0, 97.1),
            bar(2, 99.0, 106.5, 98.5, 106.0),
        ];
        assert_eq!(morning_doji_star(&doji), 1.0);
    }

    #[test]
    fn evening_star() {
        let bars = vec![
            bar(0, 100.0, 110.5, 99.5, 110.0),
            bar(1, 112.0, 113.5, 111.4, 113.0),
            bar(2, 111.0, 111.5, 103.5, 104.0),
        ];
        assert_eq!(super::evening_star(&bars), -1.0);
        assert_eq!(morning_star(&bars), 0.0);
    }

    #[test]
    fn abandoned_baby_needs_shadow_gaps() {
        let bars = vec![
            bar(0, 110.0, 110.5, 99.5, 100.0),
            bar(1, 97.0, 98.0, 96.0, 97.05),
            bar(2, 99.0, 106.5, 98.5, 106.0),
        ];
        assert_eq!(abandoned_baby(&bars), 1.0);

        let touching = vec![
            bar(0, 110.0, 110.5, 99.5, 100.0),
            bar(1, 97.0, 99.6, 96.0, 97.05),
            bar(2, 99.0, 106.5, 98.5, 106.0),
        ];
        assert_eq!(abandoned_baby(&touching), 0.0);
    }

    #[test]
    fn soldiers_and_crows() {
        let soldiers = vec![
            bar(0, 100.0, 104.1, 99.8, 104.0),
            bar(1, 102.0, 106.1, 101.8, 106.0),
            bar(2, 104.0, 108.1, 103.8, 108.0),
        ];
        assert_eq!(three_white_soldiers(&soldiers), 1.0);
        assert_eq!(three_black_crows(&soldiers), 0.0);

        let crows = vec![
            bar(0, 108.0, 108.2, 103.9, 104.0),
            bar(1, 106.0, 106.2, 101.9, 102.0),
            bar(2, 104.0, 104.2, 99.9, 100.0),
        ];
        assert_eq!(three_black_crows(&crows), -1.0);
    }

    #[test]
    fn three_inside_up() {
        let bars = vec![
            bar(0, 110.0, 110.5, 99.5, 100.0),
            bar(1, 103.0, 105.0, 102.0, 104.0),
            bar(2, 104.0, 112.5, 103.5, 112.0),
        ];
        assert_eq!(three_inside(&bars), 1.0);
    }

    #[test]
    fn three_outside_down() {
        let bars = vec![
            bar(0, 100.0, 104.5, 99.5, 104.0),
            bar(1, 105.0, 105.5, 98.5, 99.0),
            bar(2, 99.0, 99.5, 95.5, 96.0),
        ];
        assert_eq!(three_outside(&bars), -1.0);
    }

    #[test]
    fn three_line_strike_after_white_run() {
        let bars = vec![
            bar(0, 100.0, 104.5, 99.5, 104.0),
            bar(1, 102.0, 107.5, 101.5, 107.0),
            bar(2, 105.0, 110.5, 104.5, 110.0),
            bar(3, 111.0, 111.5, 98.5, 99.0),
        ];
        assert_eq!(three_line_strike(&bars), 1.0);
    }

    #[test]
    fn crows_patterns() {
        let two = vec![
            bar(0, 100.0, 110.5, 99.5, 110.0),
            bar(1, 114.0, 114.5, 111.5, 112.0),
            bar(2, 113.0, 113.5, 104.5, 105.0),
        ];
        assert_eq!(two_crows(&two), -1.0);

        let upside = vec![
            bar(0, 100.0, 110.5, 99.5, 110.0),
            bar(1, 113.0, 113.5, 111.5, 112.0),
            bar(2, 114.0, 114.5, 110.5, 111.0),
        ];
        assert_eq!(upside_gap_two_crows(&upside), -1.0);
    }

    #[test]
    fn short_windows_are_neutral() {
        let two = vec![bar(0, 1.0, 2.0, 0.5, 1.5), bar(1, 1.5, 2.5, 1.0, 2.0)];
        assert_eq!(morning_star(&two), 0.0);
        assert_eq!(three_line_strike(&two), 0.0);
    }
}
