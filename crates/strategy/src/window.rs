use common::{Candle, Error, Result};

/// Fixed-capacity rolling window of closed candles for one pair/interval.
///
/// Candles must arrive with strictly increasing `open_time`; the oldest bar is
/// evicted once the window is full.
///
/// Evicted bars stay in the buffer until `capacity` of them have piled up and
/// are then dropped in one move, so the live bars are always one slice.
#[derive(Debug, Clone)]
pub struct CandleWindow {
    candles: Vec<Candle>,
    /// Index of the oldest live bar.
    start: usize,
    capacity: usize,
}

impl CandleWindow {
    /// # Panics
    /// If `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Candle window capacity must be > 0");
        Self {
            candles: Vec::with_capacity(capacity.saturating_mul(2)),
            start: 0,
            capacity,
        }
    }

    /// Append a closed candle. Fails with `Error::OutOfOrder` (leaving the
    /// window untouched) when `open_time` does not advance.
    pub fn append(&mut self, candle: Candle) -> Result<()> {
        if let Some(last) = self.last() {
            if candle.open_time <= last.open_time {
                return Err(Error::OutOfOrder {
                    candle_time: candle.open_time,
                    last_time: last.open_time,
                });
            }
        }

        self.candles.push(candle);
        if self.len() > self.capacity {
            self.start += 1;
        }
        if self.start >= self.capacity {
            self.candles.drain(..self.start);
            self.start = 0;
        }
        Ok(())
    }

    /// Ordered view of the window, oldest first.
    pub fn snapshot(&self) -> &[Candle] {
        &self.candles[self.start..]
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    pub fn len(&self) -> usize {
        self.candles.len() - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
