//! Measures the interval between external triggers for tap synchronization.

// -------------------------------------------------------------------------------------------------

/// Counts samples between two external triggers. Once an interval got measured, delays and
/// lengths can be snapped to musically related multiples or divisors of it.
///
/// A running counter that exceeds `max_interval` drops the sync: the tapped tempo is considered
/// stale then.
#[derive(Debug, Clone)]
pub struct TapTempo {
    counter: u32,
    interval: u32,
    max_interval: u32,
}

impl TapTempo {
    /// Intervals at or below this many samples never count as synced.
    pub const MIN_INTERVAL: u32 = 128;

    pub fn new(max_interval: u32) -> Self {
        Self {
            counter: 0,
            interval: 0,
            max_interval: max_interval.max(Self::MIN_INTERVAL + 1),
        }
    }

    /// Last measured interval in samples, or 0 when nothing got measured yet.
    pub fn interval(&self) -> u32 {
        self.interval
    }

    /// True when a usable interval got measured and is not stale.
    pub fn is_synced(&self) -> bool {
        self.interval > Self::MIN_INTERVAL && self.interval <= self.max_interval
    }

    /// Advance by a block of `frames` samples. A trigger marks the first sample of the block.
    pub fn tick(&mut self, frames: usize, trigger: bool) {
        if trigger {
            if self.counter > 0 && self.counter <= self.max_interval {
                self.interval = self.counter;
            }
            self.counter = 0;
        }
        self.counter = self.counter.saturating_add(frames as u32);
        if self.counter > self.max_interval {
            // stale tempo
            self.interval = 0;
            self.counter = self.max_interval + 1;
        }
    }

    /// Snap `length` to a multiple of the tapped interval (when longer) or to a power of two
    /// divisor of it (when shorter). Returns `length` unchanged when not synced.
    pub fn quantize(&self, length: f32) -> f32 {
        if !self.is_synced() {
            return length;
        }
        Self::quantize_to(self.interval as f32, length)
    }

    /// Snap `length` to a multiple or power of two divisor of the given `interval`.
    pub fn quantize_to(interval: f32, length: f32) -> f32 {
        if !(length > 0.0 && interval > 0.0) {
            return length;
        }
        if length >= interval {
            (length / interval).round().max(1.0) * interval
        } else {
            let divisor = (interval / length).log2().round().clamp(0.0, 16.0);
            interval / divisor.exp2()
        }
    }

    pub fn reset(&mut self) {
        self.counter = 0;
        self.interval = 0;
    }
}

// -------------------------------------------------------------------------------------------------
