use std::fmt::{Debug, Display};

// -------------------------------------------------------------------------------------------------

/// Provides smooth transitions between a current and target f32 value.
/// Used for gains and lengths which must not jump between two audio frames.
pub trait SmoothedValue: Debug {
    /// Access to the current, possibly ramped value.
    #[must_use]
    fn current(&self) -> f32;
    /// Access to the target value.
    #[must_use]
    fn target(&self) -> f32;

    /// Ramp, if needed, and get the current ramped value, else returns the target value.
    #[must_use]
    fn next(&mut self) -> f32 {
        if self.need_ramp() {
            self.ramp();
            self.current()
        } else {
            self.target()
        }
    }

    /// Test if ramping is necessary.
    #[must_use]
    fn need_ramp(&self) -> bool;
    /// Move current to target value, when ramping is necessary, else does nothing.
    fn ramp(&mut self);

    /// Set current and target to the same value.
    fn init(&mut self, amount: f32);
    /// Set a new target value and ramp current, when current is different from the target.
    fn set_target(&mut self, target: f32);

    /// Update sample rate of the smoothed value. Smoothed values are expected to be called
    /// once per audio frame and the ramping scales with the sample rate.
    fn set_sample_rate(&mut self, sample_rate: u32);
}

impl Display for dyn SmoothedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.need_ramp() {
            f.write_fmt(format_args!("{}(->{})", self.current(), self.target()))
        } else {
            f.write_fmt(format_args!("{})", self.target()))
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Exponential smoothed value, using an inertial one-pole approach.
///
/// The inertia is the one-pole coefficient at the 44.1 kHz reference rate. Other sample rates
/// scale it, so the ramp duration in seconds stays the same.
#[derive(Debug, Clone)]
pub struct ExponentialSmoothedValue {
    current: f32,
    target: f32,
    inertia: f32,
    sample_rate_comp: f32,
}

impl ExponentialSmoothedValue {
    pub const DEFAULT_INERTIA: f32 = 0.02;

    const REFERENCE_SAMPLE_RATE: f32 = 44100.0;

    pub const fn new(value: f32, sample_rate: u32) -> Self {
        Self::with_inertia(value, Self::DEFAULT_INERTIA, sample_rate)
    }

    pub const fn with_inertia(value: f32, inertia: f32, sample_rate: u32) -> Self {
        assert!(inertia > 0.0 && inertia <= 1.0, "Invalid inertia");
        assert!(sample_rate > 0, "Invalid sample rate");

        let sample_rate_comp = Self::REFERENCE_SAMPLE_RATE / sample_rate as f32;
        ExponentialSmoothedValue {
            current: value,
            target: value,
            inertia,
            sample_rate_comp,
        }
    }

    #[inline(always)]
    pub fn inertia(&self) -> f32 {
        self.inertia
    }

    pub fn reset(&mut self) {
        self.init(self.target);
    }

    #[inline(always)]
    fn coefficient(&self) -> f32 {
        (self.inertia * self.sample_rate_comp).min(1.0)
    }
}

impl SmoothedValue for ExponentialSmoothedValue {
    #[inline(always)]
    fn current(&self) -> f32 {
        self.current
    }

    #[inline(always)]
    fn target(&self) -> f32 {
        self.target
    }

    fn need_ramp(&self) -> bool {
        const EPSILON: f32 = f32::EPSILON * 100.0;
        let next = self.current + (self.target - self.current) * self.coefficient();
        (self.current - next).abs() > EPSILON
    }

    fn ramp(&mut self) {
        self.current += (self.target - self.current) * self.coefficient();
        if !self.current.is_finite() {
            // never let a broken target poison the ramp
            self.target = 0.0;
            self.current = 0.0;
        } else if !self.need_ramp() {
            // steps below the epsilon would never arrive
            self.current = self.target;
        }
    }

    fn init(&mut self, amount: f32) {
        self.target = amount;
        self.current = amount;
    }

    fn set_target(&mut self, target: f32) {
        self.target = target;
        if !self.need_ramp() {
            self.current = self.target;
        }
    }

    fn set_sample_rate(&mut self, sample_rate: u32) {
        assert!(sample_rate > 0, "Invalid sample rate");
        self.sample_rate_comp = Self::REFERENCE_SAMPLE_RATE / sample_rate as f32;
    }
}

impl Default for ExponentialSmoothedValue {
    fn default() -> Self {
        Self::new(0.0, 44100)
    }
}

// -------------------------------------------------------------------------------------------------
