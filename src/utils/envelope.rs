//! Asymmetric slew follower for control values.

/// Tracks a value with separate one-pole coefficients for rising and falling inputs.
///
/// Coefficients are the fraction of the distance to the input covered per call: 1.0 jumps
/// immediately, 0.0 never moves.
#[derive(Debug, Clone)]
pub struct SlewFollower {
    current_value: f32,
    rise_coeff: f32,
    fall_coeff: f32,
}

impl SlewFollower {
    /// Create a new follower with the given rise and fall coefficients.
    pub fn new(rise_coeff: f32, fall_coeff: f32) -> Self {
        let mut follower = Self {
            current_value: 0.0,
            rise_coeff: 0.0,
            fall_coeff: 0.0,
        };
        follower.set_rise(rise_coeff);
        follower.set_fall(fall_coeff);
        follower
    }

    /// Set a new rise coefficient.
    pub fn set_rise(&mut self, coeff: f32) {
        self.rise_coeff = if coeff.is_finite() {
            coeff.clamp(0.0, 1.0)
        } else {
            1.0
        };
    }

    /// Set a new fall coefficient.
    pub fn set_fall(&mut self, coeff: f32) {
        self.fall_coeff = if coeff.is_finite() {
            coeff.clamp(0.0, 1.0)
        } else {
            1.0
        };
    }

    /// Current followed value.
    #[inline]
    pub fn value(&self) -> f32 {
        self.current_value
    }

    /// Process a single input value and return the current followed value.
    pub fn process(&mut self, input: f32) -> f32 {
        let coeff = if input > self.current_value {
            self.rise_coeff
        } else {
            self.fall_coeff
        };
        self.current_value += (input - self.current_value) * coeff;
        if !self.current_value.is_finite() {
            self.current_value = 0.0;
        }
        self.current_value
    }

    /// Reset the follower to the given value.
    pub fn reset(&mut self, value: f32) {
        self.current_value = value;
    }
}

impl Default for SlewFollower {
    fn default() -> Self {
        Self::new(1.0, 1.0)
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rises_faster_than_falls() {
        let mut follower = SlewFollower::new(0.9, 0.2);
        assert!((follower.process(10.0) - 9.0).abs() < 1e-5);
        assert!((follower.process(10.0) - 9.9).abs() < 1e-5);
        // falling: 9.9 + (0 - 9.9) * 0.2
        assert!((follower.process(0.0) - 7.92).abs() < 1e-4);
    }

    #[test]
    fn recovers_from_non_finite_input() {
        let mut follower = SlewFollower::new(0.5, 0.5);
        follower.process(f32::NAN);
        assert_eq!(follower.value(), 0.0);
        follower.reset(2.0);
        assert_eq!(follower.value(), 2.0);
    }
}
