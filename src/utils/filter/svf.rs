use std::f64;

use crate::Error;

// -------------------------------------------------------------------------------------------------

/// Available filter types for the State Variable Filter.
#[derive(Default, Clone, Copy, PartialEq, Eq, Debug, strum::Display)]
pub enum SvfFilterType {
    #[default]
    Lowpass,
    Highpass,
}

// -------------------------------------------------------------------------------------------------

/// The coefficients that hold parameters and necessary data to process the filter.
#[derive(Default, Clone, PartialEq, Debug)]
pub struct SvfCoefficients {
    filter_type: SvfFilterType,
    sample_rate: u32,
    cutoff: f32,
    q: f32,
    a1: f64,
    a2: f64,
    a3: f64,
    m0: f64,
    m1: f64,
    m2: f64,
}

impl SvfCoefficients {
    /// Get currently applied filter type.
    pub fn filter_type(&self) -> SvfFilterType {
        self.filter_type
    }

    /// Get currently applied sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// The frequency in Hz where the cutoff of the filter is.
    pub fn cutoff(&self) -> f32 {
        self.cutoff
    }

    /// The resonance of the filter.
    pub fn q(&self) -> f32 {
        self.q
    }

    /// Sets and applies a batch of new filter parameters.
    pub fn set(
        &mut self,
        filter_type: SvfFilterType,
        sample_rate: u32,
        cutoff: f32,
        q: f32,
    ) -> Result<(), Error> {
        if self.filter_type != filter_type
            || self.sample_rate != sample_rate
            || self.cutoff != cutoff
            || self.q != q
        {
            self.filter_type = filter_type;
            self.sample_rate = sample_rate;
            self.cutoff = cutoff;
            self.q = q;
            self.apply()
        } else {
            Ok(())
        }
    }

    fn apply(&mut self) -> Result<(), Error> {
        if self.sample_rate == 0 {
            return Err(Error::ParameterError(
                "Invalid filter sample-rate: must be > 0".to_string(),
            ));
        }
        if !(self.q > 0.0) {
            return Err(Error::ParameterError(format!(
                "Invalid filter Q: must be > 0, but is {q}",
                q = self.q
            )));
        }
        let nyquist = self.sample_rate as f32 / 2.0;
        if !(self.cutoff > 0.0 && self.cutoff < nyquist) {
            return Err(Error::ParameterError(format!(
                "Invalid filter frequency: must be in range (0, {nyquist}), but is {f}",
                f = self.cutoff
            )));
        }
        let g = f64::tan(f64::consts::PI * self.cutoff as f64 / self.sample_rate as f64);
        let k = 1.0 / self.q as f64;
        self.a1 = 1.0 / (1.0 + g * (g + k));
        self.a2 = g * self.a1;
        self.a3 = g * self.a2;
        match self.filter_type {
            SvfFilterType::Lowpass => {
                self.m0 = 0.0;
                self.m1 = 0.0;
                self.m2 = 1.0;
            }
            SvfFilterType::Highpass => {
                self.m0 = 1.0;
                self.m1 = -k;
                self.m2 = -1.0;
            }
        }
        Ok(())
    }
}

// -------------------------------------------------------------------------------------------------

/// State variable filter (SVF), designed by Andrew Simper of Cytomic.
/// See <http://cytomic.com/files/dsp/SvfLinearTrapOptimised2.pdf>
///
/// Second-order, 12 dB/octave. Stable when modulated at high rates, which matters here as the
/// texture parameter may sweep the cutoff every block.
#[derive(Default, Clone, Debug)]
pub struct SvfFilter {
    coefficients: SvfCoefficients,
    ic1eq: f64,
    ic2eq: f64,
}

impl SvfFilter {
    /// Create a filter with an initial response.
    pub fn new(
        filter_type: SvfFilterType,
        sample_rate: u32,
        cutoff: f32,
        q: f32,
    ) -> Result<Self, Error> {
        let mut svf = Self::default();
        svf.set(filter_type, sample_rate, cutoff, q)?;
        Ok(svf)
    }

    /// Apply the filter on a single sample.
    ///
    /// A non-finite result resets the filter state and yields silence.
    #[inline]
    pub fn process_sample(&mut self, input: f64) -> f64 {
        let v0 = input;
        let v3 = v0 - self.ic2eq;
        let v1 = self.coefficients.a1 * self.ic1eq + self.coefficients.a2 * v3;
        let v2 = self.ic2eq + self.coefficients.a2 * self.ic1eq + self.coefficients.a3 * v3;
        self.ic1eq = 2.0 * v1 - self.ic1eq;
        self.ic2eq = 2.0 * v2 - self.ic2eq;
        let output =
            self.coefficients.m0 * v0 + self.coefficients.m1 * v1 + self.coefficients.m2 * v2;
        if output.is_finite() {
            output
        } else {
            self.reset();
            0.0
        }
    }

    /// Reset state of filter.
    #[inline]
    pub fn reset(&mut self) {
        self.ic1eq = 0.0;
        self.ic2eq = 0.0;
    }

    /// Set new filter parameters.
    #[inline]
    pub fn set(
        &mut self,
        filter_type: SvfFilterType,
        sample_rate: u32,
        cutoff: f32,
        q: f32,
    ) -> Result<(), Error> {
        self.coefficients.set(filter_type, sample_rate, cutoff, q)
    }

    /// Get a reference to the coefficients.
    pub fn coefficients(&self) -> &SvfCoefficients {
        &self.coefficients
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowpass_passes_dc() {
        let mut filter = SvfFilter::new(SvfFilterType::Lowpass, 44100, 1000.0, 0.707).unwrap();
        let mut output = 0.0;
        for _ in 0..10000 {
            output = filter.process_sample(0.5);
        }
        assert!((output - 0.5).abs() < 1e-6);
    }

    #[test]
    fn highpass_blocks_dc() {
        let mut filter = SvfFilter::new(SvfFilterType::Highpass, 44100, 100.0, 0.707).unwrap();
        let mut output = 1.0;
        for _ in 0..44100 {
            output = filter.process_sample(0.5);
        }
        assert!(output.abs() < 1e-4);
    }

    #[test]
    fn invalid_settings() {
        assert!(SvfFilter::new(SvfFilterType::Lowpass, 0, 1000.0, 0.707).is_err());
        assert!(SvfFilter::new(SvfFilterType::Lowpass, 44100, 30000.0, 0.707).is_err());
        assert!(SvfFilter::new(SvfFilterType::Lowpass, 44100, 1000.0, 0.0).is_err());
        assert!(SvfFilter::new(SvfFilterType::Lowpass, 44100, f32::NAN, 0.707).is_err());
    }

    #[test]
    fn non_finite_input_resets_state() {
        let mut filter = SvfFilter::new(SvfFilterType::Lowpass, 44100, 1000.0, 0.707).unwrap();
        filter.process_sample(1.0);
        assert_eq!(filter.process_sample(f64::NAN), 0.0);
        assert_eq!(filter.process_sample(0.0), 0.0);
    }
}
