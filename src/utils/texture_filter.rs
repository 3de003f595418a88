//! Stereo tone control driven by a single "texture" value.

use super::filter::svf::{SvfFilter, SvfFilterType};

// -------------------------------------------------------------------------------------------------

/// Lowpass for texture values below 0.5, highpass at and above. Both sides are transparent
/// around the center and close down towards 0.0 and 1.0.
///
/// Crossing the center resets the filter state, so energy of the old response does not click
/// into the new one.
#[derive(Debug, Clone)]
pub struct TextureFilter {
    sample_rate: u32,
    filter_type: SvfFilterType,
    filters: [SvfFilter; 2],
}

impl TextureFilter {
    const Q: f32 = 0.707;
    const MIN_CUTOFF: f32 = 20.0;

    pub fn new(sample_rate: u32) -> Self {
        let mut filter = Self {
            sample_rate,
            filter_type: SvfFilterType::Lowpass,
            filters: [SvfFilter::default(), SvfFilter::default()],
        };
        filter.update(0.5);
        filter
    }

    /// Filter type and cutoff frequency in Hz for the given texture.
    pub fn response(sample_rate: u32, texture: f32) -> (SvfFilterType, f32) {
        let texture = texture.clamp(0.0, 1.0);
        let (filter_type, amount) = if texture < 0.5 {
            (SvfFilterType::Lowpass, 2.0 * texture)
        } else {
            (SvfFilterType::Highpass, 2.0 * (texture - 0.5))
        };
        let max_cutoff = sample_rate as f32 * 0.45;
        let cutoff = (Self::MIN_CUTOFF * 1000.0_f32.powf(amount)).min(max_cutoff);
        (filter_type, cutoff)
    }

    /// Apply a new texture value. Called once per block.
    pub fn update(&mut self, texture: f32) {
        let (filter_type, cutoff) = Self::response(self.sample_rate, texture);
        if filter_type != self.filter_type {
            self.reset();
            self.filter_type = filter_type;
        }
        for filter in &mut self.filters {
            if let Err(err) = filter.set(filter_type, self.sample_rate, cutoff, Self::Q) {
                log::warn!("Failed to update texture filter: {err}");
            }
        }
    }

    /// Filter a stereo block in place.
    pub fn process(&mut self, left: &mut [f32], right: &mut [f32]) {
        let [left_filter, right_filter] = &mut self.filters;
        for sample in left.iter_mut() {
            *sample = left_filter.process_sample(*sample as f64) as f32;
        }
        for sample in right.iter_mut() {
            *sample = right_filter.process_sample(*sample as f64) as f32;
        }
    }

    pub fn reset(&mut self) {
        for filter in &mut self.filters {
            filter.reset();
        }
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cutoff_mapping() {
        let (filter_type, cutoff) = TextureFilter::response(48000, 0.0);
        assert_eq!(filter_type, SvfFilterType::Lowpass);
        assert!((cutoff - 20.0).abs() < 1e-3);

        let (filter_type, cutoff) = TextureFilter::response(48000, 0.25);
        assert_eq!(filter_type, SvfFilterType::Lowpass);
        assert!((cutoff - 632.46).abs() < 0.1);

        let (filter_type, cutoff) = TextureFilter::response(48000, 0.5);
        assert_eq!(filter_type, SvfFilterType::Highpass);
        assert!((cutoff - 20.0).abs() < 1e-3);

        // clamped below nyquist
        let (_, cutoff) = TextureFilter::response(22050, 1.0);
        assert!(cutoff < 11025.0);
    }

    #[test]
    fn center_is_nearly_transparent() {
        let mut filter = TextureFilter::new(44100);
        filter.update(0.499);
        let mut left = vec![0.0; 4096];
        let mut right = vec![0.0; 4096];
        for (i, (l, r)) in left.iter_mut().zip(right.iter_mut()).enumerate() {
            let value = (i as f32 * 2.0 * std::f32::consts::PI * 1000.0 / 44100.0).sin();
            *l = value;
            *r = value;
        }
        let input = left.clone();
        filter.process(&mut left, &mut right);
        let error = left[2048..]
            .iter()
            .zip(&input[2048..])
            .map(|(a, b)| (a - b).abs())
            .fold(0.0_f32, f32::max);
        // 1 kHz is far below the ~19.6 kHz cutoff: only a small phase shift remains
        assert!(error < 0.2, "error {error}");
        assert_eq!(left, right);
    }

    #[test]
    fn crossing_center_resets_state() {
        let mut filter = TextureFilter::new(44100);
        filter.update(0.1);
        let mut left = vec![1.0; 64];
        let mut right = vec![1.0; 64];
        filter.process(&mut left, &mut right);
        filter.update(0.9);
        let mut left = vec![0.0; 1];
        let mut right = vec![0.0; 1];
        filter.process(&mut left, &mut right);
        assert_eq!(left[0], 0.0);
        assert_eq!(right[0], 0.0);
    }
}
