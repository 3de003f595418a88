//! Per-block control values shared by all playback engines.

use crate::utils::finite_or;

// -------------------------------------------------------------------------------------------------

/// Selects which engine a [`TextureVoice`](crate::TextureVoice) drives.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    strum::EnumString,
    strum::Display,
    strum::VariantNames,
    strum::FromRepr,
)]
#[repr(u8)]
pub enum PlaybackMode {
    /// Overlapping enveloped grains.
    #[default]
    Granular = 0,
    /// Pitch independent time stretching (WSOLA).
    Stretch = 1,
    /// Tape-scrub delay, or a pitchable loop while frozen.
    Looping = 2,
}

impl PlaybackMode {
    /// Map a host index to a mode. Unknown indices fall back to [`PlaybackMode::Granular`].
    pub fn from_index(index: usize) -> Self {
        u8::try_from(index)
            .ok()
            .and_then(Self::from_repr)
            .unwrap_or_default()
    }
}

// -------------------------------------------------------------------------------------------------

/// Control values for a single processed block.
///
/// All unipolar values are normalized to \[0, 1\]. Out of range and non-finite values are not
/// errors: engines work on [`TextureParameters::sanitized`] copies.
#[derive(Clone, Debug, PartialEq)]
pub struct TextureParameters {
    /// Where in the recorded history to read: 0 = most recent, 1 = oldest.
    pub position: f32,
    /// Grain, window or loop size.
    pub size: f32,
    /// Grain density. Dead zone around 0.5, deterministic below, random above.
    pub density: f32,
    /// Envelope shape, jitter amount and tone (filter) control.
    pub texture: f32,
    /// Pitch offset in semitones (-48..48).
    pub pitch: f32,
    /// Random stereo spread of grains, scaled by texture.
    pub stereo_spread: f32,
    /// Suspend writing into the sample store.
    pub freeze: bool,
    /// One-shot trigger for this block.
    pub trigger: bool,
}

impl Default for TextureParameters {
    fn default() -> Self {
        Self {
            position: 0.5,
            size: 0.5,
            density: 0.5,
            texture: 0.5,
            pitch: 0.0,
            stereo_spread: 0.0,
            freeze: false,
            trigger: false,
        }
    }
}

impl TextureParameters {
    pub const MIN_PITCH: f32 = -48.0;
    pub const MAX_PITCH: f32 = 48.0;

    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy with all values clamped into their valid ranges. Non-finite values
    /// fall back to the defaults.
    pub fn sanitized(&self) -> Self {
        let defaults = Self::default();
        let unipolar = |value: f32, fallback: f32| finite_or(value, fallback).clamp(0.0, 1.0);
        Self {
            position: unipolar(self.position, defaults.position),
            size: unipolar(self.size, defaults.size),
            density: unipolar(self.density, defaults.density),
            texture: unipolar(self.texture, defaults.texture),
            pitch: finite_or(self.pitch, defaults.pitch).clamp(Self::MIN_PITCH, Self::MAX_PITCH),
            stereo_spread: unipolar(self.stereo_spread, defaults.stereo_spread),
            freeze: self.freeze,
            trigger: self.trigger,
        }
    }
}

// -------------------------------------------------------------------------------------------------
