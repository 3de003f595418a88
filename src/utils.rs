//! Shared DSP tools for the texture engines.

use std::ops::{Add, Mul, Sub};

pub mod envelope;
pub mod filter;
pub mod smoothed;
pub mod tap;
pub mod texture_filter;
pub mod window;

// -------------------------------------------------------------------------------------------------

/// Convert a pitch offset in semitones to a playback speed ratio.
#[inline]
pub fn semitones_to_ratio(semitones: f32) -> f32 {
    (semitones / 12.0).exp2()
}

// -------------------------------------------------------------------------------------------------

/// Linear crossfade from `a` to `b` by `amount` (0.0 = a, 1.0 = b).
#[inline]
pub fn crossfade(a: f32, b: f32, amount: f32) -> f32 {
    a + (b - a) * amount
}

// -------------------------------------------------------------------------------------------------

/// Single step of a one-pole lowpass: moves `state` towards `target` by `coefficient`.
#[inline]
pub fn one_pole<T>(state: &mut T, target: T, coefficient: T)
where
    T: Copy + Add<Output = T> + Sub<Output = T> + Mul<Output = T>,
{
    *state = *state + (target - *state) * coefficient;
}

// -------------------------------------------------------------------------------------------------

/// Replace NaN and infinite values with silence.
#[inline]
pub fn flush_non_finite(value: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Returns `value` when finite, else `fallback`. Used to sanitize control values.
#[inline]
pub fn finite_or(value: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

// -------------------------------------------------------------------------------------------------
