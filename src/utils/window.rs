//! Precomputed window and fade shapes for grains and crossfades.

use std::sync::LazyLock;

use strum::EnumCount;

// -------------------------------------------------------------------------------------------------

/// Window shapes available in the [`WindowTable`].
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    strum::EnumString,
    strum::Display,
    strum::VariantNames,
    strum::EnumCount,
)]
#[repr(u8)]
pub enum WindowShape {
    /// Linear rise to a peak at 0.5, linear fall.
    Triangle = 0,
    /// Cosine-squared window.
    Hann = 1,
    /// Half cosine fade from 0 to 1. Pairs with its mirror to an equal gain crossfade.
    RaisedCosine = 2,
}

// -------------------------------------------------------------------------------------------------

/// Precomputed window lookup tables. `N` must be a pow2 value.
///
/// Each table holds `N + 1` points, so phase 0.0 and 1.0 both hit exact table entries.
pub struct WindowTable<const N: usize> {
    luts: [[f32; N]; WindowShape::COUNT],
    last: [f32; WindowShape::COUNT],
}

impl<const N: usize> WindowTable<N> {
    const _VERIFY_N: () = assert!(N.is_power_of_two(), "Window size must be a pow2 value");

    /// Precompute all window LUTs.
    pub fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let _ = Self::_VERIFY_N;
        let mut luts = [[0.0; N]; WindowShape::COUNT];
        let mut last = [0.0; WindowShape::COUNT];

        for i in 0..=N {
            let phase = i as f32 / N as f32; // [0.0, 1.0]
            let values = [
                1.0 - (2.0 * phase - 1.0).abs(),
                0.5 * (1.0 - (2.0 * std::f32::consts::PI * phase).cos()),
                0.5 * (1.0 - (std::f32::consts::PI * phase).cos()),
            ];
            for (shape, value) in values.into_iter().enumerate() {
                if i < N {
                    luts[shape][i] = value;
                } else {
                    last[shape] = value;
                }
            }
        }

        Self { luts, last }
    }

    /// Evaluate a window at normalized phase \[0.0, 1.0\] with linear interpolation.
    /// Phases outside of the range are clamped.
    #[inline]
    pub fn sample(&self, shape: WindowShape, phase: f32) -> f32 {
        let index_float = phase.clamp(0.0, 1.0) * N as f32;
        let index = (index_float as usize).min(N);
        let fraction = index_float - index as f32;

        let lut = &self.luts[shape as usize];
        let last = self.last[shape as usize];
        if index < N {
            let a = lut[index];
            let b = if index + 1 < N { lut[index + 1] } else { last };
            a + (b - a) * fraction
        } else {
            last
        }
    }
}

impl<const N: usize> Default for WindowTable<N> {
    fn default() -> Self {
        Self::new()
    }
}

// -------------------------------------------------------------------------------------------------

/// Size of the shared window tables.
pub const WINDOW_TABLE_SIZE: usize = 2048;

/// Static, shared lookup table for all window shapes.
pub static WINDOW_TABLE: LazyLock<WindowTable<WINDOW_TABLE_SIZE>> = LazyLock::new(WindowTable::new);

// -------------------------------------------------------------------------------------------------
