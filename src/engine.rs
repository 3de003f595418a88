use crate::{SampleStore, TextureParameters};

// -------------------------------------------------------------------------------------------------

pub mod correlator;
pub mod granular;
pub mod looping;
pub mod stretch;

// -------------------------------------------------------------------------------------------------

/// Playback engines re-synthesize audio from a [`SampleStore`] into stereo output blocks.
///
/// Engines never own the store: the voice owning it lends it to the single active engine for
/// each processed block, after the block's input got written. Engines may be switched between
/// blocks, as they all read the same recorded history.
///
/// All state is allocated on construction. `process` is called in real-time audio threads, so
/// it must not block nor allocate. Invalid parameter values get clamped, non-finite intermediate
/// values get flushed to zero: processing never fails.
pub trait PlaybackEngine: Send + Sync + 'static {
    /// A unique, static name for the engine.
    fn name(&self) -> &'static str;

    /// Render a block of output. `left` and `right` have equal lengths and get fully
    /// overwritten, never accumulated.
    fn process(
        &mut self,
        store: &SampleStore,
        parameters: &TextureParameters,
        left: &mut [f32],
        right: &mut [f32],
    );

    /// Forget all playback state, e.g. after the store's content got replaced.
    fn reset(&mut self);
}
