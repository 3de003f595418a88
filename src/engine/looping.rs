//! Tape-scrub delay and frozen, pitchable loops.

use crate::{
    engine::PlaybackEngine,
    parameters::TextureParameters,
    store::SampleStore,
    utils::{
        envelope::SlewFollower,
        one_pole, semitones_to_ratio,
        tap::TapTempo,
        texture_filter::TextureFilter,
        window::{WindowShape, WINDOW_TABLE},
    },
};

// -------------------------------------------------------------------------------------------------

/// Playback state of a [`LoopEngine`]: the running loop and the tail of the previous loop
/// (or delay read) which gets crossfaded into it.
#[derive(Debug, Clone, Default)]
pub struct LoopState {
    /// Read offset from the loop's start.
    pub phase: f64,
    /// Absolute store position of the loop's start.
    pub loop_start: f64,
    /// Loop length in samples.
    pub duration: f64,
    /// Absolute store read position of the fading tail.
    pub tail_position: f64,
    pub tail_increment: f64,
    /// Length of the running crossfade in samples.
    pub tail_duration: usize,
    /// Samples left in the running crossfade. 0 when not fading.
    pub tail_remaining: usize,
}

impl LoopState {
    fn start_tail(&mut self, position: f64, increment: f64, duration: usize) {
        self.tail_position = position;
        self.tail_increment = increment;
        self.tail_duration = duration.max(1);
        self.tail_remaining = self.tail_duration;
    }

    /// Mix `value` with the fading tail, if any.
    #[inline]
    fn crossfade(&mut self, store: &SampleStore, channel_values: (f32, f32)) -> (f32, f32) {
        if self.tail_remaining == 0 {
            return channel_values;
        }
        let (tail_left, tail_right) = read_stereo(store, self.tail_position);
        self.tail_position += self.tail_increment;
        let progress = 1.0 - self.tail_remaining as f32 / self.tail_duration as f32;
        self.tail_remaining -= 1;
        let gain = WINDOW_TABLE.sample(WindowShape::RaisedCosine, progress);
        (
            tail_left + (channel_values.0 - tail_left) * gain,
            tail_right + (channel_values.1 - tail_right) * gain,
        )
    }
}

#[inline]
fn read_stereo(store: &SampleStore, position: f64) -> (f32, f32) {
    let left = store.read_hermite(position, store.source_channel(0));
    let right = if store.channel_count() > 1 {
        store.read_hermite(position, store.source_channel(1))
    } else {
        left
    };
    (left, right)
}

// -------------------------------------------------------------------------------------------------

/// Replays the recorded history as a delay line or, while the store is frozen, as a loop.
///
/// Unfrozen, the read delay chases `position² * max_delay` slowly, which bends the pitch while
/// the delay changes, like scrubbing a tape. Frozen, a loop selected by position and size gets
/// played back at the pitch's speed. Loop boundaries and mode changes crossfade over a few
/// samples. When tap-synced, delays and loop lengths snap to multiples or divisors of the
/// smoothed tapped interval.
pub struct LoopEngine {
    sample_rate: u32,
    delay: f64,
    looping: bool,
    state: LoopState,
    tap: TapTempo,
    tapped_interval: SlewFollower,
    filter: TextureFilter,
}

impl LoopEngine {
    /// Max crossfade length in samples.
    pub const CROSSFADE: usize = 64;
    /// Shortest tape delay and loop distance to the write head: a crossfade tail plus the
    /// Hermite kernel's look-ahead must not reach the head.
    pub const MIN_DELAY: f64 = Self::CROSSFADE as f64 + 3.0;
    /// One-pole coefficient of the delay chase per sample.
    pub const DELAY_COEFFICIENT: f64 = 5e-4;

    pub fn new(sample_rate: u32) -> Self {
        let sample_rate = sample_rate.max(1);
        Self {
            sample_rate,
            delay: Self::MIN_DELAY,
            looping: false,
            state: LoopState::default(),
            tap: TapTempo::new(u32::MAX / 2),
            tapped_interval: SlewFollower::new(0.5, 0.5),
            filter: TextureFilter::new(sample_rate),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Current tape delay in samples.
    pub fn delay(&self) -> f64 {
        self.delay
    }

    /// True while playing a frozen loop.
    pub fn is_looping(&self) -> bool {
        self.looping
    }

    pub fn state(&self) -> &LoopState {
        &self.state
    }

    /// Longest usable delay for the given store, leaving room for crossfade tails and
    /// interpolation.
    pub fn max_delay(store: &SampleStore) -> f64 {
        (store.frame_count() as f64 - 2.0 * Self::CROSSFADE as f64 - 4.0).max(1.0)
    }

    /// Loop length and start delay behind the head for the given position and size.
    pub fn loop_bounds(&self, store: &SampleStore, position: f32, size: f32) -> (f64, f64) {
        let max_delay = Self::max_delay(store);
        let crossfade = Self::CROSSFADE as f64;
        let size = size.clamp(0.0, 1.0) as f64;
        let duration = self.quantize((0.01 + 0.99 * size * size) * max_delay);
        let duration = duration
            .min(max_delay - Self::MIN_DELAY)
            .max(crossfade.min(max_delay))
            .round();
        let free = (max_delay - duration - Self::MIN_DELAY).max(0.0);
        let loop_point = duration + Self::MIN_DELAY + position.clamp(0.0, 1.0) as f64 * free;
        (duration, loop_point)
    }

    /// Target tape delay for the given position, never closer to the head than `MIN_DELAY`.
    pub fn target_delay(&self, store: &SampleStore, position: f32) -> f64 {
        let max_delay = Self::max_delay(store).max(Self::MIN_DELAY);
        let position = position.clamp(0.0, 1.0) as f64;
        self.quantize(position * position * max_delay).clamp(Self::MIN_DELAY, max_delay)
    }

    fn quantize(&self, length: f64) -> f64 {
        if self.tap.is_synced() {
            TapTempo::quantize_to(self.tapped_interval.value(), length as f32) as f64
        } else {
            length
        }
    }

    fn update_tap(&mut self, frames: usize, trigger: bool) {
        let was_synced = self.tap.is_synced();
        self.tap.tick(frames, trigger);
        if self.tap.is_synced() {
            let interval = self.tap.interval() as f32;
            if was_synced {
                self.tapped_interval.process(interval);
            } else {
                self.tapped_interval.reset(interval);
            }
        }
    }

    fn process_loop(
        &mut self,
        store: &SampleStore,
        parameters: &TextureParameters,
        left: &mut [f32],
        right: &mut [f32],
    ) {
        let head = store.head() as f64;
        let ratio = semitones_to_ratio(parameters.pitch) as f64;
        let crossfade = ((Self::CROSSFADE as f64 / ratio).min(Self::CROSSFADE as f64)) as usize;
        let (duration, loop_point) = self.loop_bounds(store, parameters.position, parameters.size);

        if !self.looping {
            // fade over from the tape read position
            self.state.start_tail(head - self.delay, 1.0, Self::CROSSFADE);
            self.state.phase = 0.0;
            self.state.loop_start = head - loop_point;
            self.state.duration = duration;
            self.looping = true;
        }

        for (out_left, out_right) in left.iter_mut().zip(right.iter_mut()) {
            if self.state.phase >= self.state.duration {
                let end = self.state.loop_start + self.state.phase;
                self.state.start_tail(end, ratio, crossfade);
                self.state.phase -= self.state.duration;
                self.state.loop_start = head - loop_point;
                self.state.duration = duration;
            }
            let values = read_stereo(store, self.state.loop_start + self.state.phase);
            self.state.phase += ratio;
            (*out_left, *out_right) = self.state.crossfade(store, values);
        }
    }

    fn process_delay(
        &mut self,
        store: &SampleStore,
        parameters: &TextureParameters,
        left: &mut [f32],
        right: &mut [f32],
    ) {
        let frames = left.len();
        let head = store.head() as f64;

        if self.looping {
            // fade over from the loop
            let ratio = semitones_to_ratio(parameters.pitch) as f64;
            let position = self.state.loop_start + self.state.phase;
            self.state.start_tail(position, ratio, Self::CROSSFADE);
            self.looping = false;
        }

        let target = self.target_delay(store, parameters.position);
        for (frame, (out_left, out_right)) in left.iter_mut().zip(right.iter_mut()).enumerate() {
            let frame_head = head - (frames - frame) as f64;
            one_pole(&mut self.delay, target, Self::DELAY_COEFFICIENT);
            let values = read_stereo(store, frame_head - self.delay);
            (*out_left, *out_right) = self.state.crossfade(store, values);
        }
    }
}

impl PlaybackEngine for LoopEngine {
    fn name(&self) -> &'static str {
        "LoopEngine"
    }

    fn process(
        &mut self,
        store: &SampleStore,
        parameters: &TextureParameters,
        left: &mut [f32],
        right: &mut [f32],
    ) {
        debug_assert_eq!(left.len(), right.len(), "Channel lengths must match");
        let parameters = parameters.sanitized();
        let frames = left.len().min(right.len());
        let (left, right) = (&mut left[..frames], &mut right[..frames]);

        self.update_tap(frames, parameters.trigger);
        self.filter.update(parameters.texture);

        if store.is_frozen() {
            self.process_loop(store, &parameters, left, right);
        } else {
            self.process_delay(store, &parameters, left, right);
        }

        if left.iter().chain(right.iter()).any(|s| !s.is_finite()) {
            left.fill(0.0);
            right.fill(0.0);
            self.reset();
            return;
        }
        self.filter.process(left, right);
    }

    fn reset(&mut self) {
        self.delay = Self::MIN_DELAY;
        self.looping = false;
        self.state = LoopState::default();
        self.filter.reset();
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::f32::consts::PI;

    use super::*;
    use crate::store::StorageQuality;

    const SAMPLE_RATE: u32 = 44100;
    const BLOCK_SIZE: usize = 64;

    fn sine_store(frames: usize) -> SampleStore {
        let mut store = SampleStore::new(frames, 1, StorageQuality::Float).unwrap();
        for i in 0..store.frame_count() {
            store.write(&[(2.0 * PI * i as f32 / 100.0).sin()]);
        }
        store
    }

    fn render(
        engine: &mut LoopEngine,
        store: &SampleStore,
        parameters: &TextureParameters,
        frames: usize,
    ) -> Vec<f32> {
        let mut left = vec![0.0; frames];
        let mut right = vec![0.0; frames];
        for (l, r) in left
            .chunks_mut(BLOCK_SIZE)
            .zip(right.chunks_mut(BLOCK_SIZE))
        {
            engine.process(store, parameters, l, r);
        }
        left
    }

    #[test]
    fn loop_bounds_fit_into_history() {
        let store = sine_store(1 << 14);
        let engine = LoopEngine::new(SAMPLE_RATE);
        let max_delay = LoopEngine::max_delay(&store);
        for position in [0.0, 0.3, 1.0] {
            for size in [0.0, 0.5, 1.0] {
                let (duration, loop_point) = engine.loop_bounds(&store, position, size);
                assert!(duration >= LoopEngine::CROSSFADE as f64);
                assert!(loop_point - duration >= LoopEngine::MIN_DELAY - 1e-9);
                assert!(loop_point <= max_delay + 1e-9);
            }
        }
    }

    #[test]
    fn tape_delay_chases_target() {
        let mut store = sine_store(1 << 15);
        store.set_freeze(false);
        let mut engine = LoopEngine::new(SAMPLE_RATE);
        let parameters = TextureParameters {
            position: 0.5,
            ..Default::default()
        };
        let target = engine.target_delay(&store, 0.5);
        assert!((target - 0.25 * LoopEngine::max_delay(&store)).abs() < 1e-6);

        render(&mut engine, &store, &parameters, 256);
        // slow chase: far from the target after a few blocks
        assert!(engine.delay() > LoopEngine::MIN_DELAY && engine.delay() < target * 0.2);
        render(&mut engine, &store, &parameters, 2 * SAMPLE_RATE as usize);
        assert!((engine.delay() - target).abs() < 1e-2);
    }

    #[test]
    fn frozen_loop_is_periodic() {
        let mut store = sine_store(1 << 14);
        store.set_freeze(true);
        let head = store.head();
        let mut engine = LoopEngine::new(SAMPLE_RATE);
        let parameters = TextureParameters {
            position: 0.2,
            size: 0.1,
            texture: 0.45,
            ..Default::default()
        };
        let output = render(&mut engine, &store, &parameters, 16 * 1024);
        assert!(engine.is_looping());
        assert_eq!(store.head(), head);

        let duration = engine.state().duration as usize;
        let crossfade = LoopEngine::CROSSFADE;
        // compare two loop cycles, away from the crossfades
        let first = 4 * duration;
        for i in crossfade + 32..duration {
            let a = output[first + i];
            let b = output[first + duration + i];
            assert!((a - b).abs() < 1e-4, "sample {i}: {a} vs {b}");
        }
    }

    #[test]
    fn loop_boundaries_are_smooth() {
        let mut store = SampleStore::new(1 << 14, 1, StorageQuality::Float).unwrap();
        let mut engine = LoopEngine::new(SAMPLE_RATE);
        let mut parameters = TextureParameters {
            position: 0.1,
            size: 0.05,
            texture: 0.45,
            ..Default::default()
        };
        // continuous input: the sine only advances with recorded samples
        let mut written = 0;
        let mut output = Vec::new();
        let mut run = |store: &mut SampleStore,
                       engine: &mut LoopEngine,
                       parameters: &TextureParameters,
                       blocks: usize| {
            for _ in 0..blocks {
                if !store.is_frozen() {
                    for _ in 0..BLOCK_SIZE {
                        store.write(&[(2.0 * PI * written as f32 / 100.0).sin()]);
                        written += 1;
                    }
                }
                let mut left = [0.0; BLOCK_SIZE];
                let mut right = [0.0; BLOCK_SIZE];
                engine.process(store, parameters, &mut left, &mut right);
                output.extend_from_slice(&left);
            }
        };
        run(&mut store, &mut engine, &parameters, 128);
        store.set_freeze(true);
        for pitch in [0.0, 7.0, -5.0] {
            parameters.pitch = pitch;
            run(&mut store, &mut engine, &parameters, 128);
        }
        store.set_freeze(false);
        run(&mut store, &mut engine, &parameters, 128);

        let max_step = output[4096..]
            .windows(2)
            .map(|w| (w[1] - w[0]).abs())
            .fold(0.0_f32, f32::max);
        assert!(max_step < 0.25, "max step {max_step}");
    }

    #[test]
    fn freeze_at_shortest_delay_is_smooth() {
        let mut store = SampleStore::new(1 << 14, 1, StorageQuality::Float).unwrap();
        let mut engine = LoopEngine::new(SAMPLE_RATE);
        let parameters = TextureParameters {
            position: 0.0,
            size: 0.05,
            texture: 0.45,
            ..Default::default()
        };
        assert_eq!(engine.target_delay(&store, 0.0), LoopEngine::MIN_DELAY);

        let mut written = 0;
        let mut output = Vec::new();
        for block in 0..400 {
            if block == 300 {
                store.set_freeze(true);
            }
            if !store.is_frozen() {
                for _ in 0..BLOCK_SIZE {
                    store.write(&[0.5 * (2.0 * PI * written as f32 / 100.0).sin()]);
                    written += 1;
                }
            }
            let mut left = [0.0; BLOCK_SIZE];
            let mut right = [0.0; BLOCK_SIZE];
            engine.process(&store, &parameters, &mut left, &mut right);
            assert!(engine.delay() >= LoopEngine::MIN_DELAY);
            output.extend_from_slice(&left);
        }
        assert!(engine.is_looping());

        // a 0.5 sine moves at most ~0.031 per sample, the crossfade may add a little
        let max_step = output[4096..]
            .windows(2)
            .map(|w| (w[1] - w[0]).abs())
            .fold(0.0_f32, f32::max);
        assert!(max_step < 0.1, "max step {max_step}");
    }

    #[test]
    fn pitch_sets_loop_speed() {
        let mut store = sine_store(1 << 14);
        store.set_freeze(true);
        let mut engine = LoopEngine::new(SAMPLE_RATE);
        let parameters = TextureParameters {
            pitch: 12.0,
            size: 0.3,
            texture: 0.45,
            ..Default::default()
        };
        let output = render(&mut engine, &store, &parameters, SAMPLE_RATE as usize);
        let crossings = output
            .windows(2)
            .filter(|w| (w[0] < 0.0) != (w[1] < 0.0))
            .count() as f32;
        // 441 Hz source played an octave up
        assert!((crossings - 1764.0).abs() < 1764.0 * 0.05, "crossings {crossings}");
    }

    #[test]
    fn tap_sync_snaps_loop_length() {
        let mut store = sine_store(1 << 15);
        store.set_freeze(true);
        let mut engine = LoopEngine::new(SAMPLE_RATE);
        let trigger = TextureParameters {
            trigger: true,
            ..Default::default()
        };
        let (free_duration, _) = engine.loop_bounds(&store, 0.5, 0.5);
        assert_eq!(free_duration, 8404.0);

        render(&mut engine, &store, &trigger, BLOCK_SIZE);
        render(&mut engine, &store, &TextureParameters::default(), 3000 - BLOCK_SIZE);
        render(&mut engine, &store, &trigger, BLOCK_SIZE);
        let (synced_duration, _) = engine.loop_bounds(&store, 0.5, 0.5);
        assert_eq!(synced_duration, 9000.0);
    }
}
