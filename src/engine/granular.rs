//! Granular playback: overlapping enveloped grains read from the sample store.

use std::f32::consts::FRAC_PI_2;

use rand::{rngs::SmallRng, Rng, SeedableRng};

use crate::{
    engine::PlaybackEngine,
    parameters::TextureParameters,
    store::{ReadKernel, SampleStore},
    utils::{
        crossfade,
        envelope::SlewFollower,
        semitones_to_ratio,
        smoothed::{ExponentialSmoothedValue, SmoothedValue},
        window::{WindowShape, WINDOW_TABLE},
    },
};

// -------------------------------------------------------------------------------------------------

/// Number of grain voices in a [`GrainEngine`], unless specified otherwise.
pub const DEFAULT_GRAIN_POOL_SIZE: usize = 64;

// -------------------------------------------------------------------------------------------------

/// A single grain in the pool of a [`GrainEngine`].
///
/// Voices get recycled in place. A voice which finished playing is `releasing` until the end of
/// the block it finished in, and can't be reused before.
#[derive(Debug, Clone, Copy)]
pub struct GrainVoice {
    active: bool,
    releasing: bool,
    /// Absolute, fractional read position in the store.
    position: f64,
    /// Read position increment per sample (pitch ratio).
    increment: f64,
    gain_left: f32,
    gain_right: f32,
    duration: usize,
    age: usize,
    /// Inverse duration: envelope phase increment per sample.
    phase_increment: f32,
    /// Envelope shape: 0 = triangle, 1 = Hann.
    shape: f32,
}

impl GrainVoice {
    /// Create a new, idle voice.
    pub const fn new() -> Self {
        Self {
            active: false,
            releasing: false,
            position: 0.0,
            increment: 1.0,
            gain_left: 0.0,
            gain_right: 0.0,
            duration: 0,
            age: 0,
            phase_increment: 0.0,
            shape: 0.0,
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[inline]
    pub fn is_releasing(&self) -> bool {
        self.releasing
    }

    /// Free voices are neither playing nor fading out in the current block.
    #[inline]
    pub fn is_free(&self) -> bool {
        !self.active && !self.releasing
    }

    /// Duration of the grain in samples.
    pub fn duration(&self) -> usize {
        self.duration
    }

    /// Pitch ratio of the grain.
    pub fn increment(&self) -> f64 {
        self.increment
    }

    fn start(
        &mut self,
        position: f64,
        increment: f64,
        duration: usize,
        (gain_left, gain_right): (f32, f32),
        shape: f32,
    ) {
        self.active = true;
        self.releasing = false;
        self.position = position;
        self.increment = increment;
        self.gain_left = gain_left;
        self.gain_right = gain_right;
        self.duration = duration.max(2);
        self.age = 0;
        self.phase_increment = 1.0 / self.duration as f32;
        self.shape = shape.clamp(0.0, 1.0);
    }

    /// Envelope at the current age.
    #[inline]
    fn envelope(&self) -> f32 {
        let phase = self.age as f32 * self.phase_increment;
        let triangle = WINDOW_TABLE.sample(WindowShape::Triangle, phase);
        if self.shape > 0.0 {
            let hann = WINDOW_TABLE.sample(WindowShape::Hann, phase);
            crossfade(triangle, hann, self.shape)
        } else {
            triangle
        }
    }

    /// Render one frame and advance. Returns the (left, right) contribution.
    #[inline]
    fn render(&mut self, store: &SampleStore, kernel: ReadKernel) -> (f32, f32) {
        let envelope = self.envelope();
        let left = store.read(kernel, self.position, store.source_channel(0));
        let right = if store.channel_count() > 1 {
            store.read(kernel, self.position, store.source_channel(1))
        } else {
            left
        };
        self.position += self.increment;
        self.age += 1;
        if self.age >= self.duration {
            self.active = false;
            self.releasing = true;
        }
        (
            left * envelope * self.gain_left,
            right * envelope * self.gain_right,
        )
    }
}

impl Default for GrainVoice {
    fn default() -> Self {
        Self::new()
    }
}

// -------------------------------------------------------------------------------------------------

/// Granular re-synthesis of the recorded history with a fixed pool of `POOL_SIZE` grains.
///
/// Density controls how many grains overlap: it has a dead zone around 0.5 which spawns no
/// grains at all. Below the dead zone grains get triggered in fixed intervals, above it with a
/// per-sample probability. An external trigger always starts one grain at the block's start.
/// When the pool is exhausted, triggers get dropped.
///
/// Output gets normalized by the (slewed) number of active grains, so dense clouds don't clip
/// and sparse ones don't fade away.
pub struct GrainEngine<const POOL_SIZE: usize = DEFAULT_GRAIN_POOL_SIZE> {
    sample_rate: u32,
    kernel: ReadKernel,
    voices: [GrainVoice; POOL_SIZE],
    trigger_phase: f32,
    active_count: SlewFollower,
    gain: ExponentialSmoothedValue,
    grains_started: u64,
    rng: SmallRng,
}

impl<const POOL_SIZE: usize> GrainEngine<POOL_SIZE> {
    /// Density range around 0.5 in which no grains get spawned.
    pub const DEAD_ZONE: (f32, f32) = (0.47, 0.53);
    /// Phasor value which disables deterministic triggering for a while.
    const PHASOR_SENTINEL: f32 = -1000.0;

    const COUNT_RISE: f32 = 0.9;
    const COUNT_FALL: f32 = 0.2;
    const GAIN_INERTIA: f32 = 0.01;

    const _VERIFY_POOL_SIZE: () = assert!(POOL_SIZE > 0, "Need at least one grain voice");

    /// Create a new grain engine which reads grains with the given kernel.
    pub fn new(sample_rate: u32, kernel: ReadKernel) -> Self {
        #[allow(clippy::let_unit_value)]
        let _ = Self::_VERIFY_POOL_SIZE;
        Self {
            sample_rate: sample_rate.max(1),
            kernel,
            voices: [GrainVoice::new(); POOL_SIZE],
            trigger_phase: 0.0,
            active_count: SlewFollower::new(Self::COUNT_RISE, Self::COUNT_FALL),
            gain: ExponentialSmoothedValue::with_inertia(
                1.0,
                Self::GAIN_INERTIA,
                sample_rate.max(1),
            ),
            grains_started: 0,
            rng: SmallRng::from_os_rng(),
        }
    }

    /// Reseed the random generator, e.g. for reproducible renders.
    pub fn seed(&mut self, seed: u64) {
        self.rng = SmallRng::seed_from_u64(seed);
    }

    pub fn kernel(&self) -> ReadKernel {
        self.kernel
    }

    pub fn set_kernel(&mut self, kernel: ReadKernel) {
        self.kernel = kernel;
    }

    /// Access to the voice pool.
    pub fn voices(&self) -> &[GrainVoice; POOL_SIZE] {
        &self.voices
    }

    /// Number of currently playing grains.
    pub fn active_voice_count(&self) -> usize {
        self.voices.iter().filter(|v| v.is_active()).count()
    }

    /// Total number of grains which got started since creation or the last reset.
    pub fn grains_started(&self) -> u64 {
        self.grains_started
    }

    /// Distance of the density from the dead zone, normalized to \[0, 1\].
    pub fn density_overlap(density: f32) -> f32 {
        let (low, high) = Self::DEAD_ZONE;
        if density > high {
            ((density - high) / (1.0 - high)).min(1.0)
        } else if density < low {
            ((low - density) / low).min(1.0)
        } else {
            0.0
        }
    }

    /// Base grain duration in samples for the given size, before jitter.
    pub fn grain_duration(sample_rate: u32, size: f32) -> f32 {
        0.016 * (size.clamp(0.0, 1.0) * 6.0).exp2() * sample_rate as f32
    }

    /// Compensation gain for the loss of energy by the grain envelope: the inverse RMS of a
    /// triangle window morphed towards a Hann window by `shape`.
    pub fn window_gain(shape: f32) -> f32 {
        // mean squares of triangle and Hann, and mean of their product
        const TRIANGLE: f32 = 1.0 / 3.0;
        const HANN: f32 = 3.0 / 8.0;
        const CROSS: f32 = 0.25 + 1.0 / (std::f32::consts::PI * std::f32::consts::PI);
        let m = shape.clamp(0.0, 1.0);
        let mean_square =
            (1.0 - m) * (1.0 - m) * TRIANGLE + 2.0 * m * (1.0 - m) * CROSS + m * m * HANN;
        1.0 / mean_square.sqrt()
    }

    /// Normalization gain for the given (slewed) number of active grains.
    pub fn count_gain(count: f32) -> f32 {
        if count <= 2.0 {
            1.0
        } else {
            1.0 / (count - 1.0).sqrt()
        }
    }

    fn envelope_shape(texture: f32) -> f32 {
        if texture >= 0.5 {
            (texture - 0.5) * 2.0
        } else {
            0.0
        }
    }

    /// Try starting a new grain for the given (virtual) write head position.
    fn start_grain(&mut self, store: &SampleStore, parameters: &TextureParameters, head: f64) {
        let Some(index) = self.voices.iter().position(GrainVoice::is_free) else {
            return;
        };
        let texture = parameters.texture;
        let frame_count = store.frame_count() as f32;

        let pitch_jitter = texture * (2.0 * self.rng.random::<f32>() - 1.0);
        let ratio = semitones_to_ratio(parameters.pitch + pitch_jitter);

        let duration_jitter = 1.0 + 0.4 * texture * (self.rng.random::<f32>() - 0.5);
        let mut duration =
            Self::grain_duration(self.sample_rate, parameters.size) * duration_jitter;
        // don't let the grain outrun the write head, nor read more than a quarter of the store
        let quarter = frame_count / 4.0;
        let read_ratio = ratio.max(1.0);
        if duration * read_ratio > quarter {
            duration = quarter / read_ratio;
        }
        let available = (frame_count - duration * ratio - duration).max(0.0);

        let position_jitter = texture * 0.1 * available * (self.rng.random::<f32>() - 0.5);
        let offset = (parameters.position * available + position_jitter).clamp(0.0, available);
        let start = head - (offset + duration * ratio) as f64;

        let spread = parameters.stereo_spread * texture;
        let pan = 0.5 + spread * (self.rng.random::<f32>() - 0.5);
        let gains = ((pan * FRAC_PI_2).cos(), (pan * FRAC_PI_2).sin());

        self.voices[index].start(
            start,
            ratio as f64,
            duration as usize,
            gains,
            Self::envelope_shape(texture),
        );
        self.grains_started += 1;
    }

    fn update_gain(&mut self, overlap: f32, shape: f32) {
        let count = self.active_count.process(self.active_voice_count() as f32);
        let gain = crossfade(
            Self::count_gain(count),
            Self::count_gain(count) * Self::window_gain(shape),
            overlap,
        );
        self.gain.set_target(gain);
    }
}

impl<const POOL_SIZE: usize> PlaybackEngine for GrainEngine<POOL_SIZE> {
    fn name(&self) -> &'static str {
        "GrainEngine"
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

        let overlap = Self::density_overlap(parameters.density).powi(4);
        let target_count = POOL_SIZE as f32 * overlap;
        let size_hint = Self::grain_duration(self.sample_rate, parameters.size);
        let probabilistic = parameters.density >= 0.5;
        let (probability, spacing) = if target_count > 0.0 {
            (target_count / size_hint, size_hint / target_count)
        } else {
            (0.0, f32::INFINITY)
        };
        if probabilistic {
            self.trigger_phase = Self::PHASOR_SENTINEL;
        }

        self.update_gain(overlap, Self::envelope_shape(parameters.texture));

        // the block's input got written already: the head is at the block's end
        let head = store.head() as f64;
        let frozen = store.is_frozen();

        for (frame, (out_left, out_right)) in left.iter_mut().zip(right.iter_mut()).enumerate() {
            let frame_head = if frozen {
                head
            } else {
                head - (frames - frame) as f64
            };

            let mut trigger = frame == 0 && parameters.trigger;
            self.trigger_phase += 1.0;
            if probabilistic {
                trigger |= probability > 0.0 && self.rng.random::<f32>() < probability;
            } else {
                trigger |= self.trigger_phase >= spacing;
            }
            if trigger {
                self.trigger_phase = if probabilistic {
                    Self::PHASOR_SENTINEL
                } else {
                    0.0
                };
                self.start_grain(store, &parameters, frame_head);
            }

            let (mut sum_left, mut sum_right) = (0.0, 0.0);
            for voice in self.voices.iter_mut().filter(|v| v.is_active()) {
                let (l, r) = voice.render(store, self.kernel);
                sum_left += l;
                sum_right += r;
            }
            let gain = self.gain.next();
            *out_left = sum_left * gain;
            *out_right = sum_right * gain;

            if !(out_left.is_finite() && out_right.is_finite()) {
                *out_left = 0.0;
                *out_right = 0.0;
                self.reset();
            }
        }

        for voice in &mut self.voices {
            voice.releasing = false;
        }
    }

    fn reset(&mut self) {
        for voice in &mut self.voices {
            *voice = GrainVoice::new();
        }
        self.trigger_phase = 0.0;
        self.active_count.reset(0.0);
        self.gain.init(1.0);
        self.grains_started = 0;
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

    fn sine_store(frames: usize, frequency: f32) -> SampleStore {
        let mut store = SampleStore::new(frames, 1, StorageQuality::Float).unwrap();
        for i in 0..store.frame_count() {
            let phase = 2.0 * PI * frequency * i as f32 / SAMPLE_RATE as f32;
            store.write(&[phase.sin()]);
        }
        store
    }

    fn render<const N: usize>(
        engine: &mut GrainEngine<N>,
        store: &SampleStore,
        parameters: &TextureParameters,
        frames: usize,
    ) -> (Vec<f32>, Vec<f32>) {
        let mut left = vec![0.0; frames];
        let mut right = vec![0.0; frames];
        for (l, r) in left
            .chunks_mut(BLOCK_SIZE)
            .zip(right.chunks_mut(BLOCK_SIZE))
        {
            engine.process(store, parameters, l, r);
        }
        (left, right)
    }

    fn rms(buffer: &[f32]) -> f32 {
        (buffer.iter().map(|s| s * s).sum::<f32>() / buffer.len() as f32).sqrt()
    }

    #[test]
    fn overlap_from_density() {
        type Engine = GrainEngine<16>;
        assert_eq!(Engine::density_overlap(0.47), 0.0);
        assert_eq!(Engine::density_overlap(0.5), 0.0);
        assert_eq!(Engine::density_overlap(0.53), 0.0);
        assert_eq!(Engine::density_overlap(1.0), 1.0);
        assert_eq!(Engine::density_overlap(0.0), 1.0);
        assert!((Engine::density_overlap(0.765) - 0.5).abs() < 1e-5);
    }

    #[test]
    fn gains() {
        type Engine = GrainEngine<16>;
        assert_eq!(Engine::count_gain(0.0), 1.0);
        assert_eq!(Engine::count_gain(2.0), 1.0);
        assert!((Engine::count_gain(5.0) - 0.5).abs() < 1e-6);
        assert!((Engine::window_gain(0.0) - 3.0_f32.sqrt()).abs() < 1e-5);
        assert!((Engine::window_gain(1.0) - (8.0_f32 / 3.0).sqrt()).abs() < 1e-5);
        let morphed = Engine::window_gain(0.5);
        assert!(morphed < Engine::window_gain(0.0) && morphed > Engine::window_gain(1.0));
    }

    #[test]
    fn grain_durations() {
        type Engine = GrainEngine<16>;
        assert!((Engine::grain_duration(1000, 0.0) - 16.0).abs() < 1e-3);
        assert!((Engine::grain_duration(1000, 1.0) - 1024.0).abs() < 1e-2);
    }

    #[test]
    fn dead_zone_spawns_no_grains() {
        let store = sine_store(1 << 15, 440.0);
        let mut engine =
            GrainEngine::<DEFAULT_GRAIN_POOL_SIZE>::new(SAMPLE_RATE, ReadKernel::Hermite);
        engine.seed(1);
        for density in [0.47, 0.48, 0.5, 0.52, 0.53] {
            let parameters = TextureParameters {
                density,
                ..Default::default()
            };
            let (left, right) = render(&mut engine, &store, &parameters, SAMPLE_RATE as usize);
            assert_eq!(engine.grains_started(), 0);
            assert!(left.iter().chain(right.iter()).all(|s| *s == 0.0));
        }
    }

    #[test]
    fn deterministic_triggering() {
        let store = sine_store(1 << 16, 440.0);
        let mut engine =
            GrainEngine::<DEFAULT_GRAIN_POOL_SIZE>::new(SAMPLE_RATE, ReadKernel::Linear);
        engine.seed(2);
        let parameters = TextureParameters {
            density: 0.2,
            size: 0.3,
            texture: 0.0,
            ..Default::default()
        };
        let overlap = GrainEngine::<DEFAULT_GRAIN_POOL_SIZE>::density_overlap(0.2).powi(4);
        let spacing = GrainEngine::<DEFAULT_GRAIN_POOL_SIZE>::grain_duration(SAMPLE_RATE, 0.3)
            / (DEFAULT_GRAIN_POOL_SIZE as f32 * overlap);
        let frames = SAMPLE_RATE as usize;
        render(&mut engine, &store, &parameters, frames);
        let expected = frames as f32 / spacing.ceil();
        let started = engine.grains_started() as f32;
        assert!((started - expected).abs() <= 1.0, "{started} vs {expected}");
    }

    #[test]
    fn external_trigger_starts_one_grain() {
        let store = sine_store(1 << 15, 440.0);
        let mut engine = GrainEngine::<4>::new(SAMPLE_RATE, ReadKernel::Hermite);
        let parameters = TextureParameters {
            density: 0.5,
            trigger: true,
            ..Default::default()
        };
        let mut left = vec![0.0; BLOCK_SIZE];
        let mut right = vec![0.0; BLOCK_SIZE];
        engine.process(&store, &parameters, &mut left, &mut right);
        assert_eq!(engine.grains_started(), 1);
        assert_eq!(engine.active_voice_count(), 1);
        assert!(left.iter().any(|s| *s != 0.0));
    }

    #[test]
    fn exhausted_pool_drops_triggers() {
        let store = sine_store(1 << 16, 440.0);
        let mut engine = GrainEngine::<4>::new(SAMPLE_RATE, ReadKernel::Nearest);
        engine.seed(3);
        let parameters = TextureParameters {
            density: 0.5,
            size: 1.0,
            trigger: true,
            ..Default::default()
        };
        // one forced grain per block
        render(&mut engine, &store, &parameters, 8 * BLOCK_SIZE);
        assert_eq!(engine.active_voice_count(), 4);
        assert_eq!(engine.grains_started(), 4);
    }

    #[test]
    fn grain_durations_stay_in_quarter_of_store() {
        let store = sine_store(1 << 12, 440.0);
        let mut engine = GrainEngine::<8>::new(SAMPLE_RATE, ReadKernel::Linear);
        engine.seed(4);
        let parameters = TextureParameters {
            density: 0.5,
            size: 1.0,
            pitch: 24.0,
            trigger: true,
            ..Default::default()
        };
        render(&mut engine, &store, &parameters, 4 * BLOCK_SIZE);
        for voice in engine.voices().iter().filter(|v| v.is_active()) {
            let read_length = voice.duration() as f64 * voice.increment();
            assert!(read_length <= store.frame_count() as f64 / 4.0 + 1.0);
        }
    }

    #[test]
    fn pan_spread_scales_with_texture() {
        let store = sine_store(1 << 15, 440.0);
        let max_difference = |texture: f32| {
            let mut engine = GrainEngine::<8>::new(SAMPLE_RATE, ReadKernel::Hermite);
            engine.seed(7);
            let parameters = TextureParameters {
                density: 0.5,
                size: 0.2,
                texture,
                stereo_spread: 1.0,
                trigger: true,
                ..Default::default()
            };
            let (left, right) = render(&mut engine, &store, &parameters, 32 * BLOCK_SIZE);
            left.iter()
                .zip(right.iter())
                .map(|(l, r)| (l - r).abs())
                .fold(0.0_f32, f32::max)
        };
        assert!(max_difference(0.0) < 1e-5);
        assert!(max_difference(1.0) > 1e-2);
    }

    #[test]
    fn releasing_voices_clear_at_block_end() {
        let store = sine_store(1 << 15, 440.0);
        let mut engine = GrainEngine::<2>::new(SAMPLE_RATE, ReadKernel::Hermite);
        let parameters = TextureParameters {
            density: 0.5,
            size: 0.0,
            texture: 0.0,
            trigger: true,
            ..Default::default()
        };
        let duration = GrainEngine::<2>::grain_duration(SAMPLE_RATE, 0.0) as usize;
        let mut left = vec![0.0; duration + 16];
        let mut right = vec![0.0; duration + 16];
        engine.process(&store, &parameters, &mut left, &mut right);
        assert_eq!(engine.active_voice_count(), 0);
        assert!(engine.voices().iter().all(GrainVoice::is_free));
    }

    fn frozen_sine_store(frequency: f32) -> (SampleStore, f32) {
        // sine filling the whole store, no further writes
        let mut store = sine_store(1 << 17, frequency);
        store.set_freeze(true);
        let input_rms = rms(&(0..SAMPLE_RATE as i64)
            .map(|i| store.sample(i, 0))
            .collect::<Vec<_>>());
        (store, input_rms)
    }

    #[test]
    fn moderate_density_stays_sparse() {
        // the 4th power overlap leaves only a fraction of a grain at density 0.6
        let target_count = DEFAULT_GRAIN_POOL_SIZE as f32
            * GrainEngine::<DEFAULT_GRAIN_POOL_SIZE>::density_overlap(0.6).powi(4);
        assert!(target_count < 0.05, "target count {target_count}");

        let (store, input_rms) = frozen_sine_store(1000.0);
        let mut engine =
            GrainEngine::<DEFAULT_GRAIN_POOL_SIZE>::new(SAMPLE_RATE, ReadKernel::Hermite);
        engine.seed(6);
        let parameters = TextureParameters {
            position: 0.5,
            size: 0.3,
            density: 0.6,
            texture: 0.0,
            pitch: 0.0,
            ..Default::default()
        };
        let (left, _) = render(&mut engine, &store, &parameters, SAMPLE_RATE as usize);
        assert!(engine.grains_started() <= 4, "{} grains", engine.grains_started());
        let ratio = rms(&left) / input_rms;
        assert!(ratio < 0.3, "rms ratio {ratio}");
    }

    #[test]
    fn full_density_sine_cloud() {
        let (store, input_rms) = frozen_sine_store(1000.0);

        let mut engine =
            GrainEngine::<DEFAULT_GRAIN_POOL_SIZE>::new(SAMPLE_RATE, ReadKernel::Hermite);
        engine.seed(5);
        let parameters = TextureParameters {
            position: 0.5,
            size: 0.3,
            density: 1.0,
            texture: 0.0,
            pitch: 0.0,
            ..Default::default()
        };
        let (left, _) = render(&mut engine, &store, &parameters, SAMPLE_RATE as usize);

        // skip the attack of the cloud
        let settled = &left[SAMPLE_RATE as usize / 4..];
        let ratio = rms(settled) / input_rms;
        assert!((0.3..=1.2).contains(&ratio), "rms ratio {ratio}");

        let crossings = settled
            .windows(2)
            .filter(|w| (w[0] < 0.0) != (w[1] < 0.0))
            .count() as f32;
        let seconds = settled.len() as f32 / SAMPLE_RATE as f32;
        let rate = crossings / seconds;
        assert!((rate - 2000.0).abs() <= 100.0, "zero crossing rate {rate}");
    }

    #[test]
    fn output_is_overwritten() {
        let store = sine_store(1 << 14, 440.0);
        let mut engine = GrainEngine::<8>::new(SAMPLE_RATE, ReadKernel::Hermite);
        let mut left = vec![1.0; BLOCK_SIZE];
        let mut right = vec![1.0; BLOCK_SIZE];
        engine.process(&store, &TextureParameters::default(), &mut left, &mut right);
        assert!(left.iter().chain(right.iter()).all(|s| *s == 0.0));
    }
}
