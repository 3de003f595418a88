//! Pitch independent time stretching with waveform similarity overlap-add (WSOLA).

use crate::{
    engine::{correlator::Correlator, PlaybackEngine},
    parameters::TextureParameters,
    store::{ReadKernel, SampleStore},
    utils::{semitones_to_ratio, tap::TapTempo, texture_filter::TextureFilter},
};

// -------------------------------------------------------------------------------------------------

/// One of the two alternating, triangular enveloped read windows of a [`StretchEngine`].
///
/// The envelope rises over `rise` samples and falls over `fall` samples. A window which got
/// scheduled at the peak of its partner rises exactly as long as the partner falls, so the two
/// envelopes always sum to one, even while the window width changes.
#[derive(Debug, Clone, Default)]
pub struct SynthesisWindow {
    active: bool,
    start: f64,
    /// Q16 read offset from `start`.
    phase: u64,
    /// Q16 read offset increment (pitch).
    increment: u32,
    age: usize,
    rise: usize,
    fall: usize,
    rise_increment: f32,
    fall_increment: f32,
    needs_regeneration: bool,
    done: bool,
}

impl SynthesisWindow {
    pub fn new() -> Self {
        Self::default()
    }

    fn start(&mut self, start: f64, increment: u32, rise: usize, fall: usize) {
        self.active = true;
        self.start = start;
        self.phase = 0;
        self.increment = increment;
        self.age = 0;
        self.rise = rise.max(1);
        self.fall = fall.max(1);
        self.rise_increment = 1.0 / self.rise as f32;
        self.fall_increment = 1.0 / self.fall as f32;
        self.needs_regeneration = false;
        self.done = false;
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// True once the window finished its fall.
    #[inline]
    pub fn done(&self) -> bool {
        self.done
    }

    /// Start position in the store.
    pub fn start_position(&self) -> f64 {
        self.start
    }

    pub fn rise(&self) -> usize {
        self.rise
    }

    pub fn fall(&self) -> usize {
        self.fall
    }

    /// Pitch ratio of the window.
    pub fn ratio(&self) -> f64 {
        self.increment as f64 / Correlator::UNITY_INCREMENT as f64
    }

    /// Current read position in the store.
    #[inline]
    pub fn position(&self) -> f64 {
        self.start + self.phase as f64 / Correlator::UNITY_INCREMENT as f64
    }

    /// Store position which gets read at the window's peak.
    pub fn peak_position(&self) -> f64 {
        self.start + (self.rise as u64 * self.increment as u64) as f64
            / Correlator::UNITY_INCREMENT as f64
    }

    #[inline]
    fn envelope(&self) -> f32 {
        if self.age < self.rise {
            self.age as f32 * self.rise_increment
        } else {
            (self.rise + self.fall).saturating_sub(self.age) as f32 * self.fall_increment
        }
    }

    /// Consume the "peak reached" signal. Fires exactly once per window.
    fn take_regeneration(&mut self) -> bool {
        std::mem::take(&mut self.needs_regeneration)
    }

    /// Render one frame and advance.
    #[inline]
    fn render(&mut self, store: &SampleStore) -> (f32, f32) {
        if !self.active {
            return (0.0, 0.0);
        }
        let envelope = self.envelope();
        let position = self.position();
        let left = store.read(ReadKernel::Hermite, position, store.source_channel(0));
        let right = if store.channel_count() > 1 {
            store.read(ReadKernel::Hermite, position, store.source_channel(1))
        } else {
            left
        };
        self.phase += self.increment as u64;
        self.age += 1;
        if self.age == self.rise {
            self.needs_regeneration = true;
        }
        if self.age >= self.rise + self.fall {
            self.active = false;
            self.done = true;
        }
        (left * envelope, right * envelope)
    }
}

// -------------------------------------------------------------------------------------------------

/// Time stretching of the recorded history: two overlapping windows alternately read the store.
/// When one window reaches its peak, the other one gets restarted at the position where the
/// recorded material is most similar to what the peaking window is going to play, so both
/// overlap without phase cancellation.
///
/// The similarity search of the next splice starts as soon as a window got scheduled and is
/// spread over the following samples. Position selects the read region behind the write head,
/// size the window width, pitch the read speed. When tap-synced, the read delay snaps to
/// multiples or divisors of the tapped interval. A trigger lets the read position follow the
/// triggered material until it reaches the end of the history.
pub struct StretchEngine {
    sample_rate: u32,
    max_width: usize,
    width: usize,
    windows: [SynthesisWindow; 2],
    correlator: Correlator,
    search_clock: usize,
    previous_ratio: f32,
    needs_init: bool,
    ease: Option<PositionEase>,
    tap: TapTempo,
    filter: TextureFilter,
}

/// Glides the position from its value at the trigger towards 1.0.
#[derive(Debug, Clone, Copy)]
struct PositionEase {
    origin: f32,
    value: f32,
    increment: f32,
}

impl StretchEngine {
    /// Smallest window width in samples.
    pub const MIN_WIDTH: usize = 128;
    /// Default largest window width in samples.
    pub const DEFAULT_MAX_WIDTH: usize = 4096;
    /// Run a batch of the similarity search every this many samples.
    const SEARCH_INTERVAL: usize = 16;

    pub fn new(sample_rate: u32, max_width: usize) -> Self {
        let sample_rate = sample_rate.max(1);
        let max_width = Self::snap_width(max_width.max(Self::MIN_WIDTH));
        Self {
            sample_rate,
            max_width,
            width: max_width,
            windows: [SynthesisWindow::new(), SynthesisWindow::new()],
            correlator: Correlator::new(max_width / 2),
            search_clock: 0,
            previous_ratio: 1.0,
            needs_init: true,
            ease: None,
            tap: TapTempo::new(u32::MAX / 2),
            filter: TextureFilter::new(sample_rate),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Current window width in samples.
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn max_width(&self) -> usize {
        self.max_width
    }

    pub fn windows(&self) -> &[SynthesisWindow; 2] {
        &self.windows
    }

    /// Tap tempo state, fed by the parameter's trigger.
    pub fn tap(&self) -> &TapTempo {
        &self.tap
    }

    #[inline]
    fn snap_width(width: usize) -> usize {
        width & !3
    }

    /// Window width the size parameter is heading to.
    pub fn target_width(&self, size: f32) -> usize {
        let width = self.max_width as f32 * ((size.clamp(0.0, 1.0) - 1.0) * 5.0).exp2();
        Self::snap_width((width as usize).clamp(Self::MIN_WIDTH, self.max_width))
    }

    /// Move the width towards the target width in small, grid aligned steps.
    fn update_width(&mut self, size: f32) {
        let target = self.target_width(size);
        if self.needs_init {
            self.width = target;
            return;
        }
        let max_step = (self.width / 16).max(4) as isize;
        let step = (target as isize - self.width as isize).clamp(-max_step, max_step);
        // round towards zero onto the 4 sample grid
        let step = step / 4 * 4;
        self.width = (self.width as isize + step) as usize;
    }

    /// Read delay behind the write head for the given position, window half width and ratio.
    ///
    /// Never exceeds the store size minus the window's read span, so windows can't wrap around
    /// into the region next to the write head, even when the margins don't fit into the store.
    pub fn target_delay(&self, store: &SampleStore, position: f32, half: usize, ratio: f32) -> f64 {
        let width = 2.0 * half as f64;
        let frame_count = store.frame_count() as f64;
        let longest = (frame_count - width * (ratio as f64 + 1.0)).max(0.0);
        let margin = width * (ratio as f64 + 1.0) + width;
        let range = (frame_count - margin - 2.0 * width).max(0.0);
        let delay = margin + position.clamp(0.0, 1.0) as f64 * range;
        let delay = if self.tap.is_synced() {
            (self.tap.quantize(delay as f32) as f64).clamp(margin, margin + range)
        } else {
            delay
        };
        delay.min(longest)
    }

    /// Start window `index` at `start` and begin the search for the next splice.
    #[allow(clippy::too_many_arguments)]
    fn schedule(
        &mut self,
        store: &SampleStore,
        index: usize,
        start: f64,
        ratio: f32,
        rise: usize,
        fall: usize,
        next_target: f64,
    ) {
        let increment = Correlator::increment_from_rate(ratio as f64);
        self.windows[index].start(start, increment, rise, fall);

        let size = self.correlator.search_size(fall);
        let rate = increment as f64 / Correlator::UNITY_INCREMENT as f64;
        let mid = |position: f64| {
            let mut value = store.read_linear(position, store.source_channel(0));
            if store.channel_count() > 1 {
                value += store.read_linear(position, store.source_channel(1));
            }
            value
        };
        let source = self.windows[index].peak_position();
        self.correlator
            .pack_source(size, |i| mid(source + i as f64 * rate));
        let offset = (next_target - size as f64 * rate).floor();
        self.correlator
            .pack_destination(size, |i| mid(offset + i as f64 * rate));
        self.correlator.start_search(size, offset as i64, increment);
    }

    fn flush(&mut self) {
        for window in &mut self.windows {
            *window = SynthesisWindow::new();
        }
        self.filter.reset();
        self.needs_init = true;
    }
}

impl PlaybackEngine for StretchEngine {
    fn name(&self) -> &'static str {
        "StretchEngine"
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

        self.tap.tick(frames, parameters.trigger);
        self.update_width(parameters.size);
        self.filter.update(parameters.texture);

        let frozen = store.is_frozen();
        let head = store.head() as f64;
        let ratio = semitones_to_ratio(parameters.pitch);

        if parameters.trigger && !frozen {
            let half = self.width / 2;
            let range = (store.frame_count() as f64
                - self.target_delay(store, 0.0, half, ratio)
                - 2.0 * self.width as f64)
                .max(1.0);
            let origin = parameters.position;
            self.ease = Some(PositionEase {
                origin,
                value: 0.0,
                increment: 1.0 / ((1.0 - origin) as f64 * range).max(1.0) as f32,
            });
        }

        for (frame, (out_left, out_right)) in left.iter_mut().zip(right.iter_mut()).enumerate() {
            let frame_head = if frozen {
                head
            } else {
                head - (frames - frame) as f64
            };

            let position = if let Some(mut ease) = self.ease {
                let position = ease.origin + (1.0 - ease.origin) * ease.value;
                ease.value += ease.increment;
                self.ease = (ease.value < 1.0).then_some(ease);
                position
            } else {
                parameters.position
            };

            let regenerate = if self.needs_init {
                self.needs_init = false;
                Some(1)
            } else if self.windows[0].take_regeneration() {
                Some(1)
            } else if self.windows[1].take_regeneration() {
                Some(0)
            } else {
                None
            };
            if let Some(index) = regenerate {
                let half = self.width / 2;
                let new_ratio = ratio.clamp(self.previous_ratio * 0.5, self.previous_ratio * 2.0);
                self.previous_ratio = new_ratio;
                let partner = &self.windows[1 - index];
                let (start, rise) = if partner.is_active() {
                    // short windows may regenerate before their search completed
                    self.correlator.finish();
                    (self.correlator.best_match() as f64, partner.fall())
                } else {
                    let delay = self.target_delay(store, position, half, new_ratio);
                    (frame_head - delay, half)
                };
                // where the search for the splice after this one should look
                let advance = if frozen { 0.0 } else { rise as f64 };
                let next_target =
                    frame_head + advance - self.target_delay(store, position, half, new_ratio);
                self.schedule(store, index, start, new_ratio, rise, half, next_target);
            }

            if self.search_clock % Self::SEARCH_INTERVAL == 0 && !self.correlator.done() {
                self.correlator.evaluate_some_candidates();
            }
            self.search_clock = self.search_clock.wrapping_add(1);

            let (left_a, right_a) = self.windows[0].render(store);
            let (left_b, right_b) = self.windows[1].render(store);
            *out_left = left_a + left_b;
            *out_right = right_a + right_b;

            if !(out_left.is_finite() && out_right.is_finite()) {
                *out_left = 0.0;
                *out_right = 0.0;
                self.flush();
            }
        }

        self.filter.process(left, right);
    }

    fn reset(&mut self) {
        self.flush();
        self.ease = None;
        self.previous_ratio = 1.0;
        self.search_clock = 0;
        self.tap.reset();
    }
}

// -------------------------------------------------------------------------------------------------
