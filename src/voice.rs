use crate::{
    engine::{
        granular::GrainEngine, looping::LoopEngine, stretch::StretchEngine, PlaybackEngine,
    },
    parameters::{PlaybackMode, TextureParameters},
    store::{QualityTransition, ReadKernel, SampleStore, StorageQuality},
    Error,
};

// -------------------------------------------------------------------------------------------------

/// Construction options of a [`TextureVoice`].
#[derive(Clone, Debug, PartialEq)]
pub struct TextureConfig {
    /// Sample rate of the recorded and rendered audio.
    pub sample_rate: u32,
    /// Length of the recorded history in frames. Gets rounded up to the next power of two.
    pub buffer_frames: usize,
    /// Number of channels in the store: 1 (mid of the input) or 2.
    pub channel_count: usize,
    /// Storage format of the recorded history.
    pub quality: StorageQuality,
    /// Interpolation used by the grain engine.
    pub kernel: ReadKernel,
    /// Max WSOLA window width in frames.
    pub max_width: usize,
    /// Blocks longer than this get processed in chunks.
    pub max_block_length: usize,
}

impl Default for TextureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            buffer_frames: 1 << 17,
            channel_count: 2,
            quality: StorageQuality::default(),
            kernel: ReadKernel::default(),
            max_width: StretchEngine::DEFAULT_MAX_WIDTH,
            max_block_length: 64,
        }
    }
}

impl TextureConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_buffer_frames(mut self, frames: usize) -> Self {
        self.buffer_frames = frames;
        self
    }

    /// Set the buffer length in seconds at the current sample rate, so set the sample rate first.
    pub fn with_buffer_seconds(mut self, seconds: f32) -> Self {
        self.buffer_frames = if seconds.is_finite() && seconds > 0.0 {
            (seconds as f64 * self.sample_rate as f64).ceil() as usize
        } else {
            0
        };
        self
    }

    pub fn with_channel_count(mut self, channel_count: usize) -> Self {
        self.channel_count = channel_count;
        self
    }

    pub fn with_quality(mut self, quality: StorageQuality) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_kernel(mut self, kernel: ReadKernel) -> Self {
        self.kernel = kernel;
        self
    }

    pub fn with_max_width(mut self, max_width: usize) -> Self {
        self.max_width = max_width;
        self
    }

    pub fn with_max_block_length(mut self, max_block_length: usize) -> Self {
        self.max_block_length = max_block_length;
        self
    }

    /// Check the config for values a voice can't be created with.
    pub fn validate(&self) -> Result<(), Error> {
        if self.sample_rate == 0 {
            return Err(Error::ParameterError(
                "Sample rate must be greater than zero".to_string(),
            ));
        }
        if self.channel_count == 0 || self.channel_count > SampleStore::MAX_CHANNELS {
            return Err(Error::ParameterError(format!(
                "Invalid channel count: must be 1 or 2, but is {}",
                self.channel_count
            )));
        }
        if self.buffer_frames < 4 {
            return Err(Error::BufferSizeError(self.buffer_frames));
        }
        if self.max_block_length == 0 {
            return Err(Error::ParameterError(
                "Max block length must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

// -------------------------------------------------------------------------------------------------

/// Records an input stream and re-synthesizes it with one of the playback engines.
///
/// A voice owns the [`SampleStore`] and one engine per [`PlaybackMode`]. Each processed block
/// first applies the freeze state and writes the input into the store, then renders the
/// output with the active engine only.
///
/// ### Example
///
/// ```rust
/// use textura::{PlaybackMode, TextureConfig, TextureParameters, TextureVoice};
///
/// let mut voice = TextureVoice::new(TextureConfig::default().with_buffer_seconds(2.0))?;
/// voice.set_mode(PlaybackMode::Stretch);
///
/// let input = vec![0.0; 256];
/// let (mut left, mut right) = (vec![0.0; 256], vec![0.0; 256]);
/// voice.process(&input, &input, &TextureParameters::default(), &mut left, &mut right);
/// # Ok::<(), textura::Error>(())
/// ```
pub struct TextureVoice {
    config: TextureConfig,
    store: SampleStore,
    mode: PlaybackMode,
    granular: GrainEngine,
    stretch: StretchEngine,
    looping: LoopEngine,
}

impl TextureVoice {
    /// Create a new voice. Allocates the store and all engine state upfront.
    pub fn new(config: TextureConfig) -> Result<Self, Error> {
        config.validate()?;
        let mut config = config;
        let max_width = config
            .max_width
            .min(config.buffer_frames)
            .max(StretchEngine::MIN_WIDTH);
        if max_width != config.max_width {
            log::warn!(
                "Clamping max stretch window width from {} to {max_width} frames",
                config.max_width
            );
            config.max_width = max_width;
        }
        let store = SampleStore::new(config.buffer_frames, config.channel_count, config.quality)?;
        log::debug!(
            "Creating texture voice at {} Hz with {} frames of history",
            config.sample_rate,
            store.frame_count()
        );
        Ok(Self {
            granular: GrainEngine::new(config.sample_rate, config.kernel),
            stretch: StretchEngine::new(config.sample_rate, config.max_width),
            looping: LoopEngine::new(config.sample_rate),
            mode: PlaybackMode::default(),
            store,
            config,
        })
    }

    pub fn config(&self) -> &TextureConfig {
        &self.config
    }

    /// Read-only access to the recorded history.
    pub fn store(&self) -> &SampleStore {
        &self.store
    }

    pub fn mode(&self) -> PlaybackMode {
        self.mode
    }

    /// Switch the active engine. Takes effect with the next processed block. The newly
    /// activated engine starts with a fresh state.
    pub fn set_mode(&mut self, mode: PlaybackMode) {
        if mode != self.mode {
            log::debug!("Switching texture voice from {} to {} mode", self.mode, mode);
            self.mode = mode;
            self.engine_mut().reset();
        }
    }

    /// The currently active engine.
    pub fn engine(&self) -> &dyn PlaybackEngine {
        match self.mode {
            PlaybackMode::Granular => &self.granular,
            PlaybackMode::Stretch => &self.stretch,
            PlaybackMode::Looping => &self.looping,
        }
    }

    fn engine_mut(&mut self) -> &mut dyn PlaybackEngine {
        match self.mode {
            PlaybackMode::Granular => &mut self.granular,
            PlaybackMode::Stretch => &mut self.stretch,
            PlaybackMode::Looping => &mut self.looping,
        }
    }

    /// Change the store's quality. This discards the recorded history, so all engines get
    /// reset when the quality changed. Not real-time safe.
    pub fn set_quality(&mut self, quality: StorageQuality) -> Option<QualityTransition> {
        let transition = self.store.set_quality(quality);
        if transition.is_some() {
            self.config.quality = quality;
            self.reset();
        }
        transition
    }

    /// Reset all engines. The recorded history is kept.
    pub fn reset(&mut self) {
        self.granular.reset();
        self.stretch.reset();
        self.looping.reset();
    }

    /// Reseed the random generators for reproducible renders.
    pub fn seed(&mut self, seed: u64) {
        self.granular.seed(seed);
    }

    /// Record a block of input and render a block of output with the active engine.
    ///
    /// Left and right buffers must have the same length. Outputs always get fully overwritten:
    /// output frames beyond the input's length are silenced.
    pub fn process(
        &mut self,
        input_left: &[f32],
        input_right: &[f32],
        parameters: &TextureParameters,
        output_left: &mut [f32],
        output_right: &mut [f32],
    ) {
        #[cfg(not(feature = "assert-allocs"))]
        self.process_blocks(input_left, input_right, parameters, output_left, output_right);
        #[cfg(feature = "assert-allocs")]
        assert_no_alloc::assert_no_alloc(|| {
            self.process_blocks(input_left, input_right, parameters, output_left, output_right)
        });
    }

    fn process_blocks(
        &mut self,
        input_left: &[f32],
        input_right: &[f32],
        parameters: &TextureParameters,
        output_left: &mut [f32],
        output_right: &mut [f32],
    ) {
        debug_assert_eq!(input_left.len(), input_right.len(), "Input lengths must match");
        debug_assert_eq!(output_left.len(), output_right.len(), "Output lengths must match");
        let frames = input_left
            .len()
            .min(input_right.len())
            .min(output_left.len())
            .min(output_right.len());

        // freeze applies to the whole block, before anything gets written
        self.store.set_freeze(parameters.freeze);

        let mut parameters = parameters.clone();
        let max_block_length = self.config.max_block_length;
        let mut offset = 0;
        while offset < frames {
            let end = (offset + max_block_length).min(frames);
            self.store
                .write_stereo(&input_left[offset..end], &input_right[offset..end]);
            let engine: &mut dyn PlaybackEngine = match self.mode {
                PlaybackMode::Granular => &mut self.granular,
                PlaybackMode::Stretch => &mut self.stretch,
                PlaybackMode::Looping => &mut self.looping,
            };
            engine.process(
                &self.store,
                &parameters,
                &mut output_left[offset..end],
                &mut output_right[offset..end],
            );
            // triggers fire once per block
            parameters.trigger = false;
            offset = end;
        }

        output_left[frames..].fill(0.0);
        output_right[frames..].fill(0.0);
    }
}

// -------------------------------------------------------------------------------------------------
