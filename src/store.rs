//! Recorded audio history shared by all playback engines of a voice.

use assume::assume;

use crate::{utils::flush_non_finite, Error};

pub mod quality;

pub use quality::StorageQuality;

use quality::{
    decode_linear16, decode_linear8, decode_mulaw, encode_linear16, encode_linear8, encode_mulaw,
};

// -------------------------------------------------------------------------------------------------

/// Interpolation used when reading fractional positions from a [`SampleStore`].
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
pub enum ReadKernel {
    /// Zero-order hold: the sample at the integer part of the position.
    Nearest = 0,
    /// Linear interpolation between two neighbors.
    Linear = 1,
    /// 4-point, 3rd-order Hermite interpolation.
    #[default]
    Hermite = 2,
}

impl ReadKernel {
    /// Map a host index to a kernel. Unknown indices fall back to [`ReadKernel::Hermite`].
    pub fn from_index(index: usize) -> Self {
        u8::try_from(index)
            .ok()
            .and_then(Self::from_repr)
            .unwrap_or_default()
    }
}

// -------------------------------------------------------------------------------------------------

/// Describes a destructive storage quality change: the old content got discarded and the
/// write cursor restarted at 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QualityTransition {
    pub from: StorageQuality,
    pub to: StorageQuality,
    /// Store generation after the transition.
    pub generation: u64,
}

// -------------------------------------------------------------------------------------------------

/// Backing memory of the store in the current storage quality.
#[derive(Debug)]
enum Storage {
    Float(Box<[f32]>),
    Linear16(Box<[i16]>),
    Linear8(Box<[i8]>),
    MuLaw8(Box<[u8]>),
}

impl Storage {
    fn new(quality: StorageQuality, len: usize) -> Self {
        match quality {
            StorageQuality::Float => Self::Float(vec![0.0; len].into_boxed_slice()),
            StorageQuality::Linear16 => Self::Linear16(vec![0; len].into_boxed_slice()),
            StorageQuality::Linear8 => Self::Linear8(vec![0; len].into_boxed_slice()),
            // 0xFF is the µ-law code for silence
            StorageQuality::MuLaw8 => Self::MuLaw8(vec![0xFF; len].into_boxed_slice()),
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Float(data) => data.len(),
            Self::Linear16(data) => data.len(),
            Self::Linear8(data) => data.len(),
            Self::MuLaw8(data) => data.len(),
        }
    }

    #[inline(always)]
    fn get(&self, index: usize) -> f32 {
        assume!(unsafe: index < self.len(), "Indices are masked by the store");
        match self {
            Self::Float(data) => data[index],
            Self::Linear16(data) => decode_linear16(data[index]),
            Self::Linear8(data) => decode_linear8(data[index]),
            Self::MuLaw8(data) => decode_mulaw(data[index]),
        }
    }

    #[inline(always)]
    fn set(&mut self, index: usize, value: f32) {
        match self {
            Self::Float(data) => data[index] = value,
            Self::Linear16(data) => data[index] = encode_linear16(value),
            Self::Linear8(data) => data[index] = encode_linear8(value),
            Self::MuLaw8(data) => data[index] = encode_mulaw(value),
        }
    }

    fn clear(&mut self) {
        match self {
            Self::Float(data) => data.fill(0.0),
            Self::Linear16(data) => data.fill(0),
            Self::Linear8(data) => data.fill(0),
            Self::MuLaw8(data) => data.fill(0xFF),
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Power-of-two sized ring of interleaved mono or stereo frames, the recorded history all
/// playback engines read from.
///
/// Positions passed to the read functions are absolute, fractional frame positions which get
/// wrapped by masking, so they may run freely past the ring's end or below zero. The write
/// cursor ([`Self::head`]) is the position the next frame gets written to.
///
/// While frozen, [`Self::write`] is ignored: the cursor stays and the content never changes.
#[derive(Debug)]
pub struct SampleStore {
    storage: Storage,
    quality: StorageQuality,
    channel_count: usize,
    frame_count: usize,
    frame_mask: usize,
    head: usize,
    frozen: bool,
    generation: u64,
}

impl SampleStore {
    /// Max number of channels a store can hold.
    pub const MAX_CHANNELS: usize = 2;

    /// Create a new, silent store. `frame_count` gets rounded up to the next power of two.
    pub fn new(
        frame_count: usize,
        channel_count: usize,
        quality: StorageQuality,
    ) -> Result<Self, Error> {
        if channel_count == 0 || channel_count > Self::MAX_CHANNELS {
            return Err(Error::ParameterError(format!(
                "Invalid store channel count: must be 1 or 2, but is {channel_count}"
            )));
        }
        let frame_count = match frame_count.checked_next_power_of_two() {
            Some(count) if frame_count >= 4 => count,
            _ => return Err(Error::BufferSizeError(frame_count)),
        };
        let sample_count = frame_count
            .checked_mul(channel_count)
            .ok_or(Error::BufferSizeError(frame_count))?;
        log::debug!(
            "Creating sample store with {frame_count} frames, {channel_count} channels, \
            {quality} quality ({} bytes)",
            sample_count * quality.bytes_per_sample()
        );
        Ok(Self {
            storage: Storage::new(quality, sample_count),
            quality,
            channel_count,
            frame_count,
            frame_mask: frame_count - 1,
            head: 0,
            frozen: false,
            generation: 0,
        })
    }

    /// Number of frames in the ring. Always a power of two.
    #[inline]
    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    #[inline]
    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    /// Position of the next written frame.
    #[inline]
    pub fn head(&self) -> usize {
        self.head
    }

    #[inline]
    pub fn quality(&self) -> StorageQuality {
        self.quality
    }

    /// Incremented on every destructive quality transition.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[inline]
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Enable or disable writing. Reads stay valid while frozen.
    pub fn set_freeze(&mut self, frozen: bool) {
        self.frozen = frozen;
    }

    /// Change the storage quality. Reallocates the storage, discards all recorded content and
    /// restarts the write cursor. Returns `None` when the quality did not change.
    ///
    /// Not real-time safe: call from outside the audio callback, or together with freeze.
    pub fn set_quality(&mut self, quality: StorageQuality) -> Option<QualityTransition> {
        if quality == self.quality {
            return None;
        }
        let transition = QualityTransition {
            from: self.quality,
            to: quality,
            generation: self.generation + 1,
        };
        log::info!("Changing sample store quality from {} to {}", self.quality, quality);
        self.storage = Storage::new(quality, self.frame_count * self.channel_count);
        self.quality = quality;
        self.head = 0;
        self.generation = transition.generation;
        Some(transition)
    }

    /// Silence all content. The write cursor is kept.
    pub fn clear(&mut self) {
        self.storage.clear();
    }

    /// Append a single frame at the write cursor and advance it, unless frozen.
    /// Missing channels in `frame` are written as silence, surplus ones are ignored.
    pub fn write(&mut self, frame: &[f32]) {
        if self.frozen {
            return;
        }
        let base = self.head * self.channel_count;
        for channel in 0..self.channel_count {
            let value = frame.get(channel).copied().map_or(0.0, flush_non_finite);
            self.storage.set(base + channel, value);
        }
        self.head = (self.head + 1) & self.frame_mask;
    }

    /// Append a block of stereo frames, unless frozen. Mono stores receive the mid signal.
    pub fn write_stereo(&mut self, left: &[f32], right: &[f32]) {
        debug_assert_eq!(left.len(), right.len(), "Channel lengths must match");
        if self.frozen {
            return;
        }
        for (&l, &r) in left.iter().zip(right) {
            match self.channel_count {
                1 => self.write(&[0.5 * (l + r)]),
                _ => self.write(&[l, r]),
            }
        }
    }

    /// Raw sample at an absolute, wrapped frame index.
    #[inline(always)]
    pub fn sample(&self, frame: i64, channel: usize) -> f32 {
        debug_assert!(channel < self.channel_count, "Invalid channel index");
        let channel = channel.min(self.channel_count - 1);
        let index = ((frame as usize) & self.frame_mask) * self.channel_count + channel;
        self.storage.get(index)
    }

    /// Zero-order hold read: the frame at the integer part of `position`.
    #[inline]
    pub fn read_nearest(&self, position: f64, channel: usize) -> f32 {
        self.sample(position.floor() as i64, channel)
    }

    /// Linear interpolated read.
    #[inline]
    pub fn read_linear(&self, position: f64, channel: usize) -> f32 {
        let floor = position.floor();
        let fraction = (position - floor) as f32;
        let index = floor as i64;
        let y0 = self.sample(index, channel);
        let y1 = self.sample(index + 1, channel);
        y0 + (y1 - y0) * fraction
    }

    /// 4-point, 3rd-order Hermite interpolated read.
    #[inline]
    pub fn read_hermite(&self, position: f64, channel: usize) -> f32 {
        let floor = position.floor();
        let fraction = (position - floor) as f32;
        let index = floor as i64;
        let ym1 = self.sample(index - 1, channel);
        let y0 = self.sample(index, channel);
        let y1 = self.sample(index + 1, channel);
        let y2 = self.sample(index + 2, channel);

        let c0 = y0;
        let c1 = (y1 - ym1) * 0.5;
        let c2 = ym1 - y0 * 2.5 + y1 * 2.0 - y2 * 0.5;
        let c3 = (y2 - ym1) * 0.5 + (y0 - y1) * 1.5;
        ((c3 * fraction + c2) * fraction + c1) * fraction + c0
    }

    /// Read with the given kernel at an absolute position.
    #[inline]
    pub fn read(&self, kernel: ReadKernel, position: f64, channel: usize) -> f32 {
        match kernel {
            ReadKernel::Nearest => self.read_nearest(position, channel),
            ReadKernel::Linear => self.read_linear(position, channel),
            ReadKernel::Hermite => self.read_hermite(position, channel),
        }
    }

    /// Read with the given kernel `delay` frames behind the most recently written frame.
    #[inline]
    pub fn read_behind_head(&self, kernel: ReadKernel, delay: f64, channel: usize) -> f32 {
        self.read(kernel, self.head as f64 - 1.0 - delay, channel)
    }

    /// Store channel which feeds the given output channel: mono stores feed both outputs.
    #[inline]
    pub fn source_channel(&self, output_channel: usize) -> usize {
        output_channel.min(self.channel_count - 1)
    }
}

// -------------------------------------------------------------------------------------------------
