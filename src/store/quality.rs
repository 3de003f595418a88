//! Storage formats of the sample store and their codecs.

// -------------------------------------------------------------------------------------------------

/// Precision in which a [`SampleStore`](crate::SampleStore) keeps its samples.
///
/// Lower qualities trade fidelity for a gritty, lo-fi character and a smaller memory footprint.
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
pub enum StorageQuality {
    /// 32-bit float.
    #[default]
    Float = 0,
    /// 16-bit linear.
    Linear16 = 1,
    /// 8-bit linear.
    Linear8 = 2,
    /// 8-bit G.711 µ-law.
    MuLaw8 = 3,
}

impl StorageQuality {
    /// Map a host index to a quality. Unknown indices fall back to [`StorageQuality::Float`].
    pub fn from_index(index: usize) -> Self {
        u8::try_from(index)
            .ok()
            .and_then(Self::from_repr)
            .unwrap_or_default()
    }

    /// Size of a single stored sample in bytes.
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            Self::Float => 4,
            Self::Linear16 => 2,
            Self::Linear8 | Self::MuLaw8 => 1,
        }
    }
}

// -------------------------------------------------------------------------------------------------

#[inline]
pub fn encode_linear16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

#[inline]
pub fn decode_linear16(value: i16) -> f32 {
    value as f32 / i16::MAX as f32
}

#[inline]
pub fn encode_linear8(sample: f32) -> i8 {
    (sample.clamp(-1.0, 1.0) * i8::MAX as f32).round() as i8
}

#[inline]
pub fn decode_linear8(value: i8) -> f32 {
    value as f32 / i8::MAX as f32
}

// -------------------------------------------------------------------------------------------------

const MULAW_BIAS: i32 = 0x84;
const MULAW_CLIP: i32 = 32635;

/// Segment (exponent) lookup for µ-law compression, indexed by the biased magnitude >> 7.
static MULAW_EXPONENTS: [u8; 256] = mulaw_exponent_table();

/// µ-law expansion table: byte to linear 16-bit value.
static MULAW_DECODE: [i16; 256] = mulaw_decode_table();

const fn mulaw_exponent_table() -> [u8; 256] {
    let mut table = [0; 256];
    let mut i = 2;
    while i < 256 {
        table[i] = 7 - (i as u8).leading_zeros() as u8;
        i += 1;
    }
    table
}

const fn mulaw_decode_table() -> [i16; 256] {
    let mut table = [0; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = mulaw_expand(i as u8);
        i += 1;
    }
    table
}

const fn mulaw_expand(byte: u8) -> i16 {
    let value = !byte;
    let exponent = ((value & 0x70) >> 4) as u32;
    let magnitude = ((((value & 0x0F) as i32) << 3) + MULAW_BIAS) << exponent;
    if value & 0x80 != 0 {
        (MULAW_BIAS - magnitude) as i16
    } else {
        (magnitude - MULAW_BIAS) as i16
    }
}

/// Compress a linear 16-bit sample to a G.711 µ-law byte.
#[inline]
pub fn mulaw_compress(sample: i16) -> u8 {
    let mut magnitude = sample as i32;
    let sign = if magnitude < 0 {
        magnitude = -magnitude;
        0x80
    } else {
        0x00
    };
    magnitude = magnitude.min(MULAW_CLIP) + MULAW_BIAS;
    let exponent = MULAW_EXPONENTS[((magnitude >> 7) & 0xFF) as usize];
    let mantissa = ((magnitude >> (exponent + 3)) & 0x0F) as u8;
    !(sign | (exponent << 4) | mantissa)
}

/// Expand a G.711 µ-law byte to a linear 16-bit sample.
#[inline]
pub fn mulaw_decompress(byte: u8) -> i16 {
    MULAW_DECODE[byte as usize]
}

#[inline]
pub fn encode_mulaw(sample: f32) -> u8 {
    let linear = (sample.clamp(-1.0, 1.0) * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32);
    mulaw_compress(linear as i16)
}

#[inline]
pub fn decode_mulaw(byte: u8) -> f32 {
    mulaw_decompress(byte) as f32 / 32768.0
}

// -------------------------------------------------------------------------------------------------
