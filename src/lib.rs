#![doc = include_str!("../README.md")]

// private mods (will be partly re-exported)
mod engine;
mod error;
mod parameters;
mod store;
mod voice;

// public, flat re-exports
pub use error::Error;

pub use parameters::{PlaybackMode, TextureParameters};

pub use store::{QualityTransition, ReadKernel, SampleStore, StorageQuality};

pub use engine::PlaybackEngine;

pub use voice::{TextureConfig, TextureVoice};

// public mods
pub mod utils;

pub mod engines {
    //! Playback engines which re-synthesize audio from a [`SampleStore`](crate::SampleStore).

    pub use super::engine::{
        correlator::Correlator,
        granular::{GrainEngine, GrainVoice, DEFAULT_GRAIN_POOL_SIZE},
        looping::{LoopEngine, LoopState},
        stretch::{StretchEngine, SynthesisWindow},
    };
}

pub mod codecs {
    //! Sample codecs used by the quantized [`StorageQuality`](crate::StorageQuality) formats.

    pub use super::store::quality::{
        decode_linear16, decode_linear8, decode_mulaw, encode_linear16, encode_linear8,
        encode_mulaw, mulaw_compress, mulaw_decompress,
    };
}
