use std::{error, fmt, io};

// -------------------------------------------------------------------------------------------------

/// Provides an enumeration of all possible errors reported by textura.
///
/// Errors are only raised while setting up voices and stores. Block processing never fails:
/// invalid control values get clamped and non-finite signals are flushed to zero instead.
#[derive(Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    ParameterError(String),
    BufferSizeError(usize),
    IoError(io::Error),
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParameterError(str) => write!(f, "Invalid parameter: {str}"),
            Self::BufferSizeError(frames) => {
                write!(f, "Invalid sample buffer size: {frames} frames")
            }
            Self::IoError(err) => err.fmt(f),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::IoError(err)
    }
}
