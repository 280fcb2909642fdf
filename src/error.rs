use std::fmt::{Display, Formatter};
use std::io;

/// Errors surfaced by sketch operations and the ingest pipeline.
#[derive(Debug)]
pub enum SketchError {
    /// Two collectors with different geometry were combined.
    GeometryMismatch(&'static str),
    /// A parameter was outside its valid range.
    InvalidArgument(String),
    /// Socket or file I/O failed.
    Io(io::Error),
    /// A serialized sketch could not be decoded.
    Decode(String),
}

impl Display for SketchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SketchError::GeometryMismatch(what) => {
                f.write_fmt(format_args!("geometry mismatch: {}", what))
            }
            SketchError::InvalidArgument(what) => {
                f.write_fmt(format_args!("invalid argument: {}", what))
            }
            SketchError::Io(err) => f.write_fmt(format_args!("io error: {}", err)),
            SketchError::Decode(err) => f.write_fmt(format_args!("decode error: {}", err)),
        }
    }
}

impl std::error::Error for SketchError {}

impl From<io::Error> for SketchError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<base64::DecodeError> for SketchError {
    fn from(value: base64::DecodeError) -> Self {
        Self::Decode(format!("{}", value))
    }
}

impl From<rmp_serde::decode::Error> for SketchError {
    fn from(value: rmp_serde::decode::Error) -> Self {
        Self::Decode(format!("{}", value))
    }
}
