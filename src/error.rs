use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced while decoding a base64/zlib-encoded numeric peak array.
///
/// Grounded on `mzdata::spectrum::bindata::encodings::ArrayRetrievalError`, which
/// plays the same role for mzML's binary arrays.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("invalid base64 in peak array")]
    MalformedBase64,
    #[error("invalid zlib stream in peak array")]
    MalformedZlib,
    #[error("decoded peak array length {0} is not a multiple of the element size {1}")]
    MalformedPeaks(usize, usize),
}

/// Errors raised by the bidirectional byte-addressable text reader.
#[derive(Debug, Error)]
pub enum BidiReaderError {
    #[error("i/o error in byte reader: {0}")]
    Io(#[from] io::Error),
    #[error("byte offset {0} is past the end of the stream ({1} bytes)")]
    OffsetOutOfRange(u64, u64),
}

/// One unified error type for every fallible operation this crate exposes,
/// matching the propagation policy in the error handling design: I/O errors
/// terminate the operation, format errors carry the offset they were found
/// at, and a handful of conditions are reported through plain `bool`/`Option`
/// returns instead (`NotCached`, per-spectrum `InvalidScanData`) because they
/// are not meant to unwind an otherwise-successful read.
#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("i/o error reading {path}: {source}")]
    IoPath {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed {variant} at byte offset {offset}: {message}")]
    Format {
        variant: &'static str,
        offset: u64,
        message: String,
    },

    #[error("unrecognized schema version {0:?}")]
    UnrecognizedVersion(String),

    #[error("no embedded or rescanned index is available")]
    MissingIndex,

    #[error("spectrum not found for the requested key")]
    NotCached,

    #[error("operation aborted by the progress sink")]
    Aborted,
}

impl From<BidiReaderError> for Error {
    fn from(value: BidiReaderError) -> Self {
        match value {
            BidiReaderError::Io(e) => Error::Io(e),
            BidiReaderError::OffsetOutOfRange(offset, len) => Error::Format {
                variant: "byte offset",
                offset,
                message: format!("offset {} exceeds stream length {}", offset, len),
            },
        }
    }
}

impl Error {
    pub fn format(variant: &'static str, offset: u64, message: impl Into<String>) -> Self {
        Error::Format {
            variant,
            offset,
            message: message.into(),
        }
    }

    pub fn codec(variant: &'static str, offset: u64, err: CodecError) -> Self {
        Error::Format {
            variant,
            offset,
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
