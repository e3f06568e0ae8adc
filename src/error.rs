
//! Error type definitions and conversion helpers.

use std::borrow::Cow;
use std::convert::TryFrom;
use std::fmt;
use std::io::ErrorKind;

/// A result that may contain an exr error.
pub type Result<T> = std::result::Result<T, Error>;

/// A result that, if ok, contains nothing, and otherwise contains an exr error.
pub type UnitResult = Result<()>;

pub use std::io::Error as IoError;
pub use std::io::Result as IoResult;

/// An error produced while reading or writing an exr file.
/// Reading invalid or truncated files produces errors, never panics.
#[derive(Debug)]
pub enum Error {

    /// The underlying byte source or byte sink failed.
    Io(IoError),

    /// The first four bytes are not the exr file signature.
    Magic,

    /// The file declares a format version or feature flag
    /// that this implementation does not know.
    Version(Cow<'static, str>),

    /// A header attribute is missing, duplicated, or has an invalid payload.
    Header(Cow<'static, str>),

    /// A structural rule is violated, for example a data window
    /// that does not contain whole samples of every channel.
    Invariant(Cow<'static, str>),

    /// A compressed chunk payload was rejected by its codec.
    Codec {

        /// Name of the rejecting codec.
        codec: &'static str,

        /// Index of the chunk inside its part, if known.
        chunk: Option<usize>,

        /// What the codec complained about.
        message: Cow<'static, str>,
    },

    /// A single allocation request exceeded the configured ceiling.
    /// No memory has been allocated when this is returned.
    MemoryLimit {

        /// The number of bytes that were requested.
        requested: usize,

        /// The configured ceiling in bytes.
        limit: usize,
    },

    /// The cancellation token was triggered. The operation stopped
    /// at the next chunk boundary.
    Cancelled,

    /// The file is valid but uses a feature
    /// that is not supported by this implementation or configuration.
    Unsupported(Cow<'static, str>),
}

impl Error {

    /// Create a `Header` error.
    pub(crate) fn header(message: impl Into<Cow<'static, str>>) -> Self {
        Error::Header(message.into())
    }

    /// Create an `Invariant` error.
    pub(crate) fn invalid(message: impl Into<Cow<'static, str>>) -> Self {
        Error::Invariant(message.into())
    }

    /// Create an `Unsupported` error.
    pub(crate) fn unsupported(message: impl Into<Cow<'static, str>>) -> Self {
        Error::Unsupported(message.into())
    }

    /// Create a `Codec` error without a chunk index.
    /// The reader attaches the chunk index where it is known.
    pub(crate) fn codec(codec: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Error::Codec { codec, chunk: None, message: message.into() }
    }

    /// Attach a chunk index to codec errors, leave all other errors untouched.
    pub(crate) fn while_decoding_chunk(self, chunk_index: usize) -> Self {
        match self {
            Error::Codec { codec, message, .. } =>
                Error::Codec { codec, chunk: Some(chunk_index), message },

            other => other,
        }
    }
}

/// Enable using the `?` operator on `std::io::Result`.
impl From<IoError> for Error {
    fn from(error: IoError) -> Self {
        if error.kind() == ErrorKind::UnexpectedEof {
            Error::invalid("unexpected end of input")
        }
        else {
            Error::Io(error)
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(error) => Some(error),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(error) => write!(formatter, "io error: {}", error),
            Error::Magic => write!(formatter, "not an exr file (signature mismatch)"),
            Error::Version(message) => write!(formatter, "unsupported file version: {}", message),
            Error::Header(message) => write!(formatter, "invalid header: {}", message),
            Error::Invariant(message) => write!(formatter, "invalid content: {}", message),

            Error::Codec { codec, chunk: Some(chunk), message } =>
                write!(formatter, "invalid {} data in chunk {}: {}", codec, chunk, message),

            Error::Codec { codec, chunk: None, message } =>
                write!(formatter, "invalid {} data: {}", codec, message),

            Error::MemoryLimit { requested, limit } =>
                write!(formatter, "allocation of {} bytes exceeds the limit of {} bytes", requested, limit),

            Error::Cancelled => write!(formatter, "operation was cancelled"),
            Error::Unsupported(message) => write!(formatter, "unsupported: {}", message),
        }
    }
}


/// Panic-free conversion of a `usize` to the `i32` the file format stores.
pub fn usize_to_i32(value: usize, name: &'static str) -> Result<i32> {
    i32::try_from(value).map_err(|_| Error::invalid(name))
}

/// Panic-free conversion of an `i32` read from a file into a `usize`.
/// Negative values are rejected with the attached name.
pub fn i32_to_usize(value: i32, name: &'static str) -> Result<usize> {
    usize::try_from(value).map_err(|_| Error::invalid(name))
}

/// Panic-free conversion of a `usize` to the `u64` the offset tables store.
pub fn usize_to_u64(value: usize) -> u64 {
    u64::try_from(value).expect("index does not fit into u64")
}

/// Panic-free conversion of a `u64` read from a file into a `usize`.
pub fn u64_to_usize(value: u64, name: &'static str) -> Result<usize> {
    usize::try_from(value).map_err(|_| Error::invalid(name))
}

/// Panic-free conversion of a `usize` to the `u16` some tables store.
pub fn usize_to_u16(value: usize, name: &'static str) -> Result<u16> {
    u16::try_from(value).map_err(|_| Error::invalid(name))
}
