//! Error types for the whole crate.
//!
//! There is no per-thread "last error" slot here: every fallible operation
//! returns a `Result`, propagated with `?`, all the way out to the caller.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while converting an image.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad constructor arguments (`ConverterOptions`, `Parameters`, ...).
    #[error("{0}")]
    Config(String),

    /// Misuse of the block-ingress protocol (double copy, wrong shape, ...).
    #[error("{0}")]
    Protocol(String),

    /// The pyramid/chunk geometry could not be made consistent (should not
    /// happen for any image this crate plans itself; it would indicate an
    /// internal bug in the planner or an engine invariant violation).
    #[error("image layout")]
    Layout,

    /// A compression codec failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// Failure from the container backend or the filesystem.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Anything that should never happen if this crate is correct.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol(message.into())
    }

    pub fn codec(message: impl Into<String>) -> Self {
        Error::Codec(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal(message.into())
    }
}

/// Predefined protocol/config message text, kept verbatim so callers that
/// match on message text keep working.
pub mod messages {
    pub const UNSUPPORTED_DATA_TYPE: &str = "Unsupported data type.";
    pub const IMAGE_EXTENT_REQUIRED: &str = "Image extent is not optional.";
    pub const DIMENSION_SEQUENCE_REQUIRED: &str = "Dimension sequence is not optional.";
    pub const SIZE_REQUIRED: &str = "Size is not optional.";
    pub const INDEX_REQUIRED: &str = "Index is not optional.";
    pub const UNSUPPORTED_DIMENSION: &str = "Unsupported dimension.";
    pub const BLOCK_ALREADY_COPIED: &str = "Block data has already been copied";
    pub const BLOCK_TYPE_MISMATCH: &str = "Block data type does not match converter data type";
    pub const BLOCK_NO_OVERLAP: &str = "Block data has no overlap with result image";
    pub const INVALID_DATA_SIZE: &str = "Invalid data size";
}
