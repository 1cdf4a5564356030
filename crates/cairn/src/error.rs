//! Error and Result types for codec and block store operations.

use std::io;
use thiserror::Error;

/// A convenience `Result` type for Cairn operations.
pub type Result<T> = std::result::Result<T, CairnError>;

/// The error type for codec and block store operations.
#[derive(Debug, Error)]
pub enum CairnError {
    /// A bitstream ran past the end of its buffer.
    #[error("stream out of bounds: {0}")]
    OutOfBounds(&'static str),

    /// The supplied argument does not name a live block or valid range.
    #[error("bad argument: {0}")]
    BadArg(&'static str),

    /// A codec-level invariant was violated during decode.
    #[error("bad data: {0}")]
    BadData(&'static str),

    /// The current volume has no free pages left.
    #[error("volume overflow")]
    Overflow,

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
