//! Codec error types.

use std::num::ParseIntError;
use std::str::Utf8Error;

use thiserror::Error;

/// A frame could not be turned into a [`Packet`](crate::Packet).
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Fewer than two structural delimiters were found.
    #[error("delimiter not found in message bytes")]
    MissingDelimiter,
    /// A length prefix was not a non-negative decimal integer.
    #[error("could not parse {field} length: {source}")]
    InvalidLength {
        /// Which prefix failed (`type` or `stream id`).
        field: &'static str,
        /// Underlying parse failure.
        #[source]
        source: ParseIntError,
    },
    /// The body is shorter than the declared field lengths.
    #[error("delimited message data bytes too short: need {expected}, have {actual}")]
    Truncated {
        /// Bytes required by the length prefixes.
        expected: usize,
        /// Bytes actually present.
        actual: usize,
    },
    /// The declared lengths do not fit in `usize` when added.
    #[error("declared field lengths overflow")]
    LengthOverflow,
    /// A field is not valid UTF-8 (including a length that splits a character).
    #[error("{field} is not valid utf-8: {source}")]
    InvalidUtf8 {
        /// Which field failed.
        field: &'static str,
        /// Underlying UTF-8 error.
        #[source]
        source: Utf8Error,
    },
    /// The JSON codec could not parse the frame.
    #[error("invalid packet json: {0}")]
    Json(#[from] serde_json::Error),
}

/// A codec could not be built from its configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// The delimited codec needs at least one delimiter byte.
    #[error("delimiter must not be empty")]
    EmptyDelimiter,
    /// Digits in the delimiter would run into the decimal length prefixes.
    #[error("delimiter must not contain ascii digits: {0:?}")]
    DigitDelimiter(String),
}
