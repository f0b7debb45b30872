//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CborResult<T> = Result<T, CborError>;

/// Errors that can occur during encoding or decoding.
///
/// Decoder variants describe malformed input and are fatal to the current
/// decode call; no partial value is returned. Encoder variants describe
/// policy violations and are fatal to the current encode call; bytes written
/// so far are discarded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CborError {
    /// Input ended in the middle of an item.
    #[error("Insufficient data")]
    InsufficientData,

    /// Reserved additional-info value 28, 29 or 30.
    #[error("Additional info not implemented: {ai}")]
    AdditionalInfoNotImplemented {
        /// The offending additional-info value.
        ai: u8,
    },

    /// A BREAK byte outside an open indefinite-length container.
    #[error("Invalid BREAK")]
    InvalidBreak,

    /// Indefinite length on a major type that does not allow it, or an
    /// indefinite-length chunk nested inside an indefinite-length string.
    #[error("Invalid indefinite encoding")]
    InvalidIndefiniteEncoding,

    /// A chunk inside an indefinite-length string had a different major type.
    #[error("Invalid major type in indefinite encoding: {major}")]
    InvalidIndefiniteMajor {
        /// Major type of the offending chunk.
        major: u8,
    },

    /// BREAK in the value slot of an indefinite-length map.
    #[error("Invalid map length")]
    InvalidMapLength,

    /// Two-byte simple value whose argument fits the one-byte form.
    #[error("Invalid two-byte encoding of simple value {value}")]
    InvalidSimpleEncoding {
        /// The simple value that was encoded with two bytes.
        value: u8,
    },

    /// Bytes remained after the first decoded item.
    #[error("Unexpected data after end of item at byte {offset}")]
    UnexpectedData {
        /// Offset of the first trailing byte.
        offset: usize,
    },

    /// A text string payload was not valid UTF-8.
    #[error("Invalid UTF-8 in text string")]
    InvalidUtf8,

    /// Canonical encoding was requested.
    #[error("canonical mode not implemented")]
    CanonicalUnimplemented,

    /// An undefined map key while `disallow_undefined_keys` is set.
    #[error("Invalid Map key: undefined")]
    UndefinedMapKey,

    /// A container was entered twice on the same encode path.
    #[error("Loop detected while CBOR encoding")]
    LoopDetected,

    /// A custom value whose kind has no registered encoder.
    #[error("Unknown type: {kind}")]
    UnknownType {
        /// Kind name of the value that could not be dispatched.
        kind: String,
    },

    /// A tag interpreter rejected its payload.
    ///
    /// Only surfaced directly under `strict_tags`; otherwise the message is
    /// attached to the returned `Tagged` wrapper.
    #[error("Tag {tag}: {message}")]
    TagInterpreter {
        /// The tag number whose interpreter failed.
        tag: u64,
        /// Description of the failure.
        message: String,
    },
}

impl CborError {
    /// Create a tag-interpreter error.
    pub fn tag(tag: u64, message: impl Into<String>) -> Self {
        Self::TagInterpreter {
            tag,
            message: message.into(),
        }
    }

    /// Create an unknown-type error.
    pub fn unknown_type(kind: impl Into<String>) -> Self {
        Self::UnknownType { kind: kind.into() }
    }
}
