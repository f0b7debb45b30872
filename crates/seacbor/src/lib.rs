//! # SeaCBOR
//!
//! RFC 8949 CBOR encoding and decoding over a dynamic [`Value`] model.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                encode / decode facade                 │
//! │   (to_cbor*, from_cbor*, Encoder, Decoder, options)   │
//! └──────────┬─────────────────────────────┬─────────────┘
//!            │                             │
//! ┌──────────▼──────────┐       ┌──────────▼─────────────┐
//! │      Encoder        │       │        Decoder         │
//! │ (value dispatch,    │       │ (item recursion,       │
//! │  cycle detection)   │       │  tag interpretation)   │
//! └──────────┬──────────┘       └──────────┬─────────────┘
//!            │                             │
//! ┌──────────▼─────────────────────────────▼─────────────┐
//! │        head codec / float codec / byte cursor         │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key behaviors
//!
//! - **Numbers**: integers stay exact up to the full 64-bit wire range in
//!   either sign; anything wider rides in a tag 2/3 bignum. Whole floats
//!   within `2^53 - 1` collapse to integers on the wire.
//! - **Tags**: a standard registry interprets dates, bignums, decimal
//!   fractions, URIs, regular expressions, sets and RFC 8746 typed arrays;
//!   interpreter failures are attached to the returned wrapper rather than
//!   aborting the decode.
//! - **Indefinite lengths**: decoded everywhere RFC 8949 allows them;
//!   produced on request via [`to_cbor_indefinite`].
//! - **Canonical mode**: declared, not implemented; [`to_canonical_cbor`]
//!   always fails.
//!
//! ## Usage
//!
//! ```
//! use seacbor::{from_cbor, to_cbor, Value};
//!
//! let value = Value::Array(vec![Value::Integer(1), Value::from("two")]);
//! let bytes = to_cbor(&value).unwrap();
//! let decoded = from_cbor(&bytes).unwrap();
//! assert_eq!(value, decoded);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod buffer;
mod cycles;
mod decode;
mod encode;
mod error;
mod float;
mod head;
mod tags;
mod typed_array;
mod value;

pub use cycles::LoopDetector;
pub use decode::{
    from_cbor, from_cbor_all, from_cbor_all_with, from_cbor_with, DecodeOptions, Decoder,
};
pub use encode::{
    to_canonical_cbor, to_cbor, to_cbor_indefinite, to_cbor_seq, to_cbor_with, CustomEncoder,
    DateFormat, EncodeOptions, Encoder, LoopPolicy, TypeRegistry, UndefinedMode,
};
pub use error::{CborError, CborResult};
pub use tags::{TagInterpreter, TagRegistry};
pub use typed_array::TypedArray;
pub use value::{Bigfloat, Decimal, Regexp, Tagged, Value};

/// Trait for types that can be encoded to CBOR.
pub trait Encode {
    /// Encode this value to CBOR bytes.
    fn encode(&self) -> CborResult<Vec<u8>>;
}

/// Trait for types that can be decoded from CBOR.
pub trait Decode: Sized {
    /// Decode this value from CBOR bytes.
    fn decode(bytes: &[u8]) -> CborResult<Self>;
}

impl Encode for Value {
    fn encode(&self) -> CborResult<Vec<u8>> {
        to_cbor(self)
    }
}

impl Decode for Value {
    fn decode(bytes: &[u8]) -> CborResult<Self> {
        from_cbor(bytes)
    }
}
