//! Dynamic CBOR value type.

use std::rc::Rc;

use chrono::{DateTime, Utc};
use data_encoding::{BASE64, BASE64URL_NOPAD, HEXLOWER};
use num_bigint::BigInt;
use url::Url;

use crate::typed_array::TypedArray;

/// Smallest integer representable without a bignum, `-2^64`.
pub(crate) const INT_MIN: i128 = -(1i128 << 64);
/// Largest integer representable without a bignum, `2^64 - 1`.
pub(crate) const INT_MAX: i128 = (1i128 << 64) - 1;

/// A dynamic CBOR value.
///
/// This type covers every RFC 8949 item the codec can decode, plus the
/// semantic values produced by the standard tag registry (dates, bignums,
/// sets, typed arrays, ...) and two encoding-side variants: [`Value::Shared`]
/// for identity-preserving shared subtrees and [`Value::Custom`] for values
/// dispatched through a user-installed encoder callback.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Null (simple value 22).
    Null,
    /// Undefined (simple value 23).
    Undefined,
    /// Boolean value.
    Bool(bool),
    /// Integer in `[-2^64, 2^64 - 1]`; anything wider is a [`Value::Bignum`].
    Integer(i128),
    /// Arbitrary-precision integer (tags 2/3).
    Bignum(BigInt),
    /// Floating point value; decoded halves and singles widen to f64.
    Float(f64),
    /// Byte string.
    Bytes(Vec<u8>),
    /// Text string (UTF-8).
    Text(String),
    /// Array of values.
    Array(Vec<Value>),
    /// Map of key-value pairs, insertion order preserved, duplicates kept.
    Map(Vec<(Value, Value)>),
    /// Tagged value whose tag has no interpreter, or whose interpreter
    /// failed (see [`Tagged::err`]), or whose tag is a presentation hint
    /// (21/22/23).
    Tagged(Box<Tagged>),
    /// Opaque simple value in `0..=19` or `32..=255`.
    Simple(u8),
    /// Calendar timestamp (tags 0/1).
    Date(DateTime<Utc>),
    /// Decimal fraction `m * 10^e` (tag 4).
    Decimal(Decimal),
    /// Binary-scaled fraction `m * 2^e` (tag 5).
    Bigfloat(Bigfloat),
    /// Parsed URI (tag 32).
    Url(Url),
    /// Compiled regular expression (tag 35).
    Regexp(Regexp),
    /// Set of values (tag 258).
    Set(Vec<Value>),
    /// Typed numeric array (tags 64-86, RFC 8746).
    TypedArray(TypedArray),
    /// Shared subtree; encodes as the inner value, with the `Rc` pointer
    /// identity feeding the loop detector.
    Shared(Rc<Value>),
    /// Extension value encoded by the callback registered under `kind`.
    Custom {
        /// Registry key selecting the encoder callback.
        kind: String,
        /// Payload handed to the callback.
        payload: Box<Value>,
    },
}

impl Value {
    /// Build an integer value, falling back to a bignum outside
    /// `[-2^64, 2^64 - 1]`.
    pub fn integer(n: i128) -> Self {
        if (INT_MIN..=INT_MAX).contains(&n) {
            Value::Integer(n)
        } else {
            Value::Bignum(BigInt::from(n))
        }
    }

    /// Wrap `value` under `tag`.
    pub fn tagged(tag: u64, value: Value) -> Self {
        Value::Tagged(Box::new(Tagged::new(tag, value)))
    }

    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check if this value is undefined.
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Get this value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get this value as an integer, if it is one.
    pub fn as_integer(&self) -> Option<i128> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Get this value as a float, if it is one.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(x) => Some(*x),
            _ => None,
        }
    }

    /// Get this value as bytes, if it is a byte string.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Get this value as a string, if it is a text string.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get this value as an array, if it is one.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Get this value as a map, if it is one.
    pub fn as_map(&self) -> Option<&[(Value, Value)]> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Get this value as a tagged wrapper, if it is one.
    pub fn as_tagged(&self) -> Option<&Tagged> {
        match self {
            Value::Tagged(t) => Some(t),
            _ => None,
        }
    }

    /// Look up a text key in this map value; first match wins.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(pairs) => pairs
                .iter()
                .find(|(k, _)| matches!(k, Value::Text(s) if s == key))
                .map(|(_, v)| v),
            _ => None,
        }
    }
}

/// A tagged value: the tag number, the decoded inner item, and the error
/// of a failed interpreter when the decoder is not in strict mode.
#[derive(Debug, Clone, PartialEq)]
pub struct Tagged {
    /// The tag number.
    pub tag: u64,
    /// The inner item.
    pub value: Value,
    /// Message of the interpreter failure, if one was isolated here.
    pub err: Option<String>,
}

impl Tagged {
    /// Wrap `value` under `tag` with no error.
    pub fn new(tag: u64, value: Value) -> Self {
        Self {
            tag,
            value,
            err: None,
        }
    }

    pub(crate) fn with_err(tag: u64, value: Value, err: String) -> Self {
        Self {
            tag,
            value,
            err: Some(err),
        }
    }

    /// Base-N rendering of the inner byte string for the presentation-hint
    /// tags: base64url for 21, base64 for 22, base16 for 23.
    ///
    /// Returns `None` for other tags or when the inner item is not a byte
    /// string.
    pub fn json_view(&self) -> Option<String> {
        let bytes = self.value.as_bytes()?;
        match self.tag {
            21 => Some(BASE64URL_NOPAD.encode(bytes)),
            22 => Some(BASE64.encode(bytes)),
            23 => Some(HEXLOWER.encode(bytes)),
            _ => None,
        }
    }
}

impl From<Tagged> for Value {
    fn from(t: Tagged) -> Self {
        Value::Tagged(Box::new(t))
    }
}

/// A decimal fraction `mantissa * 10^exponent` (tag 4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decimal {
    /// The mantissa.
    pub mantissa: BigInt,
    /// The base-10 exponent.
    pub exponent: i64,
}

/// A binary-scaled fraction `mantissa * 2^exponent` (tag 5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bigfloat {
    /// The mantissa.
    pub mantissa: BigInt,
    /// The base-2 exponent.
    pub exponent: i64,
}

/// A compiled regular expression (tag 35), compared by pattern text.
#[derive(Debug, Clone)]
pub struct Regexp(regex::Regex);

impl Regexp {
    /// Compile `pattern`.
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        regex::Regex::new(pattern).map(Self)
    }

    /// The source pattern.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// The compiled regex.
    pub fn as_regex(&self) -> &regex::Regex {
        &self.0
    }
}

impl PartialEq for Regexp {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl From<regex::Regex> for Regexp {
    fn from(re: regex::Regex) -> Self {
        Self(re)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(i128::from(n))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(i128::from(n))
    }
}

impl From<i128> for Value {
    fn from(n: i128) -> Self {
        Value::integer(n)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Integer(i128::from(n))
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Integer(i128::from(n))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<f32> for Value {
    fn from(x: f32) -> Self {
        Value::Float(f64::from(x))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Value::Bytes(b.to_vec())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

impl From<()> for Value {
    fn from((): ()) -> Self {
        Value::Null
    }
}

impl From<BigInt> for Value {
    fn from(n: BigInt) -> Self {
        Value::Bignum(n)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(d: DateTime<Utc>) -> Self {
        Value::Date(d)
    }
}

impl From<Url> for Value {
    fn from(u: Url) -> Self {
        Value::Url(u)
    }
}

impl From<TypedArray> for Value {
    fn from(t: TypedArray) -> Self {
        Value::TypedArray(t)
    }
}
