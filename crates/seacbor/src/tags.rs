//! Tag registry: tag number to interpreter dispatch.
//!
//! The decoder hands every `(tag, inner item)` pair to the registry after
//! the inner item is fully decoded. An unregistered tag comes back as a
//! plain [`Tagged`] wrapper. A failing interpreter has its error attached
//! to the wrapper instead of aborting the decode, unless the caller asked
//! for strict interpretation.

use std::collections::HashMap;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use data_encoding::{BASE64, BASE64URL_NOPAD};
use num_bigint::{BigInt, Sign};
use num_traits::ToPrimitive;

use crate::error::{CborError, CborResult};
use crate::typed_array::TypedArray;
use crate::value::{Bigfloat, Decimal, Regexp, Tagged, Value};

/// An interpreter for one tag number.
///
/// Receives the tag and a borrow of the decoded inner item and produces the
/// interpreted value. Interpreters may call back into the codec.
pub type TagInterpreter = Rc<dyn Fn(u64, &Value) -> CborResult<Value>>;

/// The tag number to interpreter table.
#[derive(Clone, Default)]
pub struct TagRegistry {
    interpreters: HashMap<u64, TagInterpreter>,
}

impl TagRegistry {
    /// A registry with no interpreters; every tag decodes to a wrapper.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The standard registry: dates, bignums, decimal fractions, base-N
    /// hints and checks, URIs, regular expressions, sets, typed arrays.
    pub fn standard() -> Self {
        let mut reg = Self::empty();
        reg.insert(0, Rc::new(date_from_string));
        reg.insert(1, Rc::new(date_from_epoch));
        reg.insert(2, Rc::new(unsigned_bignum));
        reg.insert(3, Rc::new(negative_bignum));
        reg.insert(4, Rc::new(decimal_fraction));
        reg.insert(5, Rc::new(bigfloat));
        for tag in [21, 22, 23] {
            reg.insert(tag, Rc::new(base_hint));
        }
        reg.insert(32, Rc::new(parsed_url));
        reg.insert(33, Rc::new(base64url_text));
        reg.insert(34, Rc::new(base64_text));
        reg.insert(35, Rc::new(regexp));
        reg.insert(258, Rc::new(set));
        for tag in (64..=86).filter(|t| *t != 76) {
            reg.insert(tag, Rc::new(typed_array));
        }
        reg
    }

    /// Install `interpreter` for `tag`, replacing any built-in.
    pub fn insert(&mut self, tag: u64, interpreter: TagInterpreter) {
        self.interpreters.insert(tag, interpreter);
    }

    /// Remove the interpreter for `tag`; the tag then decodes to a plain
    /// wrapper.
    pub fn remove(&mut self, tag: u64) {
        self.interpreters.remove(&tag);
    }

    /// Look up the interpreter for `tag`.
    pub fn get(&self, tag: u64) -> Option<&TagInterpreter> {
        self.interpreters.get(&tag)
    }

    /// Interpret `inner` under `tag`.
    ///
    /// With `strict` unset, an interpreter failure is isolated: the raw
    /// payload is returned in a wrapper with [`Tagged::err`] populated.
    pub(crate) fn apply(&self, tag: u64, inner: Value, strict: bool) -> CborResult<Value> {
        let Some(interpreter) = self.interpreters.get(&tag) else {
            return Ok(Tagged::new(tag, inner).into());
        };
        match interpreter(tag, &inner) {
            Ok(v) => Ok(v),
            Err(e) if strict => Err(e),
            Err(e) => Ok(Tagged::with_err(tag, inner, e.to_string()).into()),
        }
    }
}

fn date_from_string(tag: u64, inner: &Value) -> CborResult<Value> {
    let Value::Text(s) = inner else {
        return Err(CborError::tag(tag, "expected a text string"));
    };
    DateTime::parse_from_rfc3339(s)
        .map(|d| Value::Date(d.with_timezone(&Utc)))
        .map_err(|e| CborError::tag(tag, format!("invalid timestamp: {e}")))
}

fn date_from_epoch(tag: u64, inner: &Value) -> CborResult<Value> {
    let out_of_range = || CborError::tag(tag, "epoch seconds out of range");
    match inner {
        Value::Integer(n) => i64::try_from(*n)
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .map(Value::Date)
            .ok_or_else(out_of_range),
        Value::Float(x) if x.is_finite() => {
            let millis = (x * 1000.0).round();
            if millis < i64::MIN as f64 || millis > i64::MAX as f64 {
                return Err(out_of_range());
            }
            DateTime::from_timestamp_millis(millis as i64)
                .map(Value::Date)
                .ok_or_else(out_of_range)
        }
        Value::Bignum(b) => b
            .to_i64()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .map(Value::Date)
            .ok_or_else(out_of_range),
        _ => Err(CborError::tag(tag, "expected epoch seconds")),
    }
}

fn unsigned_bignum(tag: u64, inner: &Value) -> CborResult<Value> {
    let Value::Bytes(b) = inner else {
        return Err(CborError::tag(tag, "expected a byte string"));
    };
    Ok(Value::Bignum(BigInt::from_bytes_be(Sign::Plus, b)))
}

fn negative_bignum(tag: u64, inner: &Value) -> CborResult<Value> {
    let Value::Bytes(b) = inner else {
        return Err(CborError::tag(tag, "expected a byte string"));
    };
    let unsigned = BigInt::from_bytes_be(Sign::Plus, b);
    Ok(Value::Bignum(-unsigned - 1))
}

fn exponent_and_mantissa(tag: u64, inner: &Value) -> CborResult<(i64, BigInt)> {
    let Value::Array(items) = inner else {
        return Err(CborError::tag(tag, "expected a two-element array"));
    };
    if items.len() != 2 {
        return Err(CborError::tag(tag, "expected a two-element array"));
    }
    let exponent = match &items[0] {
        Value::Integer(n) => i64::try_from(*n)
            .map_err(|_| CborError::tag(tag, "exponent out of range"))?,
        _ => return Err(CborError::tag(tag, "exponent must be an integer")),
    };
    let mantissa = match &items[1] {
        Value::Integer(n) => BigInt::from(*n),
        Value::Bignum(b) => b.clone(),
        _ => return Err(CborError::tag(tag, "mantissa must be an integer")),
    };
    Ok((exponent, mantissa))
}

fn decimal_fraction(tag: u64, inner: &Value) -> CborResult<Value> {
    let (exponent, mantissa) = exponent_and_mantissa(tag, inner)?;
    Ok(Value::Decimal(Decimal { mantissa, exponent }))
}

fn bigfloat(tag: u64, inner: &Value) -> CborResult<Value> {
    let (exponent, mantissa) = exponent_and_mantissa(tag, inner)?;
    Ok(Value::Bigfloat(Bigfloat { mantissa, exponent }))
}

// Tags 21/22/23 only annotate how contained byte strings should render in
// JSON. The wrapper is kept so the hint stays observable (Tagged::json_view)
// and the decoded value itself is unaltered.
fn base_hint(tag: u64, inner: &Value) -> CborResult<Value> {
    Ok(Tagged::new(tag, inner.clone()).into())
}

fn parsed_url(tag: u64, inner: &Value) -> CborResult<Value> {
    let Value::Text(s) = inner else {
        return Err(CborError::tag(tag, "expected a text string"));
    };
    url::Url::parse(s)
        .map(Value::Url)
        .map_err(|e| CborError::tag(tag, format!("invalid URI: {e}")))
}

fn base64url_text(tag: u64, inner: &Value) -> CborResult<Value> {
    let Value::Text(s) = inner else {
        return Err(CborError::tag(tag, "expected a text string"));
    };
    // Strict decode: base64url alphabet only (so no padding characters),
    // length mod 4 != 1, zero trailing bits.
    BASE64URL_NOPAD
        .decode(s.as_bytes())
        .map_err(|e| CborError::tag(tag, format!("invalid base64url: {e}")))?;
    Ok(Tagged::new(tag, inner.clone()).into())
}

fn base64_text(tag: u64, inner: &Value) -> CborResult<Value> {
    let Value::Text(s) = inner else {
        return Err(CborError::tag(tag, "expected a text string"));
    };
    // Strict decode: base64 alphabet, canonical padding to a multiple of
    // four, zero trailing bits.
    BASE64
        .decode(s.as_bytes())
        .map_err(|e| CborError::tag(tag, format!("invalid base64: {e}")))?;
    Ok(Tagged::new(tag, inner.clone()).into())
}

fn regexp(tag: u64, inner: &Value) -> CborResult<Value> {
    let Value::Text(s) = inner else {
        return Err(CborError::tag(tag, "expected a text string"));
    };
    Regexp::new(s)
        .map(Value::Regexp)
        .map_err(|e| CborError::tag(tag, format!("invalid pattern: {e}")))
}

fn set(tag: u64, inner: &Value) -> CborResult<Value> {
    let Value::Array(items) = inner else {
        return Err(CborError::tag(tag, "expected an array"));
    };
    Ok(Value::Set(items.clone()))
}

fn typed_array(tag: u64, inner: &Value) -> CborResult<Value> {
    let Value::Bytes(b) = inner else {
        return Err(CborError::tag(tag, "expected a byte string"));
    };
    TypedArray::from_tagged_bytes(tag, b).map(Value::TypedArray)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn apply(tag: u64, inner: Value) -> Value {
        TagRegistry::standard().apply(tag, inner, false).unwrap()
    }

    #[test]
    fn date_from_rfc3339_text() {
        let v = apply(0, Value::from("2013-03-21T20:04:00Z"));
        let expected = Utc.with_ymd_and_hms(2013, 3, 21, 20, 4, 0).unwrap();
        assert_eq!(v, Value::Date(expected));
    }

    #[test]
    fn date_from_epoch_int_and_float() {
        let expected = Utc.with_ymd_and_hms(2013, 3, 21, 20, 4, 0).unwrap();
        assert_eq!(apply(1, Value::Integer(1363896240)), Value::Date(expected));

        let with_millis = apply(1, Value::Float(1363896240.5));
        assert_eq!(
            with_millis,
            Value::Date(DateTime::from_timestamp_millis(1363896240500).unwrap())
        );
    }

    #[test]
    fn bignums_from_byte_strings() {
        let v = apply(2, Value::Bytes(vec![0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]));
        assert_eq!(v, Value::Bignum(BigInt::from(1u8) << 64));

        let v = apply(3, Value::Bytes(vec![0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]));
        assert_eq!(v, Value::Bignum(-(BigInt::from(1u8) << 64u32) - 1u8));

        // Empty magnitude is zero.
        assert_eq!(apply(2, Value::Bytes(vec![])), Value::Bignum(BigInt::from(0)));
    }

    #[test]
    fn decimal_and_bigfloat_shapes() {
        let v = apply(4, Value::Array(vec![Value::Integer(-2), Value::Integer(27315)]));
        assert_eq!(
            v,
            Value::Decimal(Decimal {
                mantissa: BigInt::from(27315),
                exponent: -2,
            })
        );

        let v = apply(5, Value::Array(vec![Value::Integer(-1), Value::Integer(3)]));
        assert_eq!(
            v,
            Value::Bigfloat(Bigfloat {
                mantissa: BigInt::from(3),
                exponent: -1,
            })
        );

        // Wrong shape: error attached, payload preserved.
        let v = apply(4, Value::Array(vec![Value::Integer(1)]));
        let t = v.as_tagged().unwrap();
        assert_eq!(t.tag, 4);
        assert!(t.err.as_deref().unwrap().contains("two-element"));
    }

    #[test]
    fn base_hints_keep_wrapper_and_value() {
        let v = apply(22, Value::Bytes(vec![1, 2, 3]));
        let t = v.as_tagged().unwrap();
        assert_eq!(t.tag, 22);
        assert_eq!(t.value, Value::Bytes(vec![1, 2, 3]));
        assert!(t.err.is_none());
    }

    #[test]
    fn base64url_validation() {
        let ok = apply(33, Value::from("c3VyZQ"));
        assert!(ok.as_tagged().unwrap().err.is_none());

        // Padding characters are not in the base64url alphabet.
        let bad = apply(33, Value::from("c3VyZQ=="));
        assert!(bad.as_tagged().unwrap().err.is_some());

        // Length mod 4 == 1 can never be produced by a base64 encoder.
        let bad = apply(33, Value::from("abcde"));
        assert!(bad.as_tagged().unwrap().err.is_some());

        // Nonzero trailing bits.
        let bad = apply(33, Value::from("ab"));
        assert!(bad.as_tagged().unwrap().err.is_some());
    }

    #[test]
    fn base64_validation() {
        let ok = apply(34, Value::from("c3VyZQ=="));
        assert!(ok.as_tagged().unwrap().err.is_none());

        // Missing padding.
        let bad = apply(34, Value::from("c3VyZQ"));
        assert!(bad.as_tagged().unwrap().err.is_some());
    }

    #[test]
    fn url_and_regexp_and_set() {
        let v = apply(32, Value::from("https://example.com/path"));
        assert_eq!(
            v,
            Value::Url(url::Url::parse("https://example.com/path").unwrap())
        );

        let v = apply(35, Value::from("^a+$"));
        assert_eq!(v, Value::Regexp(Regexp::new("^a+$").unwrap()));

        let bad = apply(35, Value::from("("));
        assert!(bad.as_tagged().unwrap().err.is_some());

        let v = apply(258, Value::Array(vec![Value::Integer(1), Value::Integer(2)]));
        assert_eq!(v, Value::Set(vec![Value::Integer(1), Value::Integer(2)]));
    }

    #[test]
    fn typed_array_dispatch() {
        let v = apply(69, Value::Bytes(vec![0x02, 0x01]));
        assert_eq!(v, Value::TypedArray(TypedArray::U16(vec![0x0102])));

        let bad = apply(83, Value::Bytes(vec![0; 16]));
        assert!(bad.as_tagged().unwrap().err.is_some());
    }

    #[test]
    fn unregistered_tag_keeps_wrapper() {
        let v = apply(1000, Value::Integer(5));
        let t = v.as_tagged().unwrap();
        assert_eq!(t.tag, 1000);
        assert_eq!(t.value, Value::Integer(5));
        assert!(t.err.is_none());
    }

    #[test]
    fn strict_mode_propagates_interpreter_failures() {
        let reg = TagRegistry::standard();
        let err = reg
            .apply(2, Value::Integer(1), true)
            .unwrap_err();
        assert!(matches!(err, CborError::TagInterpreter { tag: 2, .. }));
    }

    #[test]
    fn user_override_and_removal() {
        let mut reg = TagRegistry::standard();
        reg.insert(2, Rc::new(|_, inner| Ok(inner.clone())));
        assert_eq!(
            reg.apply(2, Value::Bytes(vec![1]), false).unwrap(),
            Value::Bytes(vec![1])
        );

        reg.remove(0);
        let v = reg
            .apply(0, Value::from("2013-03-21T20:04:00Z"), false)
            .unwrap();
        assert!(v.as_tagged().is_some());
    }
}
