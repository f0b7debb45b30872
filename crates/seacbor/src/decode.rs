//! CBOR decoder.
//!
//! Reads items from a byte cursor, one head at a time, recursing for
//! container payloads. Tags are applied depth-first: the inner item is
//! fully decoded and interpreted before the enclosing item is assembled.
//! Malformed input is fatal to the whole decode call.

use tracing::trace;

use crate::buffer::ByteReader;
use crate::error::{CborError, CborResult};
use crate::float::decode_half;
use crate::head::{major, read_head, Head, BREAK_BYTE};
use crate::tags::TagRegistry;
use crate::value::Value;

/// Decoding policies.
#[derive(Clone)]
pub struct DecodeOptions {
    /// Tag interpreters; user entries override the standard set.
    pub tags: TagRegistry,
    /// Propagate tag-interpreter failures instead of attaching them to the
    /// returned wrapper.
    pub strict_tags: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            tags: TagRegistry::standard(),
            strict_tags: false,
        }
    }
}

/// Decode exactly one value; trailing bytes are an error.
pub fn from_cbor(bytes: &[u8]) -> CborResult<Value> {
    from_cbor_with(bytes, &DecodeOptions::default())
}

/// Decode exactly one value with the given options.
pub fn from_cbor_with(bytes: &[u8], options: &DecodeOptions) -> CborResult<Value> {
    let mut decoder = Decoder::with_options(bytes, options.clone());
    let value = decoder.decode_value()?;
    if !decoder.reader.is_empty() {
        return Err(CborError::UnexpectedData {
            offset: decoder.reader.position(),
        });
    }
    trace!(len = bytes.len(), "decoded value");
    Ok(value)
}

/// Decode values until end of input.
pub fn from_cbor_all(bytes: &[u8]) -> CborResult<Vec<Value>> {
    from_cbor_all_with(bytes, &DecodeOptions::default())
}

/// Decode values until end of input with the given options.
pub fn from_cbor_all_with(bytes: &[u8], options: &DecodeOptions) -> CborResult<Vec<Value>> {
    let mut decoder = Decoder::with_options(bytes, options.clone());
    let mut values = Vec::new();
    while let Some(value) = decoder.decode_next()? {
        values.push(value);
    }
    Ok(values)
}

/// A CBOR decoder owning its input cursor.
pub struct Decoder<'a> {
    reader: ByteReader<'a>,
    opts: DecodeOptions,
}

impl<'a> Decoder<'a> {
    /// Create a decoder with default options.
    pub fn new(data: &'a [u8]) -> Self {
        Self::with_options(data, DecodeOptions::default())
    }

    /// Create a decoder with the given options.
    pub fn with_options(data: &'a [u8], opts: DecodeOptions) -> Self {
        Self {
            reader: ByteReader::new(data),
            opts,
        }
    }

    /// Decode the next value, or `None` at end of input.
    pub fn decode_next(&mut self) -> CborResult<Option<Value>> {
        if self.reader.is_empty() {
            return Ok(None);
        }
        self.decode_value().map(Some)
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> &'a [u8] {
        self.reader.remaining()
    }

    fn decode_value(&mut self) -> CborResult<Value> {
        match read_head(&mut self.reader)? {
            Head::Break => Err(CborError::InvalidBreak),
            Head::Indefinite { major: m } => match m {
                major::BYTES => self.decode_indefinite_bytes(),
                major::TEXT => self.decode_indefinite_text(),
                major::ARRAY => self.decode_indefinite_array(),
                major::MAP => self.decode_indefinite_map(),
                _ => unreachable!("read_head only yields indefinite for mt 2-5"),
            },
            Head::Definite { major: m, arg, ai } => match m {
                major::UNSIGNED => Ok(Value::Integer(i128::from(arg))),
                major::NEGATIVE => Ok(Value::Integer(-1 - i128::from(arg))),
                major::BYTES => {
                    let len = payload_len(arg)?;
                    Ok(Value::Bytes(self.reader.read_exact(len)?.to_vec()))
                }
                major::TEXT => {
                    let len = payload_len(arg)?;
                    let raw = self.reader.read_exact(len)?;
                    let text = std::str::from_utf8(raw).map_err(|_| CborError::InvalidUtf8)?;
                    Ok(Value::Text(text.to_string()))
                }
                major::ARRAY => self.decode_array(arg),
                major::MAP => self.decode_map(arg),
                major::TAG => {
                    let inner = self.decode_value()?;
                    self.opts.tags.apply(arg, inner, self.opts.strict_tags)
                }
                major::SIMPLE => decode_simple(ai, arg),
                _ => unreachable!(),
            },
        }
    }

    fn decode_array(&mut self, count: u64) -> CborResult<Value> {
        // Every item takes at least one byte; the remaining input bounds
        // the allocation for hostile length claims.
        let hint = usize::try_from(count)
            .unwrap_or(usize::MAX)
            .min(self.reader.remaining().len());
        let mut items = Vec::with_capacity(hint);
        for _ in 0..count {
            items.push(self.decode_value()?);
        }
        Ok(Value::Array(items))
    }

    fn decode_map(&mut self, count: u64) -> CborResult<Value> {
        let hint = usize::try_from(count)
            .unwrap_or(usize::MAX)
            .min(self.reader.remaining().len() / 2);
        let mut pairs = Vec::with_capacity(hint);
        for _ in 0..count {
            let key = self.decode_value()?;
            let val = self.decode_value()?;
            pairs.push((key, val));
        }
        Ok(Value::Map(pairs))
    }

    fn decode_indefinite_bytes(&mut self) -> CborResult<Value> {
        let mut payload = Vec::new();
        loop {
            let byte = self.reader.read_byte()?;
            if byte == BREAK_BYTE {
                break;
            }
            self.reader.rewind(1);
            payload.extend_from_slice(self.read_string_chunk(major::BYTES)?);
        }
        Ok(Value::Bytes(payload))
    }

    fn decode_indefinite_text(&mut self) -> CborResult<Value> {
        let mut payload = Vec::new();
        loop {
            let byte = self.reader.read_byte()?;
            if byte == BREAK_BYTE {
                break;
            }
            self.reader.rewind(1);
            payload.extend_from_slice(self.read_string_chunk(major::TEXT)?);
        }
        // Chunks may split multi-byte characters between themselves, so
        // UTF-8 is validated over the reassembled payload.
        String::from_utf8(payload)
            .map(Value::Text)
            .map_err(|_| CborError::InvalidUtf8)
    }

    fn read_string_chunk(&mut self, expected: u8) -> CborResult<&'a [u8]> {
        match read_head(&mut self.reader)? {
            Head::Definite { major: m, arg, .. } if m == expected => {
                let len = payload_len(arg)?;
                self.reader.read_exact(len)
            }
            Head::Indefinite { major: m } if m == expected => {
                Err(CborError::InvalidIndefiniteEncoding)
            }
            Head::Definite { major: m, .. } | Head::Indefinite { major: m } => {
                Err(CborError::InvalidIndefiniteMajor { major: m })
            }
            Head::Break => unreachable!("BREAK is filtered by the chunk loop"),
        }
    }

    fn decode_indefinite_array(&mut self) -> CborResult<Value> {
        let mut items = Vec::new();
        loop {
            let byte = self.reader.read_byte()?;
            if byte == BREAK_BYTE {
                break;
            }
            self.reader.rewind(1);
            items.push(self.decode_value()?);
        }
        Ok(Value::Array(items))
    }

    fn decode_indefinite_map(&mut self) -> CborResult<Value> {
        let mut pairs = Vec::new();
        loop {
            let byte = self.reader.read_byte()?;
            if byte == BREAK_BYTE {
                break;
            }
            self.reader.rewind(1);
            let key = self.decode_value()?;

            let byte = self.reader.read_byte()?;
            if byte == BREAK_BYTE {
                return Err(CborError::InvalidMapLength);
            }
            self.reader.rewind(1);
            let val = self.decode_value()?;

            pairs.push((key, val));
        }
        Ok(Value::Map(pairs))
    }
}

fn decode_simple(ai: u8, arg: u64) -> CborResult<Value> {
    match ai {
        0..=23 => Ok(match arg as u8 {
            20 => Value::Bool(false),
            21 => Value::Bool(true),
            22 => Value::Null,
            23 => Value::Undefined,
            n => Value::Simple(n),
        }),
        24 => {
            let n = arg as u8;
            if n < 32 {
                Err(CborError::InvalidSimpleEncoding { value: n })
            } else {
                Ok(Value::Simple(n))
            }
        }
        25 => Ok(Value::Float(decode_half((arg as u16).to_be_bytes()))),
        26 => Ok(Value::Float(f64::from(f32::from_bits(arg as u32)))),
        27 => Ok(Value::Float(f64::from_bits(arg))),
        _ => unreachable!("28-30 are rejected by read_head, 31 is BREAK"),
    }
}

fn payload_len(arg: u64) -> CborResult<usize> {
    // A length that does not fit the address space cannot be present.
    usize::try_from(arg).map_err(|_| CborError::InsufficientData)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Tagged;

    #[test]
    fn decode_integers() {
        assert_eq!(from_cbor(&[0x00]).unwrap(), Value::Integer(0));
        assert_eq!(from_cbor(&[0x17]).unwrap(), Value::Integer(23));
        assert_eq!(from_cbor(&[0x18, 24]).unwrap(), Value::Integer(24));
        assert_eq!(
            from_cbor(&[0x1a, 0x00, 0x0f, 0x42, 0x40]).unwrap(),
            Value::Integer(1_000_000)
        );
        assert_eq!(from_cbor(&[0x20]).unwrap(), Value::Integer(-1));
        assert_eq!(
            from_cbor(&[0x3b, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]).unwrap(),
            Value::Integer(crate::value::INT_MIN)
        );
        assert_eq!(
            from_cbor(&[0x1b, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]).unwrap(),
            Value::Integer(crate::value::INT_MAX)
        );
    }

    #[test]
    fn decode_simple_constants() {
        assert_eq!(from_cbor(&[0xf4]).unwrap(), Value::Bool(false));
        assert_eq!(from_cbor(&[0xf5]).unwrap(), Value::Bool(true));
        assert_eq!(from_cbor(&[0xf6]).unwrap(), Value::Null);
        assert_eq!(from_cbor(&[0xf7]).unwrap(), Value::Undefined);
        assert_eq!(from_cbor(&[0xf0]).unwrap(), Value::Simple(16));
        assert_eq!(from_cbor(&[0xf8, 0xff]).unwrap(), Value::Simple(255));
    }

    #[test]
    fn two_byte_simple_must_not_fit_one() {
        assert_eq!(
            from_cbor(&[0xf8, 0x18]),
            Err(CborError::InvalidSimpleEncoding { value: 0x18 })
        );
        assert_eq!(
            from_cbor(&[0xf8, 0x00]),
            Err(CborError::InvalidSimpleEncoding { value: 0 })
        );
        assert_eq!(from_cbor(&[0xf8, 0x20]).unwrap(), Value::Simple(32));
    }

    #[test]
    fn decode_floats() {
        assert_eq!(from_cbor(&[0xf9, 0x3e, 0x00]).unwrap(), Value::Float(1.5));
        assert_eq!(
            from_cbor(&[0xfa, 0x47, 0xc3, 0x50, 0x00]).unwrap(),
            Value::Float(100_000.0)
        );
        assert_eq!(
            from_cbor(&[0xfb, 0x3f, 0xf1, 0x99, 0x99, 0x99, 0x99, 0x99, 0x9a]).unwrap(),
            Value::Float(1.1)
        );
        match from_cbor(&[0xf9, 0x7e, 0x00]).unwrap() {
            Value::Float(x) => assert!(x.is_nan()),
            other => panic!("expected a float, got {other:?}"),
        }
    }

    #[test]
    fn decode_strings() {
        assert_eq!(
            from_cbor(&[0x64, 0x49, 0x45, 0x54, 0x46]).unwrap(),
            Value::from("IETF")
        );
        assert_eq!(
            from_cbor(&[0x44, 1, 2, 3, 4]).unwrap(),
            Value::Bytes(vec![1, 2, 3, 4])
        );
        assert_eq!(from_cbor(&[0x62, 0xff, 0xfe]), Err(CborError::InvalidUtf8));
    }

    #[test]
    fn decode_containers() {
        assert_eq!(from_cbor(&[0x80]).unwrap(), Value::Array(vec![]));
        assert_eq!(from_cbor(&[0xa0]).unwrap(), Value::Map(vec![]));
        assert_eq!(
            from_cbor(&[0x83, 0x01, 0x82, 0x02, 0x03, 0x82, 0x04, 0x05]).unwrap(),
            Value::Array(vec![
                Value::Integer(1),
                Value::Array(vec![Value::Integer(2), Value::Integer(3)]),
                Value::Array(vec![Value::Integer(4), Value::Integer(5)]),
            ])
        );
        assert_eq!(
            from_cbor(&[0xa2, 0x61, b'a', 0x01, 0x61, b'b', 0x82, 0x02, 0x03]).unwrap(),
            Value::Map(vec![
                (Value::from("a"), Value::Integer(1)),
                (
                    Value::from("b"),
                    Value::Array(vec![Value::Integer(2), Value::Integer(3)])
                ),
            ])
        );
    }

    #[test]
    fn duplicate_map_keys_are_preserved() {
        let v = from_cbor(&[0xa2, 0x00, 0x01, 0x00, 0x02]).unwrap();
        assert_eq!(
            v,
            Value::Map(vec![
                (Value::Integer(0), Value::Integer(1)),
                (Value::Integer(0), Value::Integer(2)),
            ])
        );
    }

    #[test]
    fn decode_indefinite_containers() {
        assert_eq!(
            from_cbor(&[0x9f, 0x01, 0x02, 0x03, 0xff]).unwrap(),
            Value::Array(vec![
                Value::Integer(1),
                Value::Integer(2),
                Value::Integer(3)
            ])
        );
        assert_eq!(from_cbor(&[0x9f, 0xff]).unwrap(), Value::Array(vec![]));
        assert_eq!(
            from_cbor(&[0xbf, 0x61, b'a', 0x01, 0xff]).unwrap(),
            Value::Map(vec![(Value::from("a"), Value::Integer(1))])
        );
    }

    #[test]
    fn decode_indefinite_strings() {
        assert_eq!(
            from_cbor(&[0x5f, 0x42, 1, 2, 0x41, 3, 0xff]).unwrap(),
            Value::Bytes(vec![1, 2, 3])
        );
        assert_eq!(
            from_cbor(&[0x7f, 0x62, b'a', b'b', 0x61, b'c', 0xff]).unwrap(),
            Value::from("abc")
        );
        // A character split across chunks is still one character.
        assert_eq!(
            from_cbor(&[0x7f, 0x61, 0xc3, 0x61, 0xbc, 0xff]).unwrap(),
            Value::from("ü")
        );
        assert_eq!(from_cbor(&[0x7f, 0xff]).unwrap(), Value::from(""));
    }

    #[test]
    fn indefinite_string_chunk_rules() {
        // Wrong major type inside an indefinite byte string.
        assert_eq!(
            from_cbor(&[0x5f, 0x40, 0x00]),
            Err(CborError::InvalidIndefiniteMajor { major: 0 })
        );
        // Nested indefinite string of the same type.
        assert_eq!(
            from_cbor(&[0x5f, 0x5f, 0x41, 1, 0xff, 0xff]),
            Err(CborError::InvalidIndefiniteEncoding)
        );
        assert_eq!(
            from_cbor(&[0x7f, 0x7f, 0x61, b'a', 0xff, 0xff]),
            Err(CborError::InvalidIndefiniteEncoding)
        );
        // Text chunk inside an indefinite byte string.
        assert_eq!(
            from_cbor(&[0x5f, 0x61, b'a', 0xff]),
            Err(CborError::InvalidIndefiniteMajor { major: 3 })
        );
    }

    #[test]
    fn break_rules() {
        assert_eq!(from_cbor(&[0xff]), Err(CborError::InvalidBreak));
        // BREAK in the value slot of an indefinite map.
        assert_eq!(
            from_cbor(&[0xbf, 0x00, 0xff]),
            Err(CborError::InvalidMapLength)
        );
        // BREAK inside a definite array.
        assert_eq!(
            from_cbor(&[0x82, 0x01, 0xff]),
            Err(CborError::InvalidBreak)
        );
    }

    #[test]
    fn truncated_inputs() {
        assert_eq!(from_cbor(&[]), Err(CborError::InsufficientData));
        assert_eq!(from_cbor(&[0x18]), Err(CborError::InsufficientData));
        assert_eq!(from_cbor(&[0x44, 1, 2]), Err(CborError::InsufficientData));
        assert_eq!(from_cbor(&[0xa1, 0x00]), Err(CborError::InsufficientData));
        assert_eq!(from_cbor(&[0x9f, 0x01]), Err(CborError::InsufficientData));
    }

    #[test]
    fn reserved_additional_info() {
        assert_eq!(
            from_cbor(&[0x1c]),
            Err(CborError::AdditionalInfoNotImplemented { ai: 28 })
        );
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        assert_eq!(
            from_cbor(&[0x01, 0x02]),
            Err(CborError::UnexpectedData { offset: 1 })
        );
    }

    #[test]
    fn decode_all_yields_every_item() {
        let values = from_cbor_all(&[0x01, 0x61, b'a', 0xf6]).unwrap();
        assert_eq!(
            values,
            vec![Value::Integer(1), Value::from("a"), Value::Null]
        );
        assert_eq!(from_cbor_all(&[]).unwrap(), vec![]);
    }

    #[test]
    fn decoder_streams_values() {
        let mut decoder = Decoder::new(&[0x01, 0x02]);
        assert_eq!(decoder.decode_next().unwrap(), Some(Value::Integer(1)));
        assert_eq!(decoder.remaining(), &[0x02]);
        assert_eq!(decoder.decode_next().unwrap(), Some(Value::Integer(2)));
        assert_eq!(decoder.decode_next().unwrap(), None);
    }

    #[test]
    fn tags_apply_depth_first() {
        // Tag 2 around a byte string nested in an array.
        let v = from_cbor(&[0x81, 0xc2, 0x42, 0x01, 0x00]).unwrap();
        assert_eq!(
            v,
            Value::Array(vec![Value::Bignum(num_bigint::BigInt::from(256))])
        );
    }

    #[test]
    fn unknown_tags_wrap() {
        let v = from_cbor(&[0xd8, 0x64, 0x01]).unwrap();
        assert_eq!(v, Value::Tagged(Box::new(Tagged::new(100, Value::Integer(1)))));
    }

    #[test]
    fn strict_tags_propagate_failures() {
        let opts = DecodeOptions {
            strict_tags: true,
            ..Default::default()
        };
        // Tag 2 around a non-byte-string payload.
        let err = from_cbor_with(&[0xc2, 0x01], &opts).unwrap_err();
        assert!(matches!(err, CborError::TagInterpreter { tag: 2, .. }));

        // Lax mode attaches the failure instead.
        let v = from_cbor(&[0xc2, 0x01]).unwrap();
        let t = v.as_tagged().unwrap();
        assert_eq!(t.tag, 2);
        assert_eq!(t.value, Value::Integer(1));
        assert!(t.err.is_some());
    }

    #[test]
    fn tag_registry_edits_change_decoding() {
        let mut opts = DecodeOptions::default();
        opts.tags.remove(2);
        let v = from_cbor_with(&[0xc2, 0x42, 0x01, 0x00], &opts).unwrap();
        assert_eq!(
            v,
            Value::Tagged(Box::new(Tagged::new(2, Value::Bytes(vec![1, 0]))))
        );
    }

    #[test]
    fn indefinite_inside_definite_container() {
        let v = from_cbor(&[0x82, 0x9f, 0x01, 0xff, 0x02]).unwrap();
        assert_eq!(
            v,
            Value::Array(vec![
                Value::Array(vec![Value::Integer(1)]),
                Value::Integer(2),
            ])
        );
    }
}
