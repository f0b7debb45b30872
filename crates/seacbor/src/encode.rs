//! CBOR encoder.
//!
//! Walks a [`Value`] tree, dispatching on the variant, and emits bytes
//! through the head and float codecs into an append-only buffer. Containers
//! are registered with the loop detector (when enabled) on entry and
//! released on exit, so shared subtrees re-encoded through custom callbacks
//! cannot recurse forever.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use chrono::{DateTime, SecondsFormat, Utc};
use num_bigint::{BigInt, Sign};
use num_traits::ToPrimitive;
use tracing::trace;

use crate::cycles::LoopDetector;
use crate::error::{CborError, CborResult};
use crate::float::write_float;
use crate::head::{major, write_head, write_indefinite_head, BREAK_BYTE};
use crate::value::{Value, INT_MAX, INT_MIN};

/// Largest float that is collapsed to an integer when whole, `2^53 - 1`.
const MAX_SAFE_FLOAT: f64 = 9_007_199_254_740_991.0;

/// An encoder callback for one custom value kind.
///
/// Callbacks may call back into [`Encoder::push`]; the loop detector
/// survives such reentrance.
pub type CustomEncoder = Rc<dyn Fn(&mut Encoder, &Value) -> CborResult<()>>;

/// Kind name to encoder callback table for [`Value::Custom`] values.
#[derive(Clone, Default)]
pub struct TypeRegistry {
    entries: HashMap<String, CustomEncoder>,
}

impl TypeRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `encoder` under `kind`.
    pub fn insert(&mut self, kind: impl Into<String>, encoder: CustomEncoder) {
        self.entries.insert(kind.into(), encoder);
    }

    /// Look up the encoder for `kind`.
    pub fn get(&self, kind: &str) -> Option<&CustomEncoder> {
        self.entries.get(kind)
    }
}

/// What to emit for [`Value::Undefined`].
#[derive(Clone, Default)]
pub enum UndefinedMode {
    /// Emit the undefined simple value, `0xf7`.
    #[default]
    Emit,
    /// Splice the given bytes verbatim into the output.
    Splice(Vec<u8>),
    /// Encode the given replacement value instead.
    Replace(Box<Value>),
    /// Call the function and encode its result.
    Generate(Rc<dyn Fn() -> Value>),
}

/// Wire form for [`Value::Date`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DateFormat {
    /// Tag 1 with integer epoch seconds when whole, float otherwise.
    #[default]
    Epoch,
    /// Tag 1 with epoch seconds rounded to an integer.
    EpochInt,
    /// Tag 1 with epoch seconds forced to a float.
    EpochFloat,
    /// Tag 0 with an RFC 3339 text timestamp.
    Rfc3339,
}

/// Whether and how to detect cycles in the value graph.
#[derive(Clone, Default)]
pub enum LoopPolicy {
    /// No tracking.
    #[default]
    Off,
    /// Allocate a fresh detector for each encoder.
    Fresh,
    /// Use the supplied detector, shared across encoders.
    Shared(Rc<RefCell<LoopDetector>>),
}

/// Encoding policies.
#[derive(Clone)]
pub struct EncodeOptions {
    /// Policy for [`Value::Undefined`] inputs.
    pub undefined: UndefinedMode,
    /// Raise on an undefined map key instead of applying the policy.
    pub disallow_undefined_keys: bool,
    /// Wire form for dates.
    pub date_format: DateFormat,
    /// Emit bignums that fit 64 bits as plain integers, untagged.
    pub collapse_bigints: bool,
    /// Drop map entries whose value is undefined.
    pub omit_undefined_properties: bool,
    /// Encoder callbacks for [`Value::Custom`] kinds.
    pub types: TypeRegistry,
    /// Cycle detection policy.
    pub detect_loops: LoopPolicy,
    /// Chunk budget in bytes for indefinite-length strings.
    pub chunk_size: usize,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            undefined: UndefinedMode::default(),
            disallow_undefined_keys: false,
            date_format: DateFormat::default(),
            collapse_bigints: false,
            omit_undefined_properties: false,
            types: TypeRegistry::new(),
            detect_loops: LoopPolicy::Off,
            chunk_size: 4096,
        }
    }
}

/// Encode a value with default options.
pub fn to_cbor(value: &Value) -> CborResult<Vec<u8>> {
    to_cbor_with(value, &EncodeOptions::default())
}

/// Encode a value with the given options.
pub fn to_cbor_with(value: &Value, options: &EncodeOptions) -> CborResult<Vec<u8>> {
    let mut encoder = Encoder::with_options(options.clone());
    encoder.push(value)?;
    let bytes = encoder.into_bytes();
    trace!(len = bytes.len(), "encoded value");
    Ok(bytes)
}

/// Encode a sequence of values as the concatenation of their CBOR forms.
pub fn to_cbor_seq(values: &[Value]) -> CborResult<Vec<u8>> {
    let mut encoder = Encoder::new();
    for value in values {
        encoder.push(value)?;
    }
    Ok(encoder.into_bytes())
}

/// Canonical (deterministic) encoding.
///
/// # Errors
///
/// Always fails: canonical mode is not implemented.
pub fn to_canonical_cbor(_value: &Value) -> CborResult<Vec<u8>> {
    Err(CborError::CanonicalUnimplemented)
}

/// Encode the outermost container of a value with indefinite length.
///
/// Strings are split into definite chunks of at most
/// [`EncodeOptions::chunk_size`] bytes; text chunks never split a character.
/// Children of arrays and maps are encoded in their normal definite form.
pub fn to_cbor_indefinite(value: &Value, options: &EncodeOptions) -> CborResult<Vec<u8>> {
    let mut encoder = Encoder::with_options(options.clone());
    encoder.push_indefinite(value)?;
    Ok(encoder.into_bytes())
}

/// A CBOR encoder owning its output buffer.
pub struct Encoder {
    buf: Vec<u8>,
    opts: EncodeOptions,
    loops: Option<Rc<RefCell<LoopDetector>>>,
}

impl Encoder {
    /// Create an encoder with default options.
    pub fn new() -> Self {
        Self::with_options(EncodeOptions::default())
    }

    /// Create an encoder with the given options.
    pub fn with_options(opts: EncodeOptions) -> Self {
        let loops = match &opts.detect_loops {
            LoopPolicy::Off => None,
            LoopPolicy::Fresh => Some(Rc::new(RefCell::new(LoopDetector::new()))),
            LoopPolicy::Shared(detector) => Some(detector.clone()),
        };
        Self {
            buf: Vec::new(),
            opts,
            loops,
        }
    }

    /// Encode one value, appending to the buffer.
    ///
    /// On error the buffer is restored to its previous length; bytes
    /// written by the failed value are discarded.
    pub fn push(&mut self, value: &Value) -> CborResult<()> {
        let mark = self.buf.len();
        let result = self.push_any(value);
        if result.is_err() {
            self.buf.truncate(mark);
        }
        result
    }

    /// Encode one value with an indefinite-length outer container.
    pub fn push_indefinite(&mut self, value: &Value) -> CborResult<()> {
        let mark = self.buf.len();
        let result = self.push_indefinite_any(value);
        if result.is_err() {
            self.buf.truncate(mark);
        }
        result
    }

    /// Consume this encoder and return the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Get a reference to the encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    fn push_any(&mut self, value: &Value) -> CborResult<()> {
        match value {
            Value::Integer(n) => {
                self.push_int(*n);
                Ok(())
            }
            Value::Float(x) => {
                self.push_number(*x);
                Ok(())
            }
            Value::Bignum(b) => {
                self.push_bignum(b);
                Ok(())
            }
            Value::Text(s) => {
                write_head(&mut self.buf, major::TEXT, s.len() as u64);
                self.buf.extend_from_slice(s.as_bytes());
                Ok(())
            }
            Value::Bool(b) => {
                self.buf.push(if *b { 0xf5 } else { 0xf4 });
                Ok(())
            }
            Value::Undefined => self.push_undefined(),
            Value::Null => {
                self.buf.push(0xf6);
                Ok(())
            }
            Value::Bytes(b) => {
                write_head(&mut self.buf, major::BYTES, b.len() as u64);
                self.buf.extend_from_slice(b);
                Ok(())
            }
            Value::Array(items) => self.with_container(identity(value), |enc| {
                write_head(&mut enc.buf, major::ARRAY, items.len() as u64);
                for item in items {
                    enc.push_any(item)?;
                }
                Ok(())
            }),
            Value::Map(pairs) => self.with_container(identity(value), |enc| {
                enc.push_map_entries(pairs, true)
            }),
            Value::Date(d) => {
                self.push_date(d);
                Ok(())
            }
            Value::Decimal(d) => {
                write_head(&mut self.buf, major::TAG, 4);
                self.push_exponent_mantissa(d.exponent, &d.mantissa);
                Ok(())
            }
            Value::Bigfloat(f) => {
                write_head(&mut self.buf, major::TAG, 5);
                self.push_exponent_mantissa(f.exponent, &f.mantissa);
                Ok(())
            }
            Value::Url(u) => {
                write_head(&mut self.buf, major::TAG, 32);
                let s = u.as_str();
                write_head(&mut self.buf, major::TEXT, s.len() as u64);
                self.buf.extend_from_slice(s.as_bytes());
                Ok(())
            }
            Value::Regexp(r) => {
                write_head(&mut self.buf, major::TAG, 35);
                let s = r.as_str();
                write_head(&mut self.buf, major::TEXT, s.len() as u64);
                self.buf.extend_from_slice(s.as_bytes());
                Ok(())
            }
            Value::Set(items) => self.with_container(identity(value), |enc| {
                write_head(&mut enc.buf, major::TAG, 258);
                write_head(&mut enc.buf, major::ARRAY, items.len() as u64);
                for item in items {
                    enc.push_any(item)?;
                }
                Ok(())
            }),
            Value::TypedArray(t) => {
                write_head(&mut self.buf, major::TAG, t.tag());
                let bytes = t.to_le_bytes();
                write_head(&mut self.buf, major::BYTES, bytes.len() as u64);
                self.buf.extend_from_slice(&bytes);
                Ok(())
            }
            Value::Tagged(t) => {
                write_head(&mut self.buf, major::TAG, t.tag);
                self.push_any(&t.value)
            }
            Value::Simple(n) => self.push_simple(*n),
            Value::Shared(rc) => {
                let id = Rc::as_ptr(rc) as usize;
                self.with_container(id, |enc| enc.push_any(rc))
            }
            Value::Custom { kind, payload } => match self.opts.types.get(kind) {
                Some(encoder) => {
                    let encoder = encoder.clone();
                    encoder(self, payload)
                }
                None => Err(CborError::unknown_type(kind)),
            },
        }
    }

    fn push_indefinite_any(&mut self, value: &Value) -> CborResult<()> {
        match value {
            Value::Text(s) => {
                write_indefinite_head(&mut self.buf, major::TEXT);
                self.push_text_chunks(s);
                self.buf.push(BREAK_BYTE);
                Ok(())
            }
            Value::Bytes(b) => {
                write_indefinite_head(&mut self.buf, major::BYTES);
                let chunk = self.opts.chunk_size.max(1);
                for piece in b.chunks(chunk) {
                    write_head(&mut self.buf, major::BYTES, piece.len() as u64);
                    self.buf.extend_from_slice(piece);
                }
                self.buf.push(BREAK_BYTE);
                Ok(())
            }
            Value::Array(items) => {
                write_indefinite_head(&mut self.buf, major::ARRAY);
                for item in items {
                    self.push_any(item)?;
                }
                self.buf.push(BREAK_BYTE);
                Ok(())
            }
            Value::Map(pairs) => {
                write_indefinite_head(&mut self.buf, major::MAP);
                self.push_map_entries(pairs, false)?;
                self.buf.push(BREAK_BYTE);
                Ok(())
            }
            Value::Shared(rc) => self.push_indefinite_any(rc),
            other => self.push_any(other),
        }
    }

    fn push_map_entries(&mut self, pairs: &[(Value, Value)], definite: bool) -> CborResult<()> {
        let entries: Vec<&(Value, Value)> = if self.opts.omit_undefined_properties {
            pairs
                .iter()
                .filter(|(_, v)| !matches!(v, Value::Undefined))
                .collect()
        } else {
            pairs.iter().collect()
        };

        if definite {
            write_head(&mut self.buf, major::MAP, entries.len() as u64);
        }
        for (key, val) in entries {
            if matches!(key, Value::Undefined) && self.opts.disallow_undefined_keys {
                return Err(CborError::UndefinedMapKey);
            }
            self.push_any(key)?;
            self.push_any(val)?;
        }
        Ok(())
    }

    fn push_text_chunks(&mut self, s: &str) {
        let chunk = self.opts.chunk_size.max(1);
        let bytes = s.as_bytes();
        let mut start = 0;
        while start < bytes.len() {
            let mut end = (start + chunk).min(bytes.len());
            // Slide back to a character boundary; forward instead when a
            // single character exceeds the chunk budget.
            while end > start && !s.is_char_boundary(end) {
                end -= 1;
            }
            if end == start {
                end = (start + chunk).min(bytes.len());
                while end < bytes.len() && !s.is_char_boundary(end) {
                    end += 1;
                }
            }
            write_head(&mut self.buf, major::TEXT, (end - start) as u64);
            self.buf.extend_from_slice(&bytes[start..end]);
            start = end;
        }
    }

    fn push_int(&mut self, n: i128) {
        if n >= 0 {
            match u64::try_from(n) {
                Ok(u) => write_head(&mut self.buf, major::UNSIGNED, u),
                Err(_) => self.push_bignum(&BigInt::from(n)),
            }
        } else {
            match u64::try_from(-1 - n) {
                Ok(u) => write_head(&mut self.buf, major::NEGATIVE, u),
                Err(_) => self.push_bignum(&BigInt::from(n)),
            }
        }
    }

    fn push_number(&mut self, x: f64) {
        let neg_zero = x == 0.0 && x.is_sign_negative();
        if x.is_finite() && !neg_zero && x.trunc() == x && x.abs() <= MAX_SAFE_FLOAT {
            self.push_int(x as i128);
        } else {
            write_float(&mut self.buf, x);
        }
    }

    fn push_bignum(&mut self, b: &BigInt) {
        let (tag, mt, magnitude) = if b.sign() == Sign::Minus {
            (3u64, major::NEGATIVE, -(b.clone() + BigInt::from(1)))
        } else {
            (2u64, major::UNSIGNED, b.clone())
        };

        if self.opts.collapse_bigints {
            if let Some(u) = magnitude.to_u64() {
                if u <= u64::from(u32::MAX) {
                    write_head(&mut self.buf, mt, u);
                } else {
                    self.buf.push((mt << 5) | 27);
                    self.buf.extend_from_slice(&u.to_be_bytes());
                }
                return;
            }
        }

        write_head(&mut self.buf, major::TAG, tag);
        let (_, bytes) = magnitude.to_bytes_be();
        write_head(&mut self.buf, major::BYTES, bytes.len() as u64);
        self.buf.extend_from_slice(&bytes);
    }

    fn push_exponent_mantissa(&mut self, exponent: i64, mantissa: &BigInt) {
        write_head(&mut self.buf, major::ARRAY, 2);
        self.push_int(i128::from(exponent));
        match mantissa.to_i128() {
            Some(i) if (INT_MIN..=INT_MAX).contains(&i) => self.push_int(i),
            _ => self.push_bignum(mantissa),
        }
    }

    fn push_date(&mut self, d: &DateTime<Utc>) {
        match self.opts.date_format {
            DateFormat::Rfc3339 => {
                write_head(&mut self.buf, major::TAG, 0);
                let s = d.to_rfc3339_opts(SecondsFormat::AutoSi, true);
                write_head(&mut self.buf, major::TEXT, s.len() as u64);
                self.buf.extend_from_slice(s.as_bytes());
            }
            DateFormat::Epoch => {
                write_head(&mut self.buf, major::TAG, 1);
                let millis = d.timestamp_millis();
                if millis % 1000 == 0 {
                    self.push_int(i128::from(millis / 1000));
                } else {
                    write_float(&mut self.buf, millis as f64 / 1000.0);
                }
            }
            DateFormat::EpochInt => {
                write_head(&mut self.buf, major::TAG, 1);
                let seconds = (d.timestamp_millis() as f64 / 1000.0).round();
                self.push_int(seconds as i128);
            }
            DateFormat::EpochFloat => {
                write_head(&mut self.buf, major::TAG, 1);
                write_float(&mut self.buf, d.timestamp_millis() as f64 / 1000.0);
            }
        }
    }

    fn push_undefined(&mut self) -> CborResult<()> {
        match self.opts.undefined.clone() {
            UndefinedMode::Emit => {
                self.buf.push(0xf7);
                Ok(())
            }
            UndefinedMode::Splice(bytes) => {
                self.buf.extend_from_slice(&bytes);
                Ok(())
            }
            UndefinedMode::Replace(v) => {
                if v.is_undefined() {
                    self.buf.push(0xf7);
                    Ok(())
                } else {
                    self.push_any(&v)
                }
            }
            UndefinedMode::Generate(f) => {
                let v = f();
                if v.is_undefined() {
                    self.buf.push(0xf7);
                    Ok(())
                } else {
                    self.push_any(&v)
                }
            }
        }
    }

    fn push_simple(&mut self, n: u8) -> CborResult<()> {
        match n {
            0..=19 => {
                self.buf.push(0xe0 | n);
                Ok(())
            }
            // 20-23 belong to false/true/null/undefined; 24-31 are reserved.
            20..=31 => Err(CborError::InvalidSimpleEncoding { value: n }),
            _ => {
                self.buf.push(0xf8);
                self.buf.push(n);
                Ok(())
            }
        }
    }

    fn with_container<F>(&mut self, id: usize, f: F) -> CborResult<()>
    where
        F: FnOnce(&mut Self) -> CborResult<()>,
    {
        if let Some(loops) = &self.loops {
            loops.borrow_mut().enter(id)?;
        }
        let result = f(self);
        if let Some(loops) = &self.loops {
            loops.borrow_mut().exit(id);
        }
        result
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

fn identity(value: &Value) -> usize {
    value as *const Value as usize
}
