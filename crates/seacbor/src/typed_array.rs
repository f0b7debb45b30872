//! Typed numeric arrays (RFC 8746, tags 64-86).
//!
//! The 7-bit tag packs the element description:
//! `0b010_f_s_e_ss` with `f` set for IEEE-754 element types, `s` for signed
//! integers, `e` for little-endian (repurposed as "clamped" for the 8-bit
//! unsigned type), and `ss` the element size: the base-2 log of the byte
//! width for integers, an index into {16, 32, 64, 128} bits for floats.
//! Encoding always emits the little-endian variant; decoding byte-swaps
//! big-endian payloads.

use half::f16;

use crate::error::{CborError, CborResult};

/// A homogeneous numeric array carried as a tagged byte string.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedArray {
    /// Unsigned 8-bit integers (tag 64).
    U8(Vec<u8>),
    /// Clamped unsigned 8-bit integers (tag 68).
    U8Clamped(Vec<u8>),
    /// Unsigned 16-bit integers (tags 65/69).
    U16(Vec<u16>),
    /// Unsigned 32-bit integers (tags 66/70).
    U32(Vec<u32>),
    /// Unsigned 64-bit integers (tags 67/71).
    U64(Vec<u64>),
    /// Signed 8-bit integers (tag 72).
    I8(Vec<i8>),
    /// Signed 16-bit integers (tags 73/77).
    I16(Vec<i16>),
    /// Signed 32-bit integers (tags 74/78).
    I32(Vec<i32>),
    /// Signed 64-bit integers (tags 75/79).
    I64(Vec<i64>),
    /// Half-precision floats (tags 80/84).
    F16(Vec<f16>),
    /// Single-precision floats (tags 81/85).
    F32(Vec<f32>),
    /// Double-precision floats (tags 82/86).
    F64(Vec<f64>),
}

macro_rules! read_elems {
    ($bytes:expr, $ty:ty, $from:ident) => {{
        const W: usize = std::mem::size_of::<$ty>();
        $bytes
            .chunks_exact(W)
            .map(|c| {
                let mut raw = [0u8; W];
                raw.copy_from_slice(c);
                <$ty>::$from(raw)
            })
            .collect()
    }};
}

impl TypedArray {
    /// Number of elements.
    pub fn len(&self) -> usize {
        match self {
            TypedArray::U8(v) | TypedArray::U8Clamped(v) => v.len(),
            TypedArray::U16(v) => v.len(),
            TypedArray::U32(v) => v.len(),
            TypedArray::U64(v) => v.len(),
            TypedArray::I8(v) => v.len(),
            TypedArray::I16(v) => v.len(),
            TypedArray::I32(v) => v.len(),
            TypedArray::I64(v) => v.len(),
            TypedArray::F16(v) => v.len(),
            TypedArray::F32(v) => v.len(),
            TypedArray::F64(v) => v.len(),
        }
    }

    /// Whether the array has no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The tag this array encodes under (always the little-endian variant).
    pub(crate) fn tag(&self) -> u64 {
        match self {
            TypedArray::U8(_) => 64,
            TypedArray::U8Clamped(_) => 68,
            TypedArray::U16(_) => 69,
            TypedArray::U32(_) => 70,
            TypedArray::U64(_) => 71,
            TypedArray::I8(_) => 72,
            TypedArray::I16(_) => 77,
            TypedArray::I32(_) => 78,
            TypedArray::I64(_) => 79,
            TypedArray::F16(_) => 84,
            TypedArray::F32(_) => 85,
            TypedArray::F64(_) => 86,
        }
    }

    /// Raw little-endian payload bytes.
    pub(crate) fn to_le_bytes(&self) -> Vec<u8> {
        match self {
            TypedArray::U8(v) | TypedArray::U8Clamped(v) => v.clone(),
            TypedArray::I8(v) => v.iter().map(|&x| x as u8).collect(),
            TypedArray::U16(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            TypedArray::U32(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            TypedArray::U64(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            TypedArray::I16(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            TypedArray::I32(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            TypedArray::I64(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            TypedArray::F16(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            TypedArray::F32(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            TypedArray::F64(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
        }
    }

    /// Reassemble an array from a tagged byte-string payload.
    pub(crate) fn from_tagged_bytes(tag: u64, bytes: &[u8]) -> CborResult<Self> {
        let width = match tag {
            64 | 68 | 72 => 1,
            65 | 69 | 73 | 77 | 80 | 84 => 2,
            66 | 70 | 74 | 78 | 81 | 85 => 4,
            67 | 71 | 75 | 79 | 82 | 86 => 8,
            83 => return Err(CborError::tag(tag, "128-bit floats are not supported")),
            _ => return Err(CborError::tag(tag, "not a typed-array tag")),
        };
        if bytes.len() % width != 0 {
            return Err(CborError::tag(
                tag,
                format!(
                    "byte length {} is not a multiple of element width {width}",
                    bytes.len()
                ),
            ));
        }

        Ok(match tag {
            64 => TypedArray::U8(bytes.to_vec()),
            68 => TypedArray::U8Clamped(bytes.to_vec()),
            72 => TypedArray::I8(bytes.iter().map(|&b| b as i8).collect()),
            65 => TypedArray::U16(read_elems!(bytes, u16, from_be_bytes)),
            69 => TypedArray::U16(read_elems!(bytes, u16, from_le_bytes)),
            66 => TypedArray::U32(read_elems!(bytes, u32, from_be_bytes)),
            70 => TypedArray::U32(read_elems!(bytes, u32, from_le_bytes)),
            67 => TypedArray::U64(read_elems!(bytes, u64, from_be_bytes)),
            71 => TypedArray::U64(read_elems!(bytes, u64, from_le_bytes)),
            73 => TypedArray::I16(read_elems!(bytes, i16, from_be_bytes)),
            77 => TypedArray::I16(read_elems!(bytes, i16, from_le_bytes)),
            74 => TypedArray::I32(read_elems!(bytes, i32, from_be_bytes)),
            78 => TypedArray::I32(read_elems!(bytes, i32, from_le_bytes)),
            75 => TypedArray::I64(read_elems!(bytes, i64, from_be_bytes)),
            79 => TypedArray::I64(read_elems!(bytes, i64, from_le_bytes)),
            80 => TypedArray::F16(read_elems!(bytes, f16, from_be_bytes)),
            84 => TypedArray::F16(read_elems!(bytes, f16, from_le_bytes)),
            81 => TypedArray::F32(read_elems!(bytes, f32, from_be_bytes)),
            85 => TypedArray::F32(read_elems!(bytes, f32, from_le_bytes)),
            82 => TypedArray::F64(read_elems!(bytes, f64, from_be_bytes)),
            86 => TypedArray::F64(read_elems!(bytes, f64, from_le_bytes)),
            _ => unreachable!(),
        })
    }
}
