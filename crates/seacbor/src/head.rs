//! Item head encoding and decoding.
//!
//! Every CBOR item starts with a one-byte head: the major type in the top
//! three bits, the additional info in the low five. Additional info 0-23 is
//! the argument itself; 24/25/26/27 announce a 1/2/4/8-byte big-endian tail;
//! 31 marks indefinite length (major types 2-5) or BREAK (major type 7).

use crate::buffer::ByteReader;
use crate::error::{CborError, CborResult};

/// Major type constants.
pub(crate) mod major {
    pub const UNSIGNED: u8 = 0;
    pub const NEGATIVE: u8 = 1;
    pub const BYTES: u8 = 2;
    pub const TEXT: u8 = 3;
    pub const ARRAY: u8 = 4;
    pub const MAP: u8 = 5;
    pub const TAG: u8 = 6;
    pub const SIMPLE: u8 = 7;
}

/// The BREAK stop byte.
pub(crate) const BREAK_BYTE: u8 = 0xff;

/// A decoded item head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Head {
    /// A head with an explicit argument.
    ///
    /// `ai` is kept alongside the decoded argument because major type 7
    /// distinguishes simple values from floats by the additional info, not
    /// by the argument value.
    Definite { major: u8, arg: u64, ai: u8 },
    /// An indefinite-length head for major types 2-5.
    Indefinite { major: u8 },
    /// The BREAK sentinel (major type 7, additional info 31).
    Break,
}

/// Write a head with the smallest width that holds `arg`.
pub(crate) fn write_head(buf: &mut Vec<u8>, major: u8, arg: u64) {
    let mt = major << 5;

    if arg < 24 {
        buf.push(mt | (arg as u8));
    } else if let Ok(v) = u8::try_from(arg) {
        buf.push(mt | 24);
        buf.push(v);
    } else if let Ok(v) = u16::try_from(arg) {
        buf.push(mt | 25);
        buf.extend_from_slice(&v.to_be_bytes());
    } else if let Ok(v) = u32::try_from(arg) {
        buf.push(mt | 26);
        buf.extend_from_slice(&v.to_be_bytes());
    } else {
        buf.push(mt | 27);
        buf.extend_from_slice(&arg.to_be_bytes());
    }
}

/// Write an indefinite-length head for a container major type.
pub(crate) fn write_indefinite_head(buf: &mut Vec<u8>, major: u8) {
    buf.push((major << 5) | 31);
}

/// Read one head, including its length tail.
pub(crate) fn read_head(r: &mut ByteReader<'_>) -> CborResult<Head> {
    let initial = r.read_byte()?;
    let major = initial >> 5;
    let ai = initial & 0x1f;

    let arg = match ai {
        0..=23 => u64::from(ai),
        24 => u64::from(r.read_byte()?),
        25 => {
            let b = r.read_exact(2)?;
            u64::from(u16::from_be_bytes([b[0], b[1]]))
        }
        26 => {
            let b = r.read_exact(4)?;
            u64::from(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        }
        27 => {
            let b = r.read_exact(8)?;
            u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
        }
        28..=30 => return Err(CborError::AdditionalInfoNotImplemented { ai }),
        31 => {
            return match major {
                major::SIMPLE => Ok(Head::Break),
                major::BYTES | major::TEXT | major::ARRAY | major::MAP => {
                    Ok(Head::Indefinite { major })
                }
                _ => Err(CborError::InvalidIndefiniteEncoding),
            };
        }
        _ => unreachable!(),
    };

    Ok(Head::Definite { major, arg, ai })
}
