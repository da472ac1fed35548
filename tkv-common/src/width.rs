//! # Integer Width
//!
//! Purpose: Model the connection-wide numeric field width shared by client and
//! server. Quotas, TTLs, update values and value lengths are all written with
//! this width; fragment ids, item counts and statistics are always 8 bytes.
//!
//! ## Design Principles
//! 1. **Closed Set**: Only 1, 2, 4 and 8 byte widths exist, so this is an enum.
//! 2. **Checked Writes**: Encoding refuses values the width cannot carry
//!    instead of silently truncating them.
//! 3. **Little-Endian Only**: Every multi-byte integer on the wire is LE.
//!
//! A width that differs from the server's is not detectable at the framing
//! layer; it shifts every later offset and corrupts the stream for good.

use std::fmt;

use bytes::{Buf, BufMut};
use serde::Deserialize;

use crate::error::{ProtocolError, ProtocolResult};

/// Configured byte width for variable-size numeric fields.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
pub enum IntegerWidth {
    #[serde(rename = "uint8")]
    U8 = 1,
    #[default]
    #[serde(rename = "uint16")]
    U16 = 2,
    #[serde(rename = "uint32")]
    U32 = 4,
    #[serde(rename = "uint64")]
    U64 = 8,
}

impl IntegerWidth {
    /// All widths, smallest first.
    pub const ALL: [IntegerWidth; 4] = [
        IntegerWidth::U8,
        IntegerWidth::U16,
        IntegerWidth::U32,
        IntegerWidth::U64,
    ];

    /// Number of bytes a field of this width occupies.
    #[inline]
    pub const fn bytes(self) -> usize {
        self as usize
    }

    /// Largest value representable at this width.
    pub const fn max_value(self) -> u64 {
        match self {
            IntegerWidth::U8 => u8::MAX as u64,
            IntegerWidth::U16 => u16::MAX as u64,
            IntegerWidth::U32 => u32::MAX as u64,
            IntegerWidth::U64 => u64::MAX,
        }
    }

    /// Maps a byte count back to a width.
    pub const fn from_bytes(bytes: usize) -> Option<Self> {
        match bytes {
            1 => Some(IntegerWidth::U8),
            2 => Some(IntegerWidth::U16),
            4 => Some(IntegerWidth::U32),
            8 => Some(IntegerWidth::U64),
            _ => None,
        }
    }

    /// Parses the configuration spelling (`uint8` .. `uint64`) or a byte count.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "uint8" | "u8" | "1" => Some(IntegerWidth::U8),
            "uint16" | "u16" | "2" => Some(IntegerWidth::U16),
            "uint32" | "u32" | "4" => Some(IntegerWidth::U32),
            "uint64" | "u64" | "8" => Some(IntegerWidth::U64),
            _ => None,
        }
    }

    /// Appends `value` as a little-endian integer of this width.
    ///
    /// # Errors
    /// Returns `ProtocolError::IntegerOverflow` when `value` exceeds
    /// [`IntegerWidth::max_value`]; nothing is written in that case.
    pub fn put<B: BufMut>(self, out: &mut B, field: &'static str, value: u64) -> ProtocolResult<()> {
        self.check(field, value)?;
        out.put_uint_le(value, self.bytes());
        Ok(())
    }

    /// Validates that `value` fits without writing it.
    pub fn check(self, field: &'static str, value: u64) -> ProtocolResult<()> {
        if value > self.max_value() {
            return Err(ProtocolError::IntegerOverflow {
                field,
                value,
                width: self.bytes(),
            });
        }
        Ok(())
    }

    /// Reads a little-endian integer of this width from the front of `data`.
    ///
    /// Returns `None` when fewer than [`IntegerWidth::bytes`] bytes are present.
    pub fn read(self, data: &[u8]) -> Option<u64> {
        let mut data = data.get(..self.bytes())?;
        Some(data.get_uint_le(self.bytes()))
    }
}

impl fmt::Display for IntegerWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "uint{}", self.bytes() * 8)
    }
}

/// Reads a fixed 8-byte little-endian integer at `offset`, if present.
#[inline]
pub fn read_fixed8(data: &[u8], offset: usize) -> Option<u64> {
    IntegerWidth::U64.read(data.get(offset..)?)
}
