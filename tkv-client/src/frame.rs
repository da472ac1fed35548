//! # Frame Boundaries
//!
//! Purpose: Decide how many bytes the next frame occupies, given the kind the
//! head pending operation expects and whatever prefix of the stream has
//! arrived so far.
//!
//! ## Design Principles
//! 1. **Pure Functions**: No state, no I/O; every rule is unit-testable.
//! 2. **Incremental**: A short prefix yields `NeedMore`, never an error.
//! 3. **Checked Arithmetic**: A length that overflows `usize` means the stream
//!    position is lost and is reported as a desync.
//!
//! ```text
//! kind          length
//! ------------  --------------------------------------------------------
//! STATUS        1
//! QUERY         0x00 -> 1,  else 2W + 2
//! GET           0x00 -> 1,  else 2W + 2 + value_len (W at offset 2+W)
//! STAT          0x00 -> 1,  else 33
//! CONNECTION    0x00 -> 1,  else 238
//! WHOAMI        17
//! INFO          433
//! CHANNEL       9 + 40 * count (count = fixed8 at offset 1)
//! fragmented    9 + sum(16 + count * record + names)
//! push event    2 + W + channel_len + value_len
//! ```

use tkv_common::{
    list_record_len, read_fixed8, IntegerWidth, ResponseKind, CHANNELS_RECORD_LEN,
    CHANNEL_SUBSCRIBER_LEN, CONNECTION_LEN, CONNECTION_RECORD_LEN, COUNTED_HEADER_LEN,
    FRAGMENT_HEADER_LEN, INFO_LEN, STATS_RECORD_LEN, STATUS_FAILURE, STAT_LEN, WHOAMI_LEN,
};

use crate::error::{ClientError, ClientResult};

/// Outcome of sizing the frame at the head of the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameLength {
    /// The whole frame is present and spans this many bytes.
    Complete(usize),
    /// More bytes are needed before the frame can be sliced.
    NeedMore,
}

use FrameLength::{Complete, NeedMore};

/// Sizes the response frame at the start of `buf`.
///
/// # Errors
/// `ClientError::ProtocolDesync` when a length field produces an impossible
/// frame size.
pub fn response_frame_len(
    kind: ResponseKind,
    buf: &[u8],
    width: IntegerWidth,
) -> ClientResult<FrameLength> {
    let Some(&status) = buf.first() else {
        return Ok(NeedMore);
    };
    let w = width.bytes();
    let needed = match kind {
        ResponseKind::Status => 1,
        ResponseKind::WhoAmI => WHOAMI_LEN,
        ResponseKind::Info => INFO_LEN,
        ResponseKind::Query if status == STATUS_FAILURE => 1,
        ResponseKind::Query => 2 * w + 2,
        ResponseKind::Stat if status == STATUS_FAILURE => 1,
        ResponseKind::Stat => STAT_LEN,
        ResponseKind::Connection if status == STATUS_FAILURE => 1,
        ResponseKind::Connection => CONNECTION_LEN,
        ResponseKind::Get if status == STATUS_FAILURE => 1,
        ResponseKind::Get => {
            let header = 2 * w + 2;
            let Some(value_len) = width.read(&buf[(2 + w).min(buf.len())..]) else {
                return Ok(NeedMore);
            };
            add(header, to_usize(value_len)?)?
        }
        ResponseKind::Channel => {
            let Some(count) = read_fixed8(buf, 1) else {
                return Ok(NeedMore);
            };
            add(COUNTED_HEADER_LEN, mul(to_usize(count)?, CHANNEL_SUBSCRIBER_LEN)?)?
        }
        ResponseKind::List => return fragmented_len(buf, list_record_len(width), true),
        ResponseKind::Stats => return fragmented_len(buf, STATS_RECORD_LEN, true),
        ResponseKind::Channels => return fragmented_len(buf, CHANNELS_RECORD_LEN, true),
        ResponseKind::Connections => return fragmented_len(buf, CONNECTION_RECORD_LEN, false),
    };
    Ok(complete_if(buf, needed))
}

/// Sizes the push frame at the start of `buf`; the caller has already seen
/// the event tag.
pub fn event_frame_len(buf: &[u8], width: IntegerWidth) -> ClientResult<FrameLength> {
    let header = 2 + width.bytes();
    if buf.len() < header {
        return Ok(NeedMore);
    }
    let channel_len = buf[1] as usize;
    let value_len = width.read(&buf[2..]).unwrap_or(0);
    let needed = add(add(header, channel_len)?, to_usize(value_len)?)?;
    Ok(complete_if(buf, needed))
}

/// Walks fragment headers as far as the buffer allows.
///
/// Each fragment is `id:8 count:8`, then `count` fixed records, then (for
/// named kinds) the names, whose lengths are the first byte of each record.
fn fragmented_len(buf: &[u8], record_len: usize, named: bool) -> ClientResult<FrameLength> {
    let Some(fragments) = read_fixed8(buf, 1) else {
        return Ok(NeedMore);
    };
    let mut offset = COUNTED_HEADER_LEN;
    for _ in 0..fragments {
        let Some(count) = read_fixed8(buf, offset + 8) else {
            return Ok(NeedMore);
        };
        offset = add(offset, FRAGMENT_HEADER_LEN)?;
        let records = mul(to_usize(count)?, record_len)?;
        let records_end = add(offset, records)?;
        if buf.len() < records_end {
            return Ok(NeedMore);
        }
        let names: usize = if named {
            buf[offset..records_end]
                .chunks_exact(record_len)
                .map(|record| record[0] as usize)
                .sum()
        } else {
            0
        };
        offset = add(records_end, names)?;
    }
    Ok(complete_if(buf, offset))
}

#[inline]
fn complete_if(buf: &[u8], needed: usize) -> FrameLength {
    if buf.len() >= needed {
        Complete(needed)
    } else {
        NeedMore
    }
}

fn add(a: usize, b: usize) -> ClientResult<usize> {
    a.checked_add(b)
        .ok_or(ClientError::ProtocolDesync("frame length overflow"))
}

fn mul(a: usize, b: usize) -> ClientResult<usize> {
    a.checked_mul(b)
        .ok_or(ClientError::ProtocolDesync("frame length overflow"))
}

fn to_usize(value: u64) -> ClientResult<usize> {
    usize::try_from(value).map_err(|_| ClientError::ProtocolDesync("length field exceeds usize"))
}
