//! Base-128 variable length integers, most significant group first. Every
//! continuation group carries an implicit +1 so each value has exactly one
//! encoding.

use crate::{error::DecodeSnafu, Result};

pub const MAX_VARINT_LEN: usize = 10;

pub fn put_varuint(buf: &mut Vec<u8>, mut n: u64) {
    let mut tmp = [0u8; MAX_VARINT_LEN];
    let mut len = 0;
    loop {
        tmp[len] = (n & 0x7f) as u8 | if len > 0 { 0x80 } else { 0x00 };
        if n <= 0x7f {
            break;
        }
        n = (n >> 7) - 1;
        len += 1;
    }
    buf.extend(tmp[..=len].iter().rev());
}

/// Decodes a varuint from the front of `buf`, returning it with the number of
/// bytes consumed.
pub fn read_varuint(buf: &[u8]) -> Result<(u64, usize)> {
    let mut n: u64 = 0;
    for (i, b) in buf.iter().enumerate() {
        if n > (u64::MAX >> 7) {
            return DecodeSnafu {
                what: "varuint",
                reason: "value overflows 64 bits",
            }
            .fail();
        }
        n = (n << 7) | u64::from(b & 0x7f);
        if b & 0x80 == 0 {
            return Ok((n, i + 1));
        }
        n = n.checked_add(1).ok_or_else(|| {
            DecodeSnafu {
                what: "varuint",
                reason: "value overflows 64 bits",
            }
            .build()
        })?;
    }
    DecodeSnafu {
        what: "varuint",
        reason: "truncated input",
    }
    .fail()
}

pub fn put_varint(buf: &mut Vec<u8>, n: i64) {
    put_varuint(buf, ((n << 1) ^ (n >> 63)) as u64);
}

pub fn read_varint(buf: &[u8]) -> Result<(i64, usize)> {
    let (u, len) = read_varuint(buf)?;
    Ok((((u >> 1) as i64) ^ -((u & 1) as i64), len))
}
