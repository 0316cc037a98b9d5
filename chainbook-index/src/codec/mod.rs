//! Byte grammar of every stored key and value. Pure functions: nothing here
//! touches the store.

mod amount;
mod bigint;
mod records;
mod varint;

pub use amount::{compress_amount, decompress_amount};
pub use bigint::{put_bigint, read_bigint, MAX_BIGINT_LEN};
use num::BigUint;
pub use records::*;
pub use varint::{put_varint, put_varuint, read_varint, read_varuint};

use crate::{
    error::DecodeSnafu,
    model::{AddrDesc, Hash256},
    Result,
};

/// Leading byte of descriptors that do not come from a script, such as
/// null-data markers. Script descriptors built by [`script_addr_desc`] never
/// start with it.
pub const SYNTHETIC_DESC_PREFIX: u8 = 0xff;

/// Synthetic tag wrapping an output script that itself starts with
/// [`SYNTHETIC_DESC_PREFIX`] (OP_INVALIDOPCODE, non-standard outputs only).
pub const ESCAPED_SCRIPT_TAG: u8 = 0xff;

/// Longest address descriptor that is indexed.
pub const MAX_ADDR_DESC_LEN: usize = 1024;

pub fn synthetic_addr_desc(tag: u8, payload: &[u8]) -> AddrDesc {
    let mut bytes = Vec::with_capacity(payload.len() + 2);
    bytes.push(SYNTHETIC_DESC_PREFIX);
    bytes.push(tag);
    bytes.extend_from_slice(payload);
    AddrDesc(bytes)
}

/// Descriptor of an output script, escaped when the script begins with the
/// synthetic prefix.
pub fn script_addr_desc(script: &[u8]) -> AddrDesc {
    match script.first() {
        Some(&SYNTHETIC_DESC_PREFIX) => synthetic_addr_desc(ESCAPED_SCRIPT_TAG, script),
        _ => AddrDesc(script.to_vec()),
    }
}

/// Output script behind a script descriptor, `None` for other synthetic ones.
pub fn addr_desc_script(desc: &AddrDesc) -> Option<&[u8]> {
    match parse_synthetic_addr_desc(desc) {
        Some((ESCAPED_SCRIPT_TAG, script)) => Some(script),
        Some(_) => None,
        None => Some(desc.as_bytes()),
    }
}

/// Splits a synthetic descriptor into its tag and payload.
pub fn parse_synthetic_addr_desc(desc: &AddrDesc) -> Option<(u8, &[u8])> {
    match desc.as_bytes() {
        [SYNTHETIC_DESC_PREFIX, tag, payload @ ..] => Some((*tag, payload)),
        _ => None,
    }
}

pub(crate) fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    put_varuint(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

/// Cursor over an encoded value. Errors name the record being decoded.
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    what: &'static str,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8], what: &'static str) -> Self {
        Self { buf, pos: 0, what }
    }

    fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn fail<T>(&self, reason: impl Into<String>) -> Result<T> {
        DecodeSnafu {
            what: self.what,
            reason: format!("{} at offset {}", reason.into(), self.pos),
        }
        .fail()
    }

    pub fn varuint(&mut self) -> Result<u64> {
        let (n, len) = read_varuint(self.rest()).or_else(|e| self.fail(e.to_string()))?;
        self.pos += len;
        Ok(n)
    }

    pub fn varuint32(&mut self) -> Result<u32> {
        let n = self.varuint()?;
        u32::try_from(n).or_else(|_| self.fail(format!("{n} overflows 32 bits")))
    }

    pub fn varint(&mut self) -> Result<i64> {
        let (n, len) = read_varint(self.rest()).or_else(|e| self.fail(e.to_string()))?;
        self.pos += len;
        Ok(n)
    }

    pub fn bigint(&mut self) -> Result<BigUint> {
        let (n, len) = read_bigint(self.rest()).or_else(|e| self.fail(e.to_string()))?;
        self.pos += len;
        Ok(n)
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.buf.len() - self.pos < n {
            return self.fail(format!("need {n} more bytes"));
        }
        let bytes = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    pub fn take_rest(&mut self) -> &'a [u8] {
        let rest = self.rest();
        self.pos = self.buf.len();
        rest
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn f32_be(&mut self) -> Result<f32> {
        let bytes: [u8; 4] = self.take(4)?.try_into().map_err(|_| {
            DecodeSnafu {
                what: self.what,
                reason: "short float",
            }
            .build()
        })?;
        Ok(f32::from_be_bytes(bytes))
    }

    pub fn hash(&mut self) -> Result<Hash256> {
        Hash256::from_slice(self.take(Hash256::LEN)?)
    }

    pub fn bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.varuint()? as usize;
        self.take(len)
    }

    pub fn string(&mut self) -> Result<String> {
        let bytes = self.bytes()?;
        String::from_utf8(bytes.to_vec()).or_else(|_| self.fail("invalid utf-8"))
    }

    pub fn finish(self) -> Result<()> {
        if !self.is_empty() {
            return self.fail(format!("{} trailing bytes", self.buf.len() - self.pos));
        }
        Ok(())
    }
}
