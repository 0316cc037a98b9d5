use num::{BigUint, Zero};

use crate::{error::DecodeSnafu, Result};

/// Largest magnitude, in bytes, that fits the one-byte length prefix.
pub const MAX_BIGINT_LEN: usize = 248;

/// Packs `value` as a length byte followed by its big-endian magnitude. Zero
/// is the single byte `0`.
pub fn put_bigint(buf: &mut Vec<u8>, value: &BigUint) -> Result<()> {
    if value.is_zero() {
        buf.push(0);
        return Ok(());
    }
    let bytes = value.to_bytes_be();
    if bytes.len() > MAX_BIGINT_LEN {
        return DecodeSnafu {
            what: "big integer",
            reason: format!("{} bytes exceed the {MAX_BIGINT_LEN} byte limit", bytes.len()),
        }
        .fail();
    }
    buf.push(bytes.len() as u8);
    buf.extend_from_slice(&bytes);
    Ok(())
}

pub fn read_bigint(buf: &[u8]) -> Result<(BigUint, usize)> {
    let Some(&len) = buf.first() else {
        return DecodeSnafu {
            what: "big integer",
            reason: "truncated input",
        }
        .fail();
    };
    let len = len as usize;
    if len > MAX_BIGINT_LEN || buf.len() < 1 + len {
        return DecodeSnafu {
            what: "big integer",
            reason: format!("bad length {len}"),
        }
        .fail();
    }
    Ok((BigUint::from_bytes_be(&buf[1..1 + len]), 1 + len))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_zero_and_satoshis() {
        let mut buf = Vec::new();
        put_bigint(&mut buf, &BigUint::zero()).unwrap();
        assert_eq!(buf, vec![0]);

        buf.clear();
        put_bigint(&mut buf, &BigUint::from(5_000_000_000u64)).unwrap();
        assert_eq!(buf, vec![5, 0x01, 0x2a, 0x05, 0xf2, 0x00]);
        assert_eq!(
            read_bigint(&buf).unwrap(),
            (BigUint::from(5_000_000_000u64), 6)
        );
    }

    #[test]
    fn test_oversized_value_is_rejected() {
        let huge = BigUint::from_bytes_be(&[0xff; MAX_BIGINT_LEN + 1]);
        assert!(put_bigint(&mut Vec::new(), &huge).is_err());
        assert!(read_bigint(&[3, 1, 2]).is_err());
    }

    proptest! {
        #[test]
        fn prop_bigint_round_trip(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
            let value = BigUint::from_bytes_be(&bytes);
            let mut buf = Vec::new();
            put_bigint(&mut buf, &value).unwrap();
            prop_assert_eq!(read_bigint(&buf).unwrap(), (value, buf.len()));
        }
    }
}
