//! Compact form for amounts that are usually round decimal numbers.
//!
//! A non-zero `x = n·10^(e+1) + d·10^e` with `d` in 1..=9 and `e` in 0..=8
//! compresses to `1 + 10·(9n + d − 1) + e`; values with nine or more trailing
//! zeros use `e = 9` and store `1 + 10·(x/10^9 − 1) + 9`. The result can exceed
//! 64 bits for inputs close to `u64::MAX`.

use crate::{error::DecodeSnafu, Result};

pub fn compress_amount(amount: u64) -> u128 {
    if amount == 0 {
        return 0;
    }
    let mut n = u128::from(amount);
    let mut e = 0u128;
    while n % 10 == 0 && e < 9 {
        n /= 10;
        e += 1;
    }
    if e < 9 {
        let d = n % 10;
        n /= 10;
        1 + (n * 9 + d - 1) * 10 + e
    } else {
        1 + (n - 1) * 10 + 9
    }
}

pub fn decompress_amount(compressed: u128) -> Result<u64> {
    if compressed == 0 {
        return Ok(0);
    }
    let mut x = compressed - 1;
    let mut e = x % 10;
    x /= 10;
    let mut n = if e < 9 {
        let d = x % 9 + 1;
        x /= 9;
        x.checked_mul(10).and_then(|v| v.checked_add(d))
    } else {
        x.checked_add(1)
    };
    while e > 0 {
        n = n.and_then(|v| v.checked_mul(10));
        e -= 1;
    }
    n.and_then(|v| u64::try_from(v).ok()).ok_or_else(|| {
        DecodeSnafu {
            what: "compressed amount",
            reason: format!("{compressed} does not decompress into 64 bits"),
        }
        .build()
    })
}
