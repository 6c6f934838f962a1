//! Checked ledger arithmetic
//!
//! Token amounts are `u128`; products in the issuance formula are computed in
//! 256 bits and narrowed back with an explicit overflow check.

use crate::error::{EscrowError, Result};
use crate::types::TokenAmount;

#[allow(clippy::assign_op_pattern, clippy::ptr_offset_with_cast, clippy::manual_range_contains)]
mod wide {
    uint::construct_uint! {
        /// 256-bit unsigned integer
        pub struct U256(4);
    }
}

pub use wide::U256;

pub fn add(a: TokenAmount, b: TokenAmount, what: &'static str) -> Result<TokenAmount> {
    a.checked_add(b).ok_or(EscrowError::Overflow(what))
}

/// Subtraction where underflow means the ledger lost track of value
pub fn sub(a: TokenAmount, b: TokenAmount, what: &'static str) -> Result<TokenAmount> {
    a.checked_sub(b).ok_or_else(|| {
        EscrowError::InvariantViolation(format!("{what}: {a} - {b} underflows"))
    })
}

pub fn mul(a: U256, b: U256, what: &'static str) -> Result<U256> {
    a.checked_mul(b).ok_or(EscrowError::Overflow(what))
}

/// Narrow a 256-bit value back to a token amount
pub fn narrow(value: U256, what: &'static str) -> Result<TokenAmount> {
    if value > U256::from(TokenAmount::MAX) {
        return Err(EscrowError::Overflow(what));
    }
    Ok(value.low_u128())
}

/// `floor(a * b * c / (d * e))` with 256-bit intermediates
pub fn mul_div3(
    a: TokenAmount,
    b: TokenAmount,
    c: TokenAmount,
    d: TokenAmount,
    e: TokenAmount,
    what: &'static str,
) -> Result<TokenAmount> {
    let numerator = mul(mul(U256::from(a), U256::from(b), what)?, U256::from(c), what)?;
    let denominator = mul(U256::from(d), U256::from(e), what)?;
    if denominator.is_zero() {
        return Err(EscrowError::InvariantViolation(format!("{what}: division by zero")));
    }
    narrow(numerator / denominator, what)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_checked_helpers() {
        assert_eq!(add(1, 2, "t").unwrap(), 3);
        assert!(matches!(add(u128::MAX, 1, "t"), Err(EscrowError::Overflow("t"))));
        assert_eq!(sub(5, 2, "t").unwrap(), 3);
        assert!(matches!(sub(2, 5, "t"), Err(EscrowError::InvariantViolation(_))));
    }

    #[test]
    fn test_mul_div3_wide_intermediate() {
        let big = 10u128.pow(27);
        // 10^27 * 10^27 * 104 overflows u128 but not U256
        let out = mul_div3(big, big, 104, big, 104, "t").unwrap();
        assert_eq!(out, big);
    }

    #[test]
    fn test_mul_div3_zero_denominator() {
        assert!(mul_div3(1, 1, 1, 0, 5, "t").is_err());
    }

    #[test]
    fn test_narrow_overflow() {
        let wide = U256::from(u128::MAX) + U256::from(1u8);
        assert!(narrow(wide, "t").is_err());
    }

    proptest! {
        #[test]
        fn mul_div3_matches_u128_when_small(
            a in 0u128..1_000_000,
            b in 0u128..1_000_000,
            c in 1u128..1_000,
            d in 1u128..1_000_000,
            e in 1u128..1_000,
        ) {
            let expected = a * b * c / (d * e);
            prop_assert_eq!(mul_div3(a, b, c, d, e, "p").unwrap(), expected);
        }
    }
}
