//! Fixed-point money helpers. Every amount in the system is a single fiat
//! currency with two fractional digits (DECIMAL(14,2) in the store).

use bigdecimal::{BigDecimal, Zero};

/// Normalise an amount to two fractional digits. Ties round away from zero,
/// which is half-up for the positive amounts accepted at the API boundary.
pub fn round2(amount: &BigDecimal) -> BigDecimal {
    amount.round(2).with_scale(2)
}

pub fn zero() -> BigDecimal {
    BigDecimal::zero().with_scale(2)
}

pub fn is_negative(amount: &BigDecimal) -> bool {
    amount < &BigDecimal::zero()
}

pub fn is_positive(amount: &BigDecimal) -> bool {
    amount > &BigDecimal::zero()
}
