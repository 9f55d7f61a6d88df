//! Fifty-significant-digit decimal arithmetic
//!
//! Tick math cannot use binary floating point: a relative error of 1e-16 in
//! `ln(price)` is already a few hundred-millionths of a tick, and repeated
//! conversions across decimal offsets drift by whole ticks. Everything here runs
//! on [`BigDecimal`] with a working precision above [`PRECISION`] and rounds
//! results back to [`PRECISION`] significant digits.

use bigdecimal::BigDecimal;
use num_bigint::{BigInt, Sign};
use num_traits::{One, ToPrimitive, Zero};
use once_cell::sync::Lazy;
use rust_decimal::Decimal;

/// Significant digits carried by every public result
pub const PRECISION: u64 = 50;

/// Internal precision, headroom for the sqrt reduction in [`ln`]
const WORK_PRECISION: u64 = 80;

/// Series terms below this magnitude are dropped
static SERIES_EPSILON: Lazy<BigDecimal> = Lazy::new(|| BigDecimal::new(BigInt::one(), 75));

/// Arguments are square-rooted until they fall below this before the series runs
static REDUCTION_CEILING: Lazy<BigDecimal> = Lazy::new(|| BigDecimal::new(BigInt::from(1001), 3));

/// ln(10)
pub static LN_10: Lazy<BigDecimal> = Lazy::new(|| ln_reduced(&BigDecimal::from(10)));

/// The tick base, 1.0001
pub static TICK_BASE: Lazy<BigDecimal> = Lazy::new(|| BigDecimal::new(BigInt::from(10001), 4));

/// ln(1.0001)
pub static LN_TICK_BASE: Lazy<BigDecimal> = Lazy::new(|| ln_reduced(&TICK_BASE));

/// 2^96 as used by Q64.96 sqrt prices
pub static Q96: Lazy<BigDecimal> = Lazy::new(|| BigDecimal::new(BigInt::one() << 96usize, 0));

/// Natural logarithm, `None` for non-positive input
pub fn ln(x: &BigDecimal) -> Option<BigDecimal> {
    if *x <= BigDecimal::zero() {
        return None;
    }

    // x = int * 10^-scale = m * 10^e with m in [1, 10)
    let (int, scale) = x.as_bigint_and_exponent();
    let digits = int.magnitude().to_string().len() as i64;
    let exponent = digits - 1 - scale;
    let mantissa = BigDecimal::new(int, digits - 1);

    let result = ln_reduced(&mantissa) + BigDecimal::from(exponent) * &*LN_10;
    Some(result.with_prec(WORK_PRECISION))
}

/// ln(y) for y >= 1 via repeated square roots and the atanh series
fn ln_reduced(y: &BigDecimal) -> BigDecimal {
    let one = BigDecimal::one();
    let mut y = y.clone();
    let mut halvings = 0u32;

    while y > *REDUCTION_CEILING {
        match y.sqrt() {
            Some(root) => y = root.with_prec(WORK_PRECISION),
            None => break,
        }
        halvings += 1;
    }

    // ln(y) = 2 * atanh(z), z = (y - 1) / (y + 1)
    let z = ((&y - &one) / (&y + &one)).with_prec(WORK_PRECISION);
    let z_squared = (&z * &z).with_prec(WORK_PRECISION);

    let mut term = z.clone();
    let mut sum = z;
    let mut k = 1u32;
    loop {
        term = (&term * &z_squared).with_prec(WORK_PRECISION);
        k += 2;
        let addend = (&term / BigDecimal::from(k)).with_prec(WORK_PRECISION);
        if addend.abs() < *SERIES_EPSILON {
            break;
        }
        sum += addend;
    }

    let scale = BigDecimal::new(BigInt::one() << (halvings as usize + 1), 0);
    (sum * scale).with_prec(WORK_PRECISION)
}

/// base^exponent by square-and-multiply, reciprocal for negative exponents
pub fn powi(base: &BigDecimal, exponent: i64) -> BigDecimal {
    let mut result = BigDecimal::one();
    let mut square = base.clone();
    let mut remaining = exponent.unsigned_abs();

    while remaining > 0 {
        if remaining & 1 == 1 {
            result = (&result * &square).with_prec(WORK_PRECISION);
        }
        remaining >>= 1;
        if remaining > 0 {
            square = (&square * &square).with_prec(WORK_PRECISION);
        }
    }

    if exponent < 0 {
        (BigDecimal::one() / result).with_prec(WORK_PRECISION)
    } else {
        result
    }
}

/// 10^n as an exact decimal
pub fn pow10(n: u32) -> BigDecimal {
    BigDecimal::new(BigInt::from(10u32).pow(n), 0)
}

/// Largest integer not above `x`
pub fn floor(x: &BigDecimal) -> BigInt {
    let (int, scale) = x.as_bigint_and_exponent();
    if scale <= 0 {
        return int * BigInt::from(10u32).pow((-scale) as u32);
    }
    let divisor = BigInt::from(10u32).pow(scale as u32);
    let quotient = &int / &divisor;
    let remainder = &int % &divisor;
    if int.sign() == Sign::Minus && !remainder.is_zero() {
        quotient - 1
    } else {
        quotient
    }
}

/// Smallest integer not below `x`
pub fn ceil(x: &BigDecimal) -> BigInt {
    -floor(&-x)
}

/// Nearest integer, halves rounded up
pub fn round(x: &BigDecimal) -> BigInt {
    floor(&(x + BigDecimal::new(BigInt::from(5), 1)))
}

/// Round to [`PRECISION`] significant digits
pub fn normalize(x: BigDecimal) -> BigDecimal {
    x.with_prec(PRECISION)
}

pub fn from_decimal(value: Decimal) -> BigDecimal {
    BigDecimal::new(BigInt::from(value.mantissa()), value.scale() as i64)
}

/// Convert to `Decimal` with `dp` fractional digits, `None` when out of range
pub fn to_decimal(x: &BigDecimal, dp: u32) -> Option<Decimal> {
    let shifted = x * pow10(dp);
    let mantissa = round(&shifted).to_i128()?;
    Decimal::try_from_i128_with_scale(mantissa, dp).ok()
}

pub fn from_u128(value: u128) -> BigDecimal {
    BigDecimal::new(BigInt::from(value), 0)
}

/// Floor to `u128`, `None` for negative or oversized values
pub fn floor_u128(x: &BigDecimal) -> Option<u128> {
    floor(x).to_u128()
}
