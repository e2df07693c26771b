//! Conversion between the ledger's native integer unit and the decimal
//! strings stored in the mirror and served to the UI.
//!
//! Amounts cross the ledger boundary as `u128` native units (1 display
//! unit = 10^18 native units) and cross the mirror/UI boundary as decimal
//! strings. Conversion is exact integer arithmetic in both directions; no
//! floating point is ever involved.

use crate::errors::{EngineError, Result};

/// Decimal places of the ledger's native unit.
pub const NATIVE_DECIMALS: u32 = 18;

const SCALE: u128 = 10u128.pow(NATIVE_DECIMALS);

/// Format a native-unit amount as a decimal string, trimming trailing
/// zeros from the fractional part ("1.5", not "1.500000000000000000").
pub fn to_decimal(native: u128) -> String {
    let whole = native / SCALE;
    let frac = native % SCALE;
    if frac == 0 {
        return whole.to_string();
    }
    let frac = format!("{frac:018}");
    let frac = frac.trim_end_matches('0');
    format!("{whole}.{frac}")
}

/// Parse a decimal string ("1.5", "0.000001", "12") into native units.
///
/// Rejects empty input, non-digit characters, more than one decimal
/// point, fractional parts finer than the native precision, and values
/// that overflow `u128`.
pub fn to_native(decimal: &str) -> Result<u128> {
    let decimal = decimal.trim();
    if decimal.is_empty() {
        return Err(EngineError::Validation("Empty amount".to_string()));
    }

    let (whole, frac) = match decimal.split_once('.') {
        Some((w, f)) => (w, f),
        None => (decimal, ""),
    };

    if whole.is_empty() && frac.is_empty() {
        return Err(EngineError::Validation(format!("Invalid amount: {decimal}")));
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return Err(EngineError::Validation(format!("Invalid amount: {decimal}")));
    }
    if frac.len() > NATIVE_DECIMALS as usize {
        return Err(EngineError::Validation(format!(
            "Amount has more than {NATIVE_DECIMALS} decimal places: {decimal}"
        )));
    }

    let whole: u128 = if whole.is_empty() {
        0
    } else {
        whole
            .parse()
            .map_err(|_| EngineError::Validation(format!("Amount out of range: {decimal}")))?
    };

    let frac_native: u128 = if frac.is_empty() {
        0
    } else {
        let padded = format!("{frac:0<18}");
        padded
            .parse()
            .map_err(|_| EngineError::Validation(format!("Amount out of range: {decimal}")))?
    };

    whole
        .checked_mul(SCALE)
        .and_then(|w| w.checked_add(frac_native))
        .ok_or_else(|| EngineError::Validation(format!("Amount out of range: {decimal}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_amounts_round_trip() {
        assert_eq!(to_native("1").unwrap(), SCALE);
        assert_eq!(to_native("10").unwrap(), 10 * SCALE);
        assert_eq!(to_decimal(SCALE), "1");
        assert_eq!(to_decimal(10 * SCALE), "10");
        assert_eq!(to_decimal(0), "0");
    }

    #[test]
    fn fractional_amounts() {
        assert_eq!(to_native("1.5").unwrap(), SCALE + SCALE / 2);
        assert_eq!(to_native("0.000000000000000001").unwrap(), 1);
        assert_eq!(to_native(".5").unwrap(), SCALE / 2);
        assert_eq!(to_decimal(SCALE + SCALE / 2), "1.5");
        assert_eq!(to_decimal(1), "0.000000000000000001");
    }

    #[test]
    fn trailing_zeros_trimmed() {
        assert_eq!(to_decimal(to_native("2.50").unwrap()), "2.5");
        assert_eq!(to_decimal(to_native("3.000").unwrap()), "3");
    }

    #[test]
    fn rejects_garbage() {
        assert!(to_native("").is_err());
        assert!(to_native(".").is_err());
        assert!(to_native("1.2.3").is_err());
        assert!(to_native("-1").is_err());
        assert!(to_native("1e18").is_err());
        assert!(to_native("abc").is_err());
    }

    #[test]
    fn rejects_excess_precision() {
        assert!(to_native("0.0000000000000000001").is_err());
    }

    #[test]
    fn rejects_overflow() {
        // u128::MAX / 10^18 ≈ 3.4e20, so 10^21 whole units overflows
        assert!(to_native("1000000000000000000000").is_err());
    }
}
