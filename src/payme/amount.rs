//! Tiyin conversion. Payme carries amounts in tiyin (1/100 of a sum); the
//! ledger stores sums. Nothing else in the crate converts between the two.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AmountError {
    #[error("amount {0} has a fractional tiyin part")]
    FractionalTiyin(Decimal),
    #[error("amount {0} does not fit in tiyin")]
    OutOfRange(Decimal),
    #[error("amount must be a positive whole number of tiyin")]
    InvalidWire,
}

pub fn to_tiyin(amount: Decimal) -> Result<i64, AmountError> {
    let scaled = amount
        .checked_mul(Decimal::ONE_HUNDRED)
        .ok_or(AmountError::OutOfRange(amount))?;
    if !scaled.fract().is_zero() {
        return Err(AmountError::FractionalTiyin(amount));
    }
    scaled.to_i64().ok_or(AmountError::OutOfRange(amount))
}

pub fn from_tiyin(tiyin: i64) -> Decimal {
    Decimal::new(tiyin, 2)
}

/// Reads the wire `amount`, which Payme sends as a JSON number.
pub fn tiyin_from_wire(value: &Value) -> Result<i64, AmountError> {
    let tiyin = if let Some(whole) = value.as_i64() {
        whole
    } else if let Some(float) = value.as_f64() {
        if float.fract() != 0.0 || !float.is_finite() || float > i64::MAX as f64 {
            return Err(AmountError::InvalidWire);
        }
        float as i64
    } else {
        return Err(AmountError::InvalidWire);
    };
    if tiyin <= 0 {
        return Err(AmountError::InvalidWire);
    }
    Ok(tiyin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn five_hundred_sum_is_fifty_thousand_tiyin() {
        assert_eq!(to_tiyin(Decimal::new(50000, 2)), Ok(50_000));
        assert_eq!(from_tiyin(50_000), Decimal::new(500, 0));
    }

    #[test]
    fn fractional_tiyin_is_rejected() {
        let amount = Decimal::new(5_000_001, 4);
        assert_eq!(to_tiyin(amount), Err(AmountError::FractionalTiyin(amount)));
    }

    #[test]
    fn wire_amount_accepts_whole_numbers_only() {
        assert_eq!(tiyin_from_wire(&json!(50000)), Ok(50_000));
        assert_eq!(tiyin_from_wire(&json!(50000.0)), Ok(50_000));
        assert_eq!(tiyin_from_wire(&json!(50000.5)), Err(AmountError::InvalidWire));
        assert_eq!(tiyin_from_wire(&json!("50000")), Err(AmountError::InvalidWire));
        assert_eq!(tiyin_from_wire(&json!(0)), Err(AmountError::InvalidWire));
    }
}
