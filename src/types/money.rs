//! Fixed-point currency amounts.

use serde::{Deserialize, Serialize};

const NANOS_PER_UNIT: i64 = 1_000_000_000;
const MAX_NANOS: i32 = NANOS_PER_UNIT as i32 - 1;

/// An amount of money in a single currency.
///
/// `units` is the whole-currency part, `nanos` the fractional part in
/// billionths of a unit. For a well-formed amount `units` and `nanos`
/// agree in sign and `|nanos| < 1_000_000_000`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    /// ISO 4217 currency code, e.g. "USD".
    pub currency_code: String,
    pub units: i64,
    pub nanos: i32,
}

impl Money {
    pub fn new(currency_code: impl Into<String>, units: i64, nanos: i32) -> Self {
        Self {
            currency_code: currency_code.into(),
            units,
            nanos,
        }
    }

    /// Add `other` to this amount, saturating at the representable
    /// extremes instead of wrapping.
    ///
    /// Both amounts must share a currency code; the caller guarantees
    /// this (amounts with different currencies never share a metric
    /// value signature).
    pub fn saturating_add(&self, other: &Money) -> Money {
        let total_nanos = i128::from(self.units) * i128::from(NANOS_PER_UNIT)
            + i128::from(self.nanos)
            + i128::from(other.units) * i128::from(NANOS_PER_UNIT)
            + i128::from(other.nanos);

        let max = i128::from(i64::MAX) * i128::from(NANOS_PER_UNIT) + i128::from(MAX_NANOS);
        let min = i128::from(i64::MIN) * i128::from(NANOS_PER_UNIT) - i128::from(MAX_NANOS);

        let clamped = total_nanos.clamp(min, max);
        let units = (clamped / i128::from(NANOS_PER_UNIT)) as i64;
        let nanos = (clamped % i128::from(NANOS_PER_UNIT)) as i32;

        Money {
            currency_code: self.currency_code.clone(),
            units,
            nanos,
        }
    }
}
