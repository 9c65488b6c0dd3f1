use super::money::{Amount, Units};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// RWF/unit conversion constants.
///
/// The operations that convert between money and reward units historically
/// disagree on the rate, so each keeps its own entry here instead of sharing
/// one number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateTable {
    /// Share of a paid amount that turns into rewards.
    pub accrual_rate: Decimal,
    /// RWF per unit when accruing.
    pub accrual_rwf_per_unit: Decimal,
    /// RWF per unit when redeeming units as an order discount.
    pub redemption_rwf_per_unit: Decimal,
    /// RWF value of one unit credited to a gas meter.
    pub meter_rwf_per_unit: Decimal,
}

impl Default for RateTable {
    fn default() -> Self {
        Self {
            accrual_rate: dec!(0.12),
            accrual_rwf_per_unit: dec!(300),
            redemption_rwf_per_unit: dec!(300),
            meter_rwf_per_unit: dec!(1000),
        }
    }
}

impl RateTable {
    /// `round(amount * accrual_rate / accrual_rwf_per_unit, 4)`
    pub fn accrual_units(&self, amount: Amount) -> Units {
        Units::new(amount.value() * self.accrual_rate / self.accrual_rwf_per_unit)
    }

    pub fn redemption_units(&self, discount_rwf: Amount) -> Units {
        Units::new(discount_rwf.value() / self.redemption_rwf_per_unit)
    }

    pub fn redemption_value(&self, units: Units) -> Decimal {
        units.value() * self.redemption_rwf_per_unit
    }

    pub fn meter_value(&self, units: Units) -> Decimal {
        units.value() * self.meter_rwf_per_unit
    }

    pub fn validate(&self) -> Result<(), String> {
        let positive = [
            ("accrual_rwf_per_unit", self.accrual_rwf_per_unit),
            ("redemption_rwf_per_unit", self.redemption_rwf_per_unit),
            ("meter_rwf_per_unit", self.meter_rwf_per_unit),
        ];
        for (name, value) in positive {
            if value <= Decimal::ZERO {
                return Err(format!("rates.{name} must be positive"));
            }
        }
        if self.accrual_rate < Decimal::ZERO || self.accrual_rate > Decimal::ONE {
            return Err("rates.accrual_rate must be between 0 and 1".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accrual_units_for_3000() {
        let rates = RateTable::default();
        let units = rates.accrual_units(Amount::new(dec!(3000)).unwrap());
        assert_eq!(units.value(), dec!(1.2));
    }

    #[test]
    fn test_accrual_rounds_to_four_places() {
        let rates = RateTable::default();
        // 1234 * 0.12 / 300 = 0.4936
        assert_eq!(
            rates.accrual_units(Amount::new(dec!(1234)).unwrap()).value(),
            dec!(0.4936)
        );
        // 1 * 0.12 / 300 = 0.0004
        assert_eq!(
            rates.accrual_units(Amount::new(dec!(1)).unwrap()).value(),
            dec!(0.0004)
        );
    }

    #[test]
    fn test_redemption_round_trip() {
        let rates = RateTable::default();
        let units = rates.redemption_units(Amount::new(dec!(300)).unwrap());
        assert_eq!(units.value(), dec!(1));
        assert_eq!(rates.redemption_value(units), dec!(300));
    }

    #[test]
    fn test_validate_rejects_zero_rate() {
        let rates = RateTable {
            redemption_rwf_per_unit: Decimal::ZERO,
            ..RateTable::default()
        };
        assert!(rates.validate().is_err());
        assert!(RateTable::default().validate().is_ok());
    }
}
