//! Money Arithmetic Module
//!
//! All amounts are carried as `i64` minor units (cents for most currencies).
//! Fee splits and currency conversion go through `rust_decimal` and round to
//! the nearest minor unit (midpoint away from zero), never truncate. Every
//! conversion in the engine MUST go through this module.

use rust_decimal::prelude::*;
use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

/// Money arithmetic errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Amount must not be negative")]
    NegativeAmount,

    #[error("Amount too large, would overflow")]
    Overflow,

    #[error("Fees {fees_minor} exceed gross {gross_minor}")]
    FeesExceedGross { gross_minor: i64, fees_minor: i64 },

    #[error("Invalid exchange rate: {0}")]
    InvalidRate(String),
}

/// ISO 4217 minor-unit exponent for a currency code.
///
/// Zero-decimal and three-decimal currencies per the gateway's published
/// list; everything else uses two.
pub fn minor_unit_exponent(currency: &str) -> u32 {
    match currency {
        "BIF" | "CLP" | "DJF" | "GNF" | "JPY" | "KMF" | "KRW" | "MGA" | "PYG" | "RWF" | "UGX"
        | "VND" | "VUV" | "XAF" | "XOF" | "XPF" => 0,
        "BHD" | "JOD" | "KWD" | "OMR" | "TND" => 3,
        _ => 2,
    }
}

/// Convert minor units to a major-unit decimal (e.g. 9380 USD -> 93.80)
pub fn minor_to_major(amount_minor: i64, currency: &str) -> Decimal {
    Decimal::from(amount_minor) / scale(currency)
}

/// Convert a major-unit decimal to minor units, rounding to the nearest
/// minor unit with midpoint away from zero
pub fn major_to_minor(amount: Decimal, currency: &str) -> Result<i64, MoneyError> {
    let scaled = (amount * scale(currency))
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    scaled.to_i64().ok_or(MoneyError::Overflow)
}

fn scale(currency: &str) -> Decimal {
    Decimal::from(10_i64.pow(minor_unit_exponent(currency)))
}

/// Percentage fee on a minor-unit amount, rounded to the nearest minor unit
pub fn percent_of(amount_minor: i64, pct: Decimal) -> Result<i64, MoneyError> {
    if amount_minor < 0 {
        return Err(MoneyError::NegativeAmount);
    }
    let fee = (Decimal::from(amount_minor) * pct / Decimal::from(100))
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    fee.to_i64().ok_or(MoneyError::Overflow)
}

/// Convert an amount between currencies at the given rate (base -> target),
/// honoring each currency's minor-unit exponent
pub fn convert_minor(
    amount_minor: i64,
    rate: Decimal,
    from_currency: &str,
    to_currency: &str,
) -> Result<i64, MoneyError> {
    if amount_minor < 0 {
        return Err(MoneyError::NegativeAmount);
    }
    if rate <= Decimal::ZERO {
        return Err(MoneyError::InvalidRate(rate.to_string()));
    }
    let major = minor_to_major(amount_minor, from_currency);
    major_to_minor(major * rate, to_currency)
}

/// Render a minor-unit amount as `"93.80 USD"` for notes and error messages
pub fn format_minor(amount_minor: i64, currency: &str) -> String {
    let exp = minor_unit_exponent(currency);
    let major = Decimal::from(amount_minor) / scale(currency);
    format!("{:.*} {}", exp as usize, major, currency)
}

/// Fee schedule applied when a settlement transaction is created
#[derive(Debug, Clone)]
pub struct FeeSchedule {
    pub platform_pct: Decimal,
    pub gateway_pct: Decimal,
    pub gateway_fixed_minor: i64,
}

/// Result of splitting a gross amount into fees and seller net
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeBreakdown {
    pub gross_minor: i64,
    pub platform_fee_minor: i64,
    pub gateway_fee_minor: i64,
    pub net_minor: i64,
}

impl FeeSchedule {
    /// Split a gross amount: `net = gross - platform_fee - gateway_fee`.
    ///
    /// Fails rather than producing a negative net.
    pub fn split(&self, gross_minor: i64) -> Result<FeeBreakdown, MoneyError> {
        if gross_minor < 0 {
            return Err(MoneyError::NegativeAmount);
        }
        let platform_fee_minor = percent_of(gross_minor, self.platform_pct)?;
        let gateway_fee_minor =
            percent_of(gross_minor, self.gateway_pct)?.saturating_add(self.gateway_fixed_minor);

        let fees = platform_fee_minor.saturating_add(gateway_fee_minor);
        if fees > gross_minor {
            return Err(MoneyError::FeesExceedGross {
                gross_minor,
                fees_minor: fees,
            });
        }

        Ok(FeeBreakdown {
            gross_minor,
            platform_fee_minor,
            gateway_fee_minor,
            net_minor: gross_minor - fees,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn standard_schedule() -> FeeSchedule {
        FeeSchedule {
            platform_pct: dec("3.0"),
            gateway_pct: dec("2.9"),
            gateway_fixed_minor: 30,
        }
    }

    #[test]
    fn test_fee_split_100_usd() {
        // gross=$100.00, platform 3%, gateway 2.9% + $0.30 -> net $93.80
        let split = standard_schedule().split(10_000).unwrap();
        assert_eq!(split.platform_fee_minor, 300);
        assert_eq!(split.gateway_fee_minor, 320);
        assert_eq!(split.net_minor, 9_380);
        assert_eq!(
            split.gross_minor - split.platform_fee_minor - split.gateway_fee_minor,
            split.net_minor
        );
    }

    #[test]
    fn test_fee_split_rounds_to_nearest_cent() {
        // gross=$0.99: platform 3% = 2.97c -> 3c, gateway 2.9% = 2.871c -> 3c + 30c
        let split = standard_schedule().split(99).unwrap();
        assert_eq!(split.platform_fee_minor, 3);
        assert_eq!(split.gateway_fee_minor, 33);
        assert_eq!(split.net_minor, 63);
    }

    #[test]
    fn test_fee_split_rejects_negative_net() {
        let err = standard_schedule().split(10).unwrap_err();
        assert!(matches!(err, MoneyError::FeesExceedGross { .. }));
    }

    #[test]
    fn test_convert_eur_to_usd() {
        // €25.00 at 1.1 -> $27.50
        let out = convert_minor(2_500, dec("1.1"), "EUR", "USD").unwrap();
        assert_eq!(out, 2_750);
    }

    #[test]
    fn test_convert_rounds_half_away_from_zero() {
        // €0.05 at 1.105 -> 5.525c -> 6c, not 5c
        let out = convert_minor(5, dec("1.105"), "EUR", "USD").unwrap();
        assert_eq!(out, 6);
    }

    #[test]
    fn test_convert_zero_decimal_currency() {
        // $10.00 at 150.2 JPY/USD -> ¥1502
        let out = convert_minor(1_000, dec("150.2"), "USD", "JPY").unwrap();
        assert_eq!(out, 1_502);
    }

    #[test]
    fn test_convert_rejects_bad_rate() {
        assert!(convert_minor(100, Decimal::ZERO, "EUR", "USD").is_err());
        assert!(convert_minor(100, dec("-1.0"), "EUR", "USD").is_err());
    }

    #[test]
    fn test_minor_unit_exponents() {
        assert_eq!(minor_unit_exponent("USD"), 2);
        assert_eq!(minor_unit_exponent("JPY"), 0);
        assert_eq!(minor_unit_exponent("KWD"), 3);
    }

    #[test]
    fn test_format_minor() {
        assert_eq!(format_minor(9_380, "USD"), "93.80 USD");
        assert_eq!(format_minor(1_502, "JPY"), "1502 JPY");
    }
}
