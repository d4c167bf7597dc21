//! Transfer Currency Selector
//!
//! Decides, at transfer time, whether the held currency or a converted
//! currency/amount is used, based on available balance and freshness of
//! exchange-rate data. Stale rates block conversion; they are never used
//! silently.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::debug;

use super::types::RateSnapshot;
use crate::money::{self, MoneyError};

/// Available balance in one currency, minor units
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrencyBalance {
    pub currency: String,
    pub available_minor: i64,
}

/// Outcome of transfer-currency selection
#[derive(Debug, Clone, PartialEq)]
pub enum TransferPlan {
    /// Preferred currency has sufficient balance; transfer unchanged
    UsePreferred { amount_minor: i64 },
    /// Convert the required amount into `currency` at `rate`
    Convert {
        currency: String,
        amount_minor: i64,
        rate: Decimal,
    },
}

impl TransferPlan {
    /// Currency the transfer will actually be issued in
    pub fn currency<'a>(&'a self, preferred: &'a str) -> &'a str {
        match self {
            TransferPlan::UsePreferred { .. } => preferred,
            TransferPlan::Convert { currency, .. } => currency,
        }
    }

    pub fn amount_minor(&self) -> i64 {
        match self {
            TransferPlan::UsePreferred { amount_minor } => *amount_minor,
            TransferPlan::Convert { amount_minor, .. } => *amount_minor,
        }
    }
}

/// Selector error types
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SelectorError {
    /// The freshest rate for a needed pair is older than the threshold
    #[error("No fresh exchange rate for {base}->{target} (last captured {captured_at:?})")]
    ExchangeRateUnavailable {
        base: String,
        target: String,
        captured_at: Option<DateTime<Utc>>,
    },

    /// No currency holds enough balance, even after conversion
    #[error(
        "Insufficient balance: required {required_minor} {currency}, best available {available_minor}"
    )]
    InsufficientBalance {
        currency: String,
        required_minor: i64,
        available_minor: i64,
    },

    #[error(transparent)]
    Money(#[from] MoneyError),
}

/// Pick the currency and amount for an outbound transfer.
///
/// `required_minor` is in `preferred` currency. `rates` is the latest capture
/// batch; a pair missing from it entirely is treated the same as a stale one
/// once that pair is needed. Balances are scanned largest first so the
/// decision is deterministic.
pub fn select_transfer_currency(
    preferred: &str,
    required_minor: i64,
    balances: &[CurrencyBalance],
    rates: &[RateSnapshot],
    now: DateTime<Utc>,
    freshness: chrono::Duration,
) -> Result<TransferPlan, SelectorError> {
    let preferred_available = balances
        .iter()
        .find(|b| b.currency == preferred)
        .map(|b| b.available_minor)
        .unwrap_or(0);

    if preferred_available >= required_minor {
        return Ok(TransferPlan::UsePreferred {
            amount_minor: required_minor,
        });
    }

    let mut candidates: Vec<&CurrencyBalance> = balances
        .iter()
        .filter(|b| b.currency != preferred && b.available_minor > 0)
        .collect();
    candidates.sort_by(|a, b| {
        b.available_minor
            .cmp(&a.available_minor)
            .then_with(|| a.currency.cmp(&b.currency))
    });

    for balance in candidates {
        let snapshot = rates
            .iter()
            .find(|r| r.base == preferred && r.target == balance.currency);

        let snapshot = match snapshot {
            Some(s) => s,
            None => {
                return Err(SelectorError::ExchangeRateUnavailable {
                    base: preferred.to_string(),
                    target: balance.currency.clone(),
                    captured_at: None,
                });
            }
        };

        if !snapshot.is_fresh(now, freshness) {
            return Err(SelectorError::ExchangeRateUnavailable {
                base: preferred.to_string(),
                target: balance.currency.clone(),
                captured_at: Some(snapshot.captured_at),
            });
        }

        let converted_minor = money::convert_minor(
            required_minor,
            snapshot.rate,
            preferred,
            &balance.currency,
        )?;

        if balance.available_minor >= converted_minor {
            debug!(
                preferred = %preferred,
                currency = %balance.currency,
                rate = %snapshot.rate,
                converted_minor,
                "Selected conversion currency for transfer"
            );
            return Ok(TransferPlan::Convert {
                currency: balance.currency.clone(),
                amount_minor: converted_minor,
                rate: snapshot.rate,
            });
        }

        debug!(
            currency = %balance.currency,
            converted_minor,
            available_minor = balance.available_minor,
            "Candidate balance cannot cover the converted amount"
        );
    }

    // Shortfall reported in the transaction's own currency
    Err(SelectorError::InsufficientBalance {
        currency: preferred.to_string(),
        required_minor,
        available_minor: preferred_available,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn fresh_rate(base: &str, target: &str, rate: &str, now: DateTime<Utc>) -> RateSnapshot {
        RateSnapshot {
            base: base.into(),
            target: target.into(),
            rate: Decimal::from_str(rate).unwrap(),
            captured_at: now - chrono::Duration::hours(1),
            batch_id: 1,
            source: "test".into(),
        }
    }

    fn stale_rate(base: &str, target: &str, rate: &str, now: DateTime<Utc>) -> RateSnapshot {
        RateSnapshot {
            captured_at: now - chrono::Duration::hours(25),
            ..fresh_rate(base, target, rate, now)
        }
    }

    fn balances(pairs: &[(&str, i64)]) -> Vec<CurrencyBalance> {
        pairs
            .iter()
            .map(|(c, amount)| CurrencyBalance {
                currency: c.to_string(),
                available_minor: *amount,
            })
            .collect()
    }

    fn freshness() -> chrono::Duration {
        chrono::Duration::hours(24)
    }

    #[test]
    fn test_preferred_currency_sufficient_no_conversion() {
        let now = Utc::now();
        let plan = select_transfer_currency(
            "EUR",
            2_500,
            &balances(&[("EUR", 5_000), ("USD", 10_000)]),
            &[fresh_rate("EUR", "USD", "1.1", now)],
            now,
            freshness(),
        )
        .unwrap();

        assert_eq!(plan, TransferPlan::UsePreferred { amount_minor: 2_500 });
        assert_eq!(plan.currency("EUR"), "EUR");
    }

    #[test]
    fn test_converts_when_preferred_insufficient() {
        // preferred=EUR, required=€25.00, EUR balance short, fresh EUR->USD=1.1
        // -> selects USD at $27.50
        let now = Utc::now();
        let plan = select_transfer_currency(
            "EUR",
            2_500,
            &balances(&[("USD", 3_000), ("EUR", 500)]),
            &[fresh_rate("EUR", "USD", "1.1", now)],
            now,
            freshness(),
        )
        .unwrap();

        assert_eq!(
            plan,
            TransferPlan::Convert {
                currency: "USD".into(),
                amount_minor: 2_750,
                rate: Decimal::from_str("1.1").unwrap(),
            }
        );
    }

    #[test]
    fn test_stale_rate_blocks_conversion() {
        let now = Utc::now();
        let err = select_transfer_currency(
            "EUR",
            2_500,
            &balances(&[("USD", 10_000), ("EUR", 500)]),
            &[stale_rate("EUR", "USD", "1.1", now)],
            now,
            freshness(),
        )
        .unwrap_err();

        match err {
            SelectorError::ExchangeRateUnavailable { base, target, captured_at } => {
                assert_eq!(base, "EUR");
                assert_eq!(target, "USD");
                assert!(captured_at.is_some());
            }
            other => panic!("expected ExchangeRateUnavailable, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_pair_blocks_conversion() {
        let now = Utc::now();
        let err = select_transfer_currency(
            "EUR",
            2_500,
            &balances(&[("GBP", 10_000), ("EUR", 500)]),
            &[],
            now,
            freshness(),
        )
        .unwrap_err();

        assert!(matches!(
            err,
            SelectorError::ExchangeRateUnavailable { captured_at: None, .. }
        ));
    }

    #[test]
    fn test_insufficient_everywhere_reports_shortfall() {
        // USD balance of $10 cannot fund $27.50 converted
        let now = Utc::now();
        let err = select_transfer_currency(
            "EUR",
            2_500,
            &balances(&[("USD", 1_000), ("EUR", 500)]),
            &[fresh_rate("EUR", "USD", "1.1", now)],
            now,
            freshness(),
        )
        .unwrap_err();

        match err {
            SelectorError::InsufficientBalance {
                currency,
                required_minor,
                ..
            } => {
                assert_eq!(currency, "EUR");
                assert_eq!(required_minor, 2_500);
            }
            other => panic!("expected InsufficientBalance, got {other:?}"),
        }
    }

    #[test]
    fn test_scans_largest_balance_first() {
        let now = Utc::now();
        let plan = select_transfer_currency(
            "EUR",
            1_000,
            &balances(&[("GBP", 2_000), ("USD", 9_000)]),
            &[
                fresh_rate("EUR", "USD", "1.1", now),
                fresh_rate("EUR", "GBP", "0.85", now),
            ],
            now,
            freshness(),
        )
        .unwrap();

        assert_eq!(plan.currency("EUR"), "USD");
        assert_eq!(plan.amount_minor(), 1_100);
    }

    #[test]
    fn test_zero_balance_candidates_skipped() {
        let now = Utc::now();
        let err = select_transfer_currency(
            "EUR",
            2_500,
            &balances(&[("USD", 0), ("EUR", 500)]),
            &[fresh_rate("EUR", "USD", "1.1", now)],
            now,
            freshness(),
        )
        .unwrap_err();

        assert!(matches!(err, SelectorError::InsufficientBalance { .. }));
    }
}
