//! Exchange-rate snapshot type

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// One captured exchange rate for a currency pair.
///
/// Snapshots are append-only; the current rate for a pair is the row from the
/// most recent capture batch. Old rows are kept for audit.
#[derive(Debug, Clone, PartialEq)]
pub struct RateSnapshot {
    /// Currency being converted from
    pub base: String,
    /// Currency being converted to
    pub target: String,
    /// Units of `target` per one unit of `base`
    pub rate: Decimal,
    pub captured_at: DateTime<Utc>,
    /// Capture batch; all pairs fetched together share one id
    pub batch_id: i64,
    /// Provider the rate came from
    pub source: String,
}

impl RateSnapshot {
    /// Whether the snapshot is younger than the freshness threshold
    pub fn is_fresh(&self, now: DateTime<Utc>, freshness: chrono::Duration) -> bool {
        now - self.captured_at <= freshness
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_freshness_boundary() {
        let now = Utc::now();
        let snapshot = RateSnapshot {
            base: "EUR".into(),
            target: "USD".into(),
            rate: Decimal::new(11, 1),
            captured_at: now - chrono::Duration::hours(23),
            batch_id: 1,
            source: "ecb".into(),
        };

        assert!(snapshot.is_fresh(now, chrono::Duration::hours(24)));
        assert!(!snapshot.is_fresh(now, chrono::Duration::hours(22)));
    }
}
