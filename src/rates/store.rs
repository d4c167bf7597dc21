//! Exchange Rate Store
//!
//! Append-only persistence for rate snapshots. Writes never update rows; a
//! new capture batch supersedes the previous one wholesale.

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, Row};

use super::types::RateSnapshot;

/// Exchange rate database operations
pub struct RateDb;

impl RateDb {
    /// Append a capture batch of snapshots. Returns the batch id used.
    pub async fn insert_batch(
        conn: &mut PgConnection,
        captured_at: DateTime<Utc>,
        source: &str,
        pairs: &[(String, String, rust_decimal::Decimal)],
    ) -> Result<i64, sqlx::Error> {
        let batch_id: i64 = sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(MAX(batch_id), 0) + 1 FROM exchange_rates_tb",
        )
        .fetch_one(&mut *conn)
        .await?;

        for (base, target, rate) in pairs {
            sqlx::query(
                r#"
                INSERT INTO exchange_rates_tb (base, target, rate, captured_at, batch_id, source)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(base)
            .bind(target)
            .bind(rate)
            .bind(captured_at)
            .bind(batch_id)
            .bind(source)
            .execute(&mut *conn)
            .await?;
        }

        Ok(batch_id)
    }

    /// All snapshots of the most recent capture batch
    pub async fn latest_batch(conn: &mut PgConnection) -> Result<Vec<RateSnapshot>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT base, target, rate, captured_at, batch_id, source
            FROM exchange_rates_tb
            WHERE batch_id = (SELECT COALESCE(MAX(batch_id), 0) FROM exchange_rates_tb)
            "#,
        )
        .fetch_all(&mut *conn)
        .await?;

        let mut snapshots = Vec::with_capacity(rows.len());
        for row in rows {
            snapshots.push(RateSnapshot {
                base: row.try_get("base")?,
                target: row.try_get("target")?,
                rate: row.try_get("rate")?,
                captured_at: row.try_get("captured_at")?,
                batch_id: row.try_get("batch_id")?,
                source: row.try_get("source")?,
            });
        }

        Ok(snapshots)
    }
}
