//! Database connection management and the transactional retry layer.
//!
//! Every settlement-lifecycle write goes through [`Database::run_in_transaction`]:
//! it pins the isolation level, retries serialization/deadlock failures with
//! exponential backoff, and rolls back on any error. Store code never opens
//! raw transactions on its own.

use futures::future::BoxFuture;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::PgConnection;
use std::time::Duration;
use tracing::warn;

use crate::config::RetryConfig;

/// PostgreSQL database connection pool
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

/// Transaction isolation levels supported by the retry layer.
///
/// Financial mutations (release, refund, webhook transitions) run
/// `Serializable`; read-heavy reporting runs `ReadCommitted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    fn set_statement(&self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "SET TRANSACTION ISOLATION LEVEL READ COMMITTED",
            IsolationLevel::RepeatableRead => "SET TRANSACTION ISOLATION LEVEL REPEATABLE READ",
            IsolationLevel::Serializable => "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE",
        }
    }
}

/// Error classification hook for the retry loop.
///
/// Implemented by subsystem error enums so the layer can recognize a
/// serialization conflict buried in a typed error and synthesize the
/// `RetriesExhausted` variant without knowing the concrete type.
pub trait RetryClass: std::fmt::Display {
    /// True if this error wraps a serialization failure or deadlock
    fn is_conflict(&self) -> bool;

    /// Build the retries-exhausted error surfaced after the final attempt
    fn retries_exhausted(attempts: u32, last_error: String) -> Self;
}

/// SQLSTATE 40001 = serialization_failure, 40P01 = deadlock_detected
pub fn is_serialization_conflict(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            matches!(db.code().as_deref(), Some("40001") | Some("40P01"))
        }
        _ => false,
    }
}

impl Database {
    /// Create a new database connection pool
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;

        tracing::info!("PostgreSQL connection pool established");
        Ok(Self { pool })
    }

    /// Wrap an existing pool (tests)
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health
    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Execute `work` inside a transaction at the given isolation level,
    /// retrying the whole unit of work on serialization/deadlock failure.
    ///
    /// The closure is re-invoked from scratch on each attempt; partial effects
    /// of a failed attempt are rolled back first. After `retry.max_retries`
    /// conflicting attempts the layer returns `E::retries_exhausted` instead
    /// of the raw database error.
    pub async fn run_in_transaction<T, E, F>(
        &self,
        level: IsolationLevel,
        retry: RetryConfig,
        mut work: F,
    ) -> Result<T, E>
    where
        E: RetryClass + From<sqlx::Error>,
        F: for<'c> FnMut(&'c mut PgConnection) -> BoxFuture<'c, Result<T, E>>,
    {
        let mut attempt: u32 = 0;
        loop {
            let mut tx = self.pool.begin().await.map_err(E::from)?;
            sqlx::query(level.set_statement())
                .execute(&mut *tx)
                .await
                .map_err(E::from)?;

            match work(&mut *tx).await {
                Ok(value) => match tx.commit().await {
                    Ok(()) => return Ok(value),
                    Err(e) if is_serialization_conflict(&e) => {
                        if attempt >= retry.max_retries {
                            return Err(E::retries_exhausted(attempt + 1, e.to_string()));
                        }
                        warn!(attempt, error = %e, "Commit conflict, retrying transaction");
                        tokio::time::sleep(retry.delay_for(attempt)).await;
                        attempt += 1;
                    }
                    Err(e) => return Err(E::from(e)),
                },
                Err(err) => {
                    let _ = tx.rollback().await;
                    if err.is_conflict() {
                        if attempt >= retry.max_retries {
                            return Err(E::retries_exhausted(attempt + 1, err.to_string()));
                        }
                        warn!(attempt, error = %err, "Serialization conflict, retrying transaction");
                        tokio::time::sleep(retry.delay_for(attempt)).await;
                        attempt += 1;
                    } else {
                        return Err(err);
                    }
                }
            }
        }
    }

    /// Run read-only work on a pooled connection without a transaction wrapper
    pub async fn with_conn<T, E, F>(&self, work: F) -> Result<T, E>
    where
        E: From<sqlx::Error>,
        F: for<'c> FnOnce(&'c mut PgConnection) -> BoxFuture<'c, Result<T, E>>,
    {
        let mut conn = self.pool.acquire().await.map_err(E::from)?;
        work(&mut *conn).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isolation_statements() {
        assert!(
            IsolationLevel::Serializable
                .set_statement()
                .ends_with("SERIALIZABLE")
        );
        assert!(
            IsolationLevel::ReadCommitted
                .set_statement()
                .ends_with("READ COMMITTED")
        );
    }

    #[test]
    fn test_non_database_error_is_not_conflict() {
        assert!(!is_serialization_conflict(&sqlx::Error::RowNotFound));
    }
}
