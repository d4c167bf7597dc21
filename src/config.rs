use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub enable_tracing: bool,
    pub server: ServerConfig,
    /// PostgreSQL connection URL for the settlement store
    pub postgres_url: String,
    pub psp: PspConfig,
    #[serde(default)]
    pub settlement: SettlementConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Payment service provider credentials and webhook verification settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PspConfig {
    pub base_url: String,
    pub secret_key: String,
    pub webhook_secret: String,
    /// Maximum age of a signed webhook timestamp before it is rejected as a replay
    #[serde(default = "default_signature_tolerance_secs")]
    pub signature_tolerance_secs: u64,
}

fn default_signature_tolerance_secs() -> u64 {
    300
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SettlementConfig {
    /// Days funds are held after payment confirmation before release is allowed
    pub hold_days: i64,
    /// Platform commission, percent of gross
    pub platform_fee_pct: Decimal,
    /// Gateway processing fee, percent of gross
    pub gateway_fee_pct: Decimal,
    /// Gateway fixed fee per transaction, in minor units of the transaction currency
    pub gateway_fee_fixed_minor: i64,
    /// Maximum age of an exchange-rate snapshot usable for conversion
    pub rate_freshness_hours: i64,
    /// Time a transaction may sit in `processing` without gateway confirmation
    /// before it is flagged for manual reconciliation
    pub processing_grace_hours: i64,
    /// Time a `pending` transaction may wait for payment confirmation before
    /// the sweep cancels it
    pub pending_timeout_hours: i64,
    pub sweep_interval_secs: u64,
    /// Whether the sweep auto-releases transactions past their hold date
    pub auto_release: bool,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            hold_days: 30,
            platform_fee_pct: Decimal::new(30, 1), // 3.0%
            gateway_fee_pct: Decimal::new(29, 1),  // 2.9%
            gateway_fee_fixed_minor: 30,           // $0.30
            rate_freshness_hours: 24,
            processing_grace_hours: 48,
            pending_timeout_hours: 72,
            sweep_interval_secs: 300,
            auto_release: true,
        }
    }
}

impl SettlementConfig {
    pub fn hold_duration(&self) -> chrono::Duration {
        chrono::Duration::days(self.hold_days)
    }

    pub fn rate_freshness(&self) -> chrono::Duration {
        chrono::Duration::hours(self.rate_freshness_hours)
    }
}

/// Retry settings for the transactional retry layer
#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 100,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay before retrying after the given zero-based attempt number
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt as i32);
        Duration::from_millis((self.base_delay_ms as f64 * factor) as u64)
    }
}

impl AppConfig {
    pub fn load(env: &str) -> Self {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .unwrap_or_else(|_| panic!("Failed to read config file: {}", config_path));
        serde_yaml::from_str(&content).expect("Failed to parse config yaml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_backoff_delays() {
        let retry = RetryConfig::default();
        assert_eq!(retry.delay_for(0), Duration::from_millis(100));
        assert_eq!(retry.delay_for(1), Duration::from_millis(200));
        assert_eq!(retry.delay_for(2), Duration::from_millis(400));
    }

    #[test]
    fn test_settlement_defaults() {
        let cfg = SettlementConfig::default();
        assert_eq!(cfg.hold_days, 30);
        assert_eq!(cfg.hold_duration(), chrono::Duration::days(30));
        assert_eq!(cfg.platform_fee_pct, Decimal::new(30, 1));
        assert_eq!(cfg.rate_freshness(), chrono::Duration::hours(24));
    }
}
