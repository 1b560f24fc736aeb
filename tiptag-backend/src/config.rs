// Service configuration, read from the environment (and `.env` when present)

use anyhow::{anyhow, Context, Result};
use std::time::Duration;
use tracing::info;

use crate::ledger::SettlementMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub server_port: u16,
    pub payment_api_url: Option<String>,
    pub payment_api_key: String,
    pub provider_timeout: Duration,
    pub notify_webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
    pub allow_unsigned_callbacks: bool,
    pub reconcile_interval: Duration,
    pub pending_tip_ttl: Duration,
    pub settlement: SettlementMode,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup, so tests don't have to touch process env
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let secs = |key: &str, default: u64| -> Result<Duration> {
            match get(key) {
                Some(v) => v
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .with_context(|| format!("{} must be a whole number of seconds", key)),
                None => Ok(Duration::from_secs(default)),
            }
        };

        let server_port = get("PORT")
            .unwrap_or_else(|| "4000".to_string())
            .parse::<u16>()
            .context("PORT must be a valid port number")?;

        let settlement = match get("WITHDRAWAL_SETTLEMENT").as_deref() {
            None | Some("sync") => SettlementMode::Synchronous,
            Some("async") => SettlementMode::Asynchronous,
            Some(other) => {
                return Err(anyhow!(
                    "WITHDRAWAL_SETTLEMENT must be 'sync' or 'async', got '{}'",
                    other
                ))
            }
        };

        let allow_unsigned_callbacks = match get("ALLOW_UNSIGNED_CALLBACKS").as_deref() {
            None | Some("false") | Some("0") => false,
            Some("true") | Some("1") => true,
            Some(other) => {
                return Err(anyhow!(
                    "ALLOW_UNSIGNED_CALLBACKS must be 'true' or 'false', got '{}'",
                    other
                ))
            }
        };

        let log_format = match get("LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        Ok(Self {
            database_url: get("DATABASE_URL")
                .unwrap_or_else(|| "sqlite:tiptag.db?mode=rwc".to_string()),
            server_port,
            payment_api_url: get("PAYMENT_API_URL"),
            payment_api_key: get("PAYMENT_API_KEY").unwrap_or_default(),
            provider_timeout: secs("PROVIDER_TIMEOUT_SECS", 10)?,
            notify_webhook_url: get("NOTIFY_WEBHOOK_URL"),
            webhook_secret: get("WEBHOOK_SECRET"),
            allow_unsigned_callbacks,
            reconcile_interval: secs("RECONCILE_INTERVAL_SECS", 5)?,
            pending_tip_ttl: secs("PENDING_TIP_TTL_SECS", 900)?,
            settlement,
            log_format,
        })
    }

    pub fn log_summary(&self) {
        info!("Configuration:");
        info!("  Database: {}", self.database_url);
        info!("  Server Port: {}", self.server_port);
        info!(
            "  Payment API: {}",
            self.payment_api_url
                .as_deref()
                .unwrap_or("(not set - checkout disabled)")
        );
        info!(
            "  Notifications: {}",
            if self.notify_webhook_url.is_some() {
                "(webhook configured)"
            } else {
                "(not set - log only)"
            }
        );
        info!(
            "  Webhook secret: {}",
            match (&self.webhook_secret, self.allow_unsigned_callbacks) {
                (Some(_), _) => "(configured)",
                (None, true) => "(not set - unsigned callbacks ALLOWED)",
                (None, false) => "(not set - provider callbacks refused)",
            }
        );
        info!("  Withdrawal settlement: {:?}", self.settlement);
        info!("  Reconcile interval: {:?}", self.reconcile_interval);
        info!("  Pending tip TTL: {:?}", self.pending_tip_ttl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.server_port, 4000);
        assert_eq!(cfg.database_url, "sqlite:tiptag.db?mode=rwc");
        assert_eq!(cfg.settlement, SettlementMode::Synchronous);
        assert_eq!(cfg.pending_tip_ttl, Duration::from_secs(900));
        assert_eq!(cfg.log_format, LogFormat::Text);
        assert!(cfg.payment_api_url.is_none());
        assert!(cfg.webhook_secret.is_none());
        assert!(!cfg.allow_unsigned_callbacks);
    }

    #[test]
    fn test_overrides() {
        let cfg = config(&[
            ("PORT", "8080"),
            ("WITHDRAWAL_SETTLEMENT", "async"),
            ("RECONCILE_INTERVAL_SECS", "30"),
            ("PAYMENT_API_URL", "https://pay.example.com"),
            ("LOG_FORMAT", "json"),
            ("ALLOW_UNSIGNED_CALLBACKS", "true"),
        ])
        .unwrap();
        assert_eq!(cfg.server_port, 8080);
        assert_eq!(cfg.settlement, SettlementMode::Asynchronous);
        assert_eq!(cfg.reconcile_interval, Duration::from_secs(30));
        assert_eq!(cfg.payment_api_url.as_deref(), Some("https://pay.example.com"));
        assert_eq!(cfg.log_format, LogFormat::Json);
        assert!(cfg.allow_unsigned_callbacks);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(config(&[("PORT", "not-a-port")]).is_err());
        assert!(config(&[("WITHDRAWAL_SETTLEMENT", "eventually")]).is_err());
        assert!(config(&[("PENDING_TIP_TTL_SECS", "-5")]).is_err());
        assert!(config(&[("ALLOW_UNSIGNED_CALLBACKS", "maybe")]).is_err());
    }
}
