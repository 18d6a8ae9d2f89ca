use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    Immediate,
    Offer,
}

impl DispatchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchMode::Immediate => "immediate",
            DispatchMode::Offer => "offer",
        }
    }
}

impl FromStr for DispatchMode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "immediate" => Ok(DispatchMode::Immediate),
            "offer" => Ok(DispatchMode::Offer),
            other => Err(format!("unknown dispatch mode: {other}")),
        }
    }
}

impl std::fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub dispatch_mode: DispatchMode,
    pub dispatch_queue_size: usize,
    pub webhook_queue_size: usize,
    pub default_radius_km: f64,
    pub max_candidates: usize,
    pub liveness_ttl_secs: u64,
    pub offer_expiry_secs: u64,
    pub offer_sweep_secs: u64,
    pub disconnect_grace_secs: u64,
    pub reconcile_secs: u64,
    pub webhook_timeout_secs: u64,
    pub channel_jwt_secret: String,
    pub order_ready_webhook_secret: Option<String>,
    pub commerce_webhook_url: Option<String>,
    pub commerce_webhook_secret: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 3000,
            log_level: "info".to_string(),
            dispatch_mode: DispatchMode::Immediate,
            dispatch_queue_size: 1024,
            webhook_queue_size: 1024,
            default_radius_km: 10.0,
            max_candidates: 50,
            liveness_ttl_secs: 60,
            offer_expiry_secs: 30,
            offer_sweep_secs: 5,
            disconnect_grace_secs: 30,
            reconcile_secs: 60,
            webhook_timeout_secs: 5,
            channel_jwt_secret: "dev-secret".to_string(),
            order_ready_webhook_secret: None,
            commerce_webhook_url: None,
            commerce_webhook_secret: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();
        let defaults = Config::default();

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", defaults.http_port)?,
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            dispatch_mode: parse_or_default("DISPATCH_MODE", defaults.dispatch_mode)?,
            dispatch_queue_size: parse_or_default(
                "DISPATCH_QUEUE_SIZE",
                defaults.dispatch_queue_size,
            )?,
            webhook_queue_size: parse_or_default("WEBHOOK_QUEUE_SIZE", defaults.webhook_queue_size)?,
            default_radius_km: parse_or_default(
                "DEFAULT_SEARCH_RADIUS_KM",
                defaults.default_radius_km,
            )?,
            max_candidates: parse_or_default("MAX_CANDIDATES", defaults.max_candidates)?,
            liveness_ttl_secs: parse_or_default("DRIVER_LIVENESS_TTL_SECS", defaults.liveness_ttl_secs)?,
            offer_expiry_secs: parse_or_default("OFFER_EXPIRY_SECS", defaults.offer_expiry_secs)?,
            offer_sweep_secs: parse_or_default("OFFER_SWEEP_INTERVAL_SECS", defaults.offer_sweep_secs)?,
            disconnect_grace_secs: parse_or_default(
                "DISCONNECT_GRACE_SECS",
                defaults.disconnect_grace_secs,
            )?,
            reconcile_secs: parse_or_default("INDEX_RECONCILE_SECS", defaults.reconcile_secs)?,
            webhook_timeout_secs: parse_or_default(
                "WEBHOOK_TIMEOUT_SECS",
                defaults.webhook_timeout_secs,
            )?,
            channel_jwt_secret: env::var("CHANNEL_JWT_SECRET").unwrap_or(defaults.channel_jwt_secret),
            order_ready_webhook_secret: env::var("ORDER_READY_WEBHOOK_SECRET").ok(),
            commerce_webhook_url: env::var("COMMERCE_WEBHOOK_URL").ok(),
            commerce_webhook_secret: env::var("COMMERCE_WEBHOOK_SECRET").ok(),
        })
    }

    pub fn liveness_ttl(&self) -> Duration {
        Duration::from_secs(self.liveness_ttl_secs)
    }

    pub fn offer_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.offer_sweep_secs)
    }

    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_secs(self.disconnect_grace_secs)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_secs)
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::{Config, DispatchMode};

    #[test]
    fn defaults_use_immediate_dispatch() {
        let config = Config::default();
        assert_eq!(config.dispatch_mode, DispatchMode::Immediate);
        assert_eq!(config.default_radius_km, 10.0);
        assert_eq!(config.offer_expiry_secs, 30);
        assert_eq!(config.disconnect_grace_secs, 30);
    }

    #[test]
    fn dispatch_mode_parses_case_insensitively() {
        assert_eq!("offer".parse::<DispatchMode>(), Ok(DispatchMode::Offer));
        assert_eq!(
            "IMMEDIATE".parse::<DispatchMode>(),
            Ok(DispatchMode::Immediate)
        );
        assert!("auction".parse::<DispatchMode>().is_err());
    }
}
