use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use tracing::info;
use validator::Validate;

use crate::services::pricing::ShippingRule;

const DEFAULT_ENV: &str = "development";
const CONFIG_DIR: &str = "config";

/// Application configuration with validation.
///
/// Loaded from an optional `config/{environment}.toml` plus `STOREFRONT_*`
/// environment variables; env vars win.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    #[serde(default = "default_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub db_min_connections: u32,
    #[serde(default = "default_connect_timeout")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_acquire_timeout")]
    pub db_acquire_timeout_secs: u64,
    #[serde(default = "default_idle_timeout")]
    pub db_idle_timeout_secs: u64,

    #[serde(default = "default_environment")]
    pub environment: String,

    /// ISO 4217 currency code for all monetary amounts.
    #[serde(default = "default_currency")]
    #[validate(length(min = 3, max = 3, message = "Currency must be 3 characters"))]
    pub currency: String,

    /// Flat tax rate applied to the cart subtotal.
    #[serde(default = "default_tax_rate")]
    #[validate(range(min = 0.0, max = 1.0, message = "Tax rate must be within [0, 1]"))]
    pub tax_rate: f64,

    /// Flat shipping charge below the free-shipping threshold.
    #[serde(default = "default_shipping_flat_rate")]
    #[validate(range(min = 0.0))]
    pub shipping_flat_rate: f64,

    /// Subtotal at or above which shipping is free.
    #[serde(default = "default_free_shipping_threshold")]
    #[validate(range(min = 0.0))]
    pub free_shipping_threshold: f64,
}

fn default_max_connections() -> u32 {
    10
}
fn default_min_connections() -> u32 {
    1
}
fn default_connect_timeout() -> u64 {
    30
}
fn default_acquire_timeout() -> u64 {
    8
}
fn default_idle_timeout() -> u64 {
    600
}
fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}
fn default_currency() -> String {
    "USD".to_string()
}
fn default_tax_rate() -> f64 {
    0.08
}
fn default_shipping_flat_rate() -> f64 {
    10.0
}
fn default_free_shipping_threshold() -> f64 {
    50.0
}

impl AppConfig {
    /// Minimal config pointing at the given database, defaults elsewhere.
    pub fn with_database_url(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            db_max_connections: default_max_connections(),
            db_min_connections: default_min_connections(),
            db_connect_timeout_secs: default_connect_timeout(),
            db_acquire_timeout_secs: default_acquire_timeout(),
            db_idle_timeout_secs: default_idle_timeout(),
            environment: default_environment(),
            currency: default_currency(),
            tax_rate: default_tax_rate(),
            shipping_flat_rate: default_shipping_flat_rate(),
            free_shipping_threshold: default_free_shipping_threshold(),
        }
    }

    pub fn tax_rate_decimal(&self) -> Decimal {
        // Rates are quoted to basis points at most; drop float noise.
        Decimal::from_f64_retain(self.tax_rate)
            .unwrap_or(Decimal::ZERO)
            .round_dp(4)
    }

    pub fn shipping_rule(&self) -> ShippingRule {
        ShippingRule {
            flat_rate: Decimal::from_f64_retain(self.shipping_flat_rate)
                .unwrap_or(Decimal::ZERO)
                .round_dp(2),
            free_threshold: Decimal::from_f64_retain(self.free_shipping_threshold)
                .unwrap_or(Decimal::ZERO)
                .round_dp(2),
        }
    }
}

/// Loads configuration for the current `RUN_ENV` (default: development).
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let run_env = env::var("RUN_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let settings = Config::builder()
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("STOREFRONT").separator("__"))
        .build()?;

    let cfg: AppConfig = settings.try_deserialize()?;
    cfg.validate()
        .map_err(|e| ConfigError::Message(e.to_string()))?;

    info!(environment = %cfg.environment, "Configuration loaded");
    Ok(cfg)
}
