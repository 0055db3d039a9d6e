use chrono::Duration;
use roamly_core::EngineSettings;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::str::FromStr;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub business_rules: BusinessRules,
    pub sweeper: SweeperConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct BusinessRules {
    pub hold_ttl_seconds: u64,
    pub quote_ttl_hours: u64,
    pub commission_rate: f64,
    pub partial_refund_ratio: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_currency() -> String {
    "USD".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SweeperConfig {
    pub interval_seconds: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_enabled() -> bool {
    true
}

fn default_batch_size() -> usize {
    500
}

impl SweeperConfig {
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_seconds.max(1))
    }
}

impl BusinessRules {
    /// Typed settings for the engine. Rates go through their decimal text
    /// form so `0.15` stays exactly `0.15`.
    pub fn engine_settings(&self) -> Result<EngineSettings, config::ConfigError> {
        let commission_rate = rate("commission_rate", self.commission_rate)?;
        let partial_refund_ratio = rate("partial_refund_ratio", self.partial_refund_ratio)?;

        if self.hold_ttl_seconds == 0 {
            return Err(config::ConfigError::Message(
                "business_rules.hold_ttl_seconds must be positive".into(),
            ));
        }
        let hold_ttl = i64::try_from(self.hold_ttl_seconds)
            .map(Duration::seconds)
            .map_err(|_| config::ConfigError::Message("hold_ttl_seconds out of range".into()))?;
        let quote_ttl = i64::try_from(self.quote_ttl_hours)
            .map(Duration::hours)
            .map_err(|_| config::ConfigError::Message("quote_ttl_hours out of range".into()))?;

        Ok(EngineSettings {
            hold_ttl,
            quote_ttl,
            commission_rate,
            partial_refund_ratio,
            currency: self.currency.clone(),
        })
    }
}

fn rate(key: &str, value: f64) -> Result<Decimal, config::ConfigError> {
    let parsed = Decimal::from_str(&value.to_string())
        .map_err(|e| config::ConfigError::Message(format!("business_rules.{key}: {e}")))?;
    if parsed < Decimal::ZERO || parsed > Decimal::ONE {
        return Err(config::ConfigError::Message(format!(
            "business_rules.{key} must be within [0, 1], got {value}"
        )));
    }
    Ok(parsed)
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides, optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Developer overrides, never checked in
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. `ROAMLY__SWEEPER__INTERVAL_SECONDS=5`
            .add_source(config::Environment::with_prefix("ROAMLY").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
