use chrono::Duration;
use rust_decimal::Decimal;

/// Business rules injected into the engine at construction.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub hold_ttl: Duration,
    pub quote_ttl: Duration,
    /// Share of every confirmed total kept as platform revenue.
    pub commission_rate: Decimal,
    /// Fraction refunded inside a tier's partial window.
    pub partial_refund_ratio: Decimal,
    pub currency: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            hold_ttl: Duration::minutes(10),
            quote_ttl: Duration::hours(24),
            commission_rate: Decimal::new(15, 2),
            partial_refund_ratio: Decimal::new(5, 1),
            currency: "USD".to_string(),
        }
    }
}
