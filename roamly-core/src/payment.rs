use async_trait::async_trait;
use chrono::{DateTime, Utc};
use roamly_shared::Masked;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque reference the gateway hands back on pre-authorization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentRef(pub String);

impl fmt::Display for PaymentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("payment declined: {0}")]
    Declined(String),

    #[error("gateway unavailable: {0}")]
    Unavailable(String),

    #[error("gateway rejected request: {0}")]
    Rejected(String),
}

impl GatewayError {
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Unavailable(_))
    }
}

/// External payment processor. Success means the call itself succeeded;
/// nothing more is assumed about settlement.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn pre_authorize(
        &self,
        amount: Decimal,
        currency: &str,
        method_ref: &Masked<String>,
        idempotency_key: &str,
    ) -> Result<PaymentRef, GatewayError>;

    async fn capture(&self, payment_ref: &PaymentRef) -> Result<(), GatewayError>;

    async fn refund(&self, payment_ref: &PaymentRef, amount: Decimal) -> Result<(), GatewayError>;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    PreAuthorized,
    Captured,
    Refunded,
    PartiallyRefunded,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::PreAuthorized => "PRE_AUTHORIZED",
            PaymentStatus::Captured => "CAPTURED",
            PaymentStatus::Refunded => "REFUNDED",
            PaymentStatus::PartiallyRefunded => "PARTIALLY_REFUNDED",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PRE_AUTHORIZED" => Ok(PaymentStatus::PreAuthorized),
            "CAPTURED" => Ok(PaymentStatus::Captured),
            "REFUNDED" => Ok(PaymentStatus::Refunded),
            "PARTIALLY_REFUNDED" => Ok(PaymentStatus::PartiallyRefunded),
            other => Err(format!("unknown payment status: {other}")),
        }
    }
}

/// Local record of the gateway authorization backing a booking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub gateway_ref: PaymentRef,
    pub method_ref: Masked<String>,
    pub amount: Decimal,
    pub currency: String,
    pub status: PaymentStatus,
    pub refunded_amount: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentRecord {
    pub fn pre_authorized(
        booking_id: Uuid,
        gateway_ref: PaymentRef,
        method_ref: Masked<String>,
        amount: Decimal,
        currency: &str,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            booking_id,
            gateway_ref,
            method_ref,
            amount,
            currency: currency.to_string(),
            status: PaymentStatus::PreAuthorized,
            refunded_amount: Decimal::ZERO,
            created_at: at,
            updated_at: at,
        }
    }

    pub fn mark_captured(&mut self, at: DateTime<Utc>) {
        self.status = PaymentStatus::Captured;
        self.updated_at = at;
    }

    pub fn record_refund(&mut self, amount: Decimal, at: DateTime<Utc>) {
        self.refunded_amount += amount;
        self.status = if self.refunded_amount >= self.amount {
            PaymentStatus::Refunded
        } else {
            PaymentStatus::PartiallyRefunded
        };
        self.updated_at = at;
    }

    pub fn refundable(&self) -> Decimal {
        self.amount - self.refunded_amount
    }
}
