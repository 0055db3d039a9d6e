use async_trait::async_trait;
use chrono::{DateTime, Utc};
use roamly_core::{Booking, GatewayError, PaymentGateway, PaymentRecord, PaymentRef, PaymentStatus};
use roamly_shared::Masked;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Wraps the gateway and keeps the local payment record in step with it.
pub struct PaymentOrchestrator {
    gateway: Arc<dyn PaymentGateway>,
}

impl PaymentOrchestrator {
    pub fn new(gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { gateway }
    }

    /// Pre-authorize the booking total, keyed on the booking's idempotency key
    /// so a retried call cannot double-authorize.
    pub async fn authorize(
        &self,
        booking: &Booking,
        method_ref: Masked<String>,
        at: DateTime<Utc>,
    ) -> Result<PaymentRecord, GatewayError> {
        let payment_ref = self
            .gateway
            .pre_authorize(
                booking.total_price,
                &booking.currency,
                &method_ref,
                &booking.idempotency_key,
            )
            .await?;
        info!(
            booking_id = %booking.id,
            payment_ref = %payment_ref,
            method = %method_ref,
            amount = %booking.total_price,
            "Payment pre-authorized"
        );
        Ok(PaymentRecord::pre_authorized(
            booking.id,
            payment_ref,
            method_ref,
            booking.total_price,
            &booking.currency,
            at,
        ))
    }

    /// Capture a pre-authorization. A record already marked captured is left
    /// as is and the gateway is not called again.
    pub async fn capture(
        &self,
        record: &mut PaymentRecord,
        at: DateTime<Utc>,
    ) -> Result<(), GatewayError> {
        match record.status {
            PaymentStatus::PreAuthorized => {
                self.gateway.capture(&record.gateway_ref).await?;
                record.mark_captured(at);
                info!(booking_id = %record.booking_id, payment_ref = %record.gateway_ref, "Payment captured");
                Ok(())
            }
            PaymentStatus::Captured => {
                debug!(booking_id = %record.booking_id, "Payment already captured, skipping gateway");
                Ok(())
            }
            other => Err(GatewayError::Rejected(format!(
                "cannot capture a payment in status {other}"
            ))),
        }
    }

    /// Refund `amount` against a captured payment. Zero is a no-op.
    pub async fn refund(
        &self,
        record: &mut PaymentRecord,
        amount: Decimal,
        at: DateTime<Utc>,
    ) -> Result<(), GatewayError> {
        if amount.is_zero() {
            return Ok(());
        }
        if !matches!(
            record.status,
            PaymentStatus::Captured | PaymentStatus::PartiallyRefunded
        ) {
            return Err(GatewayError::Rejected(format!(
                "cannot refund a payment in status {}",
                record.status
            )));
        }
        if amount > record.refundable() {
            return Err(GatewayError::Rejected(format!(
                "refund {} exceeds refundable {}",
                amount,
                record.refundable()
            )));
        }
        self.gateway.refund(&record.gateway_ref, amount).await?;
        record.record_refund(amount, at);
        info!(
            booking_id = %record.booking_id,
            payment_ref = %record.gateway_ref,
            amount = %amount,
            status = %record.status,
            "Payment refunded"
        );
        Ok(())
    }
}

/// Method reference the mock always declines.
pub const DECLINED_METHOD: &str = "pm_card_declined";

#[derive(Debug, Default)]
struct MockLedger {
    authorizations: HashMap<String, PaymentRef>,
    captures: Vec<PaymentRef>,
    refunds: Vec<(PaymentRef, Decimal)>,
}

/// In-process gateway for tests and local runs.
#[derive(Debug, Default)]
pub struct MockPaymentGateway {
    state: Mutex<MockLedger>,
    fail_captures: AtomicBool,
    fail_refunds: AtomicBool,
}

impl MockPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage on subsequent captures.
    pub fn set_capture_outage(&self, down: bool) {
        self.fail_captures.store(down, Ordering::SeqCst);
    }

    pub fn set_refund_outage(&self, down: bool) {
        self.fail_refunds.store(down, Ordering::SeqCst);
    }

    pub fn authorization_count(&self) -> usize {
        self.state().authorizations.len()
    }

    pub fn captures(&self) -> Vec<PaymentRef> {
        self.state().captures.clone()
    }

    pub fn refunds(&self) -> Vec<(PaymentRef, Decimal)> {
        self.state().refunds.clone()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockLedger> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn pre_authorize(
        &self,
        _amount: Decimal,
        _currency: &str,
        method_ref: &Masked<String>,
        idempotency_key: &str,
    ) -> Result<PaymentRef, GatewayError> {
        if method_ref.expose() == DECLINED_METHOD {
            return Err(GatewayError::Declined("card declined".into()));
        }
        let mut state = self.state();
        let next = state.authorizations.len() + 1;
        let payment_ref = state
            .authorizations
            .entry(idempotency_key.to_string())
            .or_insert_with(|| PaymentRef(format!("mock_pi_{next}")))
            .clone();
        Ok(payment_ref)
    }

    async fn capture(&self, payment_ref: &PaymentRef) -> Result<(), GatewayError> {
        if self.fail_captures.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("simulated capture outage".into()));
        }
        self.state().captures.push(payment_ref.clone());
        Ok(())
    }

    async fn refund(&self, payment_ref: &PaymentRef, amount: Decimal) -> Result<(), GatewayError> {
        if self.fail_refunds.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("simulated refund outage".into()));
        }
        self.state().refunds.push((payment_ref.clone(), amount));
        Ok(())
    }
}
