use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle notifications emitted after a transition commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BookingEvent {
    QuoteCreated {
        booking_id: Uuid,
        guest_id: Uuid,
        total_price: Decimal,
        currency: String,
        quoted_at: DateTime<Utc>,
    },
    HoldPlaced {
        booking_id: Uuid,
        units: usize,
        quantity_per_unit: u32,
        hold_expires_at: DateTime<Utc>,
    },
    PaymentAuthorized {
        booking_id: Uuid,
        gateway_ref: String,
        amount: Decimal,
    },
    BookingConfirmed {
        booking_id: Uuid,
        provider_id: Uuid,
        total_price: Decimal,
        currency: String,
        confirmed_at: DateTime<Utc>,
    },
    BookingCancelled {
        booking_id: Uuid,
        by_provider: bool,
        refund_amount: Decimal,
        cancelled_at: DateTime<Utc>,
    },
    HoldExpired {
        booking_id: Uuid,
        units_restored: usize,
        expired_at: DateTime<Utc>,
    },
}

impl BookingEvent {
    pub fn booking_id(&self) -> Uuid {
        match self {
            BookingEvent::QuoteCreated { booking_id, .. }
            | BookingEvent::HoldPlaced { booking_id, .. }
            | BookingEvent::PaymentAuthorized { booking_id, .. }
            | BookingEvent::BookingConfirmed { booking_id, .. }
            | BookingEvent::BookingCancelled { booking_id, .. }
            | BookingEvent::HoldExpired { booking_id, .. } => *booking_id,
        }
    }

    /// Topic name used when the event is forwarded to a broker.
    pub fn topic(&self) -> &'static str {
        match self {
            BookingEvent::QuoteCreated { .. } => "booking.quoted",
            BookingEvent::HoldPlaced { .. } => "booking.held",
            BookingEvent::PaymentAuthorized { .. } => "booking.payment_authorized",
            BookingEvent::BookingConfirmed { .. } => "booking.confirmed",
            BookingEvent::BookingCancelled { .. } => "booking.cancelled",
            BookingEvent::HoldExpired { .. } => "booking.hold_expired",
        }
    }
}
