use crate::policy::CancellationPolicy;
use crate::BookingError;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Booking status in the lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Quote,
    Hold,
    PaymentPending,
    Confirmed,
    CancelledByGuest,
    CancelledByProvider,
    ExpiredHold,
}

impl BookingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Quote => "QUOTE",
            BookingStatus::Hold => "HOLD",
            BookingStatus::PaymentPending => "PAYMENT_PENDING",
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::CancelledByGuest => "CANCELLED_BY_GUEST",
            BookingStatus::CancelledByProvider => "CANCELLED_BY_PROVIDER",
            BookingStatus::ExpiredHold => "EXPIRED_HOLD",
        }
    }

    /// Single-step edges of the lifecycle graph. Nothing skips a state.
    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Quote, Hold)
                | (Hold, PaymentPending)
                | (Hold, ExpiredHold)
                | (PaymentPending, Confirmed)
                | (Confirmed, CancelledByGuest)
                | (Confirmed, CancelledByProvider)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BookingStatus::CancelledByGuest
                | BookingStatus::CancelledByProvider
                | BookingStatus::ExpiredHold
        )
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUOTE" => Ok(BookingStatus::Quote),
            "HOLD" => Ok(BookingStatus::Hold),
            "PAYMENT_PENDING" => Ok(BookingStatus::PaymentPending),
            "CONFIRMED" => Ok(BookingStatus::Confirmed),
            "CANCELLED_BY_GUEST" => Ok(BookingStatus::CancelledByGuest),
            "CANCELLED_BY_PROVIDER" => Ok(BookingStatus::CancelledByProvider),
            "EXPIRED_HOLD" => Ok(BookingStatus::ExpiredHold),
            other => Err(format!("unknown booking status: {other}")),
        }
    }
}

/// Hotel stay: one inventory unit per night in `[check_in, check_out)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotelStay {
    pub package_id: Uuid,
    /// Listing whose per-night rows carry the room inventory.
    pub listing_id: Uuid,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub rooms: u32,
}

impl HotelStay {
    pub fn nights(&self) -> Result<Vec<NaiveDate>, BookingError> {
        if self.check_out <= self.check_in {
            return Err(BookingError::Validation(
                "check-out must be after check-in".to_string(),
            ));
        }
        let mut nights = Vec::new();
        let mut night = self.check_in;
        while night < self.check_out {
            nights.push(night);
            night = night
                .succ_opt()
                .ok_or_else(|| BookingError::Validation("stay runs past the calendar".into()))?;
        }
        Ok(nights)
    }
}

/// Tour departure: a single inventory unit holding seats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TourSeats {
    pub package_id: Uuid,
    pub departure_date: NaiveDate,
    pub seats: u32,
}

/// The priced item a booking refers to. Exactly one kind per booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BookedItem {
    Hotel(HotelStay),
    Tour(TourSeats),
}

impl BookedItem {
    pub fn package_id(&self) -> Uuid {
        match self {
            BookedItem::Hotel(stay) => stay.package_id,
            BookedItem::Tour(tour) => tour.package_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            BookedItem::Hotel(_) => "HOTEL_PACKAGE",
            BookedItem::Tour(_) => "TOUR_PACKAGE",
        }
    }

    /// Date the service starts; refund windows count down to it.
    pub fn service_date(&self) -> NaiveDate {
        match self {
            BookedItem::Hotel(stay) => stay.check_in,
            BookedItem::Tour(tour) => tour.departure_date,
        }
    }

    pub fn service_start(&self) -> DateTime<Utc> {
        Utc.from_utc_datetime(&self.service_date().and_time(NaiveTime::MIN))
    }

    /// Units consumed per inventory row: rooms for hotels, seats for tours.
    pub fn quantity_per_unit(&self) -> u32 {
        match self {
            BookedItem::Hotel(stay) => stay.rooms,
            BookedItem::Tour(tour) => tour.seats,
        }
    }

    /// Every inventory row the booking claims.
    pub fn inventory_keys(&self) -> Result<Vec<InventoryKey>, BookingError> {
        let keys = match self {
            BookedItem::Hotel(stay) => stay
                .nights()?
                .into_iter()
                .map(|date| InventoryKey::Night {
                    listing_id: stay.listing_id,
                    date,
                })
                .collect(),
            BookedItem::Tour(tour) => vec![InventoryKey::Departure {
                package_id: tour.package_id,
                date: tour.departure_date,
            }],
        };
        Ok(keys)
    }
}

/// Identity of a single inventory row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InventoryKey {
    Night { listing_id: Uuid, date: NaiveDate },
    Departure { package_id: Uuid, date: NaiveDate },
}

impl fmt::Display for InventoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InventoryKey::Night { listing_id, date } => write!(f, "night:{}:{}", listing_id, date),
            InventoryKey::Departure { package_id, date } => {
                write!(f, "departure:{}:{}", package_id, date)
            }
        }
    }
}

impl FromStr for InventoryKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let (kind, id, date) = match (parts.next(), parts.next(), parts.next()) {
            (Some(kind), Some(id), Some(date)) => (kind, id, date),
            _ => return Err(format!("malformed inventory key: {s}")),
        };
        let id = Uuid::parse_str(id).map_err(|e| format!("bad id in {s}: {e}"))?;
        let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map_err(|e| format!("bad date in {s}: {e}"))?;
        match kind {
            "night" => Ok(InventoryKey::Night { listing_id: id, date }),
            "departure" => Ok(InventoryKey::Departure { package_id: id, date }),
            other => Err(format!("unknown inventory kind: {other}")),
        }
    }
}

/// One sellable row of finite capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryUnit {
    pub key: InventoryKey,
    pub capacity: u32,
    pub available_units: u32,
    pub locked_until: Option<DateTime<Utc>>,
}

impl InventoryUnit {
    pub fn provision(key: InventoryKey, capacity: u32) -> Self {
        Self {
            key,
            capacity,
            available_units: capacity,
            locked_until: None,
        }
    }
}

/// The single record of a customer's reservation, from quote to terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub guest_id: Uuid,
    pub provider_id: Uuid,
    pub item: BookedItem,
    pub guests: u32,
    pub selections: Vec<String>,
    pub status: BookingStatus,
    /// Pricing output captured at quote time. Never recomputed.
    pub price_snapshot: serde_json::Value,
    pub total_price: Decimal,
    pub currency: String,
    pub cancellation_policy: CancellationPolicy,
    pub idempotency_key: String,
    /// Quantity stamped on every unit at hold time; release restores exactly this.
    pub held_quantity: Option<u32>,
    pub quoted_at: DateTime<Utc>,
    pub held_at: Option<DateTime<Utc>>,
    pub hold_expires_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn quote_expires_at(&self, quote_ttl: Duration) -> DateTime<Utc> {
        self.quoted_at + quote_ttl
    }

    pub fn is_quote_expired(&self, now: DateTime<Utc>, quote_ttl: Duration) -> bool {
        now - self.quoted_at >= quote_ttl
    }

    pub fn is_hold_expired(&self, now: DateTime<Utc>) -> bool {
        self.hold_expires_at.map_or(false, |expires| expires <= now)
    }

    pub fn ensure_status(&self, expected: BookingStatus) -> Result<(), BookingError> {
        if self.status != expected {
            return Err(BookingError::StateConflict {
                booking_id: self.id,
                expected,
                actual: self.status,
            });
        }
        Ok(())
    }

    /// Write the effects of a committed transition onto this record.
    pub fn apply(&mut self, transition: &Transition) {
        match transition.to {
            BookingStatus::Hold => {
                self.held_at = Some(transition.at);
                if let Some(stamp) = &transition.hold {
                    self.hold_expires_at = Some(stamp.expires_at);
                    self.held_quantity = Some(stamp.quantity);
                }
            }
            BookingStatus::Confirmed => self.confirmed_at = Some(transition.at),
            BookingStatus::CancelledByGuest | BookingStatus::CancelledByProvider => {
                self.cancelled_at = Some(transition.at)
            }
            BookingStatus::Quote | BookingStatus::PaymentPending | BookingStatus::ExpiredHold => {}
        }
        self.status = transition.to;
        self.updated_at = transition.at;
    }
}

/// Lock stamp mirrored onto the booking when it enters HOLD.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HoldStamp {
    pub expires_at: DateTime<Utc>,
    pub quantity: u32,
}

/// A guarded status change: applied only if the row is still in `from`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub booking_id: Uuid,
    pub from: BookingStatus,
    pub to: BookingStatus,
    pub at: DateTime<Utc>,
    pub hold: Option<HoldStamp>,
}

impl Transition {
    pub fn new(
        booking_id: Uuid,
        from: BookingStatus,
        to: BookingStatus,
        at: DateTime<Utc>,
    ) -> Result<Self, BookingError> {
        if !from.can_transition_to(to) {
            return Err(BookingError::Validation(format!(
                "illegal transition {} -> {}",
                from, to
            )));
        }
        if to == BookingStatus::Hold {
            return Err(BookingError::Validation(
                "entering HOLD requires a lock stamp".to_string(),
            ));
        }
        Ok(Self {
            booking_id,
            from,
            to,
            at,
            hold: None,
        })
    }

    /// QUOTE -> HOLD, stamping the same expiry that was written onto the units.
    pub fn place_hold(
        booking_id: Uuid,
        at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        quantity: u32,
    ) -> Self {
        Self {
            booking_id,
            from: BookingStatus::Quote,
            to: BookingStatus::Hold,
            at,
            hold: Some(HoldStamp {
                expires_at,
                quantity,
            }),
        }
    }
}
