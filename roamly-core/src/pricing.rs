use crate::booking::{BookedItem, HotelStay, TourSeats};
use crate::policy::CancellationPolicy;
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What the guest asked to price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "package_type", rename_all = "snake_case")]
pub enum ItemSelection {
    Hotel {
        package_id: Uuid,
        check_in: NaiveDate,
        check_out: NaiveDate,
        rooms: u32,
    },
    Tour {
        package_id: Uuid,
        departure_date: NaiveDate,
    },
}

impl ItemSelection {
    pub fn package_id(&self) -> Uuid {
        match self {
            ItemSelection::Hotel { package_id, .. } | ItemSelection::Tour { package_id, .. } => {
                *package_id
            }
        }
    }

    /// Pin the selection to concrete inventory using the catalog's terms.
    /// Tour seats are the party size; it is fixed here and never re-derived.
    pub fn into_booked_item(self, terms: &ListingTerms, guests: u32) -> BookedItem {
        match self {
            ItemSelection::Hotel {
                package_id,
                check_in,
                check_out,
                rooms,
            } => BookedItem::Hotel(HotelStay {
                package_id,
                listing_id: terms.inventory_scope,
                check_in,
                check_out,
                rooms,
            }),
            ItemSelection::Tour {
                package_id,
                departure_date,
            } => BookedItem::Tour(TourSeats {
                package_id,
                departure_date,
                seats: guests,
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteRequest {
    pub item: ItemSelection,
    pub guests: u32,
    #[serde(default)]
    pub selections: Vec<String>,
    /// Caller-supplied replay key. One is generated when absent.
    pub idempotency_key: Option<String>,
}

/// Priced breakdown from the pricing service. Only `total` is interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBreakdown {
    pub total: Decimal,
    pub currency: Option<String>,
    #[serde(default)]
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum UpstreamError {
    #[error("{0} not found in catalog")]
    NotFound(String),

    #[error("{service} unavailable: {message}")]
    Unavailable {
        service: &'static str,
        message: String,
    },
}

impl UpstreamError {
    pub fn is_transient(&self) -> bool {
        matches!(self, UpstreamError::Unavailable { .. })
    }
}

/// Deterministic price computation owned by the pricing service.
#[async_trait]
pub trait PricingOracle: Send + Sync {
    async fn calculate(
        &self,
        item: &ItemSelection,
        guests: u32,
        selections: &[String],
    ) -> Result<PriceBreakdown, UpstreamError>;
}

/// Catalog facts pinned onto a booking at quote time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingTerms {
    pub provider_id: Uuid,
    /// For hotels, the listing whose nightly rows hold room inventory.
    /// For tours, the package itself.
    pub inventory_scope: Uuid,
    pub cancellation_policy: CancellationPolicy,
}

#[async_trait]
pub trait ListingDirectory: Send + Sync {
    async fn terms(&self, item: &ItemSelection) -> Result<ListingTerms, UpstreamError>;
}
