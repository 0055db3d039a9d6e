pub mod booking;
pub mod ledger;
pub mod payment;
pub mod policy;
pub mod pricing;
pub mod repository;
pub mod settings;

pub use booking::{
    BookedItem, Booking, BookingStatus, HoldStamp, HotelStay, InventoryKey, InventoryUnit, TourSeats,
    Transition,
};
pub use ledger::{Account, EntryType, LedgerEntry, LedgerError, LedgerQuery};
pub use payment::{GatewayError, PaymentGateway, PaymentRecord, PaymentRef, PaymentStatus};
pub use policy::{CancellationPolicy, PolicyTier};
pub use pricing::{
    ItemSelection, ListingDirectory, ListingTerms, PriceBreakdown, PricingOracle, QuoteRequest,
    UpstreamError,
};
pub use repository::{BookingStore, QuoteInsert, StoreError, StoreTransaction};
pub use settings::EngineSettings;

use uuid::Uuid;

/// Failure taxonomy for every booking lifecycle operation.
#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("Booking not found: {0}")]
    NotFound(Uuid),

    #[error("Booking {booking_id} is {actual}, expected {expected}")]
    StateConflict {
        booking_id: Uuid,
        expected: BookingStatus,
        actual: BookingStatus,
    },

    #[error("Insufficient inventory for {unit}: requested {requested}")]
    InsufficientInventory { unit: String, requested: u32 },

    #[error("Quote {0} has expired")]
    ExpiredQuote(Uuid),

    #[error("Hold on booking {0} has expired")]
    ExpiredHold(Uuid),

    #[error("Payment gateway failure: {0}")]
    PaymentGateway(#[from] GatewayError),

    #[error("Requester {requester} may not act on booking {booking_id}")]
    OwnershipViolation { booking_id: Uuid, requester: Uuid },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Ledger rejected posting: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Upstream collaborator failed: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl BookingError {
    /// Whether repeating the same call can succeed without caller changes.
    pub fn is_retryable(&self) -> bool {
        match self {
            BookingError::Store(_) => true,
            BookingError::PaymentGateway(err) => err.is_transient(),
            BookingError::Upstream(err) => err.is_transient(),
            _ => false,
        }
    }
}

pub type BookingResult<T> = Result<T, BookingError>;
