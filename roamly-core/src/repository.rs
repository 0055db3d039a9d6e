use crate::booking::{Booking, InventoryKey, InventoryUnit, Transition};
use crate::ledger::{Account, LedgerEntry, LedgerQuery};
use crate::payment::PaymentRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("storage backend failure: {0}")]
    Backend(String),

    #[error("write conflict: {0}")]
    Conflict(String),

    #[error("stored data is corrupt: {0}")]
    Corrupt(String),
}

/// Outcome of inserting a quote under its idempotency key.
#[derive(Debug, Clone)]
pub enum QuoteInsert {
    Created(Booking),
    /// A booking already owned the key; it is returned untouched.
    Existing(Booking),
}

impl QuoteInsert {
    pub fn into_booking(self) -> Booking {
        match self {
            QuoteInsert::Created(booking) | QuoteInsert::Existing(booking) => booking,
        }
    }
}

/// Durable home of bookings, inventory rows, payments and the journal.
///
/// Reads go straight to the backend. Anything that mutates more than one row
/// goes through a [`StoreTransaction`].
#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError>;

    async fn insert_quote(&self, booking: Booking) -> Result<QuoteInsert, StoreError>;

    async fn get_booking(&self, id: Uuid) -> Result<Option<Booking>, StoreError>;

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Booking>, StoreError>;

    /// HOLD bookings whose expiry is strictly before `now`, oldest first.
    async fn list_expired_holds(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Booking>, StoreError>;

    async fn get_payment(&self, booking_id: Uuid) -> Result<Option<PaymentRecord>, StoreError>;

    async fn get_units(&self, keys: &[InventoryKey]) -> Result<Vec<InventoryUnit>, StoreError>;

    /// Matching entries in posting order.
    async fn ledger_entries(&self, query: &LedgerQuery) -> Result<Vec<LedgerEntry>, StoreError>;

    /// Credits minus debits across every entry touching `account`.
    async fn account_balance(&self, account: &Account) -> Result<Decimal, StoreError>;
}

/// One atomic unit of work. Dropping it without `commit` discards every write.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Decrement and stamp one unit if it still has `quantity` available.
    /// Returns false when the conditional update matched nothing.
    async fn reserve_unit(
        &mut self,
        key: &InventoryKey,
        quantity: u32,
        lock_until: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Restore `quantity` and clear the stamp, only if the unit is still
    /// stamped with `lock_until`.
    async fn release_unit(
        &mut self,
        key: &InventoryKey,
        quantity: u32,
        lock_until: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Apply a guarded status change. `None` means the booking was not in
    /// `transition.from` (or does not exist).
    async fn transition(&mut self, transition: &Transition) -> Result<Option<Booking>, StoreError>;

    async fn insert_payment(&mut self, record: &PaymentRecord) -> Result<(), StoreError>;

    async fn update_payment(&mut self, record: &PaymentRecord) -> Result<(), StoreError>;

    /// Append journal lines, returning them with their assigned sequence.
    async fn append_entries(
        &mut self,
        entries: Vec<LedgerEntry>,
    ) -> Result<Vec<LedgerEntry>, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
