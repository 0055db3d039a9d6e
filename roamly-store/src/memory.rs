use async_trait::async_trait;
use chrono::{DateTime, Utc};
use roamly_core::{
    Account, Booking, BookingStatus, BookingStore, InventoryKey, InventoryUnit, LedgerEntry,
    LedgerQuery, PaymentRecord, QuoteInsert, StoreError, StoreTransaction, Transition,
};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct State {
    bookings: HashMap<Uuid, Booking>,
    idempotency: HashMap<String, Uuid>,
    units: BTreeMap<InventoryKey, InventoryUnit>,
    payments: HashMap<Uuid, PaymentRecord>,
    ledger: Vec<LedgerEntry>,
}

/// Process-local store for tests and local runs.
///
/// Transactions hold the state lock for their whole lifetime, so they are
/// fully serialized. Writes land on a working copy that replaces the shared
/// state only on commit.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBookingStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryBookingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog-side provisioning of a fresh unit at full capacity.
    pub async fn provision_unit(&self, key: InventoryKey, capacity: u32) {
        let mut state = self.state.lock().await;
        state.units.insert(key, InventoryUnit::provision(key, capacity));
    }

    pub async fn unit(&self, key: &InventoryKey) -> Option<InventoryUnit> {
        self.state.lock().await.units.get(key).cloned()
    }

    pub async fn ledger_len(&self) -> usize {
        self.state.lock().await.ledger.len()
    }
}

#[async_trait]
impl BookingStore for InMemoryBookingStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryTransaction { guard, working }))
    }

    async fn insert_quote(&self, booking: Booking) -> Result<QuoteInsert, StoreError> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state
            .idempotency
            .get(&booking.idempotency_key)
            .and_then(|id| state.bookings.get(id))
        {
            return Ok(QuoteInsert::Existing(existing.clone()));
        }
        state
            .idempotency
            .insert(booking.idempotency_key.clone(), booking.id);
        state.bookings.insert(booking.id, booking.clone());
        Ok(QuoteInsert::Created(booking))
    }

    async fn get_booking(&self, id: Uuid) -> Result<Option<Booking>, StoreError> {
        Ok(self.state.lock().await.bookings.get(&id).cloned())
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Booking>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .idempotency
            .get(key)
            .and_then(|id| state.bookings.get(id))
            .cloned())
    }

    async fn list_expired_holds(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Booking>, StoreError> {
        let state = self.state.lock().await;
        let mut expired: Vec<Booking> = state
            .bookings
            .values()
            .filter(|b| b.status == BookingStatus::Hold)
            .filter(|b| b.hold_expires_at.is_some_and(|at| at < now))
            .cloned()
            .collect();
        expired.sort_by_key(|b| b.hold_expires_at);
        expired.truncate(limit);
        Ok(expired)
    }

    async fn get_payment(&self, booking_id: Uuid) -> Result<Option<PaymentRecord>, StoreError> {
        Ok(self.state.lock().await.payments.get(&booking_id).cloned())
    }

    async fn get_units(&self, keys: &[InventoryKey]) -> Result<Vec<InventoryUnit>, StoreError> {
        let state = self.state.lock().await;
        Ok(keys
            .iter()
            .filter_map(|key| state.units.get(key).cloned())
            .collect())
    }

    async fn ledger_entries(&self, query: &LedgerQuery) -> Result<Vec<LedgerEntry>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .ledger
            .iter()
            .filter(|entry| query.matches(entry))
            .cloned()
            .collect())
    }

    async fn account_balance(&self, account: &Account) -> Result<Decimal, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .ledger
            .iter()
            .map(|entry| entry.signed_amount_for(account))
            .sum())
    }
}

struct InMemoryTransaction {
    guard: OwnedMutexGuard<State>,
    working: State,
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn reserve_unit(
        &mut self,
        key: &InventoryKey,
        quantity: u32,
        lock_until: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        match self.working.units.get_mut(key) {
            Some(unit) if unit.available_units >= quantity => {
                unit.available_units -= quantity;
                unit.locked_until = Some(lock_until);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_unit(
        &mut self,
        key: &InventoryKey,
        quantity: u32,
        lock_until: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        match self.working.units.get_mut(key) {
            Some(unit) if unit.locked_until == Some(lock_until) => {
                unit.available_units = unit.available_units.saturating_add(quantity).min(unit.capacity);
                unit.locked_until = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn transition(&mut self, transition: &Transition) -> Result<Option<Booking>, StoreError> {
        match self.working.bookings.get_mut(&transition.booking_id) {
            Some(booking) if booking.status == transition.from => {
                booking.apply(transition);
                Ok(Some(booking.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn insert_payment(&mut self, record: &PaymentRecord) -> Result<(), StoreError> {
        if self.working.payments.contains_key(&record.booking_id) {
            return Err(StoreError::Conflict(format!(
                "payment already recorded for booking {}",
                record.booking_id
            )));
        }
        self.working.payments.insert(record.booking_id, record.clone());
        Ok(())
    }

    async fn update_payment(&mut self, record: &PaymentRecord) -> Result<(), StoreError> {
        match self.working.payments.get_mut(&record.booking_id) {
            Some(existing) if existing.id == record.id => {
                *existing = record.clone();
                Ok(())
            }
            _ => Err(StoreError::Conflict(format!(
                "no payment {} for booking {}",
                record.id, record.booking_id
            ))),
        }
    }

    async fn append_entries(
        &mut self,
        entries: Vec<LedgerEntry>,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let mut appended = Vec::with_capacity(entries.len());
        for mut entry in entries {
            entry.sequence = self.working.ledger.len() as i64 + 1;
            self.working.ledger.push(entry.clone());
            appended.push(entry);
        }
        Ok(appended)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let InMemoryTransaction { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}
