use async_trait::async_trait;
use chrono::{DateTime, Utc};
use roamly_catalog::InventoryLedger;
use roamly_core::{
    Booking, BookingError, BookingResult, BookingStatus, BookingStore, StoreError, Transition,
};
use roamly_shared::models::BookingEvent;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

/// Anything that can turn an overdue hold into EXPIRED_HOLD.
#[async_trait]
pub trait HoldReleaser: Send + Sync {
    /// Returns how many inventory units were restored.
    async fn release_hold(&self, booking_id: Uuid, now: DateTime<Utc>) -> BookingResult<usize>;
}

/// The hold-release path on its own: store plus inventory, no collaborators.
pub struct HoldReclaimer {
    store: Arc<dyn BookingStore>,
    inventory: InventoryLedger,
    events: Option<broadcast::Sender<BookingEvent>>,
}

impl HoldReclaimer {
    pub fn new(store: Arc<dyn BookingStore>) -> Self {
        Self {
            inventory: InventoryLedger::new(store.clone()),
            store,
            events: None,
        }
    }

    pub fn with_events(mut self, events: broadcast::Sender<BookingEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Restore the hold's units and move the booking to EXPIRED_HOLD in one
    /// transaction. Refuses holds that have not yet expired at `now`.
    pub async fn release(&self, booking_id: Uuid, now: DateTime<Utc>) -> BookingResult<(Booking, usize)> {
        let booking = self
            .store
            .get_booking(booking_id)
            .await?
            .ok_or(BookingError::NotFound(booking_id))?;
        booking.ensure_status(BookingStatus::Hold)?;

        let lock_until = booking.hold_expires_at.ok_or_else(|| {
            StoreError::Corrupt(format!("booking {booking_id} is HOLD without an expiry"))
        })?;
        if lock_until > now {
            return Err(BookingError::Validation(format!(
                "hold on booking {booking_id} is active until {lock_until}"
            )));
        }
        let keys = booking.item.inventory_keys()?;
        let quantity = booking
            .held_quantity
            .unwrap_or_else(|| booking.item.quantity_per_unit());

        let mut tx = self.store.begin().await?;
        let restored = self
            .inventory
            .release(tx.as_mut(), &keys, quantity, lock_until)
            .await?;
        let transition = Transition::new(booking_id, BookingStatus::Hold, BookingStatus::ExpiredHold, now)?;
        let Some(expired) = tx.transition(&transition).await? else {
            drop(tx);
            return Err(current_conflict(self.store.as_ref(), booking_id, BookingStatus::Hold).await);
        };
        tx.commit().await?;

        if restored < keys.len() {
            warn!(
                booking_id = %booking_id,
                restored,
                claimed = keys.len(),
                "Some units were re-stamped by a later hold and were not restored"
            );
        }
        info!(booking_id = %booking_id, units_restored = restored, "Hold expired and inventory released");

        if let Some(events) = &self.events {
            let _ = events.send(BookingEvent::HoldExpired {
                booking_id,
                units_restored: restored,
                expired_at: now,
            });
        }
        Ok((expired, restored))
    }
}

#[async_trait]
impl HoldReleaser for HoldReclaimer {
    async fn release_hold(&self, booking_id: Uuid, now: DateTime<Utc>) -> BookingResult<usize> {
        self.release(booking_id, now).await.map(|(_, restored)| restored)
    }
}

/// Error for a guarded transition that matched nothing: re-read to report
/// what the booking actually is now.
pub(crate) async fn current_conflict(
    store: &dyn BookingStore,
    booking_id: Uuid,
    expected: BookingStatus,
) -> BookingError {
    match store.get_booking(booking_id).await {
        Ok(Some(current)) => BookingError::StateConflict {
            booking_id,
            expected,
            actual: current.status,
        },
        Ok(None) => BookingError::NotFound(booking_id),
        Err(err) => BookingError::Store(err),
    }
}
