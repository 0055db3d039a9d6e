use chrono::{DateTime, Utc};
use roamly_core::{BookingError, BookingStore, InventoryKey, InventoryUnit, StoreError, StoreTransaction};
use std::sync::Arc;
use tracing::{debug, warn};

/// Atomic claims on finite per-date inventory.
///
/// Every mutation runs inside the caller's store transaction, so a reserve and
/// the booking status flip that depends on it commit or vanish together.
pub struct InventoryLedger {
    store: Arc<dyn BookingStore>,
}

impl InventoryLedger {
    pub fn new(store: Arc<dyn BookingStore>) -> Self {
        Self { store }
    }

    /// Decrement every unit by `quantity` and stamp it with `lock_until`.
    ///
    /// On error some units may already be decremented inside `tx`; the caller
    /// must drop the transaction rather than commit it.
    pub async fn reserve(
        &self,
        tx: &mut dyn StoreTransaction,
        keys: &[InventoryKey],
        quantity: u32,
        lock_until: DateTime<Utc>,
    ) -> Result<(), InventoryError> {
        if keys.is_empty() {
            return Err(InventoryError::Invalid("no inventory units to reserve".into()));
        }
        if quantity == 0 {
            return Err(InventoryError::Invalid("quantity per unit must be positive".into()));
        }

        for key in keys {
            if !tx.reserve_unit(key, quantity, lock_until).await? {
                debug!(unit = %key, quantity, "Conditional reserve matched no row");
                return Err(InventoryError::InsufficientInventory {
                    unit: key.to_string(),
                    requested: quantity,
                });
            }
        }
        Ok(())
    }

    /// Give back units still stamped with `lock_until`. Units whose stamp has
    /// since changed are left alone. Returns how many were restored.
    pub async fn release(
        &self,
        tx: &mut dyn StoreTransaction,
        keys: &[InventoryKey],
        quantity: u32,
        lock_until: DateTime<Utc>,
    ) -> Result<usize, InventoryError> {
        let mut restored = 0;
        for key in keys {
            if tx.release_unit(key, quantity, lock_until).await? {
                restored += 1;
            } else {
                warn!(unit = %key, lock_until = %lock_until, "Unit no longer carries this hold's stamp, skipping");
            }
        }
        Ok(restored)
    }

    /// Current rows for `keys`. Keys with no provisioned row are omitted.
    pub async fn availability(&self, keys: &[InventoryKey]) -> Result<Vec<InventoryUnit>, InventoryError> {
        Ok(self.store.get_units(keys).await?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error("Insufficient inventory for {unit}: requested {requested}")]
    InsufficientInventory { unit: String, requested: u32 },

    #[error("Invalid inventory request: {0}")]
    Invalid(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<InventoryError> for BookingError {
    fn from(err: InventoryError) -> Self {
        match err {
            InventoryError::InsufficientInventory { unit, requested } => {
                BookingError::InsufficientInventory { unit, requested }
            }
            InventoryError::Invalid(message) => BookingError::Validation(message),
            InventoryError::Store(err) => BookingError::Store(err),
        }
    }
}
