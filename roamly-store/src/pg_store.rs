use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use roamly_core::{
    Account, BookedItem, Booking, BookingStatus, BookingStore, CancellationPolicy, EntryType,
    InventoryKey, InventoryUnit, LedgerEntry, LedgerQuery, PaymentRecord, PaymentRef,
    PaymentStatus, QuoteInsert, StoreError, StoreTransaction, Transition,
};
use roamly_shared::Masked;
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

const BOOKING_COLUMNS: &str = "id, guest_id, provider_id, item, guests, selections, status, \
     price_snapshot, total_price, currency, cancellation_policy, idempotency_key, held_quantity, \
     quoted_at, held_at, hold_expires_at, confirmed_at, cancelled_at, updated_at";

const PAYMENT_COLUMNS: &str = "id, booking_id, gateway_ref, method_ref, amount, currency, status, \
     refunded_amount, created_at, updated_at";

const LEDGER_COLUMNS: &str = "sequence, id, booking_id, entry_type, debit_account, \
     credit_account, amount, currency, description, metadata, created_at";

fn backend(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return StoreError::Conflict(db.message().to_string());
        }
    }
    StoreError::Backend(err.to_string())
}

fn corrupt(what: &str, err: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt(format!("{what}: {err}"))
}

fn to_db_count(value: u32) -> Result<i32, StoreError> {
    i32::try_from(value).map_err(|e| corrupt("count exceeds column range", e))
}

fn from_db_count(value: i32) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|e| corrupt("negative count in store", e))
}

// Row types for runtime-checked queries
#[derive(sqlx::FromRow)]
struct BookingRow {
    id: Uuid,
    guest_id: Uuid,
    provider_id: Uuid,
    item: Json<BookedItem>,
    guests: i32,
    selections: Json<Vec<String>>,
    status: String,
    price_snapshot: serde_json::Value,
    total_price: Decimal,
    currency: String,
    cancellation_policy: Json<CancellationPolicy>,
    idempotency_key: String,
    held_quantity: Option<i32>,
    quoted_at: DateTime<Utc>,
    held_at: Option<DateTime<Utc>>,
    hold_expires_at: Option<DateTime<Utc>>,
    confirmed_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = StoreError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        Ok(Booking {
            id: row.id,
            guest_id: row.guest_id,
            provider_id: row.provider_id,
            item: row.item.0,
            guests: from_db_count(row.guests)?,
            selections: row.selections.0,
            status: row
                .status
                .parse::<BookingStatus>()
                .map_err(|e| corrupt("booking status", e))?,
            price_snapshot: row.price_snapshot,
            total_price: row.total_price,
            currency: row.currency,
            cancellation_policy: row.cancellation_policy.0,
            idempotency_key: row.idempotency_key,
            held_quantity: row.held_quantity.map(from_db_count).transpose()?,
            quoted_at: row.quoted_at,
            held_at: row.held_at,
            hold_expires_at: row.hold_expires_at,
            confirmed_at: row.confirmed_at,
            cancelled_at: row.cancelled_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct UnitRow {
    unit_key: String,
    capacity: i32,
    available_units: i32,
    locked_until: Option<DateTime<Utc>>,
}

impl TryFrom<UnitRow> for InventoryUnit {
    type Error = StoreError;

    fn try_from(row: UnitRow) -> Result<Self, Self::Error> {
        Ok(InventoryUnit {
            key: row
                .unit_key
                .parse::<InventoryKey>()
                .map_err(|e| corrupt("inventory key", e))?,
            capacity: from_db_count(row.capacity)?,
            available_units: from_db_count(row.available_units)?,
            locked_until: row.locked_until,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    booking_id: Uuid,
    gateway_ref: String,
    method_ref: String,
    amount: Decimal,
    currency: String,
    status: String,
    refunded_amount: Decimal,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for PaymentRecord {
    type Error = StoreError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(PaymentRecord {
            id: row.id,
            booking_id: row.booking_id,
            gateway_ref: PaymentRef(row.gateway_ref),
            method_ref: Masked::new(row.method_ref),
            amount: row.amount,
            currency: row.currency,
            status: row
                .status
                .parse::<PaymentStatus>()
                .map_err(|e| corrupt("payment status", e))?,
            refunded_amount: row.refunded_amount,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct LedgerRow {
    sequence: i64,
    id: Uuid,
    booking_id: Uuid,
    entry_type: String,
    debit_account: String,
    credit_account: String,
    amount: Decimal,
    currency: String,
    description: String,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl TryFrom<LedgerRow> for LedgerEntry {
    type Error = StoreError;

    fn try_from(row: LedgerRow) -> Result<Self, Self::Error> {
        Ok(LedgerEntry {
            id: row.id,
            sequence: row.sequence,
            booking_id: row.booking_id,
            entry_type: row
                .entry_type
                .parse::<EntryType>()
                .map_err(|e| corrupt("ledger entry type", e))?,
            debit_account: row
                .debit_account
                .parse::<Account>()
                .map_err(|e| corrupt("debit account", e))?,
            credit_account: row
                .credit_account
                .parse::<Account>()
                .map_err(|e| corrupt("credit account", e))?,
            amount: row.amount,
            currency: row.currency,
            description: row.description,
            metadata: row.metadata,
            created_at: row.created_at,
        })
    }
}

/// Postgres-backed store. Inventory and status changes are conditional
/// updates, so concurrent writers are arbitrated by the database.
#[derive(Clone)]
pub struct PgBookingStore {
    pool: PgPool,
}

impl PgBookingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Catalog-side provisioning; re-provisioning an existing key is a no-op.
    pub async fn provision_unit(&self, key: InventoryKey, capacity: u32) -> Result<(), StoreError> {
        let (kind, scope_id, service_date): (&str, Uuid, NaiveDate) = match key {
            InventoryKey::Night { listing_id, date } => ("night", listing_id, date),
            InventoryKey::Departure { package_id, date } => ("departure", package_id, date),
        };
        let capacity = to_db_count(capacity)?;
        sqlx::query(
            "INSERT INTO inventory_units (unit_key, kind, scope_id, service_date, capacity, available_units)
             VALUES ($1, $2, $3, $4, $5, $5)
             ON CONFLICT (unit_key) DO NOTHING",
        )
        .bind(key.to_string())
        .bind(kind)
        .bind(scope_id)
        .bind(service_date)
        .bind(capacity)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }
}

#[async_trait]
impl BookingStore for PgBookingStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let tx = self.pool.begin().await.map_err(backend)?;
        Ok(Box::new(PgStoreTransaction { tx }))
    }

    async fn insert_quote(&self, booking: Booking) -> Result<QuoteInsert, StoreError> {
        let result = sqlx::query(
            "INSERT INTO bookings (id, guest_id, provider_id, item_kind, package_id, item, guests,
                 selections, status, price_snapshot, total_price, currency, cancellation_policy,
                 idempotency_key, quoted_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $15)
             ON CONFLICT (idempotency_key) DO NOTHING",
        )
        .bind(booking.id)
        .bind(booking.guest_id)
        .bind(booking.provider_id)
        .bind(booking.item.kind())
        .bind(booking.item.package_id())
        .bind(Json(&booking.item))
        .bind(to_db_count(booking.guests)?)
        .bind(Json(&booking.selections))
        .bind(booking.status.as_str())
        .bind(&booking.price_snapshot)
        .bind(booking.total_price)
        .bind(&booking.currency)
        .bind(Json(&booking.cancellation_policy))
        .bind(&booking.idempotency_key)
        .bind(booking.quoted_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 1 {
            return Ok(QuoteInsert::Created(booking));
        }
        match self.find_by_idempotency_key(&booking.idempotency_key).await? {
            Some(existing) => Ok(QuoteInsert::Existing(existing)),
            None => Err(StoreError::Conflict(format!(
                "idempotency key {} claimed but not readable",
                booking.idempotency_key
            ))),
        }
    }

    async fn get_booking(&self, id: Uuid) -> Result<Option<Booking>, StoreError> {
        let row: Option<BookingRow> =
            sqlx::query_as(&format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;
        row.map(Booking::try_from).transpose()
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Booking>, StoreError> {
        let row: Option<BookingRow> = sqlx::query_as(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE idempotency_key = $1"
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.map(Booking::try_from).transpose()
    }

    async fn list_expired_holds(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Booking>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows: Vec<BookingRow> = sqlx::query_as(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings
             WHERE status = 'HOLD' AND hold_expires_at < $1
             ORDER BY hold_expires_at
             LIMIT $2"
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.into_iter().map(Booking::try_from).collect()
    }

    async fn get_payment(&self, booking_id: Uuid) -> Result<Option<PaymentRecord>, StoreError> {
        let row: Option<PaymentRow> = sqlx::query_as(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE booking_id = $1"
        ))
        .bind(booking_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.map(PaymentRecord::try_from).transpose()
    }

    async fn get_units(&self, keys: &[InventoryKey]) -> Result<Vec<InventoryUnit>, StoreError> {
        let keys: Vec<String> = keys.iter().map(ToString::to_string).collect();
        let rows: Vec<UnitRow> = sqlx::query_as(
            "SELECT unit_key, capacity, available_units, locked_until
             FROM inventory_units
             WHERE unit_key = ANY($1)
             ORDER BY service_date, unit_key",
        )
        .bind(&keys)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.into_iter().map(InventoryUnit::try_from).collect()
    }

    async fn ledger_entries(&self, query: &LedgerQuery) -> Result<Vec<LedgerEntry>, StoreError> {
        let rows: Vec<LedgerRow> = sqlx::query_as(&format!(
            "SELECT {LEDGER_COLUMNS} FROM ledger_entries
             WHERE ($1::text IS NULL OR debit_account = $1 OR credit_account = $1)
               AND ($2::uuid IS NULL OR booking_id = $2)
               AND ($3::text IS NULL OR entry_type = $3)
               AND ($4::timestamptz IS NULL OR created_at >= $4)
               AND ($5::timestamptz IS NULL OR created_at < $5)
             ORDER BY sequence"
        ))
        .bind(query.account.map(|a| a.to_string()))
        .bind(query.booking_id)
        .bind(query.entry_type.map(|t| t.as_str()))
        .bind(query.start_time)
        .bind(query.end_time)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.into_iter().map(LedgerEntry::try_from).collect()
    }

    async fn account_balance(&self, account: &Account) -> Result<Decimal, StoreError> {
        let balance: Decimal = sqlx::query_scalar(
            "SELECT COALESCE(SUM(CASE WHEN credit_account = $1 THEN amount ELSE 0 END)
                           - SUM(CASE WHEN debit_account = $1 THEN amount ELSE 0 END), 0)
             FROM ledger_entries
             WHERE debit_account = $1 OR credit_account = $1",
        )
        .bind(account.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;
        Ok(balance)
    }
}

struct PgStoreTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PgStoreTransaction {
    async fn reserve_unit(
        &mut self,
        key: &InventoryKey,
        quantity: u32,
        lock_until: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE inventory_units
             SET available_units = available_units - $2, locked_until = $3
             WHERE unit_key = $1 AND available_units >= $2",
        )
        .bind(key.to_string())
        .bind(to_db_count(quantity)?)
        .bind(lock_until)
        .execute(&mut *self.tx)
        .await
        .map_err(backend)?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_unit(
        &mut self,
        key: &InventoryKey,
        quantity: u32,
        lock_until: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE inventory_units
             SET available_units = LEAST(available_units + $2, capacity), locked_until = NULL
             WHERE unit_key = $1 AND locked_until = $3",
        )
        .bind(key.to_string())
        .bind(to_db_count(quantity)?)
        .bind(lock_until)
        .execute(&mut *self.tx)
        .await
        .map_err(backend)?;
        Ok(result.rows_affected() == 1)
    }

    async fn transition(&mut self, transition: &Transition) -> Result<Option<Booking>, StoreError> {
        let held_quantity = transition
            .hold
            .map(|stamp| to_db_count(stamp.quantity))
            .transpose()?;
        let row: Option<BookingRow> = sqlx::query_as(&format!(
            "UPDATE bookings SET
                 status = $3,
                 updated_at = $4,
                 held_at = CASE WHEN $3 = 'HOLD' THEN $4 ELSE held_at END,
                 hold_expires_at = COALESCE($5, hold_expires_at),
                 held_quantity = COALESCE($6, held_quantity),
                 confirmed_at = CASE WHEN $3 = 'CONFIRMED' THEN $4 ELSE confirmed_at END,
                 cancelled_at = CASE WHEN $3 IN ('CANCELLED_BY_GUEST', 'CANCELLED_BY_PROVIDER')
                                     THEN $4 ELSE cancelled_at END
             WHERE id = $1 AND status = $2
             RETURNING {BOOKING_COLUMNS}"
        ))
        .bind(transition.booking_id)
        .bind(transition.from.as_str())
        .bind(transition.to.as_str())
        .bind(transition.at)
        .bind(transition.hold.map(|stamp| stamp.expires_at))
        .bind(held_quantity)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(backend)?;
        row.map(Booking::try_from).transpose()
    }

    async fn insert_payment(&mut self, record: &PaymentRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO payments (id, booking_id, gateway_ref, method_ref, amount, currency,
                 status, refunded_amount, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(record.id)
        .bind(record.booking_id)
        .bind(&record.gateway_ref.0)
        .bind(record.method_ref.expose())
        .bind(record.amount)
        .bind(&record.currency)
        .bind(record.status.as_str())
        .bind(record.refunded_amount)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn update_payment(&mut self, record: &PaymentRecord) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE payments SET status = $2, refunded_amount = $3, updated_at = $4
             WHERE id = $1",
        )
        .bind(record.id)
        .bind(record.status.as_str())
        .bind(record.refunded_amount)
        .bind(record.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(backend)?;
        if result.rows_affected() != 1 {
            return Err(StoreError::Conflict(format!("payment {} not found", record.id)));
        }
        Ok(())
    }

    async fn append_entries(
        &mut self,
        entries: Vec<LedgerEntry>,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let mut appended = Vec::with_capacity(entries.len());
        for mut entry in entries {
            let sequence: i64 = sqlx::query_scalar(
                "INSERT INTO ledger_entries (id, booking_id, entry_type, debit_account,
                     credit_account, amount, currency, description, metadata, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                 RETURNING sequence",
            )
            .bind(entry.id)
            .bind(entry.booking_id)
            .bind(entry.entry_type.as_str())
            .bind(entry.debit_account.to_string())
            .bind(entry.credit_account.to_string())
            .bind(entry.amount)
            .bind(&entry.currency)
            .bind(&entry.description)
            .bind(&entry.metadata)
            .bind(entry.created_at)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(backend)?;
            entry.sequence = sequence;
            appended.push(entry);
        }
        Ok(appended)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let PgStoreTransaction { tx } = *self;
        tx.commit().await.map_err(backend)
    }
}
