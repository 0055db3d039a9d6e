#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use roamly_core::{
    Account, Booking, BookingStore, CancellationPolicy, EngineSettings, EntryType, InventoryKey,
    InventoryUnit, ItemSelection, LedgerEntry, LedgerQuery, ListingDirectory, ListingTerms,
    PaymentRecord, PolicyTier, PriceBreakdown, PricingOracle, QuoteInsert, QuoteRequest,
    StoreError, StoreTransaction, Transition, UpstreamError,
};
use roamly_order::{BookingStateMachine, MockPaymentGateway};
use roamly_shared::Masked;
use roamly_store::InMemoryBookingStore;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap()
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Nightly rate per room for hotels, per-seat fare for tours.
pub struct FixedPricing {
    pub nightly_rate: Decimal,
    pub seat_fare: Decimal,
    pub calls: AtomicUsize,
}

#[async_trait]
impl PricingOracle for FixedPricing {
    async fn calculate(
        &self,
        item: &ItemSelection,
        guests: u32,
        _selections: &[String],
    ) -> Result<PriceBreakdown, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let total = match item {
            ItemSelection::Hotel {
                check_in,
                check_out,
                rooms,
                ..
            } => {
                let nights = (*check_out - *check_in).num_days().max(0);
                self.nightly_rate * Decimal::from(nights) * Decimal::from(*rooms)
            }
            ItemSelection::Tour { .. } => self.seat_fare * Decimal::from(guests),
        };
        Ok(PriceBreakdown {
            total,
            currency: None,
            details: serde_json::json!({ "base": total }),
        })
    }
}

pub struct StaticListings {
    pub provider_id: Uuid,
    pub listing_id: Uuid,
    pub policy: Mutex<CancellationPolicy>,
}

#[async_trait]
impl ListingDirectory for StaticListings {
    async fn terms(&self, item: &ItemSelection) -> Result<ListingTerms, UpstreamError> {
        let inventory_scope = match item {
            ItemSelection::Hotel { .. } => self.listing_id,
            ItemSelection::Tour { package_id, .. } => *package_id,
        };
        Ok(ListingTerms {
            provider_id: self.provider_id,
            inventory_scope,
            cancellation_policy: self.policy.lock().unwrap().clone(),
        })
    }
}

/// Posting failures armed by a test; each fires once.
#[derive(Default)]
pub struct PostingFaults {
    confirmation: AtomicBool,
    refund: AtomicBool,
}

impl PostingFaults {
    pub fn fail_next_confirmation(&self) {
        self.confirmation.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_refund(&self) {
        self.refund.store(true, Ordering::SeqCst);
    }

    fn trip(&self, entry_type: EntryType) -> bool {
        let flag = match entry_type {
            EntryType::BookingConfirmed => &self.confirmation,
            EntryType::RefundProcessed => &self.refund,
        };
        flag.swap(false, Ordering::SeqCst)
    }
}

/// In-memory store whose ledger appends can be made to fail on demand.
pub struct FaultyStore {
    inner: InMemoryBookingStore,
    faults: Arc<PostingFaults>,
}

#[async_trait]
impl BookingStore for FaultyStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        Ok(Box::new(FaultyTransaction {
            inner: self.inner.begin().await?,
            faults: self.faults.clone(),
        }))
    }

    async fn insert_quote(&self, booking: Booking) -> Result<QuoteInsert, StoreError> {
        self.inner.insert_quote(booking).await
    }

    async fn get_booking(&self, id: Uuid) -> Result<Option<Booking>, StoreError> {
        self.inner.get_booking(id).await
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Booking>, StoreError> {
        self.inner.find_by_idempotency_key(key).await
    }

    async fn list_expired_holds(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Booking>, StoreError> {
        self.inner.list_expired_holds(now, limit).await
    }

    async fn get_payment(&self, booking_id: Uuid) -> Result<Option<PaymentRecord>, StoreError> {
        self.inner.get_payment(booking_id).await
    }

    async fn get_units(&self, keys: &[InventoryKey]) -> Result<Vec<InventoryUnit>, StoreError> {
        self.inner.get_units(keys).await
    }

    async fn ledger_entries(&self, query: &LedgerQuery) -> Result<Vec<LedgerEntry>, StoreError> {
        self.inner.ledger_entries(query).await
    }

    async fn account_balance(&self, account: &Account) -> Result<Decimal, StoreError> {
        self.inner.account_balance(account).await
    }
}

struct FaultyTransaction {
    inner: Box<dyn StoreTransaction>,
    faults: Arc<PostingFaults>,
}

#[async_trait]
impl StoreTransaction for FaultyTransaction {
    async fn reserve_unit(
        &mut self,
        key: &InventoryKey,
        quantity: u32,
        lock_until: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.inner.reserve_unit(key, quantity, lock_until).await
    }

    async fn release_unit(
        &mut self,
        key: &InventoryKey,
        quantity: u32,
        lock_until: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.inner.release_unit(key, quantity, lock_until).await
    }

    async fn transition(&mut self, transition: &Transition) -> Result<Option<Booking>, StoreError> {
        self.inner.transition(transition).await
    }

    async fn insert_payment(&mut self, record: &PaymentRecord) -> Result<(), StoreError> {
        self.inner.insert_payment(record).await
    }

    async fn update_payment(&mut self, record: &PaymentRecord) -> Result<(), StoreError> {
        self.inner.update_payment(record).await
    }

    async fn append_entries(
        &mut self,
        entries: Vec<LedgerEntry>,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        if let Some(first) = entries.first() {
            if self.faults.trip(first.entry_type) {
                return Err(StoreError::Backend("connection reset".into()));
            }
        }
        self.inner.append_entries(entries).await
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.inner.commit().await
    }
}

pub struct Harness {
    pub store: InMemoryBookingStore,
    pub gateway: Arc<MockPaymentGateway>,
    pub pricing: Arc<FixedPricing>,
    pub listings: Arc<StaticListings>,
    pub machine: Arc<BookingStateMachine>,
    pub faults: Arc<PostingFaults>,
    pub guest: Uuid,
    pub provider: Uuid,
}

impl Harness {
    pub fn new(tier: PolicyTier) -> Self {
        Self::with_rates(tier, dec!(120), dec!(100))
    }

    pub fn with_rates(tier: PolicyTier, nightly_rate: Decimal, seat_fare: Decimal) -> Self {
        let store = InMemoryBookingStore::new();
        let faults = Arc::new(PostingFaults::default());
        let gateway = Arc::new(MockPaymentGateway::new());
        let pricing = Arc::new(FixedPricing {
            nightly_rate,
            seat_fare,
            calls: AtomicUsize::new(0),
        });
        let provider = Uuid::new_v4();
        let listings = Arc::new(StaticListings {
            provider_id: provider,
            listing_id: Uuid::new_v4(),
            policy: Mutex::new(CancellationPolicy::new(tier.clone(), tier.to_string())),
        });
        let machine = Arc::new(BookingStateMachine::new(
            Arc::new(FaultyStore {
                inner: store.clone(),
                faults: faults.clone(),
            }),
            pricing.clone(),
            listings.clone(),
            gateway.clone(),
            EngineSettings::default(),
        ));
        Self {
            store,
            gateway,
            pricing,
            listings,
            machine,
            faults,
            guest: Uuid::new_v4(),
            provider,
        }
    }

    pub fn night_key(&self, night: NaiveDate) -> InventoryKey {
        InventoryKey::Night {
            listing_id: self.listings.listing_id,
            date: night,
        }
    }

    pub async fn provision_nights(&self, first: NaiveDate, count: u32, capacity: u32) -> Vec<InventoryKey> {
        let mut keys = Vec::new();
        for offset in 0..count {
            let key = self.night_key(first + Duration::days(i64::from(offset)));
            self.store.provision_unit(key, capacity).await;
            keys.push(key);
        }
        keys
    }

    pub async fn provision_departure(&self, package_id: Uuid, on: NaiveDate, capacity: u32) -> InventoryKey {
        let key = InventoryKey::Departure {
            package_id,
            date: on,
        };
        self.store.provision_unit(key, capacity).await;
        key
    }

    pub fn hotel_request(&self, check_in: NaiveDate, nights: i64, rooms: u32) -> QuoteRequest {
        QuoteRequest {
            item: ItemSelection::Hotel {
                package_id: Uuid::new_v4(),
                check_in,
                check_out: check_in + Duration::days(nights),
                rooms,
            },
            guests: rooms * 2,
            selections: vec![],
            idempotency_key: None,
        }
    }

    pub fn tour_request(&self, package_id: Uuid, departure_date: NaiveDate, guests: u32) -> QuoteRequest {
        QuoteRequest {
            item: ItemSelection::Tour {
                package_id,
                departure_date,
            },
            guests,
            selections: vec![],
            idempotency_key: None,
        }
    }

    /// Drive a tour booking all the way to CONFIRMED at `t0`.
    pub async fn confirmed_tour(&self, departure_date: NaiveDate, guests: u32) -> Booking {
        let package_id = Uuid::new_v4();
        self.provision_departure(package_id, departure_date, 20).await;
        let quote = self
            .machine
            .create_quote(self.guest, self.tour_request(package_id, departure_date, guests), t0())
            .await
            .unwrap();
        let id = quote.booking.id;
        self.machine.create_hold(self.guest, id, t0()).await.unwrap();
        self.machine
            .authorize_payment(id, self.guest, visa(), t0() + Duration::minutes(1))
            .await
            .unwrap();
        self.machine
            .confirm_booking(id, t0() + Duration::minutes(2))
            .await
            .unwrap()
    }
}

pub fn visa() -> Masked<String> {
    Masked::new("pm_card_visa_4242".to_string())
}
