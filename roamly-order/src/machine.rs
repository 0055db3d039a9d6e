use crate::accounting::AccountingLedger;
use crate::orchestrator::PaymentOrchestrator;
use crate::reclaim::{current_conflict, HoldReclaimer, HoldReleaser};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use roamly_catalog::{CancellationPolicyEngine, InventoryLedger, RefundCalculation};
use roamly_core::{
    Booking, BookingError, BookingResult, BookingStatus, BookingStore, EngineSettings,
    ListingDirectory, PaymentGateway, PaymentRecord, PaymentStatus, PricingOracle, QuoteInsert,
    QuoteRequest, StoreError, StoreTransaction, Transition,
};
use roamly_shared::models::BookingEvent;
use roamly_shared::money::round_money;
use roamly_shared::Masked;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

const EVENT_CAPACITY: usize = 256;

/// Result of `create_quote`.
#[derive(Debug, Clone)]
pub struct QuoteReceipt {
    pub booking: Booking,
    /// Informational; enforced when the hold is requested.
    pub expires_at: DateTime<Utc>,
    /// True when the idempotency key matched an existing booking.
    pub replayed: bool,
}

/// Result of a guest or provider cancellation.
#[derive(Debug, Clone)]
pub struct Cancellation {
    pub booking: Booking,
    pub refund: RefundCalculation,
}

/// Central coordinator of the booking lifecycle:
/// `QUOTE -> HOLD -> PAYMENT_PENDING -> CONFIRMED -> CANCELLED_BY_*`, plus
/// `HOLD -> EXPIRED_HOLD` via the sweeper.
///
/// Every status change is a guarded update inside a store transaction. No
/// in-process lock protects a booking; a lost race surfaces as
/// [`BookingError::StateConflict`].
pub struct BookingStateMachine {
    store: Arc<dyn BookingStore>,
    pricing: Arc<dyn PricingOracle>,
    listings: Arc<dyn ListingDirectory>,
    inventory: InventoryLedger,
    accounting: AccountingLedger,
    payments: PaymentOrchestrator,
    cancellation: CancellationPolicyEngine,
    reclaimer: HoldReclaimer,
    settings: EngineSettings,
    events: broadcast::Sender<BookingEvent>,
}

impl BookingStateMachine {
    pub fn new(
        store: Arc<dyn BookingStore>,
        pricing: Arc<dyn PricingOracle>,
        listings: Arc<dyn ListingDirectory>,
        gateway: Arc<dyn PaymentGateway>,
        settings: EngineSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inventory: InventoryLedger::new(store.clone()),
            accounting: AccountingLedger::new(store.clone(), settings.commission_rate),
            payments: PaymentOrchestrator::new(gateway),
            cancellation: CancellationPolicyEngine::new(settings.partial_refund_ratio),
            reclaimer: HoldReclaimer::new(store.clone()).with_events(events.clone()),
            store,
            pricing,
            listings,
            settings,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BookingEvent> {
        self.events.subscribe()
    }

    pub fn accounting(&self) -> &AccountingLedger {
        &self.accounting
    }

    pub fn inventory(&self) -> &InventoryLedger {
        &self.inventory
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub async fn get_booking(&self, booking_id: Uuid) -> BookingResult<Booking> {
        self.store
            .get_booking(booking_id)
            .await?
            .ok_or(BookingError::NotFound(booking_id))
    }

    /// Price the request and persist it as a QUOTE. No inventory is touched.
    /// Replaying an idempotency key returns the original booking unchanged.
    pub async fn create_quote(
        &self,
        requester: Uuid,
        request: QuoteRequest,
        now: DateTime<Utc>,
    ) -> BookingResult<QuoteReceipt> {
        if let Some(key) = &request.idempotency_key {
            if let Some(existing) = self.store.find_by_idempotency_key(key).await? {
                return Ok(self.replayed(existing));
            }
        }
        if request.guests == 0 {
            return Err(BookingError::Validation("at least one guest is required".into()));
        }

        let terms = self.listings.terms(&request.item).await?;
        let price = self
            .pricing
            .calculate(&request.item, request.guests, &request.selections)
            .await?;
        if price.total < Decimal::ZERO {
            return Err(BookingError::Validation(format!(
                "pricing returned a negative total {}",
                price.total
            )));
        }

        // Stored at minor-unit precision; every later step reads it back
        let total_price = round_money(price.total);

        let item = request.item.into_booked_item(&terms, request.guests);
        if item.quantity_per_unit() == 0 {
            return Err(BookingError::Validation("quantity per unit must be positive".into()));
        }
        // Rejects zero-night stays before anything is stored
        item.inventory_keys()?;

        let price_snapshot = serde_json::to_value(&price)
            .map_err(|e| BookingError::Validation(format!("unserializable price breakdown: {e}")))?;
        let booking = Booking {
            id: Uuid::new_v4(),
            guest_id: requester,
            provider_id: terms.provider_id,
            item,
            guests: request.guests,
            selections: request.selections,
            status: BookingStatus::Quote,
            price_snapshot,
            total_price,
            currency: price.currency.unwrap_or_else(|| self.settings.currency.clone()),
            cancellation_policy: terms.cancellation_policy,
            idempotency_key: request
                .idempotency_key
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            held_quantity: None,
            quoted_at: now,
            held_at: None,
            hold_expires_at: None,
            confirmed_at: None,
            cancelled_at: None,
            updated_at: now,
        };

        match self.store.insert_quote(booking).await? {
            QuoteInsert::Created(booking) => {
                info!(
                    booking_id = %booking.id,
                    kind = booking.item.kind(),
                    total = %booking.total_price,
                    "Quote created"
                );
                self.publish(BookingEvent::QuoteCreated {
                    booking_id: booking.id,
                    guest_id: booking.guest_id,
                    total_price: booking.total_price,
                    currency: booking.currency.clone(),
                    quoted_at: booking.quoted_at,
                });
                Ok(QuoteReceipt {
                    expires_at: booking.quote_expires_at(self.settings.quote_ttl),
                    booking,
                    replayed: false,
                })
            }
            // Lost an insert race on the same key
            QuoteInsert::Existing(existing) => Ok(self.replayed(existing)),
        }
    }

    /// QUOTE -> HOLD. Reserves every unit the booking needs and flips the
    /// status in one transaction; any short unit aborts the whole hold.
    pub async fn create_hold(
        &self,
        requester: Uuid,
        quote_id: Uuid,
        now: DateTime<Utc>,
    ) -> BookingResult<Booking> {
        let booking = self.get_booking(quote_id).await?;
        ensure_guest(&booking, requester)?;
        booking.ensure_status(BookingStatus::Quote)?;
        if booking.is_quote_expired(now, self.settings.quote_ttl) {
            return Err(BookingError::ExpiredQuote(quote_id));
        }

        let keys = booking.item.inventory_keys()?;
        let quantity = booking.item.quantity_per_unit();
        let expires_at = now + self.settings.hold_ttl;

        let mut tx = self.store.begin().await?;
        if let Err(err) = self
            .inventory
            .reserve(tx.as_mut(), &keys, quantity, expires_at)
            .await
        {
            drop(tx);
            warn!(booking_id = %quote_id, error = %err, "Hold rejected");
            return Err(err.into());
        }
        let transition = Transition::place_hold(quote_id, now, expires_at, quantity);
        let held = self.apply(tx, &transition).await?;

        info!(
            booking_id = %quote_id,
            units = keys.len(),
            quantity_per_unit = quantity,
            hold_expires_at = %expires_at,
            "Hold placed"
        );
        self.publish(BookingEvent::HoldPlaced {
            booking_id: quote_id,
            units: keys.len(),
            quantity_per_unit: quantity,
            hold_expires_at: expires_at,
        });
        Ok(held)
    }

    /// HOLD -> PAYMENT_PENDING after a successful gateway pre-authorization.
    pub async fn authorize_payment(
        &self,
        booking_id: Uuid,
        requester: Uuid,
        method_ref: Masked<String>,
        now: DateTime<Utc>,
    ) -> BookingResult<PaymentRecord> {
        let booking = self.get_booking(booking_id).await?;
        ensure_guest(&booking, requester)?;
        booking.ensure_status(BookingStatus::Hold)?;
        if booking.is_hold_expired(now) {
            return Err(BookingError::ExpiredHold(booking_id));
        }
        if self.store.get_payment(booking_id).await?.is_some() {
            return Err(BookingError::Validation(format!(
                "booking {booking_id} already has a payment"
            )));
        }

        let record = self.payments.authorize(&booking, method_ref, now).await?;

        let mut tx = self.store.begin().await?;
        tx.insert_payment(&record).await.map_err(|err| match err {
            // A concurrent authorization committed its payment first
            StoreError::Conflict(_) => BookingError::Validation(format!(
                "booking {booking_id} already has a payment"
            )),
            other => BookingError::Store(other),
        })?;
        let transition = Transition::new(
            booking_id,
            BookingStatus::Hold,
            BookingStatus::PaymentPending,
            now,
        )?;
        if let Err(err) = self.apply(tx, &transition).await {
            warn!(
                booking_id = %booking_id,
                payment_ref = %record.gateway_ref,
                error = %err,
                "Pre-authorized payment but booking left HOLD first"
            );
            return Err(err);
        }

        self.publish(BookingEvent::PaymentAuthorized {
            booking_id,
            gateway_ref: record.gateway_ref.0.clone(),
            amount: record.amount,
        });
        Ok(record)
    }

    /// PAYMENT_PENDING -> CONFIRMED: capture, post the confirmation group,
    /// flip the status. A capture failure changes nothing.
    pub async fn confirm_booking(
        &self,
        booking_id: Uuid,
        now: DateTime<Utc>,
    ) -> BookingResult<Booking> {
        let booking = self.get_booking(booking_id).await?;
        booking.ensure_status(BookingStatus::PaymentPending)?;
        let mut payment = self.payment_for(booking_id).await?;

        let needs_capture = payment.status == PaymentStatus::PreAuthorized;
        self.payments.capture(&mut payment, now).await?;
        if needs_capture {
            // Persist the capture on its own so a retry never captures twice
            let mut tx = self.store.begin().await?;
            tx.update_payment(&payment).await?;
            tx.commit().await?;
        }

        let mut tx = self.store.begin().await?;
        self.accounting
            .post_confirmation(tx.as_mut(), &booking, now)
            .await?;
        let transition = Transition::new(
            booking_id,
            BookingStatus::PaymentPending,
            BookingStatus::Confirmed,
            now,
        )?;
        let confirmed = self.apply(tx, &transition).await?;

        info!(booking_id = %booking_id, total = %confirmed.total_price, "Booking confirmed");
        self.publish(BookingEvent::BookingConfirmed {
            booking_id,
            provider_id: confirmed.provider_id,
            total_price: confirmed.total_price,
            currency: confirmed.currency.clone(),
            confirmed_at: now,
        });
        Ok(confirmed)
    }

    /// CONFIRMED -> CANCELLED_BY_GUEST, refunding per the policy snapshot.
    pub async fn cancel_by_guest(
        &self,
        booking_id: Uuid,
        requester: Uuid,
        now: DateTime<Utc>,
    ) -> BookingResult<Cancellation> {
        let booking = self.get_booking(booking_id).await?;
        ensure_guest(&booking, requester)?;
        booking.ensure_status(BookingStatus::Confirmed)?;

        let refund = self.cancellation.calculate(
            &booking.cancellation_policy,
            booking.item.service_start(),
            booking.total_price,
            now,
        );
        self.cancel(booking, refund, BookingStatus::CancelledByGuest, now)
            .await
    }

    /// CONFIRMED -> CANCELLED_BY_PROVIDER. The guest always gets everything back.
    pub async fn cancel_by_provider(
        &self,
        booking_id: Uuid,
        requester: Uuid,
        now: DateTime<Utc>,
    ) -> BookingResult<Cancellation> {
        let booking = self.get_booking(booking_id).await?;
        if booking.provider_id != requester {
            return Err(BookingError::OwnershipViolation {
                booking_id,
                requester,
            });
        }
        booking.ensure_status(BookingStatus::Confirmed)?;

        let refund = self.cancellation.full_refund(
            &booking.cancellation_policy,
            booking.item.service_start(),
            booking.total_price,
            now,
        );
        self.cancel(booking, refund, BookingStatus::CancelledByProvider, now)
            .await
    }

    /// HOLD -> EXPIRED_HOLD, restoring units still stamped by this hold.
    pub async fn release_hold(&self, booking_id: Uuid, now: DateTime<Utc>) -> BookingResult<Booking> {
        self.reclaimer
            .release(booking_id, now)
            .await
            .map(|(booking, _)| booking)
    }

    async fn cancel(
        &self,
        booking: Booking,
        refund: RefundCalculation,
        to: BookingStatus,
        now: DateTime<Utc>,
    ) -> BookingResult<Cancellation> {
        let mut payment = self.payment_for(booking.id).await?;

        // A previous attempt may have refunded before its commit failed. The
        // money already returned is what the ledger must reverse.
        let refund = if payment.refunded_amount > refund.refund_amount {
            warn!(
                booking_id = %booking.id,
                already_refunded = %payment.refunded_amount,
                recomputed = %refund.refund_amount,
                "Posting the refund settled by an earlier attempt"
            );
            self.cancellation.settled(
                &booking.cancellation_policy,
                booking.item.service_start(),
                booking.total_price,
                payment.refunded_amount,
                now,
            )
        } else {
            refund
        };
        let refund_amount = refund.refund_amount;
        let outstanding = refund_amount - payment.refunded_amount;
        if outstanding > Decimal::ZERO {
            self.payments.refund(&mut payment, outstanding, now).await?;
            let mut tx = self.store.begin().await?;
            tx.update_payment(&payment).await?;
            tx.commit().await?;
        }

        let mut tx = self.store.begin().await?;
        self.accounting
            .post_refund(tx.as_mut(), &booking, refund_amount, now)
            .await?;
        let transition = Transition::new(booking.id, BookingStatus::Confirmed, to, now)?;
        let cancelled = self.apply(tx, &transition).await?;

        let by_provider = to == BookingStatus::CancelledByProvider;
        info!(
            booking_id = %cancelled.id,
            by_provider,
            refund = %refund_amount,
            refund_percentage = %refund.refund_percentage,
            "Booking cancelled"
        );
        self.publish(BookingEvent::BookingCancelled {
            booking_id: cancelled.id,
            by_provider,
            refund_amount,
            cancelled_at: now,
        });
        Ok(Cancellation {
            booking: cancelled,
            refund,
        })
    }

    /// Run the guarded transition and commit. A guard miss drops the
    /// transaction, discarding everything written in it.
    async fn apply(
        &self,
        mut tx: Box<dyn StoreTransaction>,
        transition: &Transition,
    ) -> BookingResult<Booking> {
        match tx.transition(transition).await? {
            Some(booking) => {
                tx.commit().await?;
                Ok(booking)
            }
            None => {
                drop(tx);
                Err(current_conflict(self.store.as_ref(), transition.booking_id, transition.from).await)
            }
        }
    }

    async fn payment_for(&self, booking_id: Uuid) -> BookingResult<PaymentRecord> {
        self.store.get_payment(booking_id).await?.ok_or_else(|| {
            BookingError::Validation(format!("booking {booking_id} has no payment record"))
        })
    }

    fn replayed(&self, booking: Booking) -> QuoteReceipt {
        info!(booking_id = %booking.id, "Quote replayed for idempotency key");
        QuoteReceipt {
            expires_at: booking.quote_expires_at(self.settings.quote_ttl),
            booking,
            replayed: true,
        }
    }

    fn publish(&self, event: BookingEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl HoldReleaser for BookingStateMachine {
    async fn release_hold(&self, booking_id: Uuid, now: DateTime<Utc>) -> BookingResult<usize> {
        self.reclaimer.release_hold(booking_id, now).await
    }
}

fn ensure_guest(booking: &Booking, requester: Uuid) -> BookingResult<()> {
    if booking.guest_id != requester {
        return Err(BookingError::OwnershipViolation {
            booking_id: booking.id,
            requester,
        });
    }
    Ok(())
}
