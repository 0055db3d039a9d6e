use chrono::{DateTime, Utc};
use roamly_core::{
    Account, Booking, BookingResult, BookingStore, EntryType, LedgerEntry, LedgerError,
    LedgerQuery, StoreTransaction,
};
use roamly_shared::money::{ratio, round_money};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Append-only double-entry journal for booking money movements.
///
/// Accounts: the guest pays into `platform:escrow`, which splits into the
/// provider's share and platform commission. Refunds run the same legs in
/// reverse, pro rata.
pub struct AccountingLedger {
    store: Arc<dyn BookingStore>,
    commission_rate: Decimal,
}

impl AccountingLedger {
    pub fn new(store: Arc<dyn BookingStore>, commission_rate: Decimal) -> Self {
        Self {
            store,
            commission_rate,
        }
    }

    pub fn commission_rate(&self) -> Decimal {
        self.commission_rate
    }

    /// Entries for a confirmation. The provider share is rounded once and the
    /// commission leg takes the remainder, so escrow nets to exactly zero.
    pub fn confirmation_entries(
        &self,
        booking: &Booking,
        at: DateTime<Utc>,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        let total = booking.total_price;
        let provider_share = round_money(total * (Decimal::ONE - self.commission_rate));
        let commission = total - provider_share;

        let metadata = serde_json::json!({
            "commission_rate": self.commission_rate,
            "total_amount": total,
            "provider_share": provider_share,
            "commission": commission,
        });
        let mut group = PostingGroup::new(booking, EntryType::BookingConfirmed, metadata, at);
        group.push(
            Account::Traveler(booking.guest_id),
            Account::PlatformEscrow,
            total,
            "Guest payment held in escrow",
        );
        group.push(
            Account::PlatformEscrow,
            Account::Provider(booking.provider_id),
            provider_share,
            "Provider share of booking",
        );
        group.push(
            Account::PlatformEscrow,
            Account::PlatformRevenue,
            commission,
            "Platform commission",
        );
        group.finish()
    }

    /// Entries reversing `refund_amount` of a confirmed booking.
    pub fn refund_entries(
        &self,
        booking: &Booking,
        refund_amount: Decimal,
        at: DateTime<Utc>,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        let total = booking.total_price;
        if refund_amount < Decimal::ZERO {
            return Err(LedgerError::NonPositiveAmount(refund_amount));
        }
        if refund_amount > total {
            return Err(LedgerError::RefundExceedsTotal {
                refund: refund_amount,
                total,
            });
        }

        // total * (1 - r) * f with f = refund / total
        let refund_fraction = ratio(refund_amount, total);
        let provider_back = round_money(refund_amount * (Decimal::ONE - self.commission_rate));
        let commission_back = refund_amount - provider_back;

        let metadata = serde_json::json!({
            "commission_rate": self.commission_rate,
            "refund_fraction": refund_fraction,
            "total_amount": total,
            "refund_amount": refund_amount,
            "provider_reversal": provider_back,
            "commission_reversal": commission_back,
        });
        let mut group = PostingGroup::new(booking, EntryType::RefundProcessed, metadata, at);
        group.push(
            Account::Provider(booking.provider_id),
            Account::PlatformEscrow,
            provider_back,
            "Provider share reversed",
        );
        group.push(
            Account::PlatformRevenue,
            Account::PlatformEscrow,
            commission_back,
            "Platform commission reversed",
        );
        group.push(
            Account::PlatformEscrow,
            Account::Traveler(booking.guest_id),
            refund_amount,
            "Refund to guest",
        );
        group.finish()
    }

    pub async fn post_confirmation(
        &self,
        tx: &mut dyn StoreTransaction,
        booking: &Booking,
        at: DateTime<Utc>,
    ) -> BookingResult<Vec<LedgerEntry>> {
        let entries = self.confirmation_entries(booking, at)?;
        let posted = tx.append_entries(entries).await?;
        info!(
            booking_id = %booking.id,
            total = %booking.total_price,
            entries = posted.len(),
            "Posted booking confirmation to ledger"
        );
        Ok(posted)
    }

    /// A zero refund posts nothing.
    pub async fn post_refund(
        &self,
        tx: &mut dyn StoreTransaction,
        booking: &Booking,
        refund_amount: Decimal,
        at: DateTime<Utc>,
    ) -> BookingResult<Vec<LedgerEntry>> {
        let entries = self.refund_entries(booking, refund_amount, at)?;
        if entries.is_empty() {
            return Ok(entries);
        }
        let posted = tx.append_entries(entries).await?;
        info!(
            booking_id = %booking.id,
            refund = %refund_amount,
            entries = posted.len(),
            "Posted refund reversal to ledger"
        );
        Ok(posted)
    }

    /// Credits minus debits over every entry naming `account`.
    pub async fn get_account_balance(&self, account: &Account) -> BookingResult<Decimal> {
        Ok(self.store.account_balance(account).await?)
    }

    pub async fn entries_for_booking(&self, booking_id: Uuid) -> BookingResult<Vec<LedgerEntry>> {
        Ok(self
            .store
            .ledger_entries(&LedgerQuery::for_booking(booking_id))
            .await?)
    }

    /// Filtered journal read; this is what payout batching consumes.
    pub async fn entries_for_account(&self, query: &LedgerQuery) -> BookingResult<Vec<LedgerEntry>> {
        Ok(self.store.ledger_entries(query).await?)
    }

    pub async fn provider_earnings(&self, provider_id: Uuid) -> BookingResult<Decimal> {
        self.get_account_balance(&Account::Provider(provider_id)).await
    }

    pub async fn platform_revenue(&self) -> BookingResult<Decimal> {
        self.get_account_balance(&Account::PlatformRevenue).await
    }
}

struct PostingGroup {
    booking_id: Uuid,
    entry_type: EntryType,
    currency: String,
    metadata: serde_json::Value,
    at: DateTime<Utc>,
    entries: Vec<LedgerEntry>,
}

impl PostingGroup {
    fn new(
        booking: &Booking,
        entry_type: EntryType,
        metadata: serde_json::Value,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            booking_id: booking.id,
            entry_type,
            currency: booking.currency.clone(),
            metadata,
            at,
            entries: Vec::with_capacity(3),
        }
    }

    /// Zero legs are dropped; the store rejects non-positive amounts.
    fn push(&mut self, debit: Account, credit: Account, amount: Decimal, description: &str) {
        if amount.is_zero() {
            return;
        }
        self.entries.push(LedgerEntry {
            id: Uuid::new_v4(),
            sequence: 0,
            booking_id: self.booking_id,
            entry_type: self.entry_type,
            debit_account: debit,
            credit_account: credit,
            amount,
            currency: self.currency.clone(),
            description: description.to_string(),
            metadata: self.metadata.clone(),
            created_at: self.at,
        });
    }

    fn finish(self) -> Result<Vec<LedgerEntry>, LedgerError> {
        if let Some(bad) = self.entries.iter().find(|e| e.amount <= Decimal::ZERO) {
            return Err(LedgerError::NonPositiveAmount(bad.amount));
        }
        let escrow: Decimal = self
            .entries
            .iter()
            .map(|e| e.signed_amount_for(&Account::PlatformEscrow))
            .sum();
        if !escrow.is_zero() {
            return Err(LedgerError::Unbalanced {
                booking_id: self.booking_id,
                account: Account::PlatformEscrow,
                imbalance: escrow,
            });
        }
        Ok(self.entries)
    }
}
