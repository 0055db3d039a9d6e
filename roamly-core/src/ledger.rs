use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Ledger accounts touched by booking money movements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Account {
    Traveler(Uuid),
    Provider(Uuid),
    PlatformEscrow,
    PlatformRevenue,
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Account::Traveler(id) => write!(f, "traveler:{}", id),
            Account::Provider(id) => write!(f, "provider:{}", id),
            Account::PlatformEscrow => f.write_str("platform:escrow"),
            Account::PlatformRevenue => f.write_str("platform:revenue"),
        }
    }
}

impl FromStr for Account {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "platform:escrow" => return Ok(Account::PlatformEscrow),
            "platform:revenue" => return Ok(Account::PlatformRevenue),
            _ => {}
        }
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| format!("malformed account: {s}"))?;
        let id = Uuid::parse_str(id).map_err(|e| format!("bad account id in {s}: {e}"))?;
        match kind {
            "traveler" => Ok(Account::Traveler(id)),
            "provider" => Ok(Account::Provider(id)),
            other => Err(format!("unknown account kind: {other}")),
        }
    }
}

impl From<Account> for String {
    fn from(value: Account) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for Account {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Business event a posting group records.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    BookingConfirmed,
    RefundProcessed,
}

impl EntryType {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryType::BookingConfirmed => "booking_confirmed",
            EntryType::RefundProcessed => "refund_processed",
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "booking_confirmed" => Ok(EntryType::BookingConfirmed),
            "refund_processed" => Ok(EntryType::RefundProcessed),
            other => Err(format!("unknown ledger entry type: {other}")),
        }
    }
}

/// Immutable journal line: `amount` moves from `debit_account` to `credit_account`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    /// Assigned by the store on append; zero until then.
    pub sequence: i64,
    pub booking_id: Uuid,
    pub entry_type: EntryType,
    pub debit_account: Account,
    pub credit_account: Account,
    pub amount: Decimal,
    pub currency: String,
    pub description: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Effect of this entry on `account`: credits positive, debits negative.
    pub fn signed_amount_for(&self, account: &Account) -> Decimal {
        let mut delta = Decimal::ZERO;
        if self.credit_account == *account {
            delta += self.amount;
        }
        if self.debit_account == *account {
            delta -= self.amount;
        }
        delta
    }
}

/// Filter over stored journal lines. Empty filter matches everything.
#[derive(Clone, Debug, Default)]
pub struct LedgerQuery {
    pub account: Option<Account>,
    pub booking_id: Option<Uuid>,
    pub entry_type: Option<EntryType>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl LedgerQuery {
    pub fn for_account(account: Account) -> Self {
        Self {
            account: Some(account),
            ..Self::default()
        }
    }

    pub fn for_booking(booking_id: Uuid) -> Self {
        Self {
            booking_id: Some(booking_id),
            ..Self::default()
        }
    }

    pub fn with_type(mut self, entry_type: EntryType) -> Self {
        self.entry_type = Some(entry_type);
        self
    }

    /// Half-open range `[start, end)` on `created_at`.
    pub fn with_time_range(
        mut self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Self {
        self.start_time = start;
        self.end_time = end;
        self
    }

    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        if let Some(account) = &self.account {
            if entry.debit_account != *account && entry.credit_account != *account {
                return false;
            }
        }
        if let Some(booking_id) = self.booking_id {
            if entry.booking_id != booking_id {
                return false;
            }
        }
        if let Some(entry_type) = self.entry_type {
            if entry.entry_type != entry_type {
                return false;
            }
        }
        if let Some(start) = self.start_time {
            if entry.created_at < start {
                return false;
            }
        }
        if let Some(end) = self.end_time {
            if entry.created_at >= end {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("posting group for booking {booking_id} leaves {account} off by {imbalance}")]
    Unbalanced {
        booking_id: Uuid,
        account: Account,
        imbalance: Decimal,
    },

    #[error("ledger amounts must be positive, got {0}")]
    NonPositiveAmount(Decimal),

    #[error("refund {refund} exceeds booking total {total}")]
    RefundExceedsTotal { refund: Decimal, total: Decimal },
}
