use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::client::ClientId;
use super::transaction::TransactionId;

pub type AccreditationMethodId = u32;

/// Side of a ledger movement in base currency
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    /// Client pays the house
    Debit,
    /// House pays the client
    Credit,
}

/// Immutable money movement caused by a paid transaction
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LedgerEntry {
    pub id: u64,
    /// `None` only for manual adjustments made outside the desk
    pub transaction_id: Option<TransactionId>,
    pub client_id: ClientId,
    pub direction: Direction,
    pub amount: Decimal,
    pub accreditation_method: Option<AccreditationMethodId>,
    pub created_at: DateTime<Utc>,
}

/// Ledger entry waiting to be written together with its state flip
#[derive(Debug, Clone, PartialEq)]
pub struct NewLedgerEntry {
    pub client_id: ClientId,
    pub direction: Direction,
    pub amount: Decimal,
    pub accreditation_method: Option<AccreditationMethodId>,
    pub created_at: DateTime<Utc>,
}
