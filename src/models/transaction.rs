use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::client::ClientId;
use super::ledger::Direction;
use crate::error::DeskError;

pub type TransactionId = u64;
pub type PaymentMethodId = u32;

/// Side of the exchange operation, seen from the client
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationKind {
    /// Client buys foreign currency and pays base currency
    Buy,
    /// Client sells foreign currency and receives base currency
    Sell,
}

impl OperationKind {
    /// Direction of the ledger entry posted when a transaction of this kind is paid
    pub fn ledger_direction(self) -> Direction {
        match self {
            OperationKind::Buy => Direction::Debit,
            OperationKind::Sell => Direction::Credit,
        }
    }
}

impl FromStr for OperationKind {
    type Err = DeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" | "COMPRA" => Ok(OperationKind::Buy),
            "SELL" | "VENTA" => Ok(OperationKind::Sell),
            _ => Err(DeskError::InvalidOperationKind(s.to_string())),
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Buy => f.write_str("BUY"),
            OperationKind::Sell => f.write_str("SELL"),
        }
    }
}

/// Lifecycle state of a transaction
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionState {
    Pending,
    Paid,
    Cancelled,
    /// Administrative voidance, set by back-office tooling only
    Annulled,
}

impl TransactionState {
    /// Allowed transitions. Every state except `Pending` is terminal.
    pub fn can_transition_to(self, next: TransactionState) -> bool {
        matches!(
            (self, next),
            (
                TransactionState::Pending,
                TransactionState::Paid | TransactionState::Cancelled | TransactionState::Annulled
            )
        )
    }

    pub fn is_terminal(self) -> bool {
        self != TransactionState::Pending
    }

    /// Whether the transaction still counts against spending limits
    pub fn counts_toward_limits(self) -> bool {
        matches!(self, TransactionState::Pending | TransactionState::Paid)
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionState::Pending => "PENDING",
            TransactionState::Paid => "PAID",
            TransactionState::Cancelled => "CANCELLED",
            TransactionState::Annulled => "ANNULLED",
        };
        f.write_str(s)
    }
}

/// Persisted buy or sell request
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Transaction {
    pub id: TransactionId,
    pub uuid: Uuid,
    pub client_id: ClientId,
    pub currency: String,
    pub kind: OperationKind,
    pub requested_amount: Decimal,
    pub base_amount: Decimal,
    pub applied_rate: Decimal,
    /// Total commission charged, in base currency
    pub commission: Decimal,
    pub payment_method: Option<PaymentMethodId>,
    pub state: TransactionState,
    pub created_at: DateTime<Utc>,
}

/// Figures for a transaction that has not been persisted yet
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionDraft {
    pub currency: String,
    pub kind: OperationKind,
    pub requested_amount: Decimal,
    pub applied_rate: Decimal,
    pub commission: Decimal,
    pub base_amount: Decimal,
    pub payment_method: Option<PaymentMethodId>,
}
