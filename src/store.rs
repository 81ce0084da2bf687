use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{DeskError, Result};
use crate::models::{
    ClientId, LedgerEntry, NewLedgerEntry, Transaction, TransactionDraft, TransactionId,
    TransactionState,
};

/// Which amount of a transaction to add up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    /// Foreign-currency amount
    Requested,
    /// Base-currency amount
    Base,
}

/// Storage for transactions and the ledger
///
/// Implementations must make every `&mut self` method all-or-nothing:
/// `mark_paid` in particular writes the state flip and the ledger entry
/// together or not at all. There is no delete operation; transactions are
/// financial records.
pub trait DeskStore: Send + Sync {
    /// Persist a new `Pending` transaction with a fresh id and UUID
    fn insert_transaction(
        &mut self,
        client_id: ClientId,
        draft: TransactionDraft,
        created_at: DateTime<Utc>,
    ) -> Result<Transaction>;

    fn transaction(&self, id: TransactionId) -> Result<Option<Transaction>>;

    fn transaction_by_uuid(&self, uuid: Uuid) -> Result<Option<Transaction>>;

    fn transactions_for_client(&self, client_id: ClientId) -> Result<Vec<Transaction>>;

    /// Sum of `aggregate` over the client's `Pending` and `Paid` transactions
    /// in `currency` created at or after `since`
    fn sum_since(
        &self,
        client_id: ClientId,
        currency: &str,
        since: DateTime<Utc>,
        aggregate: Aggregate,
    ) -> Result<Decimal>;

    /// Move a transaction to `next`, honouring the allowed-transition table
    fn update_state(&mut self, id: TransactionId, next: TransactionState) -> Result<Transaction>;

    /// Flip a `Pending` transaction to `Paid` and record its ledger entry
    fn mark_paid(
        &mut self,
        id: TransactionId,
        entry: NewLedgerEntry,
    ) -> Result<(Transaction, LedgerEntry)>;

    fn ledger_entry_for(&self, id: TransactionId) -> Result<Option<LedgerEntry>>;

    fn ledger_entries(&self) -> Result<Vec<LedgerEntry>>;
}

/// Id sequences, shareable between stores so ids stay unique across shards
#[derive(Debug, Clone, Default)]
pub struct Sequences {
    transactions: Arc<AtomicU64>,
    ledger: Arc<AtomicU64>,
}

impl Sequences {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_transaction(&self) -> TransactionId {
        self.transactions.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn next_ledger(&self) -> u64 {
        self.ledger.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    transactions: HashMap<TransactionId, Transaction>,
    uuids: HashMap<Uuid, TransactionId>,
    ledger: Vec<LedgerEntry>,
    /// transaction id -> index into `ledger`
    ledger_index: HashMap<TransactionId, usize>,
    sequences: Sequences,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sequences(sequences: Sequences) -> Self {
        Self {
            sequences,
            ..Self::default()
        }
    }

    fn existing(&self, id: TransactionId) -> Result<&Transaction> {
        self.transactions
            .get(&id)
            .ok_or_else(|| DeskError::TransactionNotFound(id.to_string()))
    }
}

impl DeskStore for MemoryStore {
    fn insert_transaction(
        &mut self,
        client_id: ClientId,
        draft: TransactionDraft,
        created_at: DateTime<Utc>,
    ) -> Result<Transaction> {
        let transaction = Transaction {
            id: self.sequences.next_transaction(),
            uuid: Uuid::new_v4(),
            client_id,
            currency: draft.currency,
            kind: draft.kind,
            requested_amount: draft.requested_amount,
            base_amount: draft.base_amount,
            applied_rate: draft.applied_rate,
            commission: draft.commission,
            payment_method: draft.payment_method,
            state: TransactionState::Pending,
            created_at,
        };
        self.uuids.insert(transaction.uuid, transaction.id);
        self.transactions
            .insert(transaction.id, transaction.clone());
        Ok(transaction)
    }

    fn transaction(&self, id: TransactionId) -> Result<Option<Transaction>> {
        Ok(self.transactions.get(&id).cloned())
    }

    fn transaction_by_uuid(&self, uuid: Uuid) -> Result<Option<Transaction>> {
        Ok(self
            .uuids
            .get(&uuid)
            .and_then(|id| self.transactions.get(id))
            .cloned())
    }

    fn transactions_for_client(&self, client_id: ClientId) -> Result<Vec<Transaction>> {
        let mut found: Vec<Transaction> = self
            .transactions
            .values()
            .filter(|t| t.client_id == client_id)
            .cloned()
            .collect();
        found.sort_by_key(|t| t.id);
        Ok(found)
    }

    fn sum_since(
        &self,
        client_id: ClientId,
        currency: &str,
        since: DateTime<Utc>,
        aggregate: Aggregate,
    ) -> Result<Decimal> {
        self.transactions
            .values()
            .filter(|t| {
                t.client_id == client_id
                    && t.currency == currency
                    && t.created_at >= since
                    && t.state.counts_toward_limits()
            })
            .map(|t| match aggregate {
                Aggregate::Requested => t.requested_amount,
                Aggregate::Base => t.base_amount,
            })
            .try_fold(Decimal::ZERO, |total, amount| total.checked_add(amount))
            .ok_or(DeskError::AmountOverflow("running total"))
    }

    fn update_state(&mut self, id: TransactionId, next: TransactionState) -> Result<Transaction> {
        let current = self.existing(id)?;
        if !current.state.can_transition_to(next) {
            return Err(DeskError::InvalidState {
                transaction: current.uuid,
                state: current.state,
                action: "transition",
            });
        }
        let transaction = self
            .transactions
            .get_mut(&id)
            .ok_or_else(|| DeskError::TransactionNotFound(id.to_string()))?;
        transaction.state = next;
        Ok(transaction.clone())
    }

    fn mark_paid(
        &mut self,
        id: TransactionId,
        entry: NewLedgerEntry,
    ) -> Result<(Transaction, LedgerEntry)> {
        // Check everything before touching anything
        let current = self.existing(id)?;
        if !current.state.can_transition_to(TransactionState::Paid) {
            return Err(DeskError::InvalidState {
                transaction: current.uuid,
                state: current.state,
                action: "confirm",
            });
        }
        if self.ledger_index.contains_key(&id) {
            return Err(DeskError::Storage(format!(
                "transaction {id} already has a ledger entry"
            )));
        }

        let ledger_entry = LedgerEntry {
            id: self.sequences.next_ledger(),
            transaction_id: Some(id),
            client_id: entry.client_id,
            direction: entry.direction,
            amount: entry.amount,
            accreditation_method: entry.accreditation_method,
            created_at: entry.created_at,
        };
        let transaction = self
            .transactions
            .get_mut(&id)
            .ok_or_else(|| DeskError::TransactionNotFound(id.to_string()))?;
        transaction.state = TransactionState::Paid;
        let transaction = transaction.clone();

        self.ledger_index.insert(id, self.ledger.len());
        self.ledger.push(ledger_entry.clone());
        Ok((transaction, ledger_entry))
    }

    fn ledger_entry_for(&self, id: TransactionId) -> Result<Option<LedgerEntry>> {
        Ok(self
            .ledger_index
            .get(&id)
            .and_then(|&index| self.ledger.get(index))
            .cloned())
    }

    fn ledger_entries(&self) -> Result<Vec<LedgerEntry>> {
        Ok(self.ledger.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Direction, OperationKind};
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn draft(currency: &str, requested: Decimal) -> TransactionDraft {
        TransactionDraft {
            currency: currency.to_string(),
            kind: OperationKind::Buy,
            requested_amount: requested,
            applied_rate: dec!(7000),
            commission: dec!(0),
            base_amount: requested * dec!(7000),
            payment_method: None,
        }
    }

    fn entry(amount: Decimal) -> NewLedgerEntry {
        NewLedgerEntry {
            client_id: 1,
            direction: Direction::Debit,
            amount,
            accreditation_method: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_insert_assigns_ids_and_uuid() {
        let mut store = MemoryStore::new();
        let now = Utc::now();
        let first = store.insert_transaction(1, draft("USD", dec!(10)), now).unwrap();
        let second = store.insert_transaction(1, draft("USD", dec!(20)), now).unwrap();

        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert_ne!(first.uuid, second.uuid);
        assert_eq!(first.state, TransactionState::Pending);
        assert_eq!(store.transaction_by_uuid(second.uuid).unwrap(), Some(second));
    }

    #[test]
    fn test_shared_sequences_stay_unique() {
        let sequences = Sequences::new();
        let mut a = MemoryStore::with_sequences(sequences.clone());
        let mut b = MemoryStore::with_sequences(sequences);
        let now = Utc::now();

        let t1 = a.insert_transaction(1, draft("USD", dec!(1)), now).unwrap();
        let t2 = b.insert_transaction(2, draft("USD", dec!(1)), now).unwrap();
        assert_ne!(t1.id, t2.id);
    }

    #[test]
    fn test_sum_since_skips_cancelled_and_old() {
        let mut store = MemoryStore::new();
        let now = Utc.with_ymd_and_hms(2025, 4, 10, 12, 0, 0).unwrap();

        store.insert_transaction(1, draft("USD", dec!(10)), now).unwrap();
        let cancelled = store.insert_transaction(1, draft("USD", dec!(20)), now).unwrap();
        store
            .update_state(cancelled.id, TransactionState::Cancelled)
            .unwrap();
        store
            .insert_transaction(1, draft("USD", dec!(40)), now - Duration::days(30))
            .unwrap();
        store.insert_transaction(1, draft("EUR", dec!(80)), now).unwrap();
        store.insert_transaction(2, draft("USD", dec!(160)), now).unwrap();

        let since = now - Duration::days(1);
        assert_eq!(
            store.sum_since(1, "USD", since, Aggregate::Requested).unwrap(),
            dec!(10)
        );
        assert_eq!(
            store.sum_since(1, "USD", since, Aggregate::Base).unwrap(),
            dec!(70000)
        );
    }

    #[test]
    fn test_mark_paid_is_all_or_nothing() {
        let mut store = MemoryStore::new();
        let t = store
            .insert_transaction(1, draft("USD", dec!(10)), Utc::now())
            .unwrap();

        let (paid, ledger) = store.mark_paid(t.id, entry(dec!(70000))).unwrap();
        assert_eq!(paid.state, TransactionState::Paid);
        assert_eq!(ledger.transaction_id, Some(t.id));

        let again = store.mark_paid(t.id, entry(dec!(70000)));
        assert!(matches!(again, Err(DeskError::InvalidState { .. })));
        assert_eq!(store.ledger_entries().unwrap().len(), 1);
        assert_eq!(store.ledger_entry_for(t.id).unwrap(), Some(ledger));
    }

    #[test]
    fn test_update_state_rejects_leaving_terminal_state() {
        let mut store = MemoryStore::new();
        let t = store
            .insert_transaction(1, draft("USD", dec!(10)), Utc::now())
            .unwrap();
        store.update_state(t.id, TransactionState::Annulled).unwrap();

        let result = store.update_state(t.id, TransactionState::Pending);
        assert!(matches!(
            result,
            Err(DeskError::InvalidState {
                state: TransactionState::Annulled,
                ..
            })
        ));
        assert!(matches!(
            store.update_state(99, TransactionState::Paid),
            Err(DeskError::TransactionNotFound(_))
        ));
    }
}
