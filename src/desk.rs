use std::sync::Arc;

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::DeskConfig;
use crate::error::{DeskError, Result};
use crate::limits::LimitValidator;
use crate::models::{
    AccreditationMethodId, Client, ClientId, Currency, LedgerEntry, NewLedgerEntry,
    OperationKind, PaymentMethodId, Transaction, TransactionDraft, TransactionId,
    TransactionState,
};
use crate::otp::{OtpContext, OtpHandle, OtpService, UserId, TRANSACTION_DEBIT};
use crate::pricing::{PriceQuote, PricingEngine};
use crate::store::DeskStore;

/// A stored transaction priced again against the current market
#[derive(Debug, Clone, PartialEq)]
pub struct Requote {
    pub transaction: TransactionId,
    /// Rate the transaction was created with
    pub stored_rate: Decimal,
    pub current: PriceQuote,
    pub rate_changed: bool,
}

/// Transaction lifecycle manager
///
/// Owns the `PENDING -> PAID | CANCELLED` state machine and the ledger
/// entries it posts. Every mutating method takes `&mut self`, so limit
/// validation and the insert that follows it, or the state check and the
/// confirmation write, always run as one exclusive section. For concurrent
/// use wrap desks in a [`ShardedDesk`](crate::concurrent_desk::ShardedDesk).
pub struct ExchangeDesk<S: DeskStore> {
    store: S,
    pricing: Arc<PricingEngine>,
    validator: Arc<LimitValidator>,
    clock: Arc<dyn Clock>,
    ledger_includes_commission: bool,
}

impl<S: DeskStore> ExchangeDesk<S> {
    pub fn new(
        store: S,
        pricing: Arc<PricingEngine>,
        validator: Arc<LimitValidator>,
        clock: Arc<dyn Clock>,
        config: &DeskConfig,
    ) -> Self {
        Self {
            store,
            pricing,
            validator,
            clock,
            ledger_includes_commission: config.ledger_includes_commission,
        }
    }

    /// Price an operation without creating anything
    pub fn quote(
        &self,
        client: &Client,
        kind: OperationKind,
        currency: &Currency,
        requested_amount: Decimal,
    ) -> Result<PriceQuote> {
        self.pricing.price(client, kind, currency, requested_amount)
    }

    /// Validate limits and persist a new `Pending` transaction
    pub fn create(&mut self, client: &Client, draft: TransactionDraft) -> Result<Transaction> {
        self.check_amounts(&draft)?;

        let now = self.clock.now();
        self.validator.validate(
            &self.store,
            client,
            &draft.currency,
            draft.requested_amount,
            draft.base_amount,
            now,
        )?;

        let transaction = self.store.insert_transaction(client.id, draft, now)?;
        log::info!(
            "Created {} transaction {} for client {}: {} {} = {}",
            transaction.kind,
            transaction.uuid,
            transaction.client_id,
            transaction.requested_amount,
            transaction.currency,
            transaction.base_amount
        );
        Ok(transaction)
    }

    /// Price and create in one step
    pub fn open(
        &mut self,
        client: &Client,
        kind: OperationKind,
        currency: &Currency,
        requested_amount: Decimal,
        payment_method: Option<PaymentMethodId>,
    ) -> Result<Transaction> {
        let quote = self.quote(client, kind, currency, requested_amount)?;
        self.create(client, quote.into_draft(payment_method))
    }

    /// Mark a pending transaction paid and post its ledger entry
    ///
    /// Confirming a transaction that is already paid returns it unchanged.
    pub fn confirm(&mut self, id: TransactionId) -> Result<Transaction> {
        self.confirm_with_accreditation(id, None)
    }

    pub fn confirm_with_accreditation(
        &mut self,
        id: TransactionId,
        accreditation_method: Option<AccreditationMethodId>,
    ) -> Result<Transaction> {
        let transaction = self.existing(id)?;
        match transaction.state {
            TransactionState::Paid => {
                log::debug!("Transaction {} already paid", transaction.uuid);
                Ok(transaction)
            }
            TransactionState::Pending => {
                let amount = if self.ledger_includes_commission {
                    transaction
                        .base_amount
                        .checked_add(transaction.commission)
                        .ok_or(DeskError::AmountOverflow("ledger amount"))?
                } else {
                    transaction.base_amount
                };
                let entry = NewLedgerEntry {
                    client_id: transaction.client_id,
                    direction: transaction.kind.ledger_direction(),
                    amount,
                    accreditation_method,
                    created_at: self.clock.now(),
                };
                let (paid, ledger_entry) = self.store.mark_paid(id, entry)?;
                log::info!(
                    "Confirmed transaction {}: {:?} {} for client {}",
                    paid.uuid,
                    ledger_entry.direction,
                    ledger_entry.amount,
                    paid.client_id
                );
                Ok(paid)
            }
            state => Err(DeskError::InvalidState {
                transaction: transaction.uuid,
                state,
                action: "confirm",
            }),
        }
    }

    /// Price a pending transaction again with today's rate, commission and discount
    ///
    /// Nothing is written. `client` must own the transaction; its segment
    /// drives the discount just as it did at creation.
    pub fn requote(&self, client: &Client, id: TransactionId) -> Result<Requote> {
        let transaction = self.existing(id)?;
        if transaction.client_id != client.id {
            return Err(DeskError::TransactionNotFound(id.to_string()));
        }
        if transaction.state != TransactionState::Pending {
            return Err(DeskError::InvalidState {
                transaction: transaction.uuid,
                state: transaction.state,
                action: "requote",
            });
        }

        let current = self.pricing.reprice(
            client,
            transaction.kind,
            &transaction.currency,
            transaction.requested_amount,
        )?;
        let rate_changed = current.applied_rate != transaction.applied_rate;
        if rate_changed {
            log::info!(
                "Rate for transaction {} moved from {} to {}",
                transaction.uuid,
                transaction.applied_rate,
                current.applied_rate
            );
        }
        Ok(Requote {
            transaction: id,
            stored_rate: transaction.applied_rate,
            current,
            rate_changed,
        })
    }

    /// Abort a pending transaction. No ledger effect.
    pub fn cancel(&mut self, id: TransactionId) -> Result<Transaction> {
        let transaction = self.existing(id)?;
        if transaction.state != TransactionState::Pending {
            return Err(DeskError::InvalidState {
                transaction: transaction.uuid,
                state: transaction.state,
                action: "cancel",
            });
        }
        let cancelled = self.store.update_state(id, TransactionState::Cancelled)?;
        log::info!("Cancelled transaction {}", cancelled.uuid);
        Ok(cancelled)
    }

    /// Issue the OTP that authorises confirming a pending buy
    pub fn request_debit_otp(
        &mut self,
        gate: &mut OtpService,
        user: UserId,
        id: TransactionId,
        destination: &str,
    ) -> Result<OtpHandle> {
        let transaction = self.existing(id)?;
        Self::ensure_debit(&transaction)?;
        if transaction.state != TransactionState::Pending {
            return Err(DeskError::InvalidState {
                transaction: transaction.uuid,
                state: transaction.state,
                action: "authorise",
            });
        }
        Ok(gate.issue(
            user,
            TRANSACTION_DEBIT,
            destination,
            None,
            debit_context(&transaction),
        )?)
    }

    /// Verify the debit OTP bound to this transaction, then confirm it
    pub fn confirm_with_otp(
        &mut self,
        gate: &mut OtpService,
        id: TransactionId,
        user: UserId,
        code: &str,
    ) -> Result<Transaction> {
        let transaction = self.existing(id)?;
        Self::ensure_debit(&transaction)?;
        match transaction.state {
            TransactionState::Paid => return Ok(transaction),
            TransactionState::Pending => {}
            state => {
                return Err(DeskError::InvalidState {
                    transaction: transaction.uuid,
                    state,
                    action: "confirm",
                })
            }
        }

        gate.verify(user, TRANSACTION_DEBIT, code, Some(&debit_context(&transaction)))?;
        self.confirm(id)
    }

    pub fn transaction(&self, id: TransactionId) -> Result<Option<Transaction>> {
        self.store.transaction(id)
    }

    pub fn transaction_by_uuid(&self, uuid: Uuid) -> Result<Option<Transaction>> {
        self.store.transaction_by_uuid(uuid)
    }

    pub fn transactions_for_client(&self, client_id: ClientId) -> Result<Vec<Transaction>> {
        self.store.transactions_for_client(client_id)
    }

    pub fn ledger_entry_for(&self, id: TransactionId) -> Result<Option<LedgerEntry>> {
        self.store.ledger_entry_for(id)
    }

    pub fn ledger_entries(&self) -> Result<Vec<LedgerEntry>> {
        self.store.ledger_entries()
    }

    /// Direct store access for back-office tooling (e.g. annulment)
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    fn existing(&self, id: TransactionId) -> Result<Transaction> {
        self.store
            .transaction(id)?
            .ok_or_else(|| DeskError::TransactionNotFound(id.to_string()))
    }

    fn ensure_debit(transaction: &Transaction) -> Result<()> {
        if transaction.kind != OperationKind::Buy {
            return Err(DeskError::OtpNotApplicable(transaction.uuid));
        }
        Ok(())
    }

    /// Reject drafts whose base amount does not follow from amount x rate
    fn check_amounts(&self, draft: &TransactionDraft) -> Result<()> {
        if draft.requested_amount <= Decimal::ZERO {
            return Err(DeskError::InvalidAmount(draft.requested_amount));
        }
        let inconsistent = || DeskError::InconsistentAmounts {
            requested_amount: draft.requested_amount,
            applied_rate: draft.applied_rate,
            base_amount: draft.base_amount,
        };
        if draft.applied_rate <= Decimal::ZERO || draft.commission < Decimal::ZERO {
            return Err(inconsistent());
        }

        let expected = draft
            .requested_amount
            .checked_mul(draft.applied_rate)
            .map(|amount| self.pricing.round_base(amount))
            .ok_or(DeskError::AmountOverflow("base amount"))?;
        let tolerance = Decimal::try_new(1, self.pricing.base_decimals()).map_err(|_| {
            DeskError::Config(format!(
                "base_decimals {} exceeds decimal precision",
                self.pricing.base_decimals()
            ))
        })?;
        match expected.checked_sub(draft.base_amount) {
            Some(diff) if diff.abs() <= tolerance => Ok(()),
            _ => Err(inconsistent()),
        }
    }
}

/// Facts a debit OTP is bound to
fn debit_context(transaction: &Transaction) -> OtpContext {
    OtpContext::from([
        ("transaction".to_string(), transaction.uuid.to_string()),
        ("client_id".to_string(), transaction.client_id.to_string()),
        ("amount".to_string(), transaction.base_amount.to_string()),
    ])
}
