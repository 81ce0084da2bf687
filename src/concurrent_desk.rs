use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::DeskConfig;
use crate::desk::{ExchangeDesk, Requote};
use crate::error::{DeskError, Result};
use crate::limits::LimitValidator;
use crate::models::{
    Client, ClientId, Currency, LedgerEntry, OperationKind, PaymentMethodId, Transaction,
    TransactionDraft,
};
use crate::otp::{OtpHandle, OtpService, UserId};
use crate::pricing::{PriceQuote, PricingEngine};
use crate::store::{MemoryStore, Sequences};

/// Thread-safe desk sharded by client
///
/// Clients are distributed across shards by `client_id % num_shards`, so
/// every transaction of a client lives behind one mutex. Holding that mutex
/// is what makes a limit check and the insert that follows it atomic: two
/// concurrent requests for the same client cannot both read a stale running
/// total. Confirmations take the same lock, so a retried webhook and a manual
/// confirmation racing each other see each other's writes.
///
/// Lock order is always shard, then the uuid index or the OTP service.
///
/// # Example
///
/// ```no_run
/// # use exchange_desk::concurrent_desk::ShardedDesk;
/// # async fn webhook(desk: ShardedDesk, reference: uuid::Uuid) {
/// // Safe to call again when the payment processor redelivers
/// let paid = desk.handle_payment_webhook(reference).await.unwrap();
/// # }
/// ```
pub struct ShardedDesk {
    shards: Vec<Arc<Mutex<ExchangeDesk<MemoryStore>>>>,
    /// Transaction uuid -> shard holding it
    index: Arc<RwLock<HashMap<Uuid, usize>>>,
    otp: Arc<Mutex<OtpService>>,
    pricing: Arc<PricingEngine>,
    num_shards: usize,
}

impl ShardedDesk {
    /// Create a desk with `num_shards` independent shards
    pub fn new(
        num_shards: usize,
        pricing: Arc<PricingEngine>,
        validator: Arc<LimitValidator>,
        clock: Arc<dyn Clock>,
        config: &DeskConfig,
        otp: OtpService,
    ) -> Self {
        assert!(num_shards > 0, "num_shards must be at least 1");

        let sequences = Sequences::new();
        let shards = (0..num_shards)
            .map(|_| {
                let desk = ExchangeDesk::new(
                    MemoryStore::with_sequences(sequences.clone()),
                    pricing.clone(),
                    validator.clone(),
                    clock.clone(),
                    config,
                );
                Arc::new(Mutex::new(desk))
            })
            .collect();

        Self {
            shards,
            index: Arc::new(RwLock::new(HashMap::new())),
            otp: Arc::new(Mutex::new(otp)),
            pricing,
            num_shards,
        }
    }

    fn shard_for_client(&self, client_id: ClientId) -> usize {
        (client_id as usize) % self.num_shards
    }

    async fn shard_for_transaction(&self, uuid: Uuid) -> Result<usize> {
        self.index
            .read()
            .await
            .get(&uuid)
            .copied()
            .ok_or_else(|| DeskError::TransactionNotFound(uuid.to_string()))
    }

    /// Price an operation; takes no lock
    pub fn quote(
        &self,
        client: &Client,
        kind: OperationKind,
        currency: &Currency,
        requested_amount: Decimal,
    ) -> Result<PriceQuote> {
        self.pricing.price(client, kind, currency, requested_amount)
    }

    pub async fn create(&self, client: &Client, draft: TransactionDraft) -> Result<Transaction> {
        let shard_id = self.shard_for_client(client.id);
        let mut desk = self.shards[shard_id].lock().await;
        let transaction = desk.create(client, draft)?;
        self.index.write().await.insert(transaction.uuid, shard_id);
        Ok(transaction)
    }

    /// Price and create under the client's shard lock
    pub async fn open(
        &self,
        client: &Client,
        kind: OperationKind,
        currency: &Currency,
        requested_amount: Decimal,
        payment_method: Option<PaymentMethodId>,
    ) -> Result<Transaction> {
        let shard_id = self.shard_for_client(client.id);
        let mut desk = self.shards[shard_id].lock().await;
        let transaction = desk.open(client, kind, currency, requested_amount, payment_method)?;
        self.index.write().await.insert(transaction.uuid, shard_id);
        Ok(transaction)
    }

    pub async fn confirm(&self, uuid: Uuid) -> Result<Transaction> {
        let shard_id = self.shard_for_transaction(uuid).await?;
        let mut desk = self.shards[shard_id].lock().await;
        let id = Self::id_in(&desk, uuid)?;
        desk.confirm(id)
    }

    /// Entry point for a verified "paid" signal from the payment processor
    ///
    /// Redeliveries of the same signal return the already-paid transaction
    /// without posting a second ledger entry.
    pub async fn handle_payment_webhook(&self, uuid: Uuid) -> Result<Transaction> {
        log::info!("Payment confirmation received for {}", uuid);
        self.confirm(uuid).await
    }

    pub async fn requote(&self, client: &Client, uuid: Uuid) -> Result<Requote> {
        let shard_id = self.shard_for_transaction(uuid).await?;
        let desk = self.shards[shard_id].lock().await;
        let id = Self::id_in(&desk, uuid)?;
        desk.requote(client, id)
    }

    pub async fn cancel(&self, uuid: Uuid) -> Result<Transaction> {
        let shard_id = self.shard_for_transaction(uuid).await?;
        let mut desk = self.shards[shard_id].lock().await;
        let id = Self::id_in(&desk, uuid)?;
        desk.cancel(id)
    }

    pub async fn request_debit_otp(
        &self,
        user: UserId,
        uuid: Uuid,
        destination: &str,
    ) -> Result<OtpHandle> {
        let shard_id = self.shard_for_transaction(uuid).await?;
        let mut desk = self.shards[shard_id].lock().await;
        let id = Self::id_in(&desk, uuid)?;
        let mut otp = self.otp.lock().await;
        desk.request_debit_otp(&mut otp, user, id, destination)
    }

    pub async fn confirm_with_otp(&self, uuid: Uuid, user: UserId, code: &str) -> Result<Transaction> {
        let shard_id = self.shard_for_transaction(uuid).await?;
        let mut desk = self.shards[shard_id].lock().await;
        let id = Self::id_in(&desk, uuid)?;
        let mut otp = self.otp.lock().await;
        desk.confirm_with_otp(&mut otp, id, user, code)
    }

    pub async fn transaction(&self, uuid: Uuid) -> Result<Option<Transaction>> {
        let Ok(shard_id) = self.shard_for_transaction(uuid).await else {
            return Ok(None);
        };
        self.shards[shard_id].lock().await.transaction_by_uuid(uuid)
    }

    pub async fn ledger_entry_for(&self, uuid: Uuid) -> Result<Option<LedgerEntry>> {
        let shard_id = self.shard_for_transaction(uuid).await?;
        let desk = self.shards[shard_id].lock().await;
        let id = Self::id_in(&desk, uuid)?;
        desk.ledger_entry_for(id)
    }

    pub async fn transactions_for_client(&self, client_id: ClientId) -> Result<Vec<Transaction>> {
        let shard_id = self.shard_for_client(client_id);
        self.shards[shard_id]
            .lock()
            .await
            .transactions_for_client(client_id)
    }

    /// Ledger entries from every shard, ordered by entry id
    pub async fn ledger_entries(&self) -> Result<Vec<LedgerEntry>> {
        let futures: Vec<_> = self
            .shards
            .iter()
            .map(|shard| async move { shard.lock().await.ledger_entries() })
            .collect();

        let mut entries = Vec::new();
        for shard_entries in futures::future::join_all(futures).await {
            entries.extend(shard_entries?);
        }
        entries.sort_by_key(|e| e.id);
        Ok(entries)
    }

    /// Another handle to the same shards, for sharing across tasks
    pub fn clone_handle(&self) -> Self {
        Self {
            shards: self.shards.clone(),
            index: self.index.clone(),
            otp: self.otp.clone(),
            pricing: self.pricing.clone(),
            num_shards: self.num_shards,
        }
    }

    pub fn num_shards(&self) -> usize {
        self.num_shards
    }

    fn id_in(desk: &ExchangeDesk<MemoryStore>, uuid: Uuid) -> Result<u64> {
        desk.transaction_by_uuid(uuid)?
            .map(|t| t.id)
            .ok_or_else(|| DeskError::TransactionNotFound(uuid.to_string()))
    }
}
