use super::{plan_postings, plan_reward};
use crate::domain::charge::{ChargeLookup, ChargeOutcome, ChargeTarget, ExternalChargeRecord};
use crate::domain::meter::GasMeter;
use crate::domain::money::{Balance, Units};
use crate::domain::order::{Sale, SaleStatus};
use crate::domain::ports::{ChargeStore, MeterStore, RewardStore, SaleStore, WalletStore};
use crate::domain::reward::{RewardEntry, pool_balance};
use crate::domain::wallet::{Posting, TransactionStatus, Wallet, WalletTransaction, WalletType};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use chrono::Utc;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

pub const CF_WALLETS: &str = "wallets";
pub const CF_WALLET_INDEX: &str = "wallet_index";
pub const CF_TRANSACTIONS: &str = "transactions";
pub const CF_REWARDS: &str = "rewards";
pub const CF_SALES: &str = "sales";
pub const CF_METERS: &str = "meters";
pub const CF_METER_INDEX: &str = "meter_index";
pub const CF_CHARGES: &str = "charges";
pub const CF_CHARGE_INDEX: &str = "charge_index";

const COLUMN_FAMILIES: [&str; 9] = [
    CF_WALLETS,
    CF_WALLET_INDEX,
    CF_TRANSACTIONS,
    CF_REWARDS,
    CF_SALES,
    CF_METERS,
    CF_METER_INDEX,
    CF_CHARGES,
    CF_CHARGE_INDEX,
];

/// A persistent store implementation using RocksDB.
///
/// Each entity lives in its own Column Family. Log-like tables
/// (transactions, rewards) are keyed `owner ++ id` so a prefix scan returns
/// one wallet's or consumer's rows.
///
/// Mutations are serialised through `write_lock` and committed as a single
/// `WriteBatch`, so a check-then-write is atomic within the process.
/// `Clone` shares the underlying `Arc<DB>`.
#[derive(Clone)]
pub struct RocksDbStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

impl RocksDbStore {
    /// Opens or creates a RocksDB instance at `path`, creating any missing
    /// column families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            PaymentError::StorageError(format!("column family '{name}' not found"))
        })
    }

    fn get_json<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        match self.db.get_cf(self.cf(cf)?, key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan_prefix<T: DeserializeOwned>(&self, cf: &str, prefix: &[u8]) -> Result<Vec<T>> {
        let handle = self.cf(cf)?;
        let mut rows = Vec::new();
        for item in self
            .db
            .iterator_cf(handle, IteratorMode::From(prefix, Direction::Forward))
        {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            rows.push(decode(&value)?);
        }
        Ok(rows)
    }

    fn scan_all<T: DeserializeOwned>(&self, cf: &str) -> Result<Vec<T>> {
        self.scan_prefix(cf, &[])
    }

    fn put_json<T: Serialize>(&self, batch: &mut WriteBatch, cf: &str, key: &[u8], value: &T) -> Result<()> {
        batch.put_cf(self.cf(cf)?, key, encode(value)?);
        Ok(())
    }

    fn pool(&self, consumer_id: Uuid) -> Result<Units> {
        let entries: Vec<RewardEntry> = self.scan_prefix(CF_REWARDS, consumer_id.as_bytes())?;
        Ok(pool_balance(&entries))
    }

    fn lookup_reference(&self, lookup: &ChargeLookup) -> Result<Option<String>> {
        if let Some(gateway_id) = &lookup.gateway_transaction_id
            && let Some(bytes) = self.db.get_cf(self.cf(CF_CHARGE_INDEX)?, gateway_id.as_bytes())?
        {
            return Ok(Some(String::from_utf8_lossy(&bytes).into_owned()));
        }
        match &lookup.reference {
            Some(reference) if self.db.get_cf(self.cf(CF_CHARGES)?, reference.as_bytes())?.is_some() => {
                Ok(Some(reference.clone()))
            }
            _ => Ok(None),
        }
    }
}

fn compound_key(owner: Uuid, id: Uuid) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(owner.as_bytes());
    key.extend_from_slice(id.as_bytes());
    key
}

fn wallet_index_key(owner_id: Uuid, wallet_type: WalletType) -> Vec<u8> {
    let mut key = owner_id.as_bytes().to_vec();
    key.extend_from_slice(wallet_type.as_str().as_bytes());
    key
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value)
        .map_err(|e| PaymentError::StorageError(format!("Serialization error: {e}")))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| PaymentError::StorageError(format!("Deserialization error: {e}")))
}

#[async_trait]
impl WalletStore for RocksDbStore {
    async fn get_or_create_wallet(&self, owner_id: Uuid, wallet_type: WalletType) -> Result<Wallet> {
        let _guard = self.write_lock.lock().await;
        let index_key = wallet_index_key(owner_id, wallet_type);
        if let Some(id) = self.db.get_cf(self.cf(CF_WALLET_INDEX)?, &index_key)?
            && let Some(wallet) = self.get_json(CF_WALLETS, &id)?
        {
            return Ok(wallet);
        }

        let wallet = Wallet::new(owner_id, wallet_type);
        let mut batch = WriteBatch::default();
        self.put_json(&mut batch, CF_WALLETS, wallet.id.as_bytes(), &wallet)?;
        batch.put_cf(self.cf(CF_WALLET_INDEX)?, &index_key, wallet.id.as_bytes());
        self.db.write(batch)?;
        Ok(wallet)
    }

    async fn find_wallet(&self, owner_id: Uuid, wallet_type: WalletType) -> Result<Option<Wallet>> {
        match self
            .db
            .get_cf(self.cf(CF_WALLET_INDEX)?, wallet_index_key(owner_id, wallet_type))?
        {
            Some(id) => self.get_json(CF_WALLETS, &id),
            None => Ok(None),
        }
    }

    async fn get_wallet(&self, wallet_id: Uuid) -> Result<Option<Wallet>> {
        self.get_json(CF_WALLETS, wallet_id.as_bytes())
    }

    async fn all_wallets(&self) -> Result<Vec<Wallet>> {
        let mut wallets: Vec<Wallet> = self.scan_all(CF_WALLETS)?;
        wallets.sort_by_key(|w| (w.owner_id, w.wallet_type));
        Ok(wallets)
    }

    async fn commit_postings(&self, postings: &[Posting]) -> Result<Vec<WalletTransaction>> {
        let _guard = self.write_lock.lock().await;

        let mut wallets = std::collections::HashMap::new();
        for posting in postings {
            if let Some(wallet) = self.get_json::<Wallet>(CF_WALLETS, posting.wallet_id.as_bytes())? {
                wallets.insert(wallet.id, wallet);
            }
        }
        let planned = plan_postings(postings, |id| wallets.get(&id).map(|w| w.balance))?;

        let mut batch = WriteBatch::default();
        for (wallet_id, balance) in planned {
            if let Some(wallet) = wallets.get_mut(&wallet_id) {
                wallet.balance = balance;
                self.put_json(&mut batch, CF_WALLETS, wallet_id.as_bytes(), wallet)?;
            }
        }
        let mut written = Vec::with_capacity(postings.len());
        for posting in postings {
            let tx = posting.into_transaction();
            self.put_json(&mut batch, CF_TRANSACTIONS, &compound_key(tx.wallet_id, tx.id), &tx)?;
            written.push(tx);
        }
        self.db.write(batch)?;
        Ok(written)
    }

    async fn append_pending(&self, tx: WalletTransaction) -> Result<WalletTransaction> {
        let _guard = self.write_lock.lock().await;
        if self.get_json::<Wallet>(CF_WALLETS, tx.wallet_id.as_bytes())?.is_none() {
            return Err(PaymentError::NotFound(format!("wallet {}", tx.wallet_id)));
        }
        if !tx.is_pending() {
            return Err(PaymentError::ValidationError(
                "Only pending transactions can be reserved".to_string(),
            ));
        }
        let mut batch = WriteBatch::default();
        self.put_json(&mut batch, CF_TRANSACTIONS, &compound_key(tx.wallet_id, tx.id), &tx)?;
        self.db.write(batch)?;
        Ok(tx)
    }

    async fn transactions(&self, wallet_id: Uuid) -> Result<Vec<WalletTransaction>> {
        let mut txs: Vec<WalletTransaction> = self.scan_prefix(CF_TRANSACTIONS, wallet_id.as_bytes())?;
        txs.sort_by_key(|tx| tx.created_at);
        Ok(txs)
    }
}

#[async_trait]
impl RewardStore for RocksDbStore {
    async fn reward_entries(&self, consumer_id: Uuid) -> Result<Vec<RewardEntry>> {
        let mut entries: Vec<RewardEntry> = self.scan_prefix(CF_REWARDS, consumer_id.as_bytes())?;
        entries.sort_by_key(|e| e.created_at);
        Ok(entries)
    }

    async fn append_reward(&self, entry: RewardEntry) -> Result<Units> {
        let _guard = self.write_lock.lock().await;
        let next = plan_reward(self.pool(entry.consumer_id)?, &entry)?;
        let mut batch = WriteBatch::default();
        self.put_json(&mut batch, CF_REWARDS, &compound_key(entry.consumer_id, entry.id), &entry)?;
        self.db.write(batch)?;
        Ok(next)
    }
}

#[async_trait]
impl SaleStore for RocksDbStore {
    async fn insert_sale(&self, sale: Sale) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if self.get_json::<Sale>(CF_SALES, sale.id.as_bytes())?.is_some() {
            return Err(PaymentError::Conflict(format!("sale {} already exists", sale.id)));
        }
        let mut batch = WriteBatch::default();
        self.put_json(&mut batch, CF_SALES, sale.id.as_bytes(), &sale)?;
        self.db.write(batch)?;
        Ok(())
    }

    async fn get_sale(&self, sale_id: Uuid) -> Result<Option<Sale>> {
        self.get_json(CF_SALES, sale_id.as_bytes())
    }

    async fn transition_sale(
        &self,
        sale_id: Uuid,
        from: SaleStatus,
        to: SaleStatus,
        entry: Option<RewardEntry>,
    ) -> Result<Option<Sale>> {
        let _guard = self.write_lock.lock().await;
        let Some(mut sale) = self.get_json::<Sale>(CF_SALES, sale_id.as_bytes())? else {
            return Ok(None);
        };
        if sale.status != from {
            return Ok(None);
        }
        let mut batch = WriteBatch::default();
        if let Some(entry) = entry {
            plan_reward(self.pool(entry.consumer_id)?, &entry)?;
            self.put_json(&mut batch, CF_REWARDS, &compound_key(entry.consumer_id, entry.id), &entry)?;
        }
        sale.touch(to);
        self.put_json(&mut batch, CF_SALES, sale_id.as_bytes(), &sale)?;
        self.db.write(batch)?;
        Ok(Some(sale))
    }
}

#[async_trait]
impl MeterStore for RocksDbStore {
    async fn get_or_create_meter(&self, owner_id: Uuid, meter_number: &str) -> Result<GasMeter> {
        let _guard = self.write_lock.lock().await;
        if let Some(id) = self.db.get_cf(self.cf(CF_METER_INDEX)?, meter_number.as_bytes())?
            && let Some(meter) = self.get_json::<GasMeter>(CF_METERS, &id)?
        {
            if meter.owner_id != owner_id {
                return Err(PaymentError::Conflict(format!(
                    "meter {meter_number} is registered to another owner"
                )));
            }
            return Ok(meter);
        }
        let meter = GasMeter::new(owner_id, meter_number);
        let mut batch = WriteBatch::default();
        self.put_json(&mut batch, CF_METERS, meter.id.as_bytes(), &meter)?;
        batch.put_cf(self.cf(CF_METER_INDEX)?, meter_number.as_bytes(), meter.id.as_bytes());
        self.db.write(batch)?;
        Ok(meter)
    }

    async fn get_meter(&self, meter_id: Uuid) -> Result<Option<GasMeter>> {
        self.get_json(CF_METERS, meter_id.as_bytes())
    }

    async fn transfer_to_meter(&self, entry: RewardEntry, meter_id: Uuid) -> Result<(GasMeter, Units)> {
        let _guard = self.write_lock.lock().await;
        let mut meter = self
            .get_json::<GasMeter>(CF_METERS, meter_id.as_bytes())?
            .ok_or_else(|| PaymentError::NotFound(format!("meter {meter_id}")))?;
        let next = plan_reward(self.pool(entry.consumer_id)?, &entry)?;
        meter.credited_units = meter.credited_units + (-entry.units);

        let mut batch = WriteBatch::default();
        self.put_json(&mut batch, CF_REWARDS, &compound_key(entry.consumer_id, entry.id), &entry)?;
        self.put_json(&mut batch, CF_METERS, meter_id.as_bytes(), &meter)?;
        self.db.write(batch)?;
        Ok((meter, next))
    }
}

#[async_trait]
impl ChargeStore for RocksDbStore {
    async fn open_charge(
        &self,
        record: ExternalChargeRecord,
        pending_tx: Option<WalletTransaction>,
    ) -> Result<ExternalChargeRecord> {
        let _guard = self.write_lock.lock().await;
        if self
            .db
            .get_cf(self.cf(CF_CHARGES)?, record.reference.as_bytes())?
            .is_some()
        {
            return Err(PaymentError::Conflict(format!(
                "charge {} already exists",
                record.reference
            )));
        }

        let mut batch = WriteBatch::default();
        if let Some(tx) = pending_tx {
            if self.get_json::<Wallet>(CF_WALLETS, tx.wallet_id.as_bytes())?.is_none() {
                return Err(PaymentError::NotFound(format!("wallet {}", tx.wallet_id)));
            }
            self.put_json(&mut batch, CF_TRANSACTIONS, &compound_key(tx.wallet_id, tx.id), &tx)?;
        }
        self.put_json(&mut batch, CF_CHARGES, record.reference.as_bytes(), &record)?;
        if let Some(gateway_id) = &record.gateway_transaction_id {
            batch.put_cf(
                self.cf(CF_CHARGE_INDEX)?,
                gateway_id.as_bytes(),
                record.reference.as_bytes(),
            );
        }
        self.db.write(batch)?;
        Ok(record)
    }

    async fn find_charge(&self, lookup: &ChargeLookup) -> Result<Option<ExternalChargeRecord>> {
        match self.lookup_reference(lookup)? {
            Some(reference) => self.get_json(CF_CHARGES, reference.as_bytes()),
            None => Ok(None),
        }
    }

    async fn finalize_charge(
        &self,
        lookup: &ChargeLookup,
        outcome: ChargeOutcome,
    ) -> Result<Option<ExternalChargeRecord>> {
        let _guard = self.write_lock.lock().await;
        let Some(reference) = self.lookup_reference(lookup)? else {
            return Ok(None);
        };
        let Some(mut record) = self.get_json::<ExternalChargeRecord>(CF_CHARGES, reference.as_bytes())? else {
            return Ok(None);
        };
        if !record.is_pending() {
            return Ok(None);
        }

        let mut batch = WriteBatch::default();
        if let ChargeTarget::WalletTransaction {
            wallet_id,
            transaction_id,
        } = record.target
        {
            let tx_key = compound_key(wallet_id, transaction_id);
            let mut tx = self
                .get_json::<WalletTransaction>(CF_TRANSACTIONS, &tx_key)?
                .filter(|tx| tx.is_pending())
                .ok_or_else(|| PaymentError::NotFound(format!("pending transaction {transaction_id}")))?;
            tx.status = match outcome {
                ChargeOutcome::Success => TransactionStatus::Completed,
                ChargeOutcome::Failed => TransactionStatus::Failed,
            };
            if outcome == ChargeOutcome::Success {
                let mut wallet = self
                    .get_json::<Wallet>(CF_WALLETS, wallet_id.as_bytes())?
                    .ok_or_else(|| PaymentError::NotFound(format!("wallet {wallet_id}")))?;
                wallet.balance += Balance::new(tx.amount);
                self.put_json(&mut batch, CF_WALLETS, wallet_id.as_bytes(), &wallet)?;
            }
            self.put_json(&mut batch, CF_TRANSACTIONS, &tx_key, &tx)?;
        }

        record.status = outcome.status();
        record.updated_at = Utc::now();
        self.put_json(&mut batch, CF_CHARGES, reference.as_bytes(), &record)?;
        self.db.write(batch)?;
        Ok(Some(record))
    }
}
