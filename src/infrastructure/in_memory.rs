use super::{plan_postings, plan_reward};
use crate::domain::charge::{
    ChargeLookup, ChargeOutcome, ChargeTarget, ExternalChargeRecord,
};
use crate::domain::meter::GasMeter;
use crate::domain::money::{Balance, Units};
use crate::domain::order::{Sale, SaleStatus};
use crate::domain::ports::{ChargeStore, MeterStore, RewardStore, SaleStore, WalletStore};
use crate::domain::reward::{RewardEntry, pool_balance};
use crate::domain::wallet::{Posting, TransactionStatus, Wallet, WalletTransaction, WalletType};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    wallets: HashMap<Uuid, Wallet>,
    wallet_index: HashMap<(Uuid, WalletType), Uuid>,
    transactions: HashMap<Uuid, Vec<WalletTransaction>>,
    rewards: HashMap<Uuid, Vec<RewardEntry>>,
    sales: HashMap<Uuid, Sale>,
    meters: HashMap<Uuid, GasMeter>,
    meter_index: HashMap<String, Uuid>,
    charges: HashMap<String, ExternalChargeRecord>,
}

impl Tables {
    fn pool(&self, consumer_id: Uuid) -> Units {
        self.rewards
            .get(&consumer_id)
            .map(|entries| pool_balance(entries))
            .unwrap_or(Units::ZERO)
    }

    fn find_charge_key(&self, lookup: &ChargeLookup) -> Option<String> {
        if let Some(gateway_id) = &lookup.gateway_transaction_id
            && let Some(record) = self
                .charges
                .values()
                .find(|r| r.gateway_transaction_id.as_deref() == Some(gateway_id))
        {
            return Some(record.reference.clone());
        }
        lookup
            .reference
            .as_ref()
            .filter(|r| self.charges.contains_key(*r))
            .cloned()
    }
}

/// A thread-safe in-memory implementation of every persistence port.
///
/// All tables sit behind a single `RwLock`, so each port method runs as one
/// serialisable unit: checks and writes happen under the same write guard.
/// `Clone` shares the underlying tables.
#[derive(Default, Clone)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    /// Creates a new, empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WalletStore for InMemoryStore {
    async fn get_or_create_wallet(&self, owner_id: Uuid, wallet_type: WalletType) -> Result<Wallet> {
        let mut tables = self.tables.write().await;
        if let Some(id) = tables.wallet_index.get(&(owner_id, wallet_type))
            && let Some(wallet) = tables.wallets.get(id)
        {
            return Ok(wallet.clone());
        }
        let wallet = Wallet::new(owner_id, wallet_type);
        tables.wallet_index.insert((owner_id, wallet_type), wallet.id);
        tables.wallets.insert(wallet.id, wallet.clone());
        Ok(wallet)
    }

    async fn find_wallet(&self, owner_id: Uuid, wallet_type: WalletType) -> Result<Option<Wallet>> {
        let tables = self.tables.read().await;
        Ok(tables
            .wallet_index
            .get(&(owner_id, wallet_type))
            .and_then(|id| tables.wallets.get(id))
            .cloned())
    }

    async fn get_wallet(&self, wallet_id: Uuid) -> Result<Option<Wallet>> {
        let tables = self.tables.read().await;
        Ok(tables.wallets.get(&wallet_id).cloned())
    }

    async fn all_wallets(&self) -> Result<Vec<Wallet>> {
        let tables = self.tables.read().await;
        let mut wallets: Vec<Wallet> = tables.wallets.values().cloned().collect();
        wallets.sort_by_key(|w| (w.owner_id, w.wallet_type));
        Ok(wallets)
    }

    async fn commit_postings(&self, postings: &[Posting]) -> Result<Vec<WalletTransaction>> {
        let mut tables = self.tables.write().await;
        let planned = plan_postings(postings, |id| tables.wallets.get(&id).map(|w| w.balance))?;

        for (wallet_id, balance) in planned {
            if let Some(wallet) = tables.wallets.get_mut(&wallet_id) {
                wallet.balance = balance;
            }
        }
        let mut written = Vec::with_capacity(postings.len());
        for posting in postings {
            let tx = posting.into_transaction();
            tables
                .transactions
                .entry(tx.wallet_id)
                .or_default()
                .push(tx.clone());
            written.push(tx);
        }
        Ok(written)
    }

    async fn append_pending(&self, tx: WalletTransaction) -> Result<WalletTransaction> {
        let mut tables = self.tables.write().await;
        if !tables.wallets.contains_key(&tx.wallet_id) {
            return Err(PaymentError::NotFound(format!("wallet {}", tx.wallet_id)));
        }
        if !tx.is_pending() {
            return Err(PaymentError::ValidationError(
                "Only pending transactions can be reserved".to_string(),
            ));
        }
        tables
            .transactions
            .entry(tx.wallet_id)
            .or_default()
            .push(tx.clone());
        Ok(tx)
    }

    async fn transactions(&self, wallet_id: Uuid) -> Result<Vec<WalletTransaction>> {
        let tables = self.tables.read().await;
        Ok(tables
            .transactions
            .get(&wallet_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl RewardStore for InMemoryStore {
    async fn reward_entries(&self, consumer_id: Uuid) -> Result<Vec<RewardEntry>> {
        let tables = self.tables.read().await;
        Ok(tables.rewards.get(&consumer_id).cloned().unwrap_or_default())
    }

    async fn append_reward(&self, entry: RewardEntry) -> Result<Units> {
        let mut tables = self.tables.write().await;
        let next = plan_reward(tables.pool(entry.consumer_id), &entry)?;
        tables.rewards.entry(entry.consumer_id).or_default().push(entry);
        Ok(next)
    }
}

#[async_trait]
impl SaleStore for InMemoryStore {
    async fn insert_sale(&self, sale: Sale) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.sales.contains_key(&sale.id) {
            return Err(PaymentError::Conflict(format!("sale {} already exists", sale.id)));
        }
        tables.sales.insert(sale.id, sale);
        Ok(())
    }

    async fn get_sale(&self, sale_id: Uuid) -> Result<Option<Sale>> {
        let tables = self.tables.read().await;
        Ok(tables.sales.get(&sale_id).cloned())
    }

    async fn transition_sale(
        &self,
        sale_id: Uuid,
        from: SaleStatus,
        to: SaleStatus,
        entry: Option<RewardEntry>,
    ) -> Result<Option<Sale>> {
        let mut tables = self.tables.write().await;
        if tables.sales.get(&sale_id).is_none_or(|sale| sale.status != from) {
            return Ok(None);
        }
        if let Some(entry) = entry {
            plan_reward(tables.pool(entry.consumer_id), &entry)?;
            tables.rewards.entry(entry.consumer_id).or_default().push(entry);
        }
        let sale = tables
            .sales
            .get_mut(&sale_id)
            .ok_or_else(|| PaymentError::NotFound(format!("sale {sale_id}")))?;
        sale.touch(to);
        Ok(Some(sale.clone()))
    }
}

#[async_trait]
impl MeterStore for InMemoryStore {
    async fn get_or_create_meter(&self, owner_id: Uuid, meter_number: &str) -> Result<GasMeter> {
        let mut tables = self.tables.write().await;
        if let Some(id) = tables.meter_index.get(meter_number)
            && let Some(meter) = tables.meters.get(id)
        {
            if meter.owner_id != owner_id {
                return Err(PaymentError::Conflict(format!(
                    "meter {meter_number} is registered to another owner"
                )));
            }
            return Ok(meter.clone());
        }
        let meter = GasMeter::new(owner_id, meter_number);
        tables.meter_index.insert(meter.meter_number.clone(), meter.id);
        tables.meters.insert(meter.id, meter.clone());
        Ok(meter)
    }

    async fn get_meter(&self, meter_id: Uuid) -> Result<Option<GasMeter>> {
        let tables = self.tables.read().await;
        Ok(tables.meters.get(&meter_id).cloned())
    }

    async fn transfer_to_meter(&self, entry: RewardEntry, meter_id: Uuid) -> Result<(GasMeter, Units)> {
        let mut tables = self.tables.write().await;
        if !tables.meters.contains_key(&meter_id) {
            return Err(PaymentError::NotFound(format!("meter {meter_id}")));
        }
        let next = plan_reward(tables.pool(entry.consumer_id), &entry)?;
        let credited = -entry.units;
        tables.rewards.entry(entry.consumer_id).or_default().push(entry);
        let meter = tables
            .meters
            .get_mut(&meter_id)
            .ok_or_else(|| PaymentError::NotFound(format!("meter {meter_id}")))?;
        meter.credited_units = meter.credited_units + credited;
        Ok((meter.clone(), next))
    }
}

#[async_trait]
impl ChargeStore for InMemoryStore {
    async fn open_charge(
        &self,
        record: ExternalChargeRecord,
        pending_tx: Option<WalletTransaction>,
    ) -> Result<ExternalChargeRecord> {
        let mut tables = self.tables.write().await;
        if tables.charges.contains_key(&record.reference) {
            return Err(PaymentError::Conflict(format!(
                "charge {} already exists",
                record.reference
            )));
        }
        if let Some(tx) = pending_tx {
            if !tables.wallets.contains_key(&tx.wallet_id) {
                return Err(PaymentError::NotFound(format!("wallet {}", tx.wallet_id)));
            }
            tables.transactions.entry(tx.wallet_id).or_default().push(tx);
        }
        tables.charges.insert(record.reference.clone(), record.clone());
        Ok(record)
    }

    async fn find_charge(&self, lookup: &ChargeLookup) -> Result<Option<ExternalChargeRecord>> {
        let tables = self.tables.read().await;
        Ok(tables
            .find_charge_key(lookup)
            .and_then(|key| tables.charges.get(&key))
            .cloned())
    }

    async fn finalize_charge(
        &self,
        lookup: &ChargeLookup,
        outcome: ChargeOutcome,
    ) -> Result<Option<ExternalChargeRecord>> {
        let mut tables = self.tables.write().await;
        let Some(key) = tables.find_charge_key(lookup) else {
            return Ok(None);
        };
        let Some(record) = tables.charges.get(&key).cloned() else {
            return Ok(None);
        };
        if !record.is_pending() {
            return Ok(None);
        }

        if let ChargeTarget::WalletTransaction {
            wallet_id,
            transaction_id,
        } = record.target
        {
            let amount = {
                let log = tables.transactions.get_mut(&wallet_id).ok_or_else(|| {
                    PaymentError::NotFound(format!("transactions of wallet {wallet_id}"))
                })?;
                let tx = log
                    .iter_mut()
                    .find(|tx| tx.id == transaction_id && tx.is_pending())
                    .ok_or_else(|| {
                        PaymentError::NotFound(format!("pending transaction {transaction_id}"))
                    })?;
                tx.status = match outcome {
                    ChargeOutcome::Success => TransactionStatus::Completed,
                    ChargeOutcome::Failed => TransactionStatus::Failed,
                };
                tx.amount
            };
            if outcome == ChargeOutcome::Success {
                let wallet = tables
                    .wallets
                    .get_mut(&wallet_id)
                    .ok_or_else(|| PaymentError::NotFound(format!("wallet {wallet_id}")))?;
                wallet.balance += Balance::new(amount);
            }
        }

        let stored = tables
            .charges
            .get_mut(&key)
            .ok_or_else(|| PaymentError::NotFound(format!("charge {key}")))?;
        stored.status = outcome.status();
        stored.updated_at = Utc::now();
        Ok(Some(stored.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::charge::ChargeStatus;
    use crate::domain::money::Amount;
    use crate::domain::order::PaymentMethod;
    use crate::domain::reward::RewardSource;
    use crate::domain::wallet::TransactionKind;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    async fn funded_wallet(store: &InMemoryStore, amount: rust_decimal::Decimal) -> Wallet {
        let wallet = store
            .get_or_create_wallet(Uuid::new_v4(), WalletType::Dashboard)
            .await
            .unwrap();
        store
            .commit_postings(&[Posting::credit(
                wallet.id,
                Amount::new(amount).unwrap(),
                TransactionKind::Credit,
            )])
            .await
            .unwrap();
        wallet
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let store = InMemoryStore::new();
        let owner = Uuid::new_v4();
        let first = store.get_or_create_wallet(owner, WalletType::Credit).await.unwrap();
        let second = store.get_or_create_wallet(owner, WalletType::Credit).await.unwrap();
        assert_eq!(first.id, second.id);

        let other = store.get_or_create_wallet(owner, WalletType::Card).await.unwrap();
        assert_ne!(first.id, other.id);
        assert_eq!(store.all_wallets().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_commit_writes_nothing() {
        let store = InMemoryStore::new();
        let rich = funded_wallet(&store, dec!(100)).await;
        let poor = funded_wallet(&store, dec!(10)).await;

        let result = store
            .commit_postings(&[
                Posting::debit(rich.id, Amount::new(dec!(50)).unwrap(), TransactionKind::Debit),
                Posting::debit(poor.id, Amount::new(dec!(50)).unwrap(), TransactionKind::Debit),
            ])
            .await;
        assert!(matches!(result, Err(PaymentError::InsufficientFunds { .. })));

        let rich = store.get_wallet(rich.id).await.unwrap().unwrap();
        assert_eq!(rich.balance, Balance::new(dec!(100)));
        assert_eq!(store.transactions(rich.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reward_append_guards_negative_pool() {
        let store = InMemoryStore::new();
        let consumer = Uuid::new_v4();
        store
            .append_reward(RewardEntry::new(
                consumer,
                Units::new(dec!(1)),
                RewardSource::Accrual,
                "sale",
            ))
            .await
            .unwrap();

        let overspend = RewardEntry::new(consumer, Units::new(dec!(-2)), RewardSource::Redemption, "x");
        assert!(store.append_reward(overspend).await.is_err());
        assert_eq!(store.reward_entries(consumer).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_finalize_charge_only_once() {
        let store = InMemoryStore::new();
        let wallet = store
            .get_or_create_wallet(Uuid::new_v4(), WalletType::Dashboard)
            .await
            .unwrap();
        let amount = Amount::new(dec!(5000)).unwrap();
        let tx = WalletTransaction::pending_credit(
            wallet.id,
            amount,
            TransactionKind::Topup,
            Some("ref-1".into()),
        );
        let record = ExternalChargeRecord::pending(
            "ref-1",
            Some("gw-1".into()),
            amount,
            ChargeTarget::WalletTransaction {
                wallet_id: wallet.id,
                transaction_id: tx.id,
            },
        );
        store.open_charge(record, Some(tx)).await.unwrap();

        let lookup = ChargeLookup {
            gateway_transaction_id: Some("gw-1".into()),
            reference: None,
        };
        let first = store
            .finalize_charge(&lookup, ChargeOutcome::Success)
            .await
            .unwrap();
        assert_eq!(first.map(|r| r.status), Some(ChargeStatus::Success));
        let second = store
            .finalize_charge(&lookup, ChargeOutcome::Success)
            .await
            .unwrap();
        assert!(second.is_none());

        let wallet = store.get_wallet(wallet.id).await.unwrap().unwrap();
        assert_eq!(wallet.balance, Balance::new(dec!(5000)));
    }

    fn sale(status: SaleStatus) -> Sale {
        let now = Utc::now();
        Sale {
            id: Uuid::new_v4(),
            buyer_id: Uuid::new_v4(),
            counterparty_id: Uuid::new_v4(),
            total: Amount::new(dec!(1000)).unwrap(),
            payment_method: PaymentMethod::DashboardWallet,
            status,
            items: Vec::new(),
            discount_account: None,
            reward_wallet_id: None,
            discount_rwf: Decimal::ZERO,
            discount_units: Units::ZERO,
            amount_charged: dec!(1000),
            external_reference: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_transition_sale_requires_expected_status() {
        let store = InMemoryStore::new();
        assert!(
            store
                .transition_sale(Uuid::new_v4(), SaleStatus::Created, SaleStatus::Paid, None)
                .await
                .unwrap()
                .is_none()
        );

        let paid = sale(SaleStatus::Paid);
        store.insert_sale(paid.clone()).await.unwrap();
        let consumer = Uuid::new_v4();
        let accrual = RewardEntry::new(consumer, Units::new(dec!(0.4)), RewardSource::Accrual, "s");
        let stale = store
            .transition_sale(paid.id, SaleStatus::Created, SaleStatus::Failed, Some(accrual))
            .await
            .unwrap();
        assert!(stale.is_none());
        assert!(store.reward_entries(consumer).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transition_sale_with_reward_is_all_or_nothing() {
        let store = InMemoryStore::new();
        let created = sale(SaleStatus::Created);
        store.insert_sale(created.clone()).await.unwrap();
        let consumer = Uuid::new_v4();

        let overdraw = RewardEntry::new(consumer, Units::new(dec!(-1)), RewardSource::Redemption, "s");
        let result = store
            .transition_sale(created.id, SaleStatus::Created, SaleStatus::Failed, Some(overdraw))
            .await;
        assert!(matches!(result, Err(PaymentError::InsufficientRewardBalance { .. })));
        let unchanged = store.get_sale(created.id).await.unwrap().unwrap();
        assert_eq!(unchanged.status, SaleStatus::Created);

        let refund = RewardEntry::new(consumer, Units::new(dec!(1)), RewardSource::Refund, "s");
        let failed = store
            .transition_sale(created.id, SaleStatus::Created, SaleStatus::Failed, Some(refund))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(failed.status, SaleStatus::Failed);
        assert_eq!(store.reward_entries(consumer).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_meter_number_bound_to_owner() {
        let store = InMemoryStore::new();
        let owner = Uuid::new_v4();
        let meter = store.get_or_create_meter(owner, "0400-1234").await.unwrap();
        let again = store.get_or_create_meter(owner, "0400-1234").await.unwrap();
        assert_eq!(meter.id, again.id);
        assert!(matches!(
            store.get_or_create_meter(Uuid::new_v4(), "0400-1234").await,
            Err(PaymentError::Conflict(_))
        ));
    }
}
