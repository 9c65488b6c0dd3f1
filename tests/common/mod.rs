#![allow(dead_code)]

use async_trait::async_trait;
use gasledger::application::dispatch::{FundingOrder, PaymentDispatcher};
use gasledger::application::ledger::Ledger;
use gasledger::application::meter::GasMeterTransfer;
use gasledger::application::reconcile::{PaymentWebhook, ReconcileOutcome, SettlementReconciler};
use gasledger::application::rewards::RewardLedger;
use gasledger::application::settlement::{OrderRequest, OrderSettlement};
use gasledger::domain::charge::{
    ChargeLookup, ChargeOutcome, CollectionRequest, ExternalChargeRecord, GatewayResponse,
    GatewayStatus,
};
use gasledger::domain::meter::GasMeter;
use gasledger::domain::money::{Amount, Balance, Units};
use gasledger::domain::order::{LineItem, PaymentMethod, Sale, SaleStatus};
use gasledger::domain::ports::{
    ChargeStore, Gateway, MeterStore, RewardStore, SaleStore, StoreHandle, WalletStore,
};
use gasledger::domain::rates::RateTable;
use gasledger::domain::reward::RewardEntry;
use gasledger::domain::wallet::{Posting, TransactionKind, Wallet, WalletTransaction, WalletType};
use gasledger::error::{PaymentError, Result};
use gasledger::infrastructure::approvals::InMemoryApprovals;
use gasledger::infrastructure::in_memory::InMemoryStore;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

pub const GATEWAY_TIMEOUT: Duration = Duration::from_millis(100);

/// Gateway double whose answer can be changed between calls.
pub struct ScriptedGateway {
    status: Mutex<GatewayStatus>,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
}

impl ScriptedGateway {
    pub fn new(status: GatewayStatus) -> Self {
        Self {
            status: Mutex::new(status),
            delay: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn answer(&self, status: GatewayStatus) {
        *self.status.lock().unwrap() = status;
    }

    pub fn stall(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Gateway for ScriptedGateway {
    async fn initiate(&self, request: &CollectionRequest) -> Result<GatewayResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let status = *self.status.lock().unwrap();
        Ok(GatewayResponse {
            success: status != GatewayStatus::Failed,
            external_id: Some(format!("gw-{}", request.reference)),
            status,
            error: (status == GatewayStatus::Failed).then(|| "payer declined".to_string()),
        })
    }
}

/// Store double over [`InMemoryStore`] that fails chosen writes, or lets a
/// webhook in just before a sale is stored.
pub struct FaultyStore {
    inner: Arc<InMemoryStore>,
    fail_insert_sale: AtomicBool,
    fail_completion: AtomicBool,
    webhook_before_insert: Mutex<Option<(SettlementReconciler, String)>>,
    early_outcome: Mutex<Option<ReconcileOutcome>>,
    inserted_sale: Mutex<Option<Uuid>>,
}

impl FaultyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::new(InMemoryStore::new()),
            fail_insert_sale: AtomicBool::new(false),
            fail_completion: AtomicBool::new(false),
            webhook_before_insert: Mutex::new(None),
            early_outcome: Mutex::new(None),
            inserted_sale: Mutex::new(None),
        })
    }

    pub fn fail_insert_sale(&self, fail: bool) {
        self.fail_insert_sale.store(fail, Ordering::SeqCst);
    }

    /// Fails every move of a sale into `completed`.
    pub fn fail_completion(&self, fail: bool) {
        self.fail_completion.store(fail, Ordering::SeqCst);
    }

    /// Delivers a webhook with `status` for the sale's charge right before
    /// the next sale is stored.
    pub fn deliver_before_insert(&self, status: &str) {
        let inner: StoreHandle = self.inner.clone();
        let reconciler = SettlementReconciler::new(
            inner.clone(),
            RewardLedger::new(inner, RateTable::default()),
        );
        *self.webhook_before_insert.lock().unwrap() = Some((reconciler, status.to_string()));
    }

    pub fn early_outcome(&self) -> Option<ReconcileOutcome> {
        self.early_outcome.lock().unwrap().clone()
    }

    pub fn inserted_sale(&self) -> Option<Uuid> {
        *self.inserted_sale.lock().unwrap()
    }
}

fn injected(what: &str) -> PaymentError {
    PaymentError::InternalError(format!("injected {what} failure").into())
}

#[async_trait]
impl WalletStore for FaultyStore {
    async fn get_or_create_wallet(&self, owner_id: Uuid, wallet_type: WalletType) -> Result<Wallet> {
        self.inner.get_or_create_wallet(owner_id, wallet_type).await
    }
    async fn find_wallet(&self, owner_id: Uuid, wallet_type: WalletType) -> Result<Option<Wallet>> {
        self.inner.find_wallet(owner_id, wallet_type).await
    }
    async fn get_wallet(&self, wallet_id: Uuid) -> Result<Option<Wallet>> {
        self.inner.get_wallet(wallet_id).await
    }
    async fn all_wallets(&self) -> Result<Vec<Wallet>> {
        self.inner.all_wallets().await
    }
    async fn commit_postings(&self, postings: &[Posting]) -> Result<Vec<WalletTransaction>> {
        self.inner.commit_postings(postings).await
    }
    async fn append_pending(&self, tx: WalletTransaction) -> Result<WalletTransaction> {
        self.inner.append_pending(tx).await
    }
    async fn transactions(&self, wallet_id: Uuid) -> Result<Vec<WalletTransaction>> {
        self.inner.transactions(wallet_id).await
    }
}

#[async_trait]
impl RewardStore for FaultyStore {
    async fn reward_entries(&self, consumer_id: Uuid) -> Result<Vec<RewardEntry>> {
        self.inner.reward_entries(consumer_id).await
    }
    async fn append_reward(&self, entry: RewardEntry) -> Result<Units> {
        self.inner.append_reward(entry).await
    }
}

#[async_trait]
impl SaleStore for FaultyStore {
    async fn insert_sale(&self, sale: Sale) -> Result<()> {
        let early = self.webhook_before_insert.lock().unwrap().take();
        if let Some((reconciler, status)) = early {
            let delivery = PaymentWebhook {
                reference: sale.external_reference.clone(),
                status,
                transaction_id: None,
                amount: None,
            };
            let outcome = reconciler.handle(&delivery).await;
            *self.early_outcome.lock().unwrap() = Some(outcome);
        }
        *self.inserted_sale.lock().unwrap() = Some(sale.id);
        if self.fail_insert_sale.load(Ordering::SeqCst) {
            return Err(injected("insert_sale"));
        }
        self.inner.insert_sale(sale).await
    }
    async fn get_sale(&self, sale_id: Uuid) -> Result<Option<Sale>> {
        self.inner.get_sale(sale_id).await
    }
    async fn transition_sale(
        &self,
        sale_id: Uuid,
        from: SaleStatus,
        to: SaleStatus,
        entry: Option<RewardEntry>,
    ) -> Result<Option<Sale>> {
        if to == SaleStatus::Completed && self.fail_completion.load(Ordering::SeqCst) {
            return Err(injected("completion"));
        }
        self.inner.transition_sale(sale_id, from, to, entry).await
    }
}

#[async_trait]
impl MeterStore for FaultyStore {
    async fn get_or_create_meter(&self, owner_id: Uuid, meter_number: &str) -> Result<GasMeter> {
        self.inner.get_or_create_meter(owner_id, meter_number).await
    }
    async fn get_meter(&self, meter_id: Uuid) -> Result<Option<GasMeter>> {
        self.inner.get_meter(meter_id).await
    }
    async fn transfer_to_meter(&self, entry: RewardEntry, meter_id: Uuid) -> Result<(GasMeter, Units)> {
        self.inner.transfer_to_meter(entry, meter_id).await
    }
}

#[async_trait]
impl ChargeStore for FaultyStore {
    async fn open_charge(
        &self,
        record: ExternalChargeRecord,
        pending_tx: Option<WalletTransaction>,
    ) -> Result<ExternalChargeRecord> {
        self.inner.open_charge(record, pending_tx).await
    }
    async fn find_charge(&self, lookup: &ChargeLookup) -> Result<Option<ExternalChargeRecord>> {
        self.inner.find_charge(lookup).await
    }
    async fn finalize_charge(
        &self,
        lookup: &ChargeLookup,
        outcome: ChargeOutcome,
    ) -> Result<Option<ExternalChargeRecord>> {
        self.inner.finalize_charge(lookup, outcome).await
    }
}

pub struct Harness {
    pub store: StoreHandle,
    pub gateway: Arc<ScriptedGateway>,
    pub ledger: Ledger,
    pub rewards: RewardLedger,
    pub dispatcher: PaymentDispatcher,
    pub settlement: OrderSettlement,
    pub reconciler: SettlementReconciler,
    pub meters: GasMeterTransfer,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(Arc::new(InMemoryStore::new()))
    }

    /// A harness over a [`FaultyStore`], returned alongside for steering.
    pub fn faulty() -> (Self, Arc<FaultyStore>) {
        let store = FaultyStore::new();
        (Self::with_store(store.clone()), store)
    }

    pub fn with_store(store: StoreHandle) -> Self {
        let gateway = Arc::new(ScriptedGateway::new(GatewayStatus::Success));
        let rates = RateTable::default();
        let rewards = RewardLedger::new(store.clone(), rates.clone());
        let dispatcher = PaymentDispatcher::new(
            store.clone(),
            gateway.clone(),
            GATEWAY_TIMEOUT,
            FundingOrder::default(),
        );
        Self {
            ledger: Ledger::new(store.clone()),
            settlement: OrderSettlement::new(
                store.clone(),
                rewards.clone(),
                dispatcher.clone(),
                Arc::new(InMemoryApprovals::allow_all()),
            ),
            reconciler: SettlementReconciler::new(store.clone(), rewards.clone()),
            meters: GasMeterTransfer::new(store.clone(), rates),
            rewards,
            dispatcher,
            gateway,
            store,
        }
    }

    pub async fn fund(&self, owner: Uuid, wallet_type: WalletType, value: Decimal) {
        let wallet = self.ledger.get_or_create(owner, wallet_type).await.unwrap();
        self.ledger
            .credit(wallet.id, amount(value), TransactionKind::Credit)
            .await
            .unwrap();
    }

    /// Seeds the pool with exactly `units` by accruing the matching amount.
    pub async fn seed_rewards(&self, consumer: Uuid, units: Decimal) {
        // 2500 RWF accrue one unit at the default rates
        self.rewards
            .accrue(consumer, Uuid::new_v4(), amount(units * Decimal::from(2500)))
            .await
            .unwrap();
    }

    pub async fn balance(&self, owner: Uuid, wallet_type: WalletType) -> Balance {
        self.ledger.balance(owner, wallet_type).await.unwrap()
    }

    pub async fn pool(&self, consumer: Uuid) -> Units {
        self.rewards.balance_of(consumer).await.unwrap()
    }

    pub async fn assert_ledger_consistent(&self) {
        for audit in self.ledger.audit_all().await.unwrap() {
            assert!(audit.consistent, "wallet {} drifted: {:?}", audit.wallet_id, audit);
        }
    }
}

pub fn amount(value: Decimal) -> Amount {
    Amount::new(value).unwrap()
}

pub fn order(buyer: Uuid, method: PaymentMethod, total: Decimal) -> OrderRequest {
    OrderRequest {
        buyer_id: buyer,
        counterparty_id: Uuid::new_v4(),
        payment_method: method,
        items: vec![LineItem {
            product_id: Uuid::new_v4(),
            quantity: 1,
            unit_price: total,
        }],
        discount_account: None,
        reward_wallet_id: None,
        discount_rwf: None,
        payer_phone: Some("250788123456".to_string()),
    }
}

pub fn webhook(reference: &str, status: &str) -> PaymentWebhook {
    PaymentWebhook {
        reference: Some(reference.to_string()),
        status: status.to_string(),
        transaction_id: None,
        amount: None,
    }
}

pub fn is_insufficient_funds(result: &std::result::Result<impl std::fmt::Debug, PaymentError>) -> bool {
    matches!(result, Err(PaymentError::InsufficientFunds { .. }))
}
