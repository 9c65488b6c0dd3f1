use super::charge::{
    ChargeLookup, ChargeOutcome, CollectionRequest, ExternalChargeRecord, GatewayResponse,
};
use super::meter::GasMeter;
use super::money::Units;
use super::order::{Sale, SaleStatus};
use super::reward::RewardEntry;
use super::wallet::{Posting, Wallet, WalletTransaction, WalletType};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

/// Wallet balances and their append-only transaction log.
#[async_trait]
pub trait WalletStore: Send + Sync {
    async fn get_or_create_wallet(&self, owner_id: Uuid, wallet_type: WalletType) -> Result<Wallet>;
    async fn find_wallet(&self, owner_id: Uuid, wallet_type: WalletType) -> Result<Option<Wallet>>;
    async fn get_wallet(&self, wallet_id: Uuid) -> Result<Option<Wallet>>;
    async fn all_wallets(&self) -> Result<Vec<Wallet>>;

    /// Applies every posting as one atomic unit.
    ///
    /// Fails with `NotFound` for an unknown wallet and `InsufficientFunds` if
    /// any wallet would end below zero; in both cases nothing is written.
    async fn commit_postings(&self, postings: &[Posting]) -> Result<Vec<WalletTransaction>>;

    /// Appends a `Pending` transaction. The balance is untouched.
    async fn append_pending(&self, tx: WalletTransaction) -> Result<WalletTransaction>;

    async fn transactions(&self, wallet_id: Uuid) -> Result<Vec<WalletTransaction>>;
}

/// Append-only reward ledger.
#[async_trait]
pub trait RewardStore: Send + Sync {
    async fn reward_entries(&self, consumer_id: Uuid) -> Result<Vec<RewardEntry>>;

    /// Appends `entry` and returns the consumer's new pool balance.
    ///
    /// A negative entry is accepted only if the pool covers it, checked in the
    /// same atomic unit as the append.
    async fn append_reward(&self, entry: RewardEntry) -> Result<Units>;
}

#[async_trait]
pub trait SaleStore: Send + Sync {
    async fn insert_sale(&self, sale: Sale) -> Result<()>;
    async fn get_sale(&self, sale_id: Uuid) -> Result<Option<Sale>>;

    /// Moves the sale from `from` to `to`, appending `entry` to its
    /// consumer's reward pool in the same atomic unit.
    ///
    /// Returns `None` when the stored status is not `from`; nothing is
    /// written then. A negative `entry` the pool cannot cover fails with
    /// `InsufficientRewardBalance`, also without writing.
    async fn transition_sale(
        &self,
        sale_id: Uuid,
        from: SaleStatus,
        to: SaleStatus,
        entry: Option<RewardEntry>,
    ) -> Result<Option<Sale>>;
}

#[async_trait]
pub trait MeterStore: Send + Sync {
    async fn get_or_create_meter(&self, owner_id: Uuid, meter_number: &str) -> Result<GasMeter>;
    async fn get_meter(&self, meter_id: Uuid) -> Result<Option<GasMeter>>;

    /// Appends the negative `entry` and raises the meter's counter by the
    /// same number of units, both or neither.
    async fn transfer_to_meter(&self, entry: RewardEntry, meter_id: Uuid) -> Result<(GasMeter, Units)>;
}

#[async_trait]
pub trait ChargeStore: Send + Sync {
    /// Stores a pending charge, together with the pending wallet transaction
    /// it will settle when there is one.
    async fn open_charge(
        &self,
        record: ExternalChargeRecord,
        pending_tx: Option<WalletTransaction>,
    ) -> Result<ExternalChargeRecord>;

    async fn find_charge(&self, lookup: &ChargeLookup) -> Result<Option<ExternalChargeRecord>>;

    /// Moves a `Pending` charge to its final state and returns it.
    ///
    /// Returns `None` when nothing matches or the charge is no longer
    /// pending. A linked wallet transaction is completed (crediting the
    /// balance) or failed in the same atomic unit.
    async fn finalize_charge(
        &self,
        lookup: &ChargeLookup,
        outcome: ChargeOutcome,
    ) -> Result<Option<ExternalChargeRecord>>;
}

/// Every persistence port behind one handle.
pub trait Store: WalletStore + RewardStore + SaleStore + MeterStore + ChargeStore {}

impl<T> Store for T where T: WalletStore + RewardStore + SaleStore + MeterStore + ChargeStore {}

pub type StoreHandle = Arc<dyn Store>;

/// Mobile-money collection provider.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn initiate(&self, request: &CollectionRequest) -> Result<GatewayResponse>;
}

pub type GatewayHandle = Arc<dyn Gateway>;

/// Decides whether a buyer may trade with a counterparty.
#[async_trait]
pub trait Authorization: Send + Sync {
    async fn is_approved(&self, buyer_id: Uuid, counterparty_id: Uuid) -> Result<bool>;
}

pub type AuthorizationHandle = Arc<dyn Authorization>;
