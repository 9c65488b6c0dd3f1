use crate::domain::money::{Amount, Balance};
use crate::domain::ports::StoreHandle;
use crate::domain::wallet::{
    Posting, TransactionKind, Wallet, WalletAudit, WalletTransaction, WalletType,
};
use crate::error::{PaymentError, Result};
use tracing::{debug, instrument};
use uuid::Uuid;

/// Wallet balances and their transaction log.
///
/// `Ledger` never reads a balance and writes it back itself: every
/// check-then-mutate is a single `commit_postings` call so the store decides
/// atomically whether the change fits.
#[derive(Clone)]
pub struct Ledger {
    store: StoreHandle,
}

impl Ledger {
    pub fn new(store: StoreHandle) -> Self {
        Self { store }
    }

    /// Returns the owner's wallet of `wallet_type`, creating an empty one if
    /// none exists yet.
    pub async fn get_or_create(&self, owner_id: Uuid, wallet_type: WalletType) -> Result<Wallet> {
        self.store.get_or_create_wallet(owner_id, wallet_type).await
    }

    /// Debits `amount` from the wallet.
    ///
    /// # Errors
    ///
    /// `InsufficientFunds` if the balance does not cover `amount`; the wallet
    /// is left untouched.
    #[instrument(skip_all, fields(%wallet_id, %amount))]
    pub async fn debit(&self, wallet_id: Uuid, amount: Amount) -> Result<WalletTransaction> {
        let tx = self
            .single(Posting::debit(wallet_id, amount, TransactionKind::Debit))
            .await?;
        debug!("wallet debited");
        Ok(tx)
    }

    #[instrument(skip_all, fields(%wallet_id, %amount, ?kind))]
    pub async fn credit(
        &self,
        wallet_id: Uuid,
        amount: Amount,
        kind: TransactionKind,
    ) -> Result<WalletTransaction> {
        let tx = self.single(Posting::credit(wallet_id, amount, kind)).await?;
        debug!("wallet credited");
        Ok(tx)
    }

    /// Compensating credit for an earlier debit.
    pub async fn refund(&self, wallet_id: Uuid, amount: Amount) -> Result<WalletTransaction> {
        self.credit(wallet_id, amount, TransactionKind::Refund).await
    }

    /// Records a pending credit that only reaches the balance once its
    /// external charge is confirmed.
    pub async fn reserve(
        &self,
        wallet_id: Uuid,
        amount: Amount,
        external_reference: Option<String>,
    ) -> Result<WalletTransaction> {
        let tx = WalletTransaction::pending_credit(
            wallet_id,
            amount,
            TransactionKind::Topup,
            external_reference,
        );
        self.store.append_pending(tx).await
    }

    /// Debits several wallets as one unit: either every leg is applied or
    /// none is.
    pub async fn debit_split(&self, legs: &[(Uuid, Amount)]) -> Result<Vec<WalletTransaction>> {
        let postings: Vec<Posting> = legs
            .iter()
            .map(|(wallet_id, amount)| Posting::debit(*wallet_id, *amount, TransactionKind::Debit))
            .collect();
        self.commit(&postings).await
    }

    pub async fn commit(&self, postings: &[Posting]) -> Result<Vec<WalletTransaction>> {
        self.store.commit_postings(postings).await
    }

    /// Current balance, zero for an owner without such a wallet.
    pub async fn balance(&self, owner_id: Uuid, wallet_type: WalletType) -> Result<Balance> {
        Ok(self
            .store
            .find_wallet(owner_id, wallet_type)
            .await?
            .map(|w| w.balance)
            .unwrap_or(Balance::ZERO))
    }

    pub async fn find(&self, owner_id: Uuid, wallet_type: WalletType) -> Result<Option<Wallet>> {
        self.store.find_wallet(owner_id, wallet_type).await
    }

    pub async fn wallet(&self, wallet_id: Uuid) -> Result<Wallet> {
        self.store
            .get_wallet(wallet_id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("wallet {wallet_id}")))
    }

    pub async fn history(&self, wallet_id: Uuid) -> Result<Vec<WalletTransaction>> {
        self.store.transactions(wallet_id).await
    }

    /// Compares the cached balance against the sum of completed transactions.
    pub async fn audit(&self, wallet_id: Uuid) -> Result<WalletAudit> {
        let wallet = self.wallet(wallet_id).await?;
        let transactions = self.store.transactions(wallet_id).await?;
        Ok(WalletAudit::of(&wallet, &transactions))
    }

    pub async fn audit_all(&self) -> Result<Vec<WalletAudit>> {
        let mut audits = Vec::new();
        for wallet in self.store.all_wallets().await? {
            let transactions = self.store.transactions(wallet.id).await?;
            audits.push(WalletAudit::of(&wallet, &transactions));
        }
        Ok(audits)
    }

    async fn single(&self, posting: Posting) -> Result<WalletTransaction> {
        self.store
            .commit_postings(&[posting])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| PaymentError::StorageError("commit returned no transaction".into()))
    }
}
