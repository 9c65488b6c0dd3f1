use super::money::{Amount, Balance};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub const DEFAULT_CURRENCY: &str = "RWF";

/// Purpose tag of a wallet. An owner holds at most one wallet per type.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum WalletType {
    Dashboard,
    Credit,
    Card,
    Food,
}

impl WalletType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletType::Dashboard => "dashboard",
            WalletType::Credit => "credit",
            WalletType::Card => "card",
            WalletType::Food => "food",
        }
    }
}

impl fmt::Display for WalletType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WalletType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dashboard" => Ok(WalletType::Dashboard),
            "credit" => Ok(WalletType::Credit),
            "card" => Ok(WalletType::Card),
            "food" => Ok(WalletType::Food),
            other => Err(format!("unknown wallet type '{other}'")),
        }
    }
}

/// A mutable balance store owned by a consumer or retailer.
///
/// `balance` is a cache: it must always equal the sum of the wallet's
/// `Completed` transactions.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Wallet {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub wallet_type: WalletType,
    pub balance: Balance,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(owner_id: Uuid, wallet_type: WalletType) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            wallet_type,
            balance: Balance::ZERO,
            currency: DEFAULT_CURRENCY.to_string(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Debit,
    Credit,
    Topup,
    Refund,
    CardFunding,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

/// One line in a wallet's append-only log.
///
/// Debits carry a negative amount. The only permitted mutation is the single
/// `Pending -> Completed | Failed` transition.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct WalletTransaction {
    pub id: Uuid,
    pub wallet_id: Uuid,
    pub amount: Decimal,
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    pub external_reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl WalletTransaction {
    pub fn pending_credit(
        wallet_id: Uuid,
        amount: Amount,
        kind: TransactionKind,
        external_reference: Option<String>,
    ) -> Self {
        Self::build(
            wallet_id,
            amount.value(),
            kind,
            TransactionStatus::Pending,
            external_reference,
        )
    }

    fn build(
        wallet_id: Uuid,
        amount: Decimal,
        kind: TransactionKind,
        status: TransactionStatus,
        external_reference: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            wallet_id,
            amount,
            kind,
            status,
            external_reference,
            created_at: Utc::now(),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == TransactionStatus::Pending
    }
}

/// A signed balance change applied by the store as part of one atomic commit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Posting {
    pub wallet_id: Uuid,
    pub amount: Decimal,
    pub kind: TransactionKind,
}

impl Posting {
    pub fn debit(wallet_id: Uuid, amount: Amount, kind: TransactionKind) -> Self {
        Self {
            wallet_id,
            amount: -amount.value(),
            kind,
        }
    }

    pub fn credit(wallet_id: Uuid, amount: Amount, kind: TransactionKind) -> Self {
        Self {
            wallet_id,
            amount: amount.value(),
            kind,
        }
    }

    pub fn into_transaction(self) -> WalletTransaction {
        WalletTransaction::build(
            self.wallet_id,
            self.amount,
            self.kind,
            TransactionStatus::Completed,
            None,
        )
    }
}

/// Sum of the completed amounts in a wallet's log.
pub fn completed_sum<'a>(transactions: impl IntoIterator<Item = &'a WalletTransaction>) -> Balance {
    Balance::new(
        transactions
            .into_iter()
            .filter(|tx| tx.status == TransactionStatus::Completed)
            .map(|tx| tx.amount)
            .sum(),
    )
}

/// Result of checking a wallet's cached balance against its log.
#[derive(Debug, Serialize, PartialEq, Clone)]
pub struct WalletAudit {
    pub wallet_id: Uuid,
    pub owner_id: Uuid,
    pub wallet_type: WalletType,
    pub balance: Balance,
    pub ledger_sum: Balance,
    pub consistent: bool,
}

impl WalletAudit {
    pub fn of(wallet: &Wallet, transactions: &[WalletTransaction]) -> Self {
        let ledger_sum = completed_sum(transactions);
        Self {
            wallet_id: wallet.id,
            owner_id: wallet.owner_id,
            wallet_type: wallet.wallet_type,
            balance: wallet.balance,
            ledger_sum,
            consistent: ledger_sum == wallet.balance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_new_wallet_is_empty() {
        let wallet = Wallet::new(Uuid::new_v4(), WalletType::Card);
        assert_eq!(wallet.balance, Balance::ZERO);
        assert_eq!(wallet.currency, "RWF");
    }

    #[test]
    fn test_debit_is_negative() {
        let tx = Posting::debit(
            Uuid::new_v4(),
            Amount::new(dec!(80)).unwrap(),
            TransactionKind::Debit,
        )
        .into_transaction();
        assert_eq!(tx.amount, dec!(-80));
        assert_eq!(tx.status, TransactionStatus::Completed);
    }

    #[test]
    fn test_completed_sum_ignores_pending_and_failed() {
        let wallet_id = Uuid::new_v4();
        let credit = Posting::credit(
            wallet_id,
            Amount::new(dec!(100)).unwrap(),
            TransactionKind::Credit,
        )
        .into_transaction();
        let pending = WalletTransaction::pending_credit(
            wallet_id,
            Amount::new(dec!(5000)).unwrap(),
            TransactionKind::Topup,
            Some("ref-1".into()),
        );
        let mut failed = pending.clone();
        failed.status = TransactionStatus::Failed;

        assert_eq!(
            completed_sum([&credit, &pending, &failed]),
            Balance::new(dec!(100))
        );
    }

    #[test]
    fn test_wallet_type_parsing() {
        assert_eq!("Dashboard".parse::<WalletType>(), Ok(WalletType::Dashboard));
        assert!("savings".parse::<WalletType>().is_err());
    }
}
