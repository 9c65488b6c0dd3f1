use super::money::{Amount, Units};
use super::wallet::WalletType;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a charge is funded.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    DashboardWallet,
    CreditWallet,
    Card,
    MobileMoney,
}

impl PaymentMethod {
    /// Wallet debited by this method, `None` when funds come from outside.
    pub fn wallet_type(&self) -> Option<WalletType> {
        match self {
            PaymentMethod::DashboardWallet => Some(WalletType::Dashboard),
            PaymentMethod::CreditWallet => Some(WalletType::Credit),
            PaymentMethod::Card => Some(WalletType::Card),
            PaymentMethod::MobileMoney => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::DashboardWallet => "dashboard_wallet",
            PaymentMethod::CreditWallet => "credit_wallet",
            PaymentMethod::Card => "card",
            PaymentMethod::MobileMoney => "mobile_money",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum SaleStatus {
    Created,
    Paid,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct LineItem {
    pub product_id: Uuid,
    pub quantity: u32,
    pub unit_price: Decimal,
}

impl LineItem {
    pub fn subtotal(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// An order between a buyer and a counterparty. Mutated only by settlement
/// and reconciliation.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Sale {
    pub id: Uuid,
    pub buyer_id: Uuid,
    pub counterparty_id: Uuid,
    pub total: Amount,
    pub payment_method: PaymentMethod,
    pub status: SaleStatus,
    pub items: Vec<LineItem>,
    /// Consumer whose reward pool paid for `discount_units`.
    pub discount_account: Option<Uuid>,
    /// Reward wallet presented at checkout; accruals go here when the
    /// payment method is eligible.
    pub reward_wallet_id: Option<Uuid>,
    pub discount_rwf: Decimal,
    pub discount_units: Units,
    /// Portion of `total` collected through the payment method.
    pub amount_charged: Decimal,
    pub external_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Sale {
    pub fn touch(&mut self, status: SaleStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}
