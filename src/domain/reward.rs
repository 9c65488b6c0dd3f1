use super::money::Units;
use super::order::PaymentMethod;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum RewardSource {
    Accrual,
    Redemption,
    MeterTransfer,
    Refund,
}

/// One immutable line of a consumer's reward pool.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct RewardEntry {
    pub id: Uuid,
    pub consumer_id: Uuid,
    pub units: Units,
    pub source: RewardSource,
    pub reference: String,
    pub meter_id: Option<Uuid>,
    pub sale_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl RewardEntry {
    pub fn new(consumer_id: Uuid, units: Units, source: RewardSource, reference: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            consumer_id,
            units,
            source,
            reference: reference.into(),
            meter_id: None,
            sale_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_sale(mut self, sale_id: Uuid) -> Self {
        self.sale_id = Some(sale_id);
        self
    }

    pub fn with_meter(mut self, meter_id: Uuid) -> Self {
        self.meter_id = Some(meter_id);
        self
    }
}

pub fn pool_balance<'a>(entries: impl IntoIterator<Item = &'a RewardEntry>) -> Units {
    entries.into_iter().map(|e| e.units).sum()
}

/// Whether a payment earns reward units.
///
/// Credit-wallet purchases never accrue; every other method accrues only
/// when the buyer presented a reward wallet id.
pub fn accrual_eligible(method: PaymentMethod, reward_wallet_supplied: bool) -> bool {
    match method {
        PaymentMethod::CreditWallet => false,
        PaymentMethod::MobileMoney => reward_wallet_supplied,
        PaymentMethod::DashboardWallet | PaymentMethod::Card => reward_wallet_supplied,
    }
}
