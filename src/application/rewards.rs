use crate::domain::money::{Amount, Units};
use crate::domain::ports::StoreHandle;
use crate::domain::rates::RateTable;
use crate::domain::reward::{RewardEntry, RewardSource, pool_balance};
use crate::error::{PaymentError, Result};
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Append-only reward pool per consumer.
///
/// Balances are always derived from the entries; nothing here caches a sum.
#[derive(Clone)]
pub struct RewardLedger {
    store: StoreHandle,
    rates: RateTable,
}

impl RewardLedger {
    pub fn new(store: StoreHandle, rates: RateTable) -> Self {
        Self { store, rates }
    }

    pub fn rates(&self) -> &RateTable {
        &self.rates
    }

    pub async fn balance_of(&self, consumer_id: Uuid) -> Result<Units> {
        let entries = self.store.reward_entries(consumer_id).await?;
        Ok(pool_balance(&entries))
    }

    pub async fn history(&self, consumer_id: Uuid) -> Result<Vec<RewardEntry>> {
        self.store.reward_entries(consumer_id).await
    }

    /// The accrual entry a paid amount earns, without writing it.
    ///
    /// `None` when the amount is too small to earn a single ten-thousandth of
    /// a unit.
    pub fn accrual_entry(&self, consumer_id: Uuid, sale_id: Uuid, amount_rwf: Amount) -> Option<RewardEntry> {
        let units = self.rates.accrual_units(amount_rwf);
        if units.is_zero() {
            debug!(%consumer_id, %amount_rwf, "amount too small to accrue");
            return None;
        }
        Some(
            RewardEntry::new(consumer_id, units, RewardSource::Accrual, sale_id.to_string())
                .with_sale(sale_id),
        )
    }

    /// Credits the consumer for a paid amount.
    ///
    /// Returns `None` without writing anything when the amount is too small to
    /// accrue.
    #[instrument(skip_all, fields(%consumer_id, %sale_id, %amount_rwf))]
    pub async fn accrue(
        &self,
        consumer_id: Uuid,
        sale_id: Uuid,
        amount_rwf: Amount,
    ) -> Result<Option<RewardEntry>> {
        let Some(entry) = self.accrual_entry(consumer_id, sale_id, amount_rwf) else {
            return Ok(None);
        };
        let balance = self.store.append_reward(entry.clone()).await?;
        info!(units = %entry.units, %balance, "reward units accrued");
        Ok(Some(entry))
    }

    /// Removes `units` from the pool.
    ///
    /// # Errors
    ///
    /// `InsufficientRewardBalance` if the pool holds fewer than `units`; the
    /// check and the append happen in one store operation.
    #[instrument(skip_all, fields(%consumer_id, %units, %reason))]
    pub async fn spend(&self, consumer_id: Uuid, units: Units, reason: &str) -> Result<RewardEntry> {
        if units.is_negative() || units.is_zero() {
            return Err(PaymentError::ValidationError(
                "Units to spend must be positive".to_string(),
            ));
        }
        let entry = RewardEntry::new(consumer_id, -units, RewardSource::Redemption, reason);
        self.store.append_reward(entry.clone()).await?;
        Ok(entry)
    }

    /// Spends enough units to cover `discount_rwf` off an order.
    ///
    /// The pool must be worth at least the discount at the redemption rate.
    pub async fn redeem(
        &self,
        consumer_id: Uuid,
        discount_rwf: Amount,
        sale_id: Uuid,
    ) -> Result<RewardEntry> {
        let units = self.rates.redemption_units(discount_rwf);
        if units.is_zero() {
            return Err(PaymentError::ValidationError(format!(
                "A discount of {discount_rwf} RWF is worth less than the smallest unit"
            )));
        }
        let available = self.balance_of(consumer_id).await?;
        if self.rates.redemption_value(available) < discount_rwf.value() {
            return Err(PaymentError::InsufficientRewardBalance {
                required: units.to_string(),
                available: available.to_string(),
            });
        }
        let entry = RewardEntry::new(
            consumer_id,
            -units,
            RewardSource::Redemption,
            sale_id.to_string(),
        )
        .with_sale(sale_id);
        self.store.append_reward(entry.clone()).await?;
        info!(%consumer_id, %units, %discount_rwf, "reward units redeemed");
        Ok(entry)
    }

    /// Gives back units taken by an operation that did not go through.
    pub async fn refund(
        &self,
        consumer_id: Uuid,
        units: Units,
        reference: &str,
    ) -> Result<RewardEntry> {
        let entry = refund_entry(consumer_id, units, reference)?;
        self.store.append_reward(entry.clone()).await?;
        info!(%consumer_id, units = %entry.units, reference, "reward units refunded");
        Ok(entry)
    }
}

/// A refund entry for `units`, which must be positive.
pub fn refund_entry(consumer_id: Uuid, units: Units, reference: &str) -> Result<RewardEntry> {
    let units = Units::positive(units.value())?;
    Ok(RewardEntry::new(consumer_id, units, RewardSource::Refund, reference))
}
