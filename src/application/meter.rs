use crate::domain::meter::GasMeter;
use crate::domain::money::Units;
use crate::domain::ports::StoreHandle;
use crate::domain::rates::RateTable;
use crate::domain::reward::{RewardEntry, RewardSource, pool_balance};
use crate::error::{PaymentError, Result};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct MeterTransferReceipt {
    pub meter: GasMeter,
    pub transferred: Units,
    /// RWF worth of the transferred units at the meter rate.
    pub value_rwf: Decimal,
    pub remaining_balance: Units,
}

/// Moves reward units onto gas meters.
#[derive(Clone)]
pub struct GasMeterTransfer {
    store: StoreHandle,
    rates: RateTable,
}

impl GasMeterTransfer {
    pub fn new(store: StoreHandle, rates: RateTable) -> Self {
        Self { store, rates }
    }

    pub async fn register(&self, owner_id: Uuid, meter_number: &str) -> Result<GasMeter> {
        let meter_number = meter_number.trim();
        if meter_number.is_empty() {
            return Err(PaymentError::ValidationError(
                "Meter number must not be empty".to_string(),
            ));
        }
        self.store.get_or_create_meter(owner_id, meter_number).await
    }

    /// Debits `units` from the consumer's pool and credits them to the meter
    /// in one store operation.
    #[instrument(skip_all, fields(%consumer_id, %meter_id, %units))]
    pub async fn transfer(
        &self,
        consumer_id: Uuid,
        meter_id: Uuid,
        units: Decimal,
    ) -> Result<MeterTransferReceipt> {
        let units = Units::positive(units)?;
        let meter = self
            .store
            .get_meter(meter_id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("meter {meter_id}")))?;

        let available = pool_balance(&self.store.reward_entries(consumer_id).await?);
        if available < units {
            return Err(PaymentError::InsufficientRewardBalance {
                required: units.to_string(),
                available: available.to_string(),
            });
        }

        let entry = RewardEntry::new(
            consumer_id,
            -units,
            RewardSource::MeterTransfer,
            format!("meter:{}", meter.meter_number),
        )
        .with_meter(meter_id);
        let (meter, remaining_balance) = self.store.transfer_to_meter(entry, meter_id).await?;
        info!(credited = %meter.credited_units, %remaining_balance, "units moved to meter");

        Ok(MeterTransferReceipt {
            value_rwf: self.rates.meter_value(units),
            meter,
            transferred: units,
            remaining_balance,
        })
    }
}
