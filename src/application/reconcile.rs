//! Webhook-driven settlement of pending mobile-money charges.
//!
//! Gateways redeliver webhooks freely, so the charge is finalized only while
//! it is still `pending` and every sale transition is compare-and-swap on the
//! sale's status. A redelivery for an order left half-settled finishes it.
//! Whatever happens, the caller acknowledges the delivery.

use crate::application::rewards::RewardLedger;
use crate::application::settlement::apply_payment_outcome;
use crate::domain::charge::{ChargeLookup, ChargeOutcome, ChargeTarget, ExternalChargeRecord};
use crate::domain::ports::StoreHandle;
use crate::error::{PaymentError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

/// Payment notification as posted by the gateway.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PaymentWebhook {
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub amount: Option<Decimal>,
}

impl PaymentWebhook {
    /// Maps the gateway's status vocabulary onto a final outcome; `None` for
    /// statuses that are not final.
    pub fn outcome(&self) -> Option<ChargeOutcome> {
        match self.status.trim().to_ascii_uppercase().as_str() {
            "SUCCESS" | "SUCCESSFUL" | "COMPLETED" => Some(ChargeOutcome::Success),
            "FAILED" | "FAILURE" | "CANCELLED" | "EXPIRED" => Some(ChargeOutcome::Failed),
            _ => None,
        }
    }

    fn lookup(&self) -> ChargeLookup {
        let non_empty = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        ChargeLookup {
            gateway_transaction_id: non_empty(&self.transaction_id),
            reference: non_empty(&self.reference),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// The pending charge was finalized, or its order finished, by this
    /// delivery.
    Applied,
    /// The charge was already final; nothing changed.
    Duplicate,
    /// No charge matches the webhook.
    Unknown,
    /// Status is not final.
    Ignored,
    /// Processing failed; the charge is left as it was where possible.
    Errored,
}

pub struct SettlementReconciler {
    store: StoreHandle,
    rewards: RewardLedger,
}

impl SettlementReconciler {
    pub fn new(store: StoreHandle, rewards: RewardLedger) -> Self {
        Self { store, rewards }
    }

    /// Processes one webhook delivery. Never fails.
    #[instrument(skip_all, fields(reference = ?webhook.reference, transaction_id = ?webhook.transaction_id, status = %webhook.status))]
    pub async fn handle(&self, webhook: &PaymentWebhook) -> ReconcileOutcome {
        match self.apply(webhook).await {
            Ok(outcome) => {
                debug!(?outcome, "webhook processed");
                outcome
            }
            Err(e) => {
                error!(error = %e, code = e.code(), "webhook processing failed");
                ReconcileOutcome::Errored
            }
        }
    }

    async fn apply(&self, webhook: &PaymentWebhook) -> Result<ReconcileOutcome> {
        let Some(outcome) = webhook.outcome() else {
            info!("non-final webhook status ignored");
            return Ok(ReconcileOutcome::Ignored);
        };

        let lookup = webhook.lookup();
        if lookup.is_empty() {
            warn!("webhook carries neither reference nor transaction id");
            return Ok(ReconcileOutcome::Unknown);
        }
        let Some(record) = self.store.find_charge(&lookup).await? else {
            let e = PaymentError::NotFound("no charge matches webhook".to_string());
            warn!(error = %e, code = e.code(), "webhook ignored");
            return Ok(ReconcileOutcome::Unknown);
        };
        if let Some(stored) = record.outcome() {
            return self.redelivered(&record, stored).await;
        }
        if let Some(amount) = webhook.amount
            && amount != record.amount.value()
        {
            warn!(expected = %record.amount, reported = %amount, "webhook amount differs from charge");
        }

        let Some(finalized) = self.store.finalize_charge(&lookup, outcome).await? else {
            return Ok(ReconcileOutcome::Duplicate);
        };
        info!(reference = %finalized.reference, ?outcome, "charge finalized");

        if let ChargeTarget::Order { sale_id } = finalized.target {
            match apply_payment_outcome(&self.store, &self.rewards, sale_id, outcome).await? {
                Some((sale, accrued)) => {
                    info!(%sale_id, status = ?sale.status, accrued = ?accrued.map(|e| e.units), "order settled by webhook");
                }
                None => {
                    info!(%sale_id, "sale not stored yet, settlement applies the outcome");
                }
            }
        }
        Ok(ReconcileOutcome::Applied)
    }

    /// A delivery for a charge that is already final. Orders left short of
    /// their final state by an interrupted earlier delivery are finished with
    /// the stored outcome; everything else is a duplicate.
    async fn redelivered(&self, record: &ExternalChargeRecord, stored: ChargeOutcome) -> Result<ReconcileOutcome> {
        if let ChargeTarget::Order { sale_id } = record.target
            && let Some((sale, accrued)) =
                apply_payment_outcome(&self.store, &self.rewards, sale_id, stored).await?
        {
            info!(%sale_id, status = ?sale.status, accrued = ?accrued.map(|e| e.units), "order finished on redelivery");
            return Ok(ReconcileOutcome::Applied);
        }
        let e = PaymentError::Conflict(format!(
            "charge {} is already {:?}",
            record.reference, record.status
        ));
        info!(error = %e, code = e.code(), "duplicate webhook ignored");
        Ok(ReconcileOutcome::Duplicate)
    }
}
