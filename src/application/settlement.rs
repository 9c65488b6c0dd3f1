//! Order settlement: discount, payment, persistence and accrual, with
//! compensation when a later step fails.

use crate::application::dispatch::{DispatchContext, DispatchOutcome, PaymentDispatcher};
use crate::application::ledger::Ledger;
use crate::application::rewards::{RewardLedger, refund_entry};
use crate::domain::charge::{ChargeLookup, ChargeOutcome, ExternalChargeRecord};
use crate::domain::money::{Amount, Balance, Units};
use crate::domain::order::{LineItem, PaymentMethod, Sale, SaleStatus};
use crate::domain::ports::{AuthorizationHandle, StoreHandle};
use crate::domain::reward::{RewardEntry, accrual_eligible};
use crate::error::{PaymentError, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct OrderRequest {
    pub buyer_id: Uuid,
    pub counterparty_id: Uuid,
    pub payment_method: PaymentMethod,
    pub items: Vec<LineItem>,
    /// Consumer whose reward pool pays for `discount_rwf`.
    #[serde(default)]
    pub discount_account: Option<Uuid>,
    /// Reward wallet presented at checkout; without one nothing accrues.
    #[serde(default)]
    pub reward_wallet_id: Option<Uuid>,
    #[serde(default)]
    pub discount_rwf: Option<Decimal>,
    #[serde(default)]
    pub payer_phone: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SettlementReceipt {
    pub sale: Sale,
    /// Balance left in the wallet the order was paid from.
    pub wallet_balance: Option<Balance>,
    pub reward_balance: Option<Units>,
    pub accrued_units: Option<Units>,
    /// Set while a mobile-money payment awaits its webhook.
    pub pending_charge: Option<ExternalChargeRecord>,
}

/// Steps already committed for an order, undone in reverse on failure.
#[derive(Default)]
struct Committed {
    redemption: Option<RewardEntry>,
    payment: Option<DispatchOutcome>,
}

pub struct OrderSettlement {
    store: StoreHandle,
    ledger: Ledger,
    rewards: RewardLedger,
    dispatcher: PaymentDispatcher,
    authorization: AuthorizationHandle,
}

impl OrderSettlement {
    pub fn new(
        store: StoreHandle,
        rewards: RewardLedger,
        dispatcher: PaymentDispatcher,
        authorization: AuthorizationHandle,
    ) -> Self {
        Self {
            ledger: Ledger::new(store.clone()),
            store,
            rewards,
            dispatcher,
            authorization,
        }
    }

    /// Settles an order end to end.
    ///
    /// The sale is `completed` on return unless the payment is a pending
    /// mobile-money collection, in which case it stays `created` until the
    /// webhook arrives. On error every committed step has been compensated.
    #[instrument(skip_all, fields(buyer = %request.buyer_id, counterparty = %request.counterparty_id, method = request.payment_method.as_str()))]
    pub async fn settle(&self, request: OrderRequest) -> Result<SettlementReceipt> {
        let total = order_total(&request.items)?;
        let discount = requested_discount(&request, total)?;

        if !self
            .authorization
            .is_approved(request.buyer_id, request.counterparty_id)
            .await?
        {
            return Err(PaymentError::AuthorizationRequired);
        }

        let sale_id = Uuid::new_v4();
        let mut committed = Committed::default();

        if let (Some(discount), Some(account)) = (discount, request.discount_account) {
            committed.redemption = Some(self.rewards.redeem(account, discount, sale_id).await?);
        }

        let discount_rwf = discount.map_or(Decimal::ZERO, |d| d.value());
        let remaining = total.value() - discount_rwf;
        if remaining > Decimal::ZERO {
            let context = DispatchContext {
                payer_id: request.buyer_id,
                payer_phone: request.payer_phone.clone(),
                sale_id,
                description: format!("order {sale_id}"),
            };
            match self
                .dispatcher
                .dispatch(Amount::new(remaining)?, request.payment_method, &context)
                .await
            {
                Ok(outcome) => committed.payment = Some(outcome),
                Err(e) => return Err(self.unwind(committed, sale_id, e).await),
            }
        }

        let pending_charge = match &committed.payment {
            Some(DispatchOutcome::Pending(record)) => Some(record.clone()),
            _ => None,
        };
        let now = Utc::now();
        let sale = Sale {
            id: sale_id,
            buyer_id: request.buyer_id,
            counterparty_id: request.counterparty_id,
            total,
            payment_method: request.payment_method,
            status: if pending_charge.is_some() {
                SaleStatus::Created
            } else {
                SaleStatus::Paid
            },
            items: request.items,
            discount_account: request.discount_account,
            reward_wallet_id: request.reward_wallet_id,
            discount_rwf,
            discount_units: committed
                .redemption
                .as_ref()
                .map_or(Units::ZERO, |entry| -entry.units),
            amount_charged: remaining,
            external_reference: committed.payment.as_ref().and_then(|p| p.external_reference()),
            created_at: now,
            updated_at: now,
        };

        if let Err(e) = self.store.insert_sale(sale.clone()).await {
            return Err(self.unwind(committed, sale_id, e).await);
        }

        let (sale, accrued) = if let Some(charge) = &pending_charge {
            self.confirm_if_already_final(sale, charge).await?
        } else {
            let completion = complete_paid_sale(&self.store, &self.rewards, sale)
                .await
                .and_then(|done| {
                    done.ok_or_else(|| {
                        PaymentError::Conflict(format!("sale {sale_id} is no longer paid"))
                    })
                });
            match completion {
                Ok(done) => done,
                Err(e) => {
                    if let Err(mark) = self
                        .store
                        .transition_sale(sale_id, SaleStatus::Paid, SaleStatus::Failed, None)
                        .await
                    {
                        error!(%sale_id, error = %mark, "could not mark sale failed");
                    }
                    return Err(self.unwind(committed, sale_id, e).await);
                }
            }
        };

        let wallet_balance = match sale.payment_method.wallet_type() {
            Some(wallet_type) => Some(self.ledger.balance(sale.buyer_id, wallet_type).await?),
            None => None,
        };
        let reward_balance = match sale.reward_wallet_id.or(sale.discount_account) {
            Some(account) => Some(self.rewards.balance_of(account).await?),
            None => None,
        };

        let pending_charge = pending_charge.filter(|_| sale.status == SaleStatus::Created);
        info!(%sale_id, status = ?sale.status, total = %sale.total, charged = %sale.amount_charged, "order settled");
        Ok(SettlementReceipt {
            sale,
            wallet_balance,
            reward_balance,
            accrued_units: accrued.map(|entry| entry.units),
            pending_charge,
        })
    }

    /// Cancels an order still waiting on its mobile-money payment.
    ///
    /// The pending charge is failed first so that a webhook racing the
    /// cancellation finds nothing to settle; redeemed units are refunded.
    #[instrument(skip(self))]
    pub async fn cancel(&self, sale_id: Uuid) -> Result<Sale> {
        let sale = self
            .store
            .get_sale(sale_id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("sale {sale_id}")))?;
        if sale.status != SaleStatus::Created {
            return Err(PaymentError::Conflict(format!(
                "sale {sale_id} is {:?} and cannot be cancelled",
                sale.status
            )));
        }

        let lookup = ChargeLookup {
            gateway_transaction_id: None,
            reference: sale.external_reference.clone(),
        };
        if lookup.is_empty()
            || self
                .store
                .finalize_charge(&lookup, ChargeOutcome::Failed)
                .await?
                .is_none()
        {
            return Err(PaymentError::Conflict(format!(
                "sale {sale_id} has no pending payment to cancel"
            )));
        }

        let cancelled = self
            .store
            .transition_sale(
                sale_id,
                SaleStatus::Created,
                SaleStatus::Cancelled,
                discount_refund(&sale)?,
            )
            .await?
            .ok_or_else(|| PaymentError::Conflict(format!("sale {sale_id} changed concurrently")))?;
        info!(%sale_id, "order cancelled");
        Ok(cancelled)
    }

    /// Settles a freshly stored sale whose charge a webhook already
    /// finalized while the sale was being written.
    ///
    /// Runs after `insert_sale`, so either this read sees the final charge
    /// or the reconciler's sale lookup sees the stored sale. The status
    /// transitions are compare-and-swap, so the outcome applies once even if
    /// both get there.
    async fn confirm_if_already_final(
        &self,
        sale: Sale,
        charge: &ExternalChargeRecord,
    ) -> Result<(Sale, Option<RewardEntry>)> {
        let lookup = ChargeLookup {
            gateway_transaction_id: None,
            reference: Some(charge.reference.clone()),
        };
        let Some(outcome) = self
            .store
            .find_charge(&lookup)
            .await?
            .and_then(|record| record.outcome())
        else {
            info!(sale_id = %sale.id, "sale awaiting mobile money confirmation");
            return Ok((sale, None));
        };

        info!(sale_id = %sale.id, ?outcome, "payment confirmed while the sale was stored");
        let sale_id = sale.id;
        let (sale, accrued) = match apply_payment_outcome(&self.store, &self.rewards, sale_id, outcome).await? {
            Some(applied) => applied,
            None => (self.store.get_sale(sale_id).await?.unwrap_or(sale), None),
        };
        if sale.status == SaleStatus::Failed {
            return Err(PaymentError::ExternalGatewayError(format!(
                "mobile money payment for sale {sale_id} failed"
            )));
        }
        Ok((sale, accrued))
    }

    /// Compensates every committed step, newest first, and hands back the
    /// error that triggered it.
    async fn unwind(&self, committed: Committed, sale_id: Uuid, cause: PaymentError) -> PaymentError {
        warn!(%sale_id, error = %cause, "settlement failed, compensating");
        if let Some(payment) = &committed.payment
            && let Err(e) = self.dispatcher.reverse(payment).await
        {
            error!(%sale_id, error = %e, "payment compensation failed");
        }
        if let Some(entry) = &committed.redemption
            && let Err(e) = self
                .rewards
                .refund(entry.consumer_id, -entry.units, &sale_id.to_string())
                .await
        {
            error!(%sale_id, error = %e, "reward compensation failed");
        }
        cause
    }
}

/// Marks a `paid` sale `completed`, appending its accrual in the same store
/// operation when the sale is eligible.
///
/// `None` when the sale is no longer `paid`; nothing is written then.
pub(crate) async fn complete_paid_sale(
    store: &StoreHandle,
    rewards: &RewardLedger,
    sale: Sale,
) -> Result<Option<(Sale, Option<RewardEntry>)>> {
    let accrual = match sale.reward_wallet_id {
        Some(wallet_id)
            if accrual_eligible(sale.payment_method, true) && sale.amount_charged > Decimal::ZERO =>
        {
            rewards.accrual_entry(wallet_id, sale.id, Amount::new(sale.amount_charged)?)
        }
        _ => None,
    };
    let completed = store
        .transition_sale(sale.id, SaleStatus::Paid, SaleStatus::Completed, accrual.clone())
        .await?;
    Ok(completed.map(|sale| (sale, accrual)))
}

/// Applies a final mobile-money outcome to the sale it paid for.
///
/// A success moves a `created` sale to `paid` and then `completed`; a sale
/// left `paid` by an interrupted earlier attempt is completed. A failure
/// moves a `created` sale to `failed` and refunds its discount atomically.
/// `None` when the sale does not exist or is not in a state the outcome
/// applies to.
pub(crate) async fn apply_payment_outcome(
    store: &StoreHandle,
    rewards: &RewardLedger,
    sale_id: Uuid,
    outcome: ChargeOutcome,
) -> Result<Option<(Sale, Option<RewardEntry>)>> {
    let Some(sale) = store.get_sale(sale_id).await? else {
        return Ok(None);
    };
    match (outcome, sale.status) {
        (ChargeOutcome::Success, SaleStatus::Created) => {
            let Some(paid) = store
                .transition_sale(sale_id, SaleStatus::Created, SaleStatus::Paid, None)
                .await?
            else {
                return Ok(None);
            };
            complete_paid_sale(store, rewards, paid).await
        }
        (ChargeOutcome::Success, SaleStatus::Paid) => {
            warn!(%sale_id, "completing a sale left paid by an earlier attempt");
            complete_paid_sale(store, rewards, sale).await
        }
        (ChargeOutcome::Failed, SaleStatus::Created) => {
            let refund = discount_refund(&sale)?;
            let failed = store
                .transition_sale(sale_id, SaleStatus::Created, SaleStatus::Failed, refund)
                .await?;
            Ok(failed.map(|sale| (sale, None)))
        }
        _ => Ok(None),
    }
}

/// The entry giving back the units redeemed for a sale that will not be paid.
fn discount_refund(sale: &Sale) -> Result<Option<RewardEntry>> {
    match sale.discount_account {
        Some(account) if !sale.discount_units.is_zero() => {
            refund_entry(account, sale.discount_units, &sale.id.to_string()).map(Some)
        }
        _ => Ok(None),
    }
}

fn order_total(items: &[LineItem]) -> Result<Amount> {
    if items.is_empty() {
        return Err(PaymentError::ValidationError(
            "An order needs at least one line item".to_string(),
        ));
    }
    if let Some(item) = items
        .iter()
        .find(|i| i.quantity == 0 || i.unit_price < Decimal::ZERO)
    {
        return Err(PaymentError::ValidationError(format!(
            "Invalid line item for product {}",
            item.product_id
        )));
    }
    Amount::new(items.iter().map(LineItem::subtotal).sum())
}

fn requested_discount(request: &OrderRequest, total: Amount) -> Result<Option<Amount>> {
    let Some(discount) = request.discount_rwf.filter(|d| !d.is_zero()) else {
        return Ok(None);
    };
    if request.discount_account.is_none() {
        return Err(PaymentError::ValidationError(
            "A reward discount needs a discount account".to_string(),
        ));
    }
    if discount > total.value() {
        return Err(PaymentError::ValidationError(
            "Discount exceeds the order total".to_string(),
        ));
    }
    Amount::new(discount).map(Some)
}
