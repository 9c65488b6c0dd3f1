use crate::application::ledger::Ledger;
use crate::domain::charge::{
    ChargeLookup, ChargeOutcome, ChargeTarget, CollectionRequest, ExternalChargeRecord,
    GatewayResponse, GatewayStatus,
};
use crate::domain::money::{Amount, Balance};
use crate::domain::order::PaymentMethod;
use crate::domain::ports::{GatewayHandle, StoreHandle};
use crate::domain::wallet::{Posting, TransactionKind, WalletTransaction, WalletType};
use crate::error::{PaymentError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Wallets drained, in order, when a card is funded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FundingOrder {
    pub card_primary: WalletType,
    pub card_secondary: WalletType,
}

impl Default for FundingOrder {
    fn default() -> Self {
        Self {
            card_primary: WalletType::Dashboard,
            card_secondary: WalletType::Credit,
        }
    }
}

/// Who pays for a charge and what it is for.
#[derive(Debug, Clone)]
pub struct DispatchContext {
    pub payer_id: Uuid,
    pub payer_phone: Option<String>,
    pub sale_id: Uuid,
    pub description: String,
}

impl DispatchContext {
    /// Reference under which a mobile-money collection for this sale is
    /// tracked.
    pub fn reference(&self) -> String {
        format!("sale-{}", self.sale_id)
    }
}

/// What a successful dispatch did.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// Funds moved out of one of the payer's wallets.
    Debited(WalletTransaction),
    /// The gateway reported the collection as settled.
    Collected { external_id: Option<String> },
    /// The gateway accepted the collection; funds arrive with the webhook.
    Pending(ExternalChargeRecord),
}

impl DispatchOutcome {
    pub fn is_pending(&self) -> bool {
        matches!(self, DispatchOutcome::Pending(_))
    }

    pub fn external_reference(&self) -> Option<String> {
        match self {
            DispatchOutcome::Debited(_) => None,
            DispatchOutcome::Collected { external_id } => external_id.clone(),
            DispatchOutcome::Pending(record) => Some(record.reference.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CardFunding {
    pub card_balance: Balance,
    pub legs: Vec<WalletTransaction>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum TopupOutcome {
    Credited { transaction: WalletTransaction },
    Pending {
        charge: ExternalChargeRecord,
        transaction: WalletTransaction,
    },
}

/// Resolves where the money for a charge comes from.
#[derive(Clone)]
pub struct PaymentDispatcher {
    store: StoreHandle,
    ledger: Ledger,
    gateway: GatewayHandle,
    gateway_timeout: Duration,
    funding: FundingOrder,
}

impl PaymentDispatcher {
    pub fn new(
        store: StoreHandle,
        gateway: GatewayHandle,
        gateway_timeout: Duration,
        funding: FundingOrder,
    ) -> Self {
        Self {
            ledger: Ledger::new(store.clone()),
            store,
            gateway,
            gateway_timeout,
            funding,
        }
    }

    /// Charges `amount` through `method`.
    ///
    /// Wallet methods debit the payer's wallet of the matching type. Mobile
    /// money goes through the gateway: a pending collection is recorded
    /// against the sale and returned as [`DispatchOutcome::Pending`], which
    /// does not mean the funds have arrived.
    #[instrument(skip_all, fields(payer = %context.payer_id, sale = %context.sale_id, %amount, method = method.as_str()))]
    pub async fn dispatch(
        &self,
        amount: Amount,
        method: PaymentMethod,
        context: &DispatchContext,
    ) -> Result<DispatchOutcome> {
        match method.wallet_type() {
            Some(wallet_type) => {
                let wallet = self
                    .ledger
                    .find(context.payer_id, wallet_type)
                    .await?
                    .ok_or_else(|| PaymentError::InsufficientFunds {
                        required: amount.to_string(),
                        available: Balance::ZERO.to_string(),
                    })?;
                let tx = self.ledger.debit(wallet.id, amount).await?;
                Ok(DispatchOutcome::Debited(tx))
            }
            None => self.collect_for_sale(amount, context).await,
        }
    }

    async fn collect_for_sale(
        &self,
        amount: Amount,
        context: &DispatchContext,
    ) -> Result<DispatchOutcome> {
        let payer = context
            .payer_phone
            .as_deref()
            .map(str::trim)
            .filter(|phone| !phone.is_empty())
            .ok_or_else(|| {
                PaymentError::ValidationError("Mobile money requires a payer phone number".to_string())
            })?
            .to_string();
        let request = CollectionRequest {
            amount,
            payer,
            reference: context.reference(),
            description: context.description.clone(),
        };
        let response = self.initiate(&request).await?;
        match response.status {
            GatewayStatus::Success => {
                info!(reference = %request.reference, "mobile money collected");
                Ok(DispatchOutcome::Collected {
                    external_id: response.external_id,
                })
            }
            GatewayStatus::Pending => {
                let record = ExternalChargeRecord::pending(
                    request.reference,
                    response.external_id,
                    amount,
                    ChargeTarget::Order {
                        sale_id: context.sale_id,
                    },
                );
                let record = self.store.open_charge(record, None).await?;
                info!(reference = %record.reference, "mobile money pending confirmation");
                Ok(DispatchOutcome::Pending(record))
            }
            GatewayStatus::Failed => Err(declined(response)),
        }
    }

    /// Undoes a dispatch whose order could not be completed.
    ///
    /// A wallet debit is refunded and a pending collection is marked failed
    /// so a late webhook cannot settle it. A collection the gateway already
    /// settled cannot be pulled back from here and is only logged.
    pub async fn reverse(&self, outcome: &DispatchOutcome) -> Result<()> {
        match outcome {
            DispatchOutcome::Debited(tx) => {
                let amount = Amount::new(-tx.amount)?;
                self.ledger.refund(tx.wallet_id, amount).await?;
            }
            DispatchOutcome::Pending(record) => {
                let lookup = ChargeLookup {
                    gateway_transaction_id: None,
                    reference: Some(record.reference.clone()),
                };
                if self
                    .store
                    .finalize_charge(&lookup, ChargeOutcome::Failed)
                    .await?
                    .is_none()
                {
                    warn!(reference = %record.reference, "collection already final, needs a manual refund");
                }
            }
            DispatchOutcome::Collected { external_id } => {
                warn!(?external_id, "collected mobile money needs a manual refund");
            }
        }
        Ok(())
    }

    /// Loads `amount` onto the owner's card, draining the primary wallet
    /// first and the secondary one for the rest.
    ///
    /// # Errors
    ///
    /// `InsufficientFunds` when both wallets together hold less than
    /// `amount`. Nothing moves unless every leg fits.
    #[instrument(skip_all, fields(%owner_id, %amount))]
    pub async fn fund_card(&self, owner_id: Uuid, amount: Amount) -> Result<CardFunding> {
        let card = self.ledger.get_or_create(owner_id, WalletType::Card).await?;
        let primary = self.ledger.find(owner_id, self.funding.card_primary).await?;
        let secondary = self.ledger.find(owner_id, self.funding.card_secondary).await?;

        let primary_balance = primary.as_ref().map_or(Decimal::ZERO, |w| w.balance.value());
        let secondary_balance = secondary.as_ref().map_or(Decimal::ZERO, |w| w.balance.value());
        let combined = primary_balance + secondary_balance;
        if combined < amount.value() {
            return Err(PaymentError::InsufficientFunds {
                required: amount.to_string(),
                available: combined.to_string(),
            });
        }

        let from_primary = primary_balance.min(amount.value());
        let from_secondary = amount.value() - from_primary;

        let mut postings = Vec::with_capacity(3);
        for (wallet, take) in [(primary, from_primary), (secondary, from_secondary)] {
            if let Some(wallet) = wallet
                && take > Decimal::ZERO
            {
                postings.push(Posting::debit(
                    wallet.id,
                    Amount::new(take)?,
                    TransactionKind::CardFunding,
                ));
            }
        }
        postings.push(Posting::credit(card.id, amount, TransactionKind::CardFunding));

        let legs = self.ledger.commit(&postings).await?;
        let card_balance = self.ledger.wallet(card.id).await?.balance;
        info!(%from_primary, %from_secondary, %card_balance, "card funded");
        Ok(CardFunding { card_balance, legs })
    }

    /// Tops up a wallet with mobile money.
    ///
    /// A settled collection credits the wallet immediately; a pending one
    /// records a pending transaction that the webhook completes.
    #[instrument(skip_all, fields(%owner_id, %wallet_type, %amount))]
    pub async fn topup(
        &self,
        owner_id: Uuid,
        wallet_type: WalletType,
        amount: Amount,
        phone: &str,
    ) -> Result<TopupOutcome> {
        if phone.trim().is_empty() {
            return Err(PaymentError::ValidationError(
                "Mobile money requires a payer phone number".to_string(),
            ));
        }
        let wallet = self.ledger.get_or_create(owner_id, wallet_type).await?;
        let request = CollectionRequest {
            amount,
            payer: phone.trim().to_string(),
            reference: format!("topup-{}", Uuid::new_v4()),
            description: format!("{wallet_type} wallet top-up"),
        };

        let response = self.initiate(&request).await?;
        match response.status {
            GatewayStatus::Success => {
                let transaction = self
                    .ledger
                    .credit(wallet.id, amount, TransactionKind::Topup)
                    .await?;
                Ok(TopupOutcome::Credited { transaction })
            }
            GatewayStatus::Pending => {
                let transaction = WalletTransaction::pending_credit(
                    wallet.id,
                    amount,
                    TransactionKind::Topup,
                    Some(request.reference.clone()),
                );
                let record = ExternalChargeRecord::pending(
                    request.reference,
                    response.external_id,
                    amount,
                    ChargeTarget::WalletTransaction {
                        wallet_id: wallet.id,
                        transaction_id: transaction.id,
                    },
                );
                let charge = self
                    .store
                    .open_charge(record, Some(transaction.clone()))
                    .await?;
                info!(reference = %charge.reference, "top-up pending confirmation");
                Ok(TopupOutcome::Pending {
                    charge,
                    transaction,
                })
            }
            GatewayStatus::Failed => Err(declined(response)),
        }
    }

    /// Calls the gateway, treating a call that outlives the timeout as failed.
    async fn initiate(&self, request: &CollectionRequest) -> Result<GatewayResponse> {
        match tokio::time::timeout(self.gateway_timeout, self.gateway.initiate(request)).await {
            Ok(response) => response,
            Err(_) => {
                warn!(reference = %request.reference, timeout = ?self.gateway_timeout, "gateway timed out");
                Err(PaymentError::ExternalGatewayError(format!(
                    "gateway did not answer within {}ms",
                    self.gateway_timeout.as_millis()
                )))
            }
        }
    }
}

fn declined(response: GatewayResponse) -> PaymentError {
    PaymentError::ExternalGatewayError(
        response
            .error
            .unwrap_or_else(|| "collection declined".to_string()),
    )
}
