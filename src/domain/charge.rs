use super::money::Amount;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum ChargeStatus {
    Pending,
    Success,
    Failed,
}

/// What a pending external charge settles once confirmed.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChargeTarget {
    WalletTransaction { wallet_id: Uuid, transaction_id: Uuid },
    Order { sale_id: Uuid },
}

/// Final state reported for a pending charge.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ChargeOutcome {
    Success,
    Failed,
}

impl ChargeOutcome {
    pub fn status(&self) -> ChargeStatus {
        match self {
            ChargeOutcome::Success => ChargeStatus::Success,
            ChargeOutcome::Failed => ChargeStatus::Failed,
        }
    }
}

/// A mobile-money collection initiated by us and confirmed later by webhook.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct ExternalChargeRecord {
    pub reference: String,
    pub gateway_transaction_id: Option<String>,
    pub amount: Amount,
    pub status: ChargeStatus,
    pub target: ChargeTarget,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExternalChargeRecord {
    pub fn pending(
        reference: impl Into<String>,
        gateway_transaction_id: Option<String>,
        amount: Amount,
        target: ChargeTarget,
    ) -> Self {
        let now = Utc::now();
        Self {
            reference: reference.into(),
            gateway_transaction_id,
            amount,
            status: ChargeStatus::Pending,
            target,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == ChargeStatus::Pending
    }

    /// The outcome the charge was finalized with, `None` while pending.
    pub fn outcome(&self) -> Option<ChargeOutcome> {
        match self.status {
            ChargeStatus::Pending => None,
            ChargeStatus::Success => Some(ChargeOutcome::Success),
            ChargeStatus::Failed => Some(ChargeOutcome::Failed),
        }
    }
}

/// Lookup keys carried by a webhook; the gateway id wins when both match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChargeLookup {
    pub gateway_transaction_id: Option<String>,
    pub reference: Option<String>,
}

impl ChargeLookup {
    pub fn matches(&self, record: &ExternalChargeRecord) -> bool {
        let by_gateway = match (&self.gateway_transaction_id, &record.gateway_transaction_id) {
            (Some(wanted), Some(stored)) => wanted == stored,
            _ => false,
        };
        let by_reference = self
            .reference
            .as_deref()
            .is_some_and(|r| r == record.reference);
        by_gateway || by_reference
    }

    pub fn is_empty(&self) -> bool {
        self.gateway_transaction_id.is_none() && self.reference.is_none()
    }
}

/// Gateway-side status of a collection request.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "UPPERCASE")]
pub enum GatewayStatus {
    Success,
    Pending,
    Failed,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct GatewayResponse {
    pub success: bool,
    pub external_id: Option<String>,
    pub status: GatewayStatus,
    pub error: Option<String>,
}

/// Parameters for a mobile-money collection.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct CollectionRequest {
    pub amount: Amount,
    pub payer: String,
    pub reference: String,
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn record() -> ExternalChargeRecord {
        ExternalChargeRecord::pending(
            "topup-1",
            Some("gw-42".to_string()),
            Amount::new(dec!(5000)).unwrap(),
            ChargeTarget::Order {
                sale_id: Uuid::new_v4(),
            },
        )
    }

    #[test]
    fn test_lookup_by_gateway_id_or_reference() {
        let record = record();
        let by_gateway = ChargeLookup {
            gateway_transaction_id: Some("gw-42".into()),
            reference: Some("something-else".into()),
        };
        let by_reference = ChargeLookup {
            gateway_transaction_id: None,
            reference: Some("topup-1".into()),
        };
        let neither = ChargeLookup {
            gateway_transaction_id: Some("gw-1".into()),
            reference: None,
        };
        assert!(by_gateway.matches(&record));
        assert!(by_reference.matches(&record));
        assert!(!neither.matches(&record));
        assert!(ChargeLookup::default().is_empty());
    }

    #[test]
    fn test_outcome_follows_status() {
        let mut record = record();
        assert_eq!(record.outcome(), None);
        record.status = ChargeOutcome::Success.status();
        assert_eq!(record.outcome(), Some(ChargeOutcome::Success));
        record.status = ChargeOutcome::Failed.status();
        assert_eq!(record.outcome(), Some(ChargeOutcome::Failed));
    }

    #[test]
    fn test_gateway_status_wire_names() {
        let status: GatewayStatus = serde_json::from_str("\"PENDING\"").unwrap();
        assert_eq!(status, GatewayStatus::Pending);
    }
}
