use crate::config::AuthorizationSettings;
use crate::domain::ports::Authorization;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Buyer/counterparty approvals held in memory.
///
/// With `allow_all` set every pair is approved.
#[derive(Default, Clone)]
pub struct InMemoryApprovals {
    pairs: Arc<RwLock<HashSet<(Uuid, Uuid)>>>,
    allow_all: bool,
}

impl InMemoryApprovals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow_all() -> Self {
        Self {
            allow_all: true,
            ..Self::default()
        }
    }

    /// Approvals as configured: either every pair, or exactly the listed
    /// ones.
    pub fn from_settings(settings: &AuthorizationSettings) -> Self {
        let pairs = settings
            .approved
            .iter()
            .map(|pair| (pair.buyer_id, pair.counterparty_id))
            .collect();
        Self {
            pairs: Arc::new(RwLock::new(pairs)),
            allow_all: settings.allow_all,
        }
    }

    pub fn allows_all(&self) -> bool {
        self.allow_all
    }

    pub async fn approve(&self, buyer_id: Uuid, counterparty_id: Uuid) {
        self.pairs.write().await.insert((buyer_id, counterparty_id));
    }

    pub async fn revoke(&self, buyer_id: Uuid, counterparty_id: Uuid) {
        self.pairs.write().await.remove(&(buyer_id, counterparty_id));
    }
}

#[async_trait]
impl Authorization for InMemoryApprovals {
    async fn is_approved(&self, buyer_id: Uuid, counterparty_id: Uuid) -> Result<bool> {
        if self.allow_all {
            return Ok(true);
        }
        Ok(self.pairs.read().await.contains(&(buyer_id, counterparty_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApprovedPair;

    #[tokio::test]
    async fn test_approval_is_directional() {
        let approvals = InMemoryApprovals::new();
        let (buyer, retailer) = (Uuid::new_v4(), Uuid::new_v4());
        approvals.approve(buyer, retailer).await;

        assert!(approvals.is_approved(buyer, retailer).await.unwrap());
        assert!(!approvals.is_approved(retailer, buyer).await.unwrap());

        approvals.revoke(buyer, retailer).await;
        assert!(!approvals.is_approved(buyer, retailer).await.unwrap());
    }

    #[tokio::test]
    async fn test_from_settings_approves_only_listed_pairs() {
        let (buyer, retailer) = (Uuid::new_v4(), Uuid::new_v4());
        let approvals = InMemoryApprovals::from_settings(&AuthorizationSettings {
            allow_all: false,
            approved: vec![ApprovedPair {
                buyer_id: buyer,
                counterparty_id: retailer,
            }],
        });

        assert!(!approvals.allows_all());
        assert!(approvals.is_approved(buyer, retailer).await.unwrap());
        assert!(!approvals.is_approved(buyer, Uuid::new_v4()).await.unwrap());
        assert!(
            !InMemoryApprovals::from_settings(&AuthorizationSettings::default())
                .is_approved(buyer, retailer)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_allow_all() {
        let approvals = InMemoryApprovals::allow_all();
        assert!(
            approvals
                .is_approved(Uuid::new_v4(), Uuid::new_v4())
                .await
                .unwrap()
        );
    }
}
