//! Adapters for the domain ports: persistence, the mobile-money gateway and
//! the authorization collaborator.

pub mod approvals;
pub mod gateway;
pub mod in_memory;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;

use crate::domain::money::{Balance, Units};
use crate::domain::reward::RewardEntry;
use crate::domain::wallet::Posting;
use crate::error::{PaymentError, Result};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Computes the balance every touched wallet would end with.
///
/// Shared by the stores so they reject a commit with identical rules
/// before writing anything.
pub(crate) fn plan_postings(
    postings: &[Posting],
    current: impl Fn(Uuid) -> Option<Balance>,
) -> Result<BTreeMap<Uuid, Balance>> {
    if postings.is_empty() {
        return Err(PaymentError::ValidationError(
            "At least one posting is required".to_string(),
        ));
    }

    let mut deltas: BTreeMap<Uuid, Decimal> = BTreeMap::new();
    for posting in postings {
        if posting.amount.is_zero() {
            return Err(PaymentError::ValidationError(
                "Posting amount must be non-zero".to_string(),
            ));
        }
        *deltas.entry(posting.wallet_id).or_default() += posting.amount;
    }

    let mut planned = BTreeMap::new();
    for (wallet_id, delta) in deltas {
        let balance = current(wallet_id)
            .ok_or_else(|| PaymentError::NotFound(format!("wallet {wallet_id}")))?;
        let next = balance + Balance::new(delta);
        if next.value() < Decimal::ZERO {
            return Err(PaymentError::InsufficientFunds {
                required: (-delta).to_string(),
                available: balance.to_string(),
            });
        }
        planned.insert(wallet_id, next);
    }
    Ok(planned)
}

/// Pool balance after appending `entry`, or `InsufficientRewardBalance`.
pub(crate) fn plan_reward(current: Units, entry: &RewardEntry) -> Result<Units> {
    let next = current + entry.units;
    if entry.units.is_negative() && next.is_negative() {
        return Err(PaymentError::InsufficientRewardBalance {
            required: (-entry.units).to_string(),
            available: current.to_string(),
        });
    }
    Ok(next)
}
