//! Services orchestrating the ledger, reward pool and payment flows.
//!
//! Every service receives the persistence handle at construction and keeps
//! no state of its own between calls.

pub mod dispatch;
pub mod ledger;
pub mod meter;
pub mod reconcile;
pub mod rewards;
pub mod settlement;
