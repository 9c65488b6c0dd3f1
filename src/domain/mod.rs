//! Domain types and the ports the application layer talks to.

pub mod charge;
pub mod meter;
pub mod money;
pub mod order;
pub mod ports;
pub mod rates;
pub mod reward;
pub mod wallet;
