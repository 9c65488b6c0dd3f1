use super::money::Units;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A physical gas meter and the reward units credited to it.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct GasMeter {
    pub id: Uuid,
    pub meter_number: String,
    pub credited_units: Units,
    pub owner_id: Uuid,
}

impl GasMeter {
    pub fn new(owner_id: Uuid, meter_number: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            meter_number: meter_number.into(),
            credited_units: Units::ZERO,
            owner_id,
        }
    }
}
