use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum OrderStatus {
    Picked,
    Qa,
    PreDelivery,
    InDelivery,
    Shipping,
    Delivered,
    Issue,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PickStatus {
    pub is_fully_picked: bool,
    pub total_ordered: u32,
    pub total_picked: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: Uuid,
    pub reference: String,
    pub status: OrderStatus,
    #[serde(default)]
    pub pick_status: Option<PickStatus>,
    pub created_at: DateTime<Utc>,
}

impl Order {
    pub fn is_dispatch_candidate(&self) -> bool {
        self.status == OrderStatus::PreDelivery
    }

    /// True when a pick record exists and reports the order as incomplete.
    pub fn is_partially_picked(&self) -> bool {
        self.pick_status
            .as_ref()
            .is_some_and(|pick| !pick.is_fully_picked)
    }
}
