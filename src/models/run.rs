use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::vehicle::Vehicle;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Active,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeliveryRun {
    pub id: Uuid,
    pub vehicle: Vehicle,
    pub order_ids: Vec<Uuid>,
    pub status: RunStatus,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}
