pub mod memory;
#[cfg(test)]
pub mod mock;

use std::collections::HashMap;
use std::pin::Pin;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_stream::Stream;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::identity::Identity;
use crate::models::order::{Order, OrderStatus};
use crate::models::run::DeliveryRun;
use crate::models::vehicle::{CheckoutType, Vehicle, VehicleStatus};

/// Only a cue to refresh; the payload is never trusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushEvent {
    Connected,
    OrdersChanged,
}

pub type PushSubscription = Pin<Box<dyn Stream<Item = PushEvent> + Send>>;

#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutRequest {
    pub checkout_type: CheckoutType,
    pub purpose: Option<String>,
    pub user: Identity,
}

impl CheckoutRequest {
    pub fn delivery_run(user: Identity) -> Self {
        Self {
            checkout_type: CheckoutType::DeliveryRun,
            purpose: None,
            user,
        }
    }

    pub fn other(user: Identity, purpose: impl Into<String>) -> Self {
        Self {
            checkout_type: CheckoutType::Other,
            purpose: Some(purpose.into()),
            user,
        }
    }
}

#[async_trait]
pub trait DispatchBackend: Send + Sync + 'static {
    async fn list_vehicle_statuses(&self) -> Result<HashMap<Vehicle, VehicleStatus>, AppError>;

    async fn checkout_vehicle(
        &self,
        vehicle: Vehicle,
        request: CheckoutRequest,
    ) -> Result<VehicleStatus, AppError>;

    async fn checkin_vehicle(&self, vehicle: Vehicle) -> Result<VehicleStatus, AppError>;

    /// Returns `AppError::Conflict` when the vehicle already has an active run.
    async fn create_delivery_run(
        &self,
        vehicle: Vehicle,
        order_ids: Vec<Uuid>,
        user: Identity,
    ) -> Result<DeliveryRun, AppError>;

    async fn list_orders(&self, status: OrderStatus) -> Result<Vec<Order>, AppError>;

    /// Opens a push subscription. Implementations emit `Connected` first.
    fn subscribe(&self) -> PushSubscription;
}
