use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::identity::Identity;
use crate::models::order::{Order, OrderStatus, PickStatus};
use crate::models::run::{DeliveryRun, RunStatus};
use crate::models::vehicle::{CheckoutType, Vehicle, VehicleStatus};
use crate::service::{CheckoutRequest, DispatchBackend, PushEvent, PushSubscription};

#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrderRequest {
    pub reference: String,
    #[serde(default = "default_order_status")]
    pub status: OrderStatus,
    #[serde(default)]
    pub pick_status: Option<PickStatus>,
}

fn default_order_status() -> OrderStatus {
    OrderStatus::PreDelivery
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateOrderRequest {
    #[serde(default)]
    pub status: Option<OrderStatus>,
    #[serde(default)]
    pub pick_status: Option<PickStatus>,
}

// Every mutation runs under `write_lock`.
pub struct InMemoryBackend {
    vehicles: DashMap<Vehicle, VehicleStatus>,
    orders: DashMap<Uuid, Order>,
    runs: DashMap<Uuid, DeliveryRun>,
    write_lock: Mutex<()>,
    events_tx: broadcast::Sender<PushEvent>,
}

impl InMemoryBackend {
    pub fn new(event_buffer_size: usize) -> Self {
        let (events_tx, _unused_rx) = broadcast::channel(event_buffer_size.max(1));
        let vehicles = DashMap::new();
        for vehicle in Vehicle::ALL {
            vehicles.insert(vehicle, VehicleStatus::available());
        }

        Self {
            vehicles,
            orders: DashMap::new(),
            runs: DashMap::new(),
            write_lock: Mutex::new(()),
            events_tx,
        }
    }

    /// Adds a handful of pre-delivery orders, two of them partially picked.
    pub fn seed_demo(&self) -> Result<(), AppError> {
        let fixtures = [
            ("SO-1001", true, 4, 4),
            ("SO-1002", false, 3, 1),
            ("SO-1003", true, 2, 2),
            ("SO-1004", false, 6, 5),
            ("SO-1005", true, 1, 1),
        ];

        for (reference, is_fully_picked, total_ordered, total_picked) in fixtures {
            self.create_order(CreateOrderRequest {
                reference: reference.to_string(),
                status: OrderStatus::PreDelivery,
                pick_status: Some(PickStatus {
                    is_fully_picked,
                    total_ordered,
                    total_picked,
                }),
            })?;
        }

        info!(orders = fixtures.len(), "seeded demo orders");
        Ok(())
    }

    pub fn create_order(&self, request: CreateOrderRequest) -> Result<Order, AppError> {
        if request.reference.trim().is_empty() {
            return Err(AppError::BadRequest("reference cannot be empty".to_string()));
        }

        let order = {
            let _guard = self.lock()?;
            let order = Order {
                id: Uuid::new_v4(),
                reference: request.reference,
                status: request.status,
                pick_status: request.pick_status,
                created_at: Utc::now(),
            };
            self.orders.insert(order.id, order.clone());
            order
        };

        self.publish(PushEvent::OrdersChanged);
        Ok(order)
    }

    pub fn update_order(&self, id: Uuid, update: UpdateOrderRequest) -> Result<Order, AppError> {
        let order = {
            let _guard = self.lock()?;
            let mut order = self
                .orders
                .get_mut(&id)
                .ok_or_else(|| AppError::NotFound(format!("order {id} not found")))?;

            if let Some(status) = update.status {
                order.status = status;
            }
            if let Some(pick_status) = update.pick_status {
                order.pick_status = Some(pick_status);
            }
            order.clone()
        };

        self.publish(PushEvent::OrdersChanged);
        Ok(order)
    }

    pub fn all_orders(&self) -> Vec<Order> {
        let mut orders: Vec<Order> = self
            .orders
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        orders.sort_by_key(|order| order.created_at);
        orders
    }

    pub fn runs(&self) -> Vec<DeliveryRun> {
        let mut runs: Vec<DeliveryRun> =
            self.runs.iter().map(|entry| entry.value().clone()).collect();
        runs.sort_by_key(|run| run.created_at);
        runs
    }

    pub fn vehicle_status(&self, vehicle: Vehicle) -> VehicleStatus {
        self.vehicles
            .get(&vehicle)
            .map(|status| status.clone())
            .unwrap_or_default()
    }

    // The vehicle stays checked out until someone checks it in.
    pub fn complete_run(&self, id: Uuid) -> Result<DeliveryRun, AppError> {
        let run = {
            let _guard = self.lock()?;
            let mut run = self
                .runs
                .get_mut(&id)
                .ok_or_else(|| AppError::NotFound(format!("run {id} not found")))?;

            if run.status != RunStatus::Active {
                return Err(AppError::Conflict(format!("run {id} is not active")));
            }

            run.status = RunStatus::Completed;
            for order_id in &run.order_ids {
                if let Some(mut order) = self.orders.get_mut(order_id) {
                    order.status = OrderStatus::Delivered;
                }
            }
            if let Some(mut status) = self.vehicles.get_mut(&run.vehicle) {
                status.delivery_run_active = false;
            }
            run.clone()
        };

        info!(run_id = %run.id, vehicle = %run.vehicle, "delivery run completed");
        self.publish(PushEvent::OrdersChanged);
        Ok(run)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ()>, AppError> {
        self.write_lock
            .lock()
            .map_err(|_| AppError::Internal("backend write lock poisoned".to_string()))
    }

    fn publish(&self, event: PushEvent) {
        let receivers = self.events_tx.send(event).unwrap_or(0);
        debug!(receivers, "push event published");
    }

    fn checkout(&self, vehicle: Vehicle, request: CheckoutRequest) -> Result<VehicleStatus, AppError> {
        let purpose = request
            .purpose
            .map(|purpose| purpose.trim().to_string())
            .filter(|purpose| !purpose.is_empty());
        if request.checkout_type == CheckoutType::Other && purpose.is_none() {
            return Err(AppError::Validation(
                "purpose is required for an other checkout".to_string(),
            ));
        }

        let _guard = self.lock()?;
        let mut status = self.vehicles.entry(vehicle).or_default();
        if status.checked_out {
            let holder = status
                .checked_out_by
                .clone()
                .unwrap_or_else(|| "another user".to_string());
            return Err(AppError::Conflict(format!(
                "{vehicle} is already checked out by {holder}"
            )));
        }

        *status = VehicleStatus {
            checked_out: true,
            checked_out_by: Some(request.user.label()),
            checked_out_by_user_id: Some(request.user.id.clone()),
            checkout_type: request.checkout_type,
            purpose: match request.checkout_type {
                CheckoutType::Other => purpose,
                CheckoutType::DeliveryRun => None,
            },
            delivery_run_active: false,
        };
        Ok(status.clone())
    }

    fn checkin(&self, vehicle: Vehicle) -> Result<VehicleStatus, AppError> {
        let _guard = self.lock()?;
        let mut status = self.vehicles.entry(vehicle).or_default();
        if !status.checked_out {
            return Err(AppError::NotCheckedOut(vehicle));
        }
        if status.delivery_run_active {
            return Err(AppError::Conflict(format!(
                "{vehicle} has an active delivery run"
            )));
        }

        *status = VehicleStatus::available();
        Ok(status.clone())
    }

    fn create_run(
        &self,
        vehicle: Vehicle,
        order_ids: Vec<Uuid>,
        user: Identity,
    ) -> Result<DeliveryRun, AppError> {
        if order_ids.is_empty() {
            return Err(AppError::Validation(
                "a delivery run needs at least one order".to_string(),
            ));
        }

        let _guard = self.lock()?;
        let status = self.vehicle_status(vehicle);
        if status.delivery_run_active {
            return Err(AppError::Conflict(format!(
                "{vehicle} already has an active run"
            )));
        }
        if !status.checked_out || status.checkout_type != CheckoutType::DeliveryRun {
            return Err(AppError::Conflict(format!(
                "{vehicle} is not checked out for a delivery run"
            )));
        }
        if status.checked_out_by_user_id.as_deref() != Some(user.id.as_str()) {
            return Err(AppError::Conflict(format!(
                "{vehicle} is checked out by another user"
            )));
        }

        for id in &order_ids {
            let order = self
                .orders
                .get(id)
                .ok_or_else(|| AppError::NotFound(format!("order {id} not found")))?;
            if !order.is_dispatch_candidate() {
                return Err(AppError::Conflict(format!(
                    "order {} is no longer pre-delivery",
                    order.reference
                )));
            }
        }

        for id in &order_ids {
            if let Some(mut order) = self.orders.get_mut(id) {
                order.status = OrderStatus::InDelivery;
            }
        }
        if let Some(mut status) = self.vehicles.get_mut(&vehicle) {
            status.delivery_run_active = true;
        }

        let run = DeliveryRun {
            id: Uuid::new_v4(),
            vehicle,
            order_ids,
            status: RunStatus::Active,
            created_by: Some(user.label()),
            created_at: Utc::now(),
        };
        self.runs.insert(run.id, run.clone());
        Ok(run)
    }
}

#[async_trait]
impl DispatchBackend for InMemoryBackend {
    async fn list_vehicle_statuses(&self) -> Result<HashMap<Vehicle, VehicleStatus>, AppError> {
        Ok(self
            .vehicles
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect())
    }

    async fn checkout_vehicle(
        &self,
        vehicle: Vehicle,
        request: CheckoutRequest,
    ) -> Result<VehicleStatus, AppError> {
        let status = self.checkout(vehicle, request)?;
        info!(%vehicle, checkout_type = ?status.checkout_type, "vehicle checked out");
        Ok(status)
    }

    async fn checkin_vehicle(&self, vehicle: Vehicle) -> Result<VehicleStatus, AppError> {
        let status = self.checkin(vehicle)?;
        info!(%vehicle, "vehicle checked in");
        Ok(status)
    }

    async fn create_delivery_run(
        &self,
        vehicle: Vehicle,
        order_ids: Vec<Uuid>,
        user: Identity,
    ) -> Result<DeliveryRun, AppError> {
        let run = self.create_run(vehicle, order_ids, user)?;
        info!(run_id = %run.id, %vehicle, orders = run.order_ids.len(), "delivery run created");
        self.publish(PushEvent::OrdersChanged);
        Ok(run)
    }

    async fn list_orders(&self, status: OrderStatus) -> Result<Vec<Order>, AppError> {
        Ok(self
            .all_orders()
            .into_iter()
            .filter(|order| order.status == status)
            .collect())
    }

    fn subscribe(&self) -> PushSubscription {
        let updates = BroadcastStream::new(self.events_tx.subscribe()).map(|event| match event {
            Ok(event) => event,
            // A lagged receiver missed signals; one refresh covers them all.
            Err(_lagged) => PushEvent::OrdersChanged,
        });

        Box::pin(tokio_stream::once(PushEvent::Connected).chain(updates))
    }
}
