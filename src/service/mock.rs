use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::identity::Identity;
use crate::models::order::{Order, OrderStatus};
use crate::models::run::{DeliveryRun, RunStatus};
use crate::models::vehicle::{CheckoutType, Vehicle, VehicleStatus};
use crate::service::{CheckoutRequest, DispatchBackend, PushEvent, PushSubscription};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    ListVehicleStatuses,
    Checkout,
    Checkin,
    CreateRun,
    ListOrders,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    ListVehicleStatuses,
    Checkout {
        vehicle: Vehicle,
        checkout_type: CheckoutType,
        purpose: Option<String>,
    },
    Checkin {
        vehicle: Vehicle,
    },
    CreateRun {
        vehicle: Vehicle,
        order_ids: Vec<Uuid>,
    },
    ListOrders {
        status: OrderStatus,
    },
}

impl MockCall {
    pub fn kind(&self) -> CallKind {
        match self {
            MockCall::ListVehicleStatuses => CallKind::ListVehicleStatuses,
            MockCall::Checkout { .. } => CallKind::Checkout,
            MockCall::Checkin { .. } => CallKind::Checkin,
            MockCall::CreateRun { .. } => CallKind::CreateRun,
            MockCall::ListOrders { .. } => CallKind::ListOrders,
        }
    }

    pub fn is_mutation(&self) -> bool {
        matches!(
            self.kind(),
            CallKind::Checkout | CallKind::Checkin | CallKind::CreateRun
        )
    }
}

#[derive(Default)]
struct MockState {
    statuses: HashMap<Vehicle, VehicleStatus>,
    orders: Vec<Order>,
    failures: HashMap<CallKind, VecDeque<AppError>>,
}

pub struct MockBackend {
    state: Mutex<MockState>,
    calls: watch::Sender<Vec<MockCall>>,
    paused: watch::Sender<bool>,
    listing_paused: watch::Sender<bool>,
    events_tx: broadcast::Sender<PushEvent>,
}

impl MockBackend {
    pub fn new() -> Self {
        let statuses = Vehicle::ALL
            .into_iter()
            .map(|vehicle| (vehicle, VehicleStatus::available()))
            .collect();
        let (events_tx, _unused_rx) = broadcast::channel(64);

        Self {
            state: Mutex::new(MockState {
                statuses,
                ..MockState::default()
            }),
            calls: watch::Sender::new(Vec::new()),
            paused: watch::Sender::new(false),
            listing_paused: watch::Sender::new(false),
            events_tx,
        }
    }

    pub fn with_orders(self, orders: Vec<Order>) -> Self {
        self.set_orders(orders);
        self
    }

    pub fn with_status(self, vehicle: Vehicle, status: VehicleStatus) -> Self {
        self.set_status(vehicle, status);
        self
    }

    pub fn set_orders(&self, orders: Vec<Order>) {
        self.with_state(|state| state.orders = orders);
    }

    pub fn set_status(&self, vehicle: Vehicle, status: VehicleStatus) {
        self.with_state(|state| {
            state.statuses.insert(vehicle, status);
        });
    }

    /// Makes the next call of `kind` fail with `error`.
    pub fn fail_next(&self, kind: CallKind, error: AppError) {
        self.with_state(|state| state.failures.entry(kind).or_default().push_back(error));
    }

    // Holds mutating calls until resumed.
    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    pub fn pause_listing(&self) {
        self.listing_paused.send_replace(true);
    }

    pub fn resume_listing(&self) {
        self.listing_paused.send_replace(false);
    }

    pub fn push(&self, event: PushEvent) {
        let _ = self.events_tx.send(event);
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.borrow().clone()
    }

    pub fn count(&self, kind: CallKind) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|call| call.kind() == kind)
            .count()
    }

    pub fn mutation_count(&self) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|call| call.is_mutation())
            .count()
    }

    pub async fn wait_for(&self, predicate: impl Fn(&[MockCall]) -> bool) {
        let mut rx = self.calls.subscribe();
        let _ = rx.wait_for(|calls| predicate(calls)).await;
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut state)
    }

    fn record(&self, call: MockCall) -> Result<(), AppError> {
        let kind = call.kind();
        self.calls.send_modify(|calls| calls.push(call));
        match self.with_state(|state| state.failures.get_mut(&kind).and_then(VecDeque::pop_front)) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn hold_while_paused(&self) {
        let mut rx = self.paused.subscribe();
        let _ = rx.wait_for(|paused| !*paused).await;
    }

    async fn hold_while_listing_paused(&self) {
        let mut rx = self.listing_paused.subscribe();
        let _ = rx.wait_for(|paused| !*paused).await;
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DispatchBackend for MockBackend {
    async fn list_vehicle_statuses(&self) -> Result<HashMap<Vehicle, VehicleStatus>, AppError> {
        self.record(MockCall::ListVehicleStatuses)?;
        Ok(self.with_state(|state| state.statuses.clone()))
    }

    async fn checkout_vehicle(
        &self,
        vehicle: Vehicle,
        request: CheckoutRequest,
    ) -> Result<VehicleStatus, AppError> {
        let outcome = self.record(MockCall::Checkout {
            vehicle,
            checkout_type: request.checkout_type,
            purpose: request.purpose.clone(),
        });
        self.hold_while_paused().await;
        outcome?;

        Ok(self.with_state(|state| {
            let status = VehicleStatus {
                checked_out: true,
                checked_out_by: Some(request.user.label()),
                checked_out_by_user_id: Some(request.user.id.clone()),
                checkout_type: request.checkout_type,
                purpose: request.purpose.clone(),
                delivery_run_active: false,
            };
            state.statuses.insert(vehicle, status.clone());
            status
        }))
    }

    async fn checkin_vehicle(&self, vehicle: Vehicle) -> Result<VehicleStatus, AppError> {
        let outcome = self.record(MockCall::Checkin { vehicle });
        self.hold_while_paused().await;
        outcome?;

        Ok(self.with_state(|state| {
            state.statuses.insert(vehicle, VehicleStatus::available());
            VehicleStatus::available()
        }))
    }

    async fn create_delivery_run(
        &self,
        vehicle: Vehicle,
        order_ids: Vec<Uuid>,
        user: Identity,
    ) -> Result<DeliveryRun, AppError> {
        let outcome = self.record(MockCall::CreateRun {
            vehicle,
            order_ids: order_ids.clone(),
        });
        self.hold_while_paused().await;
        outcome?;

        self.with_state(|state| {
            if let Some(status) = state.statuses.get_mut(&vehicle) {
                status.delivery_run_active = true;
            }
            for order in state.orders.iter_mut() {
                if order_ids.contains(&order.id) {
                    order.status = OrderStatus::InDelivery;
                }
            }
        });

        Ok(DeliveryRun {
            id: Uuid::new_v4(),
            vehicle,
            order_ids,
            status: RunStatus::Active,
            created_by: Some(user.label()),
            created_at: Utc::now(),
        })
    }

    async fn list_orders(&self, status: OrderStatus) -> Result<Vec<Order>, AppError> {
        let outcome = self.record(MockCall::ListOrders { status });
        self.hold_while_listing_paused().await;
        outcome?;
        Ok(self.with_state(|state| {
            state
                .orders
                .iter()
                .filter(|order| order.status == status)
                .cloned()
                .collect()
        }))
    }

    fn subscribe(&self) -> PushSubscription {
        let updates = BroadcastStream::new(self.events_tx.subscribe())
            .map(|event| event.unwrap_or(PushEvent::OrdersChanged));
        Box::pin(tokio_stream::once(PushEvent::Connected).chain(updates))
    }
}
