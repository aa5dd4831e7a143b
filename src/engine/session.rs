use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::{broadcast, Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::engine::coordinator::RunLifecycleCoordinator;
use crate::engine::eligibility::{can_start, Eligibility};
use crate::engine::lifecycle::{InFlightTracker, Operation, RunState};
use crate::engine::order_book::OrderBook;
use crate::engine::reconciler::RealtimeReconciler;
use crate::engine::selection::SelectionSet;
use crate::engine::status_store::VehicleStatusStore;
use crate::error::AppError;
use crate::models::identity::Identity;
use crate::models::order::Order;
use crate::models::run::DeliveryRun;
use crate::models::vehicle::{Vehicle, VehicleStatus};
use crate::observability::metrics::Metrics;
use crate::service::DispatchBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTrigger {
    Mount,
    AfterMutation,
    Push,
    Manual,
}

impl RefreshTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshTrigger::Mount => "mount",
            RefreshTrigger::AfterMutation => "after_mutation",
            RefreshTrigger::Push => "push",
            RefreshTrigger::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    RunStateChanged {
        vehicle: Vehicle,
        state: RunState,
    },
    StatusesRefreshed {
        statuses: HashMap<Vehicle, VehicleStatus>,
    },
    OrdersRefreshed {
        orders: Vec<Order>,
    },
    SelectionChanged {
        selection: SelectionSet,
    },
    RunStarted {
        run: DeliveryRun,
    },
    OperationFailed {
        vehicle: Vehicle,
        operation: Operation,
        message: String,
    },
}

pub struct SessionCore<B> {
    pub id: Uuid,
    pub backend: Arc<B>,
    pub statuses: VehicleStatusStore,
    pub orders: OrderBook,
    pub tracker: InFlightTracker,
    pub metrics: Arc<Metrics>,
    selection: Mutex<SelectionSet>,
    refresh_gate: AsyncMutex<()>,
    events_tx: broadcast::Sender<SessionEvent>,
}

impl<B: DispatchBackend> SessionCore<B> {
    pub fn new(backend: Arc<B>, metrics: Arc<Metrics>, event_buffer_size: usize) -> Self {
        let (events_tx, _unused_rx) = broadcast::channel(event_buffer_size.max(1));
        let tracker = InFlightTracker::new().with_gauge(metrics.operations_in_flight.clone());

        Self {
            id: Uuid::new_v4(),
            backend,
            statuses: VehicleStatusStore::new(),
            orders: OrderBook::new(),
            tracker,
            metrics,
            selection: Mutex::new(SelectionSet::new()),
            refresh_gate: AsyncMutex::new(()),
            events_tx,
        }
    }

    pub fn selection(&self) -> SelectionSet {
        self.lock_selection().clone()
    }

    pub fn update_selection<R>(&self, f: impl FnOnce(&mut SelectionSet) -> R) -> R {
        let (result, changed) = {
            let mut selection = self.lock_selection();
            let before = selection.clone();
            let result = f(&mut selection);
            let changed = (*selection != before).then(|| selection.clone());
            (result, changed)
        };

        if let Some(selection) = changed {
            self.emit(SessionEvent::SelectionChanged { selection });
        }
        result
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    pub fn events_sender(&self) -> broadcast::Sender<SessionEvent> {
        self.events_tx.clone()
    }

    pub fn emit(&self, event: SessionEvent) {
        let _ = self.events_tx.send(event);
    }

    /// A failed half keeps its previous snapshot; the first error is returned.
    pub async fn refresh(&self, trigger: RefreshTrigger) -> Result<(), AppError> {
        let backend = self.backend.as_ref();
        let (orders, statuses) =
            tokio::join!(self.orders.refresh(backend), self.statuses.refresh(backend));

        let orders = match orders {
            Ok(Some(orders)) => {
                let removed = self.update_selection(|selection| selection.prune(&orders));
                if !removed.is_empty() {
                    debug!(session_id = %self.id, removed = removed.len(), "pruned selection");
                }
                self.emit(SessionEvent::OrdersRefreshed { orders });
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(err) => {
                warn!(session_id = %self.id, trigger = trigger.as_str(), error = %err, "order refresh failed");
                Err(err)
            }
        };

        let statuses = match statuses {
            Ok(snapshot) => {
                self.emit(SessionEvent::StatusesRefreshed {
                    statuses: snapshot.statuses,
                });
                Ok(())
            }
            Err(err) => {
                warn!(session_id = %self.id, trigger = trigger.as_str(), error = %err, "vehicle status refresh failed");
                Err(err)
            }
        };

        let outcome = orders.and(statuses);
        let label = if outcome.is_ok() { "success" } else { "error" };
        self.metrics.record_refresh(trigger.as_str(), label);
        outcome
    }

    pub async fn lock_refresh(&self) -> AsyncMutexGuard<'_, ()> {
        self.refresh_gate.lock().await
    }

    fn lock_selection(&self) -> MutexGuard<'_, SelectionSet> {
        self.selection.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VehicleBoard {
    pub vehicle: Vehicle,
    pub status: Option<VehicleStatus>,
    pub run_state: RunState,
    pub eligibility: Eligibility,
    pub disabled_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Board {
    pub session_id: Uuid,
    pub user: Identity,
    pub vehicles: Vec<VehicleBoard>,
    pub orders: Vec<Order>,
    pub selection: SelectionSet,
}

pub struct DispatchSession<B> {
    core: Arc<SessionCore<B>>,
    user: Identity,
    coordinators: BTreeMap<Vehicle, Arc<RunLifecycleCoordinator<B>>>,
}

impl<B: DispatchBackend> DispatchSession<B> {
    pub fn new(
        backend: Arc<B>,
        user: Identity,
        metrics: Arc<Metrics>,
        event_buffer_size: usize,
    ) -> Self {
        let core = Arc::new(SessionCore::new(backend, metrics, event_buffer_size));
        let coordinators = Vehicle::ALL
            .into_iter()
            .map(|vehicle| {
                (
                    vehicle,
                    Arc::new(RunLifecycleCoordinator::new(vehicle, core.clone())),
                )
            })
            .collect();

        Self {
            core,
            user,
            coordinators,
        }
    }

    pub fn id(&self) -> Uuid {
        self.core.id
    }

    pub fn user(&self) -> &Identity {
        &self.user
    }

    pub fn core(&self) -> &Arc<SessionCore<B>> {
        &self.core
    }

    /// Initial load. Failure leaves vehicles in the loading state.
    pub async fn mount(&self) -> Result<(), AppError> {
        self.core.refresh(RefreshTrigger::Mount).await
    }

    pub fn coordinator(&self, vehicle: Vehicle) -> Result<Arc<RunLifecycleCoordinator<B>>, AppError> {
        self.coordinators
            .get(&vehicle)
            .cloned()
            .ok_or_else(|| AppError::Internal(format!("no coordinator for {vehicle}")))
    }

    pub fn reconciler(&self) -> RealtimeReconciler<B> {
        RealtimeReconciler::new(self.core.clone())
    }

    pub fn board(&self) -> Board {
        let statuses = self.core.statuses.snapshot();
        let selection = self.core.selection();

        let vehicles = self
            .coordinators
            .iter()
            .map(|(vehicle, coordinator)| {
                let eligibility = can_start(*vehicle, &statuses, &selection, &self.user);
                VehicleBoard {
                    vehicle: *vehicle,
                    status: statuses.get(*vehicle).cloned(),
                    run_state: coordinator.state(),
                    disabled_reason: eligibility.reason().map(ToString::to_string),
                    eligibility,
                }
            })
            .collect();

        Board {
            session_id: self.core.id,
            user: self.user.clone(),
            vehicles,
            orders: self.core.orders.orders(),
            selection,
        }
    }

    pub fn toggle(&self, order_id: Uuid) -> Result<bool, AppError> {
        let orders = self.core.orders.orders();
        self.core
            .update_selection(|selection| selection.toggle(order_id, &orders))
    }

    pub fn select_all(&self) -> SelectionSet {
        let orders = self.core.orders.orders();
        self.core.update_selection(|selection| {
            selection.select_all(&orders);
            selection.clone()
        })
    }

    pub fn clear_selection(&self) -> SelectionSet {
        self.core.update_selection(|selection| {
            selection.clear();
            selection.clone()
        })
    }
}
