use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::eligibility::{can_start, Eligibility};
use crate::engine::lifecycle::{InFlightGuard, Operation, RunLifecycle, RunState};
use crate::engine::partial_pick::{self, GateDecision};
use crate::engine::selection::SelectionSet;
use crate::engine::session::{RefreshTrigger, SessionCore, SessionEvent};
use crate::error::AppError;
use crate::models::identity::Identity;
use crate::models::order::Order;
use crate::models::run::DeliveryRun;
use crate::models::vehicle::{Vehicle, VehicleStatus};
use crate::service::{CheckoutRequest, DispatchBackend};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StartOutcome {
    Started { run: DeliveryRun },
    NeedsConfirmation { orders: Vec<Order> },
}

/// Sequences checkout, run creation and checkin for one vehicle.
pub struct RunLifecycleCoordinator<B> {
    vehicle: Vehicle,
    lifecycle: RunLifecycle,
    core: Arc<SessionCore<B>>,
}

impl<B: DispatchBackend> RunLifecycleCoordinator<B> {
    pub fn new(vehicle: Vehicle, core: Arc<SessionCore<B>>) -> Self {
        Self {
            vehicle,
            lifecycle: RunLifecycle::new(vehicle, core.tracker.clone()),
            core,
        }
    }

    pub fn vehicle(&self) -> Vehicle {
        self.vehicle
    }

    pub fn state(&self) -> RunState {
        self.lifecycle.state()
    }

    pub fn eligibility(&self, user: &Identity) -> Eligibility {
        can_start(
            self.vehicle,
            &self.core.statuses.snapshot(),
            &self.core.selection(),
            user,
        )
    }

    pub async fn start_run(
        &self,
        user: &Identity,
        skip_gate: bool,
    ) -> Result<StartOutcome, AppError> {
        if self.lifecycle.state().is_in_flight() {
            debug!(vehicle = %self.vehicle, "start rejected: operation in flight");
            return Err(AppError::Busy(self.vehicle));
        }

        let selection = self.core.selection();
        self.admit(user, &selection)?;

        if !skip_gate {
            let orders = self.core.orders.orders();
            if let GateDecision::NeedsConfirmation { orders } =
                partial_pick::check(&selection, &orders)
            {
                self.lifecycle.await_confirmation(orders.clone())?;
                self.emit_state();
                info!(vehicle = %self.vehicle, partial = orders.len(), "awaiting partial pick confirmation");
                return Ok(StartOutcome::NeedsConfirmation { orders });
            }
        }

        let guard = self.lifecycle.begin(Operation::StartRun)?;
        self.emit_state();
        let started = Instant::now();

        let result = self.dispatch(user, selection.ids().to_vec()).await;
        if let Ok(run) = &result {
            info!(vehicle = %self.vehicle, run_id = %run.id, orders = run.order_ids.len(), "delivery run started");
            self.core.update_selection(|selection| selection.clear());
            self.core.emit(SessionEvent::RunStarted { run: run.clone() });
        }

        self.settle(Operation::StartRun, guard, started, &result).await;
        result.map(|run| StartOutcome::Started { run })
    }

    pub async fn confirm_partial_pick(&self, user: &Identity) -> Result<StartOutcome, AppError> {
        if !self.lifecycle.is_awaiting_confirmation() {
            return Err(AppError::Validation(format!(
                "{} has no start awaiting confirmation",
                self.vehicle
            )));
        }

        self.start_run(user, true).await
    }

    pub fn cancel_confirmation(&self) -> Result<RunState, AppError> {
        let state = self.lifecycle.cancel_confirmation()?;
        self.emit_state();
        Ok(state)
    }

    pub async fn checkin(&self) -> Result<VehicleStatus, AppError> {
        let guard = self.lifecycle.begin(Operation::Checkin)?;
        self.emit_state();
        let started = Instant::now();

        let result = self.core.backend.checkin_vehicle(self.vehicle).await;
        if result.is_ok() {
            info!(vehicle = %self.vehicle, "vehicle checked in");
        }

        self.settle(Operation::Checkin, guard, started, &result).await;
        result
    }

    pub async fn checkout_other(
        &self,
        user: &Identity,
        purpose: &str,
    ) -> Result<VehicleStatus, AppError> {
        let purpose = purpose.trim();
        if purpose.is_empty() {
            return Err(AppError::Validation(
                "a purpose is required to check out for Other".to_string(),
            ));
        }

        let guard = self.lifecycle.begin(Operation::CheckoutOther)?;
        self.emit_state();
        let started = Instant::now();

        let result = self
            .core
            .backend
            .checkout_vehicle(self.vehicle, CheckoutRequest::other(user.clone(), purpose))
            .await;
        if result.is_ok() {
            info!(vehicle = %self.vehicle, purpose, "vehicle checked out for other");
        }

        self.settle(Operation::CheckoutOther, guard, started, &result).await;
        result
    }

    async fn dispatch(&self, user: &Identity, order_ids: Vec<Uuid>) -> Result<DeliveryRun, AppError> {
        let status = self
            .core
            .statuses
            .read(self.vehicle)
            .ok_or_else(|| AppError::Denied("Vehicle status is loading".to_string()))?;

        if status.delivery_run_active {
            return Err(AppError::Conflict(format!(
                "{} already has an active run",
                self.vehicle
            )));
        }

        if !status.checked_out {
            self.core
                .backend
                .checkout_vehicle(self.vehicle, CheckoutRequest::delivery_run(user.clone()))
                .await?;
            debug!(vehicle = %self.vehicle, "checked out for delivery run");
        }

        self.core
            .backend
            .create_delivery_run(self.vehicle, order_ids, user.clone())
            .await
    }

    // Decides on the same selection copy that the gate and dispatch use.
    fn admit(&self, user: &Identity, selection: &SelectionSet) -> Result<(), AppError> {
        let snapshot = self.core.statuses.snapshot();
        let Eligibility::Denied { reason } = can_start(self.vehicle, &snapshot, selection, user) else {
            return Ok(());
        };

        debug!(vehicle = %self.vehicle, %reason, "start denied");
        if self.lifecycle.is_awaiting_confirmation() {
            self.lifecycle.cancel_confirmation()?;
            self.emit_state();
        }
        Err(AppError::Denied(reason.to_string()))
    }

    async fn settle<T>(
        &self,
        operation: Operation,
        guard: InFlightGuard,
        started: Instant,
        result: &Result<T, AppError>,
    ) {
        if let Err(err) = result {
            warn!(vehicle = %self.vehicle, operation = operation.as_str(), error = %err, "vehicle operation failed");
            self.core.emit(SessionEvent::OperationFailed {
                vehicle: self.vehicle,
                operation,
                message: err.to_string(),
            });
        }

        let permit = self.core.lock_refresh().await;
        if let Err(err) = self.core.refresh(RefreshTrigger::AfterMutation).await {
            warn!(vehicle = %self.vehicle, error = %err, "refresh after operation failed");
        }
        drop(permit);

        drop(guard);
        self.emit_state();

        let outcome = match result {
            Ok(_) => "success",
            Err(err) => err.kind(),
        };
        self.core.metrics.record_operation(
            operation.as_str(),
            outcome,
            started.elapsed().as_secs_f64(),
        );
    }

    fn emit_state(&self) {
        self.core.emit(SessionEvent::RunStateChanged {
            vehicle: self.vehicle,
            state: self.lifecycle.state(),
        });
    }
}
