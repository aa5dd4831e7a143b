use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::coordinator::StartOutcome;
use crate::engine::lifecycle::RunState;
use crate::engine::selection::SelectionSet;
use crate::engine::session::{Board, DispatchSession, RefreshTrigger, SessionEvent};
use crate::error::AppError;
use crate::models::identity::Identity;
use crate::models::vehicle::{Vehicle, VehicleStatus};
use crate::observability::metrics::Metrics;
use crate::service::DispatchBackend;

pub type Response<T> = oneshot::Sender<Result<T, AppError>>;

#[derive(Debug)]
pub enum SessionCommand {
    Board {
        respond_to: Response<Board>,
    },
    Toggle {
        order_id: Uuid,
        respond_to: Response<bool>,
    },
    SelectAll {
        respond_to: Response<SelectionSet>,
    },
    ClearSelection {
        respond_to: Response<SelectionSet>,
    },
    StartRun {
        vehicle: Vehicle,
        respond_to: Response<StartOutcome>,
    },
    ConfirmPartialPick {
        vehicle: Vehicle,
        respond_to: Response<StartOutcome>,
    },
    CancelConfirmation {
        vehicle: Vehicle,
        respond_to: Response<RunState>,
    },
    Checkin {
        vehicle: Vehicle,
        respond_to: Response<VehicleStatus>,
    },
    CheckoutOther {
        vehicle: Vehicle,
        purpose: String,
        respond_to: Response<VehicleStatus>,
    },
    Refresh {
        respond_to: Response<()>,
    },
}

#[derive(Clone)]
pub struct SessionHandle {
    id: Uuid,
    sender: mpsc::Sender<SessionCommand>,
    events_tx: broadcast::Sender<SessionEvent>,
}

impl SessionHandle {
    pub async fn spawn<B: DispatchBackend>(
        backend: Arc<B>,
        user: Identity,
        metrics: Arc<Metrics>,
        queue_size: usize,
        event_buffer_size: usize,
    ) -> SessionHandle {
        let session = Arc::new(DispatchSession::new(
            backend.clone(),
            user,
            metrics,
            event_buffer_size,
        ));

        // Subscribe before loading so nothing published in between is missed.
        let push_events = backend.subscribe();
        if let Err(err) = session.mount().await {
            warn!(session_id = %session.id(), error = %err, "initial load failed");
        }

        let (sender, receiver) = mpsc::channel(queue_size.max(1));
        let handle = SessionHandle {
            id: session.id(),
            sender,
            events_tx: session.core().events_sender(),
        };

        let reconciler = tokio::spawn(session.reconciler().run(push_events));
        tokio::spawn(async move {
            run_session(session, receiver).await;
            reconciler.abort();
        });

        handle
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    pub async fn board(&self) -> Result<Board, AppError> {
        self.request(|respond_to| SessionCommand::Board { respond_to })
            .await
    }

    pub async fn toggle(&self, order_id: Uuid) -> Result<bool, AppError> {
        self.request(|respond_to| SessionCommand::Toggle {
            order_id,
            respond_to,
        })
        .await
    }

    pub async fn select_all(&self) -> Result<SelectionSet, AppError> {
        self.request(|respond_to| SessionCommand::SelectAll { respond_to })
            .await
    }

    pub async fn clear_selection(&self) -> Result<SelectionSet, AppError> {
        self.request(|respond_to| SessionCommand::ClearSelection { respond_to })
            .await
    }

    pub async fn start_run(&self, vehicle: Vehicle) -> Result<StartOutcome, AppError> {
        self.request(|respond_to| SessionCommand::StartRun {
            vehicle,
            respond_to,
        })
        .await
    }

    pub async fn confirm_partial_pick(&self, vehicle: Vehicle) -> Result<StartOutcome, AppError> {
        self.request(|respond_to| SessionCommand::ConfirmPartialPick {
            vehicle,
            respond_to,
        })
        .await
    }

    pub async fn cancel_confirmation(&self, vehicle: Vehicle) -> Result<RunState, AppError> {
        self.request(|respond_to| SessionCommand::CancelConfirmation {
            vehicle,
            respond_to,
        })
        .await
    }

    pub async fn checkin(&self, vehicle: Vehicle) -> Result<VehicleStatus, AppError> {
        self.request(|respond_to| SessionCommand::Checkin {
            vehicle,
            respond_to,
        })
        .await
    }

    pub async fn checkout_other(
        &self,
        vehicle: Vehicle,
        purpose: String,
    ) -> Result<VehicleStatus, AppError> {
        self.request(|respond_to| SessionCommand::CheckoutOther {
            vehicle,
            purpose,
            respond_to,
        })
        .await
    }

    pub async fn refresh(&self) -> Result<(), AppError> {
        self.request(|respond_to| SessionCommand::Refresh { respond_to })
            .await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(Response<T>) -> SessionCommand,
    ) -> Result<T, AppError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(command(respond_to))
            .await
            .map_err(|_| AppError::Internal(format!("session {} is closed", self.id)))?;

        response
            .await
            .map_err(|_| AppError::Internal(format!("session {} dropped the request", self.id)))?
    }
}

/// Processes commands until every handle is dropped.
pub async fn run_session<B: DispatchBackend>(
    session: Arc<DispatchSession<B>>,
    mut receiver: mpsc::Receiver<SessionCommand>,
) {
    let session_id = session.id();
    session.core().metrics.sessions_active.inc();
    info!(%session_id, user = %session.user().id, "dispatch session started");

    while let Some(command) = receiver.recv().await {
        handle_command(&session, command);
    }

    session.core().metrics.sessions_active.dec();
    info!(%session_id, "dispatch session closed");
}

fn handle_command<B: DispatchBackend>(session: &Arc<DispatchSession<B>>, command: SessionCommand) {
    match command {
        SessionCommand::Board { respond_to } => {
            let _ = respond_to.send(Ok(session.board()));
        }
        SessionCommand::Toggle {
            order_id,
            respond_to,
        } => {
            let _ = respond_to.send(session.toggle(order_id));
        }
        SessionCommand::SelectAll { respond_to } => {
            let _ = respond_to.send(Ok(session.select_all()));
        }
        SessionCommand::ClearSelection { respond_to } => {
            let _ = respond_to.send(Ok(session.clear_selection()));
        }
        SessionCommand::CancelConfirmation {
            vehicle,
            respond_to,
        } => {
            let result = session
                .coordinator(vehicle)
                .and_then(|coordinator| coordinator.cancel_confirmation());
            let _ = respond_to.send(result);
        }
        SessionCommand::StartRun {
            vehicle,
            respond_to,
        } => {
            spawn_start(session, vehicle, false, respond_to);
        }
        SessionCommand::ConfirmPartialPick {
            vehicle,
            respond_to,
        } => {
            spawn_start(session, vehicle, true, respond_to);
        }
        SessionCommand::Checkin {
            vehicle,
            respond_to,
        } => match session.coordinator(vehicle) {
            Ok(coordinator) => {
                tokio::spawn(async move {
                    let _ = respond_to.send(coordinator.checkin().await);
                });
            }
            Err(err) => {
                let _ = respond_to.send(Err(err));
            }
        },
        SessionCommand::CheckoutOther {
            vehicle,
            purpose,
            respond_to,
        } => match session.coordinator(vehicle) {
            Ok(coordinator) => {
                let user = session.user().clone();
                tokio::spawn(async move {
                    let _ = respond_to.send(coordinator.checkout_other(&user, &purpose).await);
                });
            }
            Err(err) => {
                let _ = respond_to.send(Err(err));
            }
        },
        SessionCommand::Refresh { respond_to } => {
            let session = session.clone();
            tokio::spawn(async move {
                let result = session.core().refresh(RefreshTrigger::Manual).await;
                let _ = respond_to.send(result);
            });
        }
    }
}

fn spawn_start<B: DispatchBackend>(
    session: &Arc<DispatchSession<B>>,
    vehicle: Vehicle,
    confirmed: bool,
    respond_to: Response<StartOutcome>,
) {
    let coordinator = match session.coordinator(vehicle) {
        Ok(coordinator) => coordinator,
        Err(err) => {
            let _ = respond_to.send(Err(err));
            return;
        }
    };

    // Reject a busy vehicle here so the spawned task never queues behind it.
    if coordinator.state().is_in_flight() {
        debug!(%vehicle, "start rejected: operation in flight");
        let _ = respond_to.send(Err(AppError::Busy(vehicle)));
        return;
    }

    let user = session.user().clone();
    tokio::spawn(async move {
        let result = if confirmed {
            coordinator.confirm_partial_pick(&user).await
        } else {
            coordinator.start_run(&user, false).await
        };
        let _ = respond_to.send(result);
    });
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::models::order::{Order, OrderStatus, PickStatus};
    use crate::service::mock::{CallKind, MockBackend};

    fn order(seed: u128, fully_picked: bool) -> Order {
        Order {
            id: Uuid::from_u128(seed),
            reference: format!("SO-{seed}"),
            status: OrderStatus::PreDelivery,
            pick_status: Some(PickStatus {
                is_fully_picked: fully_picked,
                total_ordered: 3,
                total_picked: if fully_picked { 3 } else { 1 },
            }),
            created_at: Utc::now(),
        }
    }

    async fn spawn(backend: MockBackend) -> (Arc<MockBackend>, SessionHandle) {
        let backend = Arc::new(backend);
        let handle = SessionHandle::spawn(
            backend.clone(),
            Identity::new("u-alice").with_display_name("Alice"),
            Arc::new(Metrics::new()),
            16,
            64,
        )
        .await;
        (backend, handle)
    }

    #[tokio::test]
    async fn board_reports_disabled_reason_until_selection() {
        let (_backend, handle) = spawn(MockBackend::new().with_orders(vec![order(1, true)])).await;

        let board = handle.board().await.unwrap();
        let van = board.vehicles.iter().find(|v| v.vehicle == Vehicle::Van).unwrap();
        assert_eq!(van.disabled_reason.as_deref(), Some("Select pre-delivery orders"));

        assert!(handle.toggle(Uuid::from_u128(1)).await.unwrap());
        let board = handle.board().await.unwrap();
        assert!(board.vehicles.iter().all(|v| v.disabled_reason.is_none()));
    }

    #[tokio::test]
    async fn rapid_double_start_issues_one_checkout_and_one_run() {
        let (backend, handle) = spawn(MockBackend::new().with_orders(vec![order(1, true)])).await;
        handle.toggle(Uuid::from_u128(1)).await.unwrap();
        backend.pause();

        let first = tokio::spawn({
            let handle = handle.clone();
            async move { handle.start_run(Vehicle::Van).await }
        });
        backend.wait_for(|calls| calls.iter().any(|call| call.is_mutation())).await;

        let second = handle.start_run(Vehicle::Van).await;
        assert_eq!(second.unwrap_err(), AppError::Busy(Vehicle::Van));

        backend.resume();
        let outcome = first.await.unwrap().unwrap();
        assert!(matches!(outcome, StartOutcome::Started { .. }));
        assert_eq!(backend.count(CallKind::Checkout), 1);
        assert_eq!(backend.count(CallKind::CreateRun), 1);
    }

    #[tokio::test]
    async fn partial_pick_scenario_waits_for_confirmation() {
        let (backend, handle) = spawn(MockBackend::new().with_orders(vec![order(1, false)])).await;
        handle.toggle(Uuid::from_u128(1)).await.unwrap();

        let outcome = handle.start_run(Vehicle::Van).await.unwrap();
        assert!(matches!(outcome, StartOutcome::NeedsConfirmation { .. }));
        assert_eq!(backend.mutation_count(), 0);

        let outcome = handle.confirm_partial_pick(Vehicle::Van).await.unwrap();
        assert!(matches!(outcome, StartOutcome::Started { .. }));
        assert_eq!(backend.count(CallKind::Checkout), 1);
        assert!(handle.board().await.unwrap().selection.is_empty());
    }

    #[tokio::test]
    async fn operations_on_different_vehicles_do_not_block_each_other() {
        let (backend, handle) = spawn(MockBackend::new()).await;
        backend.pause();

        let van = tokio::spawn({
            let handle = handle.clone();
            async move { handle.checkout_other(Vehicle::Van, "fuel".to_string()).await }
        });
        let cart = tokio::spawn({
            let handle = handle.clone();
            async move { handle.checkout_other(Vehicle::GolfCart, "wash".to_string()).await }
        });
        backend
            .wait_for(|calls| calls.iter().filter(|call| call.is_mutation()).count() == 2)
            .await;

        backend.resume();
        assert!(van.await.unwrap().is_ok());
        assert!(cart.await.unwrap().is_ok());
    }
}
