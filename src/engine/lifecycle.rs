use std::sync::Arc;

use prometheus::IntGauge;
use serde::Serialize;
use tokio::sync::watch;

use crate::error::AppError;
use crate::models::order::Order;
use crate::models::vehicle::Vehicle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    StartRun,
    Checkin,
    CheckoutOther,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::StartRun => "start_run",
            Operation::Checkin => "checkin",
            Operation::CheckoutOther => "checkout_other",
        }
    }
}

/// `Idle → AwaitingConfirmation → InFlight → Idle`, one machine per vehicle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    Idle,
    AwaitingConfirmation { orders: Vec<Order> },
    InFlight { operation: Operation },
}

impl RunState {
    pub fn is_in_flight(&self) -> bool {
        matches!(self, RunState::InFlight { .. })
    }
}

/// Counts operations awaiting the backend across all vehicles of a session.
#[derive(Clone)]
pub struct InFlightTracker {
    count: Arc<watch::Sender<usize>>,
    gauge: Option<IntGauge>,
}

impl InFlightTracker {
    pub fn new() -> Self {
        Self {
            count: Arc::new(watch::Sender::new(0)),
            gauge: None,
        }
    }

    pub fn with_gauge(mut self, gauge: IntGauge) -> Self {
        self.gauge = Some(gauge);
        self
    }

    pub fn in_flight(&self) -> usize {
        *self.count.borrow()
    }

    pub async fn settled(&self) {
        let mut rx = self.count.subscribe();
        let _ = rx.wait_for(|count| *count == 0).await;
    }

    fn enter(&self) {
        self.count.send_modify(|count| *count += 1);
        if let Some(gauge) = &self.gauge {
            gauge.inc();
        }
    }

    fn leave(&self) {
        self.count
            .send_modify(|count| *count = count.saturating_sub(1));
        if let Some(gauge) = &self.gauge {
            gauge.dec();
        }
    }
}

impl Default for InFlightTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Dropping it returns the vehicle to `Idle`.
pub struct InFlightGuard {
    state: Arc<watch::Sender<RunState>>,
    tracker: InFlightTracker,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.state.send_replace(RunState::Idle);
        self.tracker.leave();
    }
}

pub struct RunLifecycle {
    vehicle: Vehicle,
    state: Arc<watch::Sender<RunState>>,
    tracker: InFlightTracker,
}

impl RunLifecycle {
    pub fn new(vehicle: Vehicle, tracker: InFlightTracker) -> Self {
        Self {
            vehicle,
            state: Arc::new(watch::Sender::new(RunState::Idle)),
            tracker,
        }
    }

    pub fn state(&self) -> RunState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    pub fn begin(&self, operation: Operation) -> Result<InFlightGuard, AppError> {
        let mut accepted = false;
        self.state.send_if_modified(|state| {
            if state.is_in_flight() {
                return false;
            }
            *state = RunState::InFlight { operation };
            accepted = true;
            true
        });

        if !accepted {
            return Err(AppError::Busy(self.vehicle));
        }

        self.tracker.enter();
        Ok(InFlightGuard {
            state: self.state.clone(),
            tracker: self.tracker.clone(),
        })
    }

    pub fn await_confirmation(&self, orders: Vec<Order>) -> Result<(), AppError> {
        let mut accepted = false;
        self.state.send_if_modified(|state| {
            if state.is_in_flight() {
                return false;
            }
            *state = RunState::AwaitingConfirmation { orders };
            accepted = true;
            true
        });

        if accepted {
            Ok(())
        } else {
            Err(AppError::Busy(self.vehicle))
        }
    }

    pub fn is_awaiting_confirmation(&self) -> bool {
        matches!(*self.state.borrow(), RunState::AwaitingConfirmation { .. })
    }

    pub fn cancel_confirmation(&self) -> Result<RunState, AppError> {
        let mut busy = false;
        self.state.send_if_modified(|state| match state {
            RunState::AwaitingConfirmation { .. } => {
                *state = RunState::Idle;
                true
            }
            RunState::InFlight { .. } => {
                busy = true;
                false
            }
            RunState::Idle => false,
        });

        if busy {
            Err(AppError::Busy(self.vehicle))
        } else {
            Ok(self.state())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lifecycle() -> (RunLifecycle, InFlightTracker) {
        let tracker = InFlightTracker::new();
        (RunLifecycle::new(Vehicle::Van, tracker.clone()), tracker)
    }

    #[test]
    fn second_begin_is_rejected_while_first_is_held() {
        let (lifecycle, tracker) = lifecycle();

        let guard = lifecycle.begin(Operation::StartRun).unwrap();
        assert_eq!(tracker.in_flight(), 1);
        assert_eq!(
            lifecycle.begin(Operation::Checkin).err(),
            Some(AppError::Busy(Vehicle::Van))
        );

        drop(guard);
        assert_eq!(lifecycle.state(), RunState::Idle);
        assert_eq!(tracker.in_flight(), 0);
        assert!(lifecycle.begin(Operation::Checkin).is_ok());
    }

    #[test]
    fn cancel_returns_to_idle() {
        let (lifecycle, _tracker) = lifecycle();
        lifecycle.await_confirmation(Vec::new()).unwrap();
        assert!(lifecycle.is_awaiting_confirmation());

        assert_eq!(lifecycle.cancel_confirmation().unwrap(), RunState::Idle);
    }

    #[test]
    fn confirmation_cannot_interrupt_in_flight() {
        let (lifecycle, _tracker) = lifecycle();
        let _guard = lifecycle.begin(Operation::CheckoutOther).unwrap();

        assert!(lifecycle.await_confirmation(Vec::new()).is_err());
        assert!(lifecycle.cancel_confirmation().is_err());
        assert!(lifecycle.state().is_in_flight());
    }

    #[tokio::test]
    async fn settled_resolves_when_last_guard_drops() {
        let (lifecycle, tracker) = lifecycle();
        let guard = lifecycle.begin(Operation::StartRun).unwrap();

        let waiter = tokio::spawn({
            let tracker = tracker.clone();
            async move { tracker.settled().await }
        });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
    }
}
