use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::engine::snapshot::{Stamped, Versioned};
use crate::error::AppError;
use crate::models::vehicle::{Vehicle, VehicleStatus};
use crate::service::DispatchBackend;

/// Last successfully fetched status of every vehicle. A vehicle with no entry
/// is still loading.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub statuses: HashMap<Vehicle, VehicleStatus>,
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl StatusSnapshot {
    pub fn from_statuses(statuses: HashMap<Vehicle, VehicleStatus>) -> Self {
        Self {
            statuses,
            refreshed_at: Some(Utc::now()),
        }
    }

    pub fn get(&self, vehicle: Vehicle) -> Option<&VehicleStatus> {
        self.statuses.get(&vehicle)
    }

    pub fn is_loaded(&self) -> bool {
        self.refreshed_at.is_some()
    }
}

/// Cache of vehicle statuses. Only [`VehicleStatusStore::refresh`] writes it;
/// a failed refresh leaves the previous snapshot in place.
#[derive(Clone)]
pub struct VehicleStatusStore {
    cell: Arc<Versioned<StatusSnapshot>>,
}

impl VehicleStatusStore {
    pub fn new() -> Self {
        Self {
            cell: Arc::new(Versioned::new(StatusSnapshot::default())),
        }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.cell.current()
    }

    pub fn read(&self, vehicle: Vehicle) -> Option<VehicleStatus> {
        self.cell.current().get(vehicle).cloned()
    }

    pub fn subscribe(&self) -> watch::Receiver<Stamped<StatusSnapshot>> {
        self.cell.subscribe()
    }

    pub async fn refresh<B>(&self, backend: &B) -> Result<StatusSnapshot, AppError>
    where
        B: DispatchBackend + ?Sized,
    {
        let ticket = self.cell.ticket();
        let statuses = backend.list_vehicle_statuses().await?;

        for (vehicle, status) in &statuses {
            if !status.is_consistent() {
                warn!(%vehicle, ?status, "backend reported an inconsistent vehicle status");
            }
        }

        let snapshot = StatusSnapshot::from_statuses(statuses);
        if !self.cell.publish(ticket, snapshot.clone()) {
            debug!("vehicle status refresh superseded by a newer one");
            return Ok(self.cell.current());
        }

        Ok(snapshot)
    }
}

impl Default for VehicleStatusStore {
    fn default() -> Self {
        Self::new()
    }
}
