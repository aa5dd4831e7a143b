//! Administration of the in-memory order/vehicle service. These routes stand in
//! for the warehouse tools and webhooks that move orders through fulfillment.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::order::Order;
use crate::models::run::DeliveryRun;
use crate::models::vehicle::{Vehicle, VehicleStatus};
use crate::service::memory::{CreateOrderRequest, UpdateOrderRequest};
use crate::service::DispatchBackend;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/backend/orders", post(create_order).get(list_orders))
        .route("/backend/orders/:id", patch(update_order))
        .route("/backend/vehicles", get(list_vehicles))
        .route("/backend/runs", get(list_runs))
        .route("/backend/runs/:id/complete", post(complete_run))
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.backend.create_order(payload)?))
}

async fn list_orders(State(state): State<Arc<AppState>>) -> Json<Vec<Order>> {
    Json(state.backend.all_orders())
}

async fn update_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateOrderRequest>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.backend.update_order(id, payload)?))
}

async fn list_vehicles(
    State(state): State<Arc<AppState>>,
) -> Result<Json<HashMap<Vehicle, VehicleStatus>>, AppError> {
    Ok(Json(state.backend.list_vehicle_statuses().await?))
}

async fn list_runs(State(state): State<Arc<AppState>>) -> Json<Vec<DeliveryRun>> {
    Json(state.backend.runs())
}

async fn complete_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeliveryRun>, AppError> {
    Ok(Json(state.backend.complete_run(id)?))
}
