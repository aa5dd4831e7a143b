use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::coordinator::StartOutcome;
use crate::engine::lifecycle::RunState;
use crate::engine::selection::SelectionSet;
use crate::engine::session::Board;
use crate::error::AppError;
use crate::models::identity::Identity;
use crate::models::vehicle::{Vehicle, VehicleStatus};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/sessions", post(open_session))
        .route("/sessions/:id", delete(close_session))
        .route("/sessions/:id/board", get(board))
        .route("/sessions/:id/refresh", post(refresh))
        .route("/sessions/:id/selection/toggle", post(toggle_order))
        .route("/sessions/:id/selection/all", post(select_all))
        .route("/sessions/:id/selection/clear", post(clear_selection))
        .route("/sessions/:id/vehicles/:vehicle/start", post(start_run))
        .route("/sessions/:id/vehicles/:vehicle/confirm", post(confirm))
        .route("/sessions/:id/vehicles/:vehicle/cancel", post(cancel))
        .route("/sessions/:id/vehicles/:vehicle/checkin", post(checkin))
        .route(
            "/sessions/:id/vehicles/:vehicle/checkout-other",
            post(checkout_other),
        )
}

#[derive(Deserialize)]
pub struct OpenSessionRequest {
    pub user: Identity,
}

#[derive(Serialize)]
pub struct OpenSessionResponse {
    pub session_id: Uuid,
    pub board: Board,
}

#[derive(Deserialize)]
pub struct ToggleRequest {
    pub order_id: Uuid,
}

#[derive(Serialize)]
pub struct ToggleResponse {
    pub order_id: Uuid,
    pub selected: bool,
}

#[derive(Deserialize)]
pub struct CheckoutOtherRequest {
    pub purpose: String,
}

async fn open_session(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<OpenSessionRequest>,
) -> Result<Json<OpenSessionResponse>, AppError> {
    if payload.user.id.trim().is_empty() {
        return Err(AppError::BadRequest("user id cannot be empty".to_string()));
    }

    let handle = state.open_session(payload.user).await;
    let board = handle.board().await?;

    Ok(Json(OpenSessionResponse {
        session_id: handle.id(),
        board,
    }))
}

async fn close_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.close_session(id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn board(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Board>, AppError> {
    Ok(Json(state.session(id)?.board().await?))
}

async fn refresh(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Board>, AppError> {
    let session = state.session(id)?;
    session.refresh().await?;
    Ok(Json(session.board().await?))
}

async fn toggle_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ToggleRequest>,
) -> Result<Json<ToggleResponse>, AppError> {
    let selected = state.session(id)?.toggle(payload.order_id).await?;
    Ok(Json(ToggleResponse {
        order_id: payload.order_id,
        selected,
    }))
}

async fn select_all(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SelectionSet>, AppError> {
    Ok(Json(state.session(id)?.select_all().await?))
}

async fn clear_selection(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SelectionSet>, AppError> {
    Ok(Json(state.session(id)?.clear_selection().await?))
}

async fn start_run(
    State(state): State<Arc<AppState>>,
    Path((id, vehicle)): Path<(Uuid, String)>,
) -> Result<Json<StartOutcome>, AppError> {
    let vehicle: Vehicle = vehicle.parse()?;
    Ok(Json(state.session(id)?.start_run(vehicle).await?))
}

async fn confirm(
    State(state): State<Arc<AppState>>,
    Path((id, vehicle)): Path<(Uuid, String)>,
) -> Result<Json<StartOutcome>, AppError> {
    let vehicle: Vehicle = vehicle.parse()?;
    Ok(Json(state.session(id)?.confirm_partial_pick(vehicle).await?))
}

async fn cancel(
    State(state): State<Arc<AppState>>,
    Path((id, vehicle)): Path<(Uuid, String)>,
) -> Result<Json<RunState>, AppError> {
    let vehicle: Vehicle = vehicle.parse()?;
    Ok(Json(state.session(id)?.cancel_confirmation(vehicle).await?))
}

async fn checkin(
    State(state): State<Arc<AppState>>,
    Path((id, vehicle)): Path<(Uuid, String)>,
) -> Result<Json<VehicleStatus>, AppError> {
    let vehicle: Vehicle = vehicle.parse()?;
    Ok(Json(state.session(id)?.checkin(vehicle).await?))
}

async fn checkout_other(
    State(state): State<Arc<AppState>>,
    Path((id, vehicle)): Path<(Uuid, String)>,
    Json(payload): Json<CheckoutOtherRequest>,
) -> Result<Json<VehicleStatus>, AppError> {
    let vehicle: Vehicle = vehicle.parse()?;
    Ok(Json(
        state
            .session(id)?
            .checkout_other(vehicle, payload.purpose)
            .await?,
    ))
}
