use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::models::vehicle::Vehicle;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum AppError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("{0}")]
    Denied(String),

    #[error("{0} has an operation in progress")]
    Busy(Vehicle),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("{0} is not checked out")]
    NotCheckedOut(Vehicle),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation",
            AppError::Denied(_) => "denied",
            AppError::Busy(_) => "busy",
            AppError::Conflict(_) => "conflict",
            AppError::NotCheckedOut(_) => "not_checked_out",
            AppError::Unavailable(_) => "unavailable",
            AppError::NotFound(_) => "not_found",
            AppError::BadRequest(_) => "bad_request",
            AppError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Validation(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Denied(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Busy(_) => StatusCode::LOCKED,
            AppError::Conflict(_) | AppError::NotCheckedOut(_) => StatusCode::CONFLICT,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string(),
            "kind": self.kind(),
        }));

        (status, body).into_response()
    }
}
