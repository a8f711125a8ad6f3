use crate::collaborators::StoreError;
use crate::orchestration::TaxError;
use crate::service::TaxServiceError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Internal server error: {0}")]
    Internal(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Tax service error: {0}")]
    Upstream(String),
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<TaxServiceError> for AppError {
    fn from(err: TaxServiceError) -> Self {
        AppError::Upstream(err.to_string())
    }
}

impl From<TaxError> for AppError {
    fn from(err: TaxError) -> Self {
        match err {
            TaxError::Config(e) => AppError::Config(e.to_string()),
            TaxError::Router(e) => AppError::BadRequest(e.to_string()),
            TaxError::Service(e) => e.into(),
            TaxError::Store(e) => e.into(),
            TaxError::OrderNotFound(_) => AppError::NotFound(err.to_string()),
            TaxError::InvalidTransition { .. } | TaxError::NotLookedUp { .. } => {
                AppError::Conflict(err.to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Config(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Upstream(msg) => (StatusCode::BAD_GATEWAY, msg),
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}
