use axum::extract::State;
use axum::Json;

use crate::api::AppState;
use crate::domain::Address;
use crate::error::AppError;
use crate::service::TaxServiceError;

/// Normalize an address through the tax service.
pub async fn verify_address(
    State(state): State<AppState>,
    Json(address): Json<Address>,
) -> Result<Json<Address>, AppError> {
    let verified = state
        .service
        .verify_address(&address)
        .await
        .map_err(|e| match e {
            TaxServiceError::Rejected { .. } => AppError::BadRequest(e.to_string()),
            other => other.into(),
        })?;
    Ok(Json(verified))
}
