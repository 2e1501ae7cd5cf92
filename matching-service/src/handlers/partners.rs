use super::accepted;
use crate::dtos::AcceptedResponse;
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;

/// The partner's identifying data changed elsewhere; re-evaluate what may now match it.
#[tracing::instrument(skip(state))]
pub async fn partner_updated(
    State(state): State<AppState>,
    Path(partner_id): Path<String>,
) -> Result<(StatusCode, Json<AcceptedResponse>), AppError> {
    let events = state.engine.partner_updated(&partner_id).await?;
    accepted(&state, &partner_id, events)
}

#[tracing::instrument(skip(state))]
pub async fn partner_deleted(
    State(state): State<AppState>,
    Path(partner_id): Path<String>,
) -> Result<(StatusCode, Json<AcceptedResponse>), AppError> {
    let events = state.engine.partner_deleted(&partner_id).await?;
    accepted(&state, &partner_id, events)
}
