use super::accepted;
use crate::dtos::{
    AcceptedResponse, AssignPartnerRequest, ExtractionFailureRequest, ExtractionRequest,
};
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use validator::Validate;

#[tracing::instrument(skip(state, request))]
pub async fn complete_extraction(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
    Json(request): Json<ExtractionRequest>,
) -> Result<(StatusCode, Json<AcceptedResponse>), AppError> {
    request.validate()?;
    let owner_id = request.owner_id.clone();
    let file_name = request.file_name.clone();
    let events = state
        .engine
        .complete_extraction(&document_id, &owner_id, &file_name, request.into())
        .await?;
    accepted(&state, &document_id, events)
}

#[tracing::instrument(skip(state, request))]
pub async fn record_extraction_failure(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
    Json(request): Json<ExtractionFailureRequest>,
) -> Result<(StatusCode, Json<AcceptedResponse>), AppError> {
    request.validate()?;
    let events = state
        .engine
        .record_extraction_failure(&document_id, &request.error)
        .await?;
    accepted(&state, &document_id, events)
}

#[tracing::instrument(skip(state))]
pub async fn mark_not_invoice(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
) -> Result<(StatusCode, Json<AcceptedResponse>), AppError> {
    let events = state.engine.mark_not_invoice(&document_id).await?;
    accepted(&state, &document_id, events)
}

#[tracing::instrument(skip(state))]
pub async fn deactivate_document(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
) -> Result<(StatusCode, Json<AcceptedResponse>), AppError> {
    let events = state.engine.deactivate_document(&document_id).await?;
    accepted(&state, &document_id, events)
}

#[tracing::instrument(skip(state, request))]
pub async fn assign_document_partner(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
    Json(request): Json<AssignPartnerRequest>,
) -> Result<(StatusCode, Json<AcceptedResponse>), AppError> {
    request.validate()?;
    let events = state
        .engine
        .assign_document_partner(&document_id, &request.partner_id, request.method)
        .await?;
    accepted(&state, &document_id, events)
}
