use super::accepted;
use crate::dtos::{AcceptedResponse, AssignPartnerRequest, RejectDocumentRequest};
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use validator::Validate;

#[tracing::instrument(skip(state, request))]
pub async fn assign_transaction_partner(
    State(state): State<AppState>,
    Path(transaction_id): Path<String>,
    Json(request): Json<AssignPartnerRequest>,
) -> Result<(StatusCode, Json<AcceptedResponse>), AppError> {
    request.validate()?;
    let events = state
        .engine
        .assign_transaction_partner(&transaction_id, &request.partner_id, request.method)
        .await?;
    accepted(&state, &transaction_id, events)
}

#[tracing::instrument(skip(state, request))]
pub async fn reject_document(
    State(state): State<AppState>,
    Path(transaction_id): Path<String>,
    Json(request): Json<RejectDocumentRequest>,
) -> Result<(StatusCode, Json<AcceptedResponse>), AppError> {
    request.validate()?;
    let events = state
        .engine
        .reject_document(&transaction_id, &request.document_id)
        .await?;
    accepted(&state, &transaction_id, events)
}
