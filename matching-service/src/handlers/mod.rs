pub mod documents;
pub mod health;
pub mod partners;
pub mod recovery;
pub mod transactions;

pub use documents::{
    assign_document_partner, complete_extraction, deactivate_document, mark_not_invoice,
    record_extraction_failure,
};
pub use health::{health_check, metrics_handler, readiness_check};
pub use partners::{partner_deleted, partner_updated};
pub use recovery::run_sweep;
pub use transactions::{assign_transaction_partner, reject_document};

use crate::dtos::AcceptedResponse;
use crate::pipeline::PipelineEvent;
use crate::startup::AppState;
use axum::{http::StatusCode, Json};
use service_core::error::AppError;

/// Hands the action's follow-ups to the dispatcher and acknowledges with 202.
fn accepted(
    state: &AppState,
    id: &str,
    events: Vec<PipelineEvent>,
) -> Result<(StatusCode, Json<AcceptedResponse>), AppError> {
    let queued = events.len();
    state.dispatcher.enqueue_all(events)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            id: id.to_string(),
            queued,
        }),
    ))
}
