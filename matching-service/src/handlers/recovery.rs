use crate::pipeline::SweepReport;
use crate::startup::AppState;
use axum::{extract::State, Json};
use service_core::error::AppError;

/// Runs one orphan sweep immediately and reports what was requeued.
#[tracing::instrument(skip(state))]
pub async fn run_sweep(State(state): State<AppState>) -> Result<Json<SweepReport>, AppError> {
    let report = state.sweep.run_once().await?;
    tracing::info!(
        partner_stage = report.partner_stage,
        transaction_stage = report.transaction_stage,
        failed = report.failed,
        "Manual recovery sweep finished"
    );
    Ok(Json(report))
}
