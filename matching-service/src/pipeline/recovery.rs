//! Re-evaluation paths: the periodic orphan sweep and the partner/document lifecycle events.
//! Both only ever requeue the ordinary stage handlers.

use super::events::PipelineEvent;
use super::MatchingEngine;
use crate::models::Stage;
use crate::services::metrics::{record_error, record_recovery_retry};
use crate::services::StaleQuery;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use service_core::error::AppError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Documents requeued for the partner stage.
    pub partner_stage: usize,
    /// Documents requeued for the transaction stage.
    pub transaction_stage: usize,
    pub failed: usize,
}

/// Requeues stalled documents. Each retry holds one of `permits`, the dispatcher's worker
/// pool, so sweeping never adds concurrency on top of the pipeline.
#[derive(Clone)]
pub struct RecoverySweep {
    engine: MatchingEngine,
    permits: Arc<Semaphore>,
    staleness: Duration,
    interval: Duration,
    batch_size: i64,
}

impl RecoverySweep {
    pub fn new(
        engine: MatchingEngine,
        permits: Arc<Semaphore>,
        staleness: Duration,
        interval: Duration,
        batch_size: i64,
    ) -> Self {
        Self {
            engine,
            permits,
            staleness,
            interval,
            batch_size: batch_size.max(1),
        }
    }

    /// One pass over both stale scans.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> Result<SweepReport, AppError> {
        let staleness = chrono::Duration::from_std(self.staleness)
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Invalid staleness: {}", e)))?;
        let cutoff = Utc::now() - staleness;
        let mut report = SweepReport::default();

        let stalled_partner = self
            .engine
            .store()
            .find_stale_documents(&StaleQuery {
                completed: Stage::Extraction,
                pending: Stage::PartnerMatch,
                updated_before: cutoff,
                limit: self.batch_size,
            })
            .await?;
        let (ok, failed) = self
            .requeue(
                stalled_partner
                    .into_iter()
                    .map(|d| PipelineEvent::partner_match(d.id))
                    .collect(),
                Stage::PartnerMatch,
            )
            .await;
        report.partner_stage = ok;
        report.failed += failed;

        let stalled_transaction = self
            .engine
            .store()
            .find_stale_documents(&StaleQuery {
                completed: Stage::PartnerMatch,
                pending: Stage::TransactionMatch,
                updated_before: cutoff,
                limit: self.batch_size,
            })
            .await?;
        let (ok, failed) = self
            .requeue(
                stalled_transaction
                    .into_iter()
                    .map(|d| PipelineEvent::transaction_match(d.id))
                    .collect(),
                Stage::TransactionMatch,
            )
            .await;
        report.transaction_stage = ok;
        report.failed += failed;

        if report.partner_stage + report.transaction_stage + report.failed > 0 {
            tracing::info!(
                partner_stage = report.partner_stage,
                transaction_stage = report.transaction_stage,
                failed = report.failed,
                "Recovery sweep requeued stalled documents"
            );
        }
        Ok(report)
    }

    async fn requeue(&self, events: Vec<PipelineEvent>, stage: Stage) -> (usize, usize) {
        let results: Vec<Result<usize, AppError>> = stream::iter(events)
            .map(|event| {
                let engine = self.engine.clone();
                let permits = self.permits.clone();
                async move {
                    let _permit = permits
                        .acquire_owned()
                        .await
                        .map_err(|_| AppError::ServiceUnavailable)?;
                    record_recovery_retry(stage.as_str());
                    engine.process(event).await
                }
            })
            .buffer_unordered(self.batch_size as usize)
            .collect()
            .await;

        let failed = results.iter().filter(|r| r.is_err()).count();
        for e in results.iter().filter_map(|r| r.as_ref().err()) {
            tracing::warn!(stage = stage.as_str(), error = %e, "Recovery retry failed");
            record_error("recovery_retry");
        }
        (results.len() - failed, failed)
    }

    /// Sweeps on a fixed interval until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            staleness_secs = self.staleness.as_secs(),
            "Recovery sweep started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Recovery sweep shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        tracing::error!(error = %e, "Recovery sweep failed");
                        record_error("recovery_sweep");
                    }
                }
            }
        }
    }
}

impl MatchingEngine {
    /// Unassigned documents of the partner's owner may now match it; assigned documents
    /// without a connection may now find their transaction.
    #[instrument(skip(self))]
    pub(crate) async fn on_partner_updated(
        &self,
        partner_id: &str,
    ) -> Result<Vec<PipelineEvent>, AppError> {
        let Some(partner) = self.store.get_partner(partner_id).await? else {
            tracing::warn!(partner_id = %partner_id, "Updated partner not found");
            return Ok(Vec::new());
        };
        if partner.deleted {
            return self.on_partner_deactivated(partner_id).await;
        }

        let mut follow_ups = Vec::new();
        if let Some(owner_id) = partner.owner_id.as_deref() {
            follow_ups.extend(
                self.store
                    .find_unassigned_documents(owner_id)
                    .await?
                    .into_iter()
                    .filter(|d| d.extraction.complete)
                    .map(|d| PipelineEvent::partner_match(d.id)),
            );
        }
        follow_ups.extend(
            self.store
                .find_documents_by_partner(partner_id)
                .await?
                .into_iter()
                .filter(|d| d.is_matchable() && d.transaction_ids.is_empty())
                .map(|d| PipelineEvent::transaction_match(d.id)),
        );

        tracing::info!(
            partner_id = %partner_id,
            requeued = follow_ups.len(),
            "Partner updated; requeued affected documents"
        );
        Ok(follow_ups)
    }

    /// Everything pointing at a removed partner loses the assignment, including manual ones,
    /// and goes back through the partner stage.
    #[instrument(skip(self))]
    pub(crate) async fn on_partner_deactivated(
        &self,
        partner_id: &str,
    ) -> Result<Vec<PipelineEvent>, AppError> {
        let mut follow_ups = Vec::new();

        for stale in self.store.find_documents_by_partner(partner_id).await? {
            let _lock = self.lock_document(&stale.id).await;
            follow_ups.extend(self.clear_removed_partner(&stale.id, partner_id).await?);
        }

        for transaction in self.store.find_transactions_by_partner(partner_id).await? {
            self.store
                .set_transaction_partner(&transaction.id, None, transaction.partner.as_ref())
                .await?;
            tracing::info!(
                transaction_id = %transaction.id,
                previous_partner_id = %partner_id,
                "Cleared transaction assignment to removed partner"
            );
        }

        Ok(follow_ups)
    }

    async fn clear_removed_partner(
        &self,
        document_id: &str,
        partner_id: &str,
    ) -> Result<Option<PipelineEvent>, AppError> {
        let Some(mut document) = self.store.get_document(document_id).await? else {
            return Ok(None);
        };
        if document.partner_id() != Some(partner_id) {
            return Ok(None);
        }
        document.previous_partner = document.partner.take();
        document.partner_suggestions.retain(|s| s.partner_id != partner_id);
        document.reset_stage(Stage::PartnerMatch, Utc::now());
        self.store.save_document(&document).await?;
        tracing::info!(
            document_id = %document.id,
            previous_partner_id = %partner_id,
            "Cleared assignment to removed partner"
        );
        Ok(document
            .is_matchable()
            .then(|| PipelineEvent::partner_match(document.id)))
    }

    /// A removed document drops its pending suggestions; it is never matched again.
    #[instrument(skip(self))]
    pub(crate) async fn on_document_deactivated(
        &self,
        document_id: &str,
    ) -> Result<Vec<PipelineEvent>, AppError> {
        let Some(mut document) = self.store.get_document(document_id).await? else {
            return Ok(Vec::new());
        };
        document.deleted = true;
        document.partner_suggestions.clear();
        document.transaction_suggestions.clear();
        document.updated_at = Utc::now();
        self.store.save_document(&document).await?;
        tracing::info!(document_id = %document_id, "Document deactivated");
        Ok(Vec::new())
    }
}
