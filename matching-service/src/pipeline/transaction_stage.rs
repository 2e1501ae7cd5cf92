//! Transaction stage: ranks candidate transactions, commits at most one auto-connection, and
//! keeps partner assignments in step with the connected transactions.

use super::events::{PipelineEvent, StageOutcome, StageReport};
use super::MatchingEngine;
use crate::matching::{rank_transactions, Coverage, TransactionInput, TransactionMatch};
use crate::models::{
    Connection, Document, MatchMethod, Stage, Transaction, TransactionSuggestion,
};
use crate::services::collaborators::Notification;
use crate::services::metrics::{
    record_error, record_stage_duration, record_stage_run, record_transaction_match,
};
use chrono::{Duration, Utc};
use service_core::error::AppError;
use std::time::Instant;
use tracing::instrument;

impl MatchingEngine {
    #[instrument(skip(self))]
    pub async fn run_transaction_stage(&self, document_id: &str) -> Result<StageReport, AppError> {
        let start = Instant::now();

        let Some(mut document) = self.store.get_document(document_id).await? else {
            tracing::warn!(document_id = %document_id, "Document not found for transaction stage");
            return Ok(StageReport::skipped());
        };
        if !document.is_matchable() || !document.extraction.complete {
            tracing::debug!(document_id = %document_id, "Document not ready for transaction stage");
            return Ok(StageReport::skipped());
        }

        let previous_partner = document.partner_id().map(str::to_string);

        let outcome = match self.match_transactions(&mut document).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(
                    document_id = %document.id,
                    error = %e,
                    "Transaction stage failed; completing without a match"
                );
                record_error("transaction_stage");
                document.transaction_suggestions.clear();
                StageOutcome::Failed(e.to_string())
            }
        };

        document.complete_stage(Stage::TransactionMatch, Utc::now());
        self.store.save_document(&document).await?;

        let changed = document.partner_id().map(str::to_string) != previous_partner;
        let follow_ups = if changed {
            vec![PipelineEvent::partner_match(document.id.clone())]
        } else {
            Vec::new()
        };

        record_stage_run(Stage::TransactionMatch.as_str(), outcome.as_str());
        record_stage_duration(Stage::TransactionMatch.as_str(), start.elapsed().as_secs_f64());
        tracing::info!(
            document_id = %document.id,
            owner_id = %document.owner_id,
            outcome = outcome.as_str(),
            connected = document.transaction_ids.len(),
            suggestions = document.transaction_suggestions.len(),
            "Transaction stage completed"
        );

        Ok(StageReport { outcome, follow_ups })
    }

    async fn match_transactions(&self, document: &mut Document) -> Result<StageOutcome, AppError> {
        let owner = self.store.get_owner_profile(&document.owner_id).await?;
        let partner = match document.partner_id() {
            Some(id) => self.store.get_partner(id).await?,
            None => None,
        };
        let input = TransactionInput::from_document(document, partner.as_ref(), owner.as_ref());

        if document.fields.lacks_transaction_signals() && input.partner_names.is_empty() {
            document.transaction_suggestions.clear();
            return Ok(StageOutcome::NoSignals);
        }

        let candidates = self.candidates(document, &input).await?;
        let ranked = rank_transactions(&input, &candidates, &self.settings);

        let mut outcome = if ranked.is_empty() {
            StageOutcome::NoMatch
        } else {
            StageOutcome::Suggested
        };

        if document.transaction_ids.is_empty() {
            if let Some(top) = ranked
                .first()
                .filter(|m| m.confidence >= self.settings.transaction_auto_threshold)
            {
                if let Some(transaction) = candidates.iter().find(|t| t.id == top.transaction_id) {
                    if self.auto_connect(document, transaction, top).await? {
                        outcome = StageOutcome::Matched;
                    }
                }
            }
        }

        document.transaction_suggestions = ranked
            .iter()
            .filter(|m| !document.transaction_ids.contains(&m.transaction_id))
            .take(self.settings.transaction_suggestion_limit)
            .map(|m| TransactionSuggestion {
                transaction_id: m.transaction_id.clone(),
                confidence: m.confidence,
                signals: m.signals.clone(),
            })
            .collect();
        if !document.transaction_suggestions.is_empty() {
            record_transaction_match("suggestion");
        }

        if let Err(e) = self.sync_linked_transactions(document).await {
            tracing::warn!(document_id = %document.id, error = %e, "Failed to synchronize linked transactions");
        }
        Ok(outcome)
    }

    /// Dated documents look in a window around their date; undated ones take the most
    /// recent transactions.
    async fn candidates(
        &self,
        document: &Document,
        input: &TransactionInput,
    ) -> Result<Vec<Transaction>, AppError> {
        match input.date {
            Some(date) => {
                let from = date - Duration::days(self.settings.window_days_before);
                let to = date + Duration::days(self.settings.window_days_after);
                self.store
                    .transactions_in_window(&document.owner_id, from, to)
                    .await
            }
            None => {
                self.store
                    .recent_transactions(&document.owner_id, self.settings.recent_transaction_limit)
                    .await
            }
        }
    }

    /// Connects the document unless the transaction is already paid for by other documents.
    ///
    /// Coverage is read again under the transaction lock, so two documents racing for the
    /// same transaction cannot both see it uncovered.
    async fn auto_connect(
        &self,
        document: &mut Document,
        candidate: &Transaction,
        top: &TransactionMatch,
    ) -> Result<bool, AppError> {
        let _lock = self.lock_transaction(&candidate.id).await;
        let Some(transaction) = self.store.get_transaction(&candidate.id).await? else {
            return Ok(false);
        };
        if transaction.deleted || transaction.has_rejected(&document.id) {
            return Ok(false);
        }

        let connected: Vec<Document> = self
            .store
            .get_documents(&transaction.document_ids)
            .await?
            .into_iter()
            .filter(|d| !d.deleted && d.id != document.id)
            .collect();
        let coverage = Coverage::compute(transaction.amount, connected.iter().map(|d| d.fields.amount));

        if coverage.is_covered(self.settings.coverage_tolerance) {
            record_transaction_match("coverage_skipped");
            tracing::info!(
                document_id = %document.id,
                transaction_id = %transaction.id,
                confidence = top.confidence,
                coverage_ratio = coverage.ratio(),
                "Transaction already covered; keeping match as a suggestion"
            );
            return Ok(false);
        }

        let connection = Connection::new(
            document.owner_id.clone(),
            document.id.clone(),
            transaction.id.clone(),
            MatchMethod::Auto,
            top.signals.clone(),
            top.confidence,
        );
        let created = self.store.insert_connection_if_absent(&connection).await?;
        self.store
            .add_transaction_document(&transaction.id, &document.id)
            .await?;
        self.store
            .add_document_transaction(&document.id, &transaction.id)
            .await?;
        if !document.transaction_ids.contains(&transaction.id) {
            document.transaction_ids.push(transaction.id.clone());
        }

        if created {
            record_transaction_match("auto");
            tracing::info!(
                document_id = %document.id,
                transaction_id = %transaction.id,
                confidence = top.confidence,
                signals = ?top.signals,
                "Transaction auto-matched"
            );
            self.notify_detached(Notification::TransactionMatched {
                owner_id: document.owner_id.clone(),
                document_id: document.id.clone(),
                transaction_id: transaction.id.clone(),
                confidence: top.confidence,
            });
        }
        Ok(true)
    }
}
