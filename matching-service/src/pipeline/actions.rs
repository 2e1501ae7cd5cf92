//! Operations exposed to other pipeline stages and to user actions. Each returns the events
//! the caller should enqueue.

use super::events::PipelineEvent;
use super::MatchingEngine;
use crate::matching::{resolve_partner_conflict, Resolution};
use crate::models::{
    Document, ExtractedFields, MatchMethod, MatchSource, Partner, PartnerAssignment, Stage,
    Transaction,
};
use chrono::Utc;
use service_core::error::AppError;
use tracing::instrument;

/// Confidence recorded for assignments a user made.
pub const USER_CONFIDENCE: u8 = 100;

impl MatchingEngine {
    /// Stores extraction output and starts matching. Re-extraction resets both match stages.
    #[instrument(skip(self, fields))]
    pub async fn complete_extraction(
        &self,
        document_id: &str,
        owner_id: &str,
        file_name: &str,
        fields: ExtractedFields,
    ) -> Result<Vec<PipelineEvent>, AppError> {
        let _lock = self.lock_document(document_id).await;
        let now = Utc::now();

        let mut document = match self.store.get_document(document_id).await? {
            Some(existing) if existing.owner_id != owner_id => {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "Document {} belongs to another owner",
                    document_id
                )));
            }
            Some(existing) => existing,
            None => Document {
                id: document_id.to_string(),
                ..Document::new(owner_id, file_name)
            },
        };

        if !file_name.is_empty() {
            document.file_name = file_name.to_string();
        }
        document.fields = fields;
        document.extraction_error = None;
        document.reset_stage(Stage::PartnerMatch, now);
        document.reset_stage(Stage::TransactionMatch, now);
        document.complete_stage(Stage::Extraction, now);
        self.store.save_document(&document).await?;

        tracing::info!(document_id = %document_id, owner_id = %owner_id, "Extraction completed");
        Ok(vec![PipelineEvent::ExtractionCompleted {
            document_id: document_id.to_string(),
        }])
    }

    /// Records a failed extraction; the document leaves the matching pipeline.
    #[instrument(skip(self))]
    pub async fn record_extraction_failure(
        &self,
        document_id: &str,
        error: &str,
    ) -> Result<Vec<PipelineEvent>, AppError> {
        let _lock = self.lock_document(document_id).await;
        let mut document = self.require_document(document_id).await?;
        document.extraction_error = Some(error.to_string());
        document.updated_at = Utc::now();
        self.store.save_document(&document).await?;
        Ok(Vec::new())
    }

    /// The user says this file is not an invoice; it is never matched again.
    #[instrument(skip(self))]
    pub async fn mark_not_invoice(&self, document_id: &str) -> Result<Vec<PipelineEvent>, AppError> {
        let _lock = self.lock_document(document_id).await;
        let mut document = self.require_document(document_id).await?;
        document.not_invoice = true;
        document.partner_suggestions.clear();
        document.transaction_suggestions.clear();
        document.updated_at = Utc::now();
        self.store.save_document(&document).await?;
        Ok(Vec::new())
    }

    #[instrument(skip(self))]
    pub async fn deactivate_document(&self, document_id: &str) -> Result<Vec<PipelineEvent>, AppError> {
        self.require_document(document_id).await?;
        Ok(vec![PipelineEvent::DocumentDeactivated {
            document_id: document_id.to_string(),
        }])
    }

    #[instrument(skip(self))]
    pub async fn assign_document_partner(
        &self,
        document_id: &str,
        partner_id: &str,
        method: MatchMethod,
    ) -> Result<Vec<PipelineEvent>, AppError> {
        let _lock = self.lock_document(document_id).await;
        let mut document = self.require_document(document_id).await?;
        let partner = self.require_partner(partner_id, &document.owner_id).await?;
        let partner = self.localize(partner, &document.owner_id).await?;

        document.partner = Some(PartnerAssignment::new(
            partner.id.clone(),
            partner.partner_type,
            method,
            USER_CONFIDENCE,
            MatchSource::User,
        ));
        document.partner_suggestions.clear();
        document.complete_stage(Stage::PartnerMatch, Utc::now());
        if let Err(e) = self.sync_linked_transactions(&mut document).await {
            tracing::warn!(document_id = %document_id, error = %e, "Failed to synchronize linked transactions");
        }
        self.store.save_document(&document).await?;

        tracing::info!(
            document_id = %document_id,
            partner_id = %partner.id,
            method = method.as_str(),
            "Partner assigned to document"
        );
        Ok(vec![PipelineEvent::transaction_match(document_id)])
    }

    /// A user assignment on a transaction replaces whatever was there. Linked documents that
    /// do not carry their own user choice follow it.
    #[instrument(skip(self))]
    pub async fn assign_transaction_partner(
        &self,
        transaction_id: &str,
        partner_id: &str,
        method: MatchMethod,
    ) -> Result<Vec<PipelineEvent>, AppError> {
        let mut transaction = self.store.get_transaction(transaction_id).await?.ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("Transaction {} not found", transaction_id))
        })?;
        let partner = self.require_partner(partner_id, &transaction.owner_id).await?;
        let partner = self.localize(partner, &transaction.owner_id).await?;

        let assignment = PartnerAssignment::new(
            partner.id.clone(),
            partner.partner_type,
            method,
            USER_CONFIDENCE,
            MatchSource::User,
        );
        if transaction.partner_id() != Some(partner.id.as_str()) {
            transaction.previous_partner = transaction.partner.take();
        }
        transaction.partner = Some(assignment);
        self.store
            .set_transaction_partner(
                &transaction.id,
                transaction.partner.as_ref(),
                transaction.previous_partner.as_ref(),
            )
            .await?;

        let mut follow_ups = Vec::new();
        for document_id in &transaction.document_ids {
            let _lock = self.lock_document(document_id).await;
            if self.follow_transaction_partner(document_id, &transaction).await? {
                follow_ups.push(PipelineEvent::transaction_match(document_id.clone()));
            }
        }

        tracing::info!(
            transaction_id = %transaction_id,
            partner_id = %partner.id,
            method = method.as_str(),
            "Partner assigned to transaction"
        );
        Ok(follow_ups)
    }

    async fn follow_transaction_partner(
        &self,
        document_id: &str,
        transaction: &Transaction,
    ) -> Result<bool, AppError> {
        let Some(mut document) = self.store.get_document(document_id).await? else {
            return Ok(false);
        };
        if !document.is_matchable() {
            return Ok(false);
        }
        match resolve_partner_conflict(document.partner.as_ref(), transaction.partner.as_ref()) {
            Resolution::AssignToDocument(assignment) => {
                document.partner = Some(assignment);
                document.updated_at = Utc::now();
                self.store.save_document(&document).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// The user says this document does not belong to this transaction. The rejection is
    /// permanent for automatic matching.
    #[instrument(skip(self))]
    pub async fn reject_document(
        &self,
        transaction_id: &str,
        document_id: &str,
    ) -> Result<Vec<PipelineEvent>, AppError> {
        let _lock = self.lock_document(document_id).await;
        if self.store.get_transaction(transaction_id).await?.is_none() {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Transaction {} not found",
                transaction_id
            )));
        }
        let mut document = self.require_document(document_id).await?;

        self.store
            .add_transaction_rejection(transaction_id, document_id)
            .await?;
        document
            .transaction_suggestions
            .retain(|s| s.transaction_id != transaction_id);
        document.updated_at = Utc::now();
        self.store.save_document(&document).await?;

        tracing::info!(
            document_id = %document_id,
            transaction_id = %transaction_id,
            "Document rejected for transaction"
        );
        Ok(vec![PipelineEvent::transaction_match(document_id)])
    }

    #[instrument(skip(self))]
    pub async fn partner_updated(&self, partner_id: &str) -> Result<Vec<PipelineEvent>, AppError> {
        self.store.get_partner(partner_id).await?.ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("Partner {} not found", partner_id))
        })?;
        Ok(vec![PipelineEvent::PartnerUpdated {
            partner_id: partner_id.to_string(),
        }])
    }

    /// Soft-deletes the partner and schedules re-evaluation of everything pointing at it.
    #[instrument(skip(self))]
    pub async fn partner_deleted(&self, partner_id: &str) -> Result<Vec<PipelineEvent>, AppError> {
        let mut partner = self.store.get_partner(partner_id).await?.ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("Partner {} not found", partner_id))
        })?;
        if !partner.deleted {
            partner.deleted = true;
            partner.updated_at = Utc::now();
            self.store.save_partner(&partner).await?;
        }
        Ok(vec![PipelineEvent::PartnerDeactivated {
            partner_id: partner_id.to_string(),
        }])
    }

    async fn require_document(&self, document_id: &str) -> Result<Document, AppError> {
        self.store.get_document(document_id).await?.ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("Document {} not found", document_id))
        })
    }

    /// The partner must exist, be active, and be either shared or owned by `owner_id`.
    async fn require_partner(
        &self,
        partner_id: &str,
        owner_id: &str,
    ) -> Result<Partner, AppError> {
        let partner = self
            .store
            .get_partner(partner_id)
            .await?
            .filter(|p| !p.deleted)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Partner {} not found", partner_id)))?;
        match partner.owner_id.as_deref() {
            Some(owner) if owner != owner_id => Err(AppError::Conflict(anyhow::anyhow!(
                "Partner {} belongs to another owner",
                partner_id
            ))),
            _ => Ok(partner),
        }
    }
}
