//! Persistence seam for the engine.
//!
//! Array updates are set-unions so concurrent or repeated runs converge instead of
//! duplicating entries; connection inserts are idempotent per (document, transaction) pair.

use crate::models::{
    Connection, Document, OwnerProfile, Partner, PartnerAssignment, Stage, Transaction,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use service_core::error::AppError;

/// Documents whose `completed` stage is set, whose `pending` stage is not, and which have not
/// been touched since `updated_before`. Unmatchable documents are never returned.
#[derive(Debug, Clone)]
pub struct StaleQuery {
    pub completed: Stage,
    pub pending: Stage,
    pub updated_before: DateTime<Utc>,
    pub limit: i64,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn get_document(&self, id: &str) -> Result<Option<Document>, AppError>;
    /// Inserts or replaces the whole record.
    async fn save_document(&self, document: &Document) -> Result<(), AppError>;
    async fn get_documents(&self, ids: &[String]) -> Result<Vec<Document>, AppError>;
    async fn add_document_transaction(
        &self,
        document_id: &str,
        transaction_id: &str,
    ) -> Result<(), AppError>;
    async fn find_stale_documents(&self, query: &StaleQuery) -> Result<Vec<Document>, AppError>;
    async fn find_documents_by_partner(&self, partner_id: &str) -> Result<Vec<Document>, AppError>;
    /// Matchable documents of `owner_id` with no partner assigned.
    async fn find_unassigned_documents(&self, owner_id: &str) -> Result<Vec<Document>, AppError>;

    async fn get_partner(&self, id: &str) -> Result<Option<Partner>, AppError>;
    async fn save_partner(&self, partner: &Partner) -> Result<(), AppError>;
    async fn list_user_partners(&self, owner_id: &str) -> Result<Vec<Partner>, AppError>;
    async fn list_global_partners(&self) -> Result<Vec<Partner>, AppError>;
    async fn find_localized_partner(
        &self,
        owner_id: &str,
        global_partner_id: &str,
    ) -> Result<Option<Partner>, AppError>;
    async fn add_partner_aliases(&self, partner_id: &str, aliases: &[String]) -> Result<(), AppError>;
    async fn add_partner_email_domains(
        &self,
        partner_id: &str,
        domains: &[String],
    ) -> Result<(), AppError>;

    async fn get_owner_profile(&self, owner_id: &str) -> Result<Option<OwnerProfile>, AppError>;
    async fn save_owner_profile(&self, profile: &OwnerProfile) -> Result<(), AppError>;

    async fn get_transaction(&self, id: &str) -> Result<Option<Transaction>, AppError>;
    async fn save_transaction(&self, transaction: &Transaction) -> Result<(), AppError>;
    async fn get_transactions(&self, ids: &[String]) -> Result<Vec<Transaction>, AppError>;
    async fn find_transactions_by_partner(
        &self,
        partner_id: &str,
    ) -> Result<Vec<Transaction>, AppError>;
    /// Overwrites only the partner fields, whatever the current assignment is. Linked and
    /// rejected document ids are left untouched.
    async fn set_transaction_partner(
        &self,
        transaction_id: &str,
        partner: Option<&PartnerAssignment>,
        previous: Option<&PartnerAssignment>,
    ) -> Result<(), AppError>;
    /// Sets the transaction's partner unless the current one is a user choice.
    /// Returns whether the write happened.
    async fn assign_transaction_partner(
        &self,
        transaction_id: &str,
        assignment: &PartnerAssignment,
        previous: Option<&PartnerAssignment>,
    ) -> Result<bool, AppError>;
    /// Non-deleted transactions of `owner_id` dated within `[from, to]`.
    async fn transactions_in_window(
        &self,
        owner_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Transaction>, AppError>;
    async fn recent_transactions(
        &self,
        owner_id: &str,
        limit: i64,
    ) -> Result<Vec<Transaction>, AppError>;
    async fn add_transaction_document(
        &self,
        transaction_id: &str,
        document_id: &str,
    ) -> Result<(), AppError>;
    async fn add_transaction_rejection(
        &self,
        transaction_id: &str,
        document_id: &str,
    ) -> Result<(), AppError>;

    /// Returns `true` when a new row was created.
    async fn insert_connection_if_absent(&self, connection: &Connection) -> Result<bool, AppError>;

    async fn health_check(&self) -> Result<(), AppError>;
}
