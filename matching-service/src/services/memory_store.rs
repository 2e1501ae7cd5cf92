//! In-process store used by tests and local runs.

use super::store::{StaleQuery, Store};
use crate::models::{
    Connection, Document, OwnerProfile, Partner, PartnerAssignment, Transaction,
};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use service_core::error::AppError;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct MemoryStore {
    documents: RwLock<HashMap<String, Document>>,
    partners: RwLock<HashMap<String, Partner>>,
    profiles: RwLock<HashMap<String, OwnerProfile>>,
    transactions: RwLock<HashMap<String, Transaction>>,
    connections: RwLock<HashMap<(String, String), Connection>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every connection, ordered by creation.
    pub async fn all_connections(&self) -> Vec<Connection> {
        let mut all: Vec<Connection> = self.connections.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        all
    }

    pub async fn all_partners(&self) -> Vec<Partner> {
        let mut all: Vec<Partner> = self.partners.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        all
    }
}

fn union_into(target: &mut Vec<String>, values: &[String]) {
    for value in values {
        if !target.contains(value) {
            target.push(value.clone());
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_document(&self, id: &str) -> Result<Option<Document>, AppError> {
        Ok(self.documents.read().await.get(id).cloned())
    }

    async fn save_document(&self, document: &Document) -> Result<(), AppError> {
        self.documents
            .write()
            .await
            .insert(document.id.clone(), document.clone());
        Ok(())
    }

    async fn get_documents(&self, ids: &[String]) -> Result<Vec<Document>, AppError> {
        let documents = self.documents.read().await;
        Ok(ids.iter().filter_map(|id| documents.get(id).cloned()).collect())
    }

    async fn add_document_transaction(
        &self,
        document_id: &str,
        transaction_id: &str,
    ) -> Result<(), AppError> {
        if let Some(document) = self.documents.write().await.get_mut(document_id) {
            union_into(&mut document.transaction_ids, &[transaction_id.to_string()]);
            document.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn find_stale_documents(&self, query: &StaleQuery) -> Result<Vec<Document>, AppError> {
        let documents = self.documents.read().await;
        let mut stale: Vec<Document> = documents
            .values()
            .filter(|d| d.is_matchable())
            .filter(|d| d.stage(query.completed).complete && !d.stage(query.pending).complete)
            .filter(|d| d.updated_at < query.updated_before)
            .cloned()
            .collect();
        stale.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        stale.truncate(query.limit.max(0) as usize);
        Ok(stale)
    }

    async fn find_documents_by_partner(&self, partner_id: &str) -> Result<Vec<Document>, AppError> {
        Ok(self
            .documents
            .read()
            .await
            .values()
            .filter(|d| !d.deleted && d.partner_id() == Some(partner_id))
            .cloned()
            .collect())
    }

    async fn find_unassigned_documents(&self, owner_id: &str) -> Result<Vec<Document>, AppError> {
        Ok(self
            .documents
            .read()
            .await
            .values()
            .filter(|d| d.owner_id == owner_id && d.partner.is_none() && d.is_matchable())
            .cloned()
            .collect())
    }

    async fn get_partner(&self, id: &str) -> Result<Option<Partner>, AppError> {
        Ok(self.partners.read().await.get(id).cloned())
    }

    async fn save_partner(&self, partner: &Partner) -> Result<(), AppError> {
        self.partners
            .write()
            .await
            .insert(partner.id.clone(), partner.clone());
        Ok(())
    }

    async fn list_user_partners(&self, owner_id: &str) -> Result<Vec<Partner>, AppError> {
        let mut partners: Vec<Partner> = self
            .partners
            .read()
            .await
            .values()
            .filter(|p| !p.deleted && p.owner_id.as_deref() == Some(owner_id))
            .cloned()
            .collect();
        partners.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(partners)
    }

    async fn list_global_partners(&self) -> Result<Vec<Partner>, AppError> {
        let mut partners: Vec<Partner> = self
            .partners
            .read()
            .await
            .values()
            .filter(|p| !p.deleted && p.owner_id.is_none())
            .cloned()
            .collect();
        partners.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(partners)
    }

    async fn find_localized_partner(
        &self,
        owner_id: &str,
        global_partner_id: &str,
    ) -> Result<Option<Partner>, AppError> {
        Ok(self
            .partners
            .read()
            .await
            .values()
            .find(|p| {
                !p.deleted
                    && p.owner_id.as_deref() == Some(owner_id)
                    && p.global_partner_id.as_deref() == Some(global_partner_id)
            })
            .cloned())
    }

    async fn add_partner_aliases(&self, partner_id: &str, aliases: &[String]) -> Result<(), AppError> {
        if let Some(partner) = self.partners.write().await.get_mut(partner_id) {
            union_into(&mut partner.aliases, aliases);
            partner.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn add_partner_email_domains(
        &self,
        partner_id: &str,
        domains: &[String],
    ) -> Result<(), AppError> {
        if let Some(partner) = self.partners.write().await.get_mut(partner_id) {
            union_into(&mut partner.email_domains, domains);
            partner.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn get_owner_profile(&self, owner_id: &str) -> Result<Option<OwnerProfile>, AppError> {
        Ok(self.profiles.read().await.get(owner_id).cloned())
    }

    async fn save_owner_profile(&self, profile: &OwnerProfile) -> Result<(), AppError> {
        self.profiles
            .write()
            .await
            .insert(profile.owner_id.clone(), profile.clone());
        Ok(())
    }

    async fn get_transaction(&self, id: &str) -> Result<Option<Transaction>, AppError> {
        Ok(self.transactions.read().await.get(id).cloned())
    }

    async fn save_transaction(&self, transaction: &Transaction) -> Result<(), AppError> {
        self.transactions
            .write()
            .await
            .insert(transaction.id.clone(), transaction.clone());
        Ok(())
    }

    async fn get_transactions(&self, ids: &[String]) -> Result<Vec<Transaction>, AppError> {
        let transactions = self.transactions.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| transactions.get(id).cloned())
            .collect())
    }

    async fn find_transactions_by_partner(
        &self,
        partner_id: &str,
    ) -> Result<Vec<Transaction>, AppError> {
        Ok(self
            .transactions
            .read()
            .await
            .values()
            .filter(|t| !t.deleted && t.partner_id() == Some(partner_id))
            .cloned()
            .collect())
    }

    async fn set_transaction_partner(
        &self,
        transaction_id: &str,
        partner: Option<&PartnerAssignment>,
        previous: Option<&PartnerAssignment>,
    ) -> Result<(), AppError> {
        if let Some(transaction) = self.transactions.write().await.get_mut(transaction_id) {
            transaction.partner = partner.cloned();
            transaction.previous_partner = previous.cloned();
            transaction.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn assign_transaction_partner(
        &self,
        transaction_id: &str,
        assignment: &PartnerAssignment,
        previous: Option<&PartnerAssignment>,
    ) -> Result<bool, AppError> {
        let mut transactions = self.transactions.write().await;
        let Some(transaction) = transactions.get_mut(transaction_id) else {
            return Ok(false);
        };
        if transaction
            .partner
            .as_ref()
            .map(|p| p.is_user_choice())
            .unwrap_or(false)
        {
            return Ok(false);
        }
        transaction.partner = Some(assignment.clone());
        if previous.is_some() {
            transaction.previous_partner = previous.cloned();
        }
        transaction.updated_at = Utc::now();
        Ok(true)
    }

    async fn transactions_in_window(
        &self,
        owner_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Transaction>, AppError> {
        let mut window: Vec<Transaction> = self
            .transactions
            .read()
            .await
            .values()
            .filter(|t| t.owner_id == owner_id && !t.deleted && t.date >= from && t.date <= to)
            .cloned()
            .collect();
        window.sort_by(|a, b| a.date.cmp(&b.date).then(a.id.cmp(&b.id)));
        Ok(window)
    }

    async fn recent_transactions(
        &self,
        owner_id: &str,
        limit: i64,
    ) -> Result<Vec<Transaction>, AppError> {
        let mut recent: Vec<Transaction> = self
            .transactions
            .read()
            .await
            .values()
            .filter(|t| t.owner_id == owner_id && !t.deleted)
            .cloned()
            .collect();
        recent.sort_by(|a, b| b.date.cmp(&a.date).then(a.id.cmp(&b.id)));
        recent.truncate(limit.max(0) as usize);
        Ok(recent)
    }

    async fn add_transaction_document(
        &self,
        transaction_id: &str,
        document_id: &str,
    ) -> Result<(), AppError> {
        if let Some(transaction) = self.transactions.write().await.get_mut(transaction_id) {
            union_into(&mut transaction.document_ids, &[document_id.to_string()]);
            transaction.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn add_transaction_rejection(
        &self,
        transaction_id: &str,
        document_id: &str,
    ) -> Result<(), AppError> {
        if let Some(transaction) = self.transactions.write().await.get_mut(transaction_id) {
            union_into(&mut transaction.rejected_document_ids, &[document_id.to_string()]);
            transaction.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn insert_connection_if_absent(&self, connection: &Connection) -> Result<bool, AppError> {
        let key = (
            connection.document_id.clone(),
            connection.transaction_id.clone(),
        );
        let mut connections = self.connections.write().await;
        if connections.contains_key(&key) {
            return Ok(false);
        }
        connections.insert(key, connection.clone());
        Ok(true)
    }

    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }
}
