//! Pipeline runtime: the engine that runs one document through one stage, the dispatcher that
//! feeds it events, and the recovery sweep that repairs stalled documents.

pub mod actions;
pub mod dispatcher;
pub mod events;
pub mod partner_stage;
pub mod recovery;
pub mod transaction_stage;

pub use dispatcher::PipelineDispatcher;
pub use events::{PipelineEvent, StageOutcome, StageReport};
pub use recovery::{RecoverySweep, SweepReport};

use crate::matching::{resolve_partner_conflict, MatchSettings, Resolution};
use crate::models::{Document, Partner, PartnerType};
use crate::services::{Collaborators, Notification, Store};
use chrono::Utc;
use dashmap::DashMap;
use service_core::error::AppError;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Follow-up chains longer than this are left to the dispatcher or the next sweep.
const MAX_CHAIN: usize = 16;

type LockTable = Arc<DashMap<String, Arc<Mutex<()>>>>;

/// Exclusive hold on one key of a lock table. Dropping it unlocks and forgets the entry
/// once nobody else is waiting on it.
pub(crate) struct KeyLock {
    guard: Option<OwnedMutexGuard<()>>,
    table: LockTable,
    key: String,
}

impl KeyLock {
    async fn acquire(table: &LockTable, key: &str) -> Self {
        let lock = table
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        Self {
            guard: Some(lock.lock_owned().await),
            table: table.clone(),
            key: key.to_string(),
        }
    }
}

impl Drop for KeyLock {
    fn drop(&mut self) {
        self.guard.take();
        self.table
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[derive(Clone)]
pub struct MatchingEngine {
    store: Arc<dyn Store>,
    collaborators: Collaborators,
    settings: MatchSettings,
    document_locks: LockTable,
    transaction_locks: LockTable,
}

impl MatchingEngine {
    pub fn new(store: Arc<dyn Store>, collaborators: Collaborators, settings: MatchSettings) -> Self {
        Self {
            store,
            collaborators,
            settings,
            document_locks: Arc::new(DashMap::new()),
            transaction_locks: Arc::new(DashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn settings(&self) -> &MatchSettings {
        &self.settings
    }

    /// Serializes work on one document; different documents proceed concurrently.
    pub(crate) async fn lock_document(&self, document_id: &str) -> KeyLock {
        KeyLock::acquire(&self.document_locks, document_id).await
    }

    /// Serializes coverage check and attach on one transaction. Always taken after the
    /// document lock, never before it.
    pub(crate) async fn lock_transaction(&self, transaction_id: &str) -> KeyLock {
        KeyLock::acquire(&self.transaction_locks, transaction_id).await
    }

    /// Sends a notification without waiting for the sink.
    pub(crate) fn notify_detached(&self, notification: Notification) {
        let collaborators = self.collaborators.clone();
        tokio::spawn(async move {
            collaborators.notify(notification).await;
        });
    }

    /// Runs the handler for one event and returns its follow-ups.
    pub async fn handle(&self, event: &PipelineEvent) -> Result<Vec<PipelineEvent>, AppError> {
        tracing::debug!(event = event.kind(), "Handling pipeline event");

        let _lock = match event.document_id() {
            Some(id) => Some(self.lock_document(id).await),
            None => None,
        };

        let result = match event {
            PipelineEvent::ExtractionCompleted { document_id }
            | PipelineEvent::PartnerMatchRequested { document_id } => self
                .run_partner_stage(document_id)
                .await
                .map(|report| report.follow_ups),
            PipelineEvent::TransactionMatchRequested { document_id } => self
                .run_transaction_stage(document_id)
                .await
                .map(|report| report.follow_ups),
            PipelineEvent::DocumentDeactivated { document_id } => {
                self.on_document_deactivated(document_id).await
            }
            PipelineEvent::PartnerUpdated { partner_id } => self.on_partner_updated(partner_id).await,
            PipelineEvent::PartnerDeactivated { partner_id } => {
                self.on_partner_deactivated(partner_id).await
            }
        };

        result
    }

    /// Runs an event and its follow-up chain to completion in this task.
    pub async fn process(&self, event: PipelineEvent) -> Result<usize, AppError> {
        let mut queue = VecDeque::from([event]);
        let mut handled = 0;
        while let Some(next) = queue.pop_front() {
            if handled >= MAX_CHAIN {
                tracing::warn!(
                    pending = queue.len() + 1,
                    "Follow-up chain truncated"
                );
                break;
            }
            queue.extend(self.handle(&next).await?);
            handled += 1;
        }
        Ok(handled)
    }

    /// Returns the owner's copy of a shared partner, creating it on first use.
    pub(crate) async fn localize(&self, partner: Partner, owner_id: &str) -> Result<Partner, AppError> {
        if partner.partner_type == PartnerType::User {
            return Ok(partner);
        }
        if let Some(existing) = self.store.find_localized_partner(owner_id, &partner.id).await? {
            return Ok(existing);
        }

        let local = Partner::localized_from(&partner, owner_id);
        self.store.save_partner(&local).await?;
        tracing::info!(
            owner_id = %owner_id,
            global_partner_id = %partner.id,
            partner_id = %local.id,
            "Localized shared partner"
        );
        Ok(local)
    }

    /// Reconciles the partner on the document with each linked transaction.
    /// Returns whether the document's own assignment changed.
    pub(crate) async fn sync_linked_transactions(
        &self,
        document: &mut Document,
    ) -> Result<bool, AppError> {
        if document.transaction_ids.is_empty() {
            return Ok(false);
        }

        let mut changed = false;
        for transaction in self.store.get_transactions(&document.transaction_ids).await? {
            match resolve_partner_conflict(document.partner.as_ref(), transaction.partner.as_ref()) {
                Resolution::NoChange => {}
                Resolution::AssignToDocument(assignment) => {
                    tracing::info!(
                        document_id = %document.id,
                        transaction_id = %transaction.id,
                        partner_id = %assignment.partner_id,
                        "Document takes partner chosen on transaction"
                    );
                    document.partner = Some(assignment);
                    document.updated_at = Utc::now();
                    changed = true;
                }
                Resolution::AssignToTransaction {
                    assignment,
                    previous,
                } => {
                    let written = self
                        .store
                        .assign_transaction_partner(&transaction.id, &assignment, previous.as_ref())
                        .await?;
                    tracing::info!(
                        document_id = %document.id,
                        transaction_id = %transaction.id,
                        partner_id = %assignment.partner_id,
                        previous_partner_id = previous.as_ref().map(|p| p.partner_id.as_str()).unwrap_or(""),
                        written,
                        "Transaction partner synchronized from document"
                    );
                }
            }
        }
        Ok(changed)
    }
}
