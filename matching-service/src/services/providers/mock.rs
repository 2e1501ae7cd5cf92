//! Mock collaborators for local runs and tests.

use crate::matching::normalize::{normalize_domain, normalize_name, normalize_vat};
use crate::models::Partner;
use crate::services::collaborators::{
    CollaboratorError, CompanyLookup, CompanyRecord, EntityReasoner, LookupHints, Notification,
    NotificationSink, VatRecord, VatRegistry, Verdict,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Answers from a fixed table keyed by normalized name.
#[derive(Default)]
pub struct MockCompanyLookup {
    companies: Mutex<HashMap<String, CompanyRecord>>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl MockCompanyLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, name: &str, record: CompanyRecord) {
        if let Ok(mut companies) = self.companies.lock() {
            companies.insert(normalize_name(name), record);
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompanyLookup for MockCompanyLookup {
    async fn lookup(
        &self,
        name: &str,
        _hints: &LookupHints,
    ) -> Result<Option<CompanyRecord>, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Unavailable("mock lookup failing".to_string()));
        }
        Ok(self
            .companies
            .lock()
            .ok()
            .and_then(|c| c.get(&normalize_name(name)).cloned()))
    }
}

/// Confirms ownership only for registered (partner name, domain) pairs and sameness only for
/// registered (candidate, existing) name pairs.
#[derive(Default)]
pub struct MockEntityReasoner {
    owned_domains: Mutex<HashSet<(String, String)>>,
    same_entities: Mutex<HashSet<(String, String)>>,
    calls: AtomicUsize,
}

impl MockEntityReasoner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn own_domain(&self, partner_name: &str, domain: &str) {
        if let (Ok(mut owned), Some(domain)) = (self.owned_domains.lock(), normalize_domain(domain)) {
            owned.insert((normalize_name(partner_name), domain));
        }
    }

    pub fn same_entity_pair(&self, candidate: &str, existing: &str) {
        if let Ok(mut same) = self.same_entities.lock() {
            same.insert((normalize_name(candidate), normalize_name(existing)));
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn verdict(positive: bool) -> Verdict {
    Verdict {
        positive,
        confidence: if positive { 90 } else { 80 },
        reason: "mock".to_string(),
    }
}

#[async_trait]
impl EntityReasoner for MockEntityReasoner {
    async fn domain_ownership(
        &self,
        partner: &Partner,
        domain: &str,
    ) -> Result<Verdict, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let key = (normalize_name(&partner.name), domain.to_string());
        let owned = self
            .owned_domains
            .lock()
            .map(|o| o.contains(&key))
            .unwrap_or(false);
        Ok(verdict(owned))
    }

    async fn same_entity(
        &self,
        candidate_name: &str,
        existing: &Partner,
    ) -> Result<Verdict, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let key = (normalize_name(candidate_name), normalize_name(&existing.name));
        let same = self
            .same_entities
            .lock()
            .map(|s| s.contains(&key))
            .unwrap_or(false);
        Ok(verdict(same))
    }
}

/// Registry with a fixed set of valid numbers.
#[derive(Default)]
pub struct MockVatRegistry {
    records: Mutex<HashMap<String, VatRecord>>,
    calls: AtomicUsize,
}

impl MockVatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, vat_id: &str, name: &str) {
        if let Ok(mut records) = self.records.lock() {
            records.insert(
                normalize_vat(vat_id),
                VatRecord {
                    valid: true,
                    name: Some(name.to_string()),
                    address: None,
                },
            );
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VatRegistry for MockVatRegistry {
    async fn check(&self, country: &str, number: &str) -> Result<VatRecord, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let key = format!("{}{}", country, number);
        Ok(self
            .records
            .lock()
            .ok()
            .and_then(|r| r.get(&key).cloned())
            .unwrap_or_default())
    }
}

/// Records every notification it receives.
#[derive(Default)]
pub struct MockNotificationSink {
    sent: Mutex<Vec<Notification>>,
    failing: AtomicBool,
    stalled: AtomicBool,
}

impl MockNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// A stalled sink never answers.
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl NotificationSink for MockNotificationSink {
    async fn notify(&self, notification: &Notification) -> Result<(), CollaboratorError> {
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Unavailable("mock sink failing".to_string()));
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(notification.clone());
        }
        Ok(())
    }
}
