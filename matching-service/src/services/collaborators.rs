//! External collaborators the engine consults: company lookup, entity reasoning, the VAT
//! registry and the notification sink.
//!
//! Every call goes through [`Collaborators::bounded`], which applies the timeout and turns any
//! failure into "no information". Callers never see a [`CollaboratorError`].

use super::metrics::record_collaborator_call;
use super::providers::mock::{
    MockCompanyLookup, MockEntityReasoner, MockNotificationSink, MockVatRegistry,
};
use crate::matching::normalize::split_vat;
use crate::models::Partner;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CollaboratorError {
    #[error("Collaborator not configured: {0}")]
    NotConfigured(String),

    #[error("Collaborator timed out")]
    Timeout,

    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Rate limited")]
    RateLimited,
}

impl From<reqwest::Error> for CollaboratorError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            CollaboratorError::Timeout
        } else if e.status().map(|s| s.as_u16() == 429).unwrap_or(false) {
            CollaboratorError::RateLimited
        } else if e.is_decode() {
            CollaboratorError::InvalidResponse(e.to_string())
        } else {
            CollaboratorError::Unavailable(e.to_string())
        }
    }
}

/// Extra signals passed along with a company name.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LookupHints {
    pub vat_id: Option<String>,
    pub website: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompanyRecord {
    pub name: String,
    pub vat_id: Option<String>,
    pub website: Option<String>,
    pub address: Option<String>,
    #[serde(default)]
    pub ibans: Vec<String>,
    pub confidence: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub positive: bool,
    pub confidence: u8,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VatRecord {
    pub valid: bool,
    pub name: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    PartnerCreated {
        owner_id: String,
        partner_id: String,
        partner_name: String,
        document_id: String,
    },
    TransactionMatched {
        owner_id: String,
        document_id: String,
        transaction_id: String,
        confidence: u8,
    },
}

#[async_trait]
pub trait CompanyLookup: Send + Sync {
    async fn lookup(
        &self,
        name: &str,
        hints: &LookupHints,
    ) -> Result<Option<CompanyRecord>, CollaboratorError>;
}

#[async_trait]
pub trait EntityReasoner: Send + Sync {
    /// Does `domain` belong to the company behind `partner`?
    async fn domain_ownership(
        &self,
        partner: &Partner,
        domain: &str,
    ) -> Result<Verdict, CollaboratorError>;

    /// Is `candidate_name` the same legal person as `existing`?
    async fn same_entity(
        &self,
        candidate_name: &str,
        existing: &Partner,
    ) -> Result<Verdict, CollaboratorError>;
}

#[async_trait]
pub trait VatRegistry: Send + Sync {
    async fn check(&self, country: &str, number: &str) -> Result<VatRecord, CollaboratorError>;
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), CollaboratorError>;
}

#[derive(Clone)]
pub struct Collaborators {
    pub lookup: Arc<dyn CompanyLookup>,
    pub reasoner: Arc<dyn EntityReasoner>,
    pub vat: Arc<dyn VatRegistry>,
    pub notifier: Arc<dyn NotificationSink>,
    pub timeout: Duration,
    /// Answers below this confidence are ignored.
    pub min_confidence: u8,
}

impl Collaborators {
    /// Mock collaborators that know nothing; used when no URLs are configured.
    pub fn mock(timeout: Duration, min_confidence: u8) -> Self {
        Self {
            lookup: Arc::new(MockCompanyLookup::new()),
            reasoner: Arc::new(MockEntityReasoner::new()),
            vat: Arc::new(MockVatRegistry::new()),
            notifier: Arc::new(MockNotificationSink::new()),
            timeout,
            min_confidence,
        }
    }

    /// Runs one collaborator call under the timeout. Failures are logged and become `None`.
    pub async fn bounded<T, F>(&self, collaborator: &'static str, call: F) -> Option<T>
    where
        F: Future<Output = Result<T, CollaboratorError>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(value)) => {
                record_collaborator_call(collaborator, "ok");
                Some(value)
            }
            Ok(Err(CollaboratorError::NotConfigured(_))) => {
                record_collaborator_call(collaborator, "not_configured");
                None
            }
            Ok(Err(e)) => {
                tracing::warn!(collaborator, error = %e, "Collaborator call failed");
                record_collaborator_call(collaborator, "error");
                None
            }
            Err(_) => {
                tracing::warn!(
                    collaborator,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Collaborator call timed out"
                );
                record_collaborator_call(collaborator, "timeout");
                None
            }
        }
    }

    pub async fn lookup_company(&self, name: &str, hints: &LookupHints) -> Option<CompanyRecord> {
        self.bounded("company_lookup", self.lookup.lookup(name, hints))
            .await
            .flatten()
            .filter(|record| record.confidence >= self.min_confidence && !record.name.trim().is_empty())
    }

    pub async fn domain_owned_by(&self, partner: &Partner, domain: &str) -> bool {
        self.bounded("domain_ownership", self.reasoner.domain_ownership(partner, domain))
            .await
            .map(|v| v.positive && v.confidence >= self.min_confidence)
            .unwrap_or(false)
    }

    pub async fn is_same_entity(&self, candidate_name: &str, existing: &Partner) -> bool {
        self.bounded("same_entity", self.reasoner.same_entity(candidate_name, existing))
            .await
            .map(|v| v.positive && v.confidence >= self.min_confidence)
            .unwrap_or(false)
    }

    /// A registry answer only counts when it says the number is valid.
    pub async fn check_vat(&self, vat_id: &str) -> Option<VatRecord> {
        let (country, number) = split_vat(vat_id)?;
        self.bounded("vat_registry", self.vat.check(&country, &number))
            .await
            .filter(|record| record.valid)
    }

    /// Failures are logged and dropped.
    pub async fn notify(&self, notification: Notification) {
        self.bounded("notification", self.notifier.notify(&notification))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collaborators() -> Collaborators {
        Collaborators::mock(Duration::from_millis(50), 70)
    }

    #[tokio::test]
    async fn test_bounded_turns_errors_into_none() {
        let c = collaborators();
        let result: Option<u8> = c
            .bounded("test", async { Err(CollaboratorError::Unavailable("down".into())) })
            .await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_bounded_times_out() {
        let c = collaborators();
        let result = c
            .bounded("test", async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok::<_, CollaboratorError>(1)
            })
            .await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_low_confidence_lookup_is_no_information() {
        let lookup = Arc::new(MockCompanyLookup::new());
        lookup.add(
            "Acme GmbH",
            CompanyRecord {
                name: "ACME GmbH".into(),
                confidence: 40,
                ..Default::default()
            },
        );
        let c = Collaborators {
            lookup,
            ..collaborators()
        };
        assert!(c.lookup_company("Acme GmbH", &LookupHints::default()).await.is_none());
    }
}
