use super::check_status;
use crate::models::Partner;
use crate::services::collaborators::{
    CollaboratorError, CompanyLookup, CompanyRecord, EntityReasoner, LookupHints, Verdict,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use service_core::observability::TracedClientExt;
use std::time::Duration;

/// Company lookup and entity reasoning backed by the genai reasoning endpoint.
pub struct GenAiReasoningClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct LookupRequest<'a> {
    name: &'a str,
    #[serde(flatten)]
    hints: &'a LookupHints,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    company: Option<CompanyRecord>,
}

#[derive(Debug, Serialize)]
struct PartnerSummary<'a> {
    name: &'a str,
    aliases: &'a [String],
    website: Option<&'a str>,
    vat_id: Option<&'a str>,
}

impl<'a> From<&'a Partner> for PartnerSummary<'a> {
    fn from(p: &'a Partner) -> Self {
        Self {
            name: &p.name,
            aliases: &p.aliases,
            website: p.website.as_deref(),
            vat_id: p.vat_id.as_deref(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DomainOwnershipRequest<'a> {
    partner: PartnerSummary<'a>,
    domain: &'a str,
}

#[derive(Debug, Serialize)]
struct SameEntityRequest<'a> {
    candidate_name: &'a str,
    existing: PartnerSummary<'a>,
}

impl GenAiReasoningClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, CollaboratorError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CollaboratorError::NotConfigured(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl CompanyLookup for GenAiReasoningClient {
    async fn lookup(
        &self,
        name: &str,
        hints: &LookupHints,
    ) -> Result<Option<CompanyRecord>, CollaboratorError> {
        let response = self
            .client
            .traced_post(&self.url("/v1/reasoning/company-lookup"))
            .json(&LookupRequest { name, hints })
            .send()
            .await?;
        let body: LookupResponse = check_status(response).await?.json().await?;
        tracing::debug!(name = %name, found = body.company.is_some(), "Company lookup answered");
        Ok(body.company)
    }
}

#[async_trait]
impl EntityReasoner for GenAiReasoningClient {
    async fn domain_ownership(
        &self,
        partner: &Partner,
        domain: &str,
    ) -> Result<Verdict, CollaboratorError> {
        let response = self
            .client
            .traced_post(&self.url("/v1/reasoning/domain-ownership"))
            .json(&DomainOwnershipRequest {
                partner: partner.into(),
                domain,
            })
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }

    async fn same_entity(
        &self,
        candidate_name: &str,
        existing: &Partner,
    ) -> Result<Verdict, CollaboratorError> {
        let response = self
            .client
            .traced_post(&self.url("/v1/reasoning/same-entity"))
            .json(&SameEntityRequest {
                candidate_name,
                existing: existing.into(),
            })
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }
}
