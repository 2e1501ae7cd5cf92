use super::check_status;
use crate::services::collaborators::{CollaboratorError, VatRecord, VatRegistry};
use async_trait::async_trait;
use reqwest::Client;
use service_core::observability::TracedClientExt;
use std::time::Duration;

/// VAT number validation against a registry gateway (`GET {base}/check/{country}/{number}`).
pub struct HttpVatRegistry {
    client: Client,
    base_url: String,
}

impl HttpVatRegistry {
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
}

#[async_trait]
impl VatRegistry for HttpVatRegistry {
    async fn check(&self, country: &str, number: &str) -> Result<VatRecord, CollaboratorError> {
        let url = format!("{}/check/{}/{}", self.base_url, country, number);
        let response = self.client.traced_get(&url).send().await?;
        let record: VatRecord = check_status(response).await?.json().await?;
        tracing::debug!(country = %country, valid = record.valid, "VAT registry answered");
        Ok(record)
    }
}
