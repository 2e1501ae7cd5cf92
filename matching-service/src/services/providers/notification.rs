use super::check_status;
use crate::services::collaborators::{CollaboratorError, Notification, NotificationSink};
use async_trait::async_trait;
use reqwest::Client;
use service_core::observability::TracedClientExt;
use std::time::Duration;

/// Posts matching events to the notification service.
pub struct HttpNotificationSink {
    client: Client,
    url: String,
}

impl HttpNotificationSink {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, CollaboratorError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CollaboratorError::NotConfigured(e.to_string()))?;
        Ok(Self {
            client,
            url: format!("{}/v1/events", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl NotificationSink for HttpNotificationSink {
    async fn notify(&self, notification: &Notification) -> Result<(), CollaboratorError> {
        let response = self
            .client
            .traced_post(&self.url)
            .json(notification)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}
