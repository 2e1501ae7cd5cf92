//! Collaborator implementations: HTTP clients and mocks.

pub mod genai;
pub mod mock;
pub mod notification;
pub mod vat;

pub use genai::GenAiReasoningClient;
pub use mock::{MockCompanyLookup, MockEntityReasoner, MockNotificationSink, MockVatRegistry};
pub use notification::HttpNotificationSink;
pub use vat::HttpVatRegistry;

use super::collaborators::CollaboratorError;

/// Maps a non-success status to the matching error, reading the body for context.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, CollaboratorError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status.as_u16() == 429 {
        return Err(CollaboratorError::RateLimited);
    }
    let body = response.text().await.unwrap_or_default();
    Err(CollaboratorError::Unavailable(format!(
        "upstream returned {}: {}",
        status, body
    )))
}
