//! Request and response bodies for the HTTP surface.

use crate::models::{ExtractedFields, MatchMethod};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Extraction output for one document. Every field is optional; absent fields mean the
/// extractor found nothing.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ExtractionRequest {
    #[validate(length(min = 1, message = "owner_id cannot be empty"))]
    pub owner_id: String,
    #[serde(default)]
    pub file_name: String,
    pub partner_name: Option<String>,
    #[validate(length(min = 5, max = 42, message = "IBAN has an invalid length"))]
    pub iban: Option<String>,
    #[validate(length(min = 4, max = 20, message = "VAT id has an invalid length"))]
    pub vat_id: Option<String>,
    pub amount: Option<i64>,
    #[validate(length(equal = 3, message = "Currency must be an ISO 4217 code"))]
    pub currency: Option<String>,
    pub date: Option<NaiveDate>,
    pub text: Option<String>,
    pub reference: Option<String>,
    pub sender_domain: Option<String>,
    pub website: Option<String>,
}

impl From<ExtractionRequest> for ExtractedFields {
    fn from(r: ExtractionRequest) -> Self {
        Self {
            partner_name: r.partner_name,
            iban: r.iban,
            vat_id: r.vat_id,
            amount: r.amount,
            currency: r.currency.map(|c| c.to_uppercase()),
            date: r.date,
            text: r.text,
            reference: r.reference,
            sender_domain: r.sender_domain,
            website: r.website,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct ExtractionFailureRequest {
    #[validate(length(min = 1, message = "error cannot be empty"))]
    pub error: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AssignPartnerRequest {
    #[validate(length(min = 1, message = "partner_id cannot be empty"))]
    pub partner_id: String,
    #[serde(default = "default_method")]
    pub method: MatchMethod,
}

fn default_method() -> MatchMethod {
    MatchMethod::Manual
}

#[derive(Debug, Deserialize, Validate)]
pub struct RejectDocumentRequest {
    #[validate(length(min = 1, message = "document_id cannot be empty"))]
    pub document_id: String,
}

/// The action was applied; `queued` follow-up events were handed to the pipeline.
#[derive(Debug, Serialize, Deserialize)]
pub struct AcceptedResponse {
    pub id: String,
    pub queued: usize,
}
