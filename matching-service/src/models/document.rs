use super::{MatchSource, PartnerAssignment, PartnerType};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Pipeline stages gated by completion flags on the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Extraction,
    PartnerMatch,
    TransactionMatch,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Extraction => "extraction",
            Stage::PartnerMatch => "partner_match",
            Stage::TransactionMatch => "transaction_match",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageState {
    pub complete: bool,
    pub completed_at: Option<DateTime<Utc>>,
}

impl StageState {
    pub fn completed(at: DateTime<Utc>) -> Self {
        Self {
            complete: true,
            completed_at: Some(at),
        }
    }
}

/// Structured fields produced by extraction. Amounts are in minor units.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedFields {
    pub partner_name: Option<String>,
    pub iban: Option<String>,
    pub vat_id: Option<String>,
    pub amount: Option<i64>,
    pub currency: Option<String>,
    pub date: Option<NaiveDate>,
    pub text: Option<String>,
    pub reference: Option<String>,
    pub sender_domain: Option<String>,
    pub website: Option<String>,
}

impl ExtractedFields {
    /// Nothing a transaction rule could use.
    pub fn lacks_transaction_signals(&self) -> bool {
        self.amount.is_none() && self.date.is_none() && is_blank(&self.reference)
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map(str::trim).unwrap_or("").is_empty()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartnerSuggestion {
    pub partner_id: String,
    pub partner_type: PartnerType,
    pub confidence: u8,
    pub source: MatchSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionSuggestion {
    pub transaction_id: String,
    pub confidence: u8,
    pub signals: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "_id")]
    pub id: String,
    pub owner_id: String,
    pub file_name: String,
    #[serde(default)]
    pub fields: ExtractedFields,
    #[serde(default)]
    pub extraction: StageState,
    pub extraction_error: Option<String>,
    #[serde(default)]
    pub not_invoice: bool,
    #[serde(default)]
    pub partner_match: StageState,
    #[serde(default)]
    pub transaction_match: StageState,
    pub partner: Option<PartnerAssignment>,
    /// Assignment released when its partner was deleted.
    #[serde(default)]
    pub previous_partner: Option<PartnerAssignment>,
    #[serde(default)]
    pub partner_suggestions: Vec<PartnerSuggestion>,
    #[serde(default)]
    pub transaction_ids: Vec<String>,
    #[serde(default)]
    pub transaction_suggestions: Vec<TransactionSuggestion>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn new(owner_id: impl Into<String>, file_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.into(),
            file_name: file_name.into(),
            fields: ExtractedFields::default(),
            extraction: StageState::default(),
            extraction_error: None,
            not_invoice: false,
            partner_match: StageState::default(),
            transaction_match: StageState::default(),
            partner: None,
            previous_partner: None,
            partner_suggestions: Vec::new(),
            transaction_ids: Vec::new(),
            transaction_suggestions: Vec::new(),
            deleted: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Deleted, failed or user-dismissed documents take no part in matching.
    pub fn is_matchable(&self) -> bool {
        !self.deleted && !self.not_invoice && self.extraction_error.is_none()
    }

    pub fn partner_id(&self) -> Option<&str> {
        self.partner.as_ref().map(|p| p.partner_id.as_str())
    }

    pub fn stage(&self, stage: Stage) -> &StageState {
        match stage {
            Stage::Extraction => &self.extraction,
            Stage::PartnerMatch => &self.partner_match,
            Stage::TransactionMatch => &self.transaction_match,
        }
    }

    pub fn complete_stage(&mut self, stage: Stage, at: DateTime<Utc>) {
        let state = StageState::completed(at);
        match stage {
            Stage::Extraction => self.extraction = state,
            Stage::PartnerMatch => self.partner_match = state,
            Stage::TransactionMatch => self.transaction_match = state,
        }
        self.updated_at = at;
    }

    pub fn reset_stage(&mut self, stage: Stage, at: DateTime<Utc>) {
        match stage {
            Stage::Extraction => self.extraction = StageState::default(),
            Stage::PartnerMatch => self.partner_match = StageState::default(),
            Stage::TransactionMatch => self.transaction_match = StageState::default(),
        }
        self.updated_at = at;
    }
}
