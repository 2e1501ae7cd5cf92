use super::{MatchMethod, PartnerAssignment};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One bank ledger entry. Amounts are signed minor units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(rename = "_id")]
    pub id: String,
    pub owner_id: String,
    pub amount: i64,
    pub currency: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub description: String,
    /// Counterparty name as reported by the bank.
    pub partner_name: Option<String>,
    pub partner_iban: Option<String>,
    pub reference: Option<String>,
    pub partner: Option<PartnerAssignment>,
    /// Assignment replaced by document evidence or released by a partner deletion.
    pub previous_partner: Option<PartnerAssignment>,
    #[serde(default)]
    pub document_ids: Vec<String>,
    #[serde(default)]
    pub rejected_document_ids: Vec<String>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new(
        owner_id: impl Into<String>,
        amount: i64,
        currency: impl Into<String>,
        date: NaiveDate,
        description: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.into(),
            amount,
            currency: currency.into(),
            date,
            description: description.into(),
            partner_name: None,
            partner_iban: None,
            reference: None,
            partner: None,
            previous_partner: None,
            document_ids: Vec::new(),
            rejected_document_ids: Vec::new(),
            deleted: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_rejected(&self, document_id: &str) -> bool {
        self.rejected_document_ids.iter().any(|id| id == document_id)
    }

    pub fn partner_id(&self) -> Option<&str> {
        self.partner.as_ref().map(|p| p.partner_id.as_str())
    }
}

/// Join record between a document and the transaction it settles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    #[serde(rename = "_id")]
    pub id: String,
    pub owner_id: String,
    pub document_id: String,
    pub transaction_id: String,
    pub method: MatchMethod,
    pub signals: Vec<String>,
    pub confidence: u8,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

impl Connection {
    pub fn new(
        owner_id: impl Into<String>,
        document_id: impl Into<String>,
        transaction_id: impl Into<String>,
        method: MatchMethod,
        signals: Vec<String>,
        confidence: u8,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.into(),
            document_id: document_id.into(),
            transaction_id: transaction_id.into(),
            method,
            signals,
            confidence,
            created_at: Utc::now(),
        }
    }
}
