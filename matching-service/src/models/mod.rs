//! Domain models for matching-service.

mod document;
mod partner;
mod transaction;

pub use document::{
    Document, ExtractedFields, PartnerSuggestion, Stage, StageState, TransactionSuggestion,
};
pub use partner::{OwnerProfile, Partner, PartnerType};
pub use transaction::{Connection, Transaction};

use serde::{Deserialize, Serialize};

/// Who made a partner assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMethod {
    Manual,
    Suggestion,
    Auto,
}

impl MatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchMethod::Manual => "manual",
            MatchMethod::Suggestion => "suggestion",
            MatchMethod::Auto => "auto",
        }
    }

    /// Manual picks and accepted suggestions are the user's decision; automation never
    /// replaces them.
    pub fn is_user_choice(&self) -> bool {
        matches!(self, MatchMethod::Manual | MatchMethod::Suggestion)
    }
}

impl std::str::FromStr for MatchMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "manual" => Ok(MatchMethod::Manual),
            "suggestion" => Ok(MatchMethod::Suggestion),
            "auto" => Ok(MatchMethod::Auto),
            _ => Err(format!("Invalid match method: {}", s)),
        }
    }
}

/// Which signal produced a partner match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchSource {
    BankAccount,
    VatId,
    EmailDomain,
    Website,
    Alias,
    Name,
    Lookup,
    Transaction,
    User,
}

impl MatchSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchSource::BankAccount => "bank_account",
            MatchSource::VatId => "vat_id",
            MatchSource::EmailDomain => "email_domain",
            MatchSource::Website => "website",
            MatchSource::Alias => "alias",
            MatchSource::Name => "name",
            MatchSource::Lookup => "lookup",
            MatchSource::Transaction => "transaction",
            MatchSource::User => "user",
        }
    }
}

/// A partner assignment on a document or transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartnerAssignment {
    pub partner_id: String,
    pub partner_type: PartnerType,
    pub matched_by: MatchMethod,
    pub confidence: u8,
    pub source: MatchSource,
}

impl PartnerAssignment {
    pub fn new(
        partner_id: impl Into<String>,
        partner_type: PartnerType,
        matched_by: MatchMethod,
        confidence: u8,
        source: MatchSource,
    ) -> Self {
        Self {
            partner_id: partner_id.into(),
            partner_type,
            matched_by,
            confidence,
            source,
        }
    }

    pub fn is_user_choice(&self) -> bool {
        self.matched_by.is_user_choice()
    }
}
