use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartnerType {
    /// Owned by one user.
    User,
    /// Shared directory entry.
    Global,
}

impl PartnerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartnerType::User => "user",
            PartnerType::Global => "global",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Partner {
    #[serde(rename = "_id")]
    pub id: String,
    /// `None` for shared directory entries.
    pub owner_id: Option<String>,
    pub partner_type: PartnerType,
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub ibans: Vec<String>,
    pub vat_id: Option<String>,
    /// Bare domain, e.g. `acme.com`.
    pub website: Option<String>,
    #[serde(default)]
    pub email_domains: Vec<String>,
    pub global_partner_id: Option<String>,
    pub address: Option<String>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl Partner {
    pub fn new_user(owner_id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            owner_id: Some(owner_id.into()),
            partner_type: PartnerType::User,
            name: name.into(),
            aliases: Vec::new(),
            ibans: Vec::new(),
            vat_id: None,
            website: None,
            email_domains: Vec::new(),
            global_partner_id: None,
            address: None,
            deleted: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn new_global(name: impl Into<String>) -> Self {
        Self {
            owner_id: None,
            partner_type: PartnerType::Global,
            ..Self::new_user(String::new(), name)
        }
    }

    /// A user-scoped copy of a shared entry, linked back to its origin.
    pub fn localized_from(global: &Partner, owner_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            owner_id: Some(owner_id.to_string()),
            partner_type: PartnerType::User,
            global_partner_id: Some(global.id.clone()),
            deleted: false,
            created_at: now,
            updated_at: now,
            ..global.clone()
        }
    }

    /// Display name followed by aliases.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}

/// The owner's own identifiers; these never identify a counterparty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OwnerProfile {
    #[serde(rename = "_id")]
    pub owner_id: String,
    pub company_name: Option<String>,
    #[serde(default)]
    pub own_ibans: Vec<String>,
    #[serde(default)]
    pub own_vat_ids: Vec<String>,
    #[serde(default)]
    pub own_domains: Vec<String>,
}
