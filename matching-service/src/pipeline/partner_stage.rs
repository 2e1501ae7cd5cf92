//! Partner stage: directory match, optional discovery through external collaborators, and
//! learning of new identifying signals.

use super::events::{PipelineEvent, StageOutcome, StageReport};
use super::MatchingEngine;
use crate::matching::normalize::{
    domains_related, has_legal_suffix, is_identifying_domain, name_similarity, normalize_domain,
    normalize_iban, normalize_name, normalize_vat,
};
use crate::matching::{build_directory, rank_partners, PartnerInput, PartnerMatch};
use crate::models::{
    Document, MatchMethod, MatchSource, Partner, PartnerAssignment, PartnerSuggestion, Stage,
};
use crate::services::collaborators::{CompanyRecord, LookupHints, Notification};
use crate::services::metrics::{
    record_error, record_partner_match, record_stage_duration, record_stage_run,
};
use chrono::Utc;
use service_core::error::AppError;
use std::time::Instant;
use tracing::instrument;

/// Confidence for an existing partner found by the duplicate check.
pub const DEDUPLICATED_CONFIDENCE: u8 = 89;
/// Confidence for a partner created from lookup or registry data.
pub const LOOKUP_CONFIDENCE: u8 = 90;
/// Confidence for a partner created from the extracted name alone.
pub const MINIMAL_CONFIDENCE: u8 = 85;
/// Name similarity that makes an existing partner a duplicate candidate.
pub const DUPLICATE_NAME_SIMILARITY: u8 = 70;

/// What the matcher decided, before anything is persisted.
enum Decision {
    /// The user's own assignment stands; only learning runs.
    Kept(Option<Partner>),
    Assigned {
        partner: Partner,
        confidence: u8,
        source: MatchSource,
        created: bool,
    },
    Unassigned {
        suggested: bool,
    },
    NoSignals,
}

impl MatchingEngine {
    #[instrument(skip(self))]
    pub async fn run_partner_stage(&self, document_id: &str) -> Result<StageReport, AppError> {
        let start = Instant::now();

        let Some(mut document) = self.store.get_document(document_id).await? else {
            tracing::warn!(document_id = %document_id, "Document not found for partner stage");
            return Ok(StageReport::skipped());
        };
        if !document.is_matchable() || !document.extraction.complete {
            tracing::debug!(document_id = %document_id, "Document not ready for partner stage");
            return Ok(StageReport::skipped());
        }

        let previous_partner = document.partner_id().map(str::to_string);
        let was_transaction_matched = document.transaction_match.complete;
        let owner = self.store.get_owner_profile(&document.owner_id).await?;
        let input = PartnerInput::from_fields(&document.fields, owner.as_ref());

        let (outcome, learn_target) = match self.decide_partner(&mut document, &input).await {
            Ok(decision) => self.apply_decision(&mut document, decision).await,
            Err(e) => {
                tracing::error!(
                    document_id = %document.id,
                    error = %e,
                    "Partner stage failed; completing without a match"
                );
                record_error("partner_stage");
                document.partner_suggestions.clear();
                (StageOutcome::Failed(e.to_string()), None)
            }
        };

        if let Err(e) = self.sync_linked_transactions(&mut document).await {
            tracing::warn!(document_id = %document.id, error = %e, "Failed to synchronize linked transactions");
        }

        document.complete_stage(Stage::PartnerMatch, Utc::now());
        self.store.save_document(&document).await?;

        if let Some(partner) = learn_target {
            if let Err(e) = self.learn(&partner, &input).await {
                tracing::warn!(partner_id = %partner.id, error = %e, "Failed to learn partner signals");
            }
        }

        let changed = document.partner_id().map(str::to_string) != previous_partner;
        let mut follow_ups = Vec::new();
        if changed || !was_transaction_matched {
            follow_ups.push(PipelineEvent::transaction_match(document.id.clone()));
        }

        record_stage_run(Stage::PartnerMatch.as_str(), outcome.as_str());
        record_stage_duration(Stage::PartnerMatch.as_str(), start.elapsed().as_secs_f64());
        tracing::info!(
            document_id = %document.id,
            owner_id = %document.owner_id,
            outcome = outcome.as_str(),
            partner_id = document.partner_id().unwrap_or(""),
            changed,
            "Partner stage completed"
        );

        Ok(StageReport { outcome, follow_ups })
    }

    async fn decide_partner(
        &self,
        document: &mut Document,
        input: &PartnerInput,
    ) -> Result<Decision, AppError> {
        if let Some(current) = document.partner.as_ref().filter(|p| p.is_user_choice()) {
            let partner = self.store.get_partner(&current.partner_id).await?;
            return Ok(Decision::Kept(partner));
        }

        if input.is_empty() {
            document.partner_suggestions.clear();
            return Ok(Decision::NoSignals);
        }

        let directory = build_directory(
            self.store.list_user_partners(&document.owner_id).await?,
            self.store.list_global_partners().await?,
        );
        let ranked = rank_partners(input, &directory);
        document.partner_suggestions = ranked
            .iter()
            .filter(|m| m.confidence >= self.settings.suggestion_threshold)
            .take(self.settings.partner_suggestion_limit)
            .map(to_suggestion)
            .collect();

        if let Some(best) = ranked
            .first()
            .filter(|m| m.confidence >= self.settings.partner_auto_threshold)
        {
            if let Some(partner) = directory.iter().find(|p| p.id == best.partner_id) {
                let partner = self.localize(partner.clone(), &document.owner_id).await?;
                return Ok(Decision::Assigned {
                    partner,
                    confidence: best.confidence,
                    source: best.source,
                    created: false,
                });
            }
        }

        if document.partner.is_some() {
            return Ok(Decision::Unassigned {
                suggested: !document.partner_suggestions.is_empty(),
            });
        }

        if let Some(decision) = self.discover_partner(document, input, &directory).await? {
            return Ok(decision);
        }

        Ok(Decision::Unassigned {
            suggested: !document.partner_suggestions.is_empty(),
        })
    }

    /// Applies a decision to the in-memory document. Returns the outcome and the partner that
    /// should learn from this document.
    async fn apply_decision(
        &self,
        document: &mut Document,
        decision: Decision,
    ) -> (StageOutcome, Option<Partner>) {
        match decision {
            Decision::Kept(partner) => (StageOutcome::Kept, partner),
            Decision::NoSignals => (StageOutcome::NoSignals, None),
            Decision::Unassigned { suggested } => {
                let outcome = if document.partner.is_some() {
                    StageOutcome::Kept
                } else if suggested {
                    StageOutcome::Suggested
                } else {
                    StageOutcome::NoMatch
                };
                (outcome, None)
            }
            Decision::Assigned {
                partner,
                confidence,
                source,
                created,
            } => {
                let replace = match document.partner.as_ref() {
                    None => true,
                    Some(current) if current.partner_id == partner.id => false,
                    Some(current) => confidence > current.confidence,
                };
                if replace {
                    document.partner = Some(PartnerAssignment::new(
                        partner.id.clone(),
                        partner.partner_type,
                        MatchMethod::Auto,
                        confidence,
                        source,
                    ));
                    document.updated_at = Utc::now();
                    record_partner_match(source.as_str());
                    tracing::info!(
                        document_id = %document.id,
                        partner_id = %partner.id,
                        confidence,
                        source = source.as_str(),
                        "Partner assigned"
                    );
                }
                if created {
                    self.notify_detached(Notification::PartnerCreated {
                        owner_id: document.owner_id.clone(),
                        partner_id: partner.id.clone(),
                        partner_name: partner.name.clone(),
                        document_id: document.id.clone(),
                    });
                }
                let learn = (document.partner_id() == Some(partner.id.as_str())).then_some(partner);
                (StageOutcome::Matched, learn)
            }
        }
    }

    /// Registry and lookup fallback when no directory entry is good enough.
    async fn discover_partner(
        &self,
        document: &Document,
        input: &PartnerInput,
        directory: &[Partner],
    ) -> Result<Option<Decision>, AppError> {
        let mut record: Option<CompanyRecord> = None;

        if let Some(vat_id) = input.vat_id.as_deref() {
            if let Some(registry) = self.collaborators.check_vat(vat_id).await {
                if let Some(name) = registry.name.filter(|n| !n.trim().is_empty()) {
                    tracing::info!(document_id = %document.id, "VAT registry confirmed counterparty");
                    record = Some(CompanyRecord {
                        name,
                        vat_id: Some(vat_id.to_string()),
                        website: input.website.clone(),
                        address: registry.address,
                        ibans: Vec::new(),
                        confidence: 100,
                    });
                }
            }
        }

        let extracted_name = input.name.as_deref().filter(|n| has_legal_suffix(n));
        if record.is_none() {
            let Some(name) = extracted_name else {
                return Ok(None);
            };
            let hints = LookupHints {
                vat_id: input.vat_id.clone(),
                website: input.website.clone(),
                country: None,
            };
            record = self.collaborators.lookup_company(name, &hints).await;
        }

        let (name, confidence, source) = match record.as_ref() {
            Some(r) => (r.name.clone(), LOOKUP_CONFIDENCE, MatchSource::Lookup),
            None => match extracted_name {
                Some(n) => (n.to_string(), MINIMAL_CONFIDENCE, MatchSource::Name),
                None => return Ok(None),
            },
        };

        let vat_id = record
            .as_ref()
            .and_then(|r| r.vat_id.clone())
            .or_else(|| input.vat_id.clone());
        let website = record
            .as_ref()
            .and_then(|r| r.website.as_deref().and_then(normalize_domain))
            .or_else(|| input.website.clone());

        if let Some(existing) = self
            .find_duplicate(&name, vat_id.as_deref(), website.as_deref(), directory, &document.owner_id)
            .await
        {
            tracing::info!(
                document_id = %document.id,
                partner_id = %existing.id,
                "Lookup result matches an existing partner"
            );
            return Ok(Some(Decision::Assigned {
                partner: existing,
                confidence: DEDUPLICATED_CONFIDENCE,
                source: MatchSource::Lookup,
                created: false,
            }));
        }

        let mut partner = Partner::new_user(document.owner_id.clone(), name);
        partner.vat_id = vat_id;
        partner.website = website;
        partner.address = record.as_ref().and_then(|r| r.address.clone());
        if let Some(r) = record.as_ref() {
            partner.ibans = r.ibans.iter().map(|i| normalize_iban(i)).collect();
        }
        if let Some(iban) = input.iban.as_ref() {
            if !partner.ibans.contains(iban) {
                partner.ibans.push(iban.clone());
            }
        }
        self.store.save_partner(&partner).await?;
        tracing::info!(
            document_id = %document.id,
            partner_id = %partner.id,
            from_lookup = record.is_some(),
            "Created partner"
        );

        Ok(Some(Decision::Assigned {
            partner,
            confidence,
            source,
            created: true,
        }))
    }

    /// An existing user partner that is the same legal person as `name`, if any.
    async fn find_duplicate(
        &self,
        name: &str,
        vat_id: Option<&str>,
        website: Option<&str>,
        directory: &[Partner],
        owner_id: &str,
    ) -> Option<Partner> {
        let vat = vat_id.map(normalize_vat).filter(|v| !v.is_empty());
        let owned = directory
            .iter()
            .filter(|p| p.owner_id.as_deref() == Some(owner_id));

        let mut candidates: Vec<(u8, &Partner)> = Vec::new();
        for partner in owned {
            let same_vat = match (vat.as_deref(), partner.vat_id.as_deref()) {
                (Some(v), Some(p)) => normalize_vat(p) == v,
                _ => false,
            };
            if same_vat {
                return Some(partner.clone());
            }
            let similarity = partner
                .names()
                .map(|n| name_similarity(name, n))
                .max()
                .unwrap_or(0);
            let same_site = match (website, partner.website.as_deref().and_then(normalize_domain)) {
                (Some(w), Some(p)) => domains_related(w, &p),
                _ => false,
            };
            if similarity >= DUPLICATE_NAME_SIMILARITY || same_site {
                candidates.push((similarity, partner));
            }
        }

        candidates.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.name.cmp(&b.1.name)));
        for (_, candidate) in candidates {
            if self.collaborators.is_same_entity(name, candidate).await {
                return Some(candidate.clone());
            }
        }
        None
    }

    /// Adds the extracted name as an alias and the sender's domain as a known domain.
    /// Both writes are set-unions.
    async fn learn(&self, partner: &Partner, input: &PartnerInput) -> Result<(), AppError> {
        if partner.owner_id.is_none() {
            return Ok(());
        }

        if let Some(name) = input.name.as_deref() {
            let normalized = normalize_name(name);
            let known = partner.names().any(|n| normalize_name(n) == normalized);
            if !normalized.is_empty() && !known && !name.contains('*') {
                self.store
                    .add_partner_aliases(&partner.id, &[name.trim().to_string()])
                    .await?;
                tracing::info!(partner_id = %partner.id, alias = %name, "Learned alias");
            }
        }

        if let Some(domain) = domain_candidate(input) {
            if !is_identifying_domain(&domain) {
                tracing::debug!(partner_id = %partner.id, domain = %domain, "Domain not identifying");
                return Ok(());
            }
            if partner.email_domains.iter().any(|d| domains_related(d, &domain)) {
                return Ok(());
            }
            let matches_website = partner
                .website
                .as_deref()
                .and_then(normalize_domain)
                .map(|w| domains_related(&w, &domain))
                .unwrap_or(false);
            if matches_website || self.collaborators.domain_owned_by(partner, &domain).await {
                self.store
                    .add_partner_email_domains(&partner.id, &[domain.clone()])
                    .await?;
                tracing::info!(partner_id = %partner.id, domain = %domain, "Learned email domain");
            } else {
                tracing::debug!(partner_id = %partner.id, domain = %domain, "Domain ownership not confirmed");
            }
        }
        Ok(())
    }
}

/// The sender's domain, replaced by the invoice's own website when the two disagree.
fn domain_candidate(input: &PartnerInput) -> Option<String> {
    let sender = input.sender_domain.as_ref()?;
    match input.website.as_ref() {
        Some(website) if !domains_related(website, sender) => Some(website.clone()),
        _ => Some(sender.clone()),
    }
}

fn to_suggestion(m: &PartnerMatch) -> PartnerSuggestion {
    PartnerSuggestion {
        partner_id: m.partner_id.clone(),
        partner_type: m.partner_type,
        confidence: m.confidence,
        source: m.source,
    }
}
