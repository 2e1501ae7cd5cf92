//! Partner scoring: an ordered rule list evaluated first-match-wins per candidate.

use super::normalize::{
    best_name_similarity, domains_related, is_identifying_domain, normalize_domain,
    normalize_iban, normalize_vat, wildcard_matches,
};
use crate::models::{ExtractedFields, MatchSource, OwnerProfile, Partner, PartnerType};
use std::collections::HashSet;

pub const BANK_ACCOUNT_CONFIDENCE: u8 = 100;
pub const VAT_ID_CONFIDENCE: u8 = 95;
pub const EMAIL_DOMAIN_CONFIDENCE: u8 = 90;
pub const WEBSITE_WITH_SENDER_CONFIDENCE: u8 = 90;
pub const WEBSITE_WITH_NAME_CONFIDENCE: u8 = 92;
pub const WEBSITE_ONLY_CONFIDENCE: u8 = 75;
pub const ALIAS_PATTERN_CONFIDENCE: u8 = 90;
/// Name check the website rule needs before it may auto-apply.
pub const WEBSITE_NAME_SIMILARITY: u8 = 50;
pub const NAME_SIMILARITY_FLOOR: u8 = 60;

/// Partner-relevant document signals, normalized, with the owner's own identifiers removed.
#[derive(Debug, Clone, Default)]
pub struct PartnerInput {
    pub name: Option<String>,
    pub iban: Option<String>,
    pub vat_id: Option<String>,
    pub sender_domain: Option<String>,
    pub website: Option<String>,
}

impl PartnerInput {
    pub fn from_fields(fields: &ExtractedFields, owner: Option<&OwnerProfile>) -> Self {
        let own_ibans: HashSet<String> = owner
            .map(|o| o.own_ibans.iter().map(|i| normalize_iban(i)).collect())
            .unwrap_or_default();
        let own_vats: HashSet<String> = owner
            .map(|o| o.own_vat_ids.iter().map(|v| normalize_vat(v)).collect())
            .unwrap_or_default();
        let own_domains: Vec<String> = owner
            .map(|o| o.own_domains.iter().filter_map(|d| normalize_domain(d)).collect())
            .unwrap_or_default();
        let is_own_domain = |d: &String| own_domains.iter().any(|own| domains_related(d, own));

        Self {
            name: fields
                .partner_name
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string),
            iban: fields
                .iban
                .as_deref()
                .map(normalize_iban)
                .filter(|i| !i.is_empty() && !own_ibans.contains(i)),
            vat_id: fields
                .vat_id
                .as_deref()
                .map(normalize_vat)
                .filter(|v| !v.is_empty() && !own_vats.contains(v)),
            sender_domain: fields
                .sender_domain
                .as_deref()
                .and_then(normalize_domain)
                .filter(|d| is_identifying_domain(d) && !is_own_domain(d)),
            website: fields
                .website
                .as_deref()
                .and_then(normalize_domain)
                .filter(|d| !is_own_domain(d)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.iban.is_none()
            && self.vat_id.is_none()
            && self.sender_domain.is_none()
            && self.website.is_none()
    }
}

/// One scored candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct PartnerMatch {
    pub partner_id: String,
    pub partner_type: PartnerType,
    pub partner_name: String,
    pub confidence: u8,
    pub source: MatchSource,
    rule_rank: usize,
}

impl PartnerMatch {
    pub fn new(partner: &Partner, confidence: u8, source: MatchSource) -> Self {
        Self {
            partner_id: partner.id.clone(),
            partner_type: partner.partner_type,
            partner_name: partner.name.clone(),
            confidence,
            source,
            rule_rank: usize::MAX,
        }
    }
}

/// A rule either returns a definitive `(confidence, source)` or has no opinion.
type Rule = fn(&PartnerInput, &Partner) -> Option<(u8, MatchSource)>;

const RULES: &[Rule] = &[
    bank_account_rule,
    vat_id_rule,
    email_domain_rule,
    website_rule,
    alias_pattern_rule,
    name_rule,
];

fn bank_account_rule(input: &PartnerInput, partner: &Partner) -> Option<(u8, MatchSource)> {
    let iban = input.iban.as_ref()?;
    partner
        .ibans
        .iter()
        .any(|p| normalize_iban(p) == *iban)
        .then_some((BANK_ACCOUNT_CONFIDENCE, MatchSource::BankAccount))
}

fn vat_id_rule(input: &PartnerInput, partner: &Partner) -> Option<(u8, MatchSource)> {
    let vat = input.vat_id.as_ref()?;
    let partner_vat = normalize_vat(partner.vat_id.as_deref()?);
    (!partner_vat.is_empty() && partner_vat == *vat)
        .then_some((VAT_ID_CONFIDENCE, MatchSource::VatId))
}

fn email_domain_rule(input: &PartnerInput, partner: &Partner) -> Option<(u8, MatchSource)> {
    let sender = input.sender_domain.as_ref()?;
    partner
        .email_domains
        .iter()
        .filter_map(|d| normalize_domain(d))
        .any(|d| domains_related(sender, &d))
        .then_some((EMAIL_DOMAIN_CONFIDENCE, MatchSource::EmailDomain))
}

fn website_rule(input: &PartnerInput, partner: &Partner) -> Option<(u8, MatchSource)> {
    let website = input.website.as_ref()?;
    let partner_site = normalize_domain(partner.website.as_deref()?)?;
    if !domains_related(website, &partner_site) {
        return None;
    }

    let sender_agrees = input
        .sender_domain
        .as_ref()
        .map(|s| domains_related(s, &partner_site))
        .unwrap_or(false);
    if sender_agrees {
        return Some((WEBSITE_WITH_SENDER_CONFIDENCE, MatchSource::Website));
    }

    let name_agrees = input
        .name
        .as_deref()
        .map(|n| best_name_similarity(n, partner.names()) >= WEBSITE_NAME_SIMILARITY)
        .unwrap_or(false);
    if name_agrees {
        Some((WEBSITE_WITH_NAME_CONFIDENCE, MatchSource::Website))
    } else {
        Some((WEBSITE_ONLY_CONFIDENCE, MatchSource::Website))
    }
}

fn alias_pattern_rule(input: &PartnerInput, partner: &Partner) -> Option<(u8, MatchSource)> {
    let name = input.name.as_deref()?;
    partner
        .aliases
        .iter()
        .any(|alias| wildcard_matches(alias, name))
        .then_some((ALIAS_PATTERN_CONFIDENCE, MatchSource::Alias))
}

fn name_rule(input: &PartnerInput, partner: &Partner) -> Option<(u8, MatchSource)> {
    let name = input.name.as_deref()?;
    let similarity = best_name_similarity(
        name,
        partner.names().filter(|n| !n.contains('*')),
    );
    (similarity >= NAME_SIMILARITY_FLOOR)
        .then(|| (name_confidence(similarity), MatchSource::Name))
}

/// Maps similarity 60..=100 linearly onto confidence 60..=90.
pub fn name_confidence(similarity: u8) -> u8 {
    let similarity = similarity.clamp(NAME_SIMILARITY_FLOOR, 100) as u32;
    (60 + (similarity - 60) * 30 / 40) as u8
}

/// Scores one candidate; the first rule with an opinion decides.
pub fn score_partner(input: &PartnerInput, partner: &Partner) -> Option<PartnerMatch> {
    RULES.iter().enumerate().find_map(|(rank, rule)| {
        rule(input, partner).map(|(confidence, source)| PartnerMatch {
            rule_rank: rank,
            ..PartnerMatch::new(partner, confidence, source)
        })
    })
}

/// User partners first, then shared entries the owner has not localized yet.
pub fn build_directory(user_partners: Vec<Partner>, global_partners: Vec<Partner>) -> Vec<Partner> {
    let localized: HashSet<String> = user_partners
        .iter()
        .filter_map(|p| p.global_partner_id.clone())
        .collect();

    user_partners
        .into_iter()
        .filter(|p| !p.deleted)
        .chain(
            global_partners
                .into_iter()
                .filter(|g| !g.deleted && !localized.contains(&g.id)),
        )
        .collect()
}

/// Every candidate with an opinion, best first.
///
/// Ties break on rule priority, then user-scoped before shared, then name, so the ranking
/// is deterministic for identical inputs.
pub fn rank_partners(input: &PartnerInput, directory: &[Partner]) -> Vec<PartnerMatch> {
    if input.is_empty() {
        return Vec::new();
    }

    let mut matches: Vec<PartnerMatch> = directory
        .iter()
        .filter_map(|partner| score_partner(input, partner))
        .collect();

    matches.sort_by(|a, b| {
        b.confidence
            .cmp(&a.confidence)
            .then(a.rule_rank.cmp(&b.rule_rank))
            .then(type_rank(a.partner_type).cmp(&type_rank(b.partner_type)))
            .then(a.partner_name.cmp(&b.partner_name))
            .then(a.partner_id.cmp(&b.partner_id))
    });
    matches
}

fn type_rank(partner_type: PartnerType) -> u8 {
    match partner_type {
        PartnerType::User => 0,
        PartnerType::Global => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partner(name: &str) -> Partner {
        Partner::new_user("owner-1", name)
    }

    fn fields(name: &str) -> ExtractedFields {
        ExtractedFields {
            partner_name: Some(name.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_bank_account_wins_over_every_other_signal() {
        let mut by_iban = partner("Completely Different Ltd");
        by_iban.ibans = vec!["AT61 1904 3002 3457 3201".to_string()];
        let mut by_name = partner("Acme GmbH");
        by_name.vat_id = Some("ATU12345678".to_string());

        let input = PartnerInput::from_fields(
            &ExtractedFields {
                partner_name: Some("Acme GmbH".to_string()),
                iban: Some("AT611904300234573201".to_string()),
                vat_id: Some("ATU12345678".to_string()),
                ..Default::default()
            },
            None,
        );

        let ranked = rank_partners(&input, &[by_name, by_iban.clone()]);
        assert_eq!(ranked[0].partner_id, by_iban.id);
        assert_eq!(ranked[0].confidence, 100);
        assert_eq!(ranked[0].source, MatchSource::BankAccount);
    }

    #[test]
    fn test_vat_match_scores_95() {
        let mut p = partner("Muster AG");
        p.vat_id = Some("ATU 1234 5678".to_string());
        let input = PartnerInput::from_fields(
            &ExtractedFields {
                vat_id: Some("ATU12345678".to_string()),
                ..Default::default()
            },
            None,
        );

        let m = score_partner(&input, &p).unwrap();
        assert_eq!(m.confidence, 95);
        assert_eq!(m.source, MatchSource::VatId);
    }

    #[test]
    fn test_email_domain_matches_subdomains() {
        let mut p = partner("Acme");
        p.email_domains = vec!["acme.com".to_string()];
        let input = PartnerInput::from_fields(
            &ExtractedFields {
                sender_domain: Some("billing@eu.acme.com".to_string()),
                ..Default::default()
            },
            None,
        );

        assert_eq!(score_partner(&input, &p).unwrap().confidence, 90);
    }

    #[test]
    fn test_website_confidence_depends_on_corroboration() {
        let mut p = partner("Acme Software");
        p.website = Some("https://acme.io".to_string());

        let with_sender = PartnerInput::from_fields(
            &ExtractedFields {
                website: Some("www.acme.io".to_string()),
                sender_domain: Some("hello@acme.io".to_string()),
                ..Default::default()
            },
            None,
        );
        assert_eq!(score_partner(&with_sender, &p).unwrap().confidence, 90);

        let with_name = PartnerInput::from_fields(
            &ExtractedFields {
                website: Some("acme.io".to_string()),
                partner_name: Some("Acme Software Inc.".to_string()),
                ..Default::default()
            },
            None,
        );
        assert_eq!(score_partner(&with_name, &p).unwrap().confidence, 92);

        let alone = PartnerInput::from_fields(
            &ExtractedFields {
                website: Some("acme.io".to_string()),
                partner_name: Some("Zebra Holdings".to_string()),
                ..Default::default()
            },
            None,
        );
        assert_eq!(score_partner(&alone, &p).unwrap().confidence, 75);
    }

    #[test]
    fn test_alias_pattern() {
        let mut p = partner("Amazon");
        p.aliases = vec!["AMAZON*".to_string()];
        let input = PartnerInput::from_fields(&fields("Amazon EU S.a.r.l."), None);
        let m = score_partner(&input, &p).unwrap();
        assert_eq!(m.confidence, 90);
        assert_eq!(m.source, MatchSource::Alias);
    }

    #[test]
    fn test_name_confidence_is_linear() {
        assert_eq!(name_confidence(60), 60);
        assert_eq!(name_confidence(80), 75);
        assert_eq!(name_confidence(100), 90);
    }

    #[test]
    fn test_weak_names_have_no_opinion() {
        let input = PartnerInput::from_fields(&fields("Globex"), None);
        assert!(score_partner(&input, &partner("Initech")).is_none());
    }

    #[test]
    fn test_own_identifiers_are_suppressed() {
        let mut p = partner("Myself GmbH");
        p.ibans = vec!["DE89370400440532013000".to_string()];
        let owner = OwnerProfile {
            owner_id: "owner-1".to_string(),
            own_ibans: vec!["DE89 3704 0044 0532 0130 00".to_string()],
            own_domains: vec!["myself.de".to_string()],
            ..Default::default()
        };
        let input = PartnerInput::from_fields(
            &ExtractedFields {
                iban: Some("DE89370400440532013000".to_string()),
                sender_domain: Some("office@myself.de".to_string()),
                ..Default::default()
            },
            Some(&owner),
        );

        assert!(input.iban.is_none());
        assert!(input.sender_domain.is_none());
        assert!(score_partner(&input, &p).is_none());
    }

    #[test]
    fn test_directory_skips_localized_globals() {
        let global = Partner::new_global("Shared Vendor");
        let other_global = Partner::new_global("Other Vendor");
        let local = Partner::localized_from(&global, "owner-1");

        let directory = build_directory(vec![local.clone()], vec![global, other_global.clone()]);
        let ids: Vec<_> = directory.iter().map(|p| p.id.clone()).collect();
        assert_eq!(ids, vec![local.id, other_global.id]);
    }

    #[test]
    fn test_user_partner_ranks_before_identical_global() {
        let user = partner("Acme");
        let global = Partner::new_global("Acme");
        let input = PartnerInput::from_fields(&fields("ACME GmbH"), None);

        let ranked = rank_partners(&input, &[global, user.clone()]);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].partner_id, user.id);
    }
}
