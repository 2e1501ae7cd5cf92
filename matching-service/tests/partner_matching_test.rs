mod common;

use common::{bank_entry, day, user_partner, TestEngine, OWNER};
use matching_service::models::{
    ExtractedFields, MatchMethod, MatchSource, OwnerProfile, Partner, PartnerAssignment,
    PartnerType,
};
use matching_service::services::{CompanyRecord, Notification, Store};

const ACME_IBAN: &str = "DE89370400440532013000";

fn fields() -> ExtractedFields {
    ExtractedFields::default()
}

#[tokio::test]
async fn vat_id_match_assigns_without_external_lookup() {
    let t = TestEngine::new();
    let mut acme = user_partner("Acme Trading GmbH");
    acme.vat_id = Some("DE123456789".to_string());
    let acme = t.add_partner(acme).await;

    let id = t
        .extract(
            "invoice.pdf",
            ExtractedFields {
                partner_name: Some("ACME Trading".to_string()),
                vat_id: Some("DE 123 456 789".to_string()),
                ..fields()
            },
        )
        .await;

    let document = t.document(&id).await;
    let assignment = document.partner.expect("partner assigned");
    assert_eq!(assignment.partner_id, acme.id);
    assert_eq!(assignment.confidence, 95);
    assert_eq!(assignment.source, MatchSource::VatId);
    assert_eq!(assignment.matched_by, MatchMethod::Auto);
    assert!(document.partner_match.complete);
    assert_eq!(t.lookup.calls(), 0);
    assert_eq!(t.vat.calls(), 0);
    assert!(t.partner(&acme.id).await.aliases.is_empty());
}

#[tokio::test]
async fn document_without_fields_completes_both_stages_unmatched() {
    let t = TestEngine::new();
    t.add_partner(user_partner("Acme Trading GmbH")).await;

    let id = t.extract("scan.pdf", fields()).await;

    let document = t.document(&id).await;
    assert!(document.partner.is_none());
    assert!(document.partner_suggestions.is_empty());
    assert!(document.partner_match.complete);
    assert!(document.transaction_match.complete);
    assert!(document.transaction_suggestions.is_empty());
    assert_eq!(t.lookup.calls(), 0);
}

#[tokio::test]
async fn rerunning_the_partner_stage_changes_nothing() {
    let t = TestEngine::new();
    let mut acme = user_partner("Acme Trading GmbH");
    acme.ibans = vec![ACME_IBAN.to_string()];
    let acme = t.add_partner(acme).await;

    let id = t
        .extract(
            "invoice.pdf",
            ExtractedFields {
                partner_name: Some("Acme Handel".to_string()),
                iban: Some("DE89 3704 0044 0532 0130 00".to_string()),
                ..fields()
            },
        )
        .await;
    let first = t.document(&id).await.partner;

    t.rerun_partner_stage(&id).await;
    t.rerun_partner_stage(&id).await;

    let document = t.document(&id).await;
    assert_eq!(document.partner, first);
    let assignment = document.partner.expect("partner assigned");
    assert_eq!(assignment.partner_id, acme.id);
    assert_eq!(assignment.confidence, 100);
    assert_eq!(assignment.source, MatchSource::BankAccount);

    let learned = t.partner(&acme.id).await;
    assert_eq!(learned.aliases, vec!["Acme Handel".to_string()]);
    assert_eq!(t.store.all_partners().await.len(), 1);
}

#[tokio::test]
async fn manual_document_assignment_survives_rematching() {
    let t = TestEngine::new();
    let alpha = t.add_partner(user_partner("Alpha Supplies")).await;
    let mut beta = user_partner("Beta Supplies GmbH");
    beta.ibans = vec![ACME_IBAN.to_string()];
    let beta = t.add_partner(beta).await;

    let id = t
        .extract(
            "invoice.pdf",
            ExtractedFields {
                partner_name: Some("Beta Supplies".to_string()),
                iban: Some(ACME_IBAN.to_string()),
                ..fields()
            },
        )
        .await;
    assert_eq!(t.document(&id).await.partner_id(), Some(beta.id.as_str()));

    let events = t
        .engine
        .assign_document_partner(&id, &alpha.id, MatchMethod::Manual)
        .await
        .expect("assignment accepted");
    t.run(events).await;
    t.rerun_partner_stage(&id).await;

    let assignment = t.document(&id).await.partner.expect("partner assigned");
    assert_eq!(assignment.partner_id, alpha.id);
    assert_eq!(assignment.matched_by, MatchMethod::Manual);
    assert_eq!(assignment.confidence, 100);
}

#[tokio::test]
async fn manual_transaction_partner_wins_over_document_evidence() {
    let t = TestEngine::new();
    let alpha = t.add_partner(user_partner("Alpha Supplies")).await;
    let mut beta = user_partner("Beta Supplies GmbH");
    beta.ibans = vec![ACME_IBAN.to_string()];
    let beta = t.add_partner(beta).await;

    let mut transaction = bank_entry(-11900, day(2024, 3, 2), "Beta Supplies GmbH");
    transaction.partner_iban = Some(ACME_IBAN.to_string());
    transaction.partner = Some(PartnerAssignment::new(
        alpha.id.clone(),
        PartnerType::User,
        MatchMethod::Manual,
        100,
        MatchSource::User,
    ));
    let transaction = t.add_transaction(transaction).await;

    let id = t
        .extract(
            "invoice.pdf",
            ExtractedFields {
                partner_name: Some("Beta Supplies".to_string()),
                iban: Some(ACME_IBAN.to_string()),
                amount: Some(11900),
                currency: Some("EUR".to_string()),
                date: Some(day(2024, 3, 1)),
                ..fields()
            },
        )
        .await;

    let stored = t.transaction(&transaction.id).await;
    let kept = stored.partner.expect("transaction keeps its partner");
    assert_eq!(kept.partner_id, alpha.id);
    assert_eq!(kept.matched_by, MatchMethod::Manual);
    assert!(stored.previous_partner.is_none());

    let document = t.document(&id).await;
    assert_eq!(document.transaction_ids, vec![transaction.id.clone()]);
    let assignment = document.partner.expect("document follows transaction");
    assert_eq!(assignment.partner_id, alpha.id);
    assert_eq!(assignment.source, MatchSource::Transaction);
    assert_ne!(assignment.partner_id, beta.id);
}

#[tokio::test]
async fn lookup_creates_partner_and_notifies() {
    let t = TestEngine::new();
    t.lookup.add(
        "Nordwind Logistik GmbH",
        CompanyRecord {
            name: "Nordwind Logistik GmbH".to_string(),
            vat_id: Some("ATU12345678".to_string()),
            website: Some("https://www.nordwind.at".to_string()),
            address: Some("Hafenstrasse 1, Linz".to_string()),
            ibans: Vec::new(),
            confidence: 90,
        },
    );

    let id = t
        .extract(
            "invoice.pdf",
            ExtractedFields {
                partner_name: Some("Nordwind Logistik GmbH".to_string()),
                ..fields()
            },
        )
        .await;

    let partners = t.store.all_partners().await;
    assert_eq!(partners.len(), 1);
    let created = &partners[0];
    assert_eq!(created.name, "Nordwind Logistik GmbH");
    assert_eq!(created.vat_id.as_deref(), Some("ATU12345678"));
    assert_eq!(created.website.as_deref(), Some("nordwind.at"));
    assert_eq!(created.owner_id.as_deref(), Some(OWNER));

    let assignment = t.document(&id).await.partner.expect("partner assigned");
    assert_eq!(assignment.partner_id, created.id);
    assert_eq!(assignment.confidence, 90);
    assert_eq!(assignment.source, MatchSource::Lookup);
    assert_eq!(t.lookup.calls(), 1);

    let created_notices = t
        .notifier
        .sent()
        .into_iter()
        .filter(|n| matches!(n, Notification::PartnerCreated { partner_id, .. } if *partner_id == created.id))
        .count();
    assert_eq!(created_notices, 1);
}

#[tokio::test]
async fn failed_lookup_falls_back_to_minimal_partner() {
    let t = TestEngine::new();
    t.lookup.set_failing(true);

    let id = t
        .extract(
            "invoice.pdf",
            ExtractedFields {
                partner_name: Some("Kleiner Laden GmbH".to_string()),
                ..fields()
            },
        )
        .await;

    let partners = t.store.all_partners().await;
    assert_eq!(partners.len(), 1);
    assert_eq!(partners[0].name, "Kleiner Laden GmbH");

    let assignment = t.document(&id).await.partner.expect("partner assigned");
    assert_eq!(assignment.partner_id, partners[0].id);
    assert_eq!(assignment.confidence, 85);
    assert_eq!(assignment.source, MatchSource::Name);
}

#[tokio::test]
async fn confirmed_duplicate_is_reused_instead_of_created() {
    let t = TestEngine::new();
    let existing = t.add_partner(user_partner("Nordwind Logistik")).await;
    t.reasoner
        .same_entity_pair("Nordwind Logistics GmbH", "Nordwind Logistik");

    let id = t
        .extract(
            "invoice.pdf",
            ExtractedFields {
                partner_name: Some("Nordwind Logistics GmbH".to_string()),
                ..fields()
            },
        )
        .await;

    assert_eq!(t.store.all_partners().await.len(), 1);
    let assignment = t.document(&id).await.partner.expect("partner assigned");
    assert_eq!(assignment.partner_id, existing.id);
    assert_eq!(assignment.confidence, 89);
    assert_eq!(t.lookup.calls(), 1);

    let learned = t.partner(&existing.id).await;
    assert!(learned.aliases.contains(&"Nordwind Logistics GmbH".to_string()));
}

#[tokio::test]
async fn unconfirmed_similar_name_gets_a_new_partner() {
    let t = TestEngine::new();
    let existing = t.add_partner(user_partner("Nordwind Logistik")).await;

    let id = t
        .extract(
            "invoice.pdf",
            ExtractedFields {
                partner_name: Some("Nordwind Logistics GmbH".to_string()),
                ..fields()
            },
        )
        .await;

    assert_eq!(t.store.all_partners().await.len(), 2);
    let assignment = t.document(&id).await.partner.expect("partner assigned");
    assert_ne!(assignment.partner_id, existing.id);
    assert_eq!(assignment.confidence, 85);
    assert_eq!(t.reasoner.calls(), 1);
}

#[tokio::test]
async fn vat_registry_name_creates_partner_without_lookup() {
    let t = TestEngine::new();
    t.vat.add("ATU99999999", "Bergbahn Betriebs GmbH");

    let id = t
        .extract(
            "invoice.pdf",
            ExtractedFields {
                vat_id: Some("ATU99999999".to_string()),
                ..fields()
            },
        )
        .await;

    let partners = t.store.all_partners().await;
    assert_eq!(partners.len(), 1);
    assert_eq!(partners[0].name, "Bergbahn Betriebs GmbH");
    assert_eq!(partners[0].vat_id.as_deref(), Some("ATU99999999"));

    let assignment = t.document(&id).await.partner.expect("partner assigned");
    assert_eq!(assignment.confidence, 90);
    assert_eq!(assignment.source, MatchSource::Lookup);
    assert_eq!(t.vat.calls(), 1);
    assert_eq!(t.lookup.calls(), 0);
}

#[tokio::test]
async fn owner_identifiers_never_match_a_partner() {
    let t = TestEngine::new();
    t.store
        .save_owner_profile(&OwnerProfile {
            owner_id: OWNER.to_string(),
            company_name: Some("Mycompany GmbH".to_string()),
            own_ibans: vec!["AT611904300234573201".to_string()],
            own_vat_ids: vec!["ATU11111111".to_string()],
            own_domains: vec!["mycompany.at".to_string()],
        })
        .await
        .expect("profile saved");
    let mut own = user_partner("Mycompany GmbH");
    own.ibans = vec!["AT611904300234573201".to_string()];
    own.vat_id = Some("ATU11111111".to_string());
    own.email_domains = vec!["mycompany.at".to_string()];
    t.add_partner(own).await;

    let id = t
        .extract(
            "invoice.pdf",
            ExtractedFields {
                iban: Some("AT61 1904 3002 3457 3201".to_string()),
                vat_id: Some("ATU11111111".to_string()),
                sender_domain: Some("office@mycompany.at".to_string()),
                ..fields()
            },
        )
        .await;

    let document = t.document(&id).await;
    assert!(document.partner.is_none());
    assert!(document.partner_suggestions.is_empty());
    assert!(document.partner_match.complete);
    assert_eq!(t.vat.calls(), 0);
}

#[tokio::test]
async fn shared_partner_is_localized_once_per_owner() {
    let t = TestEngine::new();
    let mut shared = Partner::new_global("Cloudhost Ltd");
    shared.ibans = vec!["IE29AIBK93115212345678".to_string()];
    let shared = t.add_partner(shared).await;
    let hosting = ExtractedFields {
        iban: Some("IE29AIBK93115212345678".to_string()),
        ..fields()
    };

    let first = t.extract("hosting-jan.pdf", hosting.clone()).await;
    let second = t.extract("hosting-feb.pdf", hosting).await;

    let a = t.document(&first).await.partner.expect("partner assigned");
    let b = t.document(&second).await.partner.expect("partner assigned");
    assert_ne!(a.partner_id, shared.id);
    assert_eq!(a.partner_id, b.partner_id);
    assert_eq!(a.partner_type, PartnerType::User);

    let local = t.partner(&a.partner_id).await;
    assert_eq!(local.global_partner_id.as_deref(), Some(shared.id.as_str()));
    assert_eq!(local.owner_id.as_deref(), Some(OWNER));
    assert_eq!(t.store.all_partners().await.len(), 2);
}

#[tokio::test]
async fn sender_domain_is_learned_when_it_matches_the_website() {
    let t = TestEngine::new();
    let mut acme = user_partner("Acme Trading GmbH");
    acme.ibans = vec![ACME_IBAN.to_string()];
    acme.website = Some("acme.de".to_string());
    let acme = t.add_partner(acme).await;

    t.extract(
        "invoice.pdf",
        ExtractedFields {
            iban: Some(ACME_IBAN.to_string()),
            sender_domain: Some("invoices@billing.acme.de".to_string()),
            ..fields()
        },
    )
    .await;

    assert_eq!(
        t.partner(&acme.id).await.email_domains,
        vec!["billing.acme.de".to_string()]
    );
    assert_eq!(t.reasoner.calls(), 0);
}

#[tokio::test]
async fn unrelated_sender_domain_needs_ownership_confirmation() {
    let t = TestEngine::new();
    let mut acme = user_partner("Acme Trading GmbH");
    acme.ibans = vec![ACME_IBAN.to_string()];
    let acme = t.add_partner(acme).await;
    t.reasoner.own_domain("Acme Trading GmbH", "acme-mail.de");

    let sent_from = |domain: &str| ExtractedFields {
        iban: Some(ACME_IBAN.to_string()),
        sender_domain: Some(domain.to_string()),
        ..fields()
    };
    t.extract("one.pdf", sent_from("acme-mail.de")).await;
    t.extract("two.pdf", sent_from("unknown-sender.io")).await;
    t.extract("three.pdf", sent_from("stripe.com")).await;

    assert_eq!(
        t.partner(&acme.id).await.email_domains,
        vec!["acme-mail.de".to_string()]
    );
    assert_eq!(t.reasoner.calls(), 2);
}
