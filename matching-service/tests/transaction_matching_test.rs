mod common;

use common::{bank_entry, day, invoice, user_partner, TestEngine, OWNER};
use matching_service::models::{Document, MatchMethod, MatchSource, Partner};
use matching_service::services::Notification;
use std::time::Duration;

async fn with_acme() -> (TestEngine, Partner) {
    let t = TestEngine::new();
    let acme = t.add_partner(user_partner("Acme Trading GmbH")).await;
    (t, acme)
}

fn matched_notices(t: &TestEngine) -> usize {
    t.notifier
        .sent()
        .iter()
        .filter(|n| matches!(n, Notification::TransactionMatched { .. }))
        .count()
}

#[tokio::test]
async fn high_confidence_transaction_is_connected() {
    let (t, acme) = with_acme().await;
    let transaction = t
        .add_transaction(bank_entry(-11900, day(2024, 3, 2), "ACME Trading GmbH"))
        .await;

    let id = t
        .extract("invoice.pdf", invoice("Acme Trading GmbH", 11900, day(2024, 3, 1)))
        .await;

    let document = t.document(&id).await;
    assert!(document.transaction_match.complete);
    assert_eq!(document.transaction_ids, vec![transaction.id.clone()]);
    assert!(document.transaction_suggestions.is_empty());

    let connections = t.store.all_connections().await;
    assert_eq!(connections.len(), 1);
    assert_eq!(connections[0].document_id, id);
    assert_eq!(connections[0].method, MatchMethod::Auto);
    assert_eq!(connections[0].confidence, 90);
    assert!(connections[0].signals.contains(&"amount".to_string()));
    assert!(connections[0].signals.contains(&"partner_name".to_string()));

    let stored = t.transaction(&transaction.id).await;
    assert_eq!(stored.document_ids, vec![id.clone()]);
    let synced = stored.partner.expect("partner copied to transaction");
    assert_eq!(synced.partner_id, acme.id);
    assert_eq!(synced.matched_by, MatchMethod::Auto);
    assert_eq!(matched_notices(&t), 1);
}

#[tokio::test]
async fn rerunning_the_transaction_stage_adds_nothing() {
    let (t, _) = with_acme().await;
    t.add_transaction(bank_entry(-11900, day(2024, 3, 2), "ACME Trading GmbH"))
        .await;
    let id = t
        .extract("invoice.pdf", invoice("Acme Trading GmbH", 11900, day(2024, 3, 1)))
        .await;

    t.rerun_transaction_stage(&id).await;
    t.rerun_transaction_stage(&id).await;

    assert_eq!(t.store.all_connections().await.len(), 1);
    assert_eq!(t.document(&id).await.transaction_ids.len(), 1);
    assert_eq!(matched_notices(&t), 1);
}

#[tokio::test]
async fn covered_transaction_is_only_suggested() {
    let (t, _) = with_acme().await;
    let mut transaction = bank_entry(-30000, day(2024, 3, 2), "ACME Trading GmbH");
    let mut earlier = Document::new(OWNER, "partial.pdf");
    earlier.fields.amount = Some(29000);
    earlier.transaction_ids = vec![transaction.id.clone()];
    let earlier = t.add_document(earlier).await;
    transaction.document_ids = vec![earlier.id.clone()];
    let transaction = t.add_transaction(transaction).await;

    let id = t
        .extract("invoice.pdf", invoice("Acme Trading GmbH", 30000, day(2024, 3, 1)))
        .await;

    let document = t.document(&id).await;
    assert!(document.transaction_ids.is_empty());
    assert_eq!(document.transaction_suggestions.len(), 1);
    assert_eq!(document.transaction_suggestions[0].transaction_id, transaction.id);
    assert_eq!(document.transaction_suggestions[0].confidence, 90);
    assert!(t.store.all_connections().await.is_empty());
    assert_eq!(
        t.transaction(&transaction.id).await.document_ids,
        vec![earlier.id.clone()]
    );
}

#[tokio::test]
async fn only_the_best_candidate_is_connected() {
    let (t, _) = with_acme().await;
    let best = t
        .add_transaction(bank_entry(-11900, day(2024, 3, 2), "ACME Trading GmbH"))
        .await;
    let runner_up = t
        .add_transaction(bank_entry(-11900, day(2024, 3, 5), "ACME Trading GmbH"))
        .await;

    let id = t
        .extract("invoice.pdf", invoice("Acme Trading GmbH", 11900, day(2024, 3, 1)))
        .await;
    t.rerun_transaction_stage(&id).await;

    let document = t.document(&id).await;
    assert_eq!(document.transaction_ids, vec![best.id.clone()]);
    let suggested: Vec<&str> = document
        .transaction_suggestions
        .iter()
        .map(|s| s.transaction_id.as_str())
        .collect();
    assert_eq!(suggested, vec![runner_up.id.as_str()]);
    assert_eq!(document.transaction_suggestions[0].confidence, 87);
    assert_eq!(t.store.all_connections().await.len(), 1);
}

#[tokio::test]
async fn currency_mismatch_stays_below_auto_threshold() {
    let (t, _) = with_acme().await;
    let transaction = t
        .add_transaction(bank_entry(-11900, day(2024, 3, 2), "ACME Trading GmbH"))
        .await;
    let mut fields = invoice("Acme Trading GmbH", 11900, day(2024, 3, 1));
    fields.currency = Some("USD".to_string());

    let id = t.extract("invoice.pdf", fields).await;

    let document = t.document(&id).await;
    assert!(document.transaction_ids.is_empty());
    assert_eq!(document.transaction_suggestions.len(), 1);
    assert_eq!(document.transaction_suggestions[0].transaction_id, transaction.id);
    assert_eq!(document.transaction_suggestions[0].confidence, 70);
}

#[tokio::test]
async fn rejected_document_is_never_proposed_again() {
    let (t, _) = with_acme().await;
    let transaction = t
        .add_transaction(bank_entry(-12500, day(2024, 3, 2), "ACME Trading GmbH"))
        .await;
    let id = t
        .extract("invoice.pdf", invoice("Acme Trading GmbH", 11900, day(2024, 3, 1)))
        .await;
    let document = t.document(&id).await;
    assert_eq!(document.transaction_suggestions.len(), 1);
    assert_eq!(document.transaction_suggestions[0].confidence, 80);

    let events = t
        .engine
        .reject_document(&transaction.id, &id)
        .await
        .expect("rejection accepted");
    t.run(events).await;
    t.rerun_partner_stage(&id).await;
    t.rerun_transaction_stage(&id).await;

    let document = t.document(&id).await;
    assert!(document.transaction_suggestions.is_empty());
    assert!(document.transaction_ids.is_empty());
    assert!(t.transaction(&transaction.id).await.has_rejected(&id));
}

#[tokio::test]
async fn rejection_also_blocks_auto_matching() {
    let (t, _) = with_acme().await;
    let transaction = t
        .add_transaction(bank_entry(-11900, day(2024, 3, 2), "ACME Trading GmbH"))
        .await;
    let uploaded = t.add_document(Document::new(OWNER, "invoice.pdf")).await;

    t.engine
        .reject_document(&transaction.id, &uploaded.id)
        .await
        .expect("rejection accepted");
    t.extract_as(
        &uploaded.id,
        "invoice.pdf",
        invoice("Acme Trading GmbH", 11900, day(2024, 3, 1)),
    )
    .await;

    let document = t.document(&uploaded.id).await;
    assert!(document.transaction_match.complete);
    assert!(document.transaction_ids.is_empty());
    assert!(document.transaction_suggestions.is_empty());
    assert!(t.store.all_connections().await.is_empty());
}

#[tokio::test]
async fn manual_transaction_partner_flows_to_linked_documents() {
    let (t, acme) = with_acme().await;
    let other = t.add_partner(user_partner("Other Ventures Ltd")).await;
    let transaction = t
        .add_transaction(bank_entry(-11900, day(2024, 3, 2), "ACME Trading GmbH"))
        .await;
    let id = t
        .extract("invoice.pdf", invoice("Acme Trading GmbH", 11900, day(2024, 3, 1)))
        .await;

    let events = t
        .engine
        .assign_transaction_partner(&transaction.id, &other.id, MatchMethod::Manual)
        .await
        .expect("assignment accepted");
    t.run(events).await;

    let stored = t.transaction(&transaction.id).await;
    let assignment = stored.partner.expect("transaction assigned");
    assert_eq!(assignment.partner_id, other.id);
    assert_eq!(assignment.matched_by, MatchMethod::Manual);
    let previous = stored.previous_partner.expect("previous assignment kept");
    assert_eq!(previous.partner_id, acme.id);

    let document = t.document(&id).await.partner.expect("document assigned");
    assert_eq!(document.partner_id, other.id);
    assert_eq!(document.source, MatchSource::Transaction);
}

#[tokio::test]
async fn undated_document_searches_recent_transactions() {
    let (t, _) = with_acme().await;
    let mut transaction = bank_entry(-4990, day(2024, 5, 20), "Acme Trading GmbH");
    transaction.reference = Some("RF18 5390 0754 7034".to_string());
    let transaction = t.add_transaction(transaction).await;

    let mut fields = invoice("Acme Trading GmbH", 4990, day(2024, 5, 20));
    fields.date = None;
    fields.reference = Some("RF18539007547034".to_string());
    let id = t.extract("invoice.pdf", fields).await;

    let document = t.document(&id).await;
    let suggested: Vec<&str> = document
        .transaction_suggestions
        .iter()
        .map(|s| s.transaction_id.as_str())
        .collect();
    assert_eq!(suggested, vec![transaction.id.as_str()]);
    assert_eq!(document.transaction_suggestions[0].confidence, 80);
    assert!(document.transaction_ids.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn rejections_survive_concurrent_partner_assignments() {
    let (t, acme) = with_acme().await;
    let nordwind = t.add_partner(user_partner("Nordwind Logistik GmbH")).await;
    let transaction = t
        .add_transaction(bank_entry(-11900, day(2024, 3, 2), "ACME Trading GmbH"))
        .await;
    let mut rejected = Vec::new();
    for i in 0..20 {
        let document = t
            .add_document(Document::new(OWNER, format!("scan-{i}.pdf")))
            .await;
        rejected.push(document.id);
    }

    let mut tasks = Vec::new();
    for round in 0..40 {
        let engine = t.engine.clone();
        let transaction_id = transaction.id.clone();
        let partner_id = if round % 2 == 0 {
            acme.id.clone()
        } else {
            nordwind.id.clone()
        };
        tasks.push(tokio::spawn(async move {
            engine
                .assign_transaction_partner(&transaction_id, &partner_id, MatchMethod::Manual)
                .await
                .map(|_| ())
        }));
        if let Some(document_id) = rejected.get(round / 2).filter(|_| round % 2 == 0) {
            let engine = t.engine.clone();
            let transaction_id = transaction.id.clone();
            let document_id = document_id.clone();
            tasks.push(tokio::spawn(async move {
                engine
                    .reject_document(&transaction_id, &document_id)
                    .await
                    .map(|_| ())
            }));
        }
    }
    for task in tasks {
        task.await.expect("task joined").expect("action accepted");
    }

    let stored = t.transaction(&transaction.id).await;
    assert_eq!(stored.rejected_document_ids.len(), rejected.len());
    assert!(rejected.iter().all(|id| stored.has_rejected(id)));
    let assignment = stored.partner.expect("partner assigned");
    assert_eq!(assignment.matched_by, MatchMethod::Manual);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_invoices_connect_only_once_to_a_paid_transaction() {
    let (t, _) = with_acme().await;
    let transaction = t
        .add_transaction(bank_entry(-30000, day(2024, 3, 2), "ACME Trading GmbH"))
        .await;

    let mut documents = Vec::new();
    let mut events = Vec::new();
    for i in 0..4 {
        let document_id = format!("march-{i}");
        events.extend(
            t.engine
                .complete_extraction(
                    &document_id,
                    OWNER,
                    "invoice.pdf",
                    invoice("Acme Trading GmbH", 30000, day(2024, 3, 1)),
                )
                .await
                .expect("extraction accepted"),
        );
        documents.push(document_id);
    }

    let tasks: Vec<_> = events
        .into_iter()
        .map(|event| {
            let engine = t.engine.clone();
            tokio::spawn(async move { engine.process(event).await })
        })
        .collect();
    for task in tasks {
        task.await.expect("task joined").expect("event processed");
    }

    let stored = t.transaction(&transaction.id).await;
    assert_eq!(stored.document_ids.len(), 1);
    assert_eq!(t.store.all_connections().await.len(), 1);
    for id in documents.iter().filter(|id| **id != stored.document_ids[0]) {
        let document = t.document(id).await;
        assert!(document.transaction_ids.is_empty());
        assert!(document
            .transaction_suggestions
            .iter()
            .any(|s| s.transaction_id == transaction.id));
    }
}

#[tokio::test]
async fn stalled_notifier_does_not_hold_up_matching() {
    let (t, _) = with_acme().await;
    let transaction = t
        .add_transaction(bank_entry(-11900, day(2024, 3, 2), "ACME Trading GmbH"))
        .await;
    t.notifier.set_stalled(true);

    let events = t
        .engine
        .complete_extraction(
            "stalled-1",
            OWNER,
            "invoice.pdf",
            invoice("Acme Trading GmbH", 11900, day(2024, 3, 1)),
        )
        .await
        .expect("extraction accepted");
    let processed = tokio::time::timeout(Duration::from_millis(100), async {
        for event in events {
            t.engine.process(event).await.expect("event processed");
        }
    })
    .await;

    assert!(processed.is_ok());
    assert_eq!(t.document("stalled-1").await.transaction_ids, vec![transaction.id]);
    assert_eq!(matched_notices(&t), 0);
}
