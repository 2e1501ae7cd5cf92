#![allow(dead_code)]

use chrono::NaiveDate;
use matching_service::matching::MatchSettings;
use matching_service::models::{Document, ExtractedFields, Partner, Transaction};
use matching_service::pipeline::MatchingEngine;
use matching_service::services::providers::{
    MockCompanyLookup, MockEntityReasoner, MockNotificationSink, MockVatRegistry,
};
use matching_service::services::{Collaborators, MemoryStore, Store};
use std::sync::{Arc, Once};
use std::time::Duration;
use uuid::Uuid;

pub const OWNER: &str = "owner-1";

static INIT_TRACING: Once = Once::new();

pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new("matching_service=debug"))
            .with_test_writer()
            .try_init();
    });
}

pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid test date")
}

/// Engine over an in-memory store with handles on every mock collaborator.
pub struct TestEngine {
    pub engine: MatchingEngine,
    pub store: Arc<MemoryStore>,
    pub lookup: Arc<MockCompanyLookup>,
    pub reasoner: Arc<MockEntityReasoner>,
    pub vat: Arc<MockVatRegistry>,
    pub notifier: Arc<MockNotificationSink>,
}

impl TestEngine {
    pub fn new() -> Self {
        init_tracing();

        let store = Arc::new(MemoryStore::new());
        let lookup = Arc::new(MockCompanyLookup::new());
        let reasoner = Arc::new(MockEntityReasoner::new());
        let vat = Arc::new(MockVatRegistry::new());
        let notifier = Arc::new(MockNotificationSink::new());

        let collaborators = Collaborators {
            lookup: lookup.clone(),
            reasoner: reasoner.clone(),
            vat: vat.clone(),
            notifier: notifier.clone(),
            timeout: Duration::from_millis(200),
            min_confidence: 70,
        };
        let engine = MatchingEngine::new(store.clone(), collaborators, MatchSettings::default());

        Self {
            engine,
            store,
            lookup,
            reasoner,
            vat,
            notifier,
        }
    }

    /// Runs extraction completion and the whole follow-up chain. Returns the document id.
    pub async fn extract(&self, file_name: &str, fields: ExtractedFields) -> String {
        let document_id = Uuid::new_v4().to_string();
        self.extract_as(&document_id, file_name, fields).await;
        document_id
    }

    pub async fn extract_as(&self, document_id: &str, file_name: &str, fields: ExtractedFields) {
        let events = self
            .engine
            .complete_extraction(document_id, OWNER, file_name, fields)
            .await
            .expect("extraction accepted");
        self.run(events).await;
    }

    pub async fn run(&self, events: Vec<matching_service::pipeline::PipelineEvent>) {
        for event in events {
            self.engine.process(event).await.expect("event processed");
        }
        self.settle().await;
    }

    /// Lets detached notification tasks reach the sink.
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    pub async fn rerun_partner_stage(&self, document_id: &str) {
        self.run(vec![matching_service::pipeline::PipelineEvent::partner_match(
            document_id,
        )])
        .await;
    }

    pub async fn rerun_transaction_stage(&self, document_id: &str) {
        self.run(vec![
            matching_service::pipeline::PipelineEvent::transaction_match(document_id),
        ])
        .await;
    }

    pub async fn add_partner(&self, partner: Partner) -> Partner {
        self.store.save_partner(&partner).await.expect("partner saved");
        partner
    }

    pub async fn add_transaction(&self, transaction: Transaction) -> Transaction {
        self.store
            .save_transaction(&transaction)
            .await
            .expect("transaction saved");
        transaction
    }

    pub async fn add_document(&self, document: Document) -> Document {
        self.store.save_document(&document).await.expect("document saved");
        document
    }

    pub async fn document(&self, id: &str) -> Document {
        self.store
            .get_document(id)
            .await
            .expect("store read")
            .expect("document exists")
    }

    pub async fn partner(&self, id: &str) -> Partner {
        self.store
            .get_partner(id)
            .await
            .expect("store read")
            .expect("partner exists")
    }

    pub async fn transaction(&self, id: &str) -> Transaction {
        self.store
            .get_transaction(id)
            .await
            .expect("store read")
            .expect("transaction exists")
    }
}

pub fn user_partner(name: &str) -> Partner {
    Partner::new_user(OWNER, name)
}

pub fn invoice(partner_name: &str, amount: i64, date: NaiveDate) -> ExtractedFields {
    ExtractedFields {
        partner_name: Some(partner_name.to_string()),
        amount: Some(amount),
        currency: Some("EUR".to_string()),
        date: Some(date),
        ..Default::default()
    }
}

pub fn bank_entry(amount: i64, date: NaiveDate, counterparty: &str) -> Transaction {
    let mut transaction = Transaction::new(OWNER, amount, "EUR", date, "SEPA transfer");
    transaction.partner_name = Some(counterparty.to_string());
    transaction
}
