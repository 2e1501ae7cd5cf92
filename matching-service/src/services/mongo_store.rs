//! MongoDB-backed store.

use super::metrics::record_store_operation;
use super::store::{StaleQuery, Store};
use crate::models::{
    Connection, Document, OwnerProfile, Partner, PartnerAssignment, Transaction,
};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use futures::TryStreamExt;
use mongodb::{
    bson::{self, doc, Bson, Document as BsonDocument},
    options::{FindOptions, IndexOptions, ReplaceOptions, UpdateOptions},
    Client as MongoClient, Collection, Database, IndexModel,
};
use serde::de::DeserializeOwned;
use service_core::error::AppError;
use std::time::Instant;
use tracing::instrument;

#[derive(Clone)]
pub struct MongoStore {
    client: MongoClient,
    db: Database,
}

fn db_error(context: &str, e: impl std::fmt::Display) -> AppError {
    tracing::error!("{}: {}", context, e);
    AppError::DatabaseError(anyhow::anyhow!("{}: {}", context, e))
}

fn to_bson<T: serde::Serialize>(value: &T) -> Result<Bson, AppError> {
    bson::to_bson(value).map_err(|e| db_error("Failed to serialize value", e))
}

fn day(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

impl MongoStore {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, AppError> {
        tracing::info!("Connecting to MongoDB");
        let client = MongoClient::with_uri_str(uri).await.map_err(|e| {
            tracing::error!("Failed to connect to MongoDB: {}", e);
            AppError::from(e)
        })?;
        let db = client.database(database);
        tracing::info!(database = %database, "Successfully connected to MongoDB database");
        Ok(Self { client, db })
    }

    pub async fn initialize_indexes(&self) -> Result<(), AppError> {
        tracing::info!("Creating MongoDB indexes for matching-service");

        self.create_index(
            self.documents(),
            doc! { "owner_id": 1, "partner.partner_id": 1 },
            "owner_partner_lookup",
            false,
        )
        .await?;
        self.create_index(
            self.documents(),
            doc! { "partner_match.complete": 1, "transaction_match.complete": 1, "updated_at": 1 },
            "stale_scan",
            false,
        )
        .await?;
        self.create_index(
            self.partners(),
            doc! { "owner_id": 1, "global_partner_id": 1 },
            "owner_localized_lookup",
            false,
        )
        .await?;
        self.create_index(
            self.transactions(),
            doc! { "owner_id": 1, "date": -1 },
            "owner_date_lookup",
            false,
        )
        .await?;
        self.create_index(
            self.connections(),
            doc! { "document_id": 1, "transaction_id": 1 },
            "document_transaction_unique",
            true,
        )
        .await?;

        Ok(())
    }

    async fn create_index<T>(
        &self,
        collection: Collection<T>,
        keys: BsonDocument,
        name: &str,
        unique: bool,
    ) -> Result<(), AppError> {
        let index = IndexModel::builder()
            .keys(keys)
            .options(
                IndexOptions::builder()
                    .name(name.to_string())
                    .unique(unique)
                    .build(),
            )
            .build();

        collection.create_index(index, None).await.map_err(|e| {
            tracing::error!(index = %name, "Failed to create index: {}", e);
            AppError::from(e)
        })?;
        tracing::info!(index = %name, collection = %collection.name(), "Created index");
        Ok(())
    }

    fn documents(&self) -> Collection<Document> {
        self.db.collection("documents")
    }

    fn partners(&self) -> Collection<Partner> {
        self.db.collection("partners")
    }

    fn profiles(&self) -> Collection<OwnerProfile> {
        self.db.collection("owner_profiles")
    }

    fn transactions(&self) -> Collection<Transaction> {
        self.db.collection("transactions")
    }

    fn connections(&self) -> Collection<Connection> {
        self.db.collection("connections")
    }

    async fn find_many<T>(
        &self,
        operation: &str,
        collection: Collection<T>,
        filter: BsonDocument,
        options: Option<FindOptions>,
    ) -> Result<Vec<T>, AppError>
    where
        T: DeserializeOwned + Unpin + Send + Sync,
    {
        let start = Instant::now();
        let cursor = collection
            .find(filter, options)
            .await
            .map_err(|e| db_error(operation, e))?;
        let items: Vec<T> = cursor
            .try_collect()
            .await
            .map_err(|e| db_error(operation, e))?;
        record_store_operation(operation, start.elapsed().as_secs_f64());
        Ok(items)
    }

    async fn find_by_id<T>(
        &self,
        operation: &str,
        collection: Collection<T>,
        id: &str,
    ) -> Result<Option<T>, AppError>
    where
        T: DeserializeOwned + Unpin + Send + Sync,
    {
        let start = Instant::now();
        let item = collection
            .find_one(doc! { "_id": id }, None)
            .await
            .map_err(|e| db_error(operation, e))?;
        record_store_operation(operation, start.elapsed().as_secs_f64());
        Ok(item)
    }

    async fn upsert<T>(
        &self,
        operation: &str,
        collection: Collection<T>,
        id: &str,
        item: &T,
    ) -> Result<(), AppError>
    where
        T: serde::Serialize + Send + Sync,
    {
        let start = Instant::now();
        collection
            .replace_one(
                doc! { "_id": id },
                item,
                ReplaceOptions::builder().upsert(true).build(),
            )
            .await
            .map_err(|e| db_error(operation, e))?;
        record_store_operation(operation, start.elapsed().as_secs_f64());
        Ok(())
    }

    async fn update_by_id<T>(
        &self,
        operation: &str,
        collection: Collection<T>,
        id: &str,
        update: BsonDocument,
    ) -> Result<u64, AppError> {
        let start = Instant::now();
        let result = collection
            .update_one(doc! { "_id": id }, update, None)
            .await
            .map_err(|e| db_error(operation, e))?;
        record_store_operation(operation, start.elapsed().as_secs_f64());
        Ok(result.modified_count)
    }

    fn add_to_set(field: &str, values: &[String]) -> BsonDocument {
        let mut each = BsonDocument::new();
        each.insert("$each", values.to_vec());
        let mut add = BsonDocument::new();
        add.insert(field, each);
        doc! {
            "$addToSet": add,
            "$set": { "updated_at": bson::DateTime::from_chrono(Utc::now()) },
        }
    }
}

#[async_trait]
impl Store for MongoStore {
    #[instrument(skip(self))]
    async fn get_document(&self, id: &str) -> Result<Option<Document>, AppError> {
        self.find_by_id("get_document", self.documents(), id).await
    }

    #[instrument(skip(self, document), fields(document_id = %document.id))]
    async fn save_document(&self, document: &Document) -> Result<(), AppError> {
        self.upsert("save_document", self.documents(), &document.id, document)
            .await
    }

    async fn get_documents(&self, ids: &[String]) -> Result<Vec<Document>, AppError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.find_many(
            "get_documents",
            self.documents(),
            doc! { "_id": { "$in": ids.to_vec() } },
            None,
        )
        .await
    }

    #[instrument(skip(self))]
    async fn add_document_transaction(
        &self,
        document_id: &str,
        transaction_id: &str,
    ) -> Result<(), AppError> {
        self.update_by_id(
            "add_document_transaction",
            self.documents(),
            document_id,
            Self::add_to_set("transaction_ids", &[transaction_id.to_string()]),
        )
        .await
        .map(|_| ())
    }

    #[instrument(skip(self))]
    async fn find_stale_documents(&self, query: &StaleQuery) -> Result<Vec<Document>, AppError> {
        let mut filter = BsonDocument::new();
        filter.insert(format!("{}.complete", query.completed.as_str()), true);
        filter.insert(
            format!("{}.complete", query.pending.as_str()),
            doc! { "$ne": true },
        );
        filter.insert(
            "updated_at",
            doc! { "$lt": bson::DateTime::from_chrono(query.updated_before) },
        );
        filter.insert("deleted", doc! { "$ne": true });
        filter.insert("not_invoice", doc! { "$ne": true });
        filter.insert("extraction_error", Bson::Null);

        let options = FindOptions::builder()
            .sort(doc! { "updated_at": 1 })
            .limit(query.limit)
            .build();
        self.find_many("find_stale_documents", self.documents(), filter, Some(options))
            .await
    }

    async fn find_documents_by_partner(&self, partner_id: &str) -> Result<Vec<Document>, AppError> {
        self.find_many(
            "find_documents_by_partner",
            self.documents(),
            doc! { "partner.partner_id": partner_id, "deleted": { "$ne": true } },
            None,
        )
        .await
    }

    async fn find_unassigned_documents(&self, owner_id: &str) -> Result<Vec<Document>, AppError> {
        self.find_many(
            "find_unassigned_documents",
            self.documents(),
            doc! {
                "owner_id": owner_id,
                "partner": Bson::Null,
                "deleted": { "$ne": true },
                "not_invoice": { "$ne": true },
                "extraction_error": Bson::Null,
            },
            None,
        )
        .await
    }

    async fn get_partner(&self, id: &str) -> Result<Option<Partner>, AppError> {
        self.find_by_id("get_partner", self.partners(), id).await
    }

    #[instrument(skip(self, partner), fields(partner_id = %partner.id))]
    async fn save_partner(&self, partner: &Partner) -> Result<(), AppError> {
        self.upsert("save_partner", self.partners(), &partner.id, partner)
            .await
    }

    async fn list_user_partners(&self, owner_id: &str) -> Result<Vec<Partner>, AppError> {
        let options = FindOptions::builder().sort(doc! { "name": 1, "_id": 1 }).build();
        self.find_many(
            "list_user_partners",
            self.partners(),
            doc! { "owner_id": owner_id, "deleted": { "$ne": true } },
            Some(options),
        )
        .await
    }

    async fn list_global_partners(&self) -> Result<Vec<Partner>, AppError> {
        let options = FindOptions::builder().sort(doc! { "name": 1, "_id": 1 }).build();
        self.find_many(
            "list_global_partners",
            self.partners(),
            doc! { "owner_id": Bson::Null, "deleted": { "$ne": true } },
            Some(options),
        )
        .await
    }

    async fn find_localized_partner(
        &self,
        owner_id: &str,
        global_partner_id: &str,
    ) -> Result<Option<Partner>, AppError> {
        let start = Instant::now();
        let partner = self
            .partners()
            .find_one(
                doc! {
                    "owner_id": owner_id,
                    "global_partner_id": global_partner_id,
                    "deleted": { "$ne": true },
                },
                None,
            )
            .await
            .map_err(|e| db_error("find_localized_partner", e))?;
        record_store_operation("find_localized_partner", start.elapsed().as_secs_f64());
        Ok(partner)
    }

    #[instrument(skip(self))]
    async fn add_partner_aliases(&self, partner_id: &str, aliases: &[String]) -> Result<(), AppError> {
        self.update_by_id(
            "add_partner_aliases",
            self.partners(),
            partner_id,
            Self::add_to_set("aliases", aliases),
        )
        .await
        .map(|_| ())
    }

    #[instrument(skip(self))]
    async fn add_partner_email_domains(
        &self,
        partner_id: &str,
        domains: &[String],
    ) -> Result<(), AppError> {
        self.update_by_id(
            "add_partner_email_domains",
            self.partners(),
            partner_id,
            Self::add_to_set("email_domains", domains),
        )
        .await
        .map(|_| ())
    }

    async fn get_owner_profile(&self, owner_id: &str) -> Result<Option<OwnerProfile>, AppError> {
        self.find_by_id("get_owner_profile", self.profiles(), owner_id)
            .await
    }

    async fn save_owner_profile(&self, profile: &OwnerProfile) -> Result<(), AppError> {
        self.upsert(
            "save_owner_profile",
            self.profiles(),
            &profile.owner_id,
            profile,
        )
        .await
    }

    async fn get_transaction(&self, id: &str) -> Result<Option<Transaction>, AppError> {
        self.find_by_id("get_transaction", self.transactions(), id)
            .await
    }

    #[instrument(skip(self, transaction), fields(transaction_id = %transaction.id))]
    async fn save_transaction(&self, transaction: &Transaction) -> Result<(), AppError> {
        self.upsert(
            "save_transaction",
            self.transactions(),
            &transaction.id,
            transaction,
        )
        .await
    }

    async fn get_transactions(&self, ids: &[String]) -> Result<Vec<Transaction>, AppError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.find_many(
            "get_transactions",
            self.transactions(),
            doc! { "_id": { "$in": ids.to_vec() } },
            None,
        )
        .await
    }

    async fn find_transactions_by_partner(
        &self,
        partner_id: &str,
    ) -> Result<Vec<Transaction>, AppError> {
        self.find_many(
            "find_transactions_by_partner",
            self.transactions(),
            doc! { "partner.partner_id": partner_id, "deleted": { "$ne": true } },
            None,
        )
        .await
    }

    #[instrument(skip(self, partner, previous))]
    async fn set_transaction_partner(
        &self,
        transaction_id: &str,
        partner: Option<&PartnerAssignment>,
        previous: Option<&PartnerAssignment>,
    ) -> Result<(), AppError> {
        let update = doc! {
            "$set": {
                "partner": to_bson(&partner)?,
                "previous_partner": to_bson(&previous)?,
                "updated_at": bson::DateTime::from_chrono(Utc::now()),
            }
        };
        self.update_by_id(
            "set_transaction_partner",
            self.transactions(),
            transaction_id,
            update,
        )
        .await
        .map(|_| ())
    }

    #[instrument(skip(self, assignment, previous), fields(partner_id = %assignment.partner_id))]
    async fn assign_transaction_partner(
        &self,
        transaction_id: &str,
        assignment: &PartnerAssignment,
        previous: Option<&PartnerAssignment>,
    ) -> Result<bool, AppError> {
        let mut set = doc! {
            "partner": to_bson(assignment)?,
            "updated_at": bson::DateTime::from_chrono(Utc::now()),
        };
        if let Some(previous) = previous {
            set.insert("previous_partner", to_bson(previous)?);
        }

        let start = Instant::now();
        let result = self
            .transactions()
            .update_one(
                doc! {
                    "_id": transaction_id,
                    "partner.matched_by": { "$nin": ["manual", "suggestion"] },
                },
                doc! { "$set": set },
                None,
            )
            .await
            .map_err(|e| db_error("assign_transaction_partner", e))?;
        record_store_operation("assign_transaction_partner", start.elapsed().as_secs_f64());
        Ok(result.matched_count > 0)
    }

    async fn transactions_in_window(
        &self,
        owner_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Transaction>, AppError> {
        let options = FindOptions::builder().sort(doc! { "date": 1, "_id": 1 }).build();
        self.find_many(
            "transactions_in_window",
            self.transactions(),
            doc! {
                "owner_id": owner_id,
                "deleted": { "$ne": true },
                "date": { "$gte": day(from), "$lte": day(to) },
            },
            Some(options),
        )
        .await
    }

    async fn recent_transactions(
        &self,
        owner_id: &str,
        limit: i64,
    ) -> Result<Vec<Transaction>, AppError> {
        let options = FindOptions::builder()
            .sort(doc! { "date": -1, "_id": 1 })
            .limit(limit)
            .build();
        self.find_many(
            "recent_transactions",
            self.transactions(),
            doc! { "owner_id": owner_id, "deleted": { "$ne": true } },
            Some(options),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn add_transaction_document(
        &self,
        transaction_id: &str,
        document_id: &str,
    ) -> Result<(), AppError> {
        self.update_by_id(
            "add_transaction_document",
            self.transactions(),
            transaction_id,
            Self::add_to_set("document_ids", &[document_id.to_string()]),
        )
        .await
        .map(|_| ())
    }

    #[instrument(skip(self))]
    async fn add_transaction_rejection(
        &self,
        transaction_id: &str,
        document_id: &str,
    ) -> Result<(), AppError> {
        self.update_by_id(
            "add_transaction_rejection",
            self.transactions(),
            transaction_id,
            Self::add_to_set("rejected_document_ids", &[document_id.to_string()]),
        )
        .await
        .map(|_| ())
    }

    #[instrument(skip(self, connection), fields(
        document_id = %connection.document_id,
        transaction_id = %connection.transaction_id,
    ))]
    async fn insert_connection_if_absent(&self, connection: &Connection) -> Result<bool, AppError> {
        let on_insert = bson::to_document(connection)
            .map_err(|e| db_error("Failed to serialize connection", e))?;

        let start = Instant::now();
        let result = self
            .connections()
            .update_one(
                doc! {
                    "document_id": &connection.document_id,
                    "transaction_id": &connection.transaction_id,
                },
                doc! { "$setOnInsert": on_insert },
                UpdateOptions::builder().upsert(true).build(),
            )
            .await
            .map_err(|e| db_error("insert_connection_if_absent", e))?;
        record_store_operation("insert_connection_if_absent", start.elapsed().as_secs_f64());
        Ok(result.upserted_id.is_some())
    }

    async fn health_check(&self) -> Result<(), AppError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| {
                tracing::error!("MongoDB health check failed: {}", e);
                AppError::from(e)
            })?;
        Ok(())
    }
}
