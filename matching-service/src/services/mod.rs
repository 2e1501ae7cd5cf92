pub mod collaborators;
pub mod memory_store;
pub mod metrics;
pub mod mongo_store;
pub mod providers;
pub mod store;

pub use collaborators::{
    CollaboratorError, Collaborators, CompanyLookup, CompanyRecord, EntityReasoner, LookupHints,
    Notification, NotificationSink, VatRecord, VatRegistry, Verdict,
};
pub use memory_store::MemoryStore;
pub use metrics::{get_metrics, init_metrics};
pub use mongo_store::MongoStore;
pub use store::{StaleQuery, Store};
