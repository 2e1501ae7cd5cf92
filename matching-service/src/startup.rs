//! Application startup and lifecycle management.

use crate::config::{CollaboratorConfig, EngineSettings, MatchingConfig, StoreBackend};
use crate::handlers;
use crate::pipeline::{MatchingEngine, PipelineDispatcher, RecoverySweep};
use crate::services::providers::{GenAiReasoningClient, HttpNotificationSink, HttpVatRegistry};
use crate::services::{init_metrics, Collaborators, MemoryStore, MongoStore, Store};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::request_id_middleware;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub engine: MatchingEngine,
    pub dispatcher: PipelineDispatcher,
    pub sweep: RecoverySweep,
}

impl AppState {
    /// Starts the dispatcher's worker pool over `engine`. Must run inside a Tokio runtime.
    pub fn new(engine: MatchingEngine, settings: &EngineSettings) -> Self {
        let dispatcher =
            PipelineDispatcher::start(engine.clone(), settings.worker_count, settings.queue_size);
        let sweep = RecoverySweep::new(
            engine.clone(),
            dispatcher.permits(),
            settings.staleness,
            settings.sweep_interval,
            settings.sweep_batch_size,
        );
        Self {
            engine,
            dispatcher,
            sweep,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_handler))
        .route(
            "/documents/:id/extraction",
            post(handlers::complete_extraction),
        )
        .route(
            "/documents/:id/extraction-failure",
            post(handlers::record_extraction_failure),
        )
        .route("/documents/:id/not-invoice", post(handlers::mark_not_invoice))
        .route("/documents/:id/deleted", post(handlers::deactivate_document))
        .route(
            "/documents/:id/partner",
            post(handlers::assign_document_partner),
        )
        .route(
            "/transactions/:id/partner",
            post(handlers::assign_transaction_partner),
        )
        .route(
            "/transactions/:id/rejections",
            post(handlers::reject_document),
        )
        .route("/partners/:id/updated", post(handlers::partner_updated))
        .route("/partners/:id/deleted", post(handlers::partner_deleted))
        .route("/recovery/sweep", post(handlers::run_sweep))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

async fn build_store(config: &MatchingConfig) -> Result<Arc<dyn Store>, AppError> {
    match config.store.backend {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store - data is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Mongo => {
            let uri = config.store.mongodb_uri.as_deref().ok_or_else(|| {
                AppError::ConfigError(anyhow::anyhow!("MONGODB_URI is not set"))
            })?;
            let store = MongoStore::connect(uri, &config.store.mongodb_database)
                .await
                .map_err(|e| {
                    tracing::error!(error = %e, "Failed to connect to MongoDB");
                    e
                })?;
            store.initialize_indexes().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to create MongoDB indexes");
                e
            })?;
            Ok(Arc::new(store))
        }
    }
}

/// HTTP clients where a URL is configured, mocks elsewhere.
fn build_collaborators(
    config: &CollaboratorConfig,
    settings: &EngineSettings,
) -> Result<Collaborators, AppError> {
    let timeout = settings.collaborator_timeout;
    let client_error =
        |e: crate::services::CollaboratorError| AppError::ConfigError(anyhow::anyhow!(e));
    let mut collaborators = Collaborators::mock(timeout, settings.collaborator_min_confidence);

    match &config.genai_url {
        Some(url) => {
            let genai = Arc::new(GenAiReasoningClient::new(url.as_str(), timeout).map_err(client_error)?);
            tracing::info!(endpoint = %url, "Using genai reasoning service");
            collaborators.lookup = genai.clone();
            collaborators.reasoner = genai;
        }
        None => tracing::info!("Genai URL not configured - lookups and reasoning are disabled"),
    }
    match &config.vat_registry_url {
        Some(url) => {
            collaborators.vat = Arc::new(HttpVatRegistry::new(url.as_str(), timeout).map_err(client_error)?);
            tracing::info!(endpoint = %url, "Using VAT registry");
        }
        None => tracing::info!("VAT registry URL not configured - registry checks are disabled"),
    }
    match &config.notification_url {
        Some(url) => {
            collaborators.notifier = Arc::new(HttpNotificationSink::new(url, timeout).map_err(client_error)?);
            tracing::info!(endpoint = %url, "Using notification service");
        }
        None => tracing::info!("Notification URL not configured - notifications are dropped"),
    }
    Ok(collaborators)
}

/// Application container for managing server lifecycle.
pub struct Application {
    http_port: u16,
    http_listener: TcpListener,
    state: AppState,
    periodic_sweep: bool,
}

impl Application {
    pub async fn build(config: MatchingConfig) -> Result<Self, AppError> {
        init_metrics();

        let store = build_store(&config).await?;
        let collaborators = build_collaborators(&config.collaborators, &config.engine)?;
        let engine = MatchingEngine::new(store, collaborators, config.engine.matching.clone());
        let state = AppState::new(engine, &config.engine);

        let http_addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let http_listener = TcpListener::bind(http_addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %http_addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let http_port = http_listener.local_addr()?.port();

        tracing::info!(http_port = http_port, "Matching service listener bound");

        Ok(Self {
            http_port,
            http_listener,
            state,
            periodic_sweep: !config.engine.sweep_interval.is_zero(),
        })
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn engine(&self) -> &MatchingEngine {
        &self.state.engine
    }

    /// Serves HTTP and runs the periodic sweep until the server stops.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let shutdown = CancellationToken::new();
        if self.periodic_sweep {
            tokio::spawn(self.state.sweep.clone().run(shutdown.clone()));
        }
        let dispatcher = self.state.dispatcher.clone();
        let http_router = router(self.state);

        tracing::info!(
            service = "matching-service",
            version = env!("CARGO_PKG_VERSION"),
            http_port = self.http_port,
            "Service ready to accept connections"
        );

        let result = axum::serve(self.http_listener, http_router).await;
        shutdown.cancel();
        dispatcher.shutdown();

        result.map_err(|e| {
            tracing::error!(error = %e, "HTTP server error");
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}
