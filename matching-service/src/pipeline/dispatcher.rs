//! Queue and bounded worker pool in front of the engine.

use super::events::PipelineEvent;
use super::MatchingEngine;
use crate::services::metrics::record_error;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use service_core::error::AppError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct PipelineDispatcher {
    event_tx: mpsc::Sender<PipelineEvent>,
    shutdown_token: CancellationToken,
    permits: Arc<Semaphore>,
}

impl PipelineDispatcher {
    /// Spawns the distributor task. At most `worker_count` events run at once.
    pub fn start(engine: MatchingEngine, worker_count: usize, queue_size: usize) -> Self {
        let (event_tx, mut event_rx) = mpsc::channel(queue_size.max(1));
        let shutdown_token = CancellationToken::new();
        let permits = Arc::new(Semaphore::new(worker_count.max(1)));

        let shutdown = shutdown_token.clone();
        let worker_permits = permits.clone();
        let follow_up_tx = event_tx.clone();
        tracing::info!(worker_count, queue_size, "Starting pipeline dispatcher");

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("Pipeline dispatcher shutting down");
                        break;
                    }
                    event = event_rx.recv() => match event {
                        Some(event) => event,
                        None => {
                            tracing::info!("Channel closed, pipeline dispatcher exiting");
                            break;
                        }
                    },
                };

                let permit = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    permit = worker_permits.clone().acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };

                let engine = engine.clone();
                let follow_up_tx = follow_up_tx.clone();
                tokio::spawn(async move {
                    let follow_ups = process_with_retry(&engine, &event).await;
                    drop(permit);
                    for follow_up in follow_ups {
                        // Overflow is left to the recovery sweep.
                        if let Err(e) = follow_up_tx.try_send(follow_up) {
                            tracing::warn!(error = %e, "Dropped follow-up event");
                            record_error("follow_up_dropped");
                        }
                    }
                });
            }
        });

        Self {
            event_tx,
            shutdown_token,
            permits,
        }
    }

    /// The worker pool's permits, for other work that must share its concurrency bound.
    pub fn permits(&self) -> Arc<Semaphore> {
        self.permits.clone()
    }

    pub fn enqueue(&self, event: PipelineEvent) -> Result<(), AppError> {
        self.event_tx.try_send(event).map_err(|e| {
            tracing::warn!(error = %e, "Pipeline queue rejected event");
            AppError::ServiceUnavailable
        })
    }

    pub fn enqueue_all(&self, events: Vec<PipelineEvent>) -> Result<(), AppError> {
        events.into_iter().try_for_each(|event| self.enqueue(event))
    }

    pub fn shutdown(&self) {
        tracing::info!("Initiating pipeline dispatcher shutdown");
        self.shutdown_token.cancel();
        self.permits.close();
    }
}

/// Retries transient store failures; anything else is logged and dropped.
async fn process_with_retry(engine: &MatchingEngine, event: &PipelineEvent) -> Vec<PipelineEvent> {
    let start = Instant::now();
    let backoff = ExponentialBackoff {
        max_elapsed_time: Some(Duration::from_secs(60)),
        ..Default::default()
    };

    let result = retry(backoff, || async {
        engine.handle(event).await.map_err(|e| {
            if e.is_transient() {
                tracing::warn!(event = event.kind(), error = %e, "Transient failure, retrying");
                backoff::Error::transient(e)
            } else {
                backoff::Error::permanent(e)
            }
        })
    })
    .await;

    match result {
        Ok(follow_ups) => {
            tracing::debug!(
                event = event.kind(),
                follow_ups = follow_ups.len(),
                duration_ms = start.elapsed().as_millis() as u64,
                "Pipeline event handled"
            );
            follow_ups
        }
        Err(e) => {
            tracing::error!(
                event = event.kind(),
                document_id = event.document_id().unwrap_or(""),
                error = %e,
                "Pipeline event failed after retries"
            );
            record_error("pipeline_event");
            Vec::new()
        }
    }
}
