//! Work dispatcher: routes one request to exactly one response.
//!
//! Remote candidates are tried one at a time, in eligibility order, up to
//! `max_remote_workers` attempts. The first successful response wins. If
//! none succeeds, the work runs locally when the node is eligible or when
//! no remote candidate existed at all. Each remote attempt is bounded by
//! `worker_response_timeout`; a local run by `worker_timeout`, after which
//! the handler is cancelled and its task aborted.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use oracle_core::config::{CandidateOrder, WorkerSettings};
use oracle_core::wire::{PeerId, WorkRequest, WorkResponse, WorkType, WorkerCategory};

use crate::eligibility::{eligible_ordered, Candidates};
use crate::events::{DispatchEvent, EventLog};
use crate::handlers::WorkHandlerRegistry;
use crate::peer::{unix_now, PeerRecord, PerformanceDelta};
use crate::registry::PeerRegistry;
use crate::transport::{Transport, TransportError};
use crate::worker_stream::send_request;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Terminal outcome of a dispatch or a local run. Rendered into
/// `WorkResponse.error` at the edge.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no eligible workers found")]
    NoEligibleWorkers,
    #[error("work handler not found")]
    HandlerNotFound(WorkType),
    #[error("work execution timed out")]
    Timeout,
    #[error("work handler crashed: {0}")]
    HandlerCrashed(String),
    #[error("All workers failed. Errors: {}", .0.join("; "))]
    AllWorkersFailed(Vec<String>),
}

/// Why one remote attempt failed.
#[derive(Debug, thiserror::Error)]
enum AttemptError {
    #[error("error opening stream: {0}")]
    Open(TransportError),
    #[error("{0}")]
    Stream(TransportError),
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
    #[error("{0}")]
    Rejected(String),
}

// ── Settings ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub worker_timeout: Duration,
    pub worker_response_timeout: Duration,
    pub max_remote_workers: usize,
    pub candidate_order: CandidateOrder,
    /// Full protocol id for the work stream.
    pub protocol: String,
}

impl DispatchSettings {
    pub fn from_config(workers: &WorkerSettings, protocol: impl Into<String>) -> Self {
        Self {
            worker_timeout: workers.worker_timeout(),
            worker_response_timeout: workers.worker_response_timeout(),
            max_remote_workers: workers.max_remote_workers,
            candidate_order: workers.candidate_order,
            protocol: protocol.into(),
        }
    }
}

// ── Local execution ───────────────────────────────────────────────────────────

/// Run `request` on this node's handler under `timeout`.
///
/// The handler runs on its own task. On timeout its cancellation token is
/// fired and the task aborted. Metrics are recorded for successful runs.
pub async fn execute_local(
    handlers: &WorkHandlerRegistry,
    request: &WorkRequest,
    timeout: Duration,
) -> Result<WorkResponse, DispatchError> {
    let work_type = request.work_type;
    let handler = handlers
        .get(work_type)
        .ok_or(DispatchError::HandlerNotFound(work_type))?;

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let data = request.data.clone();
    let started = Instant::now();
    let mut task = tokio::spawn(async move { handler.handle_work(&data, token).await });

    match tokio::time::timeout(timeout, &mut task).await {
        Ok(Ok(response)) => {
            if response.is_success() {
                handlers.record_success(work_type, started.elapsed()).await;
            }
            Ok(response)
        }
        Ok(Err(e)) => Err(DispatchError::HandlerCrashed(e.to_string())),
        Err(_) => {
            cancel.cancel();
            task.abort();
            tracing::warn!(%work_type, timeout_ms = timeout.as_millis() as u64, "local work timed out");
            Err(DispatchError::Timeout)
        }
    }
}

// ── Dispatcher ────────────────────────────────────────────────────────────────

pub struct Dispatcher {
    registry: PeerRegistry,
    handlers: Arc<WorkHandlerRegistry>,
    transport: Arc<dyn Transport>,
    settings: DispatchSettings,
    events: Arc<EventLog>,
}

impl Dispatcher {
    pub fn new(
        registry: PeerRegistry,
        handlers: Arc<WorkHandlerRegistry>,
        transport: Arc<dyn Transport>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            registry,
            handlers,
            transport,
            settings,
            events: Arc::new(EventLog::default()),
        }
    }

    pub fn events(&self) -> &Arc<EventLog> {
        &self.events
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    fn self_id(&self) -> &PeerId {
        self.registry.self_id()
    }

    /// Remote candidates and local eligibility for `work_type`.
    ///
    /// Work types without a category have no remote candidates; the local
    /// node is eligible when it has a handler.
    pub fn candidates(&self, work_type: WorkType) -> Candidates {
        match work_type.category() {
            Some(category) => eligible_ordered(
                &self.registry.snapshot(),
                self.self_id(),
                category,
                self.settings.candidate_order,
            ),
            None => Candidates {
                remote: Vec::new(),
                local_eligible: self.handlers.contains(work_type),
            },
        }
    }

    /// Dispatch and fold any terminal error into the response.
    pub async fn distribute_work(&self, request: WorkRequest) -> WorkResponse {
        match self.dispatch(&request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(
                    work_type = %request.work_type,
                    request_id = %request.request_id,
                    error = %e,
                    "dispatch failed"
                );
                WorkResponse::failed(e.to_string())
            }
        }
    }

    pub async fn dispatch(&self, request: &WorkRequest) -> Result<WorkResponse, DispatchError> {
        let work_type = request.work_type;
        let Candidates { remote, local_eligible } = self.candidates(work_type);
        let max = self.settings.max_remote_workers;
        let mut errors = Vec::new();

        tracing::info!(
            %work_type,
            request_id = %request.request_id,
            candidates = remote.len(),
            local_eligible,
            "dispatching work"
        );

        for (i, candidate) in remote.iter().take(max).enumerate() {
            let attempt = i + 1;
            tracing::info!(
                %work_type,
                peer = %candidate.peer_id.short(),
                attempt,
                max,
                "attempting remote worker"
            );
            match self.try_remote(candidate, request, attempt).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    let error = e.to_string();
                    self.events
                        .record(DispatchEvent::RemoteFailure {
                            work_type,
                            peer: candidate.peer_id.clone(),
                            error: error.clone(),
                        })
                        .await;
                    errors.push(format!("Worker {}: {}", candidate.peer_id, error));
                }
            }
        }
        if remote.len() > max {
            tracing::info!(%work_type, max, "reached maximum remote workers");
        }

        if local_eligible || remote.is_empty() {
            if !local_eligible && !self.handlers.contains(work_type) {
                return Err(DispatchError::NoEligibleWorkers);
            }
            let reason = if remote.is_empty() {
                "no remote workers available"
            } else {
                "all remote workers failed"
            };
            self.events
                .record(DispatchEvent::LocalFallback {
                    work_type,
                    reason: reason.to_string(),
                })
                .await;

            let result = execute_local(&self.handlers, request, self.settings.worker_timeout).await;
            let success = matches!(&result, Ok(r) if r.is_success());
            self.events
                .record(DispatchEvent::WorkCompleted {
                    work_type,
                    peer: self.self_id().clone(),
                    success,
                })
                .await;

            match result {
                Ok(mut response) if response.is_success() => {
                    response.worker_peer_id = Some(self.self_id().clone());
                    return Ok(response);
                }
                Ok(response) => errors.push(format!("Local worker: {}", response.error)),
                Err(DispatchError::HandlerNotFound(t)) if errors.is_empty() => {
                    return Err(DispatchError::HandlerNotFound(t));
                }
                Err(e) => errors.push(format!("Local worker: {e}")),
            }
        }

        if errors.is_empty() {
            Err(DispatchError::NoEligibleWorkers)
        } else {
            Err(DispatchError::AllWorkersFailed(errors))
        }
    }

    /// One remote attempt: open, send, read, under the response timeout.
    async fn try_remote(
        &self,
        candidate: &PeerRecord,
        request: &WorkRequest,
        attempt: usize,
    ) -> Result<WorkResponse, AttemptError> {
        let peer = &candidate.peer_id;
        let work_type = request.work_type;
        let deadline = self.settings.worker_response_timeout;

        let exchange = async {
            let stream = self
                .transport
                .open_stream(peer, &self.settings.protocol)
                .await
                .map_err(AttemptError::Open)?;
            self.events
                .record(DispatchEvent::WorkDistributed {
                    work_type,
                    peer: peer.clone(),
                    attempt,
                })
                .await;
            let response = send_request(stream, request).await.map_err(AttemptError::Stream)?;
            Ok::<_, AttemptError>(response)
        };

        let outcome = match tokio::time::timeout(deadline, exchange).await {
            Ok(Ok(response)) if response.is_success() => Ok(response),
            Ok(Ok(response)) => Err(AttemptError::Rejected(response.error)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(AttemptError::TimedOut(deadline)),
        };

        if let Some(category) = work_type.category() {
            self.record_outcome(peer, category, &outcome);
        }
        if outcome.is_ok() {
            self.events
                .record(DispatchEvent::WorkCompleted {
                    work_type,
                    peer: peer.clone(),
                    success: true,
                })
                .await;
        }
        outcome
    }

    fn record_outcome(
        &self,
        peer: &PeerId,
        category: WorkerCategory,
        outcome: &Result<WorkResponse, AttemptError>,
    ) {
        let now = unix_now();
        let delta = match outcome {
            Ok(_) => PerformanceDelta::returned(category, now),
            Err(AttemptError::Open(_)) => PerformanceDelta::not_found(category, now),
            Err(_) => PerformanceDelta::timed_out(category, now),
        };
        if let Err(e) = self.registry.update_performance_counters(peer, delta) {
            tracing::debug!(peer = %peer.short(), error = %e, "counter update skipped");
        }
    }
}
