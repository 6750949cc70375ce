//! Work handlers: the pluggable code that actually performs work.
//!
//! The registry maps each `WorkType` to one handler and keeps call
//! metrics for successful local runs. Concrete scrapers live outside this
//! crate; only the echo handler for `test` ships here.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use oracle_core::wire::{Capabilities, WorkPayload, WorkResponse, WorkType};

/// Executes one kind of work.
///
/// `cancel` fires when the dispatcher gives up on the run. Long-running
/// handlers should select on it and return early.
#[async_trait]
pub trait WorkHandler: Send + Sync {
    async fn handle_work(&self, data: &[u8], cancel: CancellationToken) -> WorkResponse;
}

/// Successful-run metrics for one work type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandlerMetrics {
    pub call_count: u64,
    pub total_runtime: Duration,
}

/// One handler per `WorkType`, plus metrics under a single lock.
pub struct WorkHandlerRegistry {
    handlers: HashMap<WorkType, Arc<dyn WorkHandler>>,
    metrics: Mutex<HashMap<WorkType, HandlerMetrics>>,
}

impl Default for WorkHandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkHandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            metrics: Mutex::new(HashMap::new()),
        }
    }

    /// Register `handler` for `work_type`, replacing any previous one.
    pub fn register(&mut self, work_type: WorkType, handler: Arc<dyn WorkHandler>) {
        tracing::debug!(%work_type, "work handler registered");
        self.handlers.insert(work_type, handler);
    }

    /// Register only if the node was configured with the work type's
    /// category. Work types without a category are always accepted.
    pub fn register_if_capable(
        &mut self,
        capabilities: &Capabilities,
        work_type: WorkType,
        handler: Arc<dyn WorkHandler>,
    ) -> bool {
        match work_type.category() {
            Some(category) if !capabilities.supports(category) => {
                tracing::debug!(%work_type, %category, "handler skipped, capability disabled");
                false
            }
            _ => {
                self.register(work_type, handler);
                true
            }
        }
    }

    pub fn get(&self, work_type: WorkType) -> Option<Arc<dyn WorkHandler>> {
        self.handlers.get(&work_type).cloned()
    }

    pub fn contains(&self, work_type: WorkType) -> bool {
        self.handlers.contains_key(&work_type)
    }

    pub fn work_types(&self) -> Vec<WorkType> {
        self.handlers.keys().copied().collect()
    }

    /// Record one successful local run.
    pub async fn record_success(&self, work_type: WorkType, runtime: Duration) {
        let mut metrics = self.metrics.lock().await;
        let entry = metrics.entry(work_type).or_default();
        entry.call_count += 1;
        entry.total_runtime += runtime;
    }

    pub async fn metrics(&self, work_type: WorkType) -> HandlerMetrics {
        self.metrics
            .lock()
            .await
            .get(&work_type)
            .copied()
            .unwrap_or_default()
    }
}

// ── Built-in handlers ─────────────────────────────────────────────────────────

/// Echo handler for `test` work. Used by the devnet probe.
pub struct TestHandler;

#[async_trait]
impl WorkHandler for TestHandler {
    async fn handle_work(&self, data: &[u8], _cancel: CancellationToken) -> WorkResponse {
        match WorkPayload::decode(WorkType::Test, data) {
            Ok(WorkPayload::Test(msg)) => {
                WorkResponse::ok(serde_json::json!({ "message": msg.message })).with_record_count(1)
            }
            Ok(other) => WorkResponse::failed(format!("unexpected payload for test: {:?}", other.work_type())),
            Err(e) => WorkResponse::failed(e.to_string()),
        }
    }
}

/// Adapts a plain function into a handler. The function runs inline and
/// cannot observe cancellation.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F> WorkHandler for FnHandler<F>
where
    F: Fn(&[u8]) -> WorkResponse + Send + Sync,
{
    async fn handle_work(&self, data: &[u8], _cancel: CancellationToken) -> WorkResponse {
        (self.0)(data)
    }
}
