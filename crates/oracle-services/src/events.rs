//! Dispatch events: a bounded log of what the dispatcher did.
//!
//! Every event is also emitted as a tracing event. The log keeps the most
//! recent `capacity` entries for diagnostics.

use std::collections::VecDeque;
use std::fmt;

use tokio::sync::Mutex;

use oracle_core::wire::{PeerId, WorkType};

use crate::peer::unix_now;

/// Default number of events kept.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchEvent {
    /// A request was written to a remote worker.
    WorkDistributed { work_type: WorkType, peer: PeerId, attempt: usize },
    RemoteFailure { work_type: WorkType, peer: PeerId, error: String },
    LocalFallback { work_type: WorkType, reason: String },
    WorkCompleted { work_type: WorkType, peer: PeerId, success: bool },
}

impl fmt::Display for DispatchEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchEvent::WorkDistributed { work_type, peer, attempt } => {
                write!(f, "{work_type} distributed to {} (attempt {attempt})", peer.short())
            }
            DispatchEvent::RemoteFailure { work_type, peer, error } => {
                write!(f, "{work_type} failed on {}: {error}", peer.short())
            }
            DispatchEvent::LocalFallback { work_type, reason } => {
                write!(f, "{work_type} falling back to local: {reason}")
            }
            DispatchEvent::WorkCompleted { work_type, peer, success } => {
                write!(f, "{work_type} completed by {} (success={success})", peer.short())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedEvent {
    pub at: u64,
    pub event: DispatchEvent,
}

pub struct EventLog {
    events: Mutex<VecDeque<LoggedEvent>>,
    capacity: usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_EVENT_CAPACITY))),
            capacity: capacity.max(1),
        }
    }

    pub async fn record(&self, event: DispatchEvent) {
        match &event {
            DispatchEvent::RemoteFailure { work_type, peer, error } => {
                tracing::warn!(%work_type, peer = %peer.short(), %error, "remote worker failed")
            }
            DispatchEvent::LocalFallback { work_type, reason } => {
                tracing::info!(%work_type, %reason, "falling back to local worker")
            }
            other => tracing::debug!(event = %other, "dispatch event"),
        }

        let mut events = self.events.lock().await;
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(LoggedEvent { at: unix_now(), event });
    }

    /// Up to `n` most recent events, oldest first.
    pub async fn recent(&self, n: usize) -> Vec<LoggedEvent> {
        let events = self.events.lock().await;
        let skip = events.len().saturating_sub(n);
        events.iter().skip(skip).cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.events.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.lock().await.is_empty()
    }
}
