use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::domain::{ApplicationId, ApplicationStatus, StepName};
use super::report::ApplicationReport;

/// Typed events carried between the orchestrator and its observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusEvent {
    StatusUpdate {
        status: ApplicationStatus,
        detail: String,
    },
    StepRequest {
        step: StepName,
        attempt: u32,
    },
    StepResult {
        step: StepName,
        success: bool,
    },
    Error {
        step: Option<StepName>,
        reason: String,
        retryable: bool,
    },
    Audit {
        report: ApplicationReport,
    },
}

impl BusEvent {
    pub const fn kind(&self) -> &'static str {
        match self {
            BusEvent::StatusUpdate { .. } => "status_update",
            BusEvent::StepRequest { .. } => "step_request",
            BusEvent::StepResult { .. } => "step_result",
            BusEvent::Error { .. } => "error",
            BusEvent::Audit { .. } => "audit",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BusMessage {
    pub sequence: u64,
    pub application_id: ApplicationId,
    pub published_at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: BusEvent,
}

/// Read-only subscriber. Observers see messages but cannot influence orchestration.
pub trait BusObserver: Send + Sync {
    fn observe(&self, message: &BusMessage);
}

/// In-process message bus shared by every orchestrator instance.
///
/// Ordering is guaranteed per application only: each application is driven by a single
/// orchestration loop, which publishes sequentially. Logs of settled applications are kept up to
/// the retention limit, oldest evicted first; logs of unsettled applications are never evicted.
pub struct MessageBus {
    sequence: AtomicU64,
    log: Mutex<RetainedLog>,
    observers: RwLock<Vec<Arc<dyn BusObserver>>>,
    retention: usize,
}

#[derive(Default)]
struct RetainedLog {
    history: HashMap<ApplicationId, Vec<BusMessage>>,
    settled: VecDeque<ApplicationId>,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETAINED_APPLICATIONS)
    }
}

/// Settled application logs a default bus keeps before evicting the oldest.
pub const DEFAULT_RETAINED_APPLICATIONS: usize = 1024;

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention: usize) -> Self {
        Self {
            sequence: AtomicU64::new(0),
            log: Mutex::new(RetainedLog::default()),
            observers: RwLock::new(Vec::new()),
            retention,
        }
    }

    pub fn subscribe(&self, observer: Arc<dyn BusObserver>) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    pub fn publish(&self, application_id: &ApplicationId, event: BusEvent) -> BusMessage {
        let message = BusMessage {
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed) + 1,
            application_id: application_id.clone(),
            published_at: Utc::now(),
            event,
        };

        let settles = matches!(message.event, BusEvent::Audit { .. });
        {
            let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
            log.history
                .entry(application_id.clone())
                .or_default()
                .push(message.clone());
            if settles && !log.settled.contains(application_id) {
                log.settled.push_back(application_id.clone());
            }
            while log.settled.len() > self.retention {
                let Some(expired) = log.settled.pop_front() else {
                    break;
                };
                log.history.remove(&expired);
                debug!(application_id = %expired, "evicted settled message log");
            }
        }

        let observers = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for observer in observers {
            observer.observe(&message);
        }

        message
    }

    pub fn history(&self, application_id: &ApplicationId) -> Vec<BusMessage> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .history
            .get(application_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Drop the retained log of an application once it has been archived elsewhere.
    pub fn forget(&self, application_id: &ApplicationId) -> Vec<BusMessage> {
        let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        log.settled.retain(|settled| settled != application_id);
        log.history.remove(application_id).unwrap_or_default()
    }

    /// Number of applications whose logs are currently retained.
    pub fn retained(&self) -> usize {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .history
            .len()
    }
}

/// Mirrors bus traffic into the tracing subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl BusObserver for TracingObserver {
    fn observe(&self, message: &BusMessage) {
        let application_id = &message.application_id.0;
        match &message.event {
            BusEvent::StatusUpdate { status, detail } => {
                info!(%application_id, status = status.label(), %detail, "status update")
            }
            BusEvent::StepRequest { step, attempt } => {
                info!(%application_id, %step, attempt, "step requested")
            }
            BusEvent::StepResult { step, success } => {
                info!(%application_id, %step, success, "step result recorded")
            }
            BusEvent::Error {
                step,
                reason,
                retryable,
            } => {
                let step = step.as_ref().map(StepName::as_str).unwrap_or("-");
                warn!(%application_id, step, %reason, retryable, "step error")
            }
            BusEvent::Audit { report } => {
                info!(%application_id, summary = %report.summary(), "application settled")
            }
        }
    }
}
