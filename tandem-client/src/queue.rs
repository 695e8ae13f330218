use futures_util::future::BoxFuture;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

/// A replayable client action. Invoked once per replay pass, so it must be
/// `Fn` and capture everything it needs by value.
pub type ActionOp = Box<dyn Fn() -> BoxFuture<'static, tandem_core::EngineResult<()>> + Send + Sync>;

struct QueuedAction {
    id: String,
    label: String,
    attempts: u32,
    op: ActionOp,
}

/// What a replay pass did, by action label.
#[derive(Debug, Default)]
pub struct ReplayReport {
    /// False when another replay was already in flight and this call was a
    /// no-op.
    pub ran: bool,
    pub succeeded: Vec<String>,
    /// Transient failures put back for a later pass.
    pub requeued: Vec<String>,
    /// Dropped for good: domain errors, or transient failures out of
    /// attempts.
    pub failed: Vec<String>,
    pub pending: usize,
}

/// Queue of actions that failed against an unreachable store. Survives in
/// memory for the life of the client session; replay drains it serially in
/// arrival order.
pub struct ActionQueue {
    pending: Mutex<VecDeque<QueuedAction>>,
    replaying: AtomicBool,
    max_attempts: u32,
}

impl ActionQueue {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            replaying: AtomicBool::new(false),
            max_attempts,
        }
    }

    pub fn enqueue(&self, label: impl Into<String>, op: ActionOp) -> String {
        let action = QueuedAction {
            id: Uuid::new_v4().to_string(),
            label: label.into(),
            attempts: 0,
            op,
        };
        let id = action.id.clone();
        info!(action = %action.label, id = %id, "action queued for replay");
        self.lock().push_back(action);
        id
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Run every currently queued action once, in order. Reentrancy-safe: a
    /// call while another replay is in flight does nothing and reports
    /// `ran: false`.
    pub async fn replay(&self) -> ReplayReport {
        if self.replaying.swap(true, Ordering::SeqCst) {
            return ReplayReport {
                pending: self.len(),
                ..ReplayReport::default()
            };
        }
        let report = self.drain().await;
        self.replaying.store(false, Ordering::SeqCst);
        report
    }

    async fn drain(&self) -> ReplayReport {
        let mut report = ReplayReport {
            ran: true,
            ..ReplayReport::default()
        };

        // Snapshot the batch size so actions requeued by this pass are not
        // retried until the next one.
        let batch = self.len();
        for _ in 0..batch {
            let mut action = match self.lock().pop_front() {
                Some(action) => action,
                None => break,
            };
            match (action.op)().await {
                Ok(()) => {
                    info!(action = %action.label, "queued action replayed");
                    report.succeeded.push(action.label);
                }
                Err(err) if err.is_transient() => {
                    action.attempts += 1;
                    if action.attempts >= self.max_attempts {
                        warn!(
                            action = %action.label,
                            attempts = action.attempts,
                            "queued action out of attempts, dropping"
                        );
                        report.failed.push(action.label);
                    } else {
                        report.requeued.push(action.label.clone());
                        self.lock().push_back(action);
                    }
                }
                Err(err) => {
                    // The world moved while the action sat in the queue; a
                    // domain rejection is final.
                    warn!(action = %action.label, error = %err, "queued action rejected");
                    report.failed.push(action.label);
                }
            }
        }
        report.pending = self.len();
        report
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<QueuedAction>> {
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
