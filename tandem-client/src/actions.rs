use crate::queue::{ActionOp, ActionQueue};
use chrono::Utc;
use std::sync::Arc;
use tandem_booking::{BookingEngine, RequestOutcome, RequestRideParams};
use tandem_core::{EngineError, EngineResult};
use tracing::info;

/// How a rider action resolved against the store.
#[derive(Debug)]
pub enum ActionOutcome<T> {
    /// Committed now.
    Applied(T),
    /// The store was unreachable; the action sits in the replay queue.
    /// `pending` is the queue depth, for surfacing in the UI.
    Queued { pending: usize },
}

impl<T> ActionOutcome<T> {
    pub fn is_queued(&self) -> bool {
        matches!(self, ActionOutcome::Queued { .. })
    }
}

/// Facade the client UI calls instead of the engine directly. Transient
/// store failures are absorbed into the action queue; domain rejections
/// propagate untouched and are never queued.
pub struct RiderActions {
    engine: Arc<BookingEngine>,
    queue: Arc<ActionQueue>,
}

impl RiderActions {
    pub fn new(engine: Arc<BookingEngine>, queue: Arc<ActionQueue>) -> Self {
        Self { engine, queue }
    }

    pub fn queue(&self) -> &ActionQueue {
        &self.queue
    }

    pub async fn request_ride(
        &self,
        params: RequestRideParams,
    ) -> EngineResult<ActionOutcome<RequestOutcome>> {
        match self.engine.request_ride(params.clone(), Utc::now()).await {
            Ok(outcome) => Ok(ActionOutcome::Applied(outcome)),
            Err(err) => {
                let engine = Arc::clone(&self.engine);
                let op: ActionOp = Box::new(move || {
                    let engine = Arc::clone(&engine);
                    let params = params.clone();
                    Box::pin(async move {
                        engine.request_ride(params, Utc::now()).await.map(|_| ())
                    })
                });
                self.absorb_or_propagate(err, "requestRide", op)
            }
        }
    }

    pub async fn cancel_request(&self, request_id: &str) -> EngineResult<ActionOutcome<bool>> {
        match self.engine.cancel_request(request_id).await {
            Ok(applied) => Ok(ActionOutcome::Applied(applied)),
            Err(err) => {
                let engine = Arc::clone(&self.engine);
                let request_id = request_id.to_string();
                let op: ActionOp = Box::new(move || {
                    let engine = Arc::clone(&engine);
                    let request_id = request_id.clone();
                    Box::pin(async move {
                        engine.cancel_request(&request_id).await.map(|_| ())
                    })
                });
                self.absorb_or_propagate(err, "cancelRequest", op)
            }
        }
    }

    pub async fn cancel_booking(&self, booking_id: &str) -> EngineResult<ActionOutcome<bool>> {
        match self.engine.cancel_booking(booking_id).await {
            Ok(applied) => Ok(ActionOutcome::Applied(applied)),
            Err(err) => {
                let engine = Arc::clone(&self.engine);
                let booking_id = booking_id.to_string();
                let op: ActionOp = Box::new(move || {
                    let engine = Arc::clone(&engine);
                    let booking_id = booking_id.clone();
                    Box::pin(async move {
                        engine.cancel_booking(&booking_id).await.map(|_| ())
                    })
                });
                self.absorb_or_propagate(err, "cancelBooking", op)
            }
        }
    }

    fn absorb_or_propagate<T>(
        &self,
        err: EngineError,
        label: &str,
        op: ActionOp,
    ) -> EngineResult<ActionOutcome<T>> {
        if !err.is_transient() {
            return Err(err);
        }
        self.queue.enqueue(label, op);
        let pending = self.queue.len();
        info!(action = label, pending, "store unreachable, action queued");
        Ok(ActionOutcome::Queued { pending })
    }
}
