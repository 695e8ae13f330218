use crate::model::{
    Booking, BookingStatus, Hold, HoldState, PickupPoint, RequestStatus, RideRequest,
    BOOKINGS_COLLECTION, HOLDS_COLLECTION, RIDE_REQUESTS_COLLECTION,
};
use crate::policy::AutoAcceptPolicy;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tandem_core::profile::{UserProfile, USERS_COLLECTION};
use tandem_core::{
    get_typed, DocRef, DocumentStore, EngineError, EngineResult, Notifier, Query, StoreError, TxFn,
};
use tandem_posts::{PostStatus, RidePost, RIDE_POSTS_COLLECTION};
use tandem_shared::geo::geodesic_distance_meters;
use tandem_shared::{Campus, Notification, NotificationKind};
use tandem_store::BookingRules;
use tracing::{info, warn};
use uuid::Uuid;

/// Parameters for `request_ride`.
#[derive(Debug, Clone)]
pub struct RequestRideParams {
    pub post_id: String,
    pub rider_id: String,
    pub destination_campus: Campus,
    pub pickup: PickupPoint,
    pub seats: u32,
    /// Overrides the rider's configured search radius for this call.
    pub radius_override_meters: Option<f64>,
}

impl RequestRideParams {
    pub fn new(
        post_id: impl Into<String>,
        rider_id: impl Into<String>,
        destination_campus: Campus,
        pickup: PickupPoint,
    ) -> Self {
        Self {
            post_id: post_id.into(),
            rider_id: rider_id.into(),
            destination_campus,
            pickup,
            seats: 1,
            radius_override_meters: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestOutcome {
    pub request_id: String,
    pub hold_id: String,
    pub booking_id: Option<String>,
    pub auto_accepted: bool,
}

/// The inventory & booking engine. Every operation is one atomic
/// transaction against the persistence gateway; seat counts change only
/// here, always alongside the dependent request/hold/booking mutation.
pub struct BookingEngine {
    store: Arc<dyn DocumentStore>,
    notifier: Arc<dyn Notifier>,
    rules: BookingRules,
    auto_accept: Arc<dyn AutoAcceptPolicy>,
}

fn to_doc<T: Serialize>(value: &T) -> Result<Value, EngineError> {
    serde_json::to_value(value).map_err(|e| StoreError::Serialization(e.to_string()).into())
}

fn post_ref(post_id: &str) -> DocRef {
    DocRef::new(RIDE_POSTS_COLLECTION, post_id)
}

fn request_ref(request_id: &str) -> DocRef {
    DocRef::new(RIDE_REQUESTS_COLLECTION, request_id)
}

fn hold_ref(hold_id: &str) -> DocRef {
    DocRef::new(HOLDS_COLLECTION, hold_id)
}

fn booking_ref(booking_id: &str) -> DocRef {
    DocRef::new(BOOKINGS_COLLECTION, booking_id)
}

impl BookingEngine {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        notifier: Arc<dyn Notifier>,
        rules: BookingRules,
        auto_accept: Arc<dyn AutoAcceptPolicy>,
    ) -> Self {
        Self {
            store,
            notifier,
            rules,
            auto_accept,
        }
    }

    /// Claim seats on a post: decrement inventory and create a pending
    /// request plus an active hold in one transaction. When the driver has
    /// auto-accept on and the policy admits the rider, the booking is
    /// confirmed inside the same commit, so no reader ever observes an
    /// intermediate pending state.
    pub async fn request_ride(
        &self,
        params: RequestRideParams,
        now: DateTime<Utc>,
    ) -> EngineResult<RequestOutcome> {
        self.cancel_other_pending(&params.rider_id, &params.destination_campus)
            .await?;

        let request_id = Uuid::new_v4().to_string();
        // The hold shares the request id (see `model::RideRequest`).
        let hold_id = request_id.clone();
        let booking_id = Uuid::new_v4().to_string();
        let ttl = Duration::from_std(self.rules.request_ttl())
            .unwrap_or_else(|_| Duration::minutes(10));
        let default_radius = self.rules.default_radius_meters;
        let policy = Arc::clone(&self.auto_accept);

        let op: TxFn = {
            let params = params.clone();
            let request_id = request_id.clone();
            let booking_id = booking_id.clone();
            Box::new(move |tx| {
                let params = params.clone();
                let request_id = request_id.clone();
                let booking_id = booking_id.clone();
                let policy = Arc::clone(&policy);
                Box::pin(async move {
                    let post_doc = post_ref(&params.post_id);
                    let post: RidePost = get_typed(tx, &post_doc)
                        .await?
                        .ok_or_else(|| EngineError::PostNotFound(params.post_id.clone()))?;
                    if post.status != PostStatus::Open {
                        return Err(EngineError::PostClosed(params.post_id.clone()));
                    }
                    if post.window_end < now {
                        return Err(EngineError::TimeWindowPast);
                    }

                    // Reads the decision depends on must all land before
                    // the first write; the store rejects reads afterwards.
                    let rider: UserProfile =
                        get_typed(tx, &DocRef::new(USERS_COLLECTION, &params.rider_id))
                            .await?
                            .unwrap_or_default();
                    let driver: UserProfile =
                        get_typed(tx, &DocRef::new(USERS_COLLECTION, &post.driver_id))
                            .await?
                            .unwrap_or_default();

                    if post.seats_available < params.seats {
                        return Err(EngineError::NoSeats);
                    }

                    let radius_meters = params
                        .radius_override_meters
                        .or_else(|| rider.matching.as_ref().map(|m| m.radius_meters))
                        .unwrap_or(default_radius);
                    let distance_meters =
                        geodesic_distance_meters(params.pickup.point(), post.origin.point());
                    if distance_meters > radius_meters {
                        return Err(EngineError::OutOfRadius {
                            distance_meters,
                            radius_meters,
                        });
                    }

                    let auto_accepted = driver.settings.auto_accept
                        && policy.admits(&params.rider_id, &rider.stats).await;

                    let expires_at = now + ttl;
                    tx.update(
                        &post_doc,
                        json!({
                            "seatsAvailable": post.seats_available - params.seats,
                            "updatedAt": now.timestamp_millis(),
                        }),
                    );

                    let request = RideRequest {
                        post_id: params.post_id.clone(),
                        rider_id: params.rider_id.clone(),
                        destination_campus: params.destination_campus.clone(),
                        pickup: params.pickup.clone(),
                        status: RequestStatus::Pending,
                        auto_accepted: false,
                        booking_id: None,
                        created_at: now,
                        expires_at,
                    };
                    tx.set(&request_ref(&request_id), to_doc(&request)?);

                    let hold = Hold {
                        post_id: params.post_id.clone(),
                        request_id: request_id.clone(),
                        rider_id: params.rider_id.clone(),
                        seats: params.seats,
                        state: HoldState::Active,
                        created_at: now,
                        expires_at,
                    };
                    tx.set(&hold_ref(&request_id), to_doc(&hold)?);

                    if auto_accepted {
                        let booking = Booking {
                            post_id: params.post_id.clone(),
                            rider_id: params.rider_id.clone(),
                            driver_id: post.driver_id.clone(),
                            seats: params.seats,
                            pickup: params.pickup.clone(),
                            status: BookingStatus::Confirmed,
                            created_at: now,
                            completed_at: None,
                            request_id: request_id.clone(),
                        };
                        tx.set(&booking_ref(&booking_id), to_doc(&booking)?);
                        tx.update(
                            &request_ref(&request_id),
                            json!({
                                "status": RequestStatus::Booked,
                                "autoAccepted": true,
                                "bookingId": booking_id,
                            }),
                        );
                        tx.update(&hold_ref(&request_id), json!({"state": HoldState::Consumed}));
                    }

                    Ok(json!({
                        "autoAccepted": auto_accepted,
                        "driverId": post.driver_id,
                    }))
                })
            })
        };

        let outcome = self.store.transaction(op).await?;
        let auto_accepted = outcome["autoAccepted"].as_bool().unwrap_or(false);
        let driver_id = outcome["driverId"].as_str().unwrap_or_default().to_string();

        info!(
            request_id = %request_id,
            post_id = %params.post_id,
            auto_accepted,
            "ride requested"
        );

        self.notifier
            .emit(Notification::new(
                driver_id.clone(),
                NotificationKind::RequestCreated,
                json!({"postId": params.post_id, "requestId": request_id}),
            ))
            .await;
        if auto_accepted {
            let data = json!({"postId": params.post_id, "bookingId": booking_id});
            self.notifier
                .emit(Notification::new(
                    params.rider_id.clone(),
                    NotificationKind::BookingConfirmed,
                    data.clone(),
                ))
                .await;
            self.notifier
                .emit(Notification::new(
                    driver_id,
                    NotificationKind::BookingConfirmed,
                    data,
                ))
                .await;
        }

        Ok(RequestOutcome {
            hold_id,
            booking_id: auto_accepted.then_some(booking_id),
            auto_accepted,
            request_id,
        })
    }

    /// One-active rule: a rider holds at most one pending request per
    /// destination campus, so any prior pending claim is canceled (each in
    /// its own seat-restoring transaction) before the new one begins.
    /// Best-effort by design: two racing `request_ride` calls can slip
    /// through this window, a known consistency gap.
    async fn cancel_other_pending(&self, rider_id: &str, campus: &Campus) -> EngineResult<()> {
        let query = Query::collection(RIDE_REQUESTS_COLLECTION)
            .where_eq("riderId", rider_id)
            .where_eq("destinationCampus", campus.as_str())
            .where_eq("status", RequestStatus::Pending.as_str());
        let pending = match self.store.run_query(&query).await {
            Ok(pending) => pending,
            Err(StoreError::Unavailable) => return Err(StoreError::Unavailable.into()),
            Err(err) => {
                warn!(error = %err, "one-active scan failed, continuing");
                return Ok(());
            }
        };
        for doc in pending {
            if let Err(err) = self.cancel_request(&doc.id).await {
                warn!(request_id = %doc.id, error = %err, "one-active cancel failed");
            }
        }
        Ok(())
    }

    /// Accept a pending request: booking confirmed, request booked, hold
    /// consumed. Idempotent no-op when the request is past pending.
    pub async fn accept_request(&self, request_id: &str) -> EngineResult<Option<String>> {
        let booking_id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let op: TxFn = {
            let request_id = request_id.to_string();
            let booking_id = booking_id.clone();
            Box::new(move |tx| {
                let request_id = request_id.clone();
                let booking_id = booking_id.clone();
                Box::pin(async move {
                    let req_doc = request_ref(&request_id);
                    let request: RideRequest = get_typed(tx, &req_doc)
                        .await?
                        .ok_or_else(|| EngineError::RequestNotFound(request_id.clone()))?;
                    if !request.status.can_transition_to(RequestStatus::Booked) {
                        return Ok(json!({"applied": false}));
                    }

                    let post: RidePost = get_typed(tx, &post_ref(&request.post_id))
                        .await?
                        .ok_or_else(|| EngineError::PostNotFound(request.post_id.clone()))?;
                    let hold: Option<Hold> = get_typed(tx, &hold_ref(&request_id)).await?;
                    let seats = hold.as_ref().map(|h| h.seats).unwrap_or(1);

                    let booking = Booking {
                        post_id: request.post_id.clone(),
                        rider_id: request.rider_id.clone(),
                        driver_id: post.driver_id.clone(),
                        seats,
                        pickup: request.pickup.clone(),
                        status: BookingStatus::Confirmed,
                        created_at: now,
                        completed_at: None,
                        request_id: request_id.clone(),
                    };
                    tx.set(&booking_ref(&booking_id), to_doc(&booking)?);
                    tx.update(
                        &req_doc,
                        json!({"status": RequestStatus::Booked, "bookingId": booking_id}),
                    );
                    if hold.is_some() {
                        tx.update(&hold_ref(&request_id), json!({"state": HoldState::Consumed}));
                    }
                    Ok(json!({
                        "applied": true,
                        "riderId": request.rider_id,
                        "postId": request.post_id,
                    }))
                })
            })
        };

        let outcome = self.store.transaction(op).await?;
        if !outcome["applied"].as_bool().unwrap_or(false) {
            return Ok(None);
        }
        info!(request_id, booking_id = %booking_id, "request accepted");
        self.notifier
            .emit(Notification::new(
                outcome["riderId"].as_str().unwrap_or_default(),
                NotificationKind::BookingConfirmed,
                json!({"postId": outcome["postId"], "bookingId": booking_id}),
            ))
            .await;
        Ok(Some(booking_id))
    }

    /// Decline a pending request: seat restored, request declined, hold
    /// released. Idempotent no-op when the request is past pending.
    pub async fn decline_request(&self, request_id: &str) -> EngineResult<bool> {
        let now = Utc::now();
        let op = Self::release_request_op(request_id.to_string(), RequestStatus::Declined, now);
        let outcome = self.store.transaction(op).await?;
        if !outcome["applied"].as_bool().unwrap_or(false) {
            return Ok(false);
        }
        info!(request_id, "request declined");
        self.notifier
            .emit(Notification::new(
                outcome["riderId"].as_str().unwrap_or_default(),
                NotificationKind::RequestDeclined,
                json!({"postId": outcome["postId"], "requestId": request_id}),
            ))
            .await;
        Ok(true)
    }

    /// Rider-initiated cancellation of a pending request. Restores exactly
    /// the held seats and notifies the driver.
    pub async fn cancel_request(&self, request_id: &str) -> EngineResult<bool> {
        let now = Utc::now();
        let op = Self::release_request_op(request_id.to_string(), RequestStatus::Canceled, now);
        let outcome = self.store.transaction(op).await?;
        if !outcome["applied"].as_bool().unwrap_or(false) {
            return Ok(false);
        }
        info!(request_id, "request canceled by rider");
        if let Some(driver_id) = outcome["driverId"].as_str() {
            self.notifier
                .emit(Notification::new(
                    driver_id,
                    NotificationKind::RiderCanceledRequest,
                    json!({"postId": outcome["postId"], "requestId": request_id}),
                ))
                .await;
        }
        Ok(true)
    }

    /// Reclaim a pending request past its TTL. No-op before `expiresAt`;
    /// afterwards the seat is restored and the rider notified. Invoked by
    /// an external sweeper or lazily by readers.
    pub async fn expire_request_if_needed(
        &self,
        request_id: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<bool> {
        let op: TxFn = {
            let request_id = request_id.to_string();
            Box::new(move |tx| {
                let request_id = request_id.clone();
                Box::pin(async move {
                    match release_request(tx, &request_id, RequestStatus::Expired, now, Some(now))
                        .await?
                    {
                        Some(released) => Ok(released),
                        None => Ok(json!({"applied": false})),
                    }
                })
            })
        };
        let outcome = self.store.transaction(op).await?;
        if !outcome["applied"].as_bool().unwrap_or(false) {
            return Ok(false);
        }
        info!(request_id, "pending request expired");
        self.notifier
            .emit(Notification::new(
                outcome["riderId"].as_str().unwrap_or_default(),
                NotificationKind::RequestExpired,
                json!({"postId": outcome["postId"], "requestId": request_id}),
            ))
            .await;
        Ok(true)
    }

    /// Apply `expire_request_if_needed` across candidate requests,
    /// returning how many expired. The periodic driver of this sweep is a
    /// collaborator's concern.
    pub async fn sweep_pending_requests(
        &self,
        request_ids: &[String],
        now: DateTime<Utc>,
    ) -> EngineResult<usize> {
        let mut expired = 0;
        for request_id in request_ids {
            if self.expire_request_if_needed(request_id, now).await? {
                expired += 1;
            }
        }
        Ok(expired)
    }

    /// Rider-initiated cancellation of a confirmed booking: restores the
    /// booked seats and notifies the driver. Idempotent on wrong state.
    pub async fn cancel_booking(&self, booking_id: &str) -> EngineResult<bool> {
        let now = Utc::now();
        let op: TxFn = {
            let booking_id = booking_id.to_string();
            Box::new(move |tx| {
                let booking_id = booking_id.clone();
                Box::pin(async move {
                    let booking_doc = booking_ref(&booking_id);
                    let booking: Option<Booking> = get_typed(tx, &booking_doc).await?;
                    let booking = match booking {
                        Some(b) if b.status.can_transition_to(BookingStatus::Canceled) => b,
                        _ => return Ok(json!({"applied": false})),
                    };

                    let post_doc = post_ref(&booking.post_id);
                    let post: Option<RidePost> = get_typed(tx, &post_doc).await?;
                    if let Some(post) = post {
                        tx.update(
                            &post_doc,
                            json!({
                                "seatsAvailable": post.seats_available + booking.seats,
                                "updatedAt": now.timestamp_millis(),
                            }),
                        );
                    }
                    tx.update(&booking_doc, json!({"status": BookingStatus::Canceled}));
                    Ok(json!({
                        "applied": true,
                        "driverId": booking.driver_id,
                        "postId": booking.post_id,
                    }))
                })
            })
        };
        let outcome = self.store.transaction(op).await?;
        if !outcome["applied"].as_bool().unwrap_or(false) {
            return Ok(false);
        }
        info!(booking_id, "booking canceled by rider");
        self.notifier
            .emit(Notification::new(
                outcome["driverId"].as_str().unwrap_or_default(),
                NotificationKind::RiderCanceledBooking,
                json!({"postId": outcome["postId"], "bookingId": booking_id}),
            ))
            .await;
        Ok(true)
    }

    /// Mark a confirmed booking completed. Terminal, no seat side effect.
    pub async fn complete_booking(&self, booking_id: &str) -> EngineResult<bool> {
        let now = Utc::now();
        let op: TxFn = {
            let booking_id = booking_id.to_string();
            Box::new(move |tx| {
                let booking_id = booking_id.clone();
                Box::pin(async move {
                    let booking_doc = booking_ref(&booking_id);
                    let booking: Booking = get_typed(tx, &booking_doc)
                        .await?
                        .ok_or_else(|| EngineError::BookingNotFound(booking_id.clone()))?;
                    if !booking.status.can_transition_to(BookingStatus::Completed) {
                        return Ok(json!({"applied": false}));
                    }
                    tx.update(
                        &booking_doc,
                        json!({
                            "status": BookingStatus::Completed,
                            "completedAt": now.timestamp_millis(),
                        }),
                    );
                    Ok(json!({"applied": true}))
                })
            })
        };
        let outcome = self.store.transaction(op).await?;
        let applied = outcome["applied"].as_bool().unwrap_or(false);
        if applied {
            info!(booking_id, "booking completed");
        }
        Ok(applied)
    }

    /// Privileged cancellation of a whole post: central-table transition
    /// to canceled, then notify every rider holding a pending request or
    /// confirmed booking against it.
    pub async fn cancel_post(&self, post_id: &str) -> EngineResult<()> {
        let now = Utc::now();
        let op: TxFn = {
            let post_id = post_id.to_string();
            Box::new(move |tx| {
                let post_id = post_id.clone();
                Box::pin(async move {
                    let post_doc = post_ref(&post_id);
                    let post: RidePost = get_typed(tx, &post_doc)
                        .await?
                        .ok_or_else(|| EngineError::PostNotFound(post_id.clone()))?;
                    if !post.status.can_transition_to(PostStatus::Canceled) {
                        return Err(EngineError::InvalidTransition {
                            from: post.status.as_str().to_string(),
                            to: PostStatus::Canceled.as_str().to_string(),
                        });
                    }
                    tx.update(
                        &post_doc,
                        json!({
                            "status": PostStatus::Canceled,
                            "updatedAt": now.timestamp_millis(),
                        }),
                    );
                    Ok(Value::Null)
                })
            })
        };
        self.store.transaction(op).await?;
        info!(post_id, "ride post canceled");

        let mut rider_ids = Vec::new();
        let pending = self
            .store
            .run_query(
                &Query::collection(RIDE_REQUESTS_COLLECTION)
                    .where_eq("postId", post_id)
                    .where_eq("status", RequestStatus::Pending.as_str()),
            )
            .await?;
        for doc in pending {
            if let Some(rider_id) = doc.data["riderId"].as_str() {
                rider_ids.push(rider_id.to_string());
            }
        }
        let booked = self
            .store
            .run_query(
                &Query::collection(BOOKINGS_COLLECTION)
                    .where_eq("postId", post_id)
                    .where_eq("status", "confirmed"),
            )
            .await?;
        for doc in booked {
            if let Some(rider_id) = doc.data["riderId"].as_str() {
                rider_ids.push(rider_id.to_string());
            }
        }
        rider_ids.sort();
        rider_ids.dedup();

        for rider_id in rider_ids {
            self.notifier
                .emit(Notification::new(
                    rider_id,
                    NotificationKind::PostCanceled,
                    json!({"postId": post_id}),
                ))
                .await;
        }
        Ok(())
    }

    fn release_request_op(request_id: String, terminal: RequestStatus, now: DateTime<Utc>) -> TxFn {
        Box::new(move |tx| {
            let request_id = request_id.clone();
            Box::pin(async move {
                match release_request(tx, &request_id, terminal, now, None).await? {
                    Some(released) => Ok(released),
                    None => Ok(json!({"applied": false})),
                }
            })
        })
    }
}

/// Shared release path for decline/cancel/expire: restores the held seats
/// to the post, moves the request to its terminal status and releases the
/// hold. Returns `None` when the transition table does not permit the
/// request's current status to reach `terminal`; the legacy accepted
/// status can still be declined but not canceled or expired.
async fn release_request(
    tx: &mut dyn tandem_core::TxHandle,
    request_id: &str,
    terminal: RequestStatus,
    now: DateTime<Utc>,
    only_if_expired_by: Option<DateTime<Utc>>,
) -> EngineResult<Option<Value>> {
    let req_doc = request_ref(request_id);
    let request: Option<RideRequest> = get_typed(tx, &req_doc).await?;
    let request = match request {
        Some(r) if r.status.can_transition_to(terminal) => r,
        _ => return Ok(None),
    };
    if let Some(deadline) = only_if_expired_by {
        if request.expires_at > deadline {
            return Ok(None);
        }
    }

    let hold: Option<Hold> = get_typed(tx, &hold_ref(request_id)).await?;
    let seats = hold.as_ref().map(|h| h.seats).unwrap_or(1);

    let post_doc = post_ref(&request.post_id);
    let post: Option<RidePost> = get_typed(tx, &post_doc).await?;
    let driver_id = post.as_ref().map(|p| p.driver_id.clone());
    if let Some(post) = post {
        tx.update(
            &post_doc,
            json!({
                "seatsAvailable": post.seats_available + seats,
                "updatedAt": now.timestamp_millis(),
            }),
        );
    }

    tx.update(&req_doc, json!({"status": terminal}));
    if hold.is_some() {
        tx.update(&hold_ref(request_id), json!({"state": HoldState::Released}));
    }

    Ok(Some(json!({
        "applied": true,
        "postId": request.post_id,
        "riderId": request.rider_id,
        "driverId": driver_id,
    })))
}
