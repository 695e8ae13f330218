use chrono::{Duration, Utc};
use serde_json::json;
use std::sync::Arc;
use tandem_booking::{
    BookingEngine, BookingStatus, HoldState, NoShowLimitPolicy, PickupPoint, RequestOutcome,
    RequestRideParams, RequestStatus,
};
use tandem_core::profile::USERS_COLLECTION;
use tandem_core::{DocRef, DocumentStore};
use tandem_posts::{CreatePostInput, OriginPrecision, PostRepository, PostStatus};
use tandem_shared::{Campus, NotificationKind};
use tandem_store::{BookingRules, MemoryStore, RecordingNotifier};

struct Fixture {
    store: Arc<MemoryStore>,
    notifier: Arc<RecordingNotifier>,
    engine: BookingEngine,
    posts: PostRepository,
}

fn fixture() -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let rules = BookingRules::default();
    let engine = BookingEngine::new(
        store.clone(),
        notifier.clone(),
        rules.clone(),
        Arc::new(NoShowLimitPolicy::new(rules.auto_accept_no_show_limit)),
    );
    let posts = PostRepository::new(store.clone());
    Fixture {
        store,
        notifier,
        engine,
        posts,
    }
}

fn post_input(seats: u32) -> CreatePostInput {
    let now = Utc::now();
    CreatePostInput {
        driver_id: "driver-1".into(),
        origin_lat: 49.2488,
        origin_lng: -122.9805,
        origin_label: "Metrotown".into(),
        origin_precision: OriginPrecision::Exact,
        destination_campus: Campus::new("Burnaby"),
        seats_total: seats,
        seats_available: None,
        window_start: now + Duration::minutes(30),
        window_end: now + Duration::minutes(90),
    }
}

fn pickup() -> PickupPoint {
    PickupPoint {
        lat: 49.2478,
        lng: -122.9795,
        label: "Bus loop".into(),
        is_approx: false,
    }
}

fn params(post_id: &str, rider_id: &str) -> RequestRideParams {
    RequestRideParams::new(post_id, rider_id, Campus::new("Burnaby"), pickup())
}

async fn seed_driver(store: &MemoryStore, driver_id: &str, auto_accept: bool) {
    store
        .put(
            &DocRef::new(USERS_COLLECTION, driver_id),
            json!({"settings": {"autoAccept": auto_accept}}),
        )
        .await
        .unwrap();
}

async fn request(fx: &Fixture, post_id: &str, rider_id: &str) -> RequestOutcome {
    fx.engine
        .request_ride(params(post_id, rider_id), Utc::now())
        .await
        .unwrap()
}

async fn seats_available(posts: &PostRepository, post_id: &str) -> u32 {
    posts.get_post(post_id).await.unwrap().seats_available
}

#[tokio::test]
async fn test_request_decrements_exactly_the_requested_seats() {
    let fx = fixture();
    let post_id = fx.posts.create_post(post_input(3)).await.unwrap();

    let outcome = request(&fx, &post_id, "rider-1").await;
    assert!(!outcome.auto_accepted);
    assert!(outcome.booking_id.is_none());
    assert_eq!(seats_available(&fx.posts, &post_id).await, 2);

    let req: tandem_booking::RideRequest = fx
        .store
        .fetch(&DocRef::new("rideRequests", &outcome.request_id))
        .await
        .unwrap()
        .unwrap()
        .deserialize()
        .unwrap();
    assert_eq!(req.status, RequestStatus::Pending);
    assert!(req.booking_id.is_none());

    let hold: tandem_booking::Hold = fx
        .store
        .fetch(&DocRef::new("holds", &outcome.hold_id))
        .await
        .unwrap()
        .unwrap()
        .deserialize()
        .unwrap();
    assert_eq!(hold.state, HoldState::Active);
    assert_eq!(hold.seats, 1);
}

#[tokio::test]
async fn test_domain_errors_leave_seats_unchanged() {
    let fx = fixture();
    let post_id = fx.posts.create_post(post_input(1)).await.unwrap();

    // Out of radius: pickup ~55km north.
    let mut far = params(&post_id, "rider-1");
    far.pickup.lat = 49.7488;
    let err = fx.engine.request_ride(far, Utc::now()).await.unwrap_err();
    assert_eq!(err.code(), "OUT_OF_RADIUS");
    assert_eq!(seats_available(&fx.posts, &post_id).await, 1);

    // Unknown post.
    let err = fx
        .engine
        .request_ride(params("ghost", "rider-1"), Utc::now())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "POST_NOT_FOUND");

    // Window already past.
    let err = fx
        .engine
        .request_ride(
            params(&post_id, "rider-1"),
            Utc::now() + Duration::minutes(120),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "TIME_WINDOW_PAST");
    assert_eq!(seats_available(&fx.posts, &post_id).await, 1);
}

#[tokio::test]
async fn test_closed_post_rejects_requests() {
    let fx = fixture();
    let post_id = fx.posts.create_post(post_input(2)).await.unwrap();
    fx.posts
        .transition_status(&post_id, PostStatus::InTrip)
        .await
        .unwrap();
    let err = fx
        .engine
        .request_ride(params(&post_id, "rider-1"), Utc::now())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "POST_CLOSED");
}

#[tokio::test]
async fn test_no_seats_when_post_is_full() {
    let fx = fixture();
    let post_id = fx.posts.create_post(post_input(1)).await.unwrap();
    request(&fx, &post_id, "rider-1").await;

    let err = fx
        .engine
        .request_ride(params(&post_id, "rider-2"), Utc::now())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NO_SEATS");
    assert_eq!(seats_available(&fx.posts, &post_id).await, 0);
}

#[tokio::test]
async fn test_one_active_rule_cancels_prior_pending_request() {
    let fx = fixture();
    let post_a = fx.posts.create_post(post_input(2)).await.unwrap();
    let post_b = fx.posts.create_post(post_input(2)).await.unwrap();

    let first = request(&fx, &post_a, "rider-1").await;
    // Same campus, different casing: still one-active.
    let mut second_params = params(&post_b, "rider-1");
    second_params.destination_campus = Campus::new("BURNABY");
    let second = fx
        .engine
        .request_ride(second_params, Utc::now())
        .await
        .unwrap();

    let first_req: tandem_booking::RideRequest = fx
        .store
        .fetch(&DocRef::new("rideRequests", &first.request_id))
        .await
        .unwrap()
        .unwrap()
        .deserialize()
        .unwrap();
    assert_eq!(first_req.status, RequestStatus::Canceled);
    // Seat restored on post A, consumed on post B.
    assert_eq!(seats_available(&fx.posts, &post_a).await, 2);
    assert_eq!(seats_available(&fx.posts, &post_b).await, 1);

    let second_req: tandem_booking::RideRequest = fx
        .store
        .fetch(&DocRef::new("rideRequests", &second.request_id))
        .await
        .unwrap()
        .unwrap()
        .deserialize()
        .unwrap();
    assert_eq!(second_req.status, RequestStatus::Pending);
}

#[tokio::test]
async fn test_cancel_then_rerequest_round_trips_one_seat() {
    let fx = fixture();
    let post_id = fx.posts.create_post(post_input(1)).await.unwrap();

    let first = request(&fx, &post_id, "rider-1").await;
    assert_eq!(seats_available(&fx.posts, &post_id).await, 0);

    assert!(fx.engine.cancel_request(&first.request_id).await.unwrap());
    assert_eq!(seats_available(&fx.posts, &post_id).await, 1);

    let driver_events = fx.notifier.emitted_for("driver-1");
    assert!(driver_events
        .iter()
        .any(|n| n.kind == NotificationKind::RiderCanceledRequest
            && n.data["requestId"] == json!(first.request_id.as_str())));

    // Re-request after cancellation must succeed.
    let second = request(&fx, &post_id, "rider-1").await;
    assert_ne!(second.request_id, first.request_id);
    assert_eq!(seats_available(&fx.posts, &post_id).await, 0);

    // Second cancel is an idempotent no-op.
    assert!(!fx.engine.cancel_request(&first.request_id).await.unwrap());
    assert_eq!(seats_available(&fx.posts, &post_id).await, 0);
}

#[tokio::test]
async fn test_accept_books_and_consumes_hold() {
    let fx = fixture();
    let post_id = fx.posts.create_post(post_input(2)).await.unwrap();
    let outcome = request(&fx, &post_id, "rider-1").await;

    let booking_id = fx
        .engine
        .accept_request(&outcome.request_id)
        .await
        .unwrap()
        .expect("first accept applies");

    let req: tandem_booking::RideRequest = fx
        .store
        .fetch(&DocRef::new("rideRequests", &outcome.request_id))
        .await
        .unwrap()
        .unwrap()
        .deserialize()
        .unwrap();
    assert_eq!(req.status, RequestStatus::Booked);
    assert_eq!(req.booking_id.as_deref(), Some(booking_id.as_str()));

    let hold: tandem_booking::Hold = fx
        .store
        .fetch(&DocRef::new("holds", &outcome.hold_id))
        .await
        .unwrap()
        .unwrap()
        .deserialize()
        .unwrap();
    assert_eq!(hold.state, HoldState::Consumed);

    // Accept keeps the seat consumed.
    assert_eq!(seats_available(&fx.posts, &post_id).await, 1);

    // Idempotent: the request is already booked.
    assert!(fx
        .engine
        .accept_request(&outcome.request_id)
        .await
        .unwrap()
        .is_none());

    let rider_events = fx.notifier.emitted_for("rider-1");
    assert!(rider_events
        .iter()
        .any(|n| n.kind == NotificationKind::BookingConfirmed));
}

#[tokio::test]
async fn test_decline_restores_seat_and_releases_hold() {
    let fx = fixture();
    let post_id = fx.posts.create_post(post_input(1)).await.unwrap();
    let outcome = request(&fx, &post_id, "rider-1").await;

    assert!(fx.engine.decline_request(&outcome.request_id).await.unwrap());
    assert_eq!(seats_available(&fx.posts, &post_id).await, 1);

    let hold: tandem_booking::Hold = fx
        .store
        .fetch(&DocRef::new("holds", &outcome.hold_id))
        .await
        .unwrap()
        .unwrap()
        .deserialize()
        .unwrap();
    assert_eq!(hold.state, HoldState::Released);

    // No double restore on a second decline.
    assert!(!fx.engine.decline_request(&outcome.request_id).await.unwrap());
    assert_eq!(seats_available(&fx.posts, &post_id).await, 1);

    assert!(fx
        .notifier
        .emitted_for("rider-1")
        .iter()
        .any(|n| n.kind == NotificationKind::RequestDeclined));
}

#[tokio::test]
async fn test_legacy_accepted_request_can_still_be_declined() {
    let fx = fixture();
    let post_id = fx.posts.create_post(post_input(1)).await.unwrap();
    let outcome = request(&fx, &post_id, "rider-1").await;

    // Older documents carry an intermediate accepted status that no new
    // write produces anymore.
    let req_ref = DocRef::new("rideRequests", &outcome.request_id);
    let mut doc = fx.store.fetch(&req_ref).await.unwrap().unwrap();
    doc.data["status"] = json!("accepted");
    fx.store.put(&req_ref, doc.data).await.unwrap();

    // Accepted cannot be canceled or expired, only declined or booked.
    assert!(!fx.engine.cancel_request(&outcome.request_id).await.unwrap());
    assert_eq!(seats_available(&fx.posts, &post_id).await, 0);

    assert!(fx.engine.decline_request(&outcome.request_id).await.unwrap());
    assert_eq!(seats_available(&fx.posts, &post_id).await, 1);

    let req: tandem_booking::RideRequest =
        fx.store.fetch(&req_ref).await.unwrap().unwrap().deserialize().unwrap();
    assert_eq!(req.status, RequestStatus::Declined);

    let hold: tandem_booking::Hold = fx
        .store
        .fetch(&DocRef::new("holds", &outcome.hold_id))
        .await
        .unwrap()
        .unwrap()
        .deserialize()
        .unwrap();
    assert_eq!(hold.state, HoldState::Released);
}

#[tokio::test]
async fn test_auto_accept_is_atomic_with_request_creation() {
    let fx = fixture();
    seed_driver(&fx.store, "driver-1", true).await;
    let post_id = fx.posts.create_post(post_input(2)).await.unwrap();

    let outcome = request(&fx, &post_id, "rider-1").await;
    assert!(outcome.auto_accepted);
    let booking_id = outcome.booking_id.expect("auto booking");

    // Seat decremented exactly once.
    assert_eq!(seats_available(&fx.posts, &post_id).await, 1);

    let req: tandem_booking::RideRequest = fx
        .store
        .fetch(&DocRef::new("rideRequests", &outcome.request_id))
        .await
        .unwrap()
        .unwrap()
        .deserialize()
        .unwrap();
    assert_eq!(req.status, RequestStatus::Booked);
    assert!(req.auto_accepted);
    assert_eq!(req.booking_id.as_deref(), Some(booking_id.as_str()));

    let hold: tandem_booking::Hold = fx
        .store
        .fetch(&DocRef::new("holds", &outcome.hold_id))
        .await
        .unwrap()
        .unwrap()
        .deserialize()
        .unwrap();
    assert_eq!(hold.state, HoldState::Consumed);

    let booking: tandem_booking::Booking = fx
        .store
        .fetch(&DocRef::new("bookings", &booking_id))
        .await
        .unwrap()
        .unwrap()
        .deserialize()
        .unwrap();
    assert_eq!(booking.status, BookingStatus::Confirmed);

    // Both parties learn about the confirmation.
    assert!(fx
        .notifier
        .emitted_for("rider-1")
        .iter()
        .any(|n| n.kind == NotificationKind::BookingConfirmed));
    assert!(fx
        .notifier
        .emitted_for("driver-1")
        .iter()
        .any(|n| n.kind == NotificationKind::BookingConfirmed));
}

#[tokio::test]
async fn test_auto_accept_never_observable_as_pending() {
    let fx = fixture();
    seed_driver(&fx.store, "driver-1", true).await;
    let post_id = fx.posts.create_post(post_input(1)).await.unwrap();

    let mut feed = fx.store.subscribe();
    let outcome = request(&fx, &post_id, "rider-1").await;
    assert!(outcome.auto_accepted);

    // Replay every change event for the request document: the first
    // visible snapshot is already booked.
    let mut saw_request = false;
    while let Ok(event) = feed.try_recv() {
        if event.collection == "rideRequests" && event.doc_id == outcome.request_id {
            saw_request = true;
            let doc = event.doc.expect("write, not delete");
            assert_eq!(doc.data["status"], "booked", "intermediate pending leaked");
        }
    }
    assert!(saw_request);
}

#[tokio::test]
async fn test_auto_accept_suppressed_at_no_show_limit() {
    let fx = fixture();
    seed_driver(&fx.store, "driver-1", true).await;
    fx.store
        .put(
            &DocRef::new(USERS_COLLECTION, "rider-1"),
            json!({"stats": {"noShows7d": 3}}),
        )
        .await
        .unwrap();
    let post_id = fx.posts.create_post(post_input(1)).await.unwrap();

    let outcome = request(&fx, &post_id, "rider-1").await;
    assert!(!outcome.auto_accepted);
    assert!(outcome.booking_id.is_none());

    let req: tandem_booking::RideRequest = fx
        .store
        .fetch(&DocRef::new("rideRequests", &outcome.request_id))
        .await
        .unwrap()
        .unwrap()
        .deserialize()
        .unwrap();
    assert_eq!(req.status, RequestStatus::Pending);
}

#[tokio::test]
async fn test_rider_radius_preference_is_honored() {
    let fx = fixture();
    let post_id = fx.posts.create_post(post_input(1)).await.unwrap();
    // Rider allows only 50m; the pickup fixture is ~130m away.
    fx.store
        .put(
            &DocRef::new(USERS_COLLECTION, "rider-1"),
            json!({"matching": {
                "destinationCampus": "burnaby",
                "pickup": {"lat": 49.2478, "lng": -122.9795},
                "radiusMeters": 50.0
            }}),
        )
        .await
        .unwrap();

    let err = fx
        .engine
        .request_ride(params(&post_id, "rider-1"), Utc::now())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "OUT_OF_RADIUS");

    // Explicit override widens the geofence for this call.
    let mut wide = params(&post_id, "rider-1");
    wide.radius_override_meters = Some(5000.0);
    fx.engine.request_ride(wide, Utc::now()).await.unwrap();
}

#[tokio::test]
async fn test_expire_is_a_no_op_before_ttl() {
    let fx = fixture();
    let post_id = fx.posts.create_post(post_input(1)).await.unwrap();
    let outcome = request(&fx, &post_id, "rider-1").await;

    let expired = fx
        .engine
        .expire_request_if_needed(&outcome.request_id, Utc::now())
        .await
        .unwrap();
    assert!(!expired);
    assert_eq!(seats_available(&fx.posts, &post_id).await, 0);
}

#[tokio::test]
async fn test_expire_past_ttl_restores_seat() {
    let fx = fixture();
    let post_id = fx.posts.create_post(post_input(1)).await.unwrap();
    let outcome = request(&fx, &post_id, "rider-1").await;

    let later = Utc::now() + Duration::minutes(11);
    let expired = fx
        .engine
        .expire_request_if_needed(&outcome.request_id, later)
        .await
        .unwrap();
    assert!(expired);
    assert_eq!(seats_available(&fx.posts, &post_id).await, 1);

    let req: tandem_booking::RideRequest = fx
        .store
        .fetch(&DocRef::new("rideRequests", &outcome.request_id))
        .await
        .unwrap()
        .unwrap()
        .deserialize()
        .unwrap();
    assert_eq!(req.status, RequestStatus::Expired);

    assert!(fx
        .notifier
        .emitted_for("rider-1")
        .iter()
        .any(|n| n.kind == NotificationKind::RequestExpired));

    // Deterministic: calling again is a no-op.
    assert!(!fx
        .engine
        .expire_request_if_needed(&outcome.request_id, later)
        .await
        .unwrap());
    assert_eq!(seats_available(&fx.posts, &post_id).await, 1);
}

#[tokio::test]
async fn test_sweep_counts_only_expired_requests() {
    let fx = fixture();
    let post_a = fx.posts.create_post(post_input(1)).await.unwrap();
    let post_b = fx.posts.create_post(post_input(1)).await.unwrap();

    let stale = request(&fx, &post_a, "rider-1").await;
    // The second request is created five minutes later, so its TTL has not
    // elapsed at sweep time.
    let fresh = fx
        .engine
        .request_ride(
            params(&post_b, "rider-2"),
            Utc::now() + Duration::minutes(5),
        )
        .await
        .unwrap();

    let sweep_at = Utc::now() + Duration::minutes(11);
    let ids = vec![stale.request_id.clone(), fresh.request_id.clone()];
    let expired = fx.engine.sweep_pending_requests(&ids, sweep_at).await.unwrap();
    assert_eq!(expired, 1);

    assert_eq!(seats_available(&fx.posts, &post_a).await, 1);
    assert_eq!(seats_available(&fx.posts, &post_b).await, 0);
}

#[tokio::test]
async fn test_concurrent_requests_for_last_seat() {
    let fx = fixture();
    let post_id = fx.posts.create_post(post_input(1)).await.unwrap();

    let engine = Arc::new(fx.engine);
    let a = {
        let engine = Arc::clone(&engine);
        let post_id = post_id.clone();
        tokio::spawn(async move {
            engine
                .request_ride(params(&post_id, "rider-a"), Utc::now())
                .await
        })
    };
    let b = {
        let engine = Arc::clone(&engine);
        let post_id = post_id.clone();
        tokio::spawn(async move {
            engine
                .request_ride(params(&post_id, "rider-b"), Utc::now())
                .await
        })
    };

    let results = [a.await.unwrap(), b.await.unwrap()];
    let wins = results.iter().filter(|r| r.is_ok()).count();
    let losses = results
        .iter()
        .filter(|r| matches!(r, Err(e) if e.code() == "NO_SEATS"))
        .count();
    assert_eq!(wins, 1, "exactly one rider gets the last seat");
    assert_eq!(losses, 1, "the other fails with NO_SEATS");
    assert_eq!(seats_available(&fx.posts, &post_id).await, 0);
}

#[tokio::test]
async fn test_cancel_booking_restores_seats_and_notifies_driver() {
    let fx = fixture();
    seed_driver(&fx.store, "driver-1", true).await;
    let post_id = fx.posts.create_post(post_input(2)).await.unwrap();
    let outcome = request(&fx, &post_id, "rider-1").await;
    let booking_id = outcome.booking_id.expect("auto booking");
    assert_eq!(seats_available(&fx.posts, &post_id).await, 1);

    assert!(fx.engine.cancel_booking(&booking_id).await.unwrap());
    assert_eq!(seats_available(&fx.posts, &post_id).await, 2);
    assert!(!fx.engine.cancel_booking(&booking_id).await.unwrap());
    assert_eq!(seats_available(&fx.posts, &post_id).await, 2);

    assert!(fx
        .notifier
        .emitted_for("driver-1")
        .iter()
        .any(|n| n.kind == NotificationKind::RiderCanceledBooking
            && n.data["bookingId"] == json!(booking_id.as_str())));
}

#[tokio::test]
async fn test_complete_booking_is_terminal_without_seat_effect() {
    let fx = fixture();
    seed_driver(&fx.store, "driver-1", true).await;
    let post_id = fx.posts.create_post(post_input(2)).await.unwrap();
    let outcome = request(&fx, &post_id, "rider-1").await;
    let booking_id = outcome.booking_id.expect("auto booking");

    assert!(fx.engine.complete_booking(&booking_id).await.unwrap());
    assert_eq!(seats_available(&fx.posts, &post_id).await, 1);

    let booking: tandem_booking::Booking = fx
        .store
        .fetch(&DocRef::new("bookings", &booking_id))
        .await
        .unwrap()
        .unwrap()
        .deserialize()
        .unwrap();
    assert_eq!(booking.status, BookingStatus::Completed);
    assert!(booking.completed_at.is_some());

    // Completed is terminal: no cancel, no second completion.
    assert!(!fx.engine.complete_booking(&booking_id).await.unwrap());
    assert!(!fx.engine.cancel_booking(&booking_id).await.unwrap());

    let err = fx.engine.complete_booking("ghost").await.unwrap_err();
    assert_eq!(err.code(), "BOOKING_NOT_FOUND");
}

#[tokio::test]
async fn test_cancel_post_notifies_pending_and_booked_riders() {
    let fx = fixture();
    let post_id = fx.posts.create_post(post_input(3)).await.unwrap();

    let _pending = request(&fx, &post_id, "rider-pending").await;
    let other = request(&fx, &post_id, "rider-booked").await;
    fx.engine.accept_request(&other.request_id).await.unwrap();
    // A declined rider must not be notified.
    let declined = request(&fx, &post_id, "rider-declined").await;
    fx.engine.decline_request(&declined.request_id).await.unwrap();

    fx.engine.cancel_post(&post_id).await.unwrap();
    assert_eq!(
        fx.posts.get_post(&post_id).await.unwrap().status,
        PostStatus::Canceled
    );

    for rider in ["rider-pending", "rider-booked"] {
        assert!(
            fx.notifier
                .emitted_for(rider)
                .iter()
                .any(|n| n.kind == NotificationKind::PostCanceled),
            "{rider} should hear about the cancellation"
        );
    }
    assert!(!fx
        .notifier
        .emitted_for("rider-declined")
        .iter()
        .any(|n| n.kind == NotificationKind::PostCanceled));

    // Canceled is terminal.
    let err = fx.engine.cancel_post(&post_id).await.unwrap_err();
    assert_eq!(err.code(), "INVALID_TRANSITION");
}
