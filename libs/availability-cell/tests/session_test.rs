// libs/availability-cell/tests/session_test.rs
//
// End-to-end booking sessions against a mocked clinic backend.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use chrono::{NaiveDate, Weekday};
use serde_json::json;
use wiremock::{
    matchers::{body_partial_json, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

use availability_cell::{
    BookingContext, BookingCoordinator, BookingNotice, BookingPolicy, BookingSession,
    BookingState, HttpAvailabilityClient, LoadOutcome, PatientDetails, SelectOutcome,
    SubmitOutcome, WeeklyAvailability,
};
use shared_utils::test_utils::{TestCalendar, TestConfig};

// ==============================================================================
// TEST FIXTURES AND UTILITIES
// ==============================================================================

struct TestSetup {
    session: BookingSession<HttpAvailabilityClient>,
    mock_server: MockServer,
}

impl TestSetup {
    async fn new() -> Self {
        let mock_server = MockServer::start().await;
        let config = TestConfig::with_api_url(&mock_server.uri()).to_app_config();

        let availability = WeeklyAvailability::new([Weekday::Mon, Weekday::Wed], 30, 9, 17).unwrap();
        let coordinator = BookingCoordinator::new(
            BookingContext::for_provider("doctor-7", "branch-central"),
            availability,
            TestCalendar::reference_sunday(),
            TestCalendar::start_of_week(),
            BookingPolicy::from(&config),
        )
        .unwrap();

        let client = Arc::new(HttpAvailabilityClient::new(&config));

        Self {
            session: BookingSession::new(client, coordinator),
            mock_server,
        }
    }

    async fn mock_booked(&self, date: NaiveDate, booked: &[&str]) {
        Mock::given(method("GET"))
            .and(path("/availability"))
            .and(query_param("date", date.format("%Y-%m-%d").to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "bookedStartTimes": booked
            })))
            .mount(&self.mock_server)
            .await;
    }
}

fn monday() -> NaiveDate {
    TestCalendar::weekday(Weekday::Mon)
}

fn wednesday() -> NaiveDate {
    TestCalendar::weekday(Weekday::Wed)
}

fn patient() -> PatientDetails {
    PatientDetails {
        full_name: "Amara Okafor".to_string(),
        phone: "+2348000000000".to_string(),
        email: None,
        notes: Some("First visit".to_string()),
    }
}

// ==============================================================================
// OPENING AND LOADING
// ==============================================================================

#[tokio::test]
async fn test_open_on_closed_day_loads_next_open_date() {
    let setup = TestSetup::new().await;
    setup.mock_booked(monday(), &["09:00", "09:30"]).await;

    let opened = setup.session.open(TestCalendar::reference_sunday()).await;

    assert_eq!(opened, Some((monday(), LoadOutcome::Ready { date: monday(), free_slots: 14 })));

    let snapshot = setup.session.snapshot().await;
    assert_eq!(snapshot.state, BookingState::SlotsReady { date: monday() });
    assert!(!snapshot.can_submit);
    assert!(snapshot.slots[0].is_booked);
    assert!(snapshot.slots[2].is_bookable());
}

#[tokio::test]
async fn test_closed_date_does_not_hit_backend() {
    let setup = TestSetup::new().await;
    Mock::given(method("GET"))
        .and(path("/availability"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "bookedStartTimes": [] })))
        .expect(0)
        .mount(&setup.mock_server)
        .await;

    let tuesday = TestCalendar::weekday(Weekday::Tue);
    let outcome = setup.session.change_date(tuesday).await;

    assert_eq!(outcome, LoadOutcome::Closed { date: tuesday });
    assert!(setup.session.snapshot().await.slots.is_empty());
}

#[tokio::test]
async fn test_failing_backend_is_retried_then_reported() {
    let setup = TestSetup::new().await;
    Mock::given(method("GET"))
        .and(path("/availability"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&setup.mock_server)
        .await;

    let outcome = setup.session.change_date(monday()).await;

    assert_eq!(outcome, LoadOutcome::Unavailable { date: monday() });
    let snapshot = setup.session.snapshot().await;
    assert_eq!(snapshot.notice, Some(BookingNotice::AvailabilityUnavailable { date: monday() }));
    assert!(snapshot.slots.iter().all(|slot| slot.is_booked && slot.is_provisional));
}

#[tokio::test]
async fn test_transient_failure_recovers_on_retry() {
    let setup = TestSetup::new().await;
    Mock::given(method("GET"))
        .and(path("/availability"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&setup.mock_server)
        .await;
    setup.mock_booked(monday(), &[]).await;

    let outcome = setup.session.change_date(monday()).await;

    assert_eq!(outcome, LoadOutcome::Ready { date: monday(), free_slots: 16 });
    assert_eq!(setup.session.snapshot().await.notice, None);
}

#[tokio::test]
async fn test_slow_response_for_previous_date_is_discarded() {
    let setup = TestSetup::new().await;
    Mock::given(method("GET"))
        .and(path("/availability"))
        .and(query_param("date", monday().format("%Y-%m-%d").to_string()))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "bookedStartTimes": [] }))
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&setup.mock_server)
        .await;
    setup.mock_booked(wednesday(), &["10:00"]).await;

    let (monday_outcome, wednesday_outcome) = tokio::join!(
        setup.session.change_date(monday()),
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            setup.session.change_date(wednesday()).await
        }
    );

    assert_eq!(monday_outcome, LoadOutcome::Stale);
    assert_eq!(wednesday_outcome, LoadOutcome::Ready { date: wednesday(), free_slots: 15 });

    let snapshot = setup.session.snapshot().await;
    assert_eq!(snapshot.state, BookingState::SlotsReady { date: wednesday() });
    assert!(snapshot.slots.iter().all(|slot| slot.slot.date == wednesday()));
}

#[tokio::test]
async fn test_reload_keeps_selection_that_is_still_free() {
    let setup = TestSetup::new().await;
    Mock::given(method("GET"))
        .and(path("/availability"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "bookedStartTimes": [] })))
        .up_to_n_times(1)
        .expect(1)
        .mount(&setup.mock_server)
        .await;
    setup.mock_booked(monday(), &["14:00"]).await;

    setup.session.change_date(monday()).await;
    assert_matches!(setup.session.select_slot(TestCalendar::time(10, 0)).await, SelectOutcome::Selected(_));

    let outcome = setup.session.reload().await;

    assert_eq!(outcome, Some(LoadOutcome::Ready { date: monday(), free_slots: 15 }));
    let snapshot = setup.session.snapshot().await;
    assert_matches!(&snapshot.state, BookingState::SlotSelected { selection, .. } if selection.start_time == TestCalendar::time(10, 0));
    assert!(snapshot.can_submit);

    let two_pm = snapshot
        .slots
        .iter()
        .find(|slot| slot.slot.start_time == TestCalendar::time(14, 0))
        .unwrap();
    assert!(two_pm.is_booked);
}

#[tokio::test]
async fn test_reload_drops_selection_taken_meanwhile() {
    let setup = TestSetup::new().await;
    Mock::given(method("GET"))
        .and(path("/availability"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "bookedStartTimes": [] })))
        .up_to_n_times(1)
        .mount(&setup.mock_server)
        .await;
    setup.mock_booked(monday(), &["10:00"]).await;

    setup.session.change_date(monday()).await;
    assert_matches!(setup.session.select_slot(TestCalendar::time(10, 0)).await, SelectOutcome::Selected(_));

    let outcome = setup.session.reload().await;

    assert_eq!(outcome, Some(LoadOutcome::Ready { date: monday(), free_slots: 15 }));
    let snapshot = setup.session.snapshot().await;
    assert_eq!(snapshot.state, BookingState::SlotsReady { date: monday() });
    assert!(!snapshot.can_submit);
    assert_eq!(
        snapshot.notice,
        Some(BookingNotice::SlotTaken { date: monday(), start_time: TestCalendar::time(10, 0) })
    );

    let requests = setup.mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
}

#[tokio::test]
async fn test_reload_of_closed_date_reports_closed() {
    let setup = TestSetup::new().await;
    let tuesday = TestCalendar::weekday(Weekday::Tue);
    setup.session.change_date(tuesday).await;

    assert_eq!(setup.session.reload().await, Some(LoadOutcome::Closed { date: tuesday }));
}

// ==============================================================================
// BOOKING
// ==============================================================================

#[tokio::test]
async fn test_successful_booking() {
    let setup = TestSetup::new().await;
    setup.mock_booked(monday(), &[]).await;
    Mock::given(method("POST"))
        .and(path("/appointments"))
        .and(body_partial_json(json!({
            "providerId": "doctor-7",
            "branchId": "branch-central",
            "date": "2024-06-03",
            "startTime": "11:00",
            "fullName": "Amara Okafor"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "appointmentId": "apt-42" })))
        .expect(1)
        .mount(&setup.mock_server)
        .await;

    setup.session.change_date(monday()).await;
    let selection = match setup.session.select_slot(TestCalendar::time(11, 0)).await {
        SelectOutcome::Selected(selection) => selection,
        other => panic!("expected selection, got {:?}", other),
    };
    assert!(setup.session.snapshot().await.can_submit);

    let outcome = setup.session.submit_booking(selection, patient()).await.unwrap();

    let appointment = match outcome {
        SubmitOutcome::Confirmed(appointment) => appointment,
        other => panic!("expected confirmation, got {:?}", other),
    };
    assert_eq!(appointment.appointment_id, "apt-42");
    assert_eq!(appointment.key.date, monday());
    assert_eq!(appointment.key.start_time, TestCalendar::time(11, 0));
}

#[tokio::test]
async fn test_conflict_refreshes_and_shows_slot_booked() {
    let setup = TestSetup::new().await;

    // First fetch: 14:00 free. After the conflict the backend reports it taken.
    Mock::given(method("GET"))
        .and(path("/availability"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "bookedStartTimes": [] })))
        .up_to_n_times(1)
        .mount(&setup.mock_server)
        .await;
    setup.mock_booked(monday(), &["14:00"]).await;

    Mock::given(method("POST"))
        .and(path("/appointments"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "date": "2024-06-03",
            "startTime": "14:00"
        })))
        .expect(1)
        .mount(&setup.mock_server)
        .await;

    setup.session.change_date(monday()).await;
    let selection = match setup.session.select_slot(TestCalendar::time(14, 0)).await {
        SelectOutcome::Selected(selection) => selection,
        other => panic!("expected selection, got {:?}", other),
    };

    let outcome = setup.session.submit_booking(selection.clone(), patient()).await.unwrap();

    assert_eq!(
        outcome,
        SubmitOutcome::Conflict {
            notice: BookingNotice::SlotTaken { date: monday(), start_time: TestCalendar::time(14, 0) }
        }
    );

    let snapshot = setup.session.snapshot().await;
    assert_eq!(snapshot.state, BookingState::SlotsReady { date: monday() });
    let two_pm = snapshot
        .slots
        .iter()
        .find(|slot| slot.slot.start_time == TestCalendar::time(14, 0))
        .unwrap();
    assert!(two_pm.is_booked);
    assert!(!snapshot.can_submit);

    // Resubmitting the stale selection is rejected locally; the POST mock expects one call
    let retry = setup.session.submit_booking(selection, patient()).await.unwrap();
    assert_matches!(retry, SubmitOutcome::Rejected(_));
}

#[tokio::test]
async fn test_validation_failure_keeps_selection() {
    let setup = TestSetup::new().await;
    setup.mock_booked(monday(), &[]).await;
    Mock::given(method("POST"))
        .and(path("/appointments"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({ "error": "phone is invalid" })))
        .mount(&setup.mock_server)
        .await;

    setup.session.change_date(monday()).await;
    let selection = match setup.session.select_slot(TestCalendar::time(9, 0)).await {
        SelectOutcome::Selected(selection) => selection,
        other => panic!("expected selection, got {:?}", other),
    };

    let outcome = setup.session.submit_booking(selection, patient()).await.unwrap();

    assert_eq!(outcome, SubmitOutcome::Failed { message: "phone is invalid".to_string() });
    let snapshot = setup.session.snapshot().await;
    assert!(snapshot.can_submit);
    assert_eq!(
        snapshot.notice,
        Some(BookingNotice::SubmissionFailed { message: "phone is invalid".to_string() })
    );
}
