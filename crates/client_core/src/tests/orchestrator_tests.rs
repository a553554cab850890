use super::*;
use crate::test_support::{network_error, road_only_plan, train_plan, FakeCommuteApi, Scripted};
use shared::{domain::Recommendation, protocol::PredictResponse};

fn thane_profile() -> Profile {
    Profile {
        home: "Thane West".into(),
        station: "Thane".into(),
        walk_mins: 5,
        arrival_time: "09:00".into(),
    }
}

fn prediction(minutes: f64) -> PredictResponse {
    PredictResponse {
        predicted_duration_mins: Some(minutes),
    }
}

fn secs(value: u64) -> Duration {
    Duration::from_secs(value)
}

fn assert_elapsed(started: Instant, expected: Duration) {
    let elapsed = started.elapsed();
    assert!(
        elapsed >= expected && elapsed < expected + secs(1),
        "expected ~{expected:?}, took {elapsed:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn merges_plan_and_prediction() {
    let api = Arc::new(FakeCommuteApi::new(
        Scripted::ok_after(secs(2), train_plan()),
        Scripted::ok_after(secs(1), prediction(58.4)),
    ));
    let orchestrator = CommuteRequestOrchestrator::new(api.clone());

    let result = orchestrator
        .plan_commute(&thane_profile(), 9, WeekdayIndex::MONDAY)
        .await
        .expect("plan");

    let expected = train_plan();
    assert_eq!(result.recommendation, Recommendation::Train);
    assert_eq!(result.train_route, expected.train_route);
    assert_eq!(result.road_route, expected.road_route);
    assert_eq!(result.ml_estimate_mins, Some(58.4));

    let plan_requests = api.plan_requests.lock().await;
    assert_eq!(
        plan_requests.as_slice(),
        &[CommutePlanRequest {
            origin: "Thane West".into(),
            arrival_time: "09:00".into(),
            delay_buffer_mins: 9,
        }]
    );
    let predict_requests = api.predict_requests.lock().await;
    assert_eq!(
        predict_requests.as_slice(),
        &[PredictRequest {
            time: "09:00".into(),
            day_of_week: WeekdayIndex::MONDAY,
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn calls_run_concurrently_not_back_to_back() {
    let api = Arc::new(FakeCommuteApi::new(
        Scripted::ok_after(secs(10), road_only_plan()),
        Scripted::ok_after(secs(20), prediction(40.0)),
    ));
    let orchestrator = CommuteRequestOrchestrator::new(api);

    let started = Instant::now();
    let result = orchestrator
        .plan_commute(&thane_profile(), 0, WeekdayIndex::MONDAY)
        .await
        .expect("plan");

    assert_elapsed(started, secs(20));
    assert_eq!(result.ml_estimate_mins, Some(40.0));
}

#[tokio::test(start_paused = true)]
async fn failed_prediction_leaves_estimate_empty() {
    let api = Arc::new(FakeCommuteApi::new(
        Scripted::ok_after(secs(1), road_only_plan()),
        Scripted::err_after(
            secs(1),
            RemoteCallError::Status {
                endpoint: PREDICT_ENDPOINT,
                status: 500,
                message: "model not loaded".into(),
            },
        ),
    ));
    let orchestrator = CommuteRequestOrchestrator::new(api);

    let result = orchestrator
        .plan_commute(&thane_profile(), 3, WeekdayIndex::SUNDAY)
        .await
        .expect("prediction failure must not fail the plan");

    let plan = road_only_plan();
    assert_eq!(result.recommendation, plan.recommendation);
    assert_eq!(result.train_route, None);
    assert_eq!(result.road_route, plan.road_route);
    assert_eq!(result.ml_estimate_mins, None);
}

#[tokio::test(start_paused = true)]
async fn null_or_non_finite_prediction_counts_as_absent() {
    for predicted in [None, Some(f64::NAN)] {
        let api = Arc::new(FakeCommuteApi::instant(road_only_plan(), predicted));
        let result = CommuteRequestOrchestrator::new(api)
            .plan_commute(&thane_profile(), 0, WeekdayIndex::MONDAY)
            .await
            .expect("plan");
        assert_eq!(result.ml_estimate_mins, None);
    }
}

#[tokio::test(start_paused = true)]
async fn road_plan_with_prediction_timeout_still_returns_result() {
    let api = Arc::new(FakeCommuteApi::new(
        Scripted::ok_after(secs(3), road_only_plan()),
        Scripted::ok_after(secs(600), prediction(30.0)),
    ));
    let orchestrator = CommuteRequestOrchestrator::new(api.clone());

    let started = Instant::now();
    let result = orchestrator
        .plan_commute(&thane_profile(), 9, WeekdayIndex::MONDAY)
        .await
        .expect("plan");

    assert_elapsed(started, DEFAULT_COMMUTE_DEADLINE);
    assert_eq!(result.recommendation, Recommendation::Road);
    assert_eq!(result.train_route, None);
    assert_eq!(result.road_route.leave_at, "08:10");
    assert_eq!(result.road_route.total_duration_mins, 45);
    assert_eq!(result.road_route.summary(), Some("Drive via highway"));
    assert_eq!(result.ml_estimate_mins, None);
    assert_eq!(api.plan_requests.lock().await[0].delay_buffer_mins, 9);
}

#[tokio::test(start_paused = true)]
async fn slow_plan_times_out_even_when_prediction_succeeds() {
    let api = Arc::new(FakeCommuteApi::new(
        Scripted::ok_after(secs(61), road_only_plan()),
        Scripted::ok_after(secs(1), prediction(30.0)),
    ));
    let orchestrator = CommuteRequestOrchestrator::new(api);

    let started = Instant::now();
    let err = orchestrator
        .plan_commute(&thane_profile(), 0, WeekdayIndex::MONDAY)
        .await
        .expect_err("plan must time out");

    assert_eq!(err, CommuteError::Timeout(DEFAULT_COMMUTE_DEADLINE));
    assert_elapsed(started, DEFAULT_COMMUTE_DEADLINE);
}

#[tokio::test(start_paused = true)]
async fn slow_plan_times_out_when_prediction_also_fails() {
    let api = Arc::new(FakeCommuteApi::new(
        Scripted::ok_after(secs(120), road_only_plan()),
        Scripted::err_after(secs(5), network_error(PREDICT_ENDPOINT)),
    ));
    let err = CommuteRequestOrchestrator::with_deadline(api, secs(15))
        .plan_commute(&thane_profile(), 0, WeekdayIndex::MONDAY)
        .await
        .expect_err("plan must time out");

    assert_eq!(err, CommuteError::Timeout(secs(15)));
}

#[tokio::test(start_paused = true)]
async fn plan_failures_map_to_commute_errors() {
    let cases = [
        (
            network_error(PLAN_ENDPOINT),
            CommuteError::Network("connection refused".into()),
        ),
        (
            RemoteCallError::Status {
                endpoint: PLAN_ENDPOINT,
                status: 400,
                message: "arrival_time must be HH:MM format".into(),
            },
            CommuteError::Service("status 400: arrival_time must be HH:MM format".into()),
        ),
        (
            RemoteCallError::Decode {
                endpoint: PLAN_ENDPOINT,
                message: "missing field `road_route`".into(),
            },
            CommuteError::Service("malformed plan response: missing field `road_route`".into()),
        ),
        (
            RemoteCallError::Reported {
                endpoint: PLAN_ENDPOINT,
                message: "Traffic API error: quota exceeded".into(),
            },
            CommuteError::Service("Traffic API error: quota exceeded".into()),
        ),
        (
            RemoteCallError::DeadlineExceeded {
                endpoint: PLAN_ENDPOINT,
            },
            CommuteError::Timeout(DEFAULT_COMMUTE_DEADLINE),
        ),
    ];

    for (plan_error, expected) in cases {
        let api = Arc::new(FakeCommuteApi::new(
            Scripted::err_after(secs(1), plan_error),
            Scripted::ok_after(secs(1), prediction(30.0)),
        ));
        let err = CommuteRequestOrchestrator::new(api)
            .plan_commute(&thane_profile(), 0, WeekdayIndex::MONDAY)
            .await
            .expect_err("plan failure is fatal");
        assert_eq!(err, expected);
    }
}

#[tokio::test(start_paused = true)]
async fn plan_failure_releases_pending_prediction() {
    let api = Arc::new(FakeCommuteApi::new(
        Scripted::err_after(secs(1), network_error(PLAN_ENDPOINT)),
        Scripted::ok_after(secs(45), prediction(30.0)),
    ));

    let started = Instant::now();
    let err = CommuteRequestOrchestrator::new(api)
        .plan_commute(&thane_profile(), 0, WeekdayIndex::MONDAY)
        .await
        .expect_err("plan failure is fatal");

    assert!(matches!(err, CommuteError::Network(_)));
    assert_elapsed(started, secs(1));
}

#[tokio::test(start_paused = true)]
async fn parent_cancellation_surfaces_as_cancelled() {
    let api = Arc::new(FakeCommuteApi::new(
        Scripted::ok_after(secs(30), road_only_plan()),
        Scripted::ok_after(secs(30), prediction(30.0)),
    ));
    let orchestrator = CommuteRequestOrchestrator::new(api);
    let parent = CancellationToken::new();

    let canceller = {
        let parent = parent.clone();
        async move {
            tokio::time::sleep(secs(5)).await;
            parent.cancel();
        }
    };
    let profile = thane_profile();
    let (outcome, ()) = tokio::join!(
        orchestrator.plan_commute_with_cancel(
            &profile,
            0,
            WeekdayIndex::MONDAY,
            &parent
        ),
        canceller
    );

    assert_eq!(outcome.expect_err("cancelled"), CommuteError::Cancelled);
}

#[test]
fn timeout_message_names_the_deadline() {
    assert_eq!(
        CommuteError::Timeout(DEFAULT_COMMUTE_DEADLINE).to_string(),
        "the commute planner did not answer within 60s"
    );
}
