//! Outbound delivery through a running engine: permanent client errors fail
//! after one attempt, transient server errors are retried up to the job's
//! `max_retries`.

mod common;

use std::collections::BTreeMap;
use std::time::Duration;

use conveyor_core::models::{DeliveryJob, JobKind, JobOptions, JobPayload};
use conveyor_core::queue::BackoffPolicy;
use conveyor_core::state_machine::JobState;
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{engine, fast_config};

fn delivery(url: String, max_retries: u32) -> JobPayload {
    JobPayload::Delivery(DeliveryJob {
        url,
        method: "POST".to_string(),
        headers: BTreeMap::new(),
        payload: Some(json!({"event": "gallery.published", "galleryId": "g-77"})),
        timeout_ms: 2_000,
        max_retries,
        delivery_id: "dlv-integration".to_string(),
    })
}

/// Short fixed backoff keeps the retry test fast
fn quick_retries() -> JobOptions {
    JobOptions {
        backoff: Some(BackoffPolicy::fixed(20)),
        ..JobOptions::default()
    }
}

#[tokio::test]
async fn client_error_fails_after_a_single_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such hook"))
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine(fast_config());
    engine.start().await;

    let job = engine
        .manager
        .enqueue(delivery(format!("{}/hooks", server.uri()), 3), quick_retries())
        .await
        .unwrap();
    assert_eq!(job.max_attempts, 3);

    let failed = engine
        .wait_for(JobKind::Delivery, job.id, JobState::Failed, Duration::from_secs(5))
        .await;
    assert_eq!(failed.attempts_made, 1);
    assert!(failed.failed_reason.unwrap().contains("404"));

    let metadata = failed.failure_metadata.unwrap();
    assert_eq!(metadata["status"], 404);
    assert_eq!(metadata["attemptNumber"], 1);
    assert_eq!(metadata["deliveryId"], "dlv-integration");

    assert!(engine.manager.shutdown(Duration::from_secs(2)).await);
    server.verify().await;
}

#[tokio::test]
async fn server_error_is_retried_until_attempts_run_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks"))
        .and(header("x-delivery-id", "dlv-integration"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let engine = engine(fast_config());
    engine.start().await;

    let job = engine
        .manager
        .enqueue(delivery(format!("{}/hooks", server.uri()), 3), quick_retries())
        .await
        .unwrap();

    let failed = engine
        .wait_for(JobKind::Delivery, job.id, JobState::Failed, Duration::from_secs(10))
        .await;
    assert_eq!(failed.attempts_made, 3);
    assert_eq!(failed.failure_metadata.unwrap()["attemptNumber"], 3);

    assert!(engine.manager.shutdown(Duration::from_secs(2)).await);
    let stats = engine.manager.worker(JobKind::Delivery).stats();
    assert_eq!(stats.retried, 2);
    assert_eq!(stats.failed, 1);
    server.verify().await;
}

#[tokio::test]
async fn recovered_endpoint_completes_on_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(202).set_body_string("queued"))
        .mount(&server)
        .await;

    let engine = engine(fast_config());
    engine.start().await;

    let job = engine
        .manager
        .enqueue(delivery(server.uri(), 3), quick_retries())
        .await
        .unwrap();

    let completed = engine
        .wait_for(JobKind::Delivery, job.id, JobState::Completed, Duration::from_secs(5))
        .await;
    assert_eq!(completed.attempts_made, 2);
    let result = completed.return_value.unwrap();
    assert_eq!(result["status"], 202);
    assert_eq!(result["responseSnippet"], "queued");

    engine.manager.shutdown(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn server_error_waits_out_the_delivery_ladder() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let engine = engine(fast_config());
    engine.start().await;

    // Queue default backoff: 1s, 5s, 15s, then capped exponential
    let job = engine
        .manager
        .enqueue(delivery(server.uri(), 3), JobOptions::default())
        .await
        .unwrap();
    assert_eq!(job.backoff, BackoffPolicy::delivery_ladder());
    assert_eq!(job.priority, 5);

    let first = engine
        .wait_until(JobKind::Delivery, job.id, Duration::from_secs(5), |job| {
            job.state == JobState::Delayed && job.attempts_made == 1
        })
        .await;
    let wait = first.run_at - first.processed_at.unwrap();
    assert!(wait >= chrono::Duration::milliseconds(1_000), "first wait {wait}");
    assert!(wait < chrono::Duration::milliseconds(3_000), "first wait {wait}");
    assert_eq!(first.priority, 5);

    let second = engine
        .wait_until(JobKind::Delivery, job.id, Duration::from_secs(5), |job| {
            job.state == JobState::Delayed && job.attempts_made == 2
        })
        .await;
    assert!(second.processed_at.unwrap() >= first.run_at);
    let wait = second.run_at - second.processed_at.unwrap();
    assert!(wait >= chrono::Duration::milliseconds(5_000), "second wait {wait}");
    assert!(wait < chrono::Duration::milliseconds(7_000), "second wait {wait}");
    // One attempt left: jumps ahead of regular deliveries
    assert_eq!(second.priority, 1);

    assert!(engine.manager.shutdown(Duration::from_secs(2)).await);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}
