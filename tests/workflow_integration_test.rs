//! Workflow jobs composing the other processors through a running engine.

mod common;

use std::time::Duration;

use conveyor_core::models::{JobKind, JobOptions, JobPayload, WorkflowJob};
use conveyor_core::state_machine::JobState;
use serde_json::{json, Value};
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{engine, fast_config, png};

fn workflow(definition: Value) -> JobPayload {
    JobPayload::Workflow(serde_json::from_value::<WorkflowJob>(definition).unwrap())
}

#[tokio::test]
async fn publish_workflow_branches_on_delivery_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine(fast_config());
    engine
        .storage
        .put("uploads/cover.png", png(320, 240), "image/png");
    engine.start().await;

    let job = engine
        .manager
        .enqueue(
            workflow(json!({
                "workflow_id": "publish-g-77",
                "context": {"client": {"tier": "gold", "email": "ada@example.com"}},
                "steps": [
                    {
                        "id": "cover",
                        "type": "transform-media",
                        "config": {
                            "asset_id": "cover",
                            "source_key": "uploads/cover.png",
                            "operations": [{"op": "resize", "width": 160}],
                            "output": {"format": "jpeg", "destination_key": "public/cover.jpg"}
                        }
                    },
                    {
                        "id": "webhook",
                        "type": "deliver",
                        "config": {
                            "url": server.uri(),
                            "delivery_id": "dlv-g-77",
                            "payload": {"gallery": "g-77"}
                        }
                    },
                    {
                        "id": "followup",
                        "type": "branch",
                        "config": {
                            "conditions": [{"field": "steps.webhook.status", "operator": "equals", "value": 200}],
                            "on_true": [{
                                "id": "tell-client",
                                "type": "notify",
                                "config": {"to": "ada@example.com", "template": "gallery-live"}
                            }],
                            "on_false": [{
                                "id": "tell-ops",
                                "type": "notify",
                                "config": {"to": "ops@example.com", "template": "webhook-down"}
                            }]
                        }
                    },
                    {
                        "id": "silver-upsell",
                        "type": "notify",
                        "config": {"to": "ada@example.com", "template": "upgrade"},
                        "conditions": [{"field": "client.tier", "operator": "equals", "value": "silver"}]
                    }
                ]
            })),
            JobOptions::default(),
        )
        .await
        .unwrap();

    let done = engine
        .wait_for(JobKind::Workflow, job.id, JobState::Completed, Duration::from_secs(10))
        .await;
    assert_eq!(done.progress, 100);

    let result = done.return_value.unwrap();
    assert_eq!(result["status"], "completed");
    assert_eq!(
        result["completedSteps"],
        json!(["cover", "webhook", "tell-client", "followup"])
    );
    assert_eq!(result["skippedSteps"], json!(["silver-upsell"]));
    assert_eq!(result["context"]["steps"]["followup"]["branch"], "on_true");
    assert_eq!(result["context"]["steps"]["cover"]["width"], 160);

    let sent = engine.notifications.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].template, "gallery-live");
    assert!(engine.storage.get("public/cover.jpg").is_some());

    engine.manager.shutdown(Duration::from_secs(2)).await;
    server.verify().await;
}

#[tokio::test]
async fn failing_step_aborts_and_fails_the_workflow() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&server)
        .await;

    let engine = engine(fast_config());
    engine.start().await;

    let job = engine
        .manager
        .enqueue(
            workflow(json!({
                "workflow_id": "retire-g-12",
                "steps": [
                    {
                        "id": "webhook",
                        "type": "deliver",
                        "config": {"url": server.uri(), "delivery_id": "dlv-g-12"}
                    },
                    {
                        "id": "confirm",
                        "type": "notify",
                        "config": {"to": "ada@example.com", "template": "gallery-retired"}
                    }
                ]
            })),
            JobOptions::default(),
        )
        .await
        .unwrap();

    let failed = engine
        .wait_for(JobKind::Workflow, job.id, JobState::Failed, Duration::from_secs(5))
        .await;
    assert_eq!(failed.attempts_made, 1);
    assert!(failed.failed_reason.unwrap().contains("webhook"));
    assert!(engine.notifications.sent().is_empty());

    engine.manager.shutdown(Duration::from_secs(2)).await;
}
