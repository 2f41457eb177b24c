mod common;

use axum::http::StatusCode;
use chrono::{Duration, Utc};
use serde_json::json;

use common::TestFixture;
use provisioner_core::{DeploymentAction, DeploymentRecorder};

#[tokio::test]
async fn test_health() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/health").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "ok");
    assert_eq!(response.body["scheduler_running"], true);
}

#[tokio::test]
async fn test_workshop_status_after_adding_attendees() {
    let fixture = TestFixture::new().await;
    let workshop_id = fixture.create_workshop("Terraform 101").await;
    fixture.add_attendee(&workshop_id, "a@example.com").await;
    fixture.add_attendee(&workshop_id, "b@example.com").await;

    let response = fixture
        .get(&format!("/api/v1/workshops/{}/status", workshop_id))
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["workshop"]["status"], "planning");
    assert_eq!(response.body["derived_status"], "deploying");
    assert_eq!(response.body["attendee_count"], 2);
    assert_eq!(response.body["attendees_by_status"]["deploying"], 2);

    let response = fixture
        .post_empty(&format!("/api/v1/workshops/{}/reconcile", workshop_id))
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "deploying");

    let response = fixture
        .get(&format!("/api/v1/workshops/{}/attendees", workshop_id))
        .await;
    assert_eq!(response.body.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_unknown_workshop_is_not_found() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/workshops/missing/status").await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert!(response.body["error"].as_str().unwrap().contains("missing"));

    let response = fixture.post_empty("/api/v1/workshops/missing/reconcile").await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_workshop_rejected() {
    let fixture = TestFixture::new().await;
    let now = Utc::now();

    let response = fixture
        .post(
            "/api/v1/workshops",
            json!({
                "name": "Backwards",
                "starts_at": now,
                "ends_at": now - Duration::hours(1),
                "timezone": "UTC",
            }),
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_provision_attendee_runs_in_background() {
    let fixture = TestFixture::new().await;
    let workshop_id = fixture.create_workshop("Kubernetes Basics").await;
    let attendee_id = fixture.add_attendee(&workshop_id, "a@example.com").await;

    let response = fixture
        .post_empty(&format!("/api/v1/attendees/{}/provision", attendee_id))
        .await;
    assert_eq!(response.status, StatusCode::ACCEPTED);
    assert_eq!(response.body["attendee_id"], attendee_id.as_str());
    assert_eq!(response.body["job"], "provision-attendee");

    assert!(fixture.wait_for_attendee_status(&attendee_id, "active").await);

    let response = fixture
        .get(&format!("/api/v1/attendees/{}/status", attendee_id))
        .await;
    assert_eq!(
        response.body["attendee"]["external_id"],
        format!("ext-{}", attendee_id)
    );

    let response = fixture
        .get(&format!("/api/v1/attendees/{}/deployments", attendee_id))
        .await;
    let history = response.body.as_array().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["action"], "apply");
    assert_eq!(history[0]["status"], "succeeded");

    let response = fixture
        .get(&format!("/api/v1/workshops/{}/status", workshop_id))
        .await;
    assert_eq!(response.body["workshop"]["status"], "active");
    assert_eq!(fixture.provisioner.apply_calls().await, 1);
}

#[tokio::test]
async fn test_provision_with_open_record_conflicts() {
    let fixture = TestFixture::new().await;
    let workshop_id = fixture.create_workshop("Terraform 101").await;
    let attendee_id = fixture.add_attendee(&workshop_id, "a@example.com").await;

    fixture
        .deployments
        .begin(&attendee_id, &workshop_id, DeploymentAction::Apply)
        .unwrap();

    let response = fixture
        .post_empty(&format!("/api/v1/attendees/{}/provision", attendee_id))
        .await;
    assert_eq!(response.status, StatusCode::CONFLICT);

    let response = fixture
        .get(&format!("/api/v1/attendees/{}/status", attendee_id))
        .await;
    assert_eq!(response.body["open_deployment"]["action"], "apply");
    assert_eq!(fixture.provisioner.apply_calls().await, 0);
}

#[tokio::test]
async fn test_provision_unknown_attendee_is_not_found() {
    let fixture = TestFixture::new().await;

    let response = fixture.post_empty("/api/v1/attendees/missing/provision").await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_provision_rejected_when_scheduler_stopped() {
    let fixture = TestFixture::new().await;
    let workshop_id = fixture.create_workshop("Terraform 101").await;
    let attendee_id = fixture.add_attendee(&workshop_id, "a@example.com").await;

    fixture.scheduler.stop().await;

    let response = fixture
        .post_empty(&format!("/api/v1/attendees/{}/provision", attendee_id))
        .await;
    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_teardown_attendee() {
    let fixture = TestFixture::new().await;
    let workshop_id = fixture.create_workshop("Terraform 101").await;
    let attendee_id = fixture.add_attendee(&workshop_id, "a@example.com").await;

    fixture
        .post_empty(&format!("/api/v1/attendees/{}/provision", attendee_id))
        .await;
    assert!(fixture.wait_for_attendee_status(&attendee_id, "active").await);

    let response = fixture
        .post_empty(&format!("/api/v1/attendees/{}/teardown", attendee_id))
        .await;
    assert_eq!(response.status, StatusCode::ACCEPTED);
    assert!(fixture.wait_for_attendee_status(&attendee_id, "completed").await);
    assert_eq!(fixture.provisioner.destroy_calls().await, 1);
}

#[tokio::test]
async fn test_pin_and_unpin_status() {
    let fixture = TestFixture::new().await;
    let workshop_id = fixture.create_workshop("Terraform 101").await;
    fixture.add_attendee(&workshop_id, "a@example.com").await;

    let response = fixture
        .put(
            &format!("/api/v1/workshops/{}/pin", workshop_id),
            json!({ "status": "active" }),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "active");
    assert_eq!(response.body["status_pinned"], true);

    let response = fixture
        .post_empty(&format!("/api/v1/workshops/{}/reconcile", workshop_id))
        .await;
    assert_eq!(response.body["status"], "active");

    let response = fixture
        .put(&format!("/api/v1/workshops/{}/pin", workshop_id), json!({}))
        .await;
    assert_eq!(response.body["status"], "deploying");
    assert_eq!(response.body["status_pinned"], false);
}

#[tokio::test]
async fn test_schedule_and_cancel_deletion() {
    let fixture = TestFixture::new().await;
    let workshop_id = fixture.create_workshop("Terraform 101").await;
    let at = Utc::now() + Duration::hours(4);

    let response = fixture
        .put(
            &format!("/api/v1/workshops/{}/deletion", workshop_id),
            json!({ "at": at }),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(response.body["deletion_scheduled_at"].is_string());

    let response = fixture
        .put(
            &format!("/api/v1/workshops/{}/deletion", workshop_id),
            json!({ "at": null }),
        )
        .await;
    assert!(response.body["deletion_scheduled_at"].is_null());
}

#[tokio::test]
async fn test_list_workshops_by_status() {
    let fixture = TestFixture::new().await;
    let first = fixture.create_workshop("First").await;
    fixture.create_workshop("Second").await;
    fixture.add_attendee(&first, "a@example.com").await;
    fixture
        .post_empty(&format!("/api/v1/workshops/{}/reconcile", first))
        .await;

    let response = fixture.get("/api/v1/workshops").await;
    assert_eq!(response.body["workshops"].as_array().unwrap().len(), 2);

    let response = fixture.get("/api/v1/workshops?status=deploying").await;
    let workshops = response.body["workshops"].as_array().unwrap();
    assert_eq!(workshops.len(), 1);
    assert_eq!(workshops[0]["id"], first.as_str());
}

#[tokio::test]
async fn test_scheduler_status_lists_adhoc_runs() {
    let fixture = TestFixture::new().await;
    let workshop_id = fixture.create_workshop("Terraform 101").await;
    let attendee_id = fixture.add_attendee(&workshop_id, "a@example.com").await;

    fixture
        .post_empty(&format!("/api/v1/attendees/{}/provision", attendee_id))
        .await;
    assert!(fixture.wait_for_attendee_status(&attendee_id, "active").await);

    // The run is recorded right after the job returns.
    let mut recent = Vec::new();
    for _ in 0..50 {
        let response = fixture.get("/api/v1/scheduler/status").await;
        assert_eq!(response.body["running"], true);
        recent = response.body["recent_adhoc"].as_array().unwrap().clone();
        if !recent.is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0]["job"], "provision-attendee");
    assert_eq!(recent[0]["outcome"], "succeeded");
}

#[tokio::test]
async fn test_audit_records_deployments() {
    let fixture = TestFixture::new().await;
    let workshop_id = fixture.create_workshop("Terraform 101").await;
    let attendee_id = fixture.add_attendee(&workshop_id, "a@example.com").await;

    fixture
        .post_empty(&format!("/api/v1/attendees/{}/provision", attendee_id))
        .await;
    assert!(fixture.wait_for_attendee_status(&attendee_id, "active").await);

    let path = format!(
        "/api/v1/audit?attendee_id={}&event_type=deployment_completed",
        attendee_id
    );
    let mut total = 0;
    for _ in 0..50 {
        let response = fixture.get(&path).await;
        assert_eq!(response.status, StatusCode::OK);
        total = response.body["total"].as_i64().unwrap();
        if total > 0 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert_eq!(total, 1);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let fixture = TestFixture::new().await;
    fixture.get("/api/v1/health").await;

    let response = fixture.get("/api/v1/metrics").await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(response.text.contains("provisioner_http_requests_total"));
    assert!(response.text.contains("provisioner_scheduler_running"));
}

#[tokio::test]
async fn test_operations_on_torn_down_attendee_are_unprocessable() {
    let fixture = TestFixture::new().await;
    let workshop_id = fixture.create_workshop("Terraform 101").await;
    let attendee_id = fixture.add_attendee(&workshop_id, "a@example.com").await;

    fixture
        .post_empty(&format!("/api/v1/attendees/{}/teardown", attendee_id))
        .await;
    assert!(fixture.wait_for_attendee_status(&attendee_id, "completed").await);

    let response = fixture
        .post_empty(&format!("/api/v1/attendees/{}/teardown", attendee_id))
        .await;
    assert_eq!(response.status, StatusCode::UNPROCESSABLE_ENTITY);

    let response = fixture
        .post_empty(&format!("/api/v1/attendees/{}/provision", attendee_id))
        .await;
    assert_eq!(response.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(fixture.provisioner.destroy_calls().await, 1);
    assert_eq!(fixture.provisioner.apply_calls().await, 0);
}

#[tokio::test]
async fn test_provision_in_workshop_due_for_deletion_is_unprocessable() {
    let fixture = TestFixture::new().await;
    let workshop_id = fixture.create_workshop("Terraform 101").await;
    let attendee_id = fixture.add_attendee(&workshop_id, "a@example.com").await;

    fixture
        .put(
            &format!("/api/v1/workshops/{}/deletion", workshop_id),
            json!({ "at": Utc::now() - Duration::minutes(1) }),
        )
        .await;

    let response = fixture
        .post_empty(&format!("/api/v1/attendees/{}/provision", attendee_id))
        .await;
    assert_eq!(response.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(fixture.provisioner.apply_calls().await, 0);
}
