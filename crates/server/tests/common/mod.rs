//! In-process server fixture for API tests.
//!
//! Builds the real router over SQLite stores in a temp directory, with the
//! mock provisioner standing in for the cloud tooling. The scheduler runs with
//! no periodic jobs so tests decide when work happens.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use provisioner_core::{
    create_audit_system, notify::NotificationHandle, testing::MockProvisioner, AuditStore, Config,
    LifecycleOrchestrator, OrchestratorConfig, Scheduler, SqliteAuditStore,
    SqliteDeploymentRecorder, SqliteWorkshopStore,
};
use provisioner_server::{api::create_router, state::AppState};

pub use provisioner_core::testing::fixtures;

pub struct TestFixture {
    pub router: Router,
    pub provisioner: Arc<MockProvisioner>,
    pub workshops: Arc<SqliteWorkshopStore>,
    pub deployments: Arc<SqliteDeploymentRecorder>,
    pub scheduler: Arc<Scheduler>,
    /// Temporary directory holding the test database
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
    pub text: String,
}

impl TestFixture {
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        let mut config = Config::default();
        config.database.path = db_path.clone();

        let audit_store: Arc<dyn AuditStore> =
            Arc::new(SqliteAuditStore::new(&db_path).expect("Failed to create audit store"));
        let workshops =
            Arc::new(SqliteWorkshopStore::new(&db_path).expect("Failed to create workshop store"));
        let deployments = Arc::new(
            SqliteDeploymentRecorder::new(&db_path).expect("Failed to create deployment recorder"),
        );
        let provisioner = Arc::new(MockProvisioner::new());

        let (audit_handle, audit_writer) = create_audit_system(Arc::clone(&audit_store), 100);
        tokio::spawn(audit_writer.run());

        let orchestrator = Arc::new(LifecycleOrchestrator::new(
            OrchestratorConfig {
                operation_timeout_secs: 5,
                ..Default::default()
            },
            workshops.clone(),
            deployments.clone(),
            provisioner.clone(),
            Some(audit_handle.clone()),
            NotificationHandle::disabled(),
        ));

        let scheduler = Arc::new(Scheduler::new(&config.scheduler, Some(audit_handle)));
        scheduler.start();

        let state = Arc::new(AppState::new(
            config,
            workshops.clone(),
            orchestrator,
            Arc::clone(&scheduler),
            audit_store,
        ));

        Self {
            router: create_router(state),
            provisioner,
            workshops,
            deployments,
            scheduler,
            temp_dir,
        }
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// POST without a body.
    pub async fn post_empty(&self, path: &str) -> TestResponse {
        self.request("POST", path, None).await
    }

    pub async fn put(&self, path: &str, body: Value) -> TestResponse {
        self.request("PUT", path, Some(body)).await
    }

    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        let request = request_builder.body(body).unwrap();

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let text = String::from_utf8_lossy(&body_bytes).to_string();
        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body, text }
    }

    /// Create a workshop through the API and return its id.
    pub async fn create_workshop(&self, name: &str) -> String {
        let request = fixtures::workshop_request(name);
        let response = self
            .post("/api/v1/workshops", serde_json::to_value(&request).unwrap())
            .await;
        assert_eq!(response.status, StatusCode::CREATED, "{}", response.text);
        response.body["id"].as_str().unwrap().to_string()
    }

    /// Add an attendee through the API and return its id.
    pub async fn add_attendee(&self, workshop_id: &str, email: &str) -> String {
        let response = self
            .post(
                &format!("/api/v1/workshops/{}/attendees", workshop_id),
                serde_json::json!({ "name": "Test Attendee", "email": email }),
            )
            .await;
        assert_eq!(response.status, StatusCode::CREATED, "{}", response.text);
        response.body["id"].as_str().unwrap().to_string()
    }

    /// Poll until the attendee reaches `status`, or give up after ~5s.
    pub async fn wait_for_attendee_status(&self, attendee_id: &str, status: &str) -> bool {
        for _ in 0..100 {
            let response = self
                .get(&format!("/api/v1/attendees/{}/status", attendee_id))
                .await;
            if response.body["attendee"]["status"] == status
                && response.body["open_deployment"].is_null()
            {
                return true;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        false
    }
}
