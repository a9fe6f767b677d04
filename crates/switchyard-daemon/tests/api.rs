//! REST API tests against the in-memory control plane

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use switchyard_control::Action;
use switchyard_daemon::{DaemonConfig, Server};
use switchyard_types::{ManualClock, ServiceKey};
use tower::ServiceExt;

const SERVICE: &str = "/api/v1/services/acme/prod/api";

struct Harness {
    server: Server,
    app: Router,
    clock: Arc<ManualClock>,
}

impl Harness {
    fn new() -> Self {
        let clock = Arc::new(ManualClock::starting_now());
        let server = Server::with_clock(DaemonConfig::default(), clock.clone());
        let app = server.router();
        Self { server, app, clock }
    }

    fn key() -> ServiceKey {
        ServiceKey::new("acme", "prod", "api")
    }

    async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(body) => Body::from(body.to_string()),
                None => Body::empty(),
            })
            .unwrap();

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn publish(&self, version: &str) {
        let artifact = json!({
            "project": "acme",
            "environment": "prod",
            "service": "api",
            "version": version,
        });
        let (status, _) = self
            .send(Method::POST, "/api/v1/artifacts", Some(artifact.clone()))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, body) = self
            .send(Method::POST, "/api/v1/artifacts/ready", Some(artifact))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ready"], true);
    }

    async fn put_recreate(&self, version: &str) -> (StatusCode, Value) {
        let spec = json!({
            "version": version,
            "replicas": 2,
            "strategy": { "type": "recreate" },
        });
        self.send(Method::PUT, &format!("{SERVICE}/spec"), Some(spec))
            .await
    }

    /// Run reconcile passes until the loop has nothing left to do
    async fn settle(&self) {
        let key = Self::key();
        for _ in 0..50 {
            match self.server.state().plane.reconciler.reconcile(&key).await {
                Action::Requeue(delay) => self.clock.advance(delay),
                Action::AwaitChange => return,
            }
        }
        panic!("reconcile loop did not settle");
    }
}

#[tokio::test]
async fn test_health_check() {
    let harness = Harness::new();

    let (status, body) = harness.send(Method::GET, "/api/v1/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_unknown_artifact_is_rejected() {
    let harness = Harness::new();

    let (status, body) = harness.put_recreate("api:v1").await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "UNPROCESSABLE");
    assert!(body["error"].as_str().unwrap().contains("api:v1"));
}

#[tokio::test]
async fn test_invalid_schedule_is_rejected() {
    let harness = Harness::new();
    harness.publish("api:v1").await;

    let spec = json!({
        "version": "api:v1",
        "replicas": 2,
        "strategy": { "type": "canary", "steps": [10, 50] },
    });
    let (status, _) = harness
        .send(Method::PUT, &format!("{SERVICE}/spec"), Some(spec))
        .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_spec_to_stable_release() {
    let harness = Harness::new();
    harness.publish("api:v1").await;

    let (status, body) = harness.put_recreate("api:v1").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["generation"], 1);
    assert_eq!(body["version"], "api:v1");

    // Admission enqueues the key for the workers
    let (_, daemon) = harness.send(Method::GET, "/api/v1/status", None).await;
    assert_eq!(daemon["stats"]["queue"]["ready"], 1);
    assert_eq!(daemon["stats"]["services"], 1);

    harness.settle().await;

    let (status, body) = harness
        .send(Method::GET, &format!("{SERVICE}/status"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["desired_version"], "api:v1");
    assert_eq!(body["desired_generation"], 1);
    assert_eq!(body["release"]["outcome"], "stable");
    assert_eq!(body["release"]["strategy"], "recreate");

    let (_, releases) = harness
        .send(Method::GET, &format!("{SERVICE}/releases"), None)
        .await;
    assert_eq!(releases.as_array().unwrap().len(), 1);

    let (status, release) = harness
        .send(Method::GET, &format!("{SERVICE}/releases/1"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(release["spec"]["version"], "api:v1");

    let (status, _) = harness
        .send(Method::GET, &format!("{SERVICE}/releases/9"), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_operator_rollback_resubmits_previous_version() {
    let harness = Harness::new();

    for version in ["api:v1", "api:v2"] {
        harness.publish(version).await;
        let (status, _) = harness.put_recreate(version).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        harness.settle().await;
    }

    let (status, body) = harness
        .send(Method::POST, &format!("{SERVICE}/rollback"), None)
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["action"], "resubmitted");
    assert_eq!(body["version"], "api:v1");
    assert_eq!(body["generation"], 3);

    harness.settle().await;

    let (_, status) = harness
        .send(Method::GET, &format!("{SERVICE}/status"), None)
        .await;
    assert_eq!(status["release"]["version"], "api:v1");
    assert_eq!(status["release"]["outcome"], "stable");
}

#[tokio::test]
async fn test_operator_errors() {
    let harness = Harness::new();

    let (status, body) = harness
        .send(Method::POST, &format!("{SERVICE}/abort"), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");

    let (status, _) = harness
        .send(Method::POST, &format!("{SERVICE}/rollback"), Some(json!({})))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = harness
        .send(Method::POST, &format!("{SERVICE}/rollback"), Some(json!({ "to": 0 })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = harness
        .send(Method::GET, &format!("{SERVICE}/status"), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_abort_in_flight_release() {
    let harness = Harness::new();
    harness.publish("api:v1").await;
    harness.put_recreate("api:v1").await;
    harness.settle().await;

    harness.publish("api:v2").await;
    let spec = json!({
        "version": "api:v2",
        "replicas": 2,
        "strategy": { "type": "canary", "steps": [10, 100] },
    });
    harness
        .send(Method::PUT, &format!("{SERVICE}/spec"), Some(spec))
        .await;

    // Create the release and shift the first step; no samples arrive
    let key = Harness::key();
    for _ in 0..5 {
        harness.server.state().plane.reconciler.reconcile(&key).await;
    }

    let (status, body) = harness
        .send(
            Method::POST,
            &format!("{SERVICE}/abort"),
            Some(json!({ "reason": "bad deploy" })),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["release_id"], 2);

    harness.settle().await;

    let (_, status) = harness
        .send(Method::GET, &format!("{SERVICE}/status"), None)
        .await;
    assert_eq!(status["release"]["outcome"], "rolled_back");
    assert_eq!(status["release"]["traffic"]["canary"], 0);
}

#[tokio::test]
async fn test_sample_ingestion() {
    let harness = Harness::new();

    let samples = json!({
        "version": "api:v2",
        "samples": [
            { "success": true, "latency_ms": 40 },
            { "success": false, "latency_ms": 900, "source": "probe" },
        ],
    });
    let (status, body) = harness
        .send(Method::POST, &format!("{SERVICE}/samples"), Some(samples))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["recorded"], 2);
    assert_eq!(
        harness
            .server
            .state()
            .signals
            .len(&Harness::key(), &"api:v2".into()),
        2
    );
}

#[tokio::test]
async fn test_sample_retention_follows_config() {
    let mut config = DaemonConfig::default();
    config.signals.retention_secs = 120;
    let server = Server::with_clock(config, Arc::new(ManualClock::starting_now()));
    let signals = &server.state().signals;
    assert_eq!(signals.retention(), Duration::from_secs(120));

    let key = Harness::key();
    let version = switchyard_types::ArtifactRef::new("api:v2");
    let start = chrono::Utc::now();
    for minute in 0..10 {
        signals.record(
            &key,
            &version,
            switchyard_types::Sample::ok(start + chrono::Duration::minutes(minute), 20),
        );
    }
    // Minutes 7 through 9
    assert_eq!(signals.len(&key, &version), 3);
}

#[tokio::test]
async fn test_events_are_logged() {
    let harness = Harness::new();
    let state = harness.server.state().clone();
    let (_stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(
        state
            .event_log
            .clone()
            .run(state.plane.subscribe(), stop_rx),
    );

    harness.publish("api:v1").await;
    harness.put_recreate("api:v1").await;

    for _ in 0..100 {
        if state.event_log.len().await > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let (status, events) = harness
        .send(Method::GET, "/api/v1/events?service=acme/prod/api", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(events[0]["event"]["SpecAccepted"]["generation"], 1);

    let (status, _) = harness
        .send(Method::GET, "/api/v1/events?service=acme", None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
