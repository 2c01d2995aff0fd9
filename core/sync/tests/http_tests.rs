use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use offsync_common::{Error, LogEntry, OperationKind, SyncStatus, Task};
use offsync_store::{MemoryStore, OperationLog, RecordStore, TaskRepository};
use offsync_sync::{
    BatchRequest, ConnectivityProbe, HttpRemote, Outcome, RemoteAuthority, SyncConfig, SyncEngine,
};

fn config_for(server: &MockServer) -> SyncConfig {
    SyncConfig::default()
        .with_endpoint(format!("{}/api", server.uri()))
        .with_probe_timeout(Duration::from_secs(2))
        .with_batch_timeout(Duration::from_secs(2))
}

fn sample_request() -> BatchRequest {
    let task = Task::new("T1", None).unwrap();
    let entry = LogEntry::new(
        task.id.clone(),
        OperationKind::Create,
        serde_json::to_value(&task).unwrap(),
        task.updated_at,
    );
    BatchRequest::from_entries(&[entry], Utc::now())
}

/// Accepts every item, assigning a remote id derived from the entity.
struct AcceptAll;

impl Respond for AcceptAll {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let batch: BatchRequest = match request.body_json() {
            Ok(batch) => batch,
            Err(_) => return ResponseTemplate::new(400),
        };
        let results: Vec<_> = batch
            .items
            .iter()
            .map(|item| {
                json!({
                    "entry_id": item.entry_id,
                    "status": "success",
                    "remote_id": format!("srv-{}", item.entity_id),
                })
            })
            .collect();
        ResponseTemplate::new(200).set_body_json(json!({ "results": results }))
    }
}

// ── Health check ────────────────────────────────────────────────

#[tokio::test]
async fn ping_succeeds_on_200() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/health"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let remote = HttpRemote::new(&config_for(&server)).unwrap();
    remote.ping().await.unwrap();
}

#[tokio::test]
async fn ping_fails_on_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/health"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let remote = HttpRemote::new(&config_for(&server)).unwrap();
    let err = remote.ping().await.unwrap_err();
    assert!(matches!(err, Error::Network(_)));
}

#[tokio::test]
async fn probe_false_on_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/health"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let remote = Arc::new(HttpRemote::new(&config_for(&server)).unwrap());
    let probe = ConnectivityProbe::new(remote, Duration::from_secs(2));
    assert!(!probe.is_reachable().await);
}

#[tokio::test]
async fn probe_false_on_slow_health_check() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/health"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let remote = Arc::new(HttpRemote::new(&config_for(&server)).unwrap());
    let probe = ConnectivityProbe::new(remote, Duration::from_millis(100));
    assert!(!probe.is_reachable().await);
}

#[tokio::test]
async fn probe_false_when_nothing_listens() {
    let server = MockServer::start().await;
    let config = config_for(&server);
    drop(server);

    let remote = Arc::new(HttpRemote::new(&config).unwrap());
    let probe = ConnectivityProbe::new(remote, Duration::from_secs(2));
    assert!(!probe.is_reachable().await);
}

// ── Batch exchange ──────────────────────────────────────────────

#[tokio::test]
async fn push_batch_posts_json_and_decodes_outcomes() {
    let server = MockServer::start().await;
    let request = sample_request();
    let entry_id = request.items[0].entry_id.clone();

    Mock::given(method("POST"))
        .and(path("/api/sync/batch"))
        .and(header("content-type", "application/json"))
        .and(body_partial_json(json!({
            "items": [{ "entry_id": entry_id, "operation": "create" }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{ "entry_id": entry_id, "status": "success", "remote_id": "R1" }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let remote = HttpRemote::new(&config_for(&server)).unwrap();
    let response = remote.push_batch(&request).await.unwrap();

    assert_eq!(response.results.len(), 1);
    let (id, outcome) = response.results[0].clone().into_outcome();
    assert_eq!(id, entry_id);
    match outcome {
        Outcome::Success { remote_id } => assert_eq!(remote_id.unwrap().as_str(), "R1"),
        other => panic!("expected success, got {:?}", other),
    }
}

#[tokio::test]
async fn push_batch_rejects_malformed_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/sync/batch"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let remote = HttpRemote::new(&config_for(&server)).unwrap();
    let err = remote.push_batch(&sample_request()).await.unwrap_err();
    assert!(matches!(err, Error::Protocol(_)));
}

#[tokio::test]
async fn push_batch_reports_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/sync/batch"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let remote = HttpRemote::new(&config_for(&server)).unwrap();
    match remote.push_batch(&sample_request()).await {
        Err(Error::Network(message)) => {
            assert!(message.contains("502"));
            assert!(message.contains("bad gateway"));
        }
        other => panic!("expected network error, got {:?}", other),
    }
}

#[tokio::test]
async fn push_batch_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/sync/batch"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "results": [] }))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let config = config_for(&server).with_batch_timeout(Duration::from_millis(100));
    let remote = HttpRemote::new(&config).unwrap();
    let err = remote.push_batch(&sample_request()).await.unwrap_err();
    assert!(err.is_transport());
}

// ── Full cycle ──────────────────────────────────────────────────

#[tokio::test]
async fn engine_cycle_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/sync/batch"))
        .respond_with(AcceptAll)
        .expect(2)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let repo = TaskRepository::new(store.clone());
    let config = config_for(&server).with_batch_size(2);
    let remote = Arc::new(HttpRemote::new(&config).unwrap());
    let engine = SyncEngine::new(store.clone(), remote, config).unwrap();

    let tasks: Vec<Task> = (1..=3)
        .map(|i| repo.create(format!("T{}", i), None).unwrap())
        .collect();

    let result = engine.run_sync_cycle().await;

    assert!(result.success);
    assert_eq!(result.synced, 3);
    assert_eq!(store.total_count().unwrap(), 0);
    for task in &tasks {
        let synced = store.get(&task.id).unwrap().unwrap();
        assert_eq!(synced.sync_status, SyncStatus::Synced);
        assert_eq!(
            synced.remote_id.unwrap().as_str(),
            format!("srv-{}", task.id)
        );
    }
}

#[tokio::test]
async fn engine_aborts_when_health_check_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/health"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/sync/batch"))
        .respond_with(AcceptAll)
        .expect(0)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let repo = TaskRepository::new(store.clone());
    let config = config_for(&server);
    let remote = Arc::new(HttpRemote::new(&config).unwrap());
    let engine = SyncEngine::new(store.clone(), remote, config).unwrap();
    repo.create("T1", None).unwrap();

    let result = engine.run_sync_cycle().await;

    assert!(result.aborted.is_some());
    let entries = store.drain(u32::MAX).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].retry_count, 0);
}
