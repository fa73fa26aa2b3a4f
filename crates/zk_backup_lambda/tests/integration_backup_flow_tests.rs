use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use zk_backup_lambda::adapters::object_store::StoreError;
use zk_backup_lambda::adapters::snapshot_source::AdminHttpSnapshotSource;
use zk_backup_lambda::handlers::entry::BackupHandler;
use zk_backup_lambda::runtime::config::BackupConfig;
use zk_backup_lambda::runtime::contract::{payload_checksum, ScheduleTick};
use zk_backup_lambda::test_helpers::{snapshot, MemoryObjectStore, ScriptedSnapshotSource};

fn config(endpoint: &str) -> BackupConfig {
    let pairs = [
        ("ZK_ADMIN_URL", endpoint.to_string()),
        ("ZK_BACK_FOLDER_NAME", "zk-backups".to_string()),
        ("REGION", "eu-central-1".to_string()),
        ("SOURCE_ID", "node1".to_string()),
        ("RETRY_BACKOFF_MS", "0".to_string()),
    ];
    BackupConfig::from_lookup(|name| {
        pairs
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.clone())
    })
    .expect("test config should load")
}

fn scheduled_tick() -> ScheduleTick {
    ScheduleTick::from_event(json!({
        "id": "cdc73f9d-aea9-11e3-9d5a-835b769c0d9c",
        "detail-type": "Scheduled Event",
        "source": "aws.events",
        "time": "2026-02-14T03:00:00Z",
        "resources": ["arn:aws:events:eu-central-1:123456789012:rule/zk-backup"],
        "detail": {}
    }))
}

#[tokio::test]
async fn repeated_and_corrupt_runs_for_the_same_version() {
    let handler = BackupHandler::new(
        config("http://node1:8080"),
        ScriptedSnapshotSource::new(vec![
            Ok(snapshot("http://node1:8080", 42, b"data-42")),
            Ok(snapshot("http://node1:8080", 42, b"data-42")),
            Ok(snapshot("http://node1:8080", 42, b"data-42-corrupt")),
        ]),
        MemoryObjectStore::new(),
    );
    let tick = scheduled_tick();

    let first = handler
        .handle(&tick, None)
        .await
        .expect("first run should succeed");
    assert_eq!(first.key, "node1/42.snapshot");
    assert_eq!(first.write, "written");
    assert_eq!(first.checksum, payload_checksum(b"data-42"));

    let second = handler
        .handle(&tick, None)
        .await
        .expect("second run should succeed");
    assert_eq!(second.key, "node1/42.snapshot");
    assert_eq!(second.write, "already_present");

    let third = handler
        .handle(&tick, None)
        .await
        .expect_err("corrupt run should fail");
    assert_eq!(third.attempts, 1);
    assert!(third.detail.contains("key collision"), "{}", third.detail);

    let store = handler.orchestrator().writer().store();
    assert_eq!(store.keys(), vec!["node1/42.snapshot".to_string()]);
    assert_eq!(store.body("node1/42.snapshot"), Some(b"data-42".to_vec()));
    assert_eq!(store.put_calls(), 1);
}

#[tokio::test]
async fn each_new_version_lands_under_its_own_key() {
    let handler = BackupHandler::new(
        config("http://node1:8080"),
        ScriptedSnapshotSource::new(vec![
            Ok(snapshot("http://node1:8080", 42, b"data-42")),
            Ok(snapshot("http://node1:8080", 43, b"data-43")),
        ]),
        MemoryObjectStore::new(),
    );

    handler
        .handle(&ScheduleTick::default(), None)
        .await
        .expect("first run should succeed");
    handler
        .handle(&ScheduleTick::default(), None)
        .await
        .expect("second run should succeed");

    assert_eq!(
        handler.orchestrator().writer().store().keys(),
        vec!["node1/42.snapshot".to_string(), "node1/43.snapshot".to_string()]
    );
}

#[tokio::test]
async fn persistent_unavailability_fails_after_bounded_attempts() {
    let store = MemoryObjectStore::new();
    for _ in 0..10 {
        store.fail_next_put(StoreError::Unavailable("503 SlowDown".to_string()));
    }
    let handler = BackupHandler::new(
        config("http://node1:8080"),
        ScriptedSnapshotSource::always(snapshot("http://node1:8080", 42, b"data-42")),
        store,
    );

    let failure = handler
        .handle(&ScheduleTick::default(), None)
        .await
        .expect_err("run should fail");

    assert_eq!(failure.attempts, 3);
    assert_eq!(handler.orchestrator().source().calls(), 3);
    assert_eq!(handler.orchestrator().writer().store().put_calls(), 3);
}

/// Admin endpoint that answers each connection with the next canned response.
async fn admin_endpoint(responses: Vec<Vec<u8>>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let addr = listener.local_addr().expect("listener should have address");

    tokio::spawn(async move {
        for response in responses {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let mut buffer = Vec::new();
            let mut chunk = [0_u8; 1024];
            while !buffer.windows(4).any(|window| window == b"\r\n\r\n") {
                match socket.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(read) => buffer.extend_from_slice(&chunk[..read]),
                }
            }
            let _ = socket.write_all(&response).await;
            let _ = socket.shutdown().await;
        }
    });

    format!("http://{addr}")
}

fn snapshot_response(zxid: &str, body: &[u8]) -> Vec<u8> {
    let mut response = format!(
        "HTTP/1.1 200 OK\r\nlast_zxid: {zxid}\r\nsnapshot_size: {}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
        body.len(),
        body.len()
    )
    .into_bytes();
    response.extend_from_slice(body);
    response
}

#[tokio::test]
async fn recovers_from_busy_admin_endpoint_over_http() {
    let endpoint = admin_endpoint(vec![
        b"HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
            .to_vec(),
        snapshot_response("0x2a", b"data-42"),
    ])
    .await;
    let handler = BackupHandler::new(
        config(&endpoint),
        AdminHttpSnapshotSource::new(None).expect("http client should build"),
        MemoryObjectStore::new(),
    );

    let response = handler
        .handle(&scheduled_tick(), Some(Duration::from_secs(10)))
        .await
        .expect("run should recover");

    assert_eq!(response.key, "node1/42.snapshot");
    assert_eq!(response.attempts, 2);
    assert_eq!(
        handler
            .orchestrator()
            .writer()
            .store()
            .body("node1/42.snapshot"),
        Some(b"data-42".to_vec())
    );
}

#[tokio::test]
async fn response_serializes_for_the_runtime() {
    let handler = BackupHandler::new(
        config("http://node1:8080"),
        ScriptedSnapshotSource::always(snapshot("http://node1:8080", 42, b"data-42")),
        MemoryObjectStore::new(),
    );

    let response = handler
        .handle(&ScheduleTick::default(), None)
        .await
        .expect("run should succeed");

    let value = serde_json::to_value(&response).expect("response should serialize");
    assert_eq!(value["status"], "ok");
    assert_eq!(value["key"], "node1/42.snapshot");
    assert_eq!(value["logical_version"], 42);
    assert_eq!(value["schema_version"], "v1");
}
