use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use zk_backup_lambda::adapters::snapshot_source::{
    AdminHttpSnapshotSource, FetchError, SnapshotSource,
};
use zk_backup_lambda::runtime::contract::payload_checksum;

const FETCH_TIMEOUT: Duration = Duration::from_secs(2);

/// Serves one canned HTTP response and hands back the raw request head.
async fn serve_once(response: Vec<u8>) -> (String, oneshot::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let addr = listener.local_addr().expect("listener should have address");
    let (request_tx, request_rx) = oneshot::channel();

    tokio::spawn(async move {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };
        let head = read_request_head(&mut socket).await;
        let _ = request_tx.send(head);
        let _ = socket.write_all(&response).await;
        let _ = socket.shutdown().await;
    });

    (format!("http://{addr}"), request_rx)
}

async fn read_request_head(socket: &mut tokio::net::TcpStream) -> String {
    let mut buffer = Vec::new();
    let mut chunk = [0_u8; 1024];
    while !buffer.windows(4).any(|window| window == b"\r\n\r\n") {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(read) => buffer.extend_from_slice(&chunk[..read]),
        }
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

fn http_response(status: &str, headers: &[(&str, &str)], body: &[u8]) -> Vec<u8> {
    let mut response = format!("HTTP/1.1 {status}\r\n");
    for (name, value) in headers {
        response.push_str(&format!("{name}: {value}\r\n"));
    }
    response.push_str(&format!(
        "content-length: {}\r\nconnection: close\r\n\r\n",
        body.len()
    ));
    let mut bytes = response.into_bytes();
    bytes.extend_from_slice(body);
    bytes
}

fn source() -> AdminHttpSnapshotSource {
    AdminHttpSnapshotSource::new(None).expect("http client should build")
}

#[tokio::test]
async fn fetches_snapshot_with_hex_zxid() {
    let payload = b"zookeeper snapshot bytes";
    let (endpoint, request) = serve_once(http_response(
        "200 OK",
        &[("last_zxid", "0x2a"), ("snapshot_size", "24")],
        payload,
    ))
    .await;

    let snapshot = source()
        .fetch_snapshot(&endpoint, FETCH_TIMEOUT)
        .await
        .expect("fetch should succeed");

    assert_eq!(snapshot.logical_version(), 42);
    assert_eq!(snapshot.payload(), payload);
    assert_eq!(snapshot.checksum(), payload_checksum(payload));
    assert_eq!(snapshot.source_endpoint(), endpoint);

    let head = request.await.expect("request should be captured");
    assert!(head.starts_with("GET /commands/snapshot?streaming=true HTTP/1.1"));
}

#[tokio::test]
async fn sends_configured_authorization_header() {
    let (endpoint, request) = serve_once(http_response(
        "200 OK",
        &[("last_zxid", "7")],
        b"data",
    ))
    .await;
    let source = AdminHttpSnapshotSource::new(Some("digest backup:secret".to_string()))
        .expect("http client should build");

    let snapshot = source
        .fetch_snapshot(&endpoint, FETCH_TIMEOUT)
        .await
        .expect("fetch should succeed");

    assert_eq!(snapshot.logical_version(), 7);
    let head = request.await.expect("request should be captured");
    assert!(head
        .to_ascii_lowercase()
        .contains("authorization: digest backup:secret"));
}

#[tokio::test]
async fn client_error_status_is_protocol_error() {
    let (endpoint, _request) = serve_once(http_response("403 Forbidden", &[], b"denied")).await;

    let error = source()
        .fetch_snapshot(&endpoint, FETCH_TIMEOUT)
        .await
        .expect_err("fetch should fail");

    assert!(matches!(error, FetchError::Protocol(message) if message.contains("403")));
}

#[tokio::test]
async fn server_error_status_is_unreachable() {
    let (endpoint, _request) =
        serve_once(http_response("503 Service Unavailable", &[], b"busy")).await;

    let error = source()
        .fetch_snapshot(&endpoint, FETCH_TIMEOUT)
        .await
        .expect_err("fetch should fail");

    assert!(matches!(error, FetchError::Unreachable(_)));
}

#[tokio::test]
async fn missing_or_garbled_zxid_is_protocol_error() {
    for headers in [vec![], vec![("last_zxid", "0xnothex")]] {
        let (endpoint, _request) = serve_once(http_response("200 OK", &headers, b"data")).await;

        let error = source()
            .fetch_snapshot(&endpoint, FETCH_TIMEOUT)
            .await
            .expect_err("fetch should fail");

        assert!(
            matches!(error, FetchError::Protocol(ref message) if message.contains("last_zxid")),
            "{error:?}"
        );
    }
}

#[tokio::test]
async fn declared_size_mismatch_is_protocol_error() {
    let (endpoint, _request) = serve_once(http_response(
        "200 OK",
        &[("last_zxid", "0x10"), ("snapshot_size", "999")],
        b"short",
    ))
    .await;

    let error = source()
        .fetch_snapshot(&endpoint, FETCH_TIMEOUT)
        .await
        .expect_err("fetch should fail");

    assert!(matches!(error, FetchError::Protocol(message) if message.contains("declared 999")));
}

#[tokio::test]
async fn empty_body_is_protocol_error() {
    let (endpoint, _request) =
        serve_once(http_response("200 OK", &[("last_zxid", "0x10")], b"")).await;

    let error = source()
        .fetch_snapshot(&endpoint, FETCH_TIMEOUT)
        .await
        .expect_err("fetch should fail");

    assert_eq!(
        error,
        FetchError::Protocol("snapshot body is empty".to_string())
    );
}

#[tokio::test]
async fn refused_connection_is_unreachable() {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let addr: SocketAddr = listener.local_addr().expect("listener should have address");
    drop(listener);

    let error = source()
        .fetch_snapshot(&format!("http://{addr}"), FETCH_TIMEOUT)
        .await
        .expect_err("fetch should fail");

    assert!(matches!(error, FetchError::Unreachable(_)), "{error:?}");
}

#[tokio::test]
async fn silent_server_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let addr = listener.local_addr().expect("listener should have address");
    tokio::spawn(async move {
        if let Ok((mut socket, _)) = listener.accept().await {
            read_request_head(&mut socket).await;
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
    });

    let timeout = Duration::from_millis(200);
    let error = source()
        .fetch_snapshot(&format!("http://{addr}"), timeout)
        .await
        .expect_err("fetch should time out");

    assert_eq!(error, FetchError::Timeout(timeout));
}

#[tokio::test]
async fn malformed_endpoint_is_protocol_error() {
    let error = source()
        .fetch_snapshot("not a url", FETCH_TIMEOUT)
        .await
        .expect_err("fetch should fail");

    assert!(matches!(error, FetchError::Protocol(message) if message.contains("invalid admin endpoint")));
}
