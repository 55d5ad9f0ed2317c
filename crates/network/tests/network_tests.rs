// crates/network/tests/network_tests.rs
//! Integration tests for the HTTP remote client against a scripted local server

use lotkeeper_core::{NaturalKey, ParkingEntry, RemoteId, Timestamp};
use lotkeeper_network::{Client, ClientConfig, ConnectionStatus, HttpRemoteClient};
use lotkeeper_resilience::{CircuitBreakerConfig, CircuitState};
use lotkeeper_sync_engine::{RemoteClient, RemoteError, RemotePayload};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Requests seen by the server, as `"METHOD /path?query"` plus body
type Seen = Arc<Mutex<Vec<(String, String)>>>;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

async fn read_request(socket: &mut TcpStream) -> (String, String) {
    let mut buffer = Vec::new();
    let mut chunk = [0_u8; 1024];
    let header_end = loop {
        let n = socket.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            break buffer.len();
        }
        buffer.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
    let content_length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);
    while buffer.len() < header_end + content_length {
        let n = socket.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
    }

    let request_line = head.lines().next().unwrap_or_default();
    let target: Vec<&str> = request_line.split_whitespace().take(2).collect();
    let body = String::from_utf8_lossy(&buffer[header_end..]).to_string();
    (target.join(" "), body)
}

/// Serves `responses` in order, one connection each, and records the requests
async fn spawn_server(responses: Vec<(&str, &str)>) -> (String, Seen) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind test server");
    let address = listener.local_addr().expect("local address");
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));

    let responses: Vec<String> = responses
        .into_iter()
        .map(|(status_line, body)| {
            format!(
                "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                body.len(),
                body
            )
        })
        .collect();

    let recorder = Arc::clone(&seen);
    tokio::spawn(async move {
        for response in responses {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let request = read_request(&mut socket).await;
            recorder.lock().unwrap().push(request);
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });

    (format!("http://{address}/api/v1"), seen)
}

fn remote(base_url: &str) -> HttpRemoteClient {
    HttpRemoteClient::with_config(ClientConfig {
        base_url: base_url.to_string(),
        timeout: Duration::from_secs(5),
        ..Default::default()
    })
    .unwrap()
}

fn payload() -> RemotePayload {
    let entry = ParkingEntry::new(
        "Blue Dart",
        "Trailer",
        "KA01AB1234",
        Timestamp::from_millis(1_705_312_800_000),
    );
    RemotePayload::from_entry(&entry).unwrap()
}

#[tokio::test]
async fn test_health_check_tracks_status() {
    init_logging();
    let (base, seen) = spawn_server(vec![("200 OK", r#"{"status":"ok"}"#)]).await;
    let client = remote(&base);

    assert!(client.check_connectivity().await);
    assert_eq!(client.connection_status(), ConnectionStatus::Online);
    assert_eq!(seen.lock().unwrap()[0].0, "GET /api/v1/health");
}

#[tokio::test]
async fn test_unreachable_service() {
    // Bind then drop to get a port nobody listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    drop(listener);

    let client = remote(&format!("http://{address}"));
    assert!(!client.check_connectivity().await);
    assert_eq!(client.connection_status(), ConnectionStatus::Offline);

    let err = client.create_entry(&payload()).await.unwrap_err();
    assert!(matches!(err, RemoteError::Unreachable(_)), "{err:?}");
}

#[tokio::test]
async fn test_create_sends_wire_payload() {
    let (base, seen) = spawn_server(vec![("201 Created", r#"{"id":"srv-7"}"#)]).await;
    let client = remote(&base);

    let id = client.create_entry(&payload()).await.unwrap();
    assert_eq!(id, RemoteId::new("srv-7"));

    let (target, body) = seen.lock().unwrap()[0].clone();
    assert_eq!(target, "POST /api/v1/entries");
    let sent: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(sent["schema"], "entry.v1");
    assert_eq!(sent["vehicle_number"], "KA01AB1234");
    assert_eq!(sent["parking_fee"], "0.00");
}

#[tokio::test]
async fn test_conflict_maps_to_duplicate_key() {
    let (base, _) = spawn_server(vec![
        ("409 Conflict", r#"{"error":"duplicate","id":"srv-3"}"#),
        ("409 Conflict", r#"{"error":"duplicate"}"#),
    ])
    .await;
    let client = remote(&base);

    let err = client.create_entry(&payload()).await.unwrap_err();
    assert_eq!(
        err,
        RemoteError::DuplicateKey {
            existing: Some(RemoteId::new("srv-3"))
        }
    );

    let err = client.create_entry(&payload()).await.unwrap_err();
    assert_eq!(err, RemoteError::DuplicateKey { existing: None });
}

#[tokio::test]
async fn test_status_codes_are_classified() {
    let (base, seen) = spawn_server(vec![
        ("404 Not Found", r#"{"error":"no such entry"}"#),
        ("422 Unprocessable Entity", r#"{"message":"fee must be positive"}"#),
        ("503 Service Unavailable", ""),
    ])
    .await;
    let client = remote(&base);
    let id = RemoteId::new("srv 9");

    let err = client.update_entry(&id, &payload()).await.unwrap_err();
    assert!(matches!(err, RemoteError::NotFound(_)), "{err:?}");

    let err = client.update_entry(&id, &payload()).await.unwrap_err();
    match err {
        RemoteError::Permanent(message) => assert!(message.contains("fee must be positive")),
        other => panic!("expected permanent rejection, got {other:?}"),
    }

    let err = client.delete_entry(&id).await.unwrap_err();
    assert!(matches!(err, RemoteError::Transient(_)), "{err:?}");

    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].0, "PUT /api/v1/entries/srv%209");
    assert_eq!(seen[2].0, "DELETE /api/v1/entries/srv%209");
}

#[tokio::test]
async fn test_list_since_checkpoint() {
    let body = r#"{
        "entries": [{
            "schema": "entry.v1",
            "id": "srv-1",
            "transport_name": "Blue Dart",
            "vehicle_type": "Trailer",
            "vehicle_number": "KA01AB1234",
            "entry_time": "2024-01-15T10:00:00Z",
            "status": "Parked",
            "parking_fee": 225.00,
            "payment_status": "Unpaid",
            "last_modified": "2024-01-15T10:00:00Z"
        }],
        "checkpoint": "c-42"
    }"#;
    let (base, seen) = spawn_server(vec![("200 OK", body)]).await;
    let client = remote(&base);

    let changes = client.list_entries_since(Some("c-41")).await.unwrap();
    assert_eq!(changes.entries.len(), 1);
    assert_eq!(changes.entries[0].remote_id(), Some(RemoteId::new("srv-1")));
    assert_eq!(changes.checkpoint.as_deref(), Some("c-42"));
    assert_eq!(seen.lock().unwrap()[0].0, "GET /api/v1/entries?since=c-41");
}

#[tokio::test]
async fn test_lookup_by_natural_key() {
    let (base, seen) = spawn_server(vec![
        ("200 OK", r#"{"id":"srv-5"}"#),
        ("404 Not Found", ""),
    ])
    .await;
    let client = remote(&base);
    let key = NaturalKey::new("ka01ab1234", Timestamp::from_millis(1_705_312_800_000));

    assert_eq!(
        client.find_by_natural_key(&key).await.unwrap(),
        Some(RemoteId::new("srv-5"))
    );
    assert_eq!(client.find_by_natural_key(&key).await.unwrap(), None);

    let target = seen.lock().unwrap()[0].0.clone();
    assert!(target.starts_with("GET /api/v1/entries/lookup?vehicle_number=KA01AB1234"));
    assert!(target.contains("entry_time=2024-01-15T10%3A00%3A00.000Z"));
}

#[tokio::test]
async fn test_breaker_opens_after_server_failures() {
    let (base, seen) = spawn_server(vec![
        ("500 Internal Server Error", ""),
        ("502 Bad Gateway", ""),
        ("200 OK", r#"{"id":"srv-1"}"#),
    ])
    .await;
    let client = HttpRemoteClient::new(
        Client::with_config(ClientConfig {
            base_url: base,
            circuit_breaker_config: Some(CircuitBreakerConfig::new(2, Duration::from_secs(60))),
            ..Default::default()
        })
        .unwrap(),
    );

    for _ in 0..2 {
        let err = client.create_entry(&payload()).await.unwrap_err();
        assert!(matches!(err, RemoteError::Transient(_)));
    }
    assert_eq!(client.client().circuit_state(), Some(CircuitState::Open));

    // Fails fast without touching the server
    let err = client.create_entry(&payload()).await.unwrap_err();
    assert!(matches!(err, RemoteError::Unreachable(_)), "{err:?}");
    assert_eq!(seen.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_client_errors_do_not_open_breaker() {
    let (base, _) = spawn_server(vec![
        ("400 Bad Request", ""),
        ("400 Bad Request", ""),
        ("400 Bad Request", ""),
    ])
    .await;
    let client = HttpRemoteClient::new(
        Client::with_config(ClientConfig {
            base_url: base,
            circuit_breaker_config: Some(CircuitBreakerConfig::new(2, Duration::from_secs(60))),
            ..Default::default()
        })
        .unwrap(),
    );

    for _ in 0..3 {
        let err = client.delete_entry(&RemoteId::new("srv-1")).await.unwrap_err();
        assert!(matches!(err, RemoteError::Permanent(_)));
    }
    assert_eq!(client.client().circuit_state(), Some(CircuitState::Closed));
}
