use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use blnet_client::{ClientConfig, RetryingFetcher, TcpTransport};
use poller_actor::{PollOrchestrator, TickOutcome};
use state_store::{SqliteStore, StateStore, StateValue, CONNECTION_STATE};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

const RECORD_LEN: usize = 57;

fn record() -> Vec<u8> {
    let mut bytes = vec![0u8; RECORD_LEN];
    bytes[0] = 0x80;
    // S01: 52.3 °C, S02: -5.0 °C
    bytes[1..5].copy_from_slice(&[0x0B, 0x22, 0xCE, 0xAF]);
    // A02 on
    bytes[33] = 0x02;
    bytes[35..39].copy_from_slice(&[30, 14, 0, 158]);
    bytes
}

/// Serves every connection until aborted, answering by opcode the way a
/// BL-NET bridge in single-device mode does.
async fn spawn_bridge(opcodes: Arc<Mutex<Vec<u8>>>) -> (u16, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    let handle = tokio::spawn(async move {
        loop {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut opcode = [0u8; 1];
            socket.read_exact(&mut opcode).await.expect("read opcode");
            opcodes.lock().expect("opcodes").push(opcode[0]);
            let reply = match opcode[0] {
                0x81 => vec![0x42, 0x17],
                0xAA => {
                    let mut header = vec![0u8; 13];
                    header[5] = 0x76;
                    header
                }
                0x82 => vec![160],
                0x21 => vec![0x80],
                0xAB => {
                    let mut bytes = record();
                    // Trailing bytes after the record are dropped.
                    bytes.extend_from_slice(&[0xEE, 0xEE]);
                    bytes
                }
                _ => continue,
            };
            socket.write_all(&reply).await.expect("write reply");
        }
    });
    (port, handle)
}

#[tokio::test]
async fn e2e_probe_poll_and_persist() {
    let opcodes = Arc::new(Mutex::new(Vec::new()));
    let (port, bridge) = spawn_bridge(opcodes.clone()).await;

    let path = temp_db_path("e2e_harness");
    let store = Arc::new(
        SqliteStore::new(path.to_str().expect("path"))
            .await
            .expect("store init"),
    );

    let transport = TcpTransport::new(ClientConfig {
        host: "127.0.0.1".to_string(),
        port,
        quiet_period_ms: 20,
        timeout_ms: 1_000,
        ..ClientConfig::default()
    });
    let mut poller = PollOrchestrator::new(RetryingFetcher::new(transport, 5), store.clone());

    assert_eq!(poller.tick().await, TickOutcome::Initialized);
    assert_eq!(poller.tick().await, TickOutcome::Polled);
    bridge.abort();

    assert_eq!(
        *opcodes.lock().expect("opcodes"),
        vec![0x81, 0xAA, 0x82, 0x21, 0xAB, 0xAB]
    );

    let value = |name: &'static str| {
        let store = store.clone();
        async move {
            store
                .get(name)
                .await
                .expect("get")
                .unwrap_or_else(|| panic!("missing {name}"))
                .value
        }
    };

    assert_eq!(value(CONNECTION_STATE).await, StateValue::Bool(true));
    assert_eq!(
        value("info.module_id").await,
        StateValue::Text("4217".to_string())
    );
    assert_eq!(value("info.mode").await, StateValue::Text("1DL".to_string()));
    assert_eq!(value("info.firmware").await, StateValue::Text("1.6".to_string()));
    assert_eq!(value("inputs.S01").await, StateValue::Number(52.3));
    assert_eq!(value("inputs.S02").await, StateValue::Number(-5.0));
    assert_eq!(value("outputs.A02").await, StateValue::Text("ON".to_string()));
    assert_eq!(value("speeds.DzA1").await, StateValue::Number(30.0));
    assert!(store.get("info.secondary_type").await.expect("get").is_none());

    let snapshot = store.snapshot().await.expect("snapshot");
    assert!(snapshot.iter().all(|entry| entry.ack));

    drop(poller);
    drop(store);
    cleanup_db(&path);
}

#[tokio::test]
async fn e2e_unreachable_bridge_reports_disconnected() {
    // Bind then drop to get a port nothing listens on.
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);

    let path = temp_db_path("e2e_unreachable");
    let store = Arc::new(
        SqliteStore::new(path.to_str().expect("path"))
            .await
            .expect("store init"),
    );
    let transport = TcpTransport::new(ClientConfig {
        host: "127.0.0.1".to_string(),
        port,
        quiet_period_ms: 1,
        timeout_ms: 500,
        ..ClientConfig::default()
    });
    let mut poller = PollOrchestrator::new(RetryingFetcher::new(transport, 2), store.clone());

    assert_eq!(poller.tick().await, TickOutcome::InitFailed);
    assert!(!poller.is_initialized());
    let connection = store
        .get(CONNECTION_STATE)
        .await
        .expect("get")
        .expect("present");
    assert_eq!(connection.value, StateValue::Bool(false));

    drop(poller);
    drop(store);
    cleanup_db(&path);
}

fn temp_db_path(prefix: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    let pid = std::process::id();
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    path.push(format!("{prefix}-{pid}-{ts}.sqlite"));
    path
}

fn cleanup_db(path: &PathBuf) {
    let _ = std::fs::remove_file(path);
    let wal = PathBuf::from(format!("{}-wal", path.display()));
    let shm = PathBuf::from(format!("{}-shm", path.display()));
    let _ = std::fs::remove_file(wal);
    let _ = std::fs::remove_file(shm);
}
