//! Client behaviour over a real on-disk queue
#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::{sync::Arc, time::Duration};

use courier::{
    Client, ClientError, CourierConfig, Envelope, FlushResult, Item, SpoolConfig,
    TransportConfig,
    delivery::MockExecutor,
    spool::{BackendConfig, FileBackingStore},
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn file_config(dir: &TempDir) -> CourierConfig {
    let store = FileBackingStore::builder()
        .path(dir.path().join("envelopes"))
        .build()
        .expect("store");

    CourierConfig {
        dsn: None,
        spool: SpoolConfig {
            backend: BackendConfig::File(store),
            ..SpoolConfig::default()
        },
        transport: TransportConfig {
            send_client_reports: false,
            shutdown_timeout_secs: 0,
            ..TransportConfig::default()
        },
    }
}

fn event(message: &str) -> Envelope {
    Envelope::new(vec![Item::new(
        "event",
        format!(r#"{{"message":"{message}"}}"#),
    )])
}

#[test]
fn test_queued_envelopes_survive_restart() {
    let dir = TempDir::new().expect("tempdir");

    let offline = MockExecutor::new();
    offline.go_offline();
    {
        let client =
            Client::with_executor(file_config(&dir), Arc::new(offline.clone()), None)
                .expect("client");
        client.capture_envelope(event("first")).expect("capture");
        client.capture_envelope(event("second")).expect("capture");

        assert!(client.transport().wait_idle(Duration::from_secs(5)));
        assert_eq!(client.transport().queue().len(), 2);
        assert_eq!(client.close(), FlushResult::TimedOut);
    }
    assert_eq!(offline.attempts(), 0);

    let online = MockExecutor::new();
    let client =
        Client::with_executor(file_config(&dir), Arc::new(online.clone()), None).expect("client");

    assert_eq!(client.flush(Duration::from_secs(5)), FlushResult::Success);
    assert_eq!(online.attempts(), 2);
    assert!(client.transport().queue().is_empty());

    let messages: Vec<_> = online
        .requests()
        .iter()
        .map(|request| Envelope::from_bytes(&request.body).expect("decode"))
        .map(|envelope| String::from_utf8(envelope.items[0].payload.clone()).expect("utf8"))
        .collect();
    assert_eq!(
        messages,
        vec![r#"{"message":"first"}"#, r#"{"message":"second"}"#]
    );
}

#[test]
fn test_missing_dsn_is_rejected() {
    let dir = TempDir::new().expect("tempdir");

    let result = Client::from_config(file_config(&dir));
    assert!(matches!(result, Err(ClientError::MissingDsn)));
}

#[test]
fn test_malformed_dsn_is_rejected() {
    let dir = TempDir::new().expect("tempdir");
    let config = CourierConfig {
        dsn: Some("not a dsn".to_string()),
        ..file_config(&dir)
    };

    assert!(matches!(
        Client::from_config(config),
        Err(ClientError::Dsn(_))
    ));
}

#[test]
fn test_config_file_round_trip() {
    let dir = TempDir::new().expect("tempdir");
    let queue_dir = dir.path().join("queue");
    let path = dir.path().join("courier.config.toml");

    std::fs::write(
        &path,
        format!(
            r#"
            dsn = "https://key@o1.ingest.example.com/42"

            [spool]
            max_envelopes = 5

            [spool.backend]
            type = "File"
            path = "{}"
            "#,
            queue_dir.display()
        ),
    )
    .expect("write config");

    let config = CourierConfig::from_file(&path).expect("config");
    assert_eq!(config.spool.path(), Some(queue_dir.as_path()));

    let client = Client::from_config(config).expect("client");
    assert_eq!(client.transport().queue().max_envelopes(), 5);
    assert!(queue_dir.is_dir());
}

#[test]
fn test_disabled_client_accepts_and_drops() {
    let dir = TempDir::new().expect("tempdir");
    let mut config = file_config(&dir);
    config.transport.enabled = false;

    let executor = MockExecutor::new();
    let client = Client::with_executor(config, Arc::new(executor.clone()), None).expect("client");

    client.capture_envelope(event("dropped")).expect("capture");

    assert_eq!(client.flush(Duration::from_secs(1)), FlushResult::Success);
    assert!(client.transport().queue().is_empty());
    assert_eq!(executor.attempts(), 0);
}
