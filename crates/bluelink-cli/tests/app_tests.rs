//! End-to-end checks of the CLI application against the simulated radio

use std::time::Duration;

use bluelink_cli::{AppConfig, BluelinkApp, CliError};
use bluelink_core::{Direction, SessionConfig};
use tempfile::TempDir;
use tokio_test::assert_ok;

fn simulated_app() -> BluelinkApp {
    let config = AppConfig {
        session: SessionConfig::testing(),
        ..AppConfig::default()
    };
    BluelinkApp::start(config, true).expect("simulated session starts")
}

#[tokio::test]
async fn scan_lists_demo_devices() {
    let app = simulated_app();
    let devices = app.scan(None).await.unwrap();

    assert_eq!(devices.len(), 2);
    assert!(devices.iter().any(|d| d.name.as_deref() == Some("Sim Sensor")));
    assert!(!app.store().is_scanning().await.unwrap());
    assert_ok!(app.shutdown().await);
}

#[tokio::test]
async fn resolve_scans_for_unknown_names() {
    let app = simulated_app();
    let device = app.resolve_device("sim beacon").await.unwrap();
    assert_eq!(device.name.as_deref(), Some("Sim Beacon"));

    let err = app.resolve_device("Toaster").await.unwrap_err();
    assert!(matches!(err, CliError::DeviceNotFound { .. }));
    assert_ok!(app.shutdown().await);
}

#[tokio::test]
async fn chat_round_trip_and_transcript() {
    let app = simulated_app();
    let device = app.resolve_device("Sim Sensor").await.unwrap();
    let store = app.store();

    store.connect(&device.id).await.unwrap();
    store.send("hello").await.unwrap();

    // The demo radio echoes acknowledged writes
    let mut history = Vec::new();
    for _ in 0..50 {
        history = store.messages().await.unwrap();
        if history.len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].direction, Direction::Outgoing);
    assert_eq!(history[1].direction, Direction::Incoming);
    assert_eq!(history[1].body, "hello");

    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("chat.json");
    app.transcript(device).await.unwrap().write_to(&path).unwrap();
    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(written["messages"].as_array().map(|m| m.len()), Some(2));

    let report = app.status_report().await.unwrap();
    assert_eq!(report.radio, "simulated");
    assert!(report.connected_device.is_some());
    assert_eq!(report.diagnostics.messages_sent, 1);
    assert!(!report.recent_transitions.is_empty());

    assert_ok!(app.shutdown().await);
}
