//! Tests for the runtime driver and remote-control models

use steward::core::{EngineStatus, HostStatus, PauseFlags};
use steward::infra::{CommandInbox, CommandKind, DrainedBatch};
use steward::runtime::{health, status_json, submit_command, CommandAck, EngineDriver};

fn status(host_status: HostStatus, global: bool) -> EngineStatus {
    EngineStatus {
        tick: 7,
        timestamp_ms: 1_000,
        host_status,
        pause: PauseFlags {
            global,
            ..PauseFlags::default()
        },
        lock_holder: None,
        running_task: None,
        recovery_streak: 0,
        tasks: Vec::new(),
        watchers: Vec::new(),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_driver_from_current_runtime() {
    assert!(EngineDriver::current().is_ok());
    let driver = EngineDriver::new(tokio::runtime::Handle::current());
    assert!(format!("{driver:?}").contains("EngineDriver"));
}

#[test]
fn test_submit_command_enqueues() {
    let inbox = CommandInbox::new();
    let ack = submit_command(
        &inbox.sender(),
        r#"{"kind":"skip_task","target":"scan"}"#,
    )
    .unwrap();
    assert_eq!(
        ack,
        CommandAck {
            seq: 1,
            kind: CommandKind::SkipTask
        }
    );

    match inbox.drain_batch() {
        DrainedBatch::Ordered(commands) => {
            assert_eq!(commands.len(), 1);
            assert_eq!(commands[0].target.as_deref(), Some("scan"));
            assert_eq!(commands[0].seq, 1);
        }
        other => panic!("expected ordered batch, got {other:?}"),
    }
}

#[test]
fn test_health_summary() {
    assert!(health(&status(HostStatus::RunningIdle, false)).ok);
    assert!(!health(&status(HostStatus::RunningNormal, true)).ok);

    let frozen = health(&status(HostStatus::Frozen, false));
    assert!(!frozen.ok);
    assert!(!frozen.paused);
    assert_eq!(frozen.host_status, HostStatus::Frozen);
}

#[test]
fn test_status_json_shape() {
    let json = status_json(&status(HostStatus::Maintenance, false)).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["tick"], 7);
    assert_eq!(value["host_status"], "maintenance");
    assert_eq!(value["pause"]["global"], false);
    assert!(value["lock_holder"].is_null());
}
