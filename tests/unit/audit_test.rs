//! Tests for the decision audit sinks

use std::io;
use std::sync::Arc;

use parking_lot::Mutex;
use steward::core::{
    build_decision_event, AuditSink, DecisionEvent, DecisionKind, InMemoryAuditSink,
    TracingAuditSink,
};

#[test]
fn test_in_memory_audit_sink() {
    let mut sink = InMemoryAuditSink::new(10);

    let event = build_decision_event(
        3,
        1_000,
        DecisionKind::Preemption,
        "scan",
        Some("watcher popup".to_string()),
    );

    sink.record(event.clone());
    assert_eq!(sink.events().len(), 1);

    let events = sink.events();
    assert_eq!(events[0], event);
    assert_eq!(events[0].tick, 3);
    assert_eq!(events[0].subject, "scan");
}

#[test]
fn test_audit_sink_overflow() {
    let mut sink = InMemoryAuditSink::new(2);

    sink.record(build_decision_event(1, 0, DecisionKind::TaskStarted, "a", None));
    sink.record(build_decision_event(2, 0, DecisionKind::TaskStarted, "b", None));
    sink.record(build_decision_event(3, 0, DecisionKind::TaskStarted, "c", None));

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].subject, "b"); // First one popped
    assert_eq!(events[1].subject, "c");
}

#[test]
fn test_filter_and_clear() {
    let mut sink = InMemoryAuditSink::new(10);
    sink.record(build_decision_event(1, 0, DecisionKind::TaskFailed, "a", None));
    sink.record(build_decision_event(1, 0, DecisionKind::TaskSuspended, "a", None));
    sink.record(build_decision_event(2, 0, DecisionKind::TaskFailed, "b", None));

    let failed = sink.of_kind(DecisionKind::TaskFailed);
    assert_eq!(failed.len(), 2);
    assert!(failed.iter().all(|e| e.kind == DecisionKind::TaskFailed));

    sink.clear();
    assert!(sink.events().is_empty());
}

#[test]
fn test_event_ids_are_unique() {
    let a = build_decision_event(1, 0, DecisionKind::CommandApplied, "pause", None);
    let b = build_decision_event(1, 0, DecisionKind::CommandApplied, "pause", None);
    assert_ne!(a.event_id, b.event_id);
}

#[test]
fn test_json_line_round_trip() {
    let event = build_decision_event(
        9,
        42,
        DecisionKind::RecoveryFailed,
        "restart:frozen",
        Some("timed out after 60000 ms".into()),
    );
    let line = event.to_json_line();
    assert!(!line.contains('\n'));
    assert!(line.contains(r#""kind":"recovery_failed""#));
    let back: DecisionEvent = serde_json::from_str(&line).unwrap();
    assert_eq!(back, event);
}

#[test]
fn test_tracing_sink_accepts_events() {
    let mut sink = TracingAuditSink;
    sink.record(build_decision_event(1, 0, DecisionKind::WatcherHandled, "popup", None));
}

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_tracing_sink_logs_engine_timestamp_and_id() {
    let captured = Captured::default();
    let writer = captured.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .finish();

    let event = build_decision_event(3, 42_000, DecisionKind::TaskFailed, "scan", None);
    let id = event.event_id.clone();
    tracing::subscriber::with_default(subscriber, || TracingAuditSink.record(event));

    let line = String::from_utf8(captured.0.lock().clone()).unwrap();
    assert!(line.contains(&format!("event_id={id}")));
    assert!(line.contains("timestamp_ms=42000"));
    assert!(line.contains("tick=3"));
}
