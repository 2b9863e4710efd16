//! Tests for audit sink

use prometheus_orchestrator::core::{build_audit_event, AuditSink, InMemoryAuditSink, TaskState};

#[test]
fn test_in_memory_audit_sink() {
    let mut sink = InMemoryAuditSink::new(10);
    let task_id = uuid::Uuid::new_v4();

    let event = build_audit_event(
        task_id,
        "submit",
        None,
        Some(TaskState::Pending),
        Some("detail".to_string()),
    );

    sink.record(event);
    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].task_id, task_id);
    assert_eq!(events[0].action, "submit");
    assert_eq!(events[0].to, Some(TaskState::Pending));
}

#[test]
fn test_audit_sink_overflow() {
    let mut sink = InMemoryAuditSink::new(2);
    let ids: Vec<_> = (0..3).map(|_| uuid::Uuid::new_v4()).collect();

    for id in &ids {
        sink.record(build_audit_event(*id, "submit", None, Some(TaskState::Pending), None));
    }

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].task_id, ids[1]); // First one popped
    assert_eq!(events[1].task_id, ids[2]);
}

#[test]
fn test_clones_share_the_buffer() {
    let sink = InMemoryAuditSink::new(8);
    let mut writer = sink.clone();
    let task_id = uuid::Uuid::new_v4();

    writer.record(build_audit_event(
        task_id,
        "start",
        Some(TaskState::Scheduled),
        Some(TaskState::Running),
        None,
    ));
    assert_eq!(sink.actions_for(task_id), vec!["start".to_string()]);
}

#[test]
fn test_build_audit_event() {
    let task_id = uuid::Uuid::new_v4();
    let event = build_audit_event(
        task_id,
        "stop",
        Some(TaskState::Running),
        Some(TaskState::Stopped),
        Some("operator".to_string()),
    );

    assert!(!event.event_id.is_empty());
    assert_eq!(event.from, Some(TaskState::Running));
    assert_eq!(event.to, Some(TaskState::Stopped));
    assert_eq!(event.detail, Some("operator".to_string()));
    assert!(event.recorded_at_ms > 0);
}
