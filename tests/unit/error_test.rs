//! Tests for error types

use prometheus_orchestrator::core::{SchedulerError, TaskEvent, TaskState};
use prometheus_orchestrator::runtime::DriverError;
use prometheus_orchestrator::util::ResourceKind;

#[test]
fn test_validation_error() {
    let err = SchedulerError::Validation("image reference is required".to_string());
    assert_eq!(format!("{}", err), "validation failed: image reference is required");
}

#[test]
fn test_capacity_error() {
    let err = SchedulerError::Capacity {
        dimension: ResourceKind::Cpu,
        requested: 4,
        available: 2,
    };
    assert_eq!(format!("{}", err), "insufficient cpu: requested 4, available 2");
    assert!(err.is_capacity());
}

#[test]
fn test_invalid_transition_error() {
    let task_id = uuid::Uuid::nil();
    let err = SchedulerError::InvalidTransition {
        task_id,
        state: TaskState::Stopped,
        event: TaskEvent::PauseRequested,
    };
    assert_eq!(
        format!("{}", err),
        format!("task {task_id}: `pause` is not allowed in state STOPPED")
    );
    assert!(!err.is_capacity());
}

#[test]
fn test_backend_error() {
    let err = SchedulerError::Backend("config invalid".to_string());
    assert_eq!(format!("{}", err), "backend error: config invalid");
}

#[test]
fn test_driver_errors_convert() {
    let transient: SchedulerError = DriverError::Transient("pull timeout".into()).into();
    assert!(matches!(transient, SchedulerError::RuntimeTransient(ref m) if m == "pull timeout"));

    let fatal: SchedulerError = DriverError::Fatal("bad reference".into()).into();
    assert!(matches!(fatal, SchedulerError::RuntimeFatal(_)));

    let missing: SchedulerError = DriverError::NotFound("sim-1".into()).into();
    assert_eq!(
        format!("{}", missing),
        "runtime fatal failure: container not found: sim-1"
    );
}
