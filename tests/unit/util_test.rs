//! Tests for utility functions

use prometheus_orchestrator::util::{now_ms, parse_memory, Priority, ResourceKind};

#[test]
fn test_priority_ordering() {
    assert!(Priority::Critical > Priority::High);
    assert!(Priority::High > Priority::Normal);
    assert!(Priority::Normal > Priority::Low);
}

#[test]
fn test_priority_preemption_rights() {
    assert!(Priority::Critical.can_preempt());
    assert!(Priority::High.can_preempt());
    assert!(!Priority::Normal.can_preempt());
    assert!(!Priority::Low.can_preempt());
}

#[test]
fn test_priority_serde() {
    let p: Priority = serde_json::from_str("\"medium\"").unwrap();
    assert_eq!(p, Priority::Normal);
    assert_eq!(serde_json::to_string(&Priority::Critical).unwrap(), "\"critical\"");
    assert_eq!(Priority::default(), Priority::Normal);
}

#[test]
fn test_resource_kind_serde() {
    assert_eq!(
        serde_json::to_string(&ResourceKind::MemorySwap).unwrap(),
        "\"memory_swap\""
    );
    assert_eq!(ResourceKind::GpuVram.to_string(), "gpu_vram");
}

#[test]
fn test_parse_memory() {
    assert_eq!(parse_memory("2g").unwrap(), 2 * 1024 * 1024 * 1024);
    assert!(parse_memory("2 gigs").is_err());
}

#[test]
fn test_now_ms() {
    let t1 = now_ms();
    std::thread::sleep(std::time::Duration::from_millis(10));
    let t2 = now_ms();
    assert!(t2 > t1);
}
