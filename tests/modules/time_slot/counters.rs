//! 时间槽计数器测试

use flowstat::{CircuitState, TimeSlot};
use std::sync::Arc;
use std::thread;

/// 测试QPS上限在多线程下不超发
#[test]
fn test_incr_if_below_under_contention() {
    let slot = Arc::new(TimeSlot::new(0));
    let mut handles = Vec::new();

    for _ in 0..8 {
        let slot = Arc::clone(&slot);
        handles.push(thread::spawn(move || {
            (0..100).filter(|_| slot.incr_if_below(250)).count()
        }));
    }

    let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(admitted, 250);
    assert_eq!(slot.counter(), 250);
}

/// 测试响应时间快照
#[test]
fn test_rt_snapshot_tracks_min_max_and_errors() {
    let slot = TimeSlot::new(1000);
    assert_eq!(slot.rt_snapshot().avg_rt(), None);

    slot.add_request_rt(30, true);
    slot.add_request_rt(10, false);
    slot.add_request_rt(20, true);

    let snapshot = slot.rt_snapshot();
    assert_eq!(snapshot.comp_reqs, 3);
    assert_eq!(snapshot.errors, 1);
    assert_eq!(snapshot.min, Some(10));
    assert_eq!(snapshot.max, Some(30));
    assert_eq!(snapshot.avg_rt(), Some(20.0));
}

/// 测试状态码分类
#[test]
fn test_record_status_classification() {
    let slot = TimeSlot::new(0);
    for status in [200, 204, 302, 404, 429, 500, 504, 504] {
        slot.record_status(status);
    }

    let counts = slot.status_counts();
    assert_eq!(counts.status_2xx, 2);
    assert_eq!(counts.status_4xx, 2);
    assert_eq!(counts.status_5xx, 3);
    assert_eq!(counts.status_504, 2);
}

/// 测试熔断状态只在期望状态匹配时切换
#[test]
fn test_circuit_state_transitions() {
    let slot = TimeSlot::new(0);
    assert_eq!(slot.circuit_break_state(), CircuitState::Closed);

    assert!(!slot.compare_and_set_circuit_break_state(CircuitState::Open, CircuitState::Closed));
    assert!(slot.compare_and_set_circuit_break_state(CircuitState::Closed, CircuitState::Open));
    assert_eq!(slot.circuit_break_state(), CircuitState::Open);

    slot.set_circuit_break_state(CircuitState::ResumeGradually);
    assert_eq!(slot.circuit_break_state(), CircuitState::ResumeGradually);

    assert_eq!(slot.incr_circuit_break_num(), 1);
    assert_eq!(slot.incr_gradual_resume_num(), 1);
    assert_eq!(slot.incr_gradual_reject_num(), 1);
    assert_eq!(slot.incr_gradual_reject_num(), 2);

    assert_eq!(slot.resume_traffic_factor(), 1);
    slot.set_resume_traffic_factor(4);
    assert_eq!(slot.resume_traffic_factor(), 4);
}
