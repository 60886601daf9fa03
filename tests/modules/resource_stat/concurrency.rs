//! 资源并发数与时间槽管理测试

use flowstat::ResourceStat;
use std::sync::Arc;
use std::thread;

/// 测试并发上限在多线程下不被突破
#[test]
fn test_concurrent_limit_under_contention() {
    let stat = Arc::new(ResourceStat::new("route", 1000));
    let mut handles = Vec::new();

    for _ in 0..16 {
        let stat = Arc::clone(&stat);
        handles.push(thread::spawn(move || stat.incr_concurrent_request(0, 5)));
    }

    let admitted = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|ok| *ok)
        .count();
    assert_eq!(admitted, 5);
    assert_eq!(stat.concurrent_requests(), 5);
    assert_eq!(stat.get_time_slot(0).peak_concurrent_requests(), 5);
}

/// 测试重复释放不会使并发数为负
#[test]
fn test_decr_floors_at_zero() {
    let stat = ResourceStat::new("route", 1000);
    assert!(stat.incr_concurrent_request(0, 0));
    assert!(stat.decr_concurrent_request(0));
    assert!(!stat.decr_concurrent_request(0));
    assert_eq!(stat.concurrent_requests(), 0);
}

/// 测试峰值采样记录跨时间槽的在途请求
#[test]
fn test_sample_peak_concurrency_creates_slot() {
    let stat = ResourceStat::new("route", 1000);
    stat.incr_concurrent_request(0, 0);
    stat.incr_concurrent_request(0, 0);

    assert!(!stat.has_time_slot(1000));
    stat.sample_peak_concurrency(1000);
    assert!(stat.has_time_slot(1000));
    assert_eq!(stat.get_time_slot(1000).peak_concurrent_requests(), 2);
}

/// 测试按范围与截止时间移除时间槽
#[test]
fn test_remove_time_slots() {
    let stat = ResourceStat::new("route", 1000);
    for slot_id in (0..10).map(|i| i * 1000) {
        stat.get_time_slot(slot_id);
    }
    assert_eq!(stat.time_slot_count(), 10);

    assert_eq!(stat.remove_time_slots_in_range(2000, 5000), 3);
    assert_eq!(stat.remove_time_slots_before(2000), 2);
    assert_eq!(stat.time_slot_ids(), vec![5000, 6000, 7000, 8000, 9000]);
}

/// 测试窗口聚合只统计已存在的时间槽
#[test]
fn test_window_stat_aggregation() {
    let stat = ResourceStat::new("route", 1000);
    assert!(stat.get_time_window_stat(0, 3000).is_none());

    stat.incr_request_to_time_slot(0, 0);
    stat.incr_request_to_time_slot(0, 0);
    stat.add_request_rt(0, 40, true);
    stat.incr_request_to_time_slot(2000, 0);
    stat.add_request_rt(2000, 10, false);
    stat.incr_block_request_to_time_slot(2000);

    let window = stat.get_time_window_stat(0, 3000).unwrap();
    assert_eq!(window.requests, 3);
    assert_eq!(window.comp_reqs, 2);
    assert_eq!(window.errors, 1);
    assert_eq!(window.min, Some(10));
    assert_eq!(window.max, Some(40));
    assert_eq!(window.avg_rt, Some(25.0));
    assert_eq!(window.block_requests, 1);
    assert_eq!(window.rps, 1.0);
}

/// 测试查询范围远大于保存的时间槽时的聚合与移除
#[test]
fn test_wide_range_uses_stored_slots() {
    let stat = ResourceStat::new("route", 1000);
    let now = 1_700_000_000_000i64;
    stat.incr_request_to_time_slot(now, 0);
    stat.incr_request_to_time_slot(now - 5000, 0);
    stat.add_request_rt(now - 5000, 12, true);

    let window = stat.get_time_window_stat(0, now + 1000).unwrap();
    assert_eq!(window.requests, 2);
    assert_eq!(window.comp_reqs, 1);
    assert!(stat.get_time_window_stat(0, now - 5000).is_none());

    assert_eq!(stat.remove_time_slots_in_range(0, now), 1);
    assert_eq!(stat.time_slot_ids(), vec![now]);
}
