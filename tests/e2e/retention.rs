//! 端到端测试：数据保留
//!
//! 测试场景：
//! - 清理只移除保留时间之外的时间槽
//! - 缩短保留时间后下一次清理生效
//! - 重复清理不会回退截止时间

use crate::common::{create_flow_stat, slot_seconds_ago};

/// 测试清理保留时间内的数据
#[test]
fn test_housekeep_keeps_recent_slots() {
    let stat = create_flow_stat();
    let now = stat.current_time_millis();

    let old = slot_seconds_ago(&stat, 11 * 60);
    let recent = slot_seconds_ago(&stat, 9 * 60);
    let current = stat.current_time_slot_id();
    for slot_id in [old, recent, current] {
        stat.get_time_slot("route", slot_id).incr();
    }

    assert_eq!(stat.housekeep(now), 1);

    let route = stat.get_resource_stat("route");
    assert!(!route.has_time_slot(old));
    assert!(route.has_time_slot(recent));
    assert!(route.has_time_slot(current));
}

/// 测试缩短保留时间后清理增量范围
#[test]
fn test_shortened_retention_takes_effect() {
    let stat = create_flow_stat();
    let now = stat.current_time_millis();

    let five_minutes_ago = slot_seconds_ago(&stat, 5 * 60);
    stat.get_time_slot("route", five_minutes_ago).incr();
    assert_eq!(stat.housekeep(now), 0);

    stat.update_retention_time(2).unwrap();
    assert_eq!(stat.retention_minutes(), 2);
    assert_eq!(stat.housekeep(now), 1);
    assert!(!stat.get_resource_stat("route").has_time_slot(five_minutes_ago));
}

/// 测试截止时间不回退
#[test]
fn test_cutoff_never_moves_backwards() {
    let stat = create_flow_stat();
    let now = stat.current_time_millis();
    stat.housekeep(now);

    // 延长保留时间后截止时间更早，不再清理
    stat.update_retention_time(30).unwrap();
    let old = slot_seconds_ago(&stat, 20 * 60);
    stat.get_time_slot("route", old).incr();
    assert_eq!(stat.housekeep(now), 0);
    assert!(stat.get_resource_stat("route").has_time_slot(old));

    assert!(stat.update_retention_time(0).is_err());
}
