//! 端到端测试：资源链隔离
//!
//! 测试场景：
//! - 共享的外层资源已满时，内层资源的计数不变
//! - 不同路由共享同一服务时，服务的上限对两条链同时生效

use crate::common::{create_flow_stat, slot_requests};
use flowstat::{BlockType, ResourceConfig};

/// 测试外层资源饱和时内层资源不被计数
#[test]
fn test_saturated_outer_resource_protects_inner() {
    let stat = create_flow_stat();
    let slot_id = stat.current_time_slot_id();

    let saturating = vec![ResourceConfig::new("A", 1, 0)];
    assert!(stat.incr_request(&saturating, slot_id).is_success());

    let chain = vec![
        ResourceConfig::new("A", 1, 0),
        ResourceConfig::new("B", 10, 0),
    ];
    let result = stat.incr_request(&chain, slot_id);
    assert_eq!(result.blocked_resource_id(), Some("A"));

    assert_eq!(stat.get_concurrent_requests("B"), 0);
    assert_eq!(slot_requests(&stat, "B", slot_id), 0);

    let b = stat
        .get_time_window_stat("B", slot_id, slot_id + stat.interval_ms())
        .map(|w| (w.block_requests, w.total_block_requests))
        .unwrap_or((0, 0));
    assert_eq!(b, (0, 0));
}

/// 测试两条路由共享服务的并发上限
#[test]
fn test_shared_service_limit_across_routes() {
    let stat = create_flow_stat();
    let slot_id = stat.current_time_slot_id();

    let route_a = vec![
        ResourceConfig::new("route-a", 0, 0),
        ResourceConfig::new("service", 2, 0),
    ];
    let route_b = vec![
        ResourceConfig::new("route-b", 0, 0),
        ResourceConfig::new("service", 2, 0),
    ];

    assert!(stat.incr_request(&route_a, slot_id).is_success());
    assert!(stat.incr_request(&route_b, slot_id).is_success());

    let result = stat.incr_request(&route_a, slot_id);
    assert_eq!(result.blocked_resource_id(), Some("service"));
    assert_eq!(result.block_type(), Some(BlockType::ConcurrentRequest));

    // 被拒绝的请求不占用外层路由
    assert_eq!(stat.get_concurrent_requests("route-a"), 1);
    assert_eq!(slot_requests(&stat, "route-a", slot_id), 1);

    let end = slot_id + stat.interval_ms();
    let route_a_window = stat.get_time_window_stat("route-a", slot_id, end).unwrap();
    assert_eq!(route_a_window.block_requests, 0);
    assert_eq!(route_a_window.total_block_requests, 1);

    stat.add_request_rt(&route_b, slot_id, 12, true);
    assert!(stat.incr_request(&route_a, slot_id).is_success());
}

/// 测试空资源链直接放行
#[test]
fn test_empty_chain_is_admitted() {
    let stat = create_flow_stat();
    let slot_id = stat.current_time_slot_id();

    assert!(stat.incr_request(&[], slot_id).is_success());
    assert!(stat.resource_ids().is_empty());
}
