//! 端到端测试：并发准入
//!
//! 测试场景：
//! - 并发上限为2时三个并发请求只放行两个
//! - 并发上限为1时多个并发请求只放行一个
//! - 高并发准入与释放后并发数回到0

use crate::common::{create_shared_flow_stat, gateway_chain};
use flowstat::{BlockType, IncrRequestResult, ResourceConfig};
use std::sync::Arc;
use tokio::sync::Barrier;

/// 测试并发上限为2的资源链
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_max_con_two_admits_two_of_three() {
    let stat = create_shared_flow_stat();
    let chain = Arc::new(vec![ResourceConfig::new("route", 2, 0)]);
    let slot_id = stat.current_time_slot_id();
    let barrier = Arc::new(Barrier::new(3));

    let mut handles = Vec::new();
    for _ in 0..3 {
        let stat = Arc::clone(&stat);
        let chain = Arc::clone(&chain);
        let barrier = Arc::clone(&barrier);
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            stat.incr_request(&chain, slot_id)
        }));
    }

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }

    let admitted = results.iter().filter(|r| r.is_success()).count();
    assert_eq!(admitted, 2);
    let blocked: Vec<&IncrRequestResult> = results.iter().filter(|r| r.is_blocked()).collect();
    assert_eq!(blocked.len(), 1);
    assert_eq!(blocked[0].blocked_resource_id(), Some("route"));
    assert_eq!(blocked[0].block_type(), Some(BlockType::ConcurrentRequest));
    assert_eq!(stat.get_concurrent_requests("route"), 2);

    // 释放一个后可以再次准入
    stat.add_request_rt(&chain, slot_id, 20, true);
    assert!(stat.incr_request(&chain, slot_id).is_success());
    assert_eq!(stat.get_concurrent_requests("route"), 2);
}

/// 测试并发上限为1时只有一个请求进入
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_max_con_one_admits_exactly_one() {
    let stat = create_shared_flow_stat();
    let chain = Arc::new(gateway_chain(1, 0, 0));
    let slot_id = stat.current_time_slot_id();
    let barrier = Arc::new(Barrier::new(3));

    let mut handles = Vec::new();
    for _ in 0..3 {
        let stat = Arc::clone(&stat);
        let chain = Arc::clone(&chain);
        let barrier = Arc::clone(&barrier);
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            stat.incr_request(&chain, slot_id).is_success()
        }));
    }

    let mut admitted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            admitted += 1;
        }
    }

    assert_eq!(admitted, 1);
    let window = stat
        .get_time_window_stat("route", slot_id, slot_id + stat.interval_ms())
        .unwrap();
    assert_eq!(window.requests, 1);
    assert_eq!(window.block_requests, 2);
    assert_eq!(window.peak_concurrency, 1);

    // 释放后下一个请求可以进入
    assert!(stat.incr_request(&chain, slot_id).is_blocked());
    stat.add_request_rt(&chain, slot_id, 20, true);
    assert_eq!(stat.get_concurrent_requests("route"), 0);
    assert!(stat.incr_request(&chain, slot_id).is_success());
    assert_eq!(stat.get_concurrent_requests("route"), 1);
}

/// 测试高并发准入与释放后计数平衡
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_admit_release_balances() {
    let stat = create_shared_flow_stat();
    let chain = Arc::new(gateway_chain(8, 16, 0));

    let mut handles = Vec::new();
    for task in 0..32u64 {
        let stat = Arc::clone(&stat);
        let chain = Arc::clone(&chain);
        handles.push(tokio::spawn(async move {
            let mut admitted = 0u64;
            for i in 0..200u64 {
                let slot_id = stat.current_time_slot_id();
                if stat.incr_request(&chain, slot_id).is_success() {
                    let current = stat.get_concurrent_requests("route");
                    assert!(current <= 8);
                    tokio::task::yield_now().await;
                    stat.add_request_rt(&chain, slot_id, (task + i) % 30, true);
                    admitted += 1;
                }
            }
            admitted
        }));
    }

    let mut admitted = 0u64;
    for handle in handles {
        admitted += handle.await.unwrap();
    }

    assert!(admitted > 0);
    for config in chain.iter() {
        assert_eq!(stat.get_concurrent_requests(&config.resource_id), 0);
    }
    assert_eq!(stat.release_anomalies(), 0);

    // 内层资源的请求数与外层一致
    let now = stat.current_time_millis();
    let total = |resource: &str| -> u64 {
        stat.get_resource_time_window_stats_per_second(Some(resource), now - 60_000, now + 1000)
            .iter()
            .flat_map(|r| r.windows.iter())
            .map(|w| w.requests)
            .sum()
    };
    assert_eq!(total("route"), admitted);
    assert_eq!(total("service"), admitted);
    assert_eq!(total("api-key"), admitted);
}
