//! 时间槽
//!
//! 一个资源在一个固定时间段内的全部计数器。
//!
//! # 特性
//! - 请求数、拒绝数、状态码计数使用独立的原子计数
//! - 响应时间相关的多个字段（总耗时、完成数、错误数、最小值、最大值）
//!   在同一个互斥区内一起更新，保证 `min <= avg <= max`
//! - 峰值并发使用 `fetch_max`，并发的更大值不会丢失
//! - 熔断状态只存储，不计算

use crate::constants::DEFAULT_RESUME_TRAFFIC_FACTOR;
use crate::error::CircuitState;
use crate::stats::StatusCounts;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};

/// 响应时间统计（互斥区保护）
#[derive(Debug)]
struct RtStats {
    total_rt: u64,
    comp_reqs: u64,
    errors: u64,
    min: u64,
    max: u64,
}

impl Default for RtStats {
    fn default() -> Self {
        Self {
            total_rt: 0,
            comp_reqs: 0,
            errors: 0,
            min: u64::MAX,
            max: 0,
        }
    }
}

/// 响应时间统计的一致快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RtSnapshot {
    pub total_rt: u64,
    pub comp_reqs: u64,
    pub errors: u64,
    pub min: Option<u64>,
    pub max: Option<u64>,
}

impl RtSnapshot {
    pub fn avg_rt(&self) -> Option<f64> {
        if self.comp_reqs == 0 {
            None
        } else {
            Some(self.total_rt as f64 / self.comp_reqs as f64)
        }
    }
}

/// 时间槽
#[derive(Debug)]
pub struct TimeSlot {
    /// 时间槽起始时间戳（毫秒，对齐到时间槽宽度）
    id: i64,
    /// 请求计数
    counter: AtomicU64,
    rt: Mutex<RtStats>,
    /// 峰值并发
    peak_concurrent_requests: AtomicU64,
    /// 本资源导致的拒绝数
    block_requests: AtomicU64,
    /// 本资源及其下层资源导致的拒绝数
    total_block_requests: AtomicU64,
    circuit_break_state: AtomicU8,
    circuit_break_num: AtomicU64,
    gradual_resume_num: AtomicU64,
    resume_traffic_factor: AtomicU32,
    gradual_reject_num: AtomicU64,
    status_2xx: AtomicU64,
    status_4xx: AtomicU64,
    status_5xx: AtomicU64,
    status_504: AtomicU64,
}

impl TimeSlot {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            counter: AtomicU64::new(0),
            rt: Mutex::new(RtStats::default()),
            peak_concurrent_requests: AtomicU64::new(0),
            block_requests: AtomicU64::new(0),
            total_block_requests: AtomicU64::new(0),
            circuit_break_state: AtomicU8::new(CircuitState::Closed.as_u8()),
            circuit_break_num: AtomicU64::new(0),
            gradual_resume_num: AtomicU64::new(0),
            resume_traffic_factor: AtomicU32::new(DEFAULT_RESUME_TRAFFIC_FACTOR),
            gradual_reject_num: AtomicU64::new(0),
            status_2xx: AtomicU64::new(0),
            status_4xx: AtomicU64::new(0),
            status_5xx: AtomicU64::new(0),
            status_504: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    /// 请求数加一
    pub fn incr(&self) {
        self.counter.fetch_add(1, Ordering::Relaxed);
    }

    /// 在请求数小于 `limit` 时加一
    ///
    /// `limit <= 0` 表示不限制。检查与递增是一次 CAS，并发调用不会超发。
    ///
    /// # 返回
    /// - `true`: 已计数
    /// - `false`: 已达上限，计数器未变
    pub fn incr_if_below(&self, limit: i64) -> bool {
        if limit <= 0 {
            self.incr();
            return true;
        }

        let limit = limit as u64;
        self.counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if current < limit {
                    Some(current + 1)
                } else {
                    None
                }
            })
            .is_ok()
    }

    /// 撤销一次计数（准入回滚）
    pub(crate) fn undo_incr(&self) {
        let _ = self
            .counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_sub(1)
            });
    }

    pub fn counter(&self) -> u64 {
        self.counter.load(Ordering::Acquire)
    }

    /// 记录一次已完成请求的响应时间
    pub fn add_request_rt(&self, rt: u64, success: bool) {
        let mut stats = self.rt.lock();
        stats.total_rt = stats.total_rt.saturating_add(rt);
        stats.comp_reqs += 1;
        if !success {
            stats.errors += 1;
        }
        stats.min = stats.min.min(rt);
        stats.max = stats.max.max(rt);
    }

    /// 获取响应时间统计的一致快照
    pub fn rt_snapshot(&self) -> RtSnapshot {
        let stats = self.rt.lock();
        let completed = stats.comp_reqs > 0;
        RtSnapshot {
            total_rt: stats.total_rt,
            comp_reqs: stats.comp_reqs,
            errors: stats.errors,
            min: completed.then_some(stats.min),
            max: completed.then_some(stats.max),
        }
    }

    pub fn errors(&self) -> u64 {
        self.rt.lock().errors
    }

    pub fn comp_reqs(&self) -> u64 {
        self.rt.lock().comp_reqs
    }

    /// 用当前并发数更新峰值
    pub fn update_peak_concurrent_requests(&self, concurrent_requests: u64) {
        self.peak_concurrent_requests
            .fetch_max(concurrent_requests, Ordering::AcqRel);
    }

    pub fn peak_concurrent_requests(&self) -> u64 {
        self.peak_concurrent_requests.load(Ordering::Acquire)
    }

    pub fn incr_block_requests(&self) {
        self.block_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn block_requests(&self) -> u64 {
        self.block_requests.load(Ordering::Relaxed)
    }

    pub fn incr_total_block_requests(&self) {
        self.total_block_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_block_requests(&self) -> u64 {
        self.total_block_requests.load(Ordering::Relaxed)
    }

    // ==================== 状态码 ====================

    /// 按状态码分类计数，504 同时计入 5xx
    pub fn record_status(&self, status: u16) {
        match status {
            200..=299 => self.incr_2xx_status_count(),
            400..=499 => self.incr_4xx_status_count(),
            500..=599 => {
                self.incr_5xx_status_count();
                if status == 504 {
                    self.incr_504_status_count();
                }
            }
            _ => {}
        }
    }

    pub fn incr_2xx_status_count(&self) {
        self.status_2xx.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_4xx_status_count(&self) {
        self.status_4xx.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_5xx_status_count(&self) {
        self.status_5xx.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_504_status_count(&self) {
        self.status_504.fetch_add(1, Ordering::Relaxed);
    }

    pub fn status_counts(&self) -> StatusCounts {
        StatusCounts {
            status_2xx: self.status_2xx.load(Ordering::Relaxed),
            status_4xx: self.status_4xx.load(Ordering::Relaxed),
            status_5xx: self.status_5xx.load(Ordering::Relaxed),
            status_504: self.status_504.load(Ordering::Relaxed),
        }
    }

    // ==================== 熔断状态 ====================

    pub fn circuit_break_state(&self) -> CircuitState {
        CircuitState::from_u8(self.circuit_break_state.load(Ordering::Acquire))
    }

    pub fn set_circuit_break_state(&self, state: CircuitState) {
        self.circuit_break_state
            .store(state.as_u8(), Ordering::Release);
    }

    /// 仅当当前状态为 `expected` 时切换到 `new`
    pub fn compare_and_set_circuit_break_state(
        &self,
        expected: CircuitState,
        new: CircuitState,
    ) -> bool {
        self.circuit_break_state
            .compare_exchange(
                expected.as_u8(),
                new.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub fn incr_circuit_break_num(&self) -> u64 {
        self.circuit_break_num.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn circuit_break_num(&self) -> u64 {
        self.circuit_break_num.load(Ordering::Relaxed)
    }

    pub fn incr_gradual_resume_num(&self) -> u64 {
        self.gradual_resume_num.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn gradual_resume_num(&self) -> u64 {
        self.gradual_resume_num.load(Ordering::Relaxed)
    }

    pub fn resume_traffic_factor(&self) -> u32 {
        self.resume_traffic_factor.load(Ordering::Relaxed)
    }

    pub fn set_resume_traffic_factor(&self, factor: u32) {
        self.resume_traffic_factor.store(factor, Ordering::Relaxed);
    }

    pub fn incr_gradual_reject_num(&self) -> u64 {
        self.gradual_reject_num.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn gradual_reject_num(&self) -> u64 {
        self.gradual_reject_num.load(Ordering::Relaxed)
    }
}
