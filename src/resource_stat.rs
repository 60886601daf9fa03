//! 资源统计
//!
//! 单个资源的并发计数与时间槽集合。

use crate::constants::MILLIS_PER_SECOND;
use crate::stats::{StatusCounts, TimeWindowStat};
use crate::time_slot::TimeSlot;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{trace, warn};

/// 资源统计
///
/// 首次引用资源ID时创建，之后在进程生命周期内一直存在；
/// 只有其中的时间槽会被清理任务移除。
#[derive(Debug)]
pub struct ResourceStat {
    resource_id: String,
    /// 时间槽宽度（毫秒）
    interval_ms: i64,
    /// 当前并发数，永不为负
    concurrent_requests: AtomicU64,
    /// 时间槽ID -> 时间槽
    time_slots: DashMap<i64, Arc<TimeSlot>>,
}

impl ResourceStat {
    pub fn new(resource_id: impl Into<String>, interval_ms: u64) -> Self {
        Self {
            resource_id: resource_id.into(),
            interval_ms: interval_ms.max(1) as i64,
            concurrent_requests: AtomicU64::new(0),
            time_slots: DashMap::new(),
        }
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    /// 获取或创建时间槽
    ///
    /// 同一ID并发创建时只有一个对象会被插入，所有调用方拿到的都是它。
    pub fn get_time_slot(&self, slot_id: i64) -> Arc<TimeSlot> {
        if let Some(slot) = self.time_slots.get(&slot_id) {
            return Arc::clone(slot.value());
        }

        let slot = self
            .time_slots
            .entry(slot_id)
            .or_insert_with(|| {
                trace!(resource_id = %self.resource_id, slot_id, "创建时间槽");
                Arc::new(TimeSlot::new(slot_id))
            });
        Arc::clone(slot.value())
    }

    /// 获取已存在的时间槽，不创建
    pub fn find_time_slot(&self, slot_id: i64) -> Option<Arc<TimeSlot>> {
        self.time_slots
            .get(&slot_id)
            .map(|slot| Arc::clone(slot.value()))
    }

    pub fn has_time_slot(&self, slot_id: i64) -> bool {
        self.time_slots.contains_key(&slot_id)
    }

    pub fn time_slot_count(&self) -> usize {
        self.time_slots.len()
    }

    /// 当前存在的时间槽ID（升序）
    pub fn time_slot_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.time_slots.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn concurrent_requests(&self) -> u64 {
        self.concurrent_requests.load(Ordering::Acquire)
    }

    /// 并发数加一
    ///
    /// `max_con <= 0` 表示不限制。检查与递增是一次 CAS，并发调用不会超过上限。
    /// 成功后把递增后的并发数记为当前时间槽的峰值候选。
    ///
    /// # 返回
    /// - `true`: 已递增
    /// - `false`: 已达上限，并发数未变
    pub fn incr_concurrent_request(&self, slot_id: i64, max_con: i64) -> bool {
        match self.try_acquire_concurrent_request(max_con) {
            Some(current) => {
                self.get_time_slot(slot_id)
                    .update_peak_concurrent_requests(current);
                true
            }
            None => false,
        }
    }

    /// 并发数加一但不记录峰值，返回递增后的并发数
    ///
    /// 准入还可能因QPS被拒绝时使用，确认准入后再调用
    /// [`TimeSlot::update_peak_concurrent_requests`]。
    pub(crate) fn try_acquire_concurrent_request(&self, max_con: i64) -> Option<u64> {
        self.concurrent_requests
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if max_con <= 0 || current < max_con as u64 {
                    Some(current + 1)
                } else {
                    None
                }
            })
            .ok()
            .map(|previous| previous + 1)
    }

    /// 并发数减一，最小为0
    ///
    /// 对已为0的并发数递减说明调用方重复释放，记录警告后直接返回。
    ///
    /// # 返回
    /// - `true`: 已递减
    /// - `false`: 并发数已为0，未修改
    pub fn decr_concurrent_request(&self, slot_id: i64) -> bool {
        let result = self
            .concurrent_requests
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_sub(1)
            });

        if result.is_err() {
            warn!(
                resource_id = %self.resource_id,
                slot_id,
                "并发数已为0，忽略重复释放"
            );
            return false;
        }
        true
    }

    /// 创建（或取得）时间槽，并把当前并发数记为它的峰值候选
    ///
    /// 跨时间槽仍在处理中的请求也会计入新时间槽的峰值。
    pub fn sample_peak_concurrency(&self, slot_id: i64) {
        self.get_time_slot(slot_id)
            .update_peak_concurrent_requests(self.concurrent_requests());
    }

    /// 在当前时间槽请求数小于 `max_qps` 时计数
    pub fn incr_request_to_time_slot(&self, slot_id: i64, max_qps: i64) -> bool {
        self.get_time_slot(slot_id).incr_if_below(max_qps)
    }

    /// 撤销一次时间槽计数
    pub(crate) fn undo_request_to_time_slot(&self, slot_id: i64) {
        self.get_time_slot(slot_id).undo_incr();
    }

    pub fn add_request_rt(&self, slot_id: i64, rt: u64, success: bool) {
        self.get_time_slot(slot_id).add_request_rt(rt, success);
    }

    /// 记录一次由本资源导致的拒绝
    pub fn incr_block_request_to_time_slot(&self, slot_id: i64) {
        self.get_time_slot(slot_id).incr_block_requests();
    }

    /// 记录一次由本资源或其下层资源导致的拒绝
    pub fn incr_total_block_request(&self, slot_id: i64) {
        self.get_time_slot(slot_id).incr_total_block_requests();
    }

    pub fn remove_time_slot(&self, slot_id: i64) -> bool {
        self.time_slots.remove(&slot_id).is_some()
    }

    /// 移除ID在 `[from, to)` 内的时间槽
    ///
    /// 范围内的时间槽数多于已保存的时间槽时改为过滤已保存的时间槽。
    pub fn remove_time_slots_in_range(&self, from: i64, to: i64) -> usize {
        if from >= to {
            return 0;
        }
        if self.range_exceeds_stored(from, to) {
            let before = self.time_slots.len();
            self.time_slots
                .retain(|slot_id, _| *slot_id < from || *slot_id >= to);
            return before.saturating_sub(self.time_slots.len());
        }

        let mut removed = 0;
        let mut slot_id = from;
        while slot_id < to {
            if self.remove_time_slot(slot_id) {
                removed += 1;
            }
            slot_id += self.interval_ms;
        }
        removed
    }

    /// `[from, to)` 内可容纳的时间槽数是否多于已保存的时间槽数
    fn range_exceeds_stored(&self, from: i64, to: i64) -> bool {
        let span = (to as i128 - from as i128) / self.interval_ms as i128;
        span > self.time_slots.len() as i128
    }

    /// `[start_slot_id, end_slot_id)` 内已存在的时间槽，按ID升序
    ///
    /// 查询范围远大于保留的数据量时（例如从纪元0开始查询），遍历已保存的
    /// 时间槽而不是逐个时间槽ID查找，开销只与保留的时间槽数有关。
    fn slots_in_range(&self, start_slot_id: i64, end_slot_id: i64) -> Vec<Arc<TimeSlot>> {
        if start_slot_id >= end_slot_id {
            return Vec::new();
        }

        if self.range_exceeds_stored(start_slot_id, end_slot_id) {
            let mut slots: Vec<Arc<TimeSlot>> = self
                .time_slots
                .iter()
                .filter(|entry| (start_slot_id..end_slot_id).contains(entry.key()))
                .map(|entry| Arc::clone(entry.value()))
                .collect();
            slots.sort_by_key(|slot| slot.id());
            return slots;
        }

        let mut slots = Vec::new();
        let mut slot_id = start_slot_id;
        while slot_id < end_slot_id {
            if let Some(slot) = self.find_time_slot(slot_id) {
                slots.push(slot);
            }
            slot_id += self.interval_ms;
        }
        slots
    }

    /// 移除ID小于 `cutoff` 的全部时间槽
    pub fn remove_time_slots_before(&self, cutoff: i64) -> usize {
        let before = self.time_slots.len();
        self.time_slots.retain(|slot_id, _| *slot_id >= cutoff);
        before.saturating_sub(self.time_slots.len())
    }

    /// 聚合 `[start_slot_id, end_slot_id)` 内已存在的时间槽
    ///
    /// 不存在的时间槽按0计；一个时间槽都不存在时返回 None。
    pub fn get_time_window_stat(
        &self,
        start_slot_id: i64,
        end_slot_id: i64,
    ) -> Option<TimeWindowStat> {
        let slots = self.slots_in_range(start_slot_id, end_slot_id);
        if slots.is_empty() {
            return None;
        }

        let mut requests = 0u64;
        let mut errors = 0u64;
        let mut comp_reqs = 0u64;
        let mut total_rt = 0u64;
        let mut min: Option<u64> = None;
        let mut max: Option<u64> = None;
        let mut peak_concurrency = 0u64;
        let mut block_requests = 0u64;
        let mut total_block_requests = 0u64;
        let mut status_counts = StatusCounts::default();
        let mut circuit_break_num = 0u64;
        let mut gradual_resume_num = 0u64;
        let mut gradual_reject_num = 0u64;

        for slot in &slots {
            let rt = slot.rt_snapshot();

            requests += slot.counter();
            errors += rt.errors;
            comp_reqs += rt.comp_reqs;
            total_rt = total_rt.saturating_add(rt.total_rt);
            min = match (min, rt.min) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            max = match (max, rt.max) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            };
            peak_concurrency = peak_concurrency.max(slot.peak_concurrent_requests());
            block_requests += slot.block_requests();
            total_block_requests += slot.total_block_requests();
            status_counts.merge(&slot.status_counts());
            circuit_break_num += slot.circuit_break_num();
            gradual_resume_num += slot.gradual_resume_num();
            gradual_reject_num += slot.gradual_reject_num();
        }

        let avg_rt = if comp_reqs > 0 {
            Some(total_rt as f64 / comp_reqs as f64)
        } else {
            None
        };
        let seconds = (end_slot_id - start_slot_id) as f64 / MILLIS_PER_SECOND as f64;
        let rps = if seconds > 0.0 {
            requests as f64 / seconds
        } else {
            0.0
        };

        Some(TimeWindowStat {
            resource_id: self.resource_id.clone(),
            start_time: start_slot_id,
            end_time: end_slot_id,
            requests,
            errors,
            comp_reqs,
            min,
            max,
            avg_rt,
            rps,
            peak_concurrency,
            block_requests,
            total_block_requests,
            status_counts,
            circuit_break_num,
            gradual_resume_num,
            gradual_reject_num,
        })
    }
}
