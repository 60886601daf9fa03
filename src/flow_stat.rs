//! 流量统计主控制器
//!
//! 进程级的资源注册表，提供：
//! - 资源链的全有或全无准入控制
//! - 请求完成后的释放与响应时间记录
//! - 时间窗口查询
//! - 两个后台任务：过期时间槽清理、峰值并发采样
//!
//! # 示例
//!
//! ```rust
//! use flowstat::config::{FlowStatConfig, ResourceConfig};
//! use flowstat::flow_stat::FlowStat;
//!
//! let stat = FlowStat::new(FlowStatConfig::default()).unwrap();
//! let chain = vec![
//!     ResourceConfig::new("route-1", 100, 0),
//!     ResourceConfig::new("service-1", 0, 1000),
//! ];
//!
//! let slot_id = stat.current_time_slot_id();
//! let result = stat.incr_request(&chain, slot_id);
//! assert!(result.is_success());
//!
//! // 请求完成
//! stat.add_request_rt(&chain, slot_id, 12, true);
//! assert_eq!(stat.get_concurrent_requests("route-1"), 0);
//! ```

use crate::config::{FlowStatConfig, ResourceConfig};
use crate::constants::{DEFAULT_RESOURCE_CAPACITY, MILLIS_PER_SECOND};
use crate::error::FlowStatError;
use crate::resource_stat::ResourceStat;
use crate::stats::{BlockType, IncrRequestResult, ResourceTimeWindowStat, TimeWindowStat};
#[cfg(feature = "monitoring")]
use crate::telemetry::Metrics;
use crate::time_slot::TimeSlot;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, trace};

/// 流量统计
pub struct FlowStat {
    /// 配置（时间槽宽度构建后固定）
    config: FlowStatConfig,
    /// 数据保留时间（分钟），运行时可修改
    retention_minutes: AtomicU64,
    /// 资源ID -> 资源统计
    resource_stats: DashMap<String, Arc<ResourceStat>>,
    /// 串行化资源链准入
    chain_lock: Mutex<()>,
    /// 上一次清理的截止时间槽
    last_cutoff: Mutex<Option<i64>>,
    /// 重复释放次数
    release_anomalies: AtomicU64,
    /// 后台任务停止信号
    shutdown_tx: watch::Sender<bool>,
    /// 后台任务句柄
    jobs: Mutex<Vec<JoinHandle<()>>>,
    #[cfg(feature = "monitoring")]
    metrics: Option<Arc<Metrics>>,
}

impl std::fmt::Debug for FlowStat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowStat")
            .field("config", &self.config)
            .field("retention_minutes", &self.retention_minutes())
            .field("resources", &self.resource_stats.len())
            .finish()
    }
}

impl FlowStat {
    /// 创建统计实例，不启动后台任务
    pub fn new(config: FlowStatConfig) -> Result<Self, FlowStatError> {
        config.validate()?;

        info!(
            interval_ms = config.interval_ms,
            retention_minutes = config.retention_minutes,
            "创建流量统计"
        );

        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            retention_minutes: AtomicU64::new(config.retention_minutes),
            config,
            resource_stats: DashMap::with_capacity(DEFAULT_RESOURCE_CAPACITY),
            chain_lock: Mutex::new(()),
            last_cutoff: Mutex::new(None),
            release_anomalies: AtomicU64::new(0),
            shutdown_tx,
            jobs: Mutex::new(Vec::new()),
            #[cfg(feature = "monitoring")]
            metrics: None,
        })
    }

    /// 创建统计实例并启动后台任务
    ///
    /// 必须在 tokio 运行时内调用。
    pub fn start(config: FlowStatConfig) -> Result<Arc<Self>, FlowStatError> {
        let stat = Arc::new(Self::new(config)?);
        stat.spawn_background_jobs();
        Ok(stat)
    }

    /// 挂载监控指标
    #[cfg(feature = "monitoring")]
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        metrics.resources.set(self.resource_stats.len() as i64);
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &FlowStatConfig {
        &self.config
    }

    pub fn interval_ms(&self) -> i64 {
        self.config.interval_ms as i64
    }

    pub fn retention_minutes(&self) -> u64 {
        self.retention_minutes.load(Ordering::Relaxed)
    }

    /// 修改数据保留时间，下一次清理生效
    pub fn update_retention_time(&self, retention_minutes: u64) -> Result<(), FlowStatError> {
        if retention_minutes == 0 {
            return Err(FlowStatError::ValidationError(
                "数据保留时间必须大于0".to_string(),
            ));
        }
        let old = self
            .retention_minutes
            .swap(retention_minutes, Ordering::Relaxed);
        info!(old, new = retention_minutes, "更新数据保留时间");
        Ok(())
    }

    /// 重复释放次数
    pub fn release_anomalies(&self) -> u64 {
        self.release_anomalies.load(Ordering::Relaxed)
    }

    // ==================== 时间槽 ====================

    pub fn current_time_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// 当前时间槽ID（当前时间向下对齐到时间槽宽度）
    pub fn current_time_slot_id(&self) -> i64 {
        self.time_slot_id(self.current_time_millis())
    }

    /// 指定时间所在的时间槽ID
    pub fn time_slot_id(&self, time_ms: i64) -> i64 {
        let interval = self.interval_ms();
        time_ms.div_euclid(interval) * interval
    }

    /// 把 `[start_ms, end_ms)` 对齐到时间槽；对齐后为空时向后扩展一个时间槽
    fn window_bounds(&self, start_ms: i64, end_ms: i64) -> (i64, i64) {
        let start = self.time_slot_id(start_ms);
        let mut end = self.time_slot_id(end_ms);
        if start == end {
            end = end.saturating_add(self.interval_ms());
        }
        (start, end)
    }

    // ==================== 资源注册表 ====================

    /// 获取或创建资源统计
    pub fn get_resource_stat(&self, resource_id: &str) -> Arc<ResourceStat> {
        if let Some(stat) = self.resource_stats.get(resource_id) {
            return Arc::clone(stat.value());
        }

        let stat = self
            .resource_stats
            .entry(resource_id.to_string())
            .or_insert_with(|| {
                debug!(resource_id, "创建资源统计");
                Arc::new(ResourceStat::new(resource_id, self.config.interval_ms))
            });
        let stat = Arc::clone(stat.value());

        #[cfg(feature = "monitoring")]
        if let Some(metrics) = &self.metrics {
            metrics.resources.set(self.resource_stats.len() as i64);
        }

        stat
    }

    /// 获取已存在的资源统计，不创建
    pub fn find_resource_stat(&self, resource_id: &str) -> Option<Arc<ResourceStat>> {
        self.resource_stats
            .get(resource_id)
            .map(|stat| Arc::clone(stat.value()))
    }

    /// 已知资源ID（升序）
    pub fn resource_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .resource_stats
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }

    fn resources(&self) -> Vec<Arc<ResourceStat>> {
        self.resource_stats
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// 获取或创建资源的时间槽，供外部熔断策略读写熔断状态
    pub fn get_time_slot(&self, resource_id: &str, slot_id: i64) -> Arc<TimeSlot> {
        self.get_resource_stat(resource_id).get_time_slot(slot_id)
    }

    /// 资源当前并发数，未知资源为0
    pub fn get_concurrent_requests(&self, resource_id: &str) -> u64 {
        self.find_resource_stat(resource_id)
            .map(|stat| stat.concurrent_requests())
            .unwrap_or(0)
    }

    // ==================== 准入 ====================

    /// 资源链准入
    ///
    /// 在一个全局互斥区内分两步完成：先检查链上每个资源的并发数与QPS，
    /// 任一资源超限立即返回拒绝且不修改任何计数；全部通过后再为每个资源
    /// 递增并发数和当前时间槽的请求数。
    ///
    /// 提交阶段同样使用带上限的 CAS，若单资源接口在检查之后抢占了额度，
    /// 已递增的资源会被回滚，结果仍是全有或全无。
    ///
    /// # 参数
    /// - `chain`: 从外到内排列的资源配置，为空时直接返回成功
    /// - `cur_slot_id`: 当前时间槽ID，应由 [`current_time_slot_id`](Self::current_time_slot_id) 获得
    #[instrument(level = "trace", skip(self, chain), fields(resources = chain.len()))]
    pub fn incr_request(&self, chain: &[ResourceConfig], cur_slot_id: i64) -> IncrRequestResult {
        if chain.is_empty() {
            return IncrRequestResult::success();
        }

        let resources: Vec<Arc<ResourceStat>> = chain
            .iter()
            .map(|config| self.get_resource_stat(&config.resource_id))
            .collect();

        let _guard = self.chain_lock.lock();

        // 检查
        for (index, (config, stat)) in chain.iter().zip(&resources).enumerate() {
            if !config.is_limited() {
                continue;
            }

            if config.max_con > 0 && stat.concurrent_requests() >= config.max_con as u64 {
                return self.block(
                    &resources,
                    index,
                    cur_slot_id,
                    BlockType::ConcurrentRequest,
                );
            }

            if config.max_qps > 0
                && stat.get_time_slot(cur_slot_id).counter() >= config.max_qps as u64
            {
                return self.block(&resources, index, cur_slot_id, BlockType::Qps);
            }
        }

        // 提交，全部成功后才记录峰值并发
        let mut acquired = Vec::with_capacity(resources.len());
        for (index, (config, stat)) in chain.iter().zip(&resources).enumerate() {
            let Some(current) = stat.try_acquire_concurrent_request(config.max_con) else {
                self.rollback(&resources[..index], cur_slot_id);
                return self.block(
                    &resources,
                    index,
                    cur_slot_id,
                    BlockType::ConcurrentRequest,
                );
            };
            if !stat.incr_request_to_time_slot(cur_slot_id, config.max_qps) {
                stat.decr_concurrent_request(cur_slot_id);
                self.rollback(&resources[..index], cur_slot_id);
                return self.block(&resources, index, cur_slot_id, BlockType::Qps);
            }
            acquired.push(current);
        }
        for (stat, current) in resources.iter().zip(acquired) {
            stat.get_time_slot(cur_slot_id)
                .update_peak_concurrent_requests(current);
        }

        #[cfg(feature = "monitoring")]
        if let Some(metrics) = &self.metrics {
            metrics.admissions_total.inc();
        }

        IncrRequestResult::success()
    }

    /// 记录拒绝：拒绝方记一次 block，拒绝方及其外层资源各记一次 total block
    fn block(
        &self,
        resources: &[Arc<ResourceStat>],
        index: usize,
        slot_id: i64,
        block_type: BlockType,
    ) -> IncrRequestResult {
        let blocked = &resources[index];
        blocked.incr_block_request_to_time_slot(slot_id);
        for stat in &resources[..=index] {
            stat.incr_total_block_request(slot_id);
        }

        trace!(
            resource_id = blocked.resource_id(),
            slot_id,
            ?block_type,
            "请求被拒绝"
        );

        #[cfg(feature = "monitoring")]
        if let Some(metrics) = &self.metrics {
            metrics.record_block(block_type);
        }

        IncrRequestResult::block(blocked.resource_id(), block_type)
    }

    fn rollback(&self, committed: &[Arc<ResourceStat>], slot_id: i64) {
        for stat in committed.iter().rev() {
            stat.undo_request_to_time_slot(slot_id);
            stat.decr_concurrent_request(slot_id);
        }
    }

    /// 单资源准入，不经过资源链互斥区
    ///
    /// 并发数与QPS各自是一次原子的检查并递增；QPS超限时回滚已递增的并发数，
    /// 峰值并发只在准入成功后记录。
    ///
    /// # 参数
    /// - `max_con`: 最大并发数，小于等于0不限制
    /// - `max_rps`: 最大每秒请求数，小于等于0不限制
    pub fn incr_resource_request(
        &self,
        resource_id: &str,
        cur_slot_id: i64,
        max_con: i64,
        max_rps: i64,
    ) -> IncrRequestResult {
        let stat = self.get_resource_stat(resource_id);
        debug!(
            resource_id,
            slot_id = cur_slot_id,
            max_con,
            max_rps,
            "单资源准入"
        );

        let block_type = match stat.try_acquire_concurrent_request(max_con) {
            None => BlockType::ConcurrentRequest,
            Some(_) if !stat.incr_request_to_time_slot(cur_slot_id, max_rps) => {
                stat.decr_concurrent_request(cur_slot_id);
                BlockType::Qps
            }
            Some(current) => {
                stat.get_time_slot(cur_slot_id)
                    .update_peak_concurrent_requests(current);
                return IncrRequestResult::success();
            }
        };

        self.block(std::slice::from_ref(&stat), 0, cur_slot_id, block_type)
    }

    // ==================== 释放 ====================

    /// 资源链释放
    ///
    /// 从最内层资源开始逆序递减并发数并记录响应时间。
    /// 每次成功准入必须对应且只对应一次释放。
    pub fn add_request_rt(&self, chain: &[ResourceConfig], slot_id: i64, rt: u64, success: bool) {
        for config in chain.iter().rev() {
            let stat = self.get_resource_stat(&config.resource_id);
            self.release(&stat, slot_id);
            stat.add_request_rt(slot_id, rt, success);
        }
    }

    /// 资源链释放，并记录HTTP状态码
    pub fn add_request_rt_with_status(
        &self,
        chain: &[ResourceConfig],
        slot_id: i64,
        rt: u64,
        success: bool,
        status: u16,
    ) {
        for config in chain.iter().rev() {
            let stat = self.get_resource_stat(&config.resource_id);
            self.release(&stat, slot_id);
            let slot = stat.get_time_slot(slot_id);
            slot.add_request_rt(rt, success);
            slot.record_status(status);
        }
    }

    /// 单资源并发数减一
    pub fn decr_concurrent_request(&self, resource_id: &str, slot_id: i64) {
        if resource_id.is_empty() {
            return;
        }
        let stat = self.get_resource_stat(resource_id);
        self.release(&stat, slot_id);
    }

    /// 单资源记录响应时间，不修改并发数
    pub fn add_resource_request_rt(&self, resource_id: &str, slot_id: i64, rt: u64, success: bool) {
        if resource_id.is_empty() {
            return;
        }
        self.get_resource_stat(resource_id)
            .add_request_rt(slot_id, rt, success);
    }

    fn release(&self, stat: &ResourceStat, slot_id: i64) {
        if stat.decr_concurrent_request(slot_id) {
            return;
        }

        self.release_anomalies.fetch_add(1, Ordering::Relaxed);

        #[cfg(feature = "monitoring")]
        if let Some(metrics) = &self.metrics {
            metrics.release_anomalies_total.inc();
        }
    }

    // ==================== 时间窗口查询 ====================

    /// 资源在 `[start_ms, end_ms)` 内的统计
    ///
    /// 两端向下对齐到时间槽；对齐后为空时向后扩展一个时间槽。
    /// 资源未知或窗口内没有任何时间槽时返回 None。
    pub fn get_time_window_stat(
        &self,
        resource_id: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Option<TimeWindowStat> {
        let (start, end) = self.window_bounds(start_ms, end_ms);
        self.find_resource_stat(resource_id)?
            .get_time_window_stat(start, end)
    }

    /// 资源当前时间槽的统计
    pub fn get_current_time_window_stat(&self, resource_id: &str) -> Option<TimeWindowStat> {
        let start = self.current_time_slot_id();
        self.get_time_window_stat(resource_id, start, start + self.interval_ms())
    }

    /// 指定时间之前一秒的统计
    pub fn get_previous_second_stat(
        &self,
        resource_id: &str,
        time_ms: i64,
    ) -> Option<TimeWindowStat> {
        let end = self.time_slot_id(time_ms);
        self.get_time_window_stat(resource_id, end - MILLIS_PER_SECOND, end)
    }

    /// 以固定宽度的自定义窗口滑过 `[start_ms, end_ms)`
    ///
    /// # 参数
    /// - `resource_id`: 为 None 时对所有资源计算，只返回至少有一个窗口的资源
    /// - `slot_interval_secs`: 自定义窗口宽度（秒），例如 60 表示按分钟聚合
    ///
    /// 窗口宽度为0或大于整个时间范围时返回空列表。
    pub fn get_resource_time_window_stats(
        &self,
        resource_id: Option<&str>,
        start_ms: i64,
        end_ms: i64,
        slot_interval_secs: u64,
    ) -> Vec<ResourceTimeWindowStat> {
        let (start, end) = self.window_bounds(start_ms, end_ms);
        let width = match i64::try_from(slot_interval_secs)
            .ok()
            .and_then(|secs| secs.checked_mul(MILLIS_PER_SECOND))
        {
            Some(width) if width > 0 && width <= end.saturating_sub(start) => width,
            _ => return Vec::new(),
        };
        // 只有完整的窗口参与计算
        let window_count = end.saturating_sub(start) / width;

        let resource_ids = match resource_id {
            Some(id) => vec![id.to_string()],
            None => self.resource_ids(),
        };

        let mut result = Vec::new();
        for id in resource_ids {
            let Some(stat) = self.find_resource_stat(&id) else {
                continue;
            };

            // 只访问包含时间槽的窗口，空窗口不产生结果
            let mut window_indexes: Vec<i64> = stat
                .time_slot_ids()
                .into_iter()
                .filter(|slot_id| *slot_id >= start && *slot_id < end)
                .map(|slot_id| (slot_id - start) / width)
                .filter(|index| *index < window_count)
                .collect();
            window_indexes.dedup();

            let mut resource_windows = ResourceTimeWindowStat::new(id.as_str());
            for index in window_indexes {
                let window_start = start + index * width;
                if let Some(window) = stat.get_time_window_stat(window_start, window_start + width)
                {
                    resource_windows.windows.push(window);
                }
            }
            if !resource_windows.windows.is_empty() {
                result.push(resource_windows);
            }
        }
        result
    }

    /// 按秒聚合的 [`get_resource_time_window_stats`](Self::get_resource_time_window_stats)
    pub fn get_resource_time_window_stats_per_second(
        &self,
        resource_id: Option<&str>,
        start_ms: i64,
        end_ms: i64,
    ) -> Vec<ResourceTimeWindowStat> {
        self.get_resource_time_window_stats(resource_id, start_ms, end_ms, 1)
    }

    // ==================== 后台维护 ====================

    /// 清理早于保留时间的时间槽
    ///
    /// 首次运行清理所有早于截止时间的时间槽；之后只清理
    /// `[上次截止, 本次截止)` 内的时间槽，不重复扫描已清理的范围。
    /// 截止时间总是早于当前时间槽，当前时间槽不会被清理。
    ///
    /// # 返回
    /// - 被移除的时间槽数
    pub fn housekeep(&self, now_ms: i64) -> usize {
        let retention_ms =
            FlowStatConfig::retention_ms(self.config.interval_ms, self.retention_minutes());
        let cutoff = self.time_slot_id(now_ms) - retention_ms;

        let mut last_cutoff = self.last_cutoff.lock();
        let resources = self.resources();
        let removed: usize = match *last_cutoff {
            None => resources
                .iter()
                .map(|stat| stat.remove_time_slots_before(cutoff))
                .sum(),
            Some(last) if last < cutoff => resources
                .iter()
                .map(|stat| stat.remove_time_slots_in_range(last, cutoff))
                .sum(),
            Some(_) => 0,
        };
        *last_cutoff = Some(last_cutoff.map_or(cutoff, |last| last.max(cutoff)));

        debug!(cutoff, removed, "清理过期时间槽");

        #[cfg(feature = "monitoring")]
        if let Some(metrics) = &self.metrics {
            metrics.evicted_slots_total.inc_by(removed as u64);
        }

        removed
    }

    /// 为所有已知资源创建当前时间槽并记录峰值并发
    pub fn sample_peak_concurrency(&self, slot_id: i64) {
        for stat in self.resources() {
            stat.sample_peak_concurrency(slot_id);
        }
    }

    /// 启动清理任务与峰值并发采样任务
    ///
    /// 任务只持有弱引用，最后一个 `Arc<FlowStat>` 释放后自动退出。
    pub fn spawn_background_jobs(self: &Arc<Self>) {
        let mut jobs = self.jobs.lock();
        if !jobs.is_empty() {
            debug!("后台任务已启动");
            return;
        }

        jobs.push(Self::spawn_housekeeper(
            Arc::downgrade(self),
            self.shutdown_tx.subscribe(),
            Duration::from_secs(self.config.housekeep_interval_secs),
        ));
        jobs.push(Self::spawn_peak_sampler(
            Arc::downgrade(self),
            self.shutdown_tx.subscribe(),
            Duration::from_millis(self.config.peak_sampler_tick_ms),
        ));

        info!(
            housekeep_interval_secs = self.config.housekeep_interval_secs,
            peak_sampler_tick_ms = self.config.peak_sampler_tick_ms,
            "后台任务已启动"
        );
    }

    fn spawn_housekeeper(
        weak: Weak<Self>,
        mut shutdown: watch::Receiver<bool>,
        period: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => break,
                }
                let Some(stat) = weak.upgrade() else { break };
                stat.housekeep(stat.current_time_millis());
            }
            debug!("清理任务已退出");
        })
    }

    fn spawn_peak_sampler(
        weak: Weak<Self>,
        mut shutdown: watch::Receiver<bool>,
        tick: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut last_slot_id: Option<i64> = None;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => break,
                }
                let Some(stat) = weak.upgrade() else { break };
                let slot_id = stat.current_time_slot_id();
                if last_slot_id != Some(slot_id) {
                    stat.sample_peak_concurrency(slot_id);
                    last_slot_id = Some(slot_id);
                }
            }
            debug!("峰值并发采样任务已退出");
        })
    }

    /// 后台任务是否在运行
    pub fn is_running(&self) -> bool {
        self.jobs.lock().iter().any(|job| !job.is_finished())
    }

    /// 停止后台任务并等待其退出
    pub async fn shutdown(&self) {
        info!("停止流量统计后台任务");
        self.shutdown_tx.send_replace(true);

        let jobs: Vec<JoinHandle<()>> = self.jobs.lock().drain(..).collect();
        for job in jobs {
            let _ = tokio::time::timeout(Duration::from_secs(5), job).await;
        }
    }
}

impl Drop for FlowStat {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
        for job in self.jobs.get_mut().drain(..) {
            job.abort();
        }
    }
}
