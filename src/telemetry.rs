//! 监控和日志初始化模块
//!
//! # 功能
//!
//! - Prometheus指标：准入、拒绝、重复释放、清理的时间槽数、资源数（`monitoring` 特性）
//! - tracing-subscriber 初始化（`telemetry` 特性）
//!
//! 指标的导出传输不在本库范围内，调用方通过 [`Metrics::gather`] 获取文本格式。

#[cfg(feature = "monitoring")]
use crate::stats::BlockType;
#[cfg(feature = "monitoring")]
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
#[cfg(feature = "monitoring")]
use tracing::error;

/// 监控指标
#[cfg(feature = "monitoring")]
#[derive(Clone)]
pub struct Metrics {
    /// 准入成功数
    pub admissions_total: IntCounter,
    /// 拒绝数（按拒绝类型）
    pub blocked_total: IntCounterVec,
    /// 重复释放次数
    pub release_anomalies_total: IntCounter,
    /// 被清理的时间槽数
    pub evicted_slots_total: IntCounter,
    /// 已知资源数
    pub resources: IntGauge,
    /// 指标注册表
    registry: Registry,
}

#[cfg(feature = "monitoring")]
impl Metrics {
    /// 创建新的监控指标，注册到独立的注册表
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let admissions_total = IntCounter::with_opts(Opts::new(
            "flowstat_admissions_total",
            "Total number of admitted request chains",
        ))?;
        let blocked_total = IntCounterVec::new(
            Opts::new(
                "flowstat_blocked_total",
                "Total number of blocked request chains",
            ),
            &["type"],
        )?;
        let release_anomalies_total = IntCounter::with_opts(Opts::new(
            "flowstat_release_anomalies_total",
            "Releases observed on a resource whose concurrency was already zero",
        ))?;
        let evicted_slots_total = IntCounter::with_opts(Opts::new(
            "flowstat_evicted_slots_total",
            "Time slots removed by housekeeping",
        ))?;
        let resources = IntGauge::with_opts(Opts::new(
            "flowstat_resources",
            "Number of tracked resources",
        ))?;

        registry.register(Box::new(admissions_total.clone()))?;
        registry.register(Box::new(blocked_total.clone()))?;
        registry.register(Box::new(release_anomalies_total.clone()))?;
        registry.register(Box::new(evicted_slots_total.clone()))?;
        registry.register(Box::new(resources.clone()))?;

        Ok(Self {
            admissions_total,
            blocked_total,
            release_anomalies_total,
            evicted_slots_total,
            resources,
            registry,
        })
    }

    pub(crate) fn record_block(&self, block_type: BlockType) {
        let label = match block_type {
            BlockType::ConcurrentRequest => "concurrent_request",
            BlockType::Qps => "qps",
        };
        self.blocked_total.with_label_values(&[label]).inc();
    }

    /// 以Prometheus文本格式导出
    pub fn gather(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            error!("Failed to encode metrics: {}", e);
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

/// 初始化全局 tracing 订阅者
///
/// `filter` 使用 `EnvFilter` 语法，例如 `"flowstat=debug"`；
/// 设置了 `RUST_LOG` 时以环境变量为准。已有全局订阅者时返回错误。
#[cfg(feature = "telemetry")]
pub fn init_tracing(filter: &str) -> Result<(), crate::error::FlowStatError> {
    use tracing_subscriber::EnvFilter;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .map_err(|e| crate::error::FlowStatError::ConfigError(e.to_string()))
}
