//! 配置模块
//!
//! 定义统计引擎的配置结构，以及随请求传入的资源限流配置。

use crate::constants::{
    DEFAULT_HOUSEKEEP_INTERVAL_SECS, DEFAULT_INTERVAL_MS, DEFAULT_PEAK_SAMPLER_TICK_MS,
    DEFAULT_RETENTION_MINUTES, MILLIS_PER_SECOND,
};
use crate::error::FlowStatError;
use ahash::AHashSet as HashSet;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 统计引擎配置
///
/// `interval_ms` 在构建 [`FlowStat`](crate::flow_stat::FlowStat) 后固定不变，
/// `retention_minutes` 可在运行时通过 `update_retention_time` 修改。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowStatConfig {
    /// 时间槽宽度（毫秒）
    pub interval_ms: u64,
    /// 数据保留时间（分钟）
    pub retention_minutes: u64,
    /// 清理任务周期（秒）
    pub housekeep_interval_secs: u64,
    /// 峰值并发采样任务的检查周期（毫秒）
    pub peak_sampler_tick_ms: u64,
}

impl Default for FlowStatConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_INTERVAL_MS,
            retention_minutes: DEFAULT_RETENTION_MINUTES,
            housekeep_interval_secs: DEFAULT_HOUSEKEEP_INTERVAL_SECS,
            peak_sampler_tick_ms: DEFAULT_PEAK_SAMPLER_TICK_MS,
        }
    }
}

impl FlowStatConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interval_ms(mut self, interval_ms: u64) -> Self {
        self.interval_ms = interval_ms;
        self
    }

    pub fn retention_minutes(mut self, minutes: u64) -> Self {
        self.retention_minutes = minutes;
        self
    }

    pub fn housekeep_interval_secs(mut self, secs: u64) -> Self {
        self.housekeep_interval_secs = secs;
        self
    }

    pub fn peak_sampler_tick_ms(mut self, tick_ms: u64) -> Self {
        self.peak_sampler_tick_ms = tick_ms;
        self
    }

    /// 校验配置
    ///
    /// 时间槽宽度必须整除一秒或是一秒的整数倍，否则按秒划分的自定义窗口
    /// 无法与时间槽对齐。
    pub fn validate(&self) -> Result<(), FlowStatError> {
        if self.interval_ms == 0 {
            return Err(FlowStatError::ValidationError(
                "时间槽宽度必须大于0".to_string(),
            ));
        }

        let second = MILLIS_PER_SECOND as u64;
        let aligned = if self.interval_ms <= second {
            second % self.interval_ms == 0
        } else {
            self.interval_ms % second == 0
        };
        if !aligned {
            return Err(FlowStatError::ValidationError(format!(
                "时间槽宽度 {}ms 无法与秒对齐",
                self.interval_ms
            )));
        }

        if self.retention_minutes == 0 {
            return Err(FlowStatError::ValidationError(
                "数据保留时间必须大于0".to_string(),
            ));
        }

        if self.housekeep_interval_secs == 0 {
            return Err(FlowStatError::ValidationError(
                "清理任务周期必须大于0".to_string(),
            ));
        }

        if self.peak_sampler_tick_ms == 0 {
            return Err(FlowStatError::ValidationError(
                "采样任务周期必须大于0".to_string(),
            ));
        }

        Ok(())
    }

    /// 从YAML字符串加载并校验
    pub fn from_yaml_str(content: &str) -> Result<Self, FlowStatError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// 从TOML字符串加载并校验
    pub fn from_toml_str(content: &str) -> Result<Self, FlowStatError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// 从JSON字符串加载并校验
    pub fn from_json_str(content: &str) -> Result<Self, FlowStatError> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// 从文件加载，按扩展名选择格式
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, FlowStatError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content),
            Some("toml") => Self::from_toml_str(&content),
            Some("json") => Self::from_json_str(&content),
            other => Err(FlowStatError::ConfigError(format!(
                "不支持的配置文件格式: {:?}",
                other
            ))),
        }
    }

    /// 保留时间对应的毫秒数，向下对齐到时间槽宽度
    pub(crate) fn retention_ms(interval_ms: u64, retention_minutes: u64) -> i64 {
        let raw = retention_minutes.saturating_mul(60 * MILLIS_PER_SECOND as u64);
        (raw / interval_ms * interval_ms) as i64
    }
}

/// 资源限流配置
///
/// 由路由层按请求提供，按从外到内（路由 → 服务 → API Key）的顺序排列。
/// `max_con` / `max_qps` 小于等于0表示不限制。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceConfig {
    pub resource_id: String,
    #[serde(default)]
    pub max_con: i64,
    #[serde(default)]
    pub max_qps: i64,
}

impl ResourceConfig {
    pub fn new(resource_id: impl Into<String>, max_con: i64, max_qps: i64) -> Self {
        Self {
            resource_id: resource_id.into(),
            max_con,
            max_qps,
        }
    }

    /// 不限流的资源（只统计）
    pub fn unlimited(resource_id: impl Into<String>) -> Self {
        Self::new(resource_id, 0, 0)
    }

    /// 是否配置了任意限制
    pub fn is_limited(&self) -> bool {
        self.max_con > 0 || self.max_qps > 0
    }
}

/// 校验资源链
///
/// 同一条链中重复的资源会被重复计数，这里拒绝这种配置。
pub fn validate_chain(chain: &[ResourceConfig]) -> Result<(), FlowStatError> {
    let mut seen = HashSet::new();
    for (index, config) in chain.iter().enumerate() {
        if config.resource_id.is_empty() {
            return Err(FlowStatError::ValidationError(format!(
                "资源[{}]ID不能为空",
                index
            )));
        }
        if !seen.insert(config.resource_id.as_str()) {
            return Err(FlowStatError::ValidationError(format!(
                "资源ID重复: {}",
                config.resource_id
            )));
        }
    }
    Ok(())
}
