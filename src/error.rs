//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 错误类型定义
//!
//! 使用thiserror定义所有错误类型。热路径（准入、释放、查询）不返回错误，
//! 只有配置的构建与加载会失败。

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// FlowStat 错误类型
#[derive(Error, Debug)]
pub enum FlowStatError {
    /// 配置错误
    #[error("配置错误: {0}")]
    ConfigError(String),

    /// 验证错误
    #[error("验证错误: {0}")]
    ValidationError(String),

    /// IO错误
    #[error("IO错误: {0}")]
    IoError(#[from] std::io::Error),

    /// 序列化错误
    #[error("序列化错误: {0}")]
    SerdeError(#[from] serde_json::Error),

    /// YAML解析错误
    #[error("YAML解析错误: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// TOML解析错误
    #[error("TOML解析错误: {0}")]
    TomlError(#[from] toml::de::Error),
}

/// 熔断器状态
///
/// 状态只在时间槽中存储，状态转换由外部熔断策略负责。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    /// 关闭状态（正常）
    Closed,
    /// 打开状态（熔断）
    Open,
    /// 逐步恢复状态
    ResumeGradually,
}

impl CircuitState {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::ResumeGradually => 2,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => CircuitState::Open,
            2 => CircuitState::ResumeGradually,
            _ => CircuitState::Closed,
        }
    }
}

impl Default for CircuitState {
    fn default() -> Self {
        CircuitState::Closed
    }
}
