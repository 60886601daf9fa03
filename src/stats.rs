//! 统计结果类型
//!
//! 准入结果与只读的时间窗口聚合视图，构建后不再修改。

use serde::{Deserialize, Serialize};

/// 拒绝类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockType {
    /// 并发数超限
    ConcurrentRequest,
    /// QPS超限
    Qps,
}

/// 准入结果
///
/// 被拒绝是正常结果而非错误，代理层负责将其转换为对客户端的背压。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IncrRequestResult {
    /// 允许
    Success,
    /// 拒绝
    Blocked {
        resource_id: String,
        block_type: BlockType,
    },
}

impl IncrRequestResult {
    pub fn success() -> Self {
        IncrRequestResult::Success
    }

    pub fn block(resource_id: impl Into<String>, block_type: BlockType) -> Self {
        IncrRequestResult::Blocked {
            resource_id: resource_id.into(),
            block_type,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, IncrRequestResult::Success)
    }

    pub fn is_blocked(&self) -> bool {
        !self.is_success()
    }

    /// 被拒绝的资源ID
    pub fn blocked_resource_id(&self) -> Option<&str> {
        match self {
            IncrRequestResult::Blocked { resource_id, .. } => Some(resource_id),
            IncrRequestResult::Success => None,
        }
    }

    pub fn block_type(&self) -> Option<BlockType> {
        match self {
            IncrRequestResult::Blocked { block_type, .. } => Some(*block_type),
            IncrRequestResult::Success => None,
        }
    }
}

/// HTTP状态码分类计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub status_2xx: u64,
    pub status_4xx: u64,
    pub status_5xx: u64,
    pub status_504: u64,
}

impl StatusCounts {
    pub(crate) fn merge(&mut self, other: &StatusCounts) {
        self.status_2xx += other.status_2xx;
        self.status_4xx += other.status_4xx;
        self.status_5xx += other.status_5xx;
        self.status_504 += other.status_504;
    }
}

/// 时间窗口统计 `[start_time, end_time)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeWindowStat {
    pub resource_id: String,
    /// 窗口起点（包含）
    pub start_time: i64,
    /// 窗口终点（不包含）
    pub end_time: i64,
    /// 请求总数
    pub requests: u64,
    /// 错误请求数
    pub errors: u64,
    /// 已完成请求数
    pub comp_reqs: u64,
    /// 最小响应时间，窗口内无完成请求时为 None
    pub min: Option<u64>,
    /// 最大响应时间
    pub max: Option<u64>,
    /// 平均响应时间
    pub avg_rt: Option<f64>,
    /// 每秒请求数
    pub rps: f64,
    /// 窗口内各时间槽峰值并发的最大值
    pub peak_concurrency: u64,
    /// 本资源导致的拒绝数
    pub block_requests: u64,
    /// 本资源及其下层资源导致的拒绝数
    pub total_block_requests: u64,
    pub status_counts: StatusCounts,
    pub circuit_break_num: u64,
    pub gradual_resume_num: u64,
    pub gradual_reject_num: u64,
}

impl TimeWindowStat {
    pub fn duration_ms(&self) -> i64 {
        self.end_time - self.start_time
    }

    pub fn error_rate(&self) -> f64 {
        if self.comp_reqs == 0 {
            0.0
        } else {
            self.errors as f64 / self.comp_reqs as f64
        }
    }
}

/// 单个资源的有序窗口序列
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceTimeWindowStat {
    pub resource_id: String,
    pub windows: Vec<TimeWindowStat>,
}

impl ResourceTimeWindowStat {
    pub fn new(resource_id: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            windows: Vec::new(),
        }
    }
}
