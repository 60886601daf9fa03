//! 流量统计测试
