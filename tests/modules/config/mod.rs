//! 配置加载测试
