//! 测试模块根目录
//!
//! 按功能模块组织的测试

#[allow(unused_imports)]
pub mod config;
#[allow(unused_imports)]
pub mod flow_stat;
