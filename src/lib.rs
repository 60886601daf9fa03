//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! FlowStat - In-memory flow control and traffic statistics for API gateways
//!
//! Decides per request whether a chain of routable resources
//! (route → service → API key) may proceed under configured concurrency and
//! QPS limits, and keeps sliding per-slot windows of traffic, latency, status
//! and circuit-breaker counters for every resource.
//!
//! # API Layers
//!
//! ## Prelude (Quick Start)
//!
//! Use `use flowstat::prelude::*;` to import all commonly used types.
//!
//! ## Core API
//!
//! - [`FlowStat`] - Process-wide registry, admission/release and window queries
//! - [`FlowStatConfig`] - Slot width, retention and background job periods
//! - [`ResourceConfig`] - Per-request limits of one resource in the chain
//! - [`IncrRequestResult`] - Admission outcome
//! - [`TimeWindowStat`] / [`ResourceTimeWindowStat`] - Aggregated read views
//!
//! ## Building blocks
//!
//! - [`ResourceStat`] - Concurrency gauge and time slots of one resource
//! - [`TimeSlot`] - All counters of one resource in one interval
//!
//! ## Extensions (feature-gated)
//!
//! - Prometheus metrics (requires `monitoring` feature)
//! - tracing-subscriber setup (requires `telemetry` feature)
//!
//! # Examples
//!
//! ```rust
//! use flowstat::prelude::*;
//!
//! let stat = FlowStat::new(FlowStatConfig::default()).unwrap();
//! let chain = vec![ResourceConfig::new("route-1", 1, 0)];
//! let slot_id = stat.current_time_slot_id();
//!
//! assert!(stat.incr_request(&chain, slot_id).is_success());
//! assert_eq!(
//!     stat.incr_request(&chain, slot_id).block_type(),
//!     Some(BlockType::ConcurrentRequest)
//! );
//!
//! stat.add_request_rt(&chain, slot_id, 8, true);
//! let window = stat.get_time_window_stat("route-1", slot_id, slot_id + 1000).unwrap();
//! assert_eq!(window.requests, 1);
//! assert_eq!(window.block_requests, 1);
//! ```

pub mod prelude;

pub mod config;
pub mod constants;
pub mod error;
pub mod flow_stat;
pub mod resource_stat;
pub mod stats;
#[cfg(any(feature = "telemetry", feature = "monitoring"))]
pub mod telemetry;
pub mod time_slot;

// 重新导出常用类型
pub use config::{validate_chain, FlowStatConfig, ResourceConfig};
pub use error::{CircuitState, FlowStatError};
pub use flow_stat::FlowStat;
pub use resource_stat::ResourceStat;
pub use stats::{
    BlockType, IncrRequestResult, ResourceTimeWindowStat, StatusCounts, TimeWindowStat,
};
#[cfg(feature = "telemetry")]
pub use telemetry::init_tracing;
#[cfg(feature = "monitoring")]
pub use telemetry::Metrics;
pub use time_slot::{RtSnapshot, TimeSlot};
