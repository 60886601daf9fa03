//! Prelude module - Commonly used types for quick imports
//!
//! This module re-exports the most commonly used types from FlowStat,
//! allowing users to import them with a single `use flowstat::prelude::*;`
//! statement instead of importing each type individually.

// Core types - always available
pub use crate::config::{FlowStatConfig, ResourceConfig};
pub use crate::error::{CircuitState, FlowStatError};
pub use crate::flow_stat::FlowStat;

// Result and read views
pub use crate::stats::{BlockType, IncrRequestResult, ResourceTimeWindowStat, TimeWindowStat};

// Feature-gated exports
#[cfg(feature = "monitoring")]
pub use crate::telemetry::Metrics;
