//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! Centralized configuration constants for FlowStat.
//!
//! All magic numbers used by the statistics engine are defined here with
//! their purpose and usage context.

/// Default width of a time slot in milliseconds.
///
/// Every slot id is an epoch-millisecond timestamp aligned to this value.
pub const DEFAULT_INTERVAL_MS: u64 = 1_000;

/// Default retention of slot data in minutes.
///
/// Slots older than `now - retention` are removed by the housekeeping job.
pub const DEFAULT_RETENTION_MINUTES: u64 = 10;

/// Default period of the housekeeping job (1 minute).
pub const DEFAULT_HOUSEKEEP_INTERVAL_SECS: u64 = 60;

/// Default tick of the peak-concurrency sampler (1 millisecond).
///
/// The sampler pre-creates the current slot for every known resource as soon
/// as the slot id changes, so its resolution bounds how late that can happen.
pub const DEFAULT_PEAK_SAMPLER_TICK_MS: u64 = 1;

/// Width of one second in milliseconds.
///
/// Custom query windows are expressed in seconds regardless of the slot width.
pub const MILLIS_PER_SECOND: i64 = 1_000;

/// Initial capacity of the resource registry.
pub const DEFAULT_RESOURCE_CAPACITY: usize = 100;

/// Initial traffic factor of a gradually resuming circuit breaker.
pub const DEFAULT_RESUME_TRAFFIC_FACTOR: u32 = 1;
