//! Core domain layer for the glucose analytics engine.
//!
//! Holds the reading and result models, the immutable engine configuration,
//! error types, wall-clock time helpers, and the summary-metrics calculator.
//! Nothing here performs I/O.

pub mod calculations;
pub mod config;
pub mod error;
pub mod formatting;
pub mod models;
pub mod percentile;
pub mod time_utils;

pub use calculations::{calculate_metrics, DateFilter, MetricsOptions};
pub use config::EngineConfig;
pub use error::{FormatError, GlucoseError, Result};
pub use time_utils::{DateWindow, TimeFilter};
