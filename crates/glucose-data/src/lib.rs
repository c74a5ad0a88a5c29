//! Data layer for the glucose analytics engine.
//!
//! Parses CareLink exports and workday lists, builds the Ambulatory Glucose
//! Profile and day curves, detects episodes, data gaps and sensor changes,
//! totals bolus insulin, assembles day profiles and runs the top-level
//! analysis pipeline.

pub mod aggregator;
pub mod analysis;
pub mod analyzer;
pub mod clustering;
pub mod day_profile;
pub mod gaps;
pub mod insulin;
pub mod reader;
pub mod workdays;

pub use analysis::{AnalysisMetadata, AnalysisResult, GlucoseEngine};
pub use glucose_core as core;
