//! Message pipeline.
//!
//! Two independent runs share the Message Store:
//! 1. `Ingestor` refreshes the store from the provider inbox
//! 2. `RuleProcessor` evaluates stored records and reconciles actions

pub mod actions;
pub mod decode;
pub mod ingest;
pub mod loader;
pub mod processor;
pub mod rules;
pub mod types;

pub use ingest::{IngestReport, Ingestor};
pub use processor::{ProcessReport, RuleProcessor};
