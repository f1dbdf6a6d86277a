//! Stagecraft Engine
//!
//! The DAG scheduler and dataflow runtime: stage wiring, fan-out and fan-in
//! over dedicated per-edge channels, lifecycle management, cycle detection,
//! graceful cancellation, and event emission.
//!
//! # Example
//!
//! ```ignore
//! use stagecraft_engine::{build_from_config, Pipeline};
//! use stagecraft_core::config::PipelineConfig;
//!
//! let config = PipelineConfig::from_file(path)?;
//! let pipeline = build_from_config(&config, &registry)?;
//! pipeline.start()?;
//! pipeline.wait().await;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod builder;
mod event_bus;
mod pipeline;
mod scheduler;

pub use builder::build_from_config;
pub use event_bus::EventBus;
pub use pipeline::{DependencyEdge, ExecutionMode, Pipeline, StageBuilder};
