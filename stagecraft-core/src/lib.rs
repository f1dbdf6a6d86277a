//! Stagecraft Core Library
//!
//! This crate provides the foundational types for the stagecraft pipeline
//! engine: the data model that flows between stages, the step contract, the
//! configuration schemas, and the value resolution subsystem.
//!
//! # Overview
//!
//! A stagecraft pipeline is a DAG of named *stages*, each wrapping a reusable
//! *step*. Stages exchange [`StepOutput`] envelopes over bounded channels; the
//! scheduler (in `stagecraft-engine`) wires the channels and drives lifecycle.
//!
//! # Key Components
//!
//! - **Datum / NamedOutputs**: the payload carrier and the labeled outputs a
//!   step produces on each emission
//! - **Step**: the `{is_continuous, run}` contract every step implements
//! - **ValueSpec**: the polymorphic value model distinguishing build-time
//!   literals from runtime-evaluated expressions
//! - **Config**: pipeline and service definition schemas loaded from YAML

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod datum;
pub mod envelope;
pub mod error;
pub mod events;
pub mod registry;
pub mod step;
pub mod value;

// Re-export key types at crate root for convenience
pub use datum::{default_output, single_output, Datum, NamedOutputs, DEFAULT_OUTPUT};
pub use envelope::{EventId, StepInput, StepOutput};
pub use error::{Error, Result};
pub use events::{Event, EventKind, EventListener};
pub use registry::StepRegistry;
pub use step::{Step, StepConfig, StepFactory};
pub use value::ValueSpec;
