//! # Sluice
//!
//! A demand-driven streaming pipeline engine for byte and event processing.
//!
//! A pipeline is a chain of operators: a source, any number of transforms
//! and a sink. Every operator runs inside its own execution node, and
//! adjacent nodes regulate the flow of data between them with a pull-based
//! demand protocol, so memory stays bounded no matter how fast the source
//! is or how slow the sink.
//!
//! ## Features
//!
//! - **Bounded buffering**: per-node inbound and outbound limits, in bytes
//!   for raw chunks and in rows for record batches
//! - **One outstanding demand**: a node never asks its predecessor for more
//!   while a request is in flight
//! - **Lazy operators**: operators are generators resumed step by step,
//!   cooperatively scheduled on Tokio
//! - **Clean aborts**: the first error stops the whole pipeline and is
//!   reported exactly once
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sluice::prelude::*;
//!
//! let (sink, collected) = Collect::<RecordBatch>::new();
//! let pipeline = Pipeline::new("lines")
//!     .then(IterSource::new("input", vec![Chunk::from("a\nb\n")]))
//!     .then(ReadLines::new())
//!     .then(sink);
//! PipelineExecutor::new().run(pipeline).await?;
//! assert_eq!(collected.size(), 2);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod defaults;
pub mod diagnostics;
pub mod element;
pub mod error;
pub mod exec;
pub mod observability;
pub mod operator;
pub mod pipeline;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::diagnostics::{Diagnostic, DiagnosticHandler, Severity};
    pub use crate::element::{Chunk, Element, RecordBatch, Schema, Value, Void};
    pub use crate::error::{Error, Result};
    pub use crate::exec::{DemandLimits, NodeHandle};
    pub use crate::operator::{
        BoxGenerator, Collect, ControlPlane, Discard, Generator, InputAdapter, IterSource,
        Operator, Passthrough, ReadLines, Step, from_fn, from_iter,
    };
    pub use crate::pipeline::{ExecutorConfig, Pipeline, PipelineExecutor, PipelineHandle};
}

pub use error::{Error, Result};
