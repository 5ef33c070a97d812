//! Pipeline construction and execution.
//!
//! This module provides the pipeline layer on top of the execution nodes:
//!
//! - [`Pipeline`]: A linear chain of operators, validated and optimized
//!   before it runs
//! - [`PipelineExecutor`]: Spawns one execution node per operator and
//!   supervises them
//! - [`PipelineHandle`]: Waits for, aborts, pauses and resumes a running
//!   pipeline
//! - [`PipelineEvent`]: Async events emitted during execution
//!
//! # Example
//!
//! ```rust,ignore
//! use sluice::prelude::*;
//!
//! let (sink, collected) = Collect::<RecordBatch>::new();
//! let mut pipeline = Pipeline::new("lines")
//!     .then(IterSource::new("input", chunks))
//!     .then(ReadLines::new())
//!     .then(sink);
//! pipeline.optimize();
//!
//! let mut handle = PipelineExecutor::new().start(pipeline).await?;
//! let mut events = handle.events().unwrap();
//! handle.wait().await?;
//! ```

mod chain;
mod events;
mod executor;

pub use chain::Pipeline;
pub use events::{EventReceiver, EventSender, EventStream, PipelineEvent};
pub use executor::{ExecutorConfig, PipelineExecutor, PipelineHandle};
