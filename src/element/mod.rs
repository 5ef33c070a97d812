//! Elements transferred between execution nodes.
//!
//! This module defines what flows through a pipeline:
//!
//! - [`Chunk`]: raw bytes, sized in bytes
//! - [`RecordBatch`]: structured events, sized in rows
//! - [`Void`]: nothing, the input of sources and the output of sinks
//!
//! Every element type implements [`Element`] (size and split) and
//! [`Defaults`] (its demand limits).
//!
//! # Example
//!
//! ```rust,ignore
//! use sluice::element::{Chunk, Element, split_front};
//! use std::collections::VecDeque;
//!
//! let mut buffer: VecDeque<Chunk> = VecDeque::from([Chunk::from("hello"), Chunk::from("world")]);
//! let prefix = split_front(&mut buffer, 7);
//! assert_eq!(prefix.len(), 2);
//! assert_eq!(buffer[0].as_bytes(), b"rld");
//! ```

mod batch;
mod chunk;
mod traits;

pub use batch::{RecordBatch, Row, Schema, Value};
pub use chunk::Chunk;
pub use traits::{Defaults, Element, ElementKind, Void, split_front, total_size};
