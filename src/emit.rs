//! Emit Layer
//!
//! Serializes finished metric batches on a single writer thread:
//! - **Actor**: owns the output stream, processes commands from a bounded channel
//! - **Writer**: cloneable facade handed to scheduling units
//!
//! # Components
//!
//! - [`MetricRecord`] / [`MetricBatch`]: logical output shape of one cycle
//! - [`Emitter`]: sink trait the engine reports batches to
//! - [`BatchWriter`]: channel-backed [`Emitter`]
//! - [`EmitBuilder`] / [`EmitHandles`]: initialization and lifecycle management

mod actor;
mod builder;
mod error;
mod types;
mod writer;

pub use builder::{EmitBuilder, EmitHandles};
pub use error::EmitError;
pub use types::{Envelope, EVENT_TYPE_KEY, MetricBatch, MetricRecord, NAME_KEY};
pub use writer::{BatchWriter, Emitter};
