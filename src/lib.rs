//! Perfmon - Configuration-Driven Metric Collection
//!
//! This crate resolves a declarative list of metric sources into live native
//! counters and structured queries, polls them on a schedule, normalizes the
//! results into flat metric records and emits one batch per cycle. It can be
//! embedded as a library or run with the `perfmon` executable.
//!
//! # Architecture
//!
//! - **Config**: YAML source list, engine defaults and run options
//! - **Collector**: resolution, provider adapters, aggregation and scheduling units
//! - **Engine**: groups sources into units and runs one worker thread per unit
//! - **Emit**: single-writer actor serializing batches as JSON envelopes
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use perfmon::{AppConfig, EmitBuilder, Engine, Providers, RunOptions};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::load("configs/perfmon.yaml")?;
//! let emit = EmitBuilder::stdout().build()?;
//!
//! let engine = Engine::builder(config.counterlist, Arc::new(emit.writer.clone()))
//!     .defaults(config.defaults)
//!     .options(&RunOptions { run_once: true, ..Default::default() })
//!     .providers(Providers::unsupported())
//!     .build()?;
//!
//! engine.run_once()?;
//! emit.shutdown()?;
//! # Ok(())
//! # }
//! ```

pub mod collector;
pub mod config;
pub mod emit;
pub mod engine;

pub use collector::{
    CounterProvider, CounterRef, Credentials, IdentityContext, MemoryCounterProvider,
    MemoryQueryProvider, QueryProvider, RawValue, Row, UnsupportedProvider,
};
pub use config::{AppConfig, ConfigError, CounterSpec, EngineDefaults, RunOptions, SourceSpec};
pub use emit::{BatchWriter, EmitBuilder, EmitError, EmitHandles, Emitter, MetricBatch, MetricRecord};
pub use engine::{Engine, EngineBuilder, EngineError, Providers, UnitInfo};
