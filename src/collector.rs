//! Collector Layer
//!
//! Resolves configured sources into live counter handles and structured
//! queries, polls them on per-unit worker threads and turns the results into
//! metric records.
//!
//! # Architecture
//!
//! - [`CounterProvider`] / [`QueryProvider`]: platform capabilities the engine polls through
//! - [`SourceResolver`]: turns [`SourceSpec`](crate::config::SourceSpec)s into sources
//! - [`CounterSet`] / [`QuerySet`]: per-unit active sources and cached handles
//! - [`SchedulingUnit`]: the cycle state machine of one worker
//!
//! # Example
//!
//! ```rust
//! use perfmon::collector::{MemoryCounterProvider, SourceResolver};
//! use perfmon::config::{CounterSpec, EngineDefaults, SourceSpec};
//!
//! let provider = MemoryCounterProvider::new()
//!     .with_counter("Processor", "_Total", "% Idle Time", 97.5);
//! let resolver = SourceResolver::new(EngineDefaults::default());
//! let spec = SourceSpec::counters("PerfCounter", "Processor", "*", vec![CounterSpec::new("*")]);
//!
//! let resolution = resolver.resolve(0, &spec);
//! let refs = resolver.expand(&provider, &resolution.counter_sources[0]).unwrap();
//! assert_eq!(refs.len(), 1);
//! ```

pub mod aggregate;
pub mod counter;
pub mod identity;
pub mod key;
pub mod memory;
pub mod normalize;
pub mod query;
pub mod resolver;
pub mod scheduler;
pub mod traits;

pub use counter::{CounterReading, CounterSet};
pub use identity::{IdentityContext, IdentityError, UnitIdentity};
pub use key::CounterRef;
pub use memory::{MemoryCounterProvider, MemoryQueryProvider};
pub use normalize::{RawValue, normalize};
pub use query::{AttributeRule, PropertyValue, QueryKind, QuerySet, QuerySource, Row, ScopeCache};
pub use resolver::{CounterSource, Resolution, ResolutionError, SourceResolver};
pub use scheduler::{RunMode, SchedulingUnit, UnitKey, UnitReport, UnitState};
pub use traits::{
    CollectorError, CounterHandle, CounterProvider, Credentials, ProviderError, QueryProvider,
    Scope, UnsupportedProvider,
};
