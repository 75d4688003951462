//! Counter identity.
//!
//! [`CounterRef`] is the cache key for live counter handles. The key is the
//! structured `(category, counter, instance)` triple itself, so two distinct
//! triples can never compare equal regardless of where one field ends and the
//! next begins.

use std::fmt;

/// Identifies one resolvable native counter.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CounterRef {
    /// Counter category (e.g. "Processor").
    pub category: String,
    /// Counter display name (e.g. "% Processor Time").
    pub counter: String,
    /// Instance name; empty for single-instance categories.
    pub instance: String,
}

impl CounterRef {
    /// Create a counter reference.
    pub fn new(
        category: impl Into<String>,
        counter: impl Into<String>,
        instance: impl Into<String>,
    ) -> Self {
        Self {
            category: category.into(),
            counter: counter.into(),
            instance: instance.into(),
        }
    }

    /// The `(category, instance)` pair records are grouped by.
    pub fn group(&self) -> (&str, &str) {
        (&self.category, &self.instance)
    }
}

impl fmt::Display for CounterRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.instance.is_empty() {
            write!(f, "{}/{}", self.category, self.counter)
        } else {
            write!(f, "{}({})/{}", self.category, self.instance, self.counter)
        }
    }
}
