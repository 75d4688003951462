//! Native counter sources and their cached handles.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::collector::key::CounterRef;
use crate::collector::resolver::{CounterSource, SourceResolver};
use crate::collector::traits::{CounterHandle, CounterProvider, ProviderError};

/// One sampled counter value.
#[derive(Debug, Clone, PartialEq)]
pub struct CounterReading {
    pub counter: CounterRef,
    pub value: f64,
}

/// Read one sample. NaN means the provider had nothing this cycle.
pub fn read_sample(handle: &mut dyn CounterHandle) -> Result<Option<f64>, ProviderError> {
    let value = handle.next_value()?;
    Ok((!value.is_nan()).then_some(value))
}

/// The counter sources of one scheduling unit and their live handles.
///
/// Handles are cached per [`CounterRef`] and reused across cycles. A handle
/// that fails to open or read is retired and not reopened while its counter
/// stays present.
#[derive(Default)]
pub struct CounterSet {
    sources: Vec<CounterSource>,
    handles: BTreeMap<CounterRef, Box<dyn CounterHandle>>,
    retired: HashSet<CounterRef>,
}

impl std::fmt::Debug for CounterSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CounterSet")
            .field("sources", &self.sources)
            .field("handles", &self.handles.len())
            .field("retired", &self.retired.len())
            .finish()
    }
}

impl CounterSet {
    pub fn new(sources: Vec<CounterSource>) -> Self {
        Self {
            sources,
            ..Default::default()
        }
    }

    pub fn sources(&self) -> &[CounterSource] {
        &self.sources
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Number of cached handles.
    pub fn handle_count(&self) -> usize {
        self.handles.len()
    }

    /// Re-resolve every source against the provider's current instances.
    ///
    /// Sources whose category vanished are removed for the rest of the run.
    /// Sources that cannot be enumerated right now are kept and keep their
    /// existing handles until the next refresh. Handles for counters no
    /// longer present are dropped, and their retirement is forgotten so a
    /// reappearing instance gets a fresh handle. Returns the number of
    /// sources removed.
    pub fn refresh(&mut self, resolver: &SourceResolver, provider: &dyn CounterProvider) -> usize {
        let mut live = BTreeSet::new();
        let mut unavailable = HashSet::new();
        let mut removed = 0;

        self.sources.retain(|source| match resolver.expand(provider, source) {
            Ok(refs) => {
                live.extend(refs);
                true
            }
            Err(err) if err.is_transient() => {
                err.log();
                unavailable.insert(source.category.clone());
                true
            }
            Err(err) => {
                err.log();
                removed += 1;
                false
            }
        });

        let keep = |key: &CounterRef| live.contains(key) || unavailable.contains(&key.category);

        self.handles.retain(|key, _| {
            let kept = keep(key);
            if !kept {
                tracing::debug!(counter = %key, "Counter no longer present, dropping handle");
            }
            kept
        });
        self.retired.retain(|key| keep(key));

        for key in live {
            if self.handles.contains_key(&key) || self.retired.contains(&key) {
                continue;
            }
            match provider.open(&key) {
                Ok(handle) => {
                    tracing::debug!(counter = %key, "Opened counter handle");
                    self.handles.insert(key, handle);
                }
                Err(e) => {
                    tracing::warn!(counter = %key, error = %e, "Skipping monitoring of counter");
                    self.retired.insert(key);
                }
            }
        }

        removed
    }

    /// Sample every cached handle once.
    pub fn collect(&mut self) -> Vec<CounterReading> {
        let mut readings = Vec::with_capacity(self.handles.len());
        let mut failed = Vec::new();

        for (key, handle) in self.handles.iter_mut() {
            tracing::trace!(counter = %key, "Collecting counter");
            match read_sample(handle.as_mut()) {
                Ok(Some(value)) => readings.push(CounterReading {
                    counter: key.clone(),
                    value,
                }),
                Ok(None) => tracing::debug!(counter = %key, "Counter returned no result"),
                Err(e) => {
                    tracing::error!(counter = %key, error = %e, "Exception occurred in processing next value");
                    failed.push(key.clone());
                }
            }
        }

        for key in failed {
            self.handles.remove(&key);
            self.retired.insert(key);
        }

        readings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::memory::MemoryCounterProvider;
    use crate::collector::resolver::{CounterSelector, InstanceSelector};
    use crate::config::EngineDefaults;

    fn source(category: &str, instance: InstanceSelector, counters: Vec<CounterSelector>) -> CounterSource {
        CounterSource {
            index: 0,
            category: category.to_string(),
            instance,
            counters,
        }
    }

    fn resolver() -> SourceResolver {
        SourceResolver::new(EngineDefaults::default())
    }

    #[test]
    fn test_refresh_is_idempotent() {
        let provider = MemoryCounterProvider::new()
            .with_counter("Processor", "_Total", "% Idle Time", 90.0)
            .with_counter("Processor", "0", "% Idle Time", 80.0);
        let mut set = CounterSet::new(vec![source(
            "Processor",
            InstanceSelector::All,
            vec![CounterSelector::All],
        )]);

        set.refresh(&resolver(), &provider);
        set.refresh(&resolver(), &provider);

        assert_eq!(set.handle_count(), 2);
        assert_eq!(provider.opened(), 2);
    }

    #[test]
    fn test_nan_produces_no_reading() {
        let provider = MemoryCounterProvider::new()
            .with_counter("Memory", "", "Available MBytes", f64::NAN)
            .with_counter("Memory", "", "Committed Bytes", 1024.0);
        let mut set = CounterSet::new(vec![source(
            "Memory",
            InstanceSelector::All,
            vec![CounterSelector::All],
        )]);

        set.refresh(&resolver(), &provider);
        let readings = set.collect();

        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].counter.counter, "Committed Bytes");
        assert_eq!(set.handle_count(), 2);
    }

    #[test]
    fn test_read_failure_retires_handle() {
        let provider = MemoryCounterProvider::new()
            .with_counter("Processor", "_Total", "% Idle Time", 90.0)
            .with_counter("Processor", "_Total", "% User Time", 5.0);
        let broken = CounterRef::new("Processor", "% User Time", "_Total");
        provider.fail_reads(&broken, "device removed");

        let mut set = CounterSet::new(vec![source(
            "Processor",
            InstanceSelector::Named("_Total".to_string()),
            vec![CounterSelector::All],
        )]);
        set.refresh(&resolver(), &provider);
        assert_eq!(set.collect().len(), 1);

        set.refresh(&resolver(), &provider);
        assert_eq!(set.handle_count(), 1);
        assert_eq!(set.collect().len(), 1);
        assert_eq!(provider.opened(), 2);
    }

    #[test]
    fn test_vanished_instance_drops_handle() {
        let provider = MemoryCounterProvider::new()
            .with_counter("Process", "chrome", "% Processor Time", 3.0)
            .with_counter("Process", "sshd", "% Processor Time", 1.0);
        let mut set = CounterSet::new(vec![source(
            "Process",
            InstanceSelector::All,
            vec![CounterSelector::Named("% Processor Time".to_string())],
        )]);

        set.refresh(&resolver(), &provider);
        assert_eq!(set.handle_count(), 2);

        provider.remove_instance("Process", "chrome");
        set.refresh(&resolver(), &provider);
        assert_eq!(set.handle_count(), 1);
        assert_eq!(set.collect()[0].counter.instance, "sshd");
    }

    #[test]
    fn test_transient_enumeration_failure_keeps_source() {
        let provider = MemoryCounterProvider::new().with_counter("Processor", "_Total", "% Idle Time", 42.0);
        provider.fail_enumerations(1, "temporarily busy");
        let mut set = CounterSet::new(vec![source(
            "Processor",
            InstanceSelector::All,
            vec![CounterSelector::All],
        )]);

        assert_eq!(set.refresh(&resolver(), &provider), 0);
        assert_eq!(set.len(), 1);
        assert!(set.collect().is_empty());

        assert_eq!(set.refresh(&resolver(), &provider), 0);
        let readings = set.collect();
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].value, 42.0);
    }

    #[test]
    fn test_transient_enumeration_failure_keeps_handles() {
        let provider = MemoryCounterProvider::new().with_counter("Processor", "_Total", "% Idle Time", 7.0);
        let mut set = CounterSet::new(vec![source(
            "Processor",
            InstanceSelector::All,
            vec![CounterSelector::All],
        )]);
        set.refresh(&resolver(), &provider);

        provider.fail_enumerations(1, "temporarily busy");
        set.refresh(&resolver(), &provider);

        assert_eq!(set.handle_count(), 1);
        assert_eq!(set.collect().len(), 1);
        assert_eq!(provider.opened(), 1);
    }

    #[test]
    fn test_reappearing_instance_is_reopened_after_read_failure() {
        let provider = MemoryCounterProvider::new()
            .with_counter("Process", "chrome#1", "% Processor Time", 3.0)
            .with_counter("Process", "sshd", "% Processor Time", 1.0);
        let chrome = CounterRef::new("Process", "% Processor Time", "chrome#1");
        let mut set = CounterSet::new(vec![source(
            "Process",
            InstanceSelector::All,
            vec![CounterSelector::Named("% Processor Time".to_string())],
        )]);
        set.refresh(&resolver(), &provider);

        // Instance exits between refresh and collect.
        provider.remove_instance("Process", "chrome#1");
        assert_eq!(set.collect().len(), 1);
        assert_eq!(set.handle_count(), 1);

        set.refresh(&resolver(), &provider);
        provider.set_value(&chrome, 9.0);
        set.refresh(&resolver(), &provider);

        assert_eq!(set.handle_count(), 2);
        assert_eq!(provider.opened(), 3);
        assert!(set.collect().iter().any(|r| r.counter == chrome && r.value == 9.0));
    }

    #[test]
    fn test_missing_category_removes_source() {
        let provider = MemoryCounterProvider::new();
        let mut set = CounterSet::new(vec![source(
            "NoSuchCategory",
            InstanceSelector::All,
            vec![CounterSelector::All],
        )]);

        assert_eq!(set.refresh(&resolver(), &provider), 1);
        assert!(set.is_empty());
        assert!(set.collect().is_empty());
    }
}
