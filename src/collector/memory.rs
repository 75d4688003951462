//! In-memory providers.
//!
//! Drive the engine without a platform binding: tests and embedders seed
//! counters and query results, inject failures, and inspect how often the
//! engine touched each resource.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::collector::key::CounterRef;
use crate::collector::query::Row;
use crate::collector::traits::{
    CounterHandle, CounterProvider, Credentials, ProviderError, QueryProvider, Scope,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Counters
// =============================================================================

#[derive(Debug, Clone)]
enum Sample {
    Value(f64),
    Fail(String),
}

/// category -> instance -> counter -> sample
type CounterTree = BTreeMap<String, BTreeMap<String, BTreeMap<String, Sample>>>;

#[derive(Debug, Default)]
struct CounterState {
    tree: CounterTree,
    opened: usize,
    /// Remaining enumeration calls that fail, and their message.
    enumeration_failures: Option<(usize, String)>,
}

/// Counter provider backed by a mutable in-memory tree.
///
/// The empty instance name models single-instance categories.
#[derive(Debug, Default, Clone)]
pub struct MemoryCounterProvider {
    state: Arc<Mutex<CounterState>>,
}

impl MemoryCounterProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or overwrite) a counter value.
    pub fn with_counter(self, category: &str, instance: &str, counter: &str, value: f64) -> Self {
        self.set_value(&CounterRef::new(category, counter, instance), value);
        self
    }

    pub fn set_value(&self, counter: &CounterRef, value: f64) {
        self.set(counter, Sample::Value(value));
    }

    /// Make every read of `counter` fail.
    pub fn fail_reads(&self, counter: &CounterRef, message: &str) {
        self.set(counter, Sample::Fail(message.to_string()));
    }

    /// Remove an instance and all its counters.
    pub fn remove_instance(&self, category: &str, instance: &str) {
        if let Some(instances) = lock(&self.state).tree.get_mut(category) {
            instances.remove(instance);
        }
    }

    /// Make the next `count` instance enumerations fail with a read error.
    pub fn fail_enumerations(&self, count: usize, message: &str) {
        lock(&self.state).enumeration_failures = Some((count, message.to_string()));
    }

    /// Number of handles opened so far.
    pub fn opened(&self) -> usize {
        lock(&self.state).opened
    }

    fn set(&self, counter: &CounterRef, sample: Sample) {
        lock(&self.state)
            .tree
            .entry(counter.category.clone())
            .or_default()
            .entry(counter.instance.clone())
            .or_default()
            .insert(counter.counter.clone(), sample);
    }
}

impl CounterProvider for MemoryCounterProvider {
    fn instances(&self, category: &str) -> Result<Vec<String>, ProviderError> {
        let mut state = lock(&self.state);
        if let Some((remaining, message)) = state.enumeration_failures.as_mut()
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(ProviderError::Read(message.clone()));
        }
        let instances = state
            .tree
            .get(category)
            .ok_or_else(|| ProviderError::CategoryNotFound(category.to_string()))?;
        Ok(instances.keys().filter(|i| !i.is_empty()).cloned().collect())
    }

    fn counters(&self, category: &str, instance: &str) -> Result<Vec<CounterRef>, ProviderError> {
        let state = lock(&self.state);
        let instances = state
            .tree
            .get(category)
            .ok_or_else(|| ProviderError::CategoryNotFound(category.to_string()))?;
        let counters = instances.get(instance).ok_or_else(|| {
            ProviderError::CounterNotFound(format!("{category}({instance})/*"))
        })?;
        Ok(counters
            .keys()
            .map(|c| CounterRef::new(category, c.as_str(), instance))
            .collect())
    }

    fn open(&self, counter: &CounterRef) -> Result<Box<dyn CounterHandle>, ProviderError> {
        let mut state = lock(&self.state);
        let category = state
            .tree
            .get(&counter.category)
            .ok_or_else(|| ProviderError::CategoryNotFound(counter.category.clone()))?;
        let exists = category
            .get(&counter.instance)
            .is_some_and(|c| c.contains_key(&counter.counter));
        if !exists {
            return Err(ProviderError::CounterNotFound(counter.to_string()));
        }
        state.opened += 1;
        Ok(Box::new(MemoryCounterHandle {
            state: Arc::clone(&self.state),
            counter: counter.clone(),
        }))
    }
}

struct MemoryCounterHandle {
    state: Arc<Mutex<CounterState>>,
    counter: CounterRef,
}

impl CounterHandle for MemoryCounterHandle {
    fn next_value(&mut self) -> Result<f64, ProviderError> {
        let state = lock(&self.state);
        let sample = state
            .tree
            .get(&self.counter.category)
            .and_then(|i| i.get(&self.counter.instance))
            .and_then(|c| c.get(&self.counter.counter))
            .ok_or_else(|| ProviderError::Read(format!("{} is gone", self.counter)))?;
        match sample {
            Sample::Value(v) => Ok(*v),
            Sample::Fail(msg) => Err(ProviderError::Read(msg.clone())),
        }
    }
}

// =============================================================================
// Queries
// =============================================================================

#[derive(Debug, Clone)]
enum QueryResult {
    Rows(Vec<Row>),
    Fail(String),
}

#[derive(Debug, Default)]
struct QueryState {
    results: HashMap<String, QueryResult>,
    events: HashMap<String, VecDeque<Row>>,
    executions: HashMap<String, usize>,
    connect_failures: usize,
    generation: u64,
    scopes_opened: usize,
    connects: usize,
    last_credentials: Option<Credentials>,
}

/// Query provider answering from seeded results.
///
/// Unknown pull queries return no rows. Push waits do not block: they pop the
/// next seeded event or fail with a transient error when none is queued.
#[derive(Debug, Default, Clone)]
pub struct MemoryQueryProvider {
    state: Arc<Mutex<QueryState>>,
}

impl MemoryQueryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(self, query: &str, rows: Vec<Row>) -> Self {
        self.set_rows(query, rows);
        self
    }

    pub fn set_rows(&self, query: &str, rows: Vec<Row>) {
        lock(&self.state)
            .results
            .insert(query.to_string(), QueryResult::Rows(rows));
    }

    /// Make every execution of `query` fail with `message`.
    pub fn fail_query(&self, query: &str, message: &str) {
        lock(&self.state)
            .results
            .insert(query.to_string(), QueryResult::Fail(message.to_string()));
    }

    /// Queue one event for a push query.
    pub fn push_event(&self, query: &str, row: Row) {
        lock(&self.state)
            .events
            .entry(query.to_string())
            .or_default()
            .push_back(row);
    }

    /// Fail the next `count` connection attempts.
    pub fn fail_connections(&self, count: usize) {
        lock(&self.state).connect_failures = count;
    }

    /// Mark every open scope as disconnected.
    pub fn drop_connections(&self) {
        lock(&self.state).generation += 1;
    }

    /// Execution attempts of `query`, pull or push.
    pub fn executions(&self, query: &str) -> usize {
        lock(&self.state).executions.get(query).copied().unwrap_or(0)
    }

    pub fn scopes_opened(&self) -> usize {
        lock(&self.state).scopes_opened
    }

    pub fn connects(&self) -> usize {
        lock(&self.state).connects
    }

    /// Credentials passed to the most recent `open_scope`.
    pub fn last_credentials(&self) -> Option<Credentials> {
        lock(&self.state).last_credentials.clone()
    }
}

impl QueryProvider for MemoryQueryProvider {
    fn open_scope(
        &self,
        host: &str,
        namespace: &str,
        credentials: Option<&Credentials>,
    ) -> Result<Box<dyn Scope>, ProviderError> {
        let mut state = lock(&self.state);
        state.scopes_opened += 1;
        state.last_credentials = credentials.cloned();
        Ok(Box::new(MemoryScope {
            state: Arc::clone(&self.state),
            target: format!("\\\\{host}\\{namespace}"),
            generation: None,
        }))
    }
}

struct MemoryScope {
    state: Arc<Mutex<QueryState>>,
    target: String,
    generation: Option<u64>,
}

impl MemoryScope {
    fn record_execution(state: &mut QueryState, query: &str) {
        *state.executions.entry(query.to_string()).or_default() += 1;
    }
}

impl Scope for MemoryScope {
    fn is_connected(&self) -> bool {
        self.generation == Some(lock(&self.state).generation)
    }

    fn connect(&mut self) -> Result<(), ProviderError> {
        let mut state = lock(&self.state);
        state.connects += 1;
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            self.generation = None;
            return Err(ProviderError::Connection(format!(
                "{} is unreachable",
                self.target
            )));
        }
        self.generation = Some(state.generation);
        Ok(())
    }

    fn execute_pull(&mut self, query: &str) -> Result<Vec<Row>, ProviderError> {
        let mut state = lock(&self.state);
        Self::record_execution(&mut state, query);
        match state.results.get(query) {
            Some(QueryResult::Rows(rows)) => Ok(rows.clone()),
            Some(QueryResult::Fail(msg)) => Err(ProviderError::Query(msg.clone())),
            None => Ok(Vec::new()),
        }
    }

    fn wait_next_push(&mut self, query: &str) -> Result<Row, ProviderError> {
        let mut state = lock(&self.state);
        Self::record_execution(&mut state, query);
        if let Some(QueryResult::Fail(msg)) = state.results.get(query) {
            return Err(ProviderError::Query(msg.clone()));
        }
        state
            .events
            .get_mut(query)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| ProviderError::Query("timed out waiting for event".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::normalize::RawValue;

    #[test]
    fn test_single_instance_category_reports_no_instances() {
        let provider = MemoryCounterProvider::new().with_counter("Memory", "", "Available MBytes", 1.0);
        assert!(provider.instances("Memory").unwrap().is_empty());
        assert_eq!(provider.counters("Memory", "").unwrap().len(), 1);
    }

    #[test]
    fn test_handle_sees_updated_value() {
        let key = CounterRef::new("Memory", "Available MBytes", "");
        let provider = MemoryCounterProvider::new().with_counter("Memory", "", "Available MBytes", 1.0);
        let mut handle = provider.open(&key).unwrap();
        assert_eq!(handle.next_value().unwrap(), 1.0);

        provider.set_value(&key, 2.0);
        assert_eq!(handle.next_value().unwrap(), 2.0);
    }

    #[test]
    fn test_push_events_are_consumed_in_order() {
        let provider = MemoryQueryProvider::new();
        provider.push_event("EVENTS", Row::new().with("N", RawValue::int(1)));
        provider.push_event("EVENTS", Row::new().with("N", RawValue::int(2)));

        let mut scope = provider.open_scope("localhost", "root\\cimv2", None).unwrap();
        scope.connect().unwrap();
        let first = scope.wait_next_push("EVENTS").unwrap();
        assert_eq!(first, Row::new().with("N", RawValue::int(1)));
        scope.wait_next_push("EVENTS").unwrap();
        assert!(scope.wait_next_push("EVENTS").is_err());
        assert_eq!(provider.executions("EVENTS"), 3);
    }
}
