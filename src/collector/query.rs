//! Structured-query sources.
//!
//! - [`Row`]: one result object, possibly holding one level of nested objects
//! - [`QuerySource`]: a resolved pull or push query
//! - [`ScopeCache`]: the single connection context owned by a scheduling unit
//! - [`QuerySet`]: the active queries of a unit and their per-cycle execution

use regex::Regex;
use strum_macros::{AsRefStr, Display, EnumString};

use crate::collector::aggregate::record_row;
use crate::collector::identity::{IdentityError, UnitIdentity};
use crate::collector::traits::{Credentials, ProviderError, QueryProvider, Scope};
use crate::collector::normalize::RawValue;
use crate::emit::MetricBatch;

/// Whether a query is executed each cycle or waited on for events.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumString, Display, AsRefStr,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum QueryKind {
    /// Executed synchronously every cycle.
    Pull,
    /// Blocks until one matching event occurs.
    Push,
}

// =============================================================================
// Rows
// =============================================================================

/// Value of one property in a result row.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// Property present but without a value.
    Null,
    /// Scalar value.
    Raw(RawValue),
    /// Embedded object.
    Object(Row),
}

/// Named property of a row.
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub name: String,
    pub value: PropertyValue,
}

/// One result object returned by a query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    properties: Vec<Property>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a scalar property.
    pub fn with(mut self, name: impl Into<String>, value: RawValue) -> Self {
        self.push(name, PropertyValue::Raw(value));
        self
    }

    /// Append an embedded object.
    pub fn with_object(mut self, name: impl Into<String>, object: Row) -> Self {
        self.push(name, PropertyValue::Object(object));
        self
    }

    /// Append a property without a value.
    pub fn with_null(mut self, name: impl Into<String>) -> Self {
        self.push(name, PropertyValue::Null);
        self
    }

    pub fn push(&mut self, name: impl Into<String>, value: PropertyValue) {
        self.properties.push(Property {
            name: name.into(),
            value,
        });
    }

    /// Look a property up by name, ignoring ASCII case.
    pub fn get(&self, name: &str) -> Option<&Property> {
        self.properties
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Property> {
        self.properties.iter()
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

// =============================================================================
// Sources
// =============================================================================

/// Maps one raw field path to an output label.
#[derive(Debug, Clone)]
pub struct AttributeRule {
    /// `"field"` or `"outer.inner"`.
    pub path: String,
    /// Output label; `None` keeps the raw field name.
    pub label: Option<String>,
    /// Extraction expression for string values.
    pub parser: Option<Regex>,
}

impl AttributeRule {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            label: None,
            parser: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_parser(mut self, parser: Regex) -> Self {
        self.parser = Some(parser);
        self
    }
}

/// A resolved structured query.
#[derive(Debug, Clone)]
pub struct QuerySource {
    /// Position of the originating entry in the source list.
    pub index: usize,
    pub query: String,
    pub event_name: String,
    pub namespace: String,
    pub kind: QueryKind,
    /// Empty means every field of every row is reported.
    pub attributes: Vec<AttributeRule>,
}

// =============================================================================
// Error classification
// =============================================================================

/// Outcome class of a failed query execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryFailure {
    /// Scope could not be reached; skip this cycle.
    Connection(ProviderError),
    /// The query itself is invalid; remove the source.
    Fatal(ProviderError),
    /// Anything else; retry next cycle.
    Transient(ProviderError),
}

/// Message fragments that mark a query as structurally invalid.
const FATAL_QUERY_MARKERS: [&str; 2] = ["invalid class", "not supported"];

/// True when an error message says the query can never succeed.
pub fn is_fatal_query_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    FATAL_QUERY_MARKERS.iter().any(|m| lower.contains(m))
}

/// Classify a provider error raised while executing a query.
pub fn classify_query_error(err: ProviderError) -> QueryFailure {
    match err {
        ProviderError::Connection(_) | ProviderError::Unsupported(_) => {
            QueryFailure::Connection(err)
        }
        ProviderError::Query(ref msg) if is_fatal_query_message(msg) => QueryFailure::Fatal(err),
        other => QueryFailure::Transient(other),
    }
}

// =============================================================================
// Scope cache
// =============================================================================

/// The connection context of one scheduling unit.
///
/// Rebuilt only when host or namespace changes; reconnected lazily when the
/// liveness check fails.
#[derive(Default)]
pub struct ScopeCache {
    key: Option<(String, String)>,
    scope: Option<Box<dyn Scope>>,
}

impl std::fmt::Debug for ScopeCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeCache")
            .field("key", &self.key)
            .field("open", &self.scope.is_some())
            .finish()
    }
}

impl ScopeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a connected scope for `host` and `namespace`.
    pub fn acquire(
        &mut self,
        provider: &dyn QueryProvider,
        host: &str,
        namespace: &str,
        credentials: Option<&Credentials>,
    ) -> Result<&mut Box<dyn Scope>, ProviderError> {
        let reuse = self
            .key
            .as_ref()
            .is_some_and(|(h, n)| h == host && n == namespace);

        let scope = match self.scope.take() {
            Some(scope) if reuse => scope,
            previous => {
                if previous.is_some() {
                    tracing::debug!(from = ?self.key, host, namespace, "Updating scope");
                } else {
                    tracing::debug!(host, namespace, "Setting up scope");
                }
                self.key = None;
                provider.open_scope(host, namespace, credentials)?
            }
        };
        self.key = Some((host.to_string(), namespace.to_string()));

        let scope = self.scope.insert(scope);
        if !scope.is_connected() {
            tracing::debug!(host, namespace, "Connecting to scope");
            scope.connect()?;
        }
        Ok(scope)
    }
}

// =============================================================================
// Query set
// =============================================================================

/// Shared inputs for one polling pass.
pub struct PollEnv<'a> {
    pub provider: &'a dyn QueryProvider,
    pub host: &'a str,
    pub credentials: Option<&'a Credentials>,
    pub identity: &'a UnitIdentity,
}

/// The active queries of one scheduling unit.
#[derive(Debug, Default)]
pub struct QuerySet {
    sources: Vec<QuerySource>,
    scope: ScopeCache,
}

impl QuerySet {
    pub fn new(sources: Vec<QuerySource>) -> Self {
        Self {
            sources,
            scope: ScopeCache::new(),
        }
    }

    pub fn sources(&self) -> &[QuerySource] {
        &self.sources
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Execute every active query once, appending records to `batch`.
    ///
    /// Pull sources run their query; push sources wait for one event.
    /// Returns the number of sources permanently removed this pass.
    pub fn poll(&mut self, env: &PollEnv<'_>, batch: &mut MetricBatch) -> Result<usize, IdentityError> {
        let Self { sources, scope } = self;
        let mut fatal = Vec::new();

        for (pos, source) in sources.iter().enumerate() {
            let outcome = env
                .identity
                .run(|| execute(scope, env, source))?;

            match outcome {
                Ok(rows) => {
                    if rows.is_empty() {
                        tracing::debug!(query = %source.query, "Query returned no results");
                    }
                    for row in &rows {
                        batch.push(record_row(source, row));
                    }
                }
                Err(QueryFailure::Connection(e)) => {
                    tracing::error!(host = %env.host, namespace = %source.namespace, error = %e, "Unable to connect");
                }
                Err(QueryFailure::Fatal(e)) => {
                    tracing::error!(query = %source.query, error = %e, "Exception occurred in polling");
                    tracing::warn!(query = %source.query, "Query removed");
                    fatal.push(pos);
                }
                Err(QueryFailure::Transient(e)) => {
                    tracing::error!(query = %source.query, error = %e, "Exception occurred in polling");
                }
            }
        }

        let removed = fatal.len();
        if removed > 0 {
            let mut pos = 0;
            sources.retain(|_| {
                let keep = !fatal.contains(&pos);
                pos += 1;
                keep
            });
        }
        Ok(removed)
    }
}

fn execute(
    cache: &mut ScopeCache,
    env: &PollEnv<'_>,
    source: &QuerySource,
) -> Result<Vec<Row>, QueryFailure> {
    let scope = cache
        .acquire(env.provider, env.host, &source.namespace, env.credentials)
        .map_err(QueryFailure::Connection)?;

    let result = match source.kind {
        QueryKind::Pull => {
            tracing::debug!(query = %source.query, "Running query");
            scope.execute_pull(&source.query)
        }
        QueryKind::Push => {
            tracing::debug!(query = %source.query, "Running event listener");
            scope.wait_next_push(&source.query).map(|row| vec![row])
        }
    };
    result.map_err(classify_query_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::memory::MemoryQueryProvider;
    use std::str::FromStr;

    fn pull(index: usize, query: &str) -> QuerySource {
        QuerySource {
            index,
            query: query.to_string(),
            event_name: "WMIQueryResult".to_string(),
            namespace: "root\\cimv2".to_string(),
            kind: QueryKind::Pull,
            attributes: Vec::new(),
        }
    }

    #[test]
    fn test_query_kind_from_str() {
        assert_eq!(QueryKind::from_str("pull").unwrap(), QueryKind::Pull);
        assert_eq!(QueryKind::from_str("PUSH").unwrap(), QueryKind::Push);
        assert!(QueryKind::from_str("stream").is_err());
        assert_eq!(QueryKind::Push.as_ref(), "push");
    }

    #[test]
    fn test_classify_fatal_messages() {
        assert!(matches!(
            classify_query_error(ProviderError::Query("Invalid class ".to_string())),
            QueryFailure::Fatal(_)
        ));
        assert!(matches!(
            classify_query_error(ProviderError::Query("Operation NOT SUPPORTED".to_string())),
            QueryFailure::Fatal(_)
        ));
        assert!(matches!(
            classify_query_error(ProviderError::Query("Quota violation".to_string())),
            QueryFailure::Transient(_)
        ));
        assert!(matches!(
            classify_query_error(ProviderError::Connection("RPC server unavailable".to_string())),
            QueryFailure::Connection(_)
        ));
    }

    #[test]
    fn test_row_lookup_ignores_case() {
        let row = Row::new().with("Name", RawValue::String("C:".to_string()));
        assert!(row.get("name").is_some());
        assert!(row.get("missing").is_none());
        assert_eq!(row.len(), 1);
    }

    #[test]
    fn test_scope_cache_reuses_and_rebuilds() {
        let provider = MemoryQueryProvider::new();
        let mut cache = ScopeCache::new();

        cache.acquire(&provider, "host-a", "root\\cimv2", None).unwrap();
        cache.acquire(&provider, "host-a", "root\\cimv2", None).unwrap();
        assert_eq!(provider.scopes_opened(), 1);
        assert_eq!(provider.connects(), 1);

        cache.acquire(&provider, "host-a", "root\\wmi", None).unwrap();
        assert_eq!(provider.scopes_opened(), 2);
    }

    #[test]
    fn test_scope_cache_reconnects_lazily() {
        let provider = MemoryQueryProvider::new();
        let mut cache = ScopeCache::new();

        cache.acquire(&provider, "host-a", "root\\cimv2", None).unwrap();
        provider.drop_connections();
        cache.acquire(&provider, "host-a", "root\\cimv2", None).unwrap();

        assert_eq!(provider.scopes_opened(), 1);
        assert_eq!(provider.connects(), 2);
    }

    #[test]
    fn test_poll_removes_fatal_source_only() {
        let provider = MemoryQueryProvider::new()
            .with_rows("SELECT * FROM Good", vec![Row::new().with("X", RawValue::int(1))]);
        provider.fail_query("SELECT * FROM Bad", "Invalid class");

        let identity = UnitIdentity::direct();
        let env = PollEnv {
            provider: &provider,
            host: "localhost",
            credentials: None,
            identity: &identity,
        };
        let mut set = QuerySet::new(vec![pull(0, "SELECT * FROM Bad"), pull(1, "SELECT * FROM Good")]);

        let mut batch = MetricBatch::new("localhost");
        assert_eq!(set.poll(&env, &mut batch).unwrap(), 1);
        assert_eq!(set.len(), 1);
        assert_eq!(set.sources()[0].index, 1);
        assert_eq!(batch.len(), 1);

        let mut batch = MetricBatch::new("localhost");
        assert_eq!(set.poll(&env, &mut batch).unwrap(), 0);
        assert_eq!(provider.executions("SELECT * FROM Bad"), 1);
        assert_eq!(provider.executions("SELECT * FROM Good"), 2);
    }

    #[test]
    fn test_poll_connection_failure_is_retried() {
        let provider = MemoryQueryProvider::new()
            .with_rows("SELECT * FROM Good", vec![Row::new().with("X", RawValue::int(1))]);
        provider.fail_connections(1);

        let identity = UnitIdentity::direct();
        let env = PollEnv {
            provider: &provider,
            host: "localhost",
            credentials: None,
            identity: &identity,
        };
        let mut set = QuerySet::new(vec![pull(0, "SELECT * FROM Good")]);

        let mut batch = MetricBatch::new("localhost");
        set.poll(&env, &mut batch).unwrap();
        assert!(batch.is_empty());
        assert_eq!(set.len(), 1);

        let mut batch = MetricBatch::new("localhost");
        set.poll(&env, &mut batch).unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn test_poll_transient_failure_keeps_source() {
        let provider = MemoryQueryProvider::new();
        provider.fail_query("SELECT * FROM Flaky", "Timed out");

        let identity = UnitIdentity::direct();
        let env = PollEnv {
            provider: &provider,
            host: "localhost",
            credentials: None,
            identity: &identity,
        };
        let mut set = QuerySet::new(vec![pull(0, "SELECT * FROM Flaky")]);
        let mut batch = MetricBatch::new("localhost");

        assert_eq!(set.poll(&env, &mut batch).unwrap(), 0);
        assert_eq!(set.poll(&env, &mut batch).unwrap(), 0);
        assert_eq!(provider.executions("SELECT * FROM Flaky"), 2);
        assert_eq!(set.len(), 1);
    }
}
