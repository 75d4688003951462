//! Provider capability traits and collector error types.
//!
//! The engine never talks to a platform API directly. Native counters are
//! reached through [`CounterProvider`] and structured queries through
//! [`QueryProvider`]; both are shared across scheduling units, while the
//! handles and scopes they hand out are owned by exactly one unit.

use std::fmt;

use thiserror::Error;

use crate::collector::identity::IdentityError;
use crate::collector::key::CounterRef;
use crate::collector::query::Row;
use crate::emit::EmitError;

/// Errors reported by a provider capability.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// The requested counter category does not exist.
    #[error("category '{0}' does not exist")]
    CategoryNotFound(String),

    /// The requested counter does not exist in its category/instance.
    #[error("counter '{0}' does not exist")]
    CounterNotFound(String),

    /// A scope could not be created or connected.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Query execution failed; the message is used for classification.
    #[error("query failed: {0}")]
    Query(String),

    /// A counter read failed.
    #[error("read failed: {0}")]
    Read(String),

    /// The capability is not available on this platform.
    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),
}

/// Errors that stop a scheduling unit.
///
/// Per-source failures never surface here: they are logged and the source is
/// skipped, retried or removed. Only conditions that make further cycles
/// meaningless are returned.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// Alternate identity could not be assumed.
    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),

    /// The emitter refused a batch.
    #[error("failed to emit batch: {0}")]
    Emit(#[from] EmitError),
}

/// Credentials for connecting a query scope under an alternate account.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Account name.
    pub username: String,
    /// Account domain.
    pub domain: String,
    /// Account password.
    pub password: String,
}

impl Credentials {
    /// Build credentials only when every part is present.
    pub fn from_parts(username: &str, domain: &str, password: &str) -> Option<Self> {
        if username.is_empty() || domain.is_empty() || password.is_empty() {
            return None;
        }
        Some(Self {
            username: username.to_string(),
            domain: domain.to_string(),
            password: password.to_string(),
        })
    }

    /// Connection authority string.
    pub fn authority(&self) -> String {
        format!("ntlmdomain:{}", self.domain)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("domain", &self.domain)
            .field("password", &"REDACTED")
            .finish()
    }
}

/// A live provider-side counter.
pub trait CounterHandle: Send {
    /// Next computed sample. NaN means the provider had no sample.
    fn next_value(&mut self) -> Result<f64, ProviderError>;
}

/// Enumerable native instrumentation counters.
pub trait CounterProvider: Send + Sync + 'static {
    /// Current instance names of a category. Empty for single-instance categories.
    fn instances(&self, category: &str) -> Result<Vec<String>, ProviderError>;

    /// Every counter a category reports for one instance.
    fn counters(&self, category: &str, instance: &str) -> Result<Vec<CounterRef>, ProviderError>;

    /// Open a handle for one counter.
    fn open(&self, counter: &CounterRef) -> Result<Box<dyn CounterHandle>, ProviderError>;
}

/// A connection context identified by host and namespace.
pub trait Scope: Send {
    /// Liveness check.
    fn is_connected(&self) -> bool;

    /// (Re)connect the scope.
    fn connect(&mut self) -> Result<(), ProviderError>;

    /// Run a pull query and return all rows.
    fn execute_pull(&mut self, query: &str) -> Result<Vec<Row>, ProviderError>;

    /// Block until the next event matching the query arrives.
    fn wait_next_push(&mut self, query: &str) -> Result<Row, ProviderError>;
}

/// Structured-query endpoint.
pub trait QueryProvider: Send + Sync + 'static {
    /// Create an unconnected scope for `host` and `namespace`.
    fn open_scope(
        &self,
        host: &str,
        namespace: &str,
        credentials: Option<&Credentials>,
    ) -> Result<Box<dyn Scope>, ProviderError>;
}

/// Provider used when no native binding exists for the current platform.
///
/// Every counter category is reported missing and every scope fails to open,
/// so the engine logs and skips each source without crashing.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedProvider;

impl CounterProvider for UnsupportedProvider {
    fn instances(&self, category: &str) -> Result<Vec<String>, ProviderError> {
        Err(ProviderError::CategoryNotFound(category.to_string()))
    }

    fn counters(&self, category: &str, _instance: &str) -> Result<Vec<CounterRef>, ProviderError> {
        Err(ProviderError::CategoryNotFound(category.to_string()))
    }

    fn open(&self, _counter: &CounterRef) -> Result<Box<dyn CounterHandle>, ProviderError> {
        Err(ProviderError::Unsupported("native counters"))
    }
}

impl QueryProvider for UnsupportedProvider {
    fn open_scope(
        &self,
        _host: &str,
        _namespace: &str,
        _credentials: Option<&Credentials>,
    ) -> Result<Box<dyn Scope>, ProviderError> {
        Err(ProviderError::Unsupported("structured queries"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_require_all_parts() {
        assert!(Credentials::from_parts("svc", "CORP", "").is_none());
        assert!(Credentials::from_parts("", "CORP", "secret").is_none());
        let creds = Credentials::from_parts("svc", "CORP", "secret").unwrap();
        assert_eq!(creds.authority(), "ntlmdomain:CORP");
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials::from_parts("svc", "CORP", "hunter2").unwrap();
        let debug = format!("{creds:?}");
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_unsupported_provider_reports_missing_category() {
        let provider = UnsupportedProvider;
        assert_eq!(
            provider.instances("Processor"),
            Err(ProviderError::CategoryNotFound("Processor".to_string()))
        );
        assert!(provider.open_scope("host", "root\\cimv2", None).is_err());
    }
}
