//! Source resolution.
//!
//! [`SourceResolver::resolve`] turns one declarative [`SourceSpec`] into
//! counter and query sources without touching any provider. Wildcards in
//! counter sources are expanded later, every cycle, by
//! [`SourceResolver::expand`] so that appearing and disappearing instances
//! are picked up.

use std::collections::BTreeSet;

use regex::Regex;
use thiserror::Error;

use crate::collector::key::CounterRef;
use crate::collector::query::{AttributeRule, QueryKind, QuerySource};
use crate::collector::traits::{CounterProvider, ProviderError};
use crate::config::{EngineDefaults, SourceSpec};

/// Wildcard accepted for instances and counter names.
pub const WILDCARD: &str = "*";

/// Which instances of a category a counter source covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceSelector {
    /// Every instance the provider currently reports.
    All,
    Named(String),
}

/// Which counters of an instance a counter source covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CounterSelector {
    /// Every counter the provider reports.
    All,
    Named(String),
}

impl CounterSelector {
    fn parse(name: &str) -> Self {
        if name == WILDCARD {
            Self::All
        } else {
            Self::Named(name.to_string())
        }
    }
}

/// A resolved native counter request, expanded per cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterSource {
    /// Position of the originating entry in the source list.
    pub index: usize,
    pub category: String,
    pub instance: InstanceSelector,
    pub counters: Vec<CounterSelector>,
}

/// Problems found while resolving sources.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolutionError {
    /// A required field is missing; the whole source is skipped.
    #[error("counterlist[{index}] is malformed: {reason}")]
    Malformed { index: usize, reason: String },

    /// One attribute entry is unusable; only that entry is skipped.
    #[error("counterlist[{index}] entry {entry} is malformed: {reason}")]
    MalformedEntry {
        index: usize,
        entry: usize,
        reason: String,
    },

    /// The provider does not know the category.
    #[error("skipping monitoring of category '{category}': {source}")]
    CategoryNotFound {
        category: String,
        source: ProviderError,
    },

    /// The category could not be enumerated this time; retried next cycle.
    #[error("cannot enumerate category '{category}' this cycle: {source}")]
    Unavailable {
        category: String,
        source: ProviderError,
    },
}

impl ResolutionError {
    /// Spec errors are errors; provider-side failures are warnings.
    pub fn is_warning(&self) -> bool {
        matches!(self, Self::CategoryNotFound { .. } | Self::Unavailable { .. })
    }

    /// True when the source should be kept and expanded again next cycle.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }

    /// Report at the level matching the error's class.
    pub fn log(&self) {
        if self.is_warning() {
            tracing::warn!("{self}");
        } else {
            tracing::error!("{self}");
        }
    }
}

/// Output of resolving one spec.
#[derive(Debug, Default)]
pub struct Resolution {
    pub counter_sources: Vec<CounterSource>,
    pub query_sources: Vec<QuerySource>,
    pub errors: Vec<ResolutionError>,
}

/// Resolves [`SourceSpec`]s using the configured defaults.
#[derive(Debug, Clone, Default)]
pub struct SourceResolver {
    defaults: EngineDefaults,
}

impl SourceResolver {
    pub fn new(defaults: EngineDefaults) -> Self {
        Self { defaults }
    }

    pub fn defaults(&self) -> &EngineDefaults {
        &self.defaults
    }

    /// Resolve the entry at position `index` of the source list.
    pub fn resolve(&self, index: usize, spec: &SourceSpec) -> Resolution {
        let mut resolution = Resolution::default();
        match non_empty(&spec.query) {
            Some(query) => self.resolve_query(index, query, spec, &mut resolution),
            None => self.resolve_counters(index, spec, &mut resolution),
        }
        resolution
    }

    fn resolve_query(&self, index: usize, query: &str, spec: &SourceSpec, out: &mut Resolution) {
        let kind = match non_empty(&spec.query_type) {
            None => QueryKind::Pull,
            Some(raw) => match self.defaults.query_kind(raw) {
                Some(kind) => kind,
                None => {
                    out.errors.push(ResolutionError::Malformed {
                        index,
                        reason: format!("unknown query type '{raw}'"),
                    });
                    return;
                }
            },
        };

        let mut attributes = Vec::new();
        for (entry, counter) in spec.counters.iter().flatten().enumerate() {
            let Some(path) = non_empty(&counter.counter) else {
                out.errors.push(ResolutionError::MalformedEntry {
                    index,
                    entry,
                    reason: "missing 'counter'".to_string(),
                });
                continue;
            };

            let mut rule = AttributeRule::new(path.trim());
            if let Some(label) = non_empty(&counter.attr_name)
                && label != self.defaults.use_field_name
            {
                rule = rule.with_label(label);
            }
            if let Some(pattern) = non_empty(&counter.parser) {
                match Regex::new(pattern) {
                    Ok(re) => rule = rule.with_parser(re),
                    Err(e) => {
                        out.errors.push(ResolutionError::MalformedEntry {
                            index,
                            entry,
                            reason: format!("invalid parser: {e}"),
                        });
                        continue;
                    }
                }
            }
            attributes.push(rule);
        }

        out.query_sources.push(QuerySource {
            index,
            query: query.to_string(),
            event_name: non_empty(&spec.event_name)
                .unwrap_or(&self.defaults.event_name)
                .to_string(),
            namespace: non_empty(&spec.namespace)
                .unwrap_or(&self.defaults.namespace)
                .to_string(),
            kind,
            attributes,
        });
    }

    fn resolve_counters(&self, index: usize, spec: &SourceSpec, out: &mut Resolution) {
        let (Some(provider), Some(category)) = (non_empty(&spec.provider), non_empty(&spec.category))
        else {
            out.errors.push(ResolutionError::Malformed {
                index,
                reason: "missing 'provider', 'category' or 'query'".to_string(),
            });
            return;
        };

        let mut names = Vec::new();
        for (entry, counter) in spec.counters.iter().flatten().enumerate() {
            match non_empty(&counter.counter) {
                Some(name) => names.push(name.trim()),
                None => out.errors.push(ResolutionError::MalformedEntry {
                    index,
                    entry,
                    reason: "missing 'counter'".to_string(),
                }),
            }
        }
        if names.is_empty() {
            out.errors.push(ResolutionError::Malformed {
                index,
                reason: "missing 'counters'".to_string(),
            });
            return;
        }

        let instance = non_empty(&spec.instance).filter(|i| *i != WILDCARD);

        if !self.defaults.is_counter_provider(provider) {
            out.query_sources
                .push(self.formatted_data_query(index, provider, category, instance, &names));
            return;
        }

        out.counter_sources.push(CounterSource {
            index,
            category: category.to_string(),
            instance: match instance {
                Some(name) => InstanceSelector::Named(name.to_string()),
                None => InstanceSelector::All,
            },
            counters: names.into_iter().map(CounterSelector::parse).collect(),
        });
    }

    /// Pull query against the formatted-data class of a non-native provider.
    fn formatted_data_query(
        &self,
        index: usize,
        provider: &str,
        category: &str,
        instance: Option<&str>,
        names: &[&str],
    ) -> QuerySource {
        let mut query = format!(
            "Select Name, {} from {}_{}_{}",
            names.join(", "),
            self.defaults.formatted_data_prefix,
            provider,
            category
        );
        if let Some(instance) = instance {
            query.push_str(&format!(" Where Name Like '{instance}'"));
        }
        QuerySource {
            index,
            query,
            event_name: category.to_string(),
            namespace: self.defaults.namespace.clone(),
            kind: QueryKind::Pull,
            attributes: Vec::new(),
        }
    }

    /// Expand a counter source into concrete counters against the provider.
    ///
    /// The result is deduplicated; expanding twice against an unchanged
    /// provider yields the same set.
    pub fn expand(
        &self,
        provider: &dyn CounterProvider,
        source: &CounterSource,
    ) -> Result<Vec<CounterRef>, ResolutionError> {
        let category = source.category.as_str();
        let missing = |e: ProviderError| match e {
            ProviderError::CategoryNotFound(_) => ResolutionError::CategoryNotFound {
                category: category.to_string(),
                source: e,
            },
            other => ResolutionError::Unavailable {
                category: category.to_string(),
                source: other,
            },
        };

        let instances = match &source.instance {
            InstanceSelector::Named(name) => vec![name.clone()],
            InstanceSelector::All => {
                let mut found = provider.instances(category).map_err(missing)?;
                if found.is_empty() {
                    found.push(String::new());
                }
                found
            }
        };

        let mut refs = BTreeSet::new();
        for instance in &instances {
            for selector in &source.counters {
                match selector {
                    CounterSelector::Named(name) => {
                        refs.insert(CounterRef::new(category, name.as_str(), instance.as_str()));
                    }
                    CounterSelector::All => match provider.counters(category, instance) {
                        Ok(found) => refs.extend(found),
                        Err(e @ ProviderError::CategoryNotFound(_)) => return Err(missing(e)),
                        Err(e) => {
                            tracing::warn!(category, instance = %instance, error = %e, "Could not list counters");
                        }
                    },
                }
            }
        }
        Ok(refs.into_iter().collect())
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.trim().is_empty())
}
