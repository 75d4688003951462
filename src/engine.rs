//! Engine: composition root for resolution, scheduling units and workers.

use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use thiserror::Error;

use crate::collector::identity::IdentityContext;
use crate::collector::query::{QueryKind, QuerySource};
use crate::collector::resolver::{CounterSource, SourceResolver};
use crate::collector::scheduler::{RunMode, SchedulingUnit, UnitContext, UnitKey, UnitReport};
use crate::collector::traits::{
    CollectorError, CounterProvider, Credentials, QueryProvider, UnsupportedProvider,
};
use crate::config::{DEFAULT_POLL_INTERVAL, EngineDefaults, RunOptions, SourceSpec, local_host_name};
use crate::emit::Emitter;

/// Errors that stop the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The source list or options cannot be run.
    #[error("configuration error: {0}")]
    Config(String),

    /// A scheduling unit stopped with a fatal error.
    #[error("unit '{unit}' stopped: {source}")]
    Unit {
        unit: String,
        #[source]
        source: CollectorError,
    },

    /// A worker thread could not be started.
    #[error("failed to spawn worker for unit '{unit}': {source}")]
    Spawn {
        unit: String,
        #[source]
        source: std::io::Error,
    },

    /// A worker thread panicked.
    #[error("unit '{0}' panicked")]
    Panicked(String),

    /// The blocking run task could not be joined.
    #[error("engine task failed: {0}")]
    Join(String),
}

impl EngineError {
    /// True when a unit failed to assume its identity.
    pub fn is_identity(&self) -> bool {
        matches!(
            self,
            Self::Unit {
                source: CollectorError::Identity(_),
                ..
            }
        )
    }
}

/// The provider capabilities the engine polls through.
#[derive(Clone)]
pub struct Providers {
    pub counters: Arc<dyn CounterProvider>,
    pub queries: Arc<dyn QueryProvider>,
}

impl Providers {
    pub fn new(counters: impl CounterProvider, queries: impl QueryProvider) -> Self {
        Self {
            counters: Arc::new(counters),
            queries: Arc::new(queries),
        }
    }

    /// Providers for platforms without a native binding.
    pub fn unsupported() -> Self {
        Self::new(UnsupportedProvider, UnsupportedProvider)
    }
}

impl Default for Providers {
    fn default() -> Self {
        Self::unsupported()
    }
}

/// Description of one scheduling unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitInfo {
    pub name: String,
    pub host: String,
    pub kind: QueryKind,
    pub namespace: String,
    pub counter_sources: usize,
    pub query_sources: usize,
    pub interval: Duration,
}

/// Builder for constructing an [`Engine`].
pub struct EngineBuilder {
    specs: Vec<SourceSpec>,
    emitter: Arc<dyn Emitter>,
    defaults: EngineDefaults,
    providers: Providers,
    identity: Option<Arc<dyn IdentityContext>>,
    credentials: Option<Credentials>,
    hosts: Vec<String>,
    interval: Duration,
    run_once: bool,
}

impl EngineBuilder {
    pub fn new(specs: Vec<SourceSpec>, emitter: Arc<dyn Emitter>) -> Self {
        Self {
            specs,
            emitter,
            defaults: EngineDefaults::default(),
            providers: Providers::default(),
            identity: None,
            credentials: None,
            hosts: vec![local_host_name()],
            interval: DEFAULT_POLL_INTERVAL,
            run_once: false,
        }
    }

    /// Apply hosts, interval, credentials and run mode from resolved options.
    pub fn options(mut self, options: &RunOptions) -> Self {
        self.hosts = options.hosts.clone();
        self.interval = options.poll_interval;
        self.credentials = options.credentials.clone();
        self.run_once = options.run_once;
        self
    }

    pub fn defaults(mut self, defaults: EngineDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn providers(mut self, providers: Providers) -> Self {
        self.providers = providers;
        self
    }

    /// Run provider calls under an alternate identity.
    pub fn identity(mut self, identity: Arc<dyn IdentityContext>) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn hosts(mut self, hosts: Vec<String>) -> Self {
        self.hosts = hosts;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Reject push sources at build time.
    pub fn run_once(mut self, run_once: bool) -> Self {
        self.run_once = run_once;
        self
    }

    /// Resolve every source and group them into scheduling units.
    pub fn build(self) -> Result<Engine, EngineError> {
        let resolver = SourceResolver::new(self.defaults.clone());
        let mut counter_sources: Vec<CounterSource> = Vec::new();
        let mut query_sources: Vec<QuerySource> = Vec::new();

        for (index, spec) in self.specs.iter().enumerate() {
            let resolution = resolver.resolve(index, spec);
            for err in &resolution.errors {
                err.log();
            }
            counter_sources.extend(resolution.counter_sources);
            query_sources.extend(resolution.query_sources);
        }

        if self.run_once {
            reject_push(&query_sources)?;
        }
        if self.hosts.is_empty() {
            return Err(EngineError::Config("no hosts configured".to_string()));
        }
        if counter_sources.is_empty() && query_sources.is_empty() {
            return Err(EngineError::Config(
                "no usable sources in counterlist".to_string(),
            ));
        }

        let mut groups: BTreeMap<UnitKey, (Vec<CounterSource>, Vec<QuerySource>)> = BTreeMap::new();
        for (pos, host) in self.hosts.iter().enumerate() {
            for source in &query_sources {
                let key = UnitKey::new(host.as_str(), source.kind, source.namespace.as_str());
                let key = match source.kind {
                    QueryKind::Pull => key,
                    QueryKind::Push => key.with_listener(source.index),
                };
                groups
                    .entry(key)
                    .or_default()
                    .1
                    .push(source.clone());
            }
            if pos == 0 && !counter_sources.is_empty() {
                groups
                    .entry(UnitKey::new(host.as_str(), QueryKind::Pull, self.defaults.namespace.as_str()))
                    .or_default()
                    .0
                    .extend(counter_sources.iter().cloned());
            }
        }

        let units: Vec<SchedulingUnit> = groups
            .into_iter()
            .map(|(key, (counters, queries))| SchedulingUnit::new(key, self.interval, counters, queries))
            .collect();

        for unit in &units {
            tracing::info!(
                unit = %unit.key(),
                counter_sources = unit.counter_sources().len(),
                query_sources = unit.query_sources().len(),
                "Scheduling unit registered"
            );
        }

        Ok(Engine {
            units,
            run_once: self.run_once,
            context: Arc::new(UnitContext {
                counter_provider: self.providers.counters,
                query_provider: self.providers.queries,
                emitter: self.emitter,
                identity: self.identity,
                credentials: self.credentials,
                resolver,
            }),
        })
    }
}

fn reject_push(sources: &[QuerySource]) -> Result<(), EngineError> {
    match sources.iter().find(|s| s.kind == QueryKind::Push) {
        Some(push) => Err(EngineError::Config(format!(
            "run-once cannot be combined with push source counterlist[{}] ({})",
            push.index, push.query
        ))),
        None => Ok(()),
    }
}

/// Owns the scheduling units and runs each on a dedicated worker thread.
pub struct Engine {
    units: Vec<SchedulingUnit>,
    context: Arc<UnitContext>,
    run_once: bool,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("units", &self.units.len())
            .field("run_once", &self.run_once)
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn builder(specs: Vec<SourceSpec>, emitter: Arc<dyn Emitter>) -> EngineBuilder {
        EngineBuilder::new(specs, emitter)
    }

    /// List the scheduling units.
    pub fn units(&self) -> Vec<UnitInfo> {
        self.units
            .iter()
            .map(|u| UnitInfo {
                name: u.key().to_string(),
                host: u.key().host.clone(),
                kind: u.key().kind,
                namespace: u.key().namespace.clone(),
                counter_sources: u.counter_sources().len(),
                query_sources: u.query_sources().len(),
                interval: u.interval(),
            })
            .collect()
    }

    /// Run exactly one cycle per unit and wait for all of them.
    pub fn run_once(self) -> Result<Vec<UnitReport>, EngineError> {
        self.run(RunMode::Once)
    }

    /// Run every unit until it runs out of sources or fails.
    ///
    /// Returns early with the first unit failure; the remaining units keep
    /// running until the process exits.
    pub fn run_forever(self) -> Result<Vec<UnitReport>, EngineError> {
        self.run(RunMode::Forever)
    }

    /// Run in the configured mode on a blocking task.
    pub async fn join(self) -> Result<Vec<UnitReport>, EngineError> {
        let mode = if self.run_once {
            RunMode::Once
        } else {
            RunMode::Forever
        };
        tokio::task::spawn_blocking(move || self.run(mode))
            .await
            .map_err(|e| EngineError::Join(e.to_string()))?
    }

    fn run(self, mode: RunMode) -> Result<Vec<UnitReport>, EngineError> {
        if mode == RunMode::Once
            && let Some(unit) = self.units.iter().find(|u| u.key().kind == QueryKind::Push)
        {
            return Err(EngineError::Config(format!(
                "run-once cannot be combined with push unit '{}'",
                unit.key()
            )));
        }

        let total = self.units.len();
        let (tx, rx) = mpsc::channel();

        for (index, unit) in self.units.into_iter().enumerate() {
            let name = unit.key().to_string();
            let ctx = Arc::clone(&self.context);
            let tx = tx.clone();
            let worker_name = name.clone();

            thread::Builder::new()
                .name(format!("perfmon-unit-{index}"))
                .spawn(move || {
                    let result = catch_unwind(AssertUnwindSafe(|| unit.run(&ctx, mode)));
                    let _ = tx.send((worker_name, result));
                })
                .map_err(|source| EngineError::Spawn {
                    unit: name,
                    source,
                })?;
        }
        drop(tx);

        let mut reports = Vec::with_capacity(total);
        for (unit, result) in rx {
            match result {
                Ok(Ok(report)) => reports.push(report),
                Ok(Err(source)) => {
                    tracing::error!(unit = %unit, error = %source, "Scheduling unit failed");
                    return Err(EngineError::Unit { unit, source });
                }
                Err(_) => return Err(EngineError::Panicked(unit)),
            }
        }

        tracing::info!(units = reports.len(), "All scheduling units stopped");
        Ok(reports)
    }
}
