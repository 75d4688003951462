//! Scheduling units and their cycle state machine.
//!
//! A unit owns a set of sources, one scope and one handle cache, and runs
//! `Idle -> Collecting -> Reporting -> (Sleeping | Exited) -> Collecting ...`
//! on its own thread.

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use strum_macros::{AsRefStr, Display};

use crate::collector::aggregate::aggregate_counters;
use crate::collector::counter::CounterSet;
use crate::collector::identity::{IdentityContext, UnitIdentity};
use crate::collector::query::{PollEnv, QueryKind, QuerySet, QuerySource};
use crate::collector::resolver::{CounterSource, SourceResolver};
use crate::collector::traits::{CollectorError, CounterProvider, Credentials, QueryProvider};
use crate::emit::{Emitter, MetricBatch};

/// Cycle state of a scheduling unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum UnitState {
    Idle,
    Collecting,
    Reporting,
    Sleeping,
    Exited,
}

/// Whether units stop after one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum RunMode {
    Once,
    Forever,
}

/// Next state after a batch has been reported.
pub fn after_reporting(kind: QueryKind, mode: RunMode, active: bool) -> UnitState {
    match (active, mode, kind) {
        (false, _, _) | (_, RunMode::Once, _) => UnitState::Exited,
        (true, RunMode::Forever, QueryKind::Push) => UnitState::Collecting,
        (true, RunMode::Forever, QueryKind::Pull) => UnitState::Sleeping,
    }
}

/// Remaining time to sleep after a cycle took `elapsed`. Never negative.
pub fn compensated_sleep(interval: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed)
}

/// Identifies a scheduling unit.
///
/// Pull units are shared per host and namespace. Each push listener gets its
/// own unit, keyed by the position of its source, since waiting for one
/// event blocks the whole unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitKey {
    pub host: String,
    pub kind: QueryKind,
    pub namespace: String,
    pub listener: Option<usize>,
}

impl UnitKey {
    pub fn new(host: impl Into<String>, kind: QueryKind, namespace: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            kind,
            namespace: namespace.into(),
            listener: None,
        }
    }

    /// Dedicate the unit to the push source at `index` of the source list.
    pub fn with_listener(mut self, index: usize) -> Self {
        self.listener = Some(index);
        self
    }
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.host, self.namespace, self.kind)?;
        match self.listener {
            Some(index) => write!(f, "#{index}"),
            None => Ok(()),
        }
    }
}

/// Shared, read-only inputs of every unit.
pub struct UnitContext {
    pub counter_provider: Arc<dyn CounterProvider>,
    pub query_provider: Arc<dyn QueryProvider>,
    pub emitter: Arc<dyn Emitter>,
    pub identity: Option<Arc<dyn IdentityContext>>,
    pub credentials: Option<Credentials>,
    pub resolver: SourceResolver,
}

/// What a unit did before it exited.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitReport {
    pub unit: String,
    pub cycles: u64,
    pub batches: u64,
    pub records: u64,
    pub removed_sources: usize,
}

/// A group of sources polled together on one worker.
#[derive(Debug)]
pub struct SchedulingUnit {
    key: UnitKey,
    interval: Duration,
    counters: CounterSet,
    queries: QuerySet,
    report: UnitReport,
}

impl SchedulingUnit {
    pub fn new(
        key: UnitKey,
        interval: Duration,
        counters: Vec<CounterSource>,
        queries: Vec<QuerySource>,
    ) -> Self {
        let interval = match key.kind {
            QueryKind::Pull => interval,
            QueryKind::Push => Duration::ZERO,
        };
        let report = UnitReport {
            unit: key.to_string(),
            ..Default::default()
        };
        Self {
            key,
            interval,
            counters: CounterSet::new(counters),
            queries: QuerySet::new(queries),
            report,
        }
    }

    pub fn key(&self) -> &UnitKey {
        &self.key
    }

    /// Effective interval; zero for push units.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn counter_sources(&self) -> &[CounterSource] {
        self.counters.sources()
    }

    pub fn query_sources(&self) -> &[QuerySource] {
        self.queries.sources()
    }

    pub fn has_sources(&self) -> bool {
        !self.counters.is_empty() || !self.queries.is_empty()
    }

    pub fn report(&self) -> &UnitReport {
        &self.report
    }

    /// Drive the unit until it exits. Must be called on the unit's worker.
    pub fn run(mut self, ctx: &UnitContext, mode: RunMode) -> Result<UnitReport, CollectorError> {
        let identity = UnitIdentity::acquire(ctx.identity.clone())?;
        tracing::info!(unit = %self.key, mode = %mode, "Scheduling unit started");

        let mut state = UnitState::Idle;
        let mut started = Instant::now();
        let mut pending: Option<MetricBatch> = None;

        loop {
            state = match state {
                UnitState::Idle => UnitState::Collecting,
                UnitState::Collecting => {
                    started = Instant::now();
                    pending = Some(self.collect(ctx, &identity)?);
                    UnitState::Reporting
                }
                UnitState::Reporting => {
                    if let Some(batch) = pending.take() {
                        self.emit(ctx, batch)?;
                    }
                    let next = after_reporting(self.key.kind, mode, self.has_sources());
                    if next == UnitState::Exited && !self.has_sources() {
                        tracing::warn!(unit = %self.key, "No active sources remain, stopping unit");
                    }
                    next
                }
                UnitState::Sleeping => {
                    let elapsed = started.elapsed();
                    let pause = compensated_sleep(self.interval, elapsed);
                    tracing::debug!(unit = %self.key, polling_time = ?elapsed, sleep = ?pause, "Cycle finished");
                    thread::sleep(pause);
                    UnitState::Collecting
                }
                UnitState::Exited => break,
            };
        }

        tracing::info!(unit = %self.key, cycles = self.report.cycles, "Scheduling unit stopped");
        Ok(self.report)
    }

    /// Collect and report one cycle. Returns the number of records emitted.
    pub fn run_cycle(&mut self, ctx: &UnitContext, identity: &UnitIdentity) -> Result<usize, CollectorError> {
        let batch = self.collect(ctx, identity)?;
        let records = batch.len();
        self.emit(ctx, batch)?;
        Ok(records)
    }

    fn collect(&mut self, ctx: &UnitContext, identity: &UnitIdentity) -> Result<MetricBatch, CollectorError> {
        let mut batch = MetricBatch::new(self.key.host.clone());

        if !self.counters.is_empty() {
            let counters = &mut self.counters;
            let (removed, readings) = identity.run(|| {
                let removed = counters.refresh(&ctx.resolver, ctx.counter_provider.as_ref());
                (removed, counters.collect())
            })?;
            self.report.removed_sources += removed;
            for record in aggregate_counters(&readings) {
                batch.push(record);
            }
        }

        if !self.queries.is_empty() {
            let env = PollEnv {
                provider: ctx.query_provider.as_ref(),
                host: &self.key.host,
                credentials: ctx.credentials.as_ref(),
                identity,
            };
            self.report.removed_sources += self.queries.poll(&env, &mut batch)?;
        }

        self.report.cycles += 1;
        Ok(batch)
    }

    fn emit(&mut self, ctx: &UnitContext, batch: MetricBatch) -> Result<(), CollectorError> {
        if batch.is_empty() {
            tracing::debug!(unit = %self.key, "Nothing to report this cycle");
            return Ok(());
        }
        self.report.batches += 1;
        self.report.records += batch.len() as u64;
        ctx.emitter.emit(batch)?;
        Ok(())
    }
}
