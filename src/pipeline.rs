use crate::catalog::{Catalog, CatalogManager, TableDeletion};
use crate::concurrency::{run_wave, Outcome};
use crate::config::{Environment, StreamConfig};
use crate::date::PartitionHour;
use crate::error::EtlError;
use crate::plan::{plan_aggregate, plan_partition_swap, plan_transform, PartitionEntry, PlanEntry};
use crate::progress::WaveProgress;
use crate::query::{QueryEngine, QueryRunner};
use crate::storage::{ObjectStore, StorageCleaner};
use crate::util::init_tracing_once;
use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;

/// Pipeline stages, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Stage {
    CleanStaging,
    ExecutePrimary,
    DropOldPartition,
    CreateNewPartition,
    DropIntermediate,
}

impl Stage {
    pub fn label(self) -> &'static str {
        match self {
            Stage::CleanStaging => "clean staging",
            Stage::ExecutePrimary => "execute primary",
            Stage::DropOldPartition => "drop partitions",
            Stage::CreateNewPartition => "create partitions",
            Stage::DropIntermediate => "drop intermediate tables",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum PlanKind {
    Transform,
    Aggregate,
    PartitionCreate,
}

#[derive(Clone, Debug, Serialize)]
pub struct StreamOutcome {
    pub stream: String,
    pub outcome: Outcome,
}

/// Every stream's outcome for one stage.
#[derive(Clone, Debug, Serialize)]
pub struct WaveReport {
    pub stage: Stage,
    pub results: Vec<StreamOutcome>,
}

/// Outcomes of one pipeline invocation, wave by wave.
#[derive(Clone, Debug, Serialize)]
pub struct RunReport {
    pub kind: PlanKind,
    pub partition: PartitionHour,
    pub waves: Vec<WaveReport>,
}

impl RunReport {
    pub fn outcome(&self, stage: Stage, stream: &str) -> Option<&Outcome> {
        self.waves
            .iter()
            .find(|w| w.stage == stage)?
            .results
            .iter()
            .find(|r| r.stream == stream)
            .map(|r| &r.outcome)
    }

    /// `(stage, stream, reason)` for every failed operation.
    pub fn failures(&self) -> Vec<(Stage, &str, &str)> {
        self.waves
            .iter()
            .flat_map(|w| {
                w.results.iter().filter_map(move |r| match &r.outcome {
                    Outcome::Failed(reason) => Some((w.stage, r.stream.as_str(), reason.as_str())),
                    _ => None,
                })
            })
            .collect()
    }

    pub fn is_clean(&self) -> bool {
        self.failures().is_empty()
    }

    /// True if `stream` took part in every wave without a failure.
    pub fn stream_completed(&self, stream: &str) -> bool {
        !self.waves.is_empty()
            && self.waves.iter().all(|w| w.results.iter().any(|r| r.stream == stream && r.outcome.is_ok()))
    }

    pub fn streams(&self) -> Vec<&str> {
        self.waves.first().map(|w| w.results.iter().map(|r| r.stream.as_str()).collect()).unwrap_or_default()
    }
}

/// Drives the hourly transform, aggregation, and partition pre-creation runs.
///
/// Each stage runs as one concurrent wave over the plan; the next stage starts only after
/// every operation of the current one has settled. Failures are logged and recorded, never
/// propagated: one broken stream must not hold back the others, and every later stage is
/// still attempted for the stream that failed.
#[derive(Clone)]
pub struct LogPipeline {
    env: Environment,
    streams: Vec<StreamConfig>,
    runner: QueryRunner,
    catalog: CatalogManager,
    cleaner: StorageCleaner,
    concurrency: usize,
    progress: bool,
}

impl LogPipeline {
    pub fn new(
        env: Environment,
        engine: Arc<dyn QueryEngine>,
        catalog: Arc<dyn Catalog>,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        let runner = QueryRunner::new(engine, env.query_output_location.clone())
            .poll_interval(env.poll_interval)
            .timeout(env.query_timeout);
        Self {
            streams: crate::config::default_streams(),
            runner,
            catalog: CatalogManager::new(catalog),
            cleaner: StorageCleaner::new(store),
            concurrency: 0,
            progress: false,
            env,
        }
    }

    // -------- Builder methods --------
    pub fn streams(mut self, streams: Vec<StreamConfig>) -> Self { self.streams = streams; self }
    /// Max operations in flight per wave; `0` runs every stream at once.
    pub fn concurrency(mut self, n: usize) -> Self { self.concurrency = n; self }
    pub fn progress(mut self, yes: bool) -> Self { self.progress = yes; self }
    pub fn delete_page_size(mut self, n: usize) -> Self { self.cleaner = self.cleaner.page_size(n); self }

    pub fn environment(&self) -> &Environment { &self.env }
    pub fn configured_streams(&self) -> &[StreamConfig] { &self.streams }

    // -------- Runs --------

    /// Copy the raw partition of every transform-capable stream into its search table.
    pub fn run_transform(&self, hour: &PartitionHour) -> Result<RunReport> {
        init_tracing_once();
        tracing::info!(partition = %hour, "Transforming partition");
        let plan = plan_transform(&self.env, &self.streams, hour).context("plan transform")?;
        Ok(self.run_ctas_plan(PlanKind::Transform, hour, &plan))
    }

    /// Summarise the transformed partition of every aggregate-capable stream.
    pub fn run_aggregate(&self, hour: &PartitionHour) -> Result<RunReport> {
        init_tracing_once();
        tracing::info!(partition = %hour, "Aggregating partition");
        let plan = plan_aggregate(&self.env, &self.streams, hour).context("plan aggregation")?;
        Ok(self.run_ctas_plan(PlanKind::Aggregate, hour, &plan))
    }

    /// Register `hour` on every raw source table ahead of data arriving for it.
    pub fn run_partition_create(&self, hour: &PartitionHour) -> RunReport {
        init_tracing_once();
        tracing::info!(partition = %hour, "Creating partitions");
        let plan = plan_partition_swap(&self.env, &self.streams, hour);
        let name = |e: &PartitionEntry| e.stream_name.clone();

        let waves = vec![
            self.wave(Stage::DropOldPartition, &plan, name, |e| self.drop_partition(&e.drop_partition_statement)),
            self.wave(Stage::CreateNewPartition, &plan, name, |e| {
                self.runner.run_and_wait(&e.create_partition_statement).map(|_| Outcome::Succeeded)
            }),
        ];
        tracing::info!(partition = %hour, "End of partition creation");
        RunReport { kind: PlanKind::PartitionCreate, partition: hour.clone(), waves }
    }

    /// Execute a CTAS plan through all five stages.
    pub fn run_ctas_plan(&self, kind: PlanKind, hour: &PartitionHour, plan: &[PlanEntry]) -> RunReport {
        tracing::info!(kind = ?kind, partition = %hour, streams = plan.len(), "Start of run");
        let name = |e: &PlanEntry| e.stream_name.clone();
        let mut waves = Vec::with_capacity(5);

        // A half-written result from an earlier attempt would make the CTAS refuse its location.
        waves.push(self.wave(Stage::CleanStaging, plan, name, |e| {
            self.cleaner.delete_all(&e.storage_bucket, &e.storage_data_prefix).map(|_| Outcome::Succeeded)
        }));
        waves.push(self.wave(Stage::ExecutePrimary, plan, name, |e| {
            self.runner
                .run_and_wait(&e.primary_statement)
                .with_context(|| format!("create {}", e.intermediate_table))
                .map(|_| Outcome::Succeeded)
        }));
        waves.push(self.wave(Stage::DropOldPartition, plan, name, |e| self.drop_partition(&e.drop_partition_statement)));
        waves.push(self.wave(Stage::CreateNewPartition, plan, name, |e| {
            self.runner.run_and_wait(&e.create_partition_statement).map(|_| Outcome::Succeeded)
        }));
        // Only the external location is meant to outlive the run.
        waves.push(self.wave(Stage::DropIntermediate, plan, name, |e| {
            self.catalog.delete_table(&self.env.database, &e.intermediate_table).map(|d| match d {
                TableDeletion::Deleted => Outcome::Succeeded,
                TableDeletion::NotFound => Outcome::Absent,
            })
        }));

        let report = RunReport { kind, partition: hour.clone(), waves };
        let failed = report.failures().len();
        if failed == 0 {
            tracing::info!(kind = ?kind, partition = %hour, "End of run");
        } else {
            tracing::warn!(kind = ?kind, partition = %hour, failed, "End of run with failures");
        }
        report
    }

    fn drop_partition(&self, statement: &str) -> Result<Outcome> {
        match self.runner.run_and_wait(statement) {
            Ok(_) => Ok(Outcome::Succeeded),
            Err(e) if e.downcast_ref::<EtlError>().is_some_and(EtlError::is_absent_target) => {
                tracing::info!(error = %e, "partition not present, nothing to drop");
                Ok(Outcome::Absent)
            }
            Err(e) => Err(e),
        }
    }

    fn wave<T, N, F>(&self, stage: Stage, items: &[T], name: N, op: F) -> WaveReport
    where
        T: Sync,
        N: Fn(&T) -> String,
        F: Sync + Fn(&T) -> Result<Outcome>,
    {
        tracing::info!(stage = stage.label(), operations = items.len(), "Start of stage");
        let progress = WaveProgress::start(stage.label(), items.len(), self.progress);

        let outcomes = run_wave(items, self.concurrency, |item| {
            let outcome = match op(item) {
                Ok(o) => o,
                Err(e) => Outcome::Failed(format!("{e:#}")),
            };
            progress.settled();
            outcome
        });
        progress.finish(outcomes.iter().filter(|o| !o.is_ok()).count());

        let results: Vec<StreamOutcome> = items
            .iter()
            .zip(outcomes)
            .map(|(item, outcome)| StreamOutcome { stream: name(item), outcome })
            .collect();
        for r in &results {
            if let Outcome::Failed(reason) = &r.outcome {
                tracing::warn!(stream = %r.stream, stage = stage.label(), error = %reason, "operation failed");
            }
        }
        tracing::info!(stage = stage.label(), "End of {}", stage.label());
        WaveReport { stage, results }
    }
}
