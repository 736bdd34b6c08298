//! Retention sweep: purge transient tables, the query engine's output location, and
//! partitioned data older than the retention window.

use crate::catalog::{Catalog, CatalogManager, TableDeletion};
use crate::concurrency::{run_wave, Outcome};
use crate::config::{Environment, S3Location};
use crate::date::PartitionDay;
use crate::storage::{ObjectStore, StorageCleaner};
use crate::util::init_tracing_once;
use serde::Serialize;
use std::sync::Arc;
use time::OffsetDateTime;

/// Naming pattern of transient CTAS tables.
pub const TRANSIENT_TABLE_PATTERN: &str = "^ctas.*";

/// Deletes in flight per sweep step. Leftover tables pile up after failed runs, so the
/// width does not follow the item count.
pub const DEFAULT_SWEEP_CONCURRENCY: usize = 8;

/// Which configured bucket a retention root lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum StorageTier {
    Partitioned,
    Optimized,
}

/// A `(tier, key root)` pair whose day partitions expire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RetentionRoot {
    pub tier: StorageTier,
    pub root: String,
}

impl RetentionRoot {
    pub fn new(tier: StorageTier, root: impl Into<String>) -> Self {
        Self { tier, root: root.into() }
    }
}

pub fn default_roots() -> Vec<RetentionRoot> {
    vec![
        RetentionRoot::new(StorageTier::Partitioned, "cloudfronts/raw"),
        RetentionRoot::new(StorageTier::Partitioned, "s3buckets/raw"),
        RetentionRoot::new(StorageTier::Optimized, "cloudfronts/search"),
        RetentionRoot::new(StorageTier::Optimized, "s3buckets/search"),
    ]
}

#[derive(Clone, Debug, Serialize)]
pub struct PurgedPrefix {
    pub bucket: String,
    pub prefix: String,
    pub outcome: Outcome,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct SweepReport {
    pub cutoff: Option<PartitionDay>,
    pub tables: Vec<(String, Outcome)>,
    pub query_output: Option<PurgedPrefix>,
    pub prefixes: Vec<PurgedPrefix>,
    /// Errors that stopped a whole step (e.g. the table listing itself failed).
    pub errors: Vec<String>,
}

impl SweepReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
            && self.tables.iter().all(|(_, o)| o.is_ok())
            && self.prefixes.iter().all(|p| p.outcome.is_ok())
            && self.query_output.as_ref().map_or(true, |p| p.outcome.is_ok())
    }
}

/// Runs on its own schedule, independent of the hourly pipeline. Every step is best effort.
#[derive(Clone)]
pub struct RetentionSweeper {
    env: Environment,
    catalog: CatalogManager,
    cleaner: StorageCleaner,
    roots: Vec<RetentionRoot>,
    concurrency: usize,
}

impl RetentionSweeper {
    pub fn new(env: Environment, catalog: Arc<dyn Catalog>, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            env,
            catalog: CatalogManager::new(catalog),
            cleaner: StorageCleaner::new(store),
            roots: default_roots(),
            concurrency: DEFAULT_SWEEP_CONCURRENCY,
        }
    }

    pub fn roots(mut self, roots: Vec<RetentionRoot>) -> Self {
        self.roots = roots;
        self
    }

    /// Max deletes in flight per step; at least one.
    pub fn concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    /// Full sweep: transient tables, query output, then data older than `days`.
    pub fn sweep(&self, days: i64, now: OffsetDateTime) -> SweepReport {
        init_tracing_once();
        let mut report = SweepReport::default();
        self.purge_transient_tables(&mut report);
        self.purge_query_output(&mut report);
        self.purge_days(days, now, &mut report);
        report
    }

    /// Delete the day partition `days` before `now` under every retention root.
    pub fn purge_older_than(&self, days: i64, now: OffsetDateTime) -> SweepReport {
        init_tracing_once();
        let mut report = SweepReport::default();
        self.purge_days(days, now, &mut report);
        report
    }

    fn purge_transient_tables(&self, report: &mut SweepReport) {
        tracing::info!("Attempting to delete remaining CTAS tables");
        let db = &self.env.database;
        let tables = match self.catalog.list_tables(db, TRANSIENT_TABLE_PATTERN) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), "listing transient tables failed");
                report.errors.push(format!("{e:#}"));
                return;
            }
        };
        let outcomes = run_wave(&tables, self.concurrency, |name| match self.catalog.delete_table(db, name) {
            Ok(TableDeletion::Deleted) => Outcome::Succeeded,
            Ok(TableDeletion::NotFound) => Outcome::Absent,
            Err(e) => {
                tracing::warn!(table = %name, error = %format!("{e:#}"), "table delete failed");
                Outcome::Failed(format!("{e:#}"))
            }
        });
        report.tables = tables.into_iter().zip(outcomes).collect();
        tracing::info!(tables = report.tables.len(), "End deleting CTAS tables");
    }

    fn purge_query_output(&self, report: &mut SweepReport) {
        let location = match S3Location::parse(&self.env.query_output_location) {
            Ok(l) => l,
            Err(e) => {
                tracing::warn!(error = %e, "query output location unusable, skipping");
                report.errors.push(format!("{e:#}"));
                return;
            }
        };
        tracing::info!(bucket = %location.bucket, prefix = %location.prefix, "Deleting query output");
        report.query_output = Some(self.purge_prefix(&location.bucket, &location.prefix));
    }

    fn purge_days(&self, days: i64, now: OffsetDateTime, report: &mut SweepReport) {
        let cutoff = match PartitionDay::days_before(now, days) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(days, error = %format!("{e:#}"), "no expired day to delete");
                report.errors.push(format!("{e:#}"));
                return;
            }
        };
        tracing::info!(days, cutoff = %cutoff, "Deleting expired partitions");

        let targets: Vec<(String, String)> = self
            .roots
            .iter()
            .map(|r| {
                let bucket = match r.tier {
                    StorageTier::Partitioned => self.env.partitioned_storage.clone(),
                    StorageTier::Optimized => self.env.optimized_storage.clone(),
                };
                (bucket, format!("{}{}", r.root, cutoff.path_suffix()))
            })
            .collect();

        let (targets, unconfigured): (Vec<_>, Vec<_>) = targets.into_iter().partition(|(b, _)| !b.is_empty());
        for (_, prefix) in unconfigured {
            tracing::warn!(prefix = %prefix, "storage bucket not configured, skipping");
            report.errors.push(format!("no bucket configured for {prefix}"));
        }

        let outcomes = run_wave(&targets, self.concurrency, |(bucket, prefix)| self.purge_outcome(bucket, prefix));
        report.cutoff = Some(cutoff);
        report.prefixes = targets
            .into_iter()
            .zip(outcomes)
            .map(|((bucket, prefix), outcome)| PurgedPrefix { bucket, prefix, outcome })
            .collect();
    }

    fn purge_prefix(&self, bucket: &str, prefix: &str) -> PurgedPrefix {
        PurgedPrefix { bucket: bucket.to_string(), prefix: prefix.to_string(), outcome: self.purge_outcome(bucket, prefix) }
    }

    fn purge_outcome(&self, bucket: &str, prefix: &str) -> Outcome {
        tracing::info!(bucket, prefix, "  - deleting");
        match self.cleaner.delete_all(bucket, prefix) {
            Ok(n) => {
                tracing::info!(bucket, prefix, deleted = n, "Files deleted");
                Outcome::Succeeded
            }
            Err(e) => {
                tracing::warn!(bucket, prefix, error = %format!("{e:#}"), "Error while deleting");
                Outcome::Failed(format!("{e:#}"))
            }
        }
    }
}
