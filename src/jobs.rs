//! Scheduled entry points. Each invocation is independent: errors are logged here and
//! never escape, so the next tick simply tries again.

use crate::catalog::Catalog;
use crate::config::Environment;
use crate::date::PartitionHour;
use crate::pipeline::{LogPipeline, RunReport};
use crate::query::QueryEngine;
use crate::retention::{RetentionSweeper, SweepReport};
use crate::storage::ObjectStore;
use crate::util::init_tracing_once;
use anyhow::{anyhow, Result};
use std::str::FromStr;
use std::sync::Arc;
use time::OffsetDateTime;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Job {
    /// Register next hour's partition on the raw tables before data lands in it.
    CreatePartitions,
    /// Copy the just-completed hour into the search tables.
    Transform,
    /// Summarise the just-completed hour.
    Aggregate,
    /// Retention sweep.
    Cleanup,
}

impl Job {
    /// Partition-hour the job works on when triggered at `now`.
    pub fn partition_hour(self, now: OffsetDateTime) -> PartitionHour {
        match self {
            Job::CreatePartitions => PartitionHour::shifted(now, 1),
            Job::Transform | Job::Aggregate => PartitionHour::shifted(now, -1),
            Job::Cleanup => PartitionHour::from_datetime(now),
        }
    }
}

impl FromStr for Job {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create-partitions" | "partitions" => Ok(Job::CreatePartitions),
            "transform" => Ok(Job::Transform),
            "aggregate" | "aggregation" => Ok(Job::Aggregate),
            "cleanup" | "retention" => Ok(Job::Cleanup),
            other => Err(anyhow!("unknown job '{other}'")),
        }
    }
}

#[derive(Debug)]
pub enum JobReport {
    Run(RunReport),
    Sweep(SweepReport),
}

/// External collaborators a job needs.
#[derive(Clone)]
pub struct Services {
    pub engine: Arc<dyn QueryEngine>,
    pub catalog: Arc<dyn Catalog>,
    pub store: Arc<dyn ObjectStore>,
}

fn execute(job: Job, env: &Environment, services: &Services, now: OffsetDateTime) -> Result<JobReport> {
    let pipeline = || -> Result<LogPipeline> {
        Ok(LogPipeline::new(env.clone(), services.engine.clone(), services.catalog.clone(), services.store.clone())
            .streams(env.streams()?))
    };
    let hour = job.partition_hour(now);
    let report = match job {
        Job::CreatePartitions => JobReport::Run(pipeline()?.run_partition_create(&hour)),
        Job::Transform => JobReport::Run(pipeline()?.run_transform(&hour)?),
        Job::Aggregate => JobReport::Run(pipeline()?.run_aggregate(&hour)?),
        Job::Cleanup => {
            let sweeper = RetentionSweeper::new(env.clone(), services.catalog.clone(), services.store.clone());
            JobReport::Sweep(sweeper.sweep(env.retention_days, now))
        }
    };
    Ok(report)
}

/// Run one scheduled job. Any error that escapes the job is logged and swallowed.
pub fn run_job(job: Job, env: &Environment, services: &Services, now: OffsetDateTime) -> Option<JobReport> {
    init_tracing_once();
    tracing::info!(job = ?job, "Starting job");
    match execute(job, env, services, now) {
        Ok(report) => {
            tracing::info!(job = ?job, "Job finished");
            Some(report)
        }
        Err(e) => {
            tracing::error!(job = ?job, error = %format!("{e:#}"), "Job aborted");
            None
        }
    }
}
