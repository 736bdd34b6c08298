mod catalog;
mod classify;
mod concurrency;
mod config;
mod date;
mod error;
mod jobs;
mod pipeline;
mod plan;
mod progress;
mod query;
mod relocate;
mod retention;
mod sql;
mod storage;
mod util;

pub use crate::config::{
    build_streams, default_streams, load_streams, parse_streams, Capabilities, Environment, S3Location,
    StreamConfig, StreamDef, StreamKind,
};
pub use crate::date::{PartitionDay, PartitionHour};
pub use crate::error::EtlError;

// key classification
pub use crate::classify::{classify, ClassifiedKey, LogKind};

// planning and statement rendering
pub use crate::plan::{
    plan_aggregate, plan_partition_create, plan_partition_drop, plan_partition_swap, plan_transform,
    PartitionEntry, PartitionStatement, PlanEntry,
};
pub use crate::sql::PartitionVerb;

// external collaborator seams and their wrappers
pub use crate::catalog::{Catalog, CatalogManager, TableDeletion};
pub use crate::query::{QueryEngine, QueryRunner, QueryState, QueryStatus};
pub use crate::storage::{
    DeleteReport, LocalObjectStore, MemoryObjectStore, ObjectPage, ObjectStore, StorageCleaner, DEFAULT_PAGE_SIZE,
};

// orchestration
pub use crate::concurrency::{run_wave, Outcome};
pub use crate::pipeline::{LogPipeline, PlanKind, RunReport, Stage, StreamOutcome, WaveReport};
pub use crate::relocate::{load_notifications, parse_notifications, ArrivalNotification, Relocation, Relocator};
pub use crate::retention::{
    default_roots, PurgedPrefix, RetentionRoot, RetentionSweeper, StorageTier, SweepReport,
    DEFAULT_SWEEP_CONCURRENCY, TRANSIENT_TABLE_PATTERN,
};
pub use crate::jobs::{run_job, Job, JobReport, Services};

// Expose multiprogress and tracing setup for binaries.
pub use crate::progress::set_global_multiprogress;
pub use crate::util::init_tracing_once;
