//! Partition planning: turn the stream configuration plus one partition-hour into the
//! statements and storage paths each pipeline stage needs. Pure; no external calls.

use crate::config::{Environment, S3Location, StreamConfig};
use crate::date::PartitionHour;
use crate::sql::{alter_partition, ctas_aggregate, ctas_copy, PartitionVerb};
use anyhow::Result;
use serde::Serialize;

/// Everything the CTAS pipeline needs for one stream and one partition-hour.
/// Built fresh per run and consumed once.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PlanEntry {
    pub stream_name: String,
    pub storage_bucket: String,
    /// Object prefix the CTAS writes into, `path/year=../month=../day=../hour=../`.
    pub storage_data_prefix: String,
    pub intermediate_table: String,
    pub primary_statement: String,
    pub drop_partition_statement: String,
    pub create_partition_statement: String,
}

/// Metadata-only partition swap for one stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PartitionEntry {
    pub stream_name: String,
    pub drop_partition_statement: String,
    pub create_partition_statement: String,
}

/// A single partition statement, as returned by the one-sided planners.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PartitionStatement {
    pub stream_name: String,
    pub statement: String,
}

/// Object key prefix the CTAS output lands under: the results location's own key prefix,
/// then the configured path (which starts with one `/`), then the partition path.
fn data_prefix(results: &S3Location, path_root: &str, hour: &PartitionHour) -> String {
    let root = path_root.strip_prefix('/').unwrap_or(path_root);
    let base = results.prefix.trim_matches('/');
    if base.is_empty() {
        format!("{}/{}/", root, hour.hive_path())
    } else {
        format!("{}/{}/{}/", base, root, hour.hive_path())
    }
}

fn external_location(results_location: &str, path_root: &str, hour: &PartitionHour) -> String {
    format!("{}{}/{}", results_location, path_root, hour.hive_path())
}

/// Raw partition → transformed (Parquet) partition, one entry per transform-capable stream.
pub fn plan_transform(env: &Environment, streams: &[StreamConfig], hour: &PartitionHour) -> Result<Vec<PlanEntry>> {
    let results = env.results_root()?;
    let db = env.database.as_str();
    let mut plan = Vec::new();

    for stream in streams.iter().filter(|s| s.capabilities.transform) {
        let (Some(source), Some(target), Some(path)) =
            (stream.source_table.as_deref(), stream.target_table.as_deref(), stream.target_path.as_deref())
        else {
            continue;
        };
        tracing::debug!(stream = %stream.name, source, target, partition = %hour, "planning transform");

        let intermediate = format!("ctas_{}_{}", target, hour.table_suffix());
        let location = external_location(&env.results_location, path, hour);
        plan.push(PlanEntry {
            stream_name: stream.name.clone(),
            storage_bucket: results.bucket.clone(),
            storage_data_prefix: data_prefix(&results, path, hour),
            primary_statement: ctas_copy(db, &intermediate, &location, source, hour),
            drop_partition_statement: alter_partition(PartitionVerb::Drop, db, target, hour),
            create_partition_statement: alter_partition(PartitionVerb::Add, db, target, hour),
            intermediate_table: intermediate,
        });
    }
    Ok(plan)
}

/// Transformed partition → hourly summary, one entry per aggregate-capable stream.
pub fn plan_aggregate(env: &Environment, streams: &[StreamConfig], hour: &PartitionHour) -> Result<Vec<PlanEntry>> {
    let results = env.results_root()?;
    let db = env.database.as_str();
    let mut plan = Vec::new();

    for stream in streams.iter().filter(|s| s.capabilities.aggregate) {
        let (Some(source), Some(path)) = (stream.target_table.as_deref(), stream.aggregation_path.as_deref()) else {
            continue;
        };
        let intermediate = format!("ctas_agg_{}_{}", stream.name, hour.table_suffix());
        let location = external_location(&env.results_location, path, hour);
        let Some(primary) = ctas_aggregate(stream.kind, db, &intermediate, &location, source, hour) else {
            tracing::warn!(stream = %stream.name, kind = ?stream.kind, "no aggregation template, skipping");
            continue;
        };
        let aggregated = stream.aggregated_table();
        plan.push(PlanEntry {
            stream_name: stream.name.clone(),
            storage_bucket: results.bucket.clone(),
            storage_data_prefix: data_prefix(&results, path, hour),
            primary_statement: primary,
            drop_partition_statement: alter_partition(PartitionVerb::Drop, db, &aggregated, hour),
            create_partition_statement: alter_partition(PartitionVerb::Add, db, &aggregated, hour),
            intermediate_table: intermediate,
        });
    }
    Ok(plan)
}

fn plan_partition_one_side(
    env: &Environment,
    streams: &[StreamConfig],
    hour: &PartitionHour,
    verb: PartitionVerb,
) -> Vec<PartitionStatement> {
    streams
        .iter()
        .filter(|s| s.capabilities.partition_create)
        .filter_map(|s| {
            let source = s.source_table.as_deref()?;
            Some(PartitionStatement {
                stream_name: s.name.clone(),
                statement: alter_partition(verb, &env.database, source, hour),
            })
        })
        .collect()
}

/// ADD PARTITION on every raw source table.
pub fn plan_partition_create(env: &Environment, streams: &[StreamConfig], hour: &PartitionHour) -> Vec<PartitionStatement> {
    plan_partition_one_side(env, streams, hour, PartitionVerb::Add)
}

/// DROP PARTITION on every raw source table.
pub fn plan_partition_drop(env: &Environment, streams: &[StreamConfig], hour: &PartitionHour) -> Vec<PartitionStatement> {
    plan_partition_one_side(env, streams, hour, PartitionVerb::Drop)
}

/// Drop-then-add pairs for the raw source tables, in configuration order.
pub fn plan_partition_swap(env: &Environment, streams: &[StreamConfig], hour: &PartitionHour) -> Vec<PartitionEntry> {
    plan_partition_drop(env, streams, hour)
        .into_iter()
        .zip(plan_partition_create(env, streams, hour))
        .map(|(drop, add)| PartitionEntry {
            stream_name: drop.stream_name,
            drop_partition_statement: drop.statement,
            create_partition_statement: add.statement,
        })
        .collect()
}
