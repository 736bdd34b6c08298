//! Statement rendering. The text produced here is what the query engine parses, so
//! literal quoting and partition-key order must stay stable.

use crate::config::StreamKind;
use crate::date::PartitionHour;

/// Verb for a partition metadata change. DROP and ADD statements differ only in this word.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PartitionVerb {
    Drop,
    Add,
}

impl PartitionVerb {
    fn as_sql(self) -> &'static str {
        match self {
            PartitionVerb::Drop => "DROP",
            PartitionVerb::Add => "ADD",
        }
    }
}

/// `year = '2019', month = '12', ...` as used inside `PARTITION ( .. )`.
fn partition_spec(hour: &PartitionHour) -> String {
    hour.literals()
        .iter()
        .map(|(col, val)| format!("{col} = '{val}'"))
        .collect::<Vec<_>>()
        .join(",\n    ")
}

/// `WHERE year = '2019' AND month = '12' ...` matching the source partition.
fn partition_filter(hour: &PartitionHour) -> String {
    let clauses: Vec<String> = hour.literals().iter().map(|(col, val)| format!("{col} = '{val}'")).collect();
    format!("WHERE {}", clauses.join("\n    AND "))
}

pub fn alter_partition(verb: PartitionVerb, database: &str, table: &str, hour: &PartitionHour) -> String {
    format!(
        "ALTER TABLE {database}.{table}\n{} PARTITION (\n    {} );",
        verb.as_sql(),
        partition_spec(hour)
    )
}

fn ctas_header(database: &str, intermediate: &str, external_location: &str) -> String {
    format!(
        "CREATE TABLE {database}.{intermediate}\n\
         WITH ( format='PARQUET',\n    \
         external_location='{external_location}',\n    \
         parquet_compression = 'SNAPPY')"
    )
}

/// Full copy of one source partition into Parquet at `external_location`.
pub fn ctas_copy(
    database: &str,
    intermediate: &str,
    external_location: &str,
    source_table: &str,
    hour: &PartitionHour,
) -> String {
    format!(
        "{}\nAS SELECT *\nFROM {database}.{source_table}\n{};",
        ctas_header(database, intermediate, external_location),
        partition_filter(hour)
    )
}

/// Hourly summary of one transformed partition. `None` for kinds without a summary shape.
pub fn ctas_aggregate(
    kind: StreamKind,
    database: &str,
    intermediate: &str,
    external_location: &str,
    source_table: &str,
    hour: &PartitionHour,
) -> Option<String> {
    let (select, group_by) = match kind {
        StreamKind::CloudFront => (
            "SELECT host, uri, status, count(*) as count, SUM(bytes) as total_bytes,\n    \
             CAST(MIN(timetaken) AS DOUBLE) as min_time, CAST(MAX(timetaken) AS DOUBLE) as max_time,\n    \
             CAST(AVG(timetaken) AS DOUBLE) as avg_time, CAST(STDDEV(timetaken) AS DOUBLE) as stddev_time",
            "GROUP BY host, uri, status",
        ),
        StreamKind::S3Access => (
            "SELECT bucket as bucket_name, httpstatus as status, count(*) as count",
            "GROUP BY bucket, httpstatus",
        ),
        StreamKind::CloudTrail => (
            "SELECT eventsource, awsregion, count(*) as count",
            "GROUP BY eventsource, awsregion",
        ),
        StreamKind::CloudTrailDigest => return None,
    };
    Some(format!(
        "{}\nAS {select}\nFROM {database}.{source_table}\n{}\n{group_by};",
        ctas_header(database, intermediate, external_location),
        partition_filter(hour)
    ))
}
