//! Raw object key classification: which log family a freshly landed object belongs to,
//! which partition-hour it falls into, and where it should be relocated.

use crate::date::PartitionHour;
use regex::{Captures, Regex};
use serde::Serialize;
use std::sync::OnceLock;
use time::OffsetDateTime;

pub const DISTRIBUTION_RAW_ROOT: &str = "cloudfronts/raw";
pub const OBJECT_ACCESS_RAW_ROOT: &str = "s3buckets/raw";
pub const AUDIT_RAW_ROOT: &str = "cloudtrail/raw";
pub const AUDIT_DIGEST_ROOT: &str = "cloudtrail/digest";
pub const UNRECOGNIZED_ROOT: &str = "unrecognized";

/// Closed set of key shapes, in matching priority order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum LogKind {
    /// `cloudfronts/<distribution>.<YYYY>-<MM>-<DD>-<HH>.<suffix>`
    DistributionLog,
    /// `s3buckets/<YYYY>-<MM>-<DD>-<HH>-<suffix>`
    ObjectAccessLog,
    /// `cloudtrail/AWSLogs/<account>/CloudTrail/<region>/<YYYY>/<MM>/<DD>/<file with YYYYMMDDTHH>`
    AuditPrimary,
    /// Same as the primary audit layout under a `CloudTrail-Digest` segment.
    AuditDigest,
    Unrecognized,
}

impl LogKind {
    pub const MATCH_ORDER: [LogKind; 4] =
        [LogKind::DistributionLog, LogKind::ObjectAccessLog, LogKind::AuditPrimary, LogKind::AuditDigest];

    fn pattern(self) -> Option<&'static Regex> {
        static DISTRIBUTION: OnceLock<Regex> = OnceLock::new();
        static OBJECT_ACCESS: OnceLock<Regex> = OnceLock::new();
        static AUDIT: OnceLock<Regex> = OnceLock::new();
        static AUDIT_DIGEST: OnceLock<Regex> = OnceLock::new();

        let (cell, src) = match self {
            LogKind::DistributionLog => (
                &DISTRIBUTION,
                r"^cloudfronts/(?P<dist>[^./]+)\.(?P<year>\d{4})-(?P<month>\d{2})-(?P<day>\d{2})-(?P<hour>\d{2})\.(?P<suffix>[^/]+)$",
            ),
            LogKind::ObjectAccessLog => (
                &OBJECT_ACCESS,
                r"^s3buckets/(?P<year>\d{4})-(?P<month>\d{2})-(?P<day>\d{2})-(?P<hour>\d{2})-(?P<suffix>[^/]+)$",
            ),
            LogKind::AuditPrimary => (
                &AUDIT,
                r"^cloudtrail/AWSLogs/(?P<account>[^/]+)/CloudTrail/(?P<region>[^/]+)/(?P<year>\d{4})/(?P<month>\d{2})/(?P<day>\d{2})/(?P<file>[^/]*\d{8}T(?P<hour>\d{2})[^/]*)$",
            ),
            LogKind::AuditDigest => (
                &AUDIT_DIGEST,
                r"^cloudtrail/AWSLogs/(?P<account>[^/]+)/CloudTrail-Digest/(?P<region>[^/]+)/(?P<year>\d{4})/(?P<month>\d{2})/(?P<day>\d{2})/(?P<file>[^/]*\d{8}T(?P<hour>\d{2})[^/]*)$",
            ),
            LogKind::Unrecognized => return None,
        };
        // Patterns are literals above; a compile failure is a programming error.
        Some(cell.get_or_init(|| Regex::new(src).expect("static key pattern")))
    }
}

/// Result of classifying one raw key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ClassifiedKey {
    pub kind: LogKind,
    pub partition: PartitionHour,
    pub filename: String,
    pub destination_key: String,
}

/// Classify `source_key`, trying each structural pattern in priority order.
///
/// Never fails: a key that matches nothing lands under `unrecognized/`, partitioned by
/// `now` (processing time) rather than anything in the key.
pub fn classify(source_key: &str, now: OffsetDateTime) -> ClassifiedKey {
    for kind in LogKind::MATCH_ORDER {
        if let Some(caps) = kind.pattern().and_then(|re| re.captures(source_key)) {
            let classified = build(kind, &caps);
            tracing::debug!(key = source_key, kind = ?kind, destination = %classified.destination_key, "classified key");
            return classified;
        }
    }
    let classified = unrecognized(source_key, now);
    tracing::info!(key = source_key, destination = %classified.destination_key, "unrecognized key, quarantining");
    classified
}

fn partition_of(caps: &Captures<'_>) -> PartitionHour {
    PartitionHour {
        year: caps["year"].to_string(),
        month: caps["month"].to_string(),
        day: caps["day"].to_string(),
        hour: caps["hour"].to_string(),
    }
}

fn build(kind: LogKind, caps: &Captures<'_>) -> ClassifiedKey {
    let partition = partition_of(caps);
    let (root, filename) = match kind {
        LogKind::DistributionLog => (
            DISTRIBUTION_RAW_ROOT,
            format!("{}.{}.{}", &caps["dist"], partition, &caps["suffix"]),
        ),
        LogKind::ObjectAccessLog => (OBJECT_ACCESS_RAW_ROOT, format!("{}-{}", partition, &caps["suffix"])),
        LogKind::AuditPrimary => (AUDIT_RAW_ROOT, caps["file"].to_string()),
        LogKind::AuditDigest => (AUDIT_DIGEST_ROOT, caps["file"].to_string()),
        LogKind::Unrecognized => unreachable!("unrecognized keys have no pattern"),
    };
    let destination_key = format!("{}/{}/{}", root, partition.hive_path(), filename);
    ClassifiedKey { kind, partition, filename, destination_key }
}

fn unrecognized(source_key: &str, now: OffsetDateTime) -> ClassifiedKey {
    let partition = PartitionHour::from_datetime(now);
    let filename = last_segment(source_key).to_string();
    let destination_key = format!("{}/{}_{}", UNRECOGNIZED_ROOT, partition, filename);
    ClassifiedKey { kind: LogKind::Unrecognized, partition, filename, destination_key }
}

#[inline]
fn last_segment(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}
