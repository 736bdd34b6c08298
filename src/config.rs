use crate::error::EtlError;
use ahash::AHashSet;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Log family a stream carries. Selects the aggregation template.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamKind {
    #[serde(rename = "cloudfront")]
    CloudFront,
    #[serde(rename = "s3access")]
    S3Access,
    #[serde(rename = "cloudtrail")]
    CloudTrail,
    #[serde(rename = "cloudtrail-digest")]
    CloudTrailDigest,
}

impl StreamKind {
    /// Digest files are integrity proofs, not queryable events.
    pub fn has_aggregation(self) -> bool {
        !matches!(self, StreamKind::CloudTrailDigest)
    }
}

/// Stream definition as written in configuration. Optional fields decide which
/// pipeline steps the stream takes part in.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamDef {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: StreamKind,
    #[serde(default, alias = "source")]
    pub source_table: Option<String>,
    #[serde(default, alias = "target")]
    pub target_table: Option<String>,
    #[serde(default, alias = "path")]
    pub target_path: Option<String>,
    #[serde(default)]
    pub aggregation_path: Option<String>,
}

/// What a stream supports, decided once when configuration is loaded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub partition_create: bool,
    pub transform: bool,
    pub aggregate: bool,
}

/// A validated stream with its capability flags.
#[derive(Clone, Debug, Serialize)]
pub struct StreamConfig {
    pub name: String,
    pub kind: StreamKind,
    pub source_table: Option<String>,
    pub target_table: Option<String>,
    pub target_path: Option<String>,
    pub aggregation_path: Option<String>,
    pub capabilities: Capabilities,
}

impl StreamConfig {
    pub fn from_def(def: StreamDef) -> Self {
        let capabilities = Capabilities {
            partition_create: def.source_table.is_some(),
            transform: def.source_table.is_some() && def.target_table.is_some() && def.target_path.is_some(),
            aggregate: def.aggregation_path.is_some() && def.target_table.is_some() && def.kind.has_aggregation(),
        };
        Self {
            name: def.name,
            kind: def.kind,
            source_table: def.source_table,
            target_table: def.target_table,
            target_path: def.target_path,
            aggregation_path: def.aggregation_path,
            capabilities,
        }
    }

    /// Table holding the per-hour aggregates for this stream.
    pub fn aggregated_table(&self) -> String {
        format!("{}_aggregated", self.name)
    }
}

/// Build validated stream configs from raw definitions. Names must be unique: plan
/// entries are correlated back to their stream by name. Target tables must be unique too,
/// since transform intermediates are named after the target.
pub fn build_streams(defs: Vec<StreamDef>) -> Result<Vec<StreamConfig>> {
    let mut seen = AHashSet::with_capacity(defs.len());
    let mut targets = AHashSet::with_capacity(defs.len());
    for def in &defs {
        if def.name.trim().is_empty() {
            return Err(EtlError::config("stream name must not be empty").into());
        }
        if !seen.insert(def.name.clone()) {
            return Err(EtlError::config(format!("duplicate stream name '{}'", def.name)).into());
        }
        if let Some(target) = &def.target_table {
            if !targets.insert(target.clone()) {
                return Err(EtlError::config(format!(
                    "stream '{}' reuses target table '{target}'",
                    def.name
                ))
                .into());
            }
        }
    }
    Ok(defs.into_iter().map(StreamConfig::from_def).collect())
}

/// Parse a JSON array of stream definitions.
pub fn parse_streams(json: &str) -> Result<Vec<StreamConfig>> {
    let defs: Vec<StreamDef> = serde_json::from_str(json).context("parse stream definitions")?;
    build_streams(defs)
}

pub fn load_streams(path: &Path) -> Result<Vec<StreamConfig>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    parse_streams(&raw).with_context(|| format!("load streams from {}", path.display()))
}

/// The stream set shipped with the service.
pub fn default_streams() -> Vec<StreamConfig> {
    let def = |name: &str, kind, source: Option<&str>, target: Option<&str>, path: Option<&str>, agg: Option<&str>| StreamDef {
        name: name.to_string(),
        kind,
        source_table: source.map(str::to_string),
        target_table: target.map(str::to_string),
        target_path: path.map(str::to_string),
        aggregation_path: agg.map(str::to_string),
    };
    let defs = vec![
        def("cloudfront", StreamKind::CloudFront, Some("cloudfront_raw"), Some("cloudfront_search"),
            Some("/cloudfront/search"), Some("/cloudfront/aggregated")),
        def("s3buckets", StreamKind::S3Access, Some("s3buckets_raw"), Some("s3buckets_search"),
            Some("/s3buckets/search"), Some("/s3buckets/aggregated")),
        def("cloudtrail", StreamKind::CloudTrail, Some("cloudtrail_raw"), Some("cloudtrail_search"),
            Some("/cloudtrail/trail"), Some("/cloudtrail/aggregated")),
        def("cloudtrail-digest", StreamKind::CloudTrailDigest, None, None, None, None),
    ];
    defs.into_iter().map(StreamConfig::from_def).collect()
}

/// `s3://bucket/key/prefix` split into its parts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct S3Location {
    pub bucket: String,
    pub prefix: String,
}

impl S3Location {
    pub fn parse(url: &str) -> Result<Self> {
        let rest = url
            .strip_prefix("s3://")
            .ok_or_else(|| EtlError::config(format!("expected s3:// location, got '{url}'")))?;
        let (bucket, prefix) = match rest.split_once('/') {
            Some((b, p)) => (b, p),
            None => (rest, ""),
        };
        if bucket.is_empty() {
            return Err(EtlError::config(format!("missing bucket in '{url}'")).into());
        }
        Ok(Self { bucket: bucket.to_string(), prefix: prefix.to_string() })
    }
}

/// Deployment-level locations and tuning, with builder chaining.
#[derive(Clone, Debug)]
pub struct Environment {
    pub database: String,
    pub results_location: String,       // CTAS root, "s3://bucket" without trailing slash
    pub query_output_location: String,  // where the engine writes statement output
    pub partitioned_storage: String,    // bucket with relocated raw logs
    pub optimized_storage: String,      // bucket with transformed data
    pub target_bucket: String,          // relocation destination bucket
    pub streams_config: Option<PathBuf>,
    pub poll_interval: Duration,
    pub query_timeout: Option<Duration>, // None polls until a terminal state
    pub retention_days: i64,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            database: "default".to_string(),
            results_location: String::new(),
            query_output_location: String::new(),
            partitioned_storage: String::new(),
            optimized_storage: String::new(),
            target_bucket: String::new(),
            streams_config: None,
            poll_interval: Duration::from_millis(500),
            query_timeout: Some(Duration::from_secs(900)),
            retention_days: 90,
        }
    }
}

impl Environment {
    /// Read the deployment variables. Tuning knobs fall back to defaults when unset.
    pub fn from_env() -> Result<Self> {
        let required = |name: &str| -> Result<String> {
            std::env::var(name).with_context(|| format!("environment variable {name} is not set"))
        };
        let optional = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

        let mut env = Self::default()
            .with_database(required("DATABASE")?)
            .with_results_location(required("ATHENA_RESULTS_LOCATION")?)
            .with_query_output_location(required("ATHENA_QUERY_RESULTS_LOCATION")?);

        if let Some(v) = optional("PARTITIONED_STORAGE") { env.partitioned_storage = v; }
        if let Some(v) = optional("OPTIMIZED_STORAGE") { env.optimized_storage = v; }
        if let Some(v) = optional("TARGET_BUCKET") { env.target_bucket = v; }
        if let Some(v) = optional("STREAMS_CONFIG") { env.streams_config = Some(PathBuf::from(v)); }
        if let Some(v) = optional("QUERY_POLL_MS") {
            let ms: u64 = v.parse().with_context(|| format!("QUERY_POLL_MS='{v}'"))?;
            env = env.with_poll_interval(Duration::from_millis(ms));
        }
        if let Some(v) = optional("QUERY_TIMEOUT_SECS") {
            let secs: u64 = v.parse().with_context(|| format!("QUERY_TIMEOUT_SECS='{v}'"))?;
            env = env.with_query_timeout((secs > 0).then(|| Duration::from_secs(secs)));
        }
        if let Some(v) = optional("RETENTION_DAYS") {
            let days: i64 = v.parse().with_context(|| format!("RETENTION_DAYS='{v}'"))?;
            if days < 0 {
                return Err(EtlError::config(format!("RETENTION_DAYS must not be negative, got {days}")).into());
            }
            env = env.with_retention_days(days);
        }
        Ok(env)
    }

    pub fn with_database(mut self, db: impl Into<String>) -> Self {
        self.database = db.into();
        self
    }
    pub fn with_results_location(mut self, loc: impl Into<String>) -> Self {
        self.results_location = loc.into().trim_end_matches('/').to_string();
        self
    }
    pub fn with_query_output_location(mut self, loc: impl Into<String>) -> Self {
        self.query_output_location = loc.into();
        self
    }
    pub fn with_partitioned_storage(mut self, bucket: impl Into<String>) -> Self {
        self.partitioned_storage = bucket.into();
        self
    }
    pub fn with_optimized_storage(mut self, bucket: impl Into<String>) -> Self {
        self.optimized_storage = bucket.into();
        self
    }
    pub fn with_target_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.target_bucket = bucket.into();
        self
    }
    pub fn with_poll_interval(mut self, every: Duration) -> Self {
        self.poll_interval = every.max(Duration::from_millis(1));
        self
    }
    pub fn with_query_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.query_timeout = timeout;
        self
    }
    pub fn with_retention_days(mut self, days: i64) -> Self {
        self.retention_days = days.max(0);
        self
    }

    /// Configured streams: `STREAMS_CONFIG` if set, otherwise the shipped defaults.
    pub fn streams(&self) -> Result<Vec<StreamConfig>> {
        match &self.streams_config {
            Some(p) => load_streams(p),
            None => Ok(default_streams()),
        }
    }

    /// Where CTAS output goes, as bucket and key prefix.
    pub fn results_root(&self) -> Result<S3Location> {
        S3Location::parse(&self.results_location)
    }

    /// Bucket that receives CTAS output.
    pub fn results_bucket(&self) -> Result<String> {
        Ok(self.results_root()?.bucket)
    }
}
