//! Relocation of newly arrived raw log objects into the partitioned layout.

use crate::classify::{classify, ClassifiedKey};
use crate::concurrency::{run_wave, Outcome};
use crate::storage::ObjectStore;
use crate::util::init_tracing_once;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use time::OffsetDateTime;

/// One "object created" notification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ArrivalNotification {
    pub bucket: String,
    pub key: String,
}

impl ArrivalNotification {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self { bucket: bucket.into(), key: key.into() }
    }
}

// Wire shape of an object-created event batch; only the fields we route on.
#[derive(Deserialize)]
struct EventBatch {
    #[serde(rename = "Records", default)]
    records: Vec<EventRecord>,
}

#[derive(Deserialize)]
struct EventRecord {
    s3: EventEntity,
}

#[derive(Deserialize)]
struct EventEntity {
    bucket: EventBucket,
    object: EventObject,
}

#[derive(Deserialize)]
struct EventBucket {
    name: String,
}

#[derive(Deserialize)]
struct EventObject {
    key: String,
}

/// Parse an event batch `{"Records":[{"s3":{"bucket":{"name":..},"object":{"key":..}}}]}`.
pub fn parse_notifications(json: &str) -> Result<Vec<ArrivalNotification>> {
    let batch: EventBatch = serde_json::from_str(json).context("parse object-created event batch")?;
    Ok(batch
        .records
        .into_iter()
        .map(|r| ArrivalNotification { bucket: r.s3.bucket.name, key: r.s3.object.key })
        .collect())
}

pub fn load_notifications(path: &Path) -> Result<Vec<ArrivalNotification>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    parse_notifications(&raw)
}

/// What happened to one arrived object.
#[derive(Clone, Debug, Serialize)]
pub struct Relocation {
    pub source_bucket: String,
    pub source_key: String,
    pub classified: ClassifiedKey,
    pub outcome: Outcome,
}

/// Moves arrived objects (copy, then delete the source) to their classified destination.
#[derive(Clone)]
pub struct Relocator {
    store: Arc<dyn ObjectStore>,
    target_bucket: String,
    concurrency: usize,
}

impl Relocator {
    pub fn new(store: Arc<dyn ObjectStore>, target_bucket: impl Into<String>) -> Self {
        Self { store, target_bucket: target_bucket.into(), concurrency: 0 }
    }

    /// Max moves in flight; `0` moves the whole batch at once.
    pub fn concurrency(mut self, n: usize) -> Self {
        self.concurrency = n;
        self
    }

    /// Relocate every notified object. `now` partitions keys that match no known layout.
    pub fn relocate(&self, batch: &[ArrivalNotification], now: OffsetDateTime) -> Vec<Relocation> {
        init_tracing_once();
        let classified: Vec<(&ArrivalNotification, ClassifiedKey)> =
            batch.iter().map(|n| (n, classify(&n.key, now))).collect();

        let outcomes = run_wave(&classified, self.concurrency, |(n, c)| match self.move_one(n, c) {
            Ok(()) => Outcome::Succeeded,
            Err(e) => {
                tracing::warn!(bucket = %n.bucket, key = %n.key, error = %format!("{e:#}"), "relocation failed");
                Outcome::Failed(format!("{e:#}"))
            }
        });

        classified
            .into_iter()
            .zip(outcomes)
            .map(|((n, c), outcome)| Relocation {
                source_bucket: n.bucket.clone(),
                source_key: n.key.clone(),
                classified: c,
                outcome,
            })
            .collect()
    }

    /// The source is deleted only after the copy has been confirmed.
    fn move_one(&self, n: &ArrivalNotification, c: &ClassifiedKey) -> Result<()> {
        tracing::info!(bucket = %n.bucket, key = %n.key, "Handling arrival");
        self.store
            .copy_object(&n.bucket, &n.key, &self.target_bucket, &c.destination_key)
            .with_context(|| format!("copy s3://{}/{} to s3://{}/{}", n.bucket, n.key, self.target_bucket, c.destination_key))?;
        tracing::info!(key = %n.key, destination = %c.destination_key, "Copied");

        self.store
            .delete_object(&n.bucket, &n.key)
            .with_context(|| format!("delete s3://{}/{}", n.bucket, n.key))?;
        tracing::info!(key = %n.key, "Deleted source");
        Ok(())
    }
}
