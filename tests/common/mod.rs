#![allow(dead_code)]

use access_logs_etl::{
    Catalog, DeleteReport, Environment, ObjectPage, ObjectStore, QueryEngine, QueryState, QueryStatus, TableDeletion,
};
use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use time::macros::datetime;
use time::OffsetDateTime;

/// Deployment settings shared by the tests: database `test-database`, CTAS output in
/// `s3://test-bucket`, and a 1ms poll so runs finish quickly.
pub fn env() -> Environment {
    Environment::default()
        .with_database("test-database")
        .with_results_location("s3://test-bucket")
        .with_query_output_location("s3://query-results/athena/")
        .with_partitioned_storage("partitioned-bucket")
        .with_optimized_storage("optimized-bucket")
        .with_target_bucket("target-bucket")
        .with_poll_interval(Duration::from_millis(1))
        .with_query_timeout(Some(Duration::from_secs(5)))
}

/// A fixed trigger time, 2019-12-21 12:30 UTC.
pub fn at() -> OffsetDateTime {
    datetime!(2019-12-21 12:30 UTC)
}

/// Scripted query engine.
///
/// Every statement is recorded. A statement reports RUNNING for `running_polls` polls and
/// then settles: FAILED (or CANCELLED) if it contains a scripted substring, SUCCEEDED
/// otherwise. With `hang` set nothing ever settles.
#[derive(Default)]
pub struct FakeEngine {
    started: Mutex<Vec<String>>,
    polls: Mutex<HashMap<String, usize>>,
    rules: Mutex<Vec<(String, QueryState, String)>>,
    refuse: Mutex<Vec<String>>,
    running_polls: usize,
    hang: bool,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn running_polls(mut self, n: usize) -> Self {
        self.running_polls = n;
        self
    }

    pub fn hang(mut self) -> Self {
        self.hang = true;
        self
    }

    /// Statements containing `needle` end FAILED with `reason`.
    pub fn fail_on(self, needle: &str, reason: &str) -> Self {
        self.rules.lock().push((needle.to_string(), QueryState::Failed, reason.to_string()));
        self
    }

    /// Statements containing `needle` end CANCELLED without a reason.
    pub fn cancel_on(self, needle: &str) -> Self {
        self.rules.lock().push((needle.to_string(), QueryState::Cancelled, String::new()));
        self
    }

    /// Submitting a statement containing `needle` errors before any id is handed out.
    pub fn refuse_on(self, needle: &str) -> Self {
        self.refuse.lock().push(needle.to_string());
        self
    }

    pub fn statements(&self) -> Vec<String> {
        self.started.lock().clone()
    }

    pub fn statements_containing(&self, needle: &str) -> Vec<String> {
        self.statements().into_iter().filter(|s| s.contains(needle)).collect()
    }
}

impl QueryEngine for FakeEngine {
    fn start_query(&self, statement: &str, _output_location: &str) -> Result<String> {
        if self.refuse.lock().iter().any(|n| statement.contains(n.as_str())) {
            return Err(anyhow!("engine rejected submission"));
        }
        let mut started = self.started.lock();
        started.push(statement.to_string());
        Ok(format!("q-{}", started.len() - 1))
    }

    fn query_status(&self, execution_id: &str) -> Result<QueryStatus> {
        let idx: usize = execution_id
            .strip_prefix("q-")
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| anyhow!("unknown execution {execution_id}"))?;
        let statement = self.started.lock().get(idx).cloned().ok_or_else(|| anyhow!("unknown execution {execution_id}"))?;

        let polls = {
            let mut polls = self.polls.lock();
            let n = polls.entry(execution_id.to_string()).or_insert(0);
            *n += 1;
            *n
        };
        if self.hang || polls <= self.running_polls {
            return Ok(QueryStatus { state: QueryState::Running, reason: None });
        }
        let rules = self.rules.lock();
        if let Some((_, state, reason)) = rules.iter().find(|(needle, _, _)| statement.contains(needle.as_str())) {
            let reason = (!reason.is_empty()).then(|| reason.clone());
            return Ok(QueryStatus { state: *state, reason });
        }
        Ok(QueryStatus { state: QueryState::Succeeded, reason: None })
    }
}

/// In-memory table catalog.
#[derive(Default)]
pub struct FakeCatalog {
    tables: Mutex<BTreeSet<String>>,
    deleted: Mutex<Vec<String>>,
    broken: Mutex<BTreeSet<String>>,
    unlistable: bool,
    delete_delay: Duration,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl FakeCatalog {
    pub fn with_tables(names: &[&str]) -> Self {
        let c = Self::default();
        c.tables.lock().extend(names.iter().map(|s| s.to_string()));
        c
    }

    /// Deleting `name` errors.
    pub fn broken(self, name: &str) -> Self {
        self.broken.lock().insert(name.to_string());
        self
    }

    pub fn unlistable(mut self) -> Self {
        self.unlistable = true;
        self
    }

    /// Each delete takes `delay`, so concurrent deletes overlap.
    pub fn slow_deletes(mut self, delay: Duration) -> Self {
        self.delete_delay = delay;
        self
    }

    /// Most deletes that were ever running at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn add(&self, name: &str) {
        self.tables.lock().insert(name.to_string());
    }

    pub fn tables(&self) -> Vec<String> {
        self.tables.lock().iter().cloned().collect()
    }

    /// Every delete call, in order, including ones for missing tables.
    pub fn delete_calls(&self) -> Vec<String> {
        self.deleted.lock().clone()
    }
}

impl Catalog for FakeCatalog {
    fn list_tables(&self, _database: &str, pattern: &str) -> Result<Vec<String>> {
        if self.unlistable {
            return Err(anyhow!("access denied"));
        }
        let re = Regex::new(pattern)?;
        Ok(self.tables.lock().iter().filter(|t| re.is_match(t)).cloned().collect())
    }

    fn delete_table(&self, _database: &str, name: &str) -> Result<TableDeletion> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.delete_delay);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.deleted.lock().push(name.to_string());
        if self.broken.lock().contains(name) {
            return Err(anyhow!("internal service error"));
        }
        if self.tables.lock().remove(name) {
            Ok(TableDeletion::Deleted)
        } else {
            Ok(TableDeletion::NotFound)
        }
    }
}

/// Wraps a store and counts calls, so tests can assert on what was (not) asked of it.
pub struct CountingStore<S> {
    pub inner: Arc<S>,
    pub lists: AtomicUsize,
    pub batch_deletes: AtomicUsize,
    fail_copy: Mutex<BTreeSet<String>>,
}

impl<S: ObjectStore> CountingStore<S> {
    pub fn new(inner: Arc<S>) -> Self {
        Self { inner, lists: AtomicUsize::new(0), batch_deletes: AtomicUsize::new(0), fail_copy: Mutex::new(BTreeSet::new()) }
    }

    /// Copying the source key `key` errors.
    pub fn fail_copy_of(self, key: &str) -> Self {
        self.fail_copy.lock().insert(key.to_string());
        self
    }

    pub fn lists(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }

    pub fn batch_deletes(&self) -> usize {
        self.batch_deletes.load(Ordering::SeqCst)
    }
}

impl<S: ObjectStore> ObjectStore for CountingStore<S> {
    fn list_objects(&self, bucket: &str, prefix: &str, token: Option<&str>, max_keys: usize) -> Result<ObjectPage> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        self.inner.list_objects(bucket, prefix, token, max_keys)
    }

    fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<DeleteReport> {
        self.batch_deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete_objects(bucket, keys)
    }

    fn copy_object(&self, src_bucket: &str, src_key: &str, dst_bucket: &str, dst_key: &str) -> Result<()> {
        if self.fail_copy.lock().contains(src_key) {
            return Err(anyhow!("slow down"));
        }
        self.inner.copy_object(src_bucket, src_key, dst_bucket, dst_key)
    }

    fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.inner.delete_object(bucket, key)
    }
}
