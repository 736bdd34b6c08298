//! Query execution: submit a statement to the managed query engine and block until it
//! reaches a terminal state.

use crate::error::EtlError;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl QueryState {
    pub fn is_terminal(self) -> bool {
        matches!(self, QueryState::Succeeded | QueryState::Failed | QueryState::Cancelled)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryStatus {
    pub state: QueryState,
    /// Engine-provided explanation for the last state change, if any.
    pub reason: Option<String>,
}

/// The managed query engine boundary.
pub trait QueryEngine: Send + Sync {
    /// Submit a statement; output files go under `output_location`. Returns an execution id.
    fn start_query(&self, statement: &str, output_location: &str) -> Result<String>;

    fn query_status(&self, execution_id: &str) -> Result<QueryStatus>;
}

/// Runs statements one at a time to completion. Cheap to clone and share across a wave.
#[derive(Clone)]
pub struct QueryRunner {
    engine: Arc<dyn QueryEngine>,
    output_location: String,
    poll_interval: Duration,
    timeout: Option<Duration>,
}

impl QueryRunner {
    pub fn new(engine: Arc<dyn QueryEngine>, output_location: impl Into<String>) -> Self {
        Self {
            engine,
            output_location: output_location.into(),
            poll_interval: Duration::from_millis(500),
            timeout: None,
        }
    }

    pub fn poll_interval(mut self, every: Duration) -> Self {
        self.poll_interval = every;
        self
    }

    /// Upper bound on how long one statement may take. `None` waits indefinitely.
    pub fn timeout(mut self, limit: Option<Duration>) -> Self {
        self.timeout = limit;
        self
    }

    /// Submit `statement` and poll until it settles.
    ///
    /// FAILED and CANCELLED become `EtlError::QueryFailure`; exceeding the timeout becomes
    /// `EtlError::QueryTimeout`. Errors talking to the engine itself propagate as-is.
    pub fn run_and_wait(&self, statement: &str) -> Result<String> {
        let execution_id = self
            .engine
            .start_query(statement, &self.output_location)
            .context("submit statement to query engine")?;
        tracing::info!(execution_id = %execution_id, statement = statement.trim(), "Executing statement");

        let started = Instant::now();
        loop {
            let status = self
                .engine
                .query_status(&execution_id)
                .with_context(|| format!("poll query {execution_id}"))?;
            match status.state {
                QueryState::Failed | QueryState::Cancelled => {
                    let reason = status.reason.unwrap_or_else(|| format!("{:?}", status.state));
                    return Err(EtlError::QueryFailure { execution_id, reason }.into());
                }
                state if state.is_terminal() => {
                    tracing::info!(execution_id = %execution_id, elapsed_ms = started.elapsed().as_millis() as u64, "End of statement");
                    return Ok(execution_id);
                }
                _ => {}
            }
            if let Some(limit) = self.timeout {
                let waited = started.elapsed();
                if waited >= limit {
                    tracing::warn!(execution_id = %execution_id, ?waited, "statement exceeded timeout");
                    return Err(EtlError::QueryTimeout { execution_id, waited }.into());
                }
            }
            std::thread::sleep(self.poll_interval);
        }
    }
}
