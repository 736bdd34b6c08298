use std::time::Duration;
use thiserror::Error;

/// Failure kinds that callers need to tell apart.
///
/// These travel inside `anyhow::Error`; recover them with `err.downcast_ref::<EtlError>()`.
#[derive(Debug, Error)]
pub enum EtlError {
    /// The query engine reported a FAILED or CANCELLED terminal state.
    #[error("query {execution_id} failed: {reason}")]
    QueryFailure { execution_id: String, reason: String },

    /// Polling gave up before the query reached a terminal state.
    #[error("query {execution_id} did not finish within {waited:?}")]
    QueryTimeout { execution_id: String, waited: Duration },

    #[error("storage error on s3://{bucket}/{key}: {message}")]
    Storage { bucket: String, key: String, message: String },

    #[error("catalog error on {database}.{table}: {message}")]
    Catalog { database: String, table: String, message: String },

    #[error("configuration error: {message}")]
    Config { message: String },
}

impl EtlError {
    pub fn storage(bucket: impl Into<String>, key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Storage { bucket: bucket.into(), key: key.into(), message: message.into() }
    }

    pub fn catalog(database: impl Into<String>, table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Catalog { database: database.into(), table: table.into(), message: message.into() }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    /// True for an engine-reported failure that only says the target partition or table
    /// is not there. Dropping something that is already gone counts as done.
    pub fn is_absent_target(&self) -> bool {
        match self {
            EtlError::QueryFailure { reason, .. } => {
                let r = reason.to_ascii_lowercase();
                r.contains("not found") || r.contains("does not exist")
            }
            _ => false,
        }
    }
}
