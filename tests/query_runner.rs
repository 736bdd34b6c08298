#[path = "common/mod.rs"]
mod common;

use access_logs_etl::{EtlError, QueryRunner};
use common::*;
use std::sync::Arc;
use std::time::Duration;

fn runner(engine: &Arc<FakeEngine>) -> QueryRunner {
    QueryRunner::new(engine.clone(), "s3://query-results/athena/").poll_interval(Duration::from_millis(1))
}

/// A statement that stays RUNNING for a few polls still returns its execution id once it succeeds.
#[test]
fn waits_through_running_states() {
    let engine = Arc::new(FakeEngine::new().running_polls(3));
    let id = runner(&engine).run_and_wait("SELECT 1").unwrap();
    assert_eq!(id, "q-0");
    assert_eq!(engine.statements(), vec!["SELECT 1".to_string()]);
}

/// FAILED carries the engine's reason in a typed error.
#[test]
fn failure_reason_is_surfaced() {
    let engine = Arc::new(FakeEngine::new().running_polls(1).fail_on("broken_table", "Table not found: broken_table"));
    let err = runner(&engine).run_and_wait("SELECT * FROM broken_table").unwrap_err();
    match err.downcast_ref::<EtlError>() {
        Some(EtlError::QueryFailure { execution_id, reason }) => {
            assert_eq!(execution_id, "q-0");
            assert_eq!(reason, "Table not found: broken_table");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.downcast_ref::<EtlError>().unwrap().is_absent_target());
}

/// CANCELLED is a failure too; without an engine reason the state name stands in.
#[test]
fn cancelled_is_a_failure() {
    let engine = Arc::new(FakeEngine::new().cancel_on("slow"));
    let err = runner(&engine).run_and_wait("SELECT slow").unwrap_err();
    let etl = err.downcast_ref::<EtlError>().unwrap();
    assert!(matches!(etl, EtlError::QueryFailure { reason, .. } if reason == "Cancelled"));
    assert!(!etl.is_absent_target());
}

/// A statement that never settles gives up after the timeout; without one it would poll forever.
#[test]
fn timeout_bounds_polling() {
    let engine = Arc::new(FakeEngine::new().hang());
    let err = runner(&engine)
        .timeout(Some(Duration::from_millis(20)))
        .run_and_wait("SELECT forever")
        .unwrap_err();
    match err.downcast_ref::<EtlError>() {
        Some(EtlError::QueryTimeout { execution_id, waited }) => {
            assert_eq!(execution_id, "q-0");
            assert!(*waited >= Duration::from_millis(20));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

/// Submission errors propagate with context and never produce an execution id.
#[test]
fn submission_errors_propagate() {
    let engine = Arc::new(FakeEngine::new().refuse_on("DROP"));
    let err = runner(&engine).run_and_wait("DROP TABLE x").unwrap_err();
    assert!(format!("{err:#}").contains("engine rejected submission"));
    assert!(err.downcast_ref::<EtlError>().is_none());
    assert!(engine.statements().is_empty());
}
