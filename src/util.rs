use anyhow::{Context, Result};
use std::fs;
use std::io;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

static INIT_ONCE: std::sync::Once = std::sync::Once::new();
pub fn init_tracing_once() {
    INIT_ONCE.call_once(|| {
        let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
        let _ = tracing_subscriber::fmt().with_env_filter(env_filter).try_init();
    });
}

// -------- local object I/O with backoff --------

/// Transient errors worth another attempt: sharing and lock violations on Windows
/// (5, 32, 33, 1224), device-not-ready (21), and interrupted calls.
fn is_retriable_io_error(e: &io::Error) -> bool {
    match e.raw_os_error() {
        Some(5) | Some(32) | Some(33) | Some(1224) | Some(21) => true,
        _ => e.kind() == io::ErrorKind::Interrupted,
    }
}

/// Run `op` up to `tries` times, sleeping `delay_ms * attempt` between transient failures.
/// `accept` turns an error into success (e.g. NotFound on delete).
fn with_backoff<F>(what: &str, tries: usize, delay_ms: u64, accept: fn(&io::Error) -> bool, mut op: F) -> Result<()>
where
    F: FnMut() -> io::Result<()>,
{
    let mut last_err: Option<io::Error> = None;
    for attempt in 1..=tries.max(1) {
        match op() {
            Ok(()) => return Ok(()),
            Err(e) if accept(&e) => return Ok(()),
            Err(e) if is_retriable_io_error(&e) => {
                tracing::debug!(what, attempt, error = %e, "transient I/O error, retrying");
                last_err = Some(e);
                sleep(Duration::from_millis(delay_ms.saturating_mul(attempt as u64)));
            }
            Err(e) => return Err(e).with_context(|| what.to_string()),
        }
    }
    Err(last_err.unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "retries exhausted")))
        .with_context(|| format!("{what} (after {tries} attempts)"))
}

/// Remove an object file. A file that is already gone counts as removed.
pub fn remove_with_backoff(path: &Path, tries: usize, delay_ms: u64) -> Result<()> {
    with_backoff(&format!("remove {}", path.display()), tries, delay_ms, |e| e.kind() == io::ErrorKind::NotFound, || {
        fs::remove_file(path)
    })
}

/// Copy an object file over any existing destination.
pub fn copy_with_backoff(src: &Path, dest: &Path, tries: usize, delay_ms: u64) -> Result<()> {
    with_backoff(&format!("copy {} -> {}", src.display(), dest.display()), tries, delay_ms, |_| false, || {
        fs::copy(src, dest).map(|_| ())
    })
}
