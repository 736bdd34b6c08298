//! Wave execution: run one operation per item concurrently, wait for all of them, and
//! keep every outcome. A failure never cancels its siblings.

use rayon::prelude::*;
use serde::Serialize;

/// How one operation in a wave settled.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum Outcome {
    Succeeded,
    /// Nothing to act on (e.g. dropping a partition that was never created). Counts as done.
    Absent,
    Failed(String),
}

impl Outcome {
    pub fn is_ok(&self) -> bool {
        !matches!(self, Outcome::Failed(_))
    }
}

/// Run `op` over `items` with at most `limit` in flight (`0` = one thread per item) and
/// return the outcomes in input order once every operation has settled.
///
/// Operations mostly block on remote calls, so the wave gets its own pool sized to the
/// work instead of sharing the CPU-sized global one.
pub fn run_wave<T, F>(items: &[T], limit: usize, op: F) -> Vec<Outcome>
where
    T: Sync,
    F: Sync + Fn(&T) -> Outcome,
{
    if items.is_empty() {
        return Vec::new();
    }
    if limit == 1 || items.len() == 1 {
        return items.iter().map(&op).collect();
    }
    let width = if limit == 0 { items.len() } else { limit.min(items.len()) };
    match rayon::ThreadPoolBuilder::new()
        .num_threads(width)
        .thread_name(|i| format!("wave-{i}"))
        .build()
    {
        Ok(pool) => pool.install(|| items.par_iter().map(&op).collect()),
        Err(e) => {
            tracing::warn!(error = %e, "could not build wave pool, using the global pool");
            items.par_iter().map(&op).collect()
        }
    }
}
