//! Progress reporting: one count-style bar per pipeline wave.

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// When set, wave bars are added here so several can render at once.
static GLOBAL_MP: OnceLock<Arc<MultiProgress>> = OnceLock::new();

/// Route every subsequently created wave bar through `mp`. Only the first call takes effect.
pub fn set_global_multiprogress(mp: Arc<MultiProgress>) {
    let _ = GLOBAL_MP.set(mp);
}

/// Settled-operations counter for one wave. Disabled instances do nothing.
pub struct WaveProgress {
    bar: Option<ProgressBar>,
}

impl WaveProgress {
    pub fn start(label: &str, operations: usize, enabled: bool) -> Self {
        if !enabled {
            return Self { bar: None };
        }
        let bar = ProgressBar::new(operations as u64);
        let bar = match GLOBAL_MP.get() {
            Some(mp) => mp.add(bar),
            None => bar,
        };
        if let Ok(style) = ProgressStyle::with_template("{spinner:.green} {msg:<24} {pos}/{len} [{bar:.cyan/blue}] {elapsed_precise}") {
            bar.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
        }
        bar.set_message(label.to_string());
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar: Some(bar) }
    }

    /// One operation settled, whatever its outcome.
    pub fn settled(&self) {
        if let Some(bar) = &self.bar {
            bar.inc(1);
        }
    }

    pub fn finish(self, failed: usize) {
        if let Some(bar) = self.bar {
            if failed == 0 {
                bar.finish();
            } else {
                bar.finish_with_message(format!("{} ({failed} failed)", bar.message()));
            }
        }
    }
}
