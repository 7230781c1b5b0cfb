//! Progress bar over the tile grid

use indicatif::{ProgressBar, ProgressStyle};

/// Shared progress bar; safe to advance from worker threads
pub struct ProgressTracker {
    bar: ProgressBar,
}

impl ProgressTracker {
    /// # Arguments
    /// * `total` - Number of steps
    /// * `description` - Message shown next to the bar
    /// * `hidden` - Draw nothing, e.g. for `--quiet` or tests
    pub fn new(total: u64, description: &str, hidden: bool) -> Self {
        let bar = if hidden {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(total)
        };
        bar.set_length(total);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
        {
            bar.set_style(style.progress_chars("#>-"));
        }
        bar.set_message(description.to_string());

        ProgressTracker { bar }
    }

    pub fn increment(&self, amount: u64) {
        self.bar.inc(amount);
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    pub fn finish(&self) {
        self.bar.finish_with_message("Completed");
    }

    pub fn set_message(&self, msg: &str) {
        self.bar.set_message(msg.to_string());
    }
}
