use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use super::{Processing, ProgressSink};

/// Terminal progress bar for `--progress`.
pub struct TerminalProgress {
    bar: ProgressBar,
}

impl TerminalProgress {
    pub fn new(label: &str) -> Self {
        Self::with_bar(ProgressBar::new(1), label)
    }

    fn with_bar(bar: ProgressBar, label: &str) -> Self {
        if let Ok(style) = ProgressStyle::with_template(
            "{spinner:.cyan.bold} {msg:<10} [{bar:30.cyan/blue}] {percent:>3}% {elapsed_precise}",
        ) {
            bar.set_style(style.progress_chars("=>-"));
        }
        bar.set_message(label.to_string());
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar }
    }
}

impl ProgressSink for TerminalProgress {
    fn set_total(&mut self, total: u64) {
        self.bar.set_length(total.max(1));
    }

    fn set_completed(&mut self, completed: u64) -> Processing {
        self.bar.set_position(completed);
        Processing::Continue
    }
}

impl Drop for TerminalProgress {
    fn drop(&mut self) {
        self.bar.finish_and_clear();
    }
}
