use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use sentry_recorder::transcode::RecoveryReport;
use sentry_recorder::{QueueItem, RecoveryReporter};

const BAR_TEMPLATE: &str = "[{elapsed_precise}] {prefix:.bold}▕{bar:.blue}▏{pos}/{len} {wide_msg}";
const FINISH_TEMPLATE: &str = "[{elapsed_precise}] {msg}";
const STEADY_TICK_MS: u64 = 100;

/// Startup recovery progress on the terminal.
pub struct RecoveryBar {
    bar: ProgressBar,
}

impl RecoveryBar {
    pub fn new() -> Self {
        let bar = ProgressBar::hidden();
        bar.set_style(
            ProgressStyle::with_template(BAR_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▓▒░  "),
        );
        bar.set_prefix("Recovering");
        Self { bar }
    }
}

impl RecoveryReporter for RecoveryBar {
    fn on_recovery_start(&self, pending: usize) {
        if pending == 0 {
            return;
        }
        self.bar.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        self.bar.set_length(pending as u64);
        self.bar.enable_steady_tick(Duration::from_millis(STEADY_TICK_MS));
    }

    fn on_item_done(&self, item: &QueueItem, done: usize, _total: usize) {
        self.bar.set_position(done as u64);
        self.bar.set_message(item.filename.clone());
    }

    fn on_recovery_complete(&self, report: &RecoveryReport) {
        if report.pending == 0 {
            return;
        }
        self.bar.set_style(
            ProgressStyle::with_template(FINISH_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        self.bar.finish_with_message(format!(
            "Recovered {} of {} pending conversions ({} dropped, {} failed)",
            format!("{}", report.recovered).green(),
            report.pending,
            format!("{}", report.dropped).yellow(),
            format!("{}", report.failed).red(),
        ));
    }
}
