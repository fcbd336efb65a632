//! Terminal rendering of ticks and end-of-run reports.

use console::Term;

use crate::diff::DiffReport;
use crate::format::{format_bytes, format_duration};
use crate::stats::SessionStats;
use crate::sync::{ProgressReporter, StopReason};

const SEPARATOR: &str = "────────────────────────────────────────────────────────────";

/// Redraws the screen with every human-readable tick, or prints one JSON
/// line per tick in daemon mode.
pub struct TerminalProgress {
    term: Term,
    daemon: bool,
}

impl TerminalProgress {
    #[must_use]
    pub fn new(daemon: bool) -> Self {
        Self {
            term: Term::stdout(),
            daemon,
        }
    }
}

impl ProgressReporter for TerminalProgress {
    fn on_tick(&self, report: &str) {
        if self.daemon {
            let _ = self.term.write_line(report);
            return;
        }
        if self.term.is_term() {
            let _ = self.term.clear_screen();
        }
        let _ = self.term.write_str(report);
    }

    fn on_stop(&self, reason: StopReason) {
        let message = match reason {
            StopReason::Graceful => "Stopping: waiting for running transfers to finish...",
            StopReason::IdleTimeout => "Stopping: no data received within the idle timeout.",
        };
        log::warn!("{message}");
        let _ = Term::stderr().write_line(message);
    }
}

/// Prints a summary of the run.
pub fn print_summary(stats: &SessionStats) {
    println!("\n{SEPARATOR}");
    println!("Sync Summary");
    println!("{SEPARATOR}");
    println!("  Files downloaded:  {}", stats.files_downloaded);
    println!("  Files dispatched:  {}", stats.files_dispatched);
    println!("  Total size:        {}", format_bytes(stats.total_bytes));
    println!("  Total time:        {}", format_duration(stats.elapsed));
    println!(
        "  Average speed:     {}/s",
        format_bytes(stats.average_speed())
    );
    if stats.stopped {
        println!("  Stopped early; rerun to resume.");
    }
    println!("{SEPARATOR}");
}

/// Prints the outcome of an analysis or repair pass.
pub fn print_diff_report(report: &DiffReport) {
    println!("\n{SEPARATOR}");
    println!("Tree Comparison");
    println!("{SEPARATOR}");

    for path in &report.missing_in_remote {
        println!("  missing remotely:  {path}");
    }
    for mismatch in &report.size_mismatches {
        println!(
            "  size mismatch:     {} (local {} vs remote {})",
            mismatch.path,
            format_bytes(mismatch.local_size),
            format_bytes(mismatch.remote_size)
        );
    }
    for path in &report.removed {
        println!("  removed:           {path}");
    }

    println!("{SEPARATOR}");
    println!(
        "  {} of {} checked file(s) match",
        report.matched_count, report.checked_count
    );
    if report.is_clean() {
        println!("  Local tree is consistent with the remote.");
    }
    println!("{SEPARATOR}");
}
