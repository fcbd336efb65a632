//! Formatting helpers for human-readable sizes, durations and progress lines.

use std::fmt::Write;
use std::time::Duration;

/// Width of the text progress bars.
pub const BAR_WIDTH: usize = 40;

/// Formats a byte count as a human-readable string (B, KB, MB, GB).
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// Formats a duration as a human-readable string (e.g. "5.0s", "1m 05s", "1h 01m 05s").
#[must_use]
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 3600 {
        format!(
            "{}h {:02}m {:02}s",
            secs / 3600,
            (secs % 3600) / 60,
            secs % 60
        )
    } else if secs >= 60 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{}.{:01}s", secs, d.subsec_millis() / 100)
    }
}

/// Bytes per second given the bytes received during `interval`.
///
/// A zero-length interval is treated as one second.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
#[must_use]
pub fn rate(delta: u64, interval: Duration) -> u64 {
    let secs = interval.as_secs_f64();
    if secs > 0.0 {
        (delta as f64 / secs) as u64
    } else {
        delta
    }
}

/// Time left for `remaining` bytes at `bytes_per_sec`, rounded up to whole
/// seconds. `None` when nothing is flowing.
#[must_use]
pub fn eta(remaining: u64, bytes_per_sec: u64) -> Option<Duration> {
    if bytes_per_sec == 0 {
        return None;
    }
    Some(Duration::from_secs(remaining.div_ceil(bytes_per_sec)))
}

/// Formats an ETA, `unknown` when undefined.
#[must_use]
pub fn format_eta(eta: Option<Duration>) -> String {
    eta.map_or_else(|| "unknown".to_string(), format_duration)
}

/// Fraction of `total` covered by `done`, in `0.0..=1.0`. An empty total counts as done.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn fraction(done: u64, total: u64) -> f64 {
    if total == 0 {
        1.0
    } else {
        (done as f64 / total as f64).min(1.0)
    }
}

/// Renders `[XXXX    ] (12.50% at 1.00 KB/s, ETA: 5.0s)`.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
#[must_use]
pub fn progress_line(done: u64, total: u64, bytes_per_sec: u64) -> String {
    let frac = fraction(done, total);
    let pieces = ((BAR_WIDTH as f64) * frac).floor() as usize;
    let mut line = String::with_capacity(BAR_WIDTH + 48);
    line.push('[');
    line.push_str(&"X".repeat(pieces));
    line.push_str(&" ".repeat(BAR_WIDTH - pieces));
    line.push(']');
    let _ = write!(
        line,
        " ({:.2}% at {}/s, ETA: {})",
        frac * 100.0,
        format_bytes(bytes_per_sec),
        format_eta(eta(total.saturating_sub(done), bytes_per_sec))
    );
    line
}

/// Shortens `s` to at most `max` characters, keeping the tail.
///
/// The cut is marked with `...` when `max` leaves room for it.
#[must_use]
pub fn truncate_left(s: &str, max: usize) -> String {
    let count = s.chars().count();
    if count <= max {
        return s.to_string();
    }
    if max <= 3 {
        return s.chars().skip(count - max).collect();
    }
    let tail: String = s.chars().skip(count - (max - 3)).collect();
    format!("...{tail}")
}
