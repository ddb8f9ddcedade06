//! Logging utilities for formatted summary output.

use std::time::{Duration, Instant};

use crate::metrics::CollapseMetrics;

/// Formats a count with thousands separators (e.g. `1,234,567`).
#[must_use]
pub fn format_count(count: u64) -> String {
    let digits = count.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Formats a fraction as a percentage with the given decimal places.
#[must_use]
pub fn format_percent(value: f64, decimals: usize) -> String {
    format!("{:.decimals$}%", value * 100.0, decimals = decimals)
}

/// Formats a duration in human-readable form (e.g. `2m 15s`).
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        let mins = secs / 60;
        let rest = secs % 60;
        if rest == 0 { format!("{mins}m") } else { format!("{mins}m {rest}s") }
    } else {
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        if mins == 0 { format!("{hours}h") } else { format!("{hours}h {mins}m") }
    }
}

/// Logs a formatted summary of collapse metrics.
#[allow(clippy::cast_precision_loss)]
pub fn log_collapse_summary(metrics: &CollapseMetrics) {
    log::info!("Collapse Summary:");
    log::info!("  UMI groups: {}", format_count(metrics.groups));
    log::info!("  Input reads: {}", format_count(metrics.input_reads));
    log::info!("  Collapsed groups: {}", format_count(metrics.collapsed_groups));
    log::info!("  Collapsed reads: {}", format_count(metrics.collapsed_reads));
    log::info!("  Duplicate reads: {}", format_count(metrics.duplicate_reads));

    if metrics.groups > 0 {
        let rate = metrics.collapsed_groups as f64 / metrics.groups as f64;
        log::info!("  Collapse rate: {}", format_percent(rate, 2));
    }

    if metrics.ambiguous_groups > 0 {
        log::info!(
            "  Ambiguous groups: {} ({} reads passed through)",
            format_count(metrics.ambiguous_groups),
            format_count(metrics.lost_reads)
        );
    }
}

/// Operation timing and summary helper.
pub struct OperationTimer {
    operation: String,
    start_time: Instant,
}

impl OperationTimer {
    /// Creates a new operation timer and logs the start.
    #[must_use]
    pub fn new(operation: &str) -> Self {
        log::info!("{operation} ...");
        Self { operation: operation.to_string(), start_time: Instant::now() }
    }

    /// Logs completion with an item count.
    pub fn log_completion(&self, count: u64) {
        let duration = self.start_time.elapsed();
        log::info!(
            "{} completed: {} in {}",
            self.operation,
            format_count(count),
            format_duration(duration)
        );
    }
}
