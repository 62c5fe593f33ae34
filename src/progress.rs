//! Progress Tracker (C15): per-document status lines and periodic
//! throughput summaries for an unattended dispatcher run.
//!
//! No TTY progress bar — the pipeline normally runs headless (a cron job or
//! a queue consumer), so `tracing` events are the only progress surface:
//! one `info!` line per completed document in the `[i/N] <status>: <id>`
//! shape, plus an aggregate summary emitted at most once per
//! `summary_interval`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::info;

use crate::models::LogStatus;

const DEFAULT_SUMMARY_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressCounts {
    pub completed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Per-stage figures recovered from a completed document's processing-log
/// `metrics` JSON, used only to accumulate the pages/hour and MB/hour
/// figures in the periodic summary (§7's "user-visible behavior").
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentMetrics {
    pub page_count: u64,
    pub byte_size: u64,
}

impl DocumentMetrics {
    pub fn from_json(metrics: &serde_json::Value) -> Self {
        Self {
            page_count: metrics.get("page_count").and_then(|v| v.as_u64()).unwrap_or(0),
            byte_size: metrics.get("byte_size").and_then(|v| v.as_u64()).unwrap_or(0),
        }
    }
}

pub struct ProgressTracker {
    total: usize,
    counts: ProgressCounts,
    started_at: Instant,
    last_summary_at: Instant,
    summary_interval: Duration,
    in_flight: HashMap<String, String>,
    total_pages: u64,
    total_bytes: u64,
}

impl ProgressTracker {
    pub fn new(total: usize) -> Self {
        Self::with_summary_interval(total, DEFAULT_SUMMARY_INTERVAL)
    }

    pub fn with_summary_interval(total: usize, summary_interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            total,
            counts: ProgressCounts::default(),
            started_at: now,
            last_summary_at: now,
            summary_interval,
            in_flight: HashMap::new(),
            total_pages: 0,
            total_bytes: 0,
        }
    }

    pub fn mark_in_flight(&mut self, worker_label: &str, document_id: &str) {
        self.in_flight.insert(worker_label.to_string(), document_id.to_string());
    }

    /// Records one document's terminal outcome and emits its `[i/N]` line.
    /// `metrics` accumulates into the pages/hour and MB/hour figures the
    /// periodic summary reports; phantom/crash completions that never got
    /// a real metrics payload pass `DocumentMetrics::default()`.
    pub fn record(&mut self, worker_label: &str, document_id: &str, status: LogStatus, metrics: DocumentMetrics) {
        self.in_flight.remove(worker_label);
        self.counts.completed += 1;
        self.total_pages += metrics.page_count;
        self.total_bytes += metrics.byte_size;
        match status {
            LogStatus::Success => self.counts.succeeded += 1,
            LogStatus::Failure => self.counts.failed += 1,
            LogStatus::Skipped => self.counts.skipped += 1,
        }
        info!(
            "[{}/{}] {}: {document_id}",
            self.counts.completed,
            self.total,
            status.as_str(),
        );
    }

    fn elapsed_hours(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64() / 3600.0
    }

    pub fn pages_per_hour(&self) -> f64 {
        let hours = self.elapsed_hours();
        if hours <= 0.0 {
            0.0
        } else {
            self.total_pages as f64 / hours
        }
    }

    pub fn mb_per_hour(&self) -> f64 {
        let hours = self.elapsed_hours();
        if hours <= 0.0 {
            0.0
        } else {
            (self.total_bytes as f64 / (1024.0 * 1024.0)) / hours
        }
    }

    pub fn counts(&self) -> ProgressCounts {
        self.counts
    }

    pub fn throughput_per_minute(&self) -> f64 {
        let elapsed_minutes = self.started_at.elapsed().as_secs_f64() / 60.0;
        if elapsed_minutes <= 0.0 {
            0.0
        } else {
            self.counts.completed as f64 / elapsed_minutes
        }
    }

    pub fn eta(&self) -> Option<Duration> {
        if self.counts.completed == 0 || self.counts.completed >= self.total {
            return None;
        }
        let elapsed = self.started_at.elapsed().as_secs_f64();
        let per_doc = elapsed / self.counts.completed as f64;
        let remaining = self.total - self.counts.completed;
        Some(Duration::from_secs_f64(per_doc * remaining as f64))
    }

    /// Emits an aggregate summary if `summary_interval` has elapsed since
    /// the last one; a no-op otherwise. Called from the dispatcher's main
    /// loop on every tick.
    pub fn maybe_emit_summary(&mut self) {
        if self.last_summary_at.elapsed() < self.summary_interval {
            return;
        }
        self.last_summary_at = Instant::now();
        let eta = self
            .eta()
            .map(|d| format!("{}s", d.as_secs()))
            .unwrap_or_else(|| "unknown".to_string());
        let mut workers: Vec<&str> = self.in_flight.keys().map(String::as_str).collect();
        workers.sort_unstable();
        let current_documents = workers
            .into_iter()
            .map(|worker| format!("{worker}={}", self.in_flight[worker]))
            .collect::<Vec<_>>()
            .join(", ");
        info!(
            "progress: {}/{} done ({} succeeded, {} failed, {} skipped), {:.1} docs/min, {:.1} pages/hour, {:.1} MB/hour, eta {}, workers: [{}]",
            self.counts.completed,
            self.total,
            self.counts.succeeded,
            self.counts.failed,
            self.counts.skipped,
            self.throughput_per_minute(),
            self.pages_per_hour(),
            self.mb_per_hour(),
            eta,
            current_documents,
        );
    }

    pub fn finish(&self) {
        info!(
            "finished: {}/{} done ({} succeeded, {} failed, {} skipped) in {:.1}s",
            self.counts.completed,
            self.total,
            self.counts.succeeded,
            self.counts.failed,
            self.counts.skipped,
            self.started_at.elapsed().as_secs_f64(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_updates_per_status_counts() {
        let mut tracker = ProgressTracker::new(3);
        tracker.mark_in_flight("worker-0", "doc-1");
        tracker.record("worker-0", "doc-1", LogStatus::Success, DocumentMetrics::default());
        tracker.record("worker-1", "doc-2", LogStatus::Skipped, DocumentMetrics::default());
        tracker.record("worker-2", "doc-3", LogStatus::Failure, DocumentMetrics::default());
        let counts = tracker.counts();
        assert_eq!(counts.completed, 3);
        assert_eq!(counts.succeeded, 1);
        assert_eq!(counts.skipped, 1);
        assert_eq!(counts.failed, 1);
        assert!(tracker.in_flight.is_empty());
    }

    #[test]
    fn eta_is_none_before_any_completion() {
        let tracker = ProgressTracker::new(10);
        assert!(tracker.eta().is_none());
    }

    #[test]
    fn eta_is_none_once_everything_is_done() {
        let mut tracker = ProgressTracker::new(1);
        tracker.record("worker-0", "doc-1", LogStatus::Success, DocumentMetrics::default());
        assert!(tracker.eta().is_none());
    }

    #[test]
    fn document_metrics_parses_page_count_and_byte_size_from_json() {
        let metrics = DocumentMetrics::from_json(&serde_json::json!({"page_count": 4, "byte_size": 2048}));
        assert_eq!(metrics.page_count, 4);
        assert_eq!(metrics.byte_size, 2048);
    }

    #[test]
    fn pages_and_mb_per_hour_are_zero_with_no_elapsed_time() {
        let tracker = ProgressTracker::new(1);
        assert_eq!(tracker.pages_per_hour(), 0.0);
        assert_eq!(tracker.mb_per_hour(), 0.0);
    }
}
