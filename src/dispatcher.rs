//! Worker Pool / Dispatcher (C14): runs a flat `DocumentTask` queue across a
//! fixed number of OS worker processes.
//!
//! Each worker is a fresh invocation of the current binary in an internal
//! sub-mode (`INTERNAL_WORKER_FLAG`), not a `tokio::task` — a crash inside
//! Tesseract or a pdf renderer takes down one child process, not the
//! dispatcher. The dispatcher never parses a worker's stdout for its
//! result: a worker always writes its own terminal `ProcessingLog` row
//! before exiting, so the dispatcher's job on completion is to consult that
//! row and only backfill one itself if the worker died before managing to
//! write it.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::process::Command;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use crate::error::{FailureReason, PipelineError, Result};
use crate::models::LogStatus;
use crate::progress::ProgressTracker;
use crate::queue::DocumentTask;
use crate::repository::DocumentRepository;

/// Hidden flag recognized by the CLI entry point: when present, the process
/// re-execs as a worker instead of parsing the normal subcommand surface.
/// Followed by a path to a JSON-serialized `DocumentTask` and a worker id.
pub const INTERNAL_WORKER_FLAG: &str = "--internal-process-document";

const DEFAULT_PHANTOM_THRESHOLD: Duration = Duration::from_secs(4 * 3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchOutcome {
    pub documents_processed: usize,
    pub time_limit_reached: bool,
    pub process_pool_broken: bool,
}

struct Slot {
    task: DocumentTask,
    worker_label: String,
    started_at: Instant,
    child: Arc<Mutex<tokio::process::Child>>,
    // Held only for its Drop impl: the task payload file is removed once
    // the worker that read it has exited.
    _task_file: tempfile::TempPath,
}

enum Event {
    Completed {
        slot: usize,
        status: std::io::Result<std::process::ExitStatus>,
    },
}

fn poll_timeout(time_limit_reached: bool) -> Duration {
    if time_limit_reached {
        Duration::from_secs(30)
    } else {
        Duration::from_secs(60)
    }
}

pub struct Dispatcher<'a> {
    documents: &'a DocumentRepository<'a>,
    worker_binary: PathBuf,
    concurrency: usize,
    phantom_threshold: Duration,
}

impl<'a> Dispatcher<'a> {
    pub fn new(documents: &'a DocumentRepository<'a>, concurrency: usize, phantom_threshold_hours: u64) -> Result<Self> {
        let worker_binary = std::env::current_exe().map_err(PipelineError::Io)?;
        Ok(Self {
            documents,
            worker_binary,
            concurrency: concurrency.max(1),
            phantom_threshold: if phantom_threshold_hours == 0 {
                DEFAULT_PHANTOM_THRESHOLD
            } else {
                Duration::from_secs(phantom_threshold_hours * 3600)
            },
        })
    }

    async fn submit(&self, task: DocumentTask, slot_id: usize, tx: mpsc::UnboundedSender<Event>) -> Result<Slot> {
        let worker_label = format!("worker-{}-{slot_id}", std::process::id());
        let payload = serde_json::to_vec(&task)
            .map_err(|e| PipelineError::Config(format!("failed to serialize worker task: {e}")))?;
        let mut file = tempfile::NamedTempFile::new().map_err(PipelineError::Io)?;
        std::io::Write::write_all(&mut file, &payload).map_err(PipelineError::Io)?;
        let task_path = file.into_temp_path();

        let child = Command::new(&self.worker_binary)
            .arg(INTERNAL_WORKER_FLAG)
            .arg(task_path.as_os_str())
            .arg(&worker_label)
            .kill_on_drop(true)
            .spawn()
            .map_err(PipelineError::WorkerSpawn)?;

        let child = Arc::new(Mutex::new(child));
        let waiter = Arc::clone(&child);
        tokio::spawn(async move {
            let status = waiter.lock().await.wait().await;
            let _ = tx.send(Event::Completed { slot: slot_id, status });
        });

        Ok(Slot {
            task,
            worker_label,
            started_at: Instant::now(),
            child,
            _task_file: task_path,
        })
    }

    fn mark_terminal_if_absent(&self, task: &DocumentTask, worker_label: &str, status: LogStatus, metrics: serde_json::Value) -> Result<()> {
        let existing = self
            .documents
            .latest_log_status(task.project_id, &task.document.external_id)?;
        if existing.is_none() {
            self.documents
                .save_terminal_log(task.project_id, &task.document.external_id, status, worker_label, metrics)?;
        }
        Ok(())
    }

    fn handle_completion(
        &self,
        slot: &Slot,
        status: std::io::Result<std::process::ExitStatus>,
        progress: &mut ProgressTracker,
    ) -> Result<()> {
        match status {
            Ok(exit) if exit.success() => self.mark_terminal_if_absent(
                &slot.task,
                &slot.worker_label,
                LogStatus::Skipped,
                json!({ "skip_reason": "worker_exited_without_log" }),
            )?,
            Ok(exit) => {
                warn!(document_id = %slot.task.document.external_id, %exit, "worker exited non-zero");
                self.mark_terminal_if_absent(
                    &slot.task,
                    &slot.worker_label,
                    LogStatus::Failure,
                    json!({
                        "failure_code": FailureReason::WorkerCrashed.code(),
                        "error": format!("worker exited with status {exit}"),
                    }),
                )?
            }
            Err(e) => {
                warn!(document_id = %slot.task.document.external_id, error = %e, "failed to wait on worker process");
                self.mark_terminal_if_absent(
                    &slot.task,
                    &slot.worker_label,
                    LogStatus::Failure,
                    json!({
                        "failure_code": FailureReason::WorkerCrashed.code(),
                        "error": e.to_string(),
                    }),
                )?
            }
        }

        let (final_status, metrics) = self
            .documents
            .latest_log_status_and_metrics(slot.task.project_id, &slot.task.document.external_id)?
            .map(|(status, metrics)| (status, crate::progress::DocumentMetrics::from_json(&metrics)))
            .unwrap_or((LogStatus::Failure, crate::progress::DocumentMetrics::default()));
        progress.record(&slot.worker_label, &slot.task.document.external_id, final_status, metrics);
        Ok(())
    }

    async fn reap_phantoms(&self, slots: &mut HashMap<usize, Slot>, progress: &mut ProgressTracker) -> Result<usize> {
        let stale: Vec<usize> = slots
            .iter()
            .filter(|(_, slot)| slot.started_at.elapsed() >= self.phantom_threshold)
            .map(|(id, _)| *id)
            .collect();
        for id in &stale {
            if let Some(slot) = slots.remove(id) {
                warn!(document_id = %slot.task.document.external_id, worker = %slot.worker_label, "declaring phantom worker");
                self.mark_terminal_if_absent(
                    &slot.task,
                    &slot.worker_label,
                    LogStatus::Failure,
                    json!({
                        "failure_code": FailureReason::Phantom.code(),
                        "error": FailureReason::Phantom.message(),
                    }),
                )?;
                slot.child.lock().await.start_kill().ok();
                progress.record(
                    &slot.worker_label,
                    &slot.task.document.external_id,
                    LogStatus::Failure,
                    crate::progress::DocumentMetrics::default(),
                );
            }
        }
        Ok(stale.len())
    }

    pub async fn run(&self, tasks: Vec<DocumentTask>, time_limit: Option<Duration>) -> Result<DispatchOutcome> {
        let mut queue: VecDeque<DocumentTask> = tasks.into();
        let mut slots: HashMap<usize, Slot> = HashMap::new();
        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
        let mut next_slot_id = 0usize;
        let mut effective_concurrency = self.concurrency;
        let mut pool_broken = false;
        let mut time_limit_reached = false;
        let started = Instant::now();
        let mut progress = ProgressTracker::new(queue.len());

        info!(queue_len = queue.len(), concurrency = self.concurrency, "starting dispatch run");

        let initial = queue.len().min(effective_concurrency);
        for _ in 0..initial {
            let Some(task) = queue.pop_front() else { break };
            let document_id = task.document.external_id.clone();
            match self.submit(task, next_slot_id, tx.clone()).await {
                Ok(slot) => {
                    progress.mark_in_flight(&slot.worker_label, &document_id);
                    slots.insert(next_slot_id, slot);
                }
                Err(e) => {
                    warn!(error = %e, "initial worker submission failed");
                    effective_concurrency = effective_concurrency.saturating_sub(1);
                    if effective_concurrency <= 1 {
                        pool_broken = true;
                    }
                }
            }
            next_slot_id += 1;
        }

        loop {
            if slots.is_empty() && (queue.is_empty() || time_limit_reached || pool_broken) {
                break;
            }

            if let Some(limit) = time_limit {
                if started.elapsed() >= limit {
                    time_limit_reached = true;
                }
            }

            match tokio::time::timeout(poll_timeout(time_limit_reached), rx.recv()).await {
                Ok(Some(Event::Completed { slot: slot_id, status })) => {
                    if let Some(slot) = slots.remove(&slot_id) {
                        self.handle_completion(&slot, status, &mut progress)?;
                    }

                    if !queue.is_empty() && !time_limit_reached && !pool_broken {
                        if let Some(task) = queue.pop_front() {
                            let document_id = task.document.external_id.clone();
                            match self.submit(task, next_slot_id, tx.clone()).await {
                                Ok(slot) => {
                                    progress.mark_in_flight(&slot.worker_label, &document_id);
                                    slots.insert(next_slot_id, slot);
                                }
                                Err(e) => {
                                    warn!(error = %e, "worker resubmission failed");
                                    effective_concurrency = effective_concurrency.saturating_sub(1);
                                    if effective_concurrency <= 1 {
                                        pool_broken = true;
                                    }
                                }
                            }
                            next_slot_id += 1;
                        }
                    }
                }
                Ok(None) => break,
                Err(_elapsed) => {
                    self.reap_phantoms(&mut slots, &mut progress).await?;
                }
            }

            progress.maybe_emit_summary();
        }

        progress.finish();
        Ok(DispatchOutcome {
            documents_processed: progress.counts().completed,
            time_limit_reached,
            process_pool_broken: pool_broken,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_timeout_widens_once_time_limit_is_reached() {
        assert_eq!(poll_timeout(false), Duration::from_secs(60));
        assert_eq!(poll_timeout(true), Duration::from_secs(30));
    }

    #[test]
    fn internal_worker_flag_looks_like_a_long_cli_flag() {
        assert!(INTERNAL_WORKER_FLAG.starts_with("--"));
    }
}
