use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::models::job::{FailureKind, JobFailure, MatchResult, SubJob};
use crate::services::recognition::{RecognitionBackend, RemoteState};
use crate::services::registry::JobRegistry;

/// How a job's polling loop ended.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregateOutcome {
    Completed { matches: usize },
    Failed(JobFailure),
    /// The job record disappeared (evicted or finished elsewhere).
    Abandoned,
}

/// Polls every sub-job of a job and folds their progress and matches
/// into the job's registry record.
#[derive(Clone)]
pub struct JobAggregator {
    registry: Arc<JobRegistry>,
    backend: Arc<dyn RecognitionBackend>,
    poll_interval: Duration,
}

struct SubJobProgress {
    sub: SubJob,
    current: usize,
    done: bool,
    matches: Vec<MatchResult>,
}

enum Tick {
    Pending,
    Done(Vec<MatchResult>),
    Failed(JobFailure),
    Gone,
}

impl JobAggregator {
    pub fn new(registry: Arc<JobRegistry>, backend: Arc<dyn RecognitionBackend>, poll_interval: Duration) -> Self {
        Self {
            registry,
            backend,
            poll_interval,
        }
    }

    /// Poll until every sub-job completes, one fails, `deadline` passes or
    /// `cancel` fires, then record the outcome on the job.
    pub async fn run(
        &self,
        job_id: &str,
        sub_jobs: Vec<SubJob>,
        deadline: Instant,
        cancel: CancellationToken,
    ) -> AggregateOutcome {
        let mut progress: Vec<SubJobProgress> = sub_jobs
            .into_iter()
            .map(|sub| SubJobProgress {
                sub,
                current: 0,
                done: false,
                matches: Vec::new(),
            })
            .collect();

        let end = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                Tick::Failed(JobFailure::new(FailureKind::Cancelled, "job cancelled before completion"))
            }
            polled = tokio::time::timeout_at(deadline, self.poll_until_done(job_id, &mut progress)) => {
                polled.unwrap_or_else(|_| {
                    let pending = progress.iter().filter(|p| !p.done).count();
                    warn!(job_id, pending_sub_jobs = pending, "Job timed out waiting for sub-jobs");
                    Tick::Failed(JobFailure::new(
                        FailureKind::Timeout,
                        "face comparison timed out before all batches completed",
                    ))
                })
            }
        };

        self.finish(job_id, end)
    }

    async fn poll_until_done(&self, job_id: &str, progress: &mut [SubJobProgress]) -> Tick {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match self.poll_once(job_id, progress).await {
                Tick::Pending => continue,
                end => return end,
            }
        }
    }

    /// One pass over every unfinished sub-job.
    async fn poll_once(&self, job_id: &str, progress: &mut [SubJobProgress]) -> Tick {
        for entry in progress.iter_mut().filter(|p| !p.done) {
            let status = match self.backend.job_status(&entry.sub.handle).await {
                Ok(status) => status,
                Err(e) => {
                    return Tick::Failed(JobFailure::new(
                        FailureKind::Backend,
                        format!("failed to read status of batch at offset {}: {}", entry.sub.offset, e),
                    ));
                }
            };

            match status.status {
                RemoteState::Failed => {
                    let message = status
                        .error
                        .filter(|e| !e.is_empty())
                        .unwrap_or_else(|| "face comparison batch failed".to_string());
                    warn!(job_id, sub_job_id = %entry.sub.handle, error = %message, "Sub-job failed");
                    return Tick::Failed(JobFailure::new(FailureKind::Backend, message));
                }
                RemoteState::Completed => {
                    entry.done = true;
                    entry.current = entry.sub.len;
                    entry.matches = status.matches.unwrap_or_default();
                    debug!(
                        job_id,
                        sub_job_id = %entry.sub.handle,
                        offset = entry.sub.offset,
                        matches = entry.matches.len(),
                        "Sub-job completed"
                    );
                }
                RemoteState::Processing | RemoteState::Unknown => {
                    // A batch only counts as fully processed once it reports completion.
                    let reported = status.current_image.min(entry.sub.len.saturating_sub(1));
                    entry.current = entry.current.max(reported);
                }
            }
        }

        let current: usize = progress.iter().map(|p| p.current).sum();
        // In-flight match counts are ignored so a batch is counted once.
        let matches_found: usize = progress
            .iter()
            .filter(|p| p.done)
            .map(|p| p.matches.len())
            .sum();

        if self.registry.update_progress(job_id, current, matches_found).is_err() {
            return Tick::Gone;
        }

        if progress.iter().all(|p| p.done) {
            Tick::Done(merge_matches(job_id, progress))
        } else {
            Tick::Pending
        }
    }

    fn finish(&self, job_id: &str, end: Tick) -> AggregateOutcome {
        match end {
            Tick::Done(matches) => {
                let count = matches.len();
                if self.registry.mark_completed(job_id, matches).is_err() {
                    return AggregateOutcome::Abandoned;
                }
                metrics::counter!("face_match_jobs_completed_total").increment(1);
                info!(job_id, matches = count, "Face comparison job completed");
                AggregateOutcome::Completed { matches: count }
            }
            Tick::Failed(failure) => {
                if self.registry.mark_failed(job_id, failure.clone()).is_err() {
                    return AggregateOutcome::Abandoned;
                }
                metrics::counter!("face_match_jobs_failed_total", "kind" => failure.kind.to_string())
                    .increment(1);
                warn!(job_id, kind = %failure.kind, error = %failure.message, "Face comparison job failed");
                AggregateOutcome::Failed(failure)
            }
            Tick::Pending | Tick::Gone => {
                debug!(job_id, "Job record gone, stopped polling");
                AggregateOutcome::Abandoned
            }
        }
    }
}

/// Translate each sub-job's local match indices into the job's index
/// space. Indices outside a sub-job's batch are dropped.
fn merge_matches(job_id: &str, progress: &[SubJobProgress]) -> Vec<MatchResult> {
    let mut merged = Vec::new();
    for entry in progress {
        for m in &entry.matches {
            if m.index < entry.sub.len {
                merged.push(MatchResult {
                    index: entry.sub.offset + m.index,
                    distance: m.distance,
                });
            } else {
                warn!(
                    job_id,
                    sub_job_id = %entry.sub.handle,
                    index = m.index,
                    batch_len = entry.sub.len,
                    "Dropping out-of-range match"
                );
            }
        }
    }
    merged
}
