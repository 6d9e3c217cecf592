use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::models::image::CandidateImage;
use crate::models::job::{JobFailure, JobStatus, MatchResult, SubJob, UnifiedJob};

/// Result of reading a job for delivery to a caller.
#[derive(Debug)]
pub enum Delivery {
    Missing,
    /// Still processing; the record stays in place.
    Live(UnifiedJob),
    /// Completed or failed; the record has been removed.
    Terminal(UnifiedJob),
}

/// Thread-safe store of job records keyed by job ID.
///
/// Every read hands out a snapshot; no caller holds a reference into the
/// map across an await point.
#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, UnifiedJob>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // A poisoned lock only means a panic elsewhere; the map itself is
    // still consistent because every mutation is a single assignment.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, UnifiedJob>> {
        self.jobs.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, UnifiedJob>> {
        self.jobs.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn create(&self, job_id: &str, all_images: Arc<[CandidateImage]>) -> Result<(), RegistryError> {
        self.create_at(job_id, all_images, Utc::now())
    }

    pub fn create_at(
        &self,
        job_id: &str,
        all_images: Arc<[CandidateImage]>,
        created_at: DateTime<Utc>,
    ) -> Result<(), RegistryError> {
        let mut jobs = self.write();
        if jobs.contains_key(job_id) {
            return Err(RegistryError::Duplicate(job_id.to_string()));
        }
        jobs.insert(
            job_id.to_string(),
            UnifiedJob::new(job_id.to_string(), all_images, created_at),
        );
        metrics::gauge!("face_match_active_jobs").set(jobs.len() as f64);
        Ok(())
    }

    /// Record the sub-jobs a processing job was split into.
    pub fn record_sub_jobs(&self, job_id: &str, sub_jobs: Vec<SubJob>) -> Result<(), RegistryError> {
        self.mutate(job_id, |job| {
            let total = job.total_images();
            let mut ranges: Vec<_> = job
                .sub_jobs
                .iter()
                .chain(sub_jobs.iter())
                .map(SubJob::range)
                .collect();
            ranges.sort_by_key(|r| r.start);

            let overlapping = ranges.windows(2).any(|pair| pair[0].end > pair[1].start);
            let out_of_bounds = ranges.iter().any(|r| r.end > total);
            if overlapping || out_of_bounds {
                return Err(RegistryError::OverlappingSubJobs(job.id.clone()));
            }

            job.sub_jobs.extend(sub_jobs);
            Ok(())
        })
    }

    /// Update progress counters. `current_image` never decreases and never
    /// exceeds the job's image count.
    pub fn update_progress(
        &self,
        job_id: &str,
        current_image: usize,
        matches_found: usize,
    ) -> Result<(), RegistryError> {
        self.mutate(job_id, |job| {
            let total = job.total_images();
            job.current_image = job.current_image.max(current_image.min(total));
            job.matches_found = matches_found;
            Ok(())
        })
    }

    pub fn mark_completed(&self, job_id: &str, matches: Vec<MatchResult>) -> Result<(), RegistryError> {
        self.mutate(job_id, |job| {
            job.status = JobStatus::Completed;
            job.current_image = job.total_images();
            job.matches_found = matches.len();
            job.matches = matches;
            Ok(())
        })
    }

    pub fn mark_failed(&self, job_id: &str, failure: JobFailure) -> Result<(), RegistryError> {
        self.mutate(job_id, |job| {
            job.status = JobStatus::Failed;
            job.failure = Some(failure);
            Ok(())
        })
    }

    /// Snapshot of a job. Does not touch the record.
    pub fn get(&self, job_id: &str) -> Option<UnifiedJob> {
        self.read().get(job_id).cloned()
    }

    pub fn delete(&self, job_id: &str) -> bool {
        let mut jobs = self.write();
        let removed = jobs.remove(job_id).is_some();
        metrics::gauge!("face_match_active_jobs").set(jobs.len() as f64);
        removed
    }

    /// Read a job for a caller. A terminal job is removed in the same
    /// critical section, so its result is handed out at most once.
    pub fn take_for_delivery(&self, job_id: &str) -> Delivery {
        let mut jobs = self.write();
        match jobs.get(job_id).map(|job| job.status.is_terminal()) {
            None => Delivery::Missing,
            Some(false) => jobs.get(job_id).cloned().map_or(Delivery::Missing, Delivery::Live),
            Some(true) => {
                let taken = jobs.remove(job_id);
                metrics::gauge!("face_match_active_jobs").set(jobs.len() as f64);
                taken.map_or(Delivery::Missing, Delivery::Terminal)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Remove every job created more than `ttl` before `now`, whatever its
    /// status. Returns the number removed.
    pub fn sweep_expired(&self, now: DateTime<Utc>, ttl: Duration) -> usize {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let mut jobs = self.write();
        let before = jobs.len();
        jobs.retain(|_, job| now.signed_duration_since(job.created_at) <= ttl);
        let removed = before - jobs.len();

        if removed > 0 {
            metrics::counter!("face_match_jobs_evicted_total").increment(removed as u64);
            metrics::gauge!("face_match_active_jobs").set(jobs.len() as f64);
        }
        removed
    }

    /// Run `sweep_expired` every `interval` until `cancel` fires.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        ttl: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; nothing can be stale yet.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Job sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let removed = registry.sweep_expired(Utc::now(), ttl);
                        if removed > 0 {
                            info!(removed, remaining = registry.len(), "Evicted expired jobs");
                        }
                    }
                }
            }
        })
    }

    fn mutate<F>(&self, job_id: &str, apply: F) -> Result<(), RegistryError>
    where
        F: FnOnce(&mut UnifiedJob) -> Result<(), RegistryError>,
    {
        let mut jobs = self.write();
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| RegistryError::NotFound(job_id.to_string()))?;

        if job.status.is_terminal() {
            warn!(job_id, status = %job.status, "Ignoring update to finished job");
            return Err(RegistryError::Terminal(job_id.to_string()));
        }
        apply(job)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("job {0} not found")]
    NotFound(String),

    #[error("job {0} already exists")]
    Duplicate(String),

    #[error("job {0} has already finished")]
    Terminal(String),

    #[error("job {0} has overlapping or out-of-range sub-jobs")]
    OverlappingSubJobs(String),
}
