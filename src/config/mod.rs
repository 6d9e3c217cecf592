use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Base URL of the face recognition service (e.g., "http://face-service:8000")
    pub face_service_url: String,

    /// Concurrent image downloads per job
    #[serde(default = "default_fetch_workers")]
    pub fetch_workers: usize,

    /// Images per compare-batch request
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Wall-clock ceiling on a job's polling loop
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,

    /// Age after which any job record is evicted
    #[serde(default = "default_job_ttl_secs")]
    pub job_ttl_secs: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Timeout for POST calls to the face service (batch submit, registration)
    #[serde(default = "default_recognition_timeout_secs")]
    pub recognition_timeout_secs: u64,

    /// Timeout for GET/DELETE calls to the face service
    #[serde(default = "default_status_timeout_secs")]
    pub status_timeout_secs: u64,

    /// Timeout for cloud-storage listing and downloads
    #[serde(default = "default_storage_timeout_secs")]
    pub storage_timeout_secs: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_fetch_workers() -> usize {
    10
}

fn default_batch_size() -> usize {
    100
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_job_timeout_secs() -> u64 {
    60 * 60
}

fn default_job_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_sweep_interval_secs() -> u64 {
    60 * 60
}

fn default_recognition_timeout_secs() -> u64 {
    10 * 60
}

fn default_status_timeout_secs() -> u64 {
    10
}

fn default_storage_timeout_secs() -> u64 {
    30
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Orchestration knobs handed to the job pipeline.
    pub fn job_settings(&self) -> JobSettings {
        JobSettings {
            fetch_workers: self.fetch_workers,
            batch_size: self.batch_size,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            job_timeout: Duration::from_secs(self.job_timeout_secs),
            job_ttl: Duration::from_secs(self.job_ttl_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
        }
    }
}

/// Tuning for fetch, batching, polling and eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobSettings {
    pub fetch_workers: usize,
    pub batch_size: usize,
    pub poll_interval: Duration,
    pub job_timeout: Duration,
    pub job_ttl: Duration,
    pub sweep_interval: Duration,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            fetch_workers: default_fetch_workers(),
            batch_size: default_batch_size(),
            poll_interval: Duration::from_millis(default_poll_interval_ms()),
            job_timeout: Duration::from_secs(default_job_timeout_secs()),
            job_ttl: Duration::from_secs(default_job_ttl_secs()),
            sweep_interval: Duration::from_secs(default_sweep_interval_secs()),
        }
    }
}

impl JobSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch_workers == 0 {
            return Err(ConfigError::Invalid("fetch_workers must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be at least 1"));
        }
        if self.poll_interval.is_zero() || self.sweep_interval.is_zero() {
            return Err(ConfigError::Invalid("poll and sweep intervals must be non-zero"));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}
