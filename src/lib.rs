//! Folder face matching service
//!
//! This library compares every image in a shared cloud-storage folder
//! against a session's reference face. Images are downloaded concurrently,
//! submitted to an external face recognition service in fixed-size batches,
//! and the resulting sub-jobs are polled and merged into a single job whose
//! progress and matches are reported through a small HTTP API.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
