pub mod aggregator;
pub mod fetcher;
pub mod google_drive;
pub mod onedrive;
pub mod orchestrator;
pub mod recognition;
pub mod registry;
pub mod source;
pub mod submitter;
