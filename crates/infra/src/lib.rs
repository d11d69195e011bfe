//! Infrastructure layer: job execution, storage, time and configuration.

pub mod clock;
pub mod config;
pub mod jobs;
