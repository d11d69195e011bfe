//! `forgejobs-core` — shared building blocks for the job subsystem.
//!
//! This crate contains identifiers and the declaration error model. It has no
//! runtime or storage concerns.

pub mod error;
pub mod id;

pub use error::{PolicyError, PolicyResult};
pub use id::JobId;
