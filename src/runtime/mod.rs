//! # Runtime
//!
//! Daemon startup, the dispatcher supervisor and the watch restart policy.

pub mod backoff;
pub mod error_policy;
pub mod initialization;
pub mod supervisor;

pub use initialization::{initialize, InitializationResult};
pub use supervisor::run;
