//! kubed Library
//!
//! Core functionality of the kubed cluster daemon: the watch dispatcher, the
//! ConfigMap/Secret syncer, the recycle bin and the search index.
//!
//! ## Quick Start
//!
//! ```rust
//! use kubed::prelude::*;
//! ```
//!
//! This brings commonly used types and traits into scope. For more specific imports,
//! use the individual modules.

pub mod cli;
pub mod cluster;
pub mod config;
pub mod constants;
pub mod dispatcher;
pub mod observability;
pub mod prelude;
pub mod runtime;
pub mod search;
pub mod server;
pub mod syncer;
pub mod trash;
