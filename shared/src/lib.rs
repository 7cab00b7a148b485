//! Shared types and workflow rules for the studio operations platform
//!
//! This crate holds everything that does not touch the database: status
//! catalogs, transition tables, batching and input validation.

pub mod batching;
pub mod models;
pub mod types;
pub mod validation;
pub mod workflow;

pub use batching::*;
pub use models::*;
pub use types::*;
pub use validation::*;
pub use workflow::*;
