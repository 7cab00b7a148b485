//! Domain models for the studio operations platform

mod role;
mod status;

pub use role::*;
pub use status::*;
