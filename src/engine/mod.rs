//! Academic progression core: period-max resolution, bulletin totals, class
//! ranking and year-end promotion planning.
//!
//! Everything in here is storage-agnostic. The `store` module loads inputs
//! from the workspace database and feeds them through these functions.

pub mod config_resolver;
pub mod error;
pub mod promotion;
pub mod ranking;
pub mod scores;

pub use error::EngineError;
