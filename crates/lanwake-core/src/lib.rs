//! # LanWake Core
//!
//! Shared foundation for every LanWake crate: configuration, the error
//! taxonomy, the data model and the store traits the wake engine consumes.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::LanWakeConfig;
pub use error::{LanWakeError, Result};
