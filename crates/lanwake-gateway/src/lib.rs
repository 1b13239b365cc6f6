//! # LanWake Gateway
//!
//! Axum HTTP API: machines, groups, wake, monitors, history and schedules.

pub mod error;
pub mod routes;
pub mod server;

pub use error::ApiError;
pub use server::{AppState, build_router, build_router_from_arc, serve};
