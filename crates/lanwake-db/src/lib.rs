//! # LanWake DB
//!
//! SQLite-backed persistence: survives restarts. One connection behind a
//! mutex; every public method is a short synchronous transaction.
//!
//! ```text
//! WakeDb
//!   ├── groups            (name unique)
//!   ├── machines          (group_id → groups, SET NULL on delete)
//!   ├── scheduled_tasks   (cron | once, last_fired marker)
//!   └── wake_history      (append-only)
//! ```

pub mod db;
pub mod history;
pub mod machines;
pub mod tasks;

pub use db::WakeDb;
