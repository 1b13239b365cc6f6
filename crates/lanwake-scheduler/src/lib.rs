//! # LanWake Scheduler
//!
//! Everything that decides *when* and *what* to wake.
//!
//! ## Architecture
//! ```text
//! SchedulerLoop (tokio interval, default 30s)
//!   ├── CronTask: "0 8 * * mon-fri" → group "office"
//!   ├── OnceTask: "2026-02-22T15:00" → machine "nas" (disabled after firing)
//!   └── on due → WakeAction
//!                  ├── TaskTargetResolver (group → members)
//!                  ├── WakeSender (magic packet)
//!                  ├── HistoryRecorder
//!                  └── MonitorRegistry (verify it came up)
//! ```
//!
//! Manual wakes from the HTTP API go through the same `WakeAction`.

pub mod cron;
pub mod engine;
pub mod resolver;
pub mod tasks;
pub mod wake;

#[cfg(test)]
pub(crate) mod testing;

pub use cron::CronSchedule;
pub use engine::{SchedulerLoop, TickSummary, spawn_scheduler};
pub use resolver::TaskTargetResolver;
pub use tasks::{TaskDraft, TaskPatch, TaskView};
pub use wake::{WakeAction, WakeOutcome, WakeReport, WakeSource};
