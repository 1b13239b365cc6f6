//! # LanWake Monitor
//!
//! Wake-then-verify: after a magic packet goes out, ping the target until it
//! answers, the attempt budget runs out, or someone cancels.
//!
//! ```text
//! pending ──(no ip)──────────────────────────► no_ip
//!    │
//!    └─(boot delay)─► checking ──probe ok────► online
//!                        │  ▲
//!                 fail,  │  │ interval
//!            attempts<max└──┘
//!                        ├──attempts==max────► timeout
//!                        └──cancel requested─► cancelled
//! ```
//!
//! Guarantees:
//! - at most one unfinished session per machine id
//! - probes for one machine never overlap
//! - finished sessions are evicted after a display period; a generation
//!   counter keeps a stale eviction from removing a newer session

pub mod registry;
pub mod state;

pub use registry::{MonitorPolicy, MonitorRegistry};
pub use state::{MonitorSnapshot, MonitorStatus};
