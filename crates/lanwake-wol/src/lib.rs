//! # LanWake WOL
//!
//! Network edge of the wake engine:
//! - [`WakeSignal`]: validated target + 102-byte magic packet
//! - [`WolSender`]: UDP broadcast, `etherwake`, or auto with fallback
//! - [`PingProbe`]: one short-timeout `ping` per reachability check

pub mod magic;
pub mod probe;
pub mod sender;

pub use magic::WakeSignal;
pub use probe::{PingProbe, Reachability};
pub use sender::{WakeSender, WolInfo, WolSender};
