//! Collaborator seams consumed by the wake engine.

pub mod store;

pub use store::{HistoryRecorder, MachineDirectory, TaskStore};
