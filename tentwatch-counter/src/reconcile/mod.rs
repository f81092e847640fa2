//! Camera/RFID reconciliation
//!
//! - `merge`: pure record state machine
//! - `engine`: race-safe per-key upsert with evidence image policy
//! - `scheduler`: periodic re-merge behind the clock

pub mod engine;
pub mod merge;
pub mod scheduler;

pub use engine::{MergeReport, Reconciler, SecondSummary};
pub use merge::{violation_count, Incoming, MergeOutcome, RecordState, Snapshot};
pub use scheduler::{ReconcileSchedule, ReconcileScheduler, TickSummary};
