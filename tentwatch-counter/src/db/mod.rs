//! Database access layer for tentwatch-counter
//!
//! Query functions per table. Schema lives in `tentwatch_common::db::init`.

pub mod counter_history;
pub mod pilgrims;
pub mod raw_counts;
