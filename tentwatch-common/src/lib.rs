//! # tentwatch common library
//!
//! Shared code for tentwatch services:
//! - Database schema, row models, registry seeding and lock retry
//! - Site-local time handling (fixed civil offset, second truncation)
//! - API response envelope and query parsing
//! - Bootstrap configuration loading
//! - Natural ordering of tent names

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod natural_sort;
pub mod time;

pub use error::{Error, Result};
pub use time::{Clock, SiteZone, SystemClock};
