//! Shared HTTP API types
//!
//! Framework-free pieces shared by tentwatch services: the response envelope
//! and query-parameter parsing. Each service wraps these in its own axum
//! handlers and error mapping.

pub mod types;

pub use types::{parse_bool_flag, parse_id_list, ApiEnvelope, ListEnvelope};
