//! Shared API request/response types
//!
//! Every response uses the same envelope:
//!
//! ```json
//! {"success": true, "message": "...", "data": {...}}
//! {"success": true, "message": "...", "start_date_time": "...", "end_date_time": "...", "results": [...]}
//! {"success": false, "message": "...", "error": "NOT_FOUND"}
//! ```

use chrono::{DateTime, FixedOffset};
use serde::Serialize;

use crate::{Error, Result};

/// Envelope for single-object responses (writes, errors)
#[derive(Debug, Clone, Serialize)]
pub struct ApiEnvelope<T> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Machine-readable error code, failures only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiEnvelope<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
            error: None,
        }
    }
}

impl ApiEnvelope<()> {
    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
            error: Some(code.into()),
        }
    }
}

/// Envelope for dashboard reads over a time window
#[derive(Debug, Clone, Serialize)]
pub struct ListEnvelope<T> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date_time: Option<DateTime<FixedOffset>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date_time: Option<DateTime<FixedOffset>>,
    pub results: Vec<T>,
}

impl<T> ListEnvelope<T> {
    pub fn new(message: impl Into<String>, results: Vec<T>) -> Self {
        Self {
            success: true,
            message: message.into(),
            start_date_time: None,
            end_date_time: None,
            results,
        }
    }

    pub fn with_window(mut self, start: DateTime<FixedOffset>, end: DateTime<FixedOffset>) -> Self {
        self.start_date_time = Some(start);
        self.end_date_time = Some(end);
        self
    }
}

/// Parse a comma-separated id filter such as `"3, 7,12"`.
///
/// Empty segments are ignored; duplicates collapse (first occurrence kept).
/// Anything that is not a positive integer is rejected.
pub fn parse_id_list(raw: &str) -> Result<Vec<i64>> {
    let mut ids = Vec::new();
    for token in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let id = token
            .parse::<i64>()
            .ok()
            .filter(|id| *id > 0)
            .ok_or_else(|| {
                Error::InvalidInput(format!(
                    "Invalid id list '{}'. Use comma-separated integers.",
                    raw
                ))
            })?;
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    Ok(ids)
}

/// Parse a boolean query flag (`true/false`, `1/0`, `yes/no`); absent is false.
pub fn parse_bool_flag(raw: Option<&str>) -> Result<bool> {
    match raw.map(|s| s.trim().to_ascii_lowercase()) {
        None => Ok(false),
        Some(value) => match value.as_str() {
            "" | "false" | "0" | "no" => Ok(false),
            "true" | "1" | "yes" => Ok(true),
            _ => Err(Error::InvalidInput(format!("Invalid boolean flag: {}", value))),
        },
    }
}
