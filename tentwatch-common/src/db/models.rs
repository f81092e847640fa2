//! Database models
//!
//! Row structs mirror the tables one-to-one. Instants stay as epoch seconds
//! here and are converted at the service boundary.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// What a registered device reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// Head-count camera feeding the reconciliation engine
    Camera,
    /// RFID gate counter feeding the reconciliation engine
    Rfid,
    /// In/out people counter feeding counter history
    PeopleCounter,
}

impl DeviceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Camera => "camera",
            DeviceKind::Rfid => "rfid",
            DeviceKind::PeopleCounter => "people_counter",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "camera" => Ok(DeviceKind::Camera),
            "rfid" => Ok(DeviceKind::Rfid),
            "people_counter" => Ok(DeviceKind::PeopleCounter),
            other => Err(Error::InvalidInput(format!("unknown device kind: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Site {
    pub id: i64,
    pub company_id: i64,
    pub name: String,
    pub capacity: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Device {
    pub id: i64,
    pub serial: String,
    pub kind: String,
    pub site_id: Option<i64>,
    pub last_seen: Option<i64>,
}

impl Device {
    pub fn kind(&self) -> crate::Result<DeviceKind> {
        self.kind.parse()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct RawCameraCount {
    pub id: i64,
    pub site_id: i64,
    pub device_serial: String,
    pub count: i64,
    pub ts: i64,
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct RawRfidCount {
    pub id: i64,
    pub site_id: i64,
    pub device_serial: String,
    pub count: i64,
    pub ts: i64,
}

/// Reconciled record ("Pilgrim")
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct PilgrimRow {
    pub id: i64,
    pub site_id: i64,
    pub ts: i64,
    pub camera_count: Option<i64>,
    pub rfid_count: Option<i64>,
    pub violation_count: i64,
    pub image: Option<String>,
    pub version: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct CounterHistoryRow {
    pub id: i64,
    pub device_id: i64,
    pub device_serial: String,
    pub site_id: i64,
    pub total_in: i64,
    pub total_out: i64,
    pub passby: i64,
    pub turnback: i64,
    pub avg_stay_time: i64,
    pub total: i64,
    pub start_time: Option<i64>,
    pub end_time: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_kind_parses_stored_values() {
        for kind in [DeviceKind::Camera, DeviceKind::Rfid, DeviceKind::PeopleCounter] {
            assert_eq!(kind.as_str().parse::<DeviceKind>().unwrap(), kind);
        }
        assert!("thermostat".parse::<DeviceKind>().is_err());
    }

    #[test]
    fn test_device_kind_serde_matches_storage() {
        let json = serde_json::to_string(&DeviceKind::PeopleCounter).unwrap();
        assert_eq!(json, "\"people_counter\"");
    }
}
