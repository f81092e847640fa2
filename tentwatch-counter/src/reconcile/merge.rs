//! Record state machine
//!
//! A reconciled record moves `Absent -> CameraOnly | RfidOnly -> Complete`.
//! Observations only ever fill or overwrite a side; a side that has no new
//! data keeps its stored value. Everything here is pure so the rules can be
//! exercised without a database.

use tentwatch_common::db::PilgrimRow;

use crate::db::pilgrims::PilgrimValues;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    Absent,
    CameraOnly { camera: i64 },
    RfidOnly { rfid: i64 },
    Complete { camera: i64, rfid: i64 },
}

impl RecordState {
    pub fn from_counts(camera: Option<i64>, rfid: Option<i64>) -> Self {
        match (camera, rfid) {
            (None, None) => RecordState::Absent,
            (Some(camera), None) => RecordState::CameraOnly { camera },
            (None, Some(rfid)) => RecordState::RfidOnly { rfid },
            (Some(camera), Some(rfid)) => RecordState::Complete { camera, rfid },
        }
    }

    pub fn camera_count(&self) -> Option<i64> {
        match *self {
            RecordState::CameraOnly { camera } | RecordState::Complete { camera, .. } => {
                Some(camera)
            }
            _ => None,
        }
    }

    pub fn rfid_count(&self) -> Option<i64> {
        match *self {
            RecordState::RfidOnly { rfid } | RecordState::Complete { rfid, .. } => Some(rfid),
            _ => None,
        }
    }

    /// Apply new observations. `None` means "no new data", never "clear".
    pub fn absorb(self, camera: Option<i64>, rfid: Option<i64>) -> Self {
        RecordState::from_counts(
            camera.or(self.camera_count()),
            rfid.or(self.rfid_count()),
        )
    }

    pub fn violation_count(&self) -> i64 {
        violation_count(self.camera_count(), self.rfid_count())
    }
}

/// Head count not covered by RFID registrations; zero unless both sides are known.
pub fn violation_count(camera: Option<i64>, rfid: Option<i64>) -> i64 {
    match (camera, rfid) {
        (Some(camera), Some(rfid)) => (camera - rfid).max(0),
        _ => 0,
    }
}

/// Stored view of a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub state: RecordState,
    pub violation_count: i64,
    pub image: Option<String>,
}

impl Snapshot {
    pub fn absent() -> Self {
        Self {
            state: RecordState::Absent,
            violation_count: 0,
            image: None,
        }
    }
}

impl From<&PilgrimRow> for Snapshot {
    fn from(row: &PilgrimRow) -> Self {
        Self {
            state: RecordState::from_counts(row.camera_count, row.rfid_count),
            violation_count: row.violation_count,
            image: row.image.clone(),
        }
    }
}

/// Latest raw observations for a key
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Incoming {
    pub camera_count: Option<i64>,
    pub rfid_count: Option<i64>,
    /// Image stored with the latest camera event
    pub image: Option<String>,
}

impl Incoming {
    pub fn is_empty(&self) -> bool {
        self.camera_count.is_none() && self.rfid_count.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub state: RecordState,
    pub violation_count: i64,
    pub image: Option<String>,
    /// Previously attached image that must leave storage
    pub discarded_image: Option<String>,
}

impl MergeOutcome {
    /// True when writing this outcome would change the stored record
    pub fn differs_from(&self, existing: &Snapshot) -> bool {
        self.state != existing.state
            || self.violation_count != existing.violation_count
            || self.image != existing.image
    }

    pub fn values(&self) -> PilgrimValues {
        PilgrimValues {
            camera_count: self.state.camera_count(),
            rfid_count: self.state.rfid_count(),
            violation_count: self.violation_count,
            image: self.image.clone(),
        }
    }
}

/// Fold incoming observations into an existing record.
///
/// The image follows the violation: with a positive count the newest camera
/// image is attached (or the stored one kept if the camera sent none); with
/// zero the stored image is cleared and reported as discarded. An image
/// replaced by a newer one is not discarded, its raw row still references it.
pub fn merge(existing: &Snapshot, incoming: &Incoming) -> MergeOutcome {
    let state = existing
        .state
        .absorb(incoming.camera_count, incoming.rfid_count);
    let violation_count = state.violation_count();

    let (image, discarded_image) = if violation_count > 0 {
        (
            incoming.image.clone().or_else(|| existing.image.clone()),
            None,
        )
    } else {
        (None, existing.image.clone())
    };

    MergeOutcome {
        state,
        violation_count,
        image,
        discarded_image,
    }
}
