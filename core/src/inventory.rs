//! Persisted entities shared by the ingestion pipeline and the synchronous
//! request path.
//!
//! Devices are keyed by an externally assigned serial number. A loan episode
//! is an [`Assignment`] row; closing a loan updates `returned_at` on the
//! existing open row, it never inserts. [`Grade`] rows belong to the parallel
//! grading deployment and are append-only.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A physical device tracked by its serial number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Externally assigned serial number. Primary key.
    pub serial_number: i64,
    /// Device type row this device belongs to.
    pub type_id: i32,
    /// Location row where the device is kept.
    pub location_id: i32,
    /// Free-text note captured at registration.
    pub note: Option<String>,
}

/// A device category. Registration resolves the wire-level type name
/// against this table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceType {
    /// Row id.
    pub type_id: i32,
    /// Unique human-readable name, e.g. "Laptop".
    pub type_name: String,
}

/// A person who can borrow devices. Read-only from this crate's perspective.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    /// Row id.
    pub person_id: i32,
    /// Display name.
    pub person_name: String,
}

/// A physical location. Read-only from this crate's perspective.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// Row id.
    pub location_id: i32,
    /// Display name.
    pub location_name: String,
}

/// One loan episode of a device.
///
/// At most one assignment per device may be open (`returned_at` null) at any
/// time; when `returned_at` is set it is never earlier than `issued_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    /// Row id.
    pub assignment_id: i64,
    /// Serial number of the loaned device.
    pub device_id: i64,
    /// Borrower.
    pub person_id: i32,
    /// Day the loan was opened.
    pub issued_at: NaiveDate,
    /// Day the loan was closed, null while the device is out.
    pub returned_at: Option<NaiveDate>,
}

impl Assignment {
    /// Whether this loan is still open.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.returned_at.is_none()
    }
}

/// One recorded grade. Append-only; duplicates are permitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grade {
    /// Row id.
    pub grade_id: i64,
    /// External student identifier.
    pub student_id: i64,
    /// External module identifier.
    pub module_id: i64,
    /// Verbatim grade value, e.g. "1.3".
    pub grade_value: String,
    /// Server-assigned insertion time.
    pub recorded_at: DateTime<Utc>,
}

/// Input to device registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDevice {
    /// Serial number to register.
    pub serial_number: i64,
    /// Device type name, resolved against [`DeviceType::type_name`].
    pub type_name: String,
    /// Location row id.
    pub location_id: i32,
    /// Optional free-text note.
    pub note: Option<String>,
}

/// Input to opening a loan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IssueRequest {
    /// Serial number of the device to issue.
    pub device_id: i64,
    /// Borrower row id.
    pub person_id: i32,
    /// Day the loan opens.
    pub issued_at: NaiveDate,
}

/// Input to closing a loan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReturnRequest {
    /// Serial number of the device coming back.
    pub device_id: i64,
    /// Day the loan closes.
    pub returned_at: NaiveDate,
}

/// Input to recording a grade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewGrade {
    /// External student identifier.
    pub student_id: i64,
    /// External module identifier.
    pub module_id: i64,
    /// Verbatim grade value.
    pub grade_value: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(clippy::expect_used)] // Panics: test dates are hard-coded and valid
    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid test date")
    }

    #[test]
    fn assignment_open_state_follows_returned_at() {
        let mut assignment = Assignment {
            assignment_id: 1,
            device_id: 101,
            person_id: 7,
            issued_at: date(2024, 3, 1),
            returned_at: None,
        };
        assert!(assignment.is_open());

        assignment.returned_at = Some(date(2024, 3, 5));
        assert!(!assignment.is_open());
    }

    #[test]
    #[allow(clippy::expect_used)] // Panics: test will fail if serialization fails
    fn device_round_trips_through_json() {
        let device = Device {
            serial_number: 101,
            type_id: 2,
            location_id: 5,
            note: None,
        };
        let json = serde_json::to_string(&device).expect("serialize device");
        let back: Device = serde_json::from_str(&json).expect("deserialize device");
        assert_eq!(back, device);
    }
}
