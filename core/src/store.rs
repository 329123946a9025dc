//! Store-level operations shared by the ingestion pipeline and the
//! synchronous request path.
//!
//! Business preconditions live behind [`InventoryStore`] so both entry
//! points enforce the same rules: at most one open assignment per device,
//! returns never predate their issue, and duplicate registrations are
//! declined rather than overwritten. Handlers stay thin; they translate
//! wire events into these operations and log the outcome.
//!
//! Every mutation is a single atomic operation against the backing store.
//! The store, not the application, serializes concurrent writers: the two
//! mutation paths share no memory, only rows.

use crate::inventory::{
    Assignment, Device, Grade, IssueRequest, NewDevice, NewGrade, ReturnRequest,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

/// A declined business precondition.
///
/// Rejections are expected outcomes, not system faults: callers log them
/// and drop the triggering message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// A device with this serial number is already registered
    #[error("device {serial} already exists")]
    DeviceExists {
        /// Serial number that was re-registered
        serial: i64,
    },

    /// The device type name did not resolve to a known row
    #[error("unknown device type '{name}'")]
    UnknownDeviceType {
        /// The unresolved type name
        name: String,
    },

    /// The location id did not resolve to a known row
    #[error("unknown location {id}")]
    UnknownLocation {
        /// The unresolved location id
        id: i32,
    },

    /// The device serial did not resolve to a known row
    #[error("unknown device {serial}")]
    UnknownDevice {
        /// The unresolved serial number
        serial: i64,
    },

    /// The person id did not resolve to a known row
    #[error("unknown person {id}")]
    UnknownPerson {
        /// The unresolved person id
        id: i32,
    },

    /// The device already has an open assignment
    #[error("device {serial} is already on loan")]
    AlreadyOnLoan {
        /// Serial number of the device on loan
        serial: i64,
    },

    /// No open assignment exists for the device
    #[error("device {serial} has no open loan")]
    NoOpenLoan {
        /// Serial number with nothing to close
        serial: i64,
    },

    /// The return date predates the open assignment's issue date
    #[error("device {serial}: return date {returned} predates issue date {issued}")]
    ReturnBeforeIssue {
        /// Serial number of the device
        serial: i64,
        /// Issue date of the open assignment
        issued: NaiveDate,
        /// Offending return date
        returned: NaiveDate,
    },
}

/// Errors that can occur during store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A business precondition failed; the operation was declined
    #[error(transparent)]
    Rejected(#[from] Rejection),

    /// The backing store itself failed
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Borrow the rejection if this error is one.
    #[must_use]
    pub const fn rejection(&self) -> Option<&Rejection> {
        match self {
            Self::Rejected(rejection) => Some(rejection),
            Self::Backend(_) => None,
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Mutations and reads over the shared inventory state.
///
/// Implementations must make each mutation atomic with respect to
/// concurrent callers of the same operation set; in particular, resolving
/// "the current open assignment" and acting on it must not be two separate
/// round trips.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Register a device.
    ///
    /// # Errors
    ///
    /// [`Rejection::DeviceExists`] for a duplicate serial number,
    /// [`Rejection::UnknownDeviceType`] / [`Rejection::UnknownLocation`]
    /// for unresolved references, [`StoreError::Backend`] on store faults.
    async fn register_device(&self, device: NewDevice) -> StoreResult<Device>;

    /// Open a loan for a device.
    ///
    /// # Errors
    ///
    /// [`Rejection::AlreadyOnLoan`] while the device has an open
    /// assignment, [`Rejection::UnknownDevice`] / [`Rejection::UnknownPerson`]
    /// for unresolved references, [`StoreError::Backend`] on store faults.
    async fn issue_assignment(&self, request: IssueRequest) -> StoreResult<Assignment>;

    /// Close the device's open loan by setting its return date.
    ///
    /// # Errors
    ///
    /// [`Rejection::NoOpenLoan`] when nothing is open,
    /// [`Rejection::ReturnBeforeIssue`] when the date would violate loan
    /// ordering, [`StoreError::Backend`] on store faults.
    async fn return_assignment(&self, request: ReturnRequest) -> StoreResult<Assignment>;

    /// Append one grade row with a server-assigned timestamp.
    ///
    /// Duplicate submissions insert duplicate rows; grading has no
    /// uniqueness rule.
    ///
    /// # Errors
    ///
    /// [`StoreError::Backend`] on store faults.
    async fn record_grade(&self, grade: NewGrade) -> StoreResult<Grade>;

    /// Fetch a device by serial number.
    ///
    /// # Errors
    ///
    /// [`StoreError::Backend`] on store faults.
    async fn device(&self, serial_number: i64) -> StoreResult<Option<Device>>;

    /// Fetch the device's open assignment, if any.
    ///
    /// # Errors
    ///
    /// [`StoreError::Backend`] on store faults.
    async fn open_assignment(&self, device_id: i64) -> StoreResult<Option<Assignment>>;

    /// Fetch all assignments for a device, oldest first.
    ///
    /// # Errors
    ///
    /// [`StoreError::Backend`] on store faults.
    async fn assignments(&self, device_id: i64) -> StoreResult<Vec<Assignment>>;

    /// Fetch all grades for a student, oldest first.
    ///
    /// # Errors
    ///
    /// [`StoreError::Backend`] on store faults.
    async fn grades(&self, student_id: i64) -> StoreResult<Vec<Grade>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_messages_name_the_device() {
        let rejection = Rejection::AlreadyOnLoan { serial: 101 };
        assert_eq!(rejection.to_string(), "device 101 is already on loan");

        let rejection = Rejection::NoOpenLoan { serial: 7 };
        assert_eq!(rejection.to_string(), "device 7 has no open loan");
    }

    #[test]
    #[allow(clippy::expect_used)] // Panics: test dates are hard-coded and valid
    fn return_before_issue_includes_both_dates() {
        let rejection = Rejection::ReturnBeforeIssue {
            serial: 101,
            issued: NaiveDate::from_ymd_opt(2024, 3, 5).expect("valid test date"),
            returned: NaiveDate::from_ymd_opt(2024, 3, 1).expect("valid test date"),
        };
        let text = rejection.to_string();
        assert!(text.contains("2024-03-05"));
        assert!(text.contains("2024-03-01"));
    }

    #[test]
    fn store_error_exposes_its_rejection() {
        let err = StoreError::from(Rejection::DeviceExists { serial: 1 });
        assert_eq!(err.rejection(), Some(&Rejection::DeviceExists { serial: 1 }));

        let err = StoreError::Backend("connection reset".to_string());
        assert!(err.rejection().is_none());
    }
}
