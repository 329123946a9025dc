//! Typed decoding of raw bus payloads.
//!
//! Every topic has exactly one wire shape, decoded strictly: a missing or
//! mistyped field rejects the whole message, unknown extra fields are
//! tolerated. Loan dates arrive as `DD.MM.YYYY` strings and are parsed
//! into [`chrono::NaiveDate`] during deserialization, so a bad date is a
//! decode failure, not a business rejection.
//!
//! Decoding never panics and never blocks; the caller logs the error and
//! drops the message.

use chrono::NaiveDate;
use serde::Deserialize;
use thiserror::Error;

/// Why a raw payload could not be turned into a [`DecodedEvent`].
#[derive(Error, Debug)]
pub enum DecodeError {
    /// The message arrived on a topic with no mapped event kind
    #[error("no event kind mapped to topic '{topic}'")]
    UnknownTopic {
        /// The unmapped topic name
        topic: String,
    },

    /// The payload was not valid JSON for the topic's schema
    #[error("malformed payload: {detail}")]
    Malformed {
        /// Underlying parse failure
        #[from]
        detail: serde_json::Error,
    },
}

/// The event kinds the pipeline understands, one per topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Device registration
    DeviceNew,
    /// Loan issue
    AssignmentIssue,
    /// Loan return
    AssignmentReturn,
    /// Grade recording
    GradeNew,
}

/// Wire shape of a device registration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeviceNew {
    /// Serial number of the new device.
    pub device_id: i64,
    /// Device type name, resolved against the device-type table.
    pub device_name: String,
    /// Location row id.
    pub location_id: i32,
    /// Optional free-text note.
    #[serde(default)]
    pub note: Option<String>,
}

/// Wire shape of a loan issue.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AssignmentIssue {
    /// Serial number of the device going out.
    pub device_id: i64,
    /// Borrower row id.
    pub personal_id: i32,
    /// Borrower display name. Informational only; the store resolves the
    /// borrower by id.
    pub personal_name: String,
    /// Day the loan opens, `DD.MM.YYYY` on the wire.
    #[serde(with = "loan_date")]
    pub issued_at: NaiveDate,
}

/// Wire shape of a loan return.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AssignmentReturn {
    /// Serial number of the device coming back.
    pub device_id: i64,
    /// Day the loan closes, `DD.MM.YYYY` on the wire.
    #[serde(with = "loan_date")]
    pub returned_at: NaiveDate,
}

/// Wire shape of a grade record.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GradeNew {
    /// External student identifier.
    pub student_id: i64,
    /// External module identifier.
    pub module_id: i64,
    /// Verbatim grade value.
    pub grade_value: String,
}

/// A successfully decoded event, ready for dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedEvent {
    /// Register a device
    DeviceNew(DeviceNew),
    /// Open a loan
    AssignmentIssue(AssignmentIssue),
    /// Close a loan
    AssignmentReturn(AssignmentReturn),
    /// Record a grade
    GradeNew(GradeNew),
}

/// Decode a raw payload according to its topic's event kind.
///
/// # Errors
///
/// Returns [`DecodeError::Malformed`] when the payload is not valid JSON
/// for the kind's schema.
pub fn decode(kind: EventKind, payload: &[u8]) -> Result<DecodedEvent, DecodeError> {
    let event = match kind {
        EventKind::DeviceNew => DecodedEvent::DeviceNew(serde_json::from_slice(payload)?),
        EventKind::AssignmentIssue => {
            DecodedEvent::AssignmentIssue(serde_json::from_slice(payload)?)
        },
        EventKind::AssignmentReturn => {
            DecodedEvent::AssignmentReturn(serde_json::from_slice(payload)?)
        },
        EventKind::GradeNew => DecodedEvent::GradeNew(serde_json::from_slice(payload)?),
    };
    Ok(event)
}

/// Serde adapter for the `DD.MM.YYYY` wire date format.
mod loan_date {
    use chrono::NaiveDate;
    use serde::{Deserialize, Deserializer};

    const FORMAT: &str = "%d.%m.%Y";

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        NaiveDate::parse_from_str(&raw, FORMAT).map_err(serde::de::Error::custom)
    }
}
