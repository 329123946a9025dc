//! Builders for wire-format JSON payloads.
//!
//! Field names and the `DD.MM.YYYY` date format match what the upstream
//! publishers put on the bus, so tests feed the pipeline exactly what
//! production would.

#![allow(clippy::unwrap_used)] // Serializing serde_json::Value cannot fail
#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

use chrono::NaiveDate;
use serde_json::json;

/// Date format used on the wire for loan dates.
const WIRE_DATE_FORMAT: &str = "%d.%m.%Y";

/// Payload for the device registration topic.
#[must_use]
pub fn device_new(device_id: i64, device_name: &str, location_id: i32, note: Option<&str>) -> Vec<u8> {
    let mut value = json!({
        "device_id": device_id,
        "device_name": device_name,
        "location_id": location_id,
    });
    if let (Some(note), Some(map)) = (note, value.as_object_mut()) {
        map.insert("note".to_string(), json!(note));
    }
    serde_json::to_vec(&value).unwrap()
}

/// Payload for the loan issue topic.
#[must_use]
pub fn assignment_issue(
    device_id: i64,
    personal_id: i32,
    personal_name: &str,
    issued_at: NaiveDate,
) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "device_id": device_id,
        "personal_id": personal_id,
        "personal_name": personal_name,
        "issued_at": issued_at.format(WIRE_DATE_FORMAT).to_string(),
    }))
    .unwrap()
}

/// Payload for the loan return topic.
#[must_use]
pub fn assignment_return(device_id: i64, returned_at: NaiveDate) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "device_id": device_id,
        "returned_at": returned_at.format(WIRE_DATE_FORMAT).to_string(),
    }))
    .unwrap()
}

/// Payload for the grade recording topic.
#[must_use]
pub fn grade_new(student_id: i64, module_id: i64, grade_value: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "student_id": student_id,
        "module_id": module_id,
        "grade_value": grade_value,
    }))
    .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn issue_payload_uses_day_first_dates() {
        let payload = assignment_issue(101, 7, "Ada Lovelace", date(2024, 3, 1));
        let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(value["issued_at"], "01.03.2024");
        assert_eq!(value["device_id"], 101);
    }

    #[test]
    fn device_payload_omits_absent_note() {
        let payload = device_new(101, "Laptop", 5, None);
        let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert!(value.get("note").is_none());

        let payload = device_new(101, "Laptop", 5, Some("scratched lid"));
        let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(value["note"], "scratched lid");
    }
}
