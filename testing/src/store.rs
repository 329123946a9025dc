//! In-memory implementation of the inventory store for tests.
//!
//! [`InMemoryStore`] enforces the same preconditions, in the same order,
//! as the PostgreSQL store, so pipeline tests exercise real rejection
//! paths without a database. Reference rows (device types, locations,
//! persons) are seeded through the `add_*` methods; the ingestion path
//! never creates them.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity

use async_trait::async_trait;
use chrono::Utc;
use depot_core::inventory::{
    Assignment, Device, DeviceType, Grade, IssueRequest, Location, NewDevice, NewGrade, Person,
    ReturnRequest,
};
use depot_core::store::{InventoryStore, Rejection, StoreError, StoreResult};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::trace;

#[derive(Default)]
struct Inner {
    device_types: Vec<DeviceType>,
    locations: Vec<Location>,
    persons: Vec<Person>,
    devices: HashMap<i64, Device>,
    assignments: Vec<Assignment>,
    grades: Vec<Grade>,
    next_type_id: i32,
    next_location_id: i32,
    next_person_id: i32,
    next_assignment_id: i64,
    next_grade_id: i64,
}

/// In-memory [`InventoryStore`] with seedable reference tables.
///
/// Rejection precedence mirrors the PostgreSQL store: registration checks
/// the type name, then the duplicate serial, then the location; issuing
/// checks the open loan, then the device, then the person.
///
/// [`InMemoryStore::set_backend_failing`] makes every operation return a
/// backend error, standing in for a database outage.
#[derive(Clone)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
    failing: Arc<AtomicBool>,
}

impl InMemoryStore {
    /// Create an empty store with no reference rows.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                next_type_id: 1,
                next_location_id: 1,
                next_person_id: 1,
                next_assignment_id: 1,
                next_grade_id: 1,
                ..Inner::default()
            })),
            failing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Seed a device type row and return its id.
    pub async fn add_device_type(&self, type_name: &str) -> i32 {
        let mut inner = self.inner.write().await;
        let type_id = inner.next_type_id;
        inner.next_type_id += 1;
        inner.device_types.push(DeviceType {
            type_id,
            type_name: type_name.to_string(),
        });
        type_id
    }

    /// Seed a location row and return its id.
    pub async fn add_location(&self, location_name: &str) -> i32 {
        let mut inner = self.inner.write().await;
        let location_id = inner.next_location_id;
        inner.next_location_id += 1;
        inner.locations.push(Location {
            location_id,
            location_name: location_name.to_string(),
        });
        location_id
    }

    /// Seed a person row and return its id.
    pub async fn add_person(&self, person_name: &str) -> i32 {
        let mut inner = self.inner.write().await;
        let person_id = inner.next_person_id;
        inner.next_person_id += 1;
        inner.persons.push(Person {
            person_id,
            person_name: person_name.to_string(),
        });
        person_id
    }

    /// Make every subsequent operation fail with a backend error (or
    /// succeed again).
    pub fn set_backend_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check_failing(&self) -> StoreResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(
                "injected backend failure".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InventoryStore for InMemoryStore {
    async fn register_device(&self, device: NewDevice) -> StoreResult<Device> {
        self.check_failing()?;
        let mut inner = self.inner.write().await;

        let type_id = inner
            .device_types
            .iter()
            .find(|t| t.type_name == device.type_name)
            .map(|t| t.type_id)
            .ok_or_else(|| Rejection::UnknownDeviceType {
                name: device.type_name.clone(),
            })?;
        if inner.devices.contains_key(&device.serial_number) {
            return Err(Rejection::DeviceExists {
                serial: device.serial_number,
            }
            .into());
        }
        if !inner
            .locations
            .iter()
            .any(|l| l.location_id == device.location_id)
        {
            return Err(Rejection::UnknownLocation {
                id: device.location_id,
            }
            .into());
        }

        let row = Device {
            serial_number: device.serial_number,
            type_id,
            location_id: device.location_id,
            note: device.note,
        };
        inner.devices.insert(row.serial_number, row.clone());
        trace!(serial = row.serial_number, "device registered");
        Ok(row)
    }

    async fn issue_assignment(&self, request: IssueRequest) -> StoreResult<Assignment> {
        self.check_failing()?;
        let mut inner = self.inner.write().await;

        if inner
            .assignments
            .iter()
            .any(|a| a.device_id == request.device_id && a.is_open())
        {
            return Err(Rejection::AlreadyOnLoan {
                serial: request.device_id,
            }
            .into());
        }
        if !inner.devices.contains_key(&request.device_id) {
            return Err(Rejection::UnknownDevice {
                serial: request.device_id,
            }
            .into());
        }
        if !inner
            .persons
            .iter()
            .any(|p| p.person_id == request.person_id)
        {
            return Err(Rejection::UnknownPerson {
                id: request.person_id,
            }
            .into());
        }

        let assignment = Assignment {
            assignment_id: inner.next_assignment_id,
            device_id: request.device_id,
            person_id: request.person_id,
            issued_at: request.issued_at,
            returned_at: None,
        };
        inner.next_assignment_id += 1;
        inner.assignments.push(assignment.clone());
        trace!(serial = assignment.device_id, "assignment opened");
        Ok(assignment)
    }

    async fn return_assignment(&self, request: ReturnRequest) -> StoreResult<Assignment> {
        self.check_failing()?;
        let mut inner = self.inner.write().await;

        let open = inner
            .assignments
            .iter_mut()
            .find(|a| a.device_id == request.device_id && a.is_open())
            .ok_or(Rejection::NoOpenLoan {
                serial: request.device_id,
            })?;
        if request.returned_at < open.issued_at {
            return Err(Rejection::ReturnBeforeIssue {
                serial: request.device_id,
                issued: open.issued_at,
                returned: request.returned_at,
            }
            .into());
        }

        open.returned_at = Some(request.returned_at);
        trace!(serial = open.device_id, "assignment closed");
        Ok(open.clone())
    }

    async fn record_grade(&self, grade: NewGrade) -> StoreResult<Grade> {
        self.check_failing()?;
        let mut inner = self.inner.write().await;

        let row = Grade {
            grade_id: inner.next_grade_id,
            student_id: grade.student_id,
            module_id: grade.module_id,
            grade_value: grade.grade_value,
            recorded_at: Utc::now(),
        };
        inner.next_grade_id += 1;
        inner.grades.push(row.clone());
        trace!(student = row.student_id, "grade recorded");
        Ok(row)
    }

    async fn device(&self, serial_number: i64) -> StoreResult<Option<Device>> {
        self.check_failing()?;
        let inner = self.inner.read().await;
        Ok(inner.devices.get(&serial_number).cloned())
    }

    async fn open_assignment(&self, device_id: i64) -> StoreResult<Option<Assignment>> {
        self.check_failing()?;
        let inner = self.inner.read().await;
        Ok(inner
            .assignments
            .iter()
            .find(|a| a.device_id == device_id && a.is_open())
            .cloned())
    }

    async fn assignments(&self, device_id: i64) -> StoreResult<Vec<Assignment>> {
        self.check_failing()?;
        let inner = self.inner.read().await;
        let mut rows: Vec<Assignment> = inner
            .assignments
            .iter()
            .filter(|a| a.device_id == device_id)
            .cloned()
            .collect();
        rows.sort_by_key(|a| (a.issued_at, a.assignment_id));
        Ok(rows)
    }

    async fn grades(&self, student_id: i64) -> StoreResult<Vec<Grade>> {
        self.check_failing()?;
        let inner = self.inner.read().await;
        let mut rows: Vec<Grade> = inner
            .grades
            .iter()
            .filter(|g| g.student_id == student_id)
            .cloned()
            .collect();
        rows.sort_by_key(|g| (g.recorded_at, g.grade_id));
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    async fn seeded_store() -> InMemoryStore {
        let store = InMemoryStore::new();
        store.add_device_type("Laptop").await;
        store.add_location("Room 101").await;
        store.add_person("Ada Lovelace").await;
        store
    }

    fn new_device(serial: i64) -> NewDevice {
        NewDevice {
            serial_number: serial,
            type_name: "Laptop".to_string(),
            location_id: 1,
            note: None,
        }
    }

    #[tokio::test]
    async fn registers_and_fetches_a_device() {
        let store = seeded_store().await;

        let device = store.register_device(new_device(101)).await.unwrap();
        assert_eq!(device.serial_number, 101);

        let fetched = store.device(101).await.unwrap();
        assert_eq!(fetched, Some(device));
    }

    #[tokio::test]
    async fn duplicate_serial_is_rejected() {
        let store = seeded_store().await;
        store.register_device(new_device(101)).await.unwrap();

        let err = store.register_device(new_device(101)).await.unwrap_err();
        assert_eq!(
            err.rejection(),
            Some(&Rejection::DeviceExists { serial: 101 })
        );
    }

    #[tokio::test]
    async fn unknown_type_wins_over_duplicate_serial() {
        let store = seeded_store().await;
        store.register_device(new_device(101)).await.unwrap();

        let mut device = new_device(101);
        device.type_name = "Hovercraft".to_string();
        let err = store.register_device(device).await.unwrap_err();
        assert_eq!(
            err.rejection(),
            Some(&Rejection::UnknownDeviceType {
                name: "Hovercraft".to_string()
            })
        );
    }

    #[tokio::test]
    async fn unknown_location_is_rejected() {
        let store = seeded_store().await;

        let mut device = new_device(102);
        device.location_id = 99;
        let err = store.register_device(device).await.unwrap_err();
        assert_eq!(err.rejection(), Some(&Rejection::UnknownLocation { id: 99 }));
    }

    #[tokio::test]
    async fn issue_then_return_updates_the_same_row() {
        let store = seeded_store().await;
        store.register_device(new_device(101)).await.unwrap();

        let issued = store
            .issue_assignment(IssueRequest {
                device_id: 101,
                person_id: 1,
                issued_at: date(2024, 3, 1),
            })
            .await
            .unwrap();
        assert!(issued.is_open());

        let returned = store
            .return_assignment(ReturnRequest {
                device_id: 101,
                returned_at: date(2024, 3, 5),
            })
            .await
            .unwrap();
        assert_eq!(returned.assignment_id, issued.assignment_id);
        assert_eq!(returned.returned_at, Some(date(2024, 3, 5)));

        let history = store.assignments(101).await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn second_issue_while_open_is_rejected() {
        let store = seeded_store().await;
        store.register_device(new_device(101)).await.unwrap();
        let request = IssueRequest {
            device_id: 101,
            person_id: 1,
            issued_at: date(2024, 3, 1),
        };
        store.issue_assignment(request).await.unwrap();

        let err = store.issue_assignment(request).await.unwrap_err();
        assert_eq!(
            err.rejection(),
            Some(&Rejection::AlreadyOnLoan { serial: 101 })
        );
    }

    #[tokio::test]
    async fn return_without_open_loan_is_rejected() {
        let store = seeded_store().await;
        store.register_device(new_device(101)).await.unwrap();

        let err = store
            .return_assignment(ReturnRequest {
                device_id: 101,
                returned_at: date(2024, 3, 5),
            })
            .await
            .unwrap_err();
        assert_eq!(err.rejection(), Some(&Rejection::NoOpenLoan { serial: 101 }));
    }

    #[tokio::test]
    async fn return_before_issue_leaves_the_loan_open() {
        let store = seeded_store().await;
        store.register_device(new_device(101)).await.unwrap();
        store
            .issue_assignment(IssueRequest {
                device_id: 101,
                person_id: 1,
                issued_at: date(2024, 3, 10),
            })
            .await
            .unwrap();

        let err = store
            .return_assignment(ReturnRequest {
                device_id: 101,
                returned_at: date(2024, 3, 1),
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err.rejection(),
            Some(&Rejection::ReturnBeforeIssue { .. })
        ));

        let open = store.open_assignment(101).await.unwrap();
        assert!(open.is_some(), "rejected return must not close the loan");
    }

    #[tokio::test]
    async fn duplicate_grades_append_rows() {
        let store = seeded_store().await;
        let grade = NewGrade {
            student_id: 42,
            module_id: 7,
            grade_value: "1.3".to_string(),
        };

        store.record_grade(grade.clone()).await.unwrap();
        store.record_grade(grade).await.unwrap();

        let grades = store.grades(42).await.unwrap();
        assert_eq!(grades.len(), 2);
        assert!(grades.iter().all(|g| g.grade_value == "1.3"));
    }

    #[tokio::test]
    async fn backend_failure_mode_fails_every_operation() {
        let store = seeded_store().await;
        store.set_backend_failing(true);

        let err = store.register_device(new_device(101)).await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));

        store.set_backend_failing(false);
        assert!(store.register_device(new_device(101)).await.is_ok());
    }
}
