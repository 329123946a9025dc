//! Domain handlers, one per event kind.
//!
//! Each handler translates a decoded wire event into a store operation and
//! logs the applied mutation. The business preconditions themselves live in
//! the store, where the synchronous request path shares them; a handler
//! neither retries nor reorders, it performs exactly one mutation attempt
//! per message and hands the outcome back to the dispatcher.

use crate::decode::{AssignmentIssue, AssignmentReturn, DeviceNew, GradeNew};
use depot_core::inventory::{IssueRequest, NewDevice, NewGrade, ReturnRequest};
use depot_core::store::{InventoryStore, StoreResult};
use std::sync::Arc;
use tracing::info;

/// Registers new devices.
///
/// The wire `device_name` is a device-type name; the store resolves it
/// against the device-type table. Duplicate serial numbers are rejected by
/// the store, which makes re-delivery a logged no-op.
pub struct RegisterHandler {
    store: Arc<dyn InventoryStore>,
}

impl RegisterHandler {
    /// Create a handler over the shared store.
    #[must_use]
    pub const fn new(store: Arc<dyn InventoryStore>) -> Self {
        Self { store }
    }

    /// Insert one device row.
    ///
    /// # Errors
    ///
    /// Propagates the store outcome unchanged; see
    /// [`InventoryStore::register_device`].
    pub async fn handle(&self, event: DeviceNew) -> StoreResult<()> {
        let device = self
            .store
            .register_device(NewDevice {
                serial_number: event.device_id,
                type_name: event.device_name,
                location_id: event.location_id,
                note: event.note,
            })
            .await?;

        info!(
            serial = device.serial_number,
            type_id = device.type_id,
            location = device.location_id,
            "device registered"
        );
        Ok(())
    }
}

/// Opens loans.
pub struct IssueHandler {
    store: Arc<dyn InventoryStore>,
}

impl IssueHandler {
    /// Create a handler over the shared store.
    #[must_use]
    pub const fn new(store: Arc<dyn InventoryStore>) -> Self {
        Self { store }
    }

    /// Insert one open assignment row.
    ///
    /// A device already on loan is rejected by the store, so re-delivery
    /// while the loan is open cannot produce a second open row.
    ///
    /// # Errors
    ///
    /// Propagates the store outcome unchanged; see
    /// [`InventoryStore::issue_assignment`].
    pub async fn handle(&self, event: AssignmentIssue) -> StoreResult<()> {
        let assignment = self
            .store
            .issue_assignment(IssueRequest {
                device_id: event.device_id,
                person_id: event.personal_id,
                issued_at: event.issued_at,
            })
            .await?;

        info!(
            serial = assignment.device_id,
            person = assignment.person_id,
            person_name = %event.personal_name,
            assignment = assignment.assignment_id,
            issued_at = %assignment.issued_at,
            "assignment opened"
        );
        Ok(())
    }
}

/// Closes loans.
pub struct ReturnHandler {
    store: Arc<dyn InventoryStore>,
}

impl ReturnHandler {
    /// Create a handler over the shared store.
    #[must_use]
    pub const fn new(store: Arc<dyn InventoryStore>) -> Self {
        Self { store }
    }

    /// Set the return date on the device's single open assignment row.
    ///
    /// # Errors
    ///
    /// Propagates the store outcome unchanged; see
    /// [`InventoryStore::return_assignment`].
    pub async fn handle(&self, event: AssignmentReturn) -> StoreResult<()> {
        let assignment = self
            .store
            .return_assignment(ReturnRequest {
                device_id: event.device_id,
                returned_at: event.returned_at,
            })
            .await?;

        info!(
            serial = assignment.device_id,
            assignment = assignment.assignment_id,
            returned_at = %event.returned_at,
            "assignment closed"
        );
        Ok(())
    }
}

/// Records grades. Append-only; duplicate messages insert duplicate rows.
pub struct GradeHandler {
    store: Arc<dyn InventoryStore>,
}

impl GradeHandler {
    /// Create a handler over the shared store.
    #[must_use]
    pub const fn new(store: Arc<dyn InventoryStore>) -> Self {
        Self { store }
    }

    /// Insert one grade row with a server-assigned timestamp.
    ///
    /// # Errors
    ///
    /// Propagates the store outcome unchanged; see
    /// [`InventoryStore::record_grade`].
    pub async fn handle(&self, event: GradeNew) -> StoreResult<()> {
        let grade = self
            .store
            .record_grade(NewGrade {
                student_id: event.student_id,
                module_id: event.module_id,
                grade_value: event.grade_value,
            })
            .await?;

        info!(
            student = grade.student_id,
            module = grade.module_id,
            value = %grade.grade_value,
            "grade recorded"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)] // Test code uses expect for clear failure messages

    use super::*;
    use chrono::NaiveDate;
    use depot_core::store::Rejection;
    use depot_testing::InMemoryStore;
    use proptest::prelude::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid test date")
    }

    async fn seeded() -> Arc<InMemoryStore> {
        let store = InMemoryStore::new();
        store.add_device_type("Laptop").await;
        store.add_location("Room 101").await;
        store.add_person("Ada Lovelace").await;
        Arc::new(store)
    }

    #[tokio::test]
    async fn register_resolves_the_type_by_name() {
        let store = seeded().await;
        let handler = RegisterHandler::new(store.clone());

        handler
            .handle(DeviceNew {
                device_id: 101,
                device_name: "Laptop".to_string(),
                location_id: 1,
                note: None,
            })
            .await
            .expect("registration should succeed");

        let device = store
            .device(101)
            .await
            .expect("store should answer")
            .expect("device should exist");
        assert_eq!(device.type_id, 1);
    }

    #[tokio::test]
    async fn register_rejects_unknown_type_names() {
        let store = seeded().await;
        let handler = RegisterHandler::new(store);

        let err = handler
            .handle(DeviceNew {
                device_id: 101,
                device_name: "Hovercraft".to_string(),
                location_id: 1,
                note: None,
            })
            .await
            .expect_err("unknown type should be rejected");
        assert!(matches!(
            err.rejection(),
            Some(&Rejection::UnknownDeviceType { .. })
        ));
    }

    #[tokio::test]
    async fn issue_then_return_closes_the_open_row() {
        let store = seeded().await;
        let register = RegisterHandler::new(store.clone());
        let issue = IssueHandler::new(store.clone());
        let ret = ReturnHandler::new(store.clone());

        register
            .handle(DeviceNew {
                device_id: 101,
                device_name: "Laptop".to_string(),
                location_id: 1,
                note: None,
            })
            .await
            .expect("registration should succeed");
        issue
            .handle(AssignmentIssue {
                device_id: 101,
                personal_id: 1,
                personal_name: "Ada Lovelace".to_string(),
                issued_at: date(2024, 3, 1),
            })
            .await
            .expect("issue should succeed");
        ret.handle(AssignmentReturn {
            device_id: 101,
            returned_at: date(2024, 3, 5),
        })
        .await
        .expect("return should succeed");

        let open = store.open_assignment(101).await.expect("store should answer");
        assert!(open.is_none());
        let history = store.assignments(101).await.expect("store should answer");
        assert_eq!(history.len(), 1);
    }

    #[derive(Debug, Clone, Copy)]
    enum LoanOp {
        Issue(u32),
        Return(u32),
    }

    fn loan_op() -> impl Strategy<Value = LoanOp> {
        prop_oneof![
            (1u32..=28).prop_map(LoanOp::Issue),
            (1u32..=28).prop_map(LoanOp::Return),
        ]
    }

    proptest! {
        /// Any ordering of issue and return events leaves at most one open
        /// loan and keeps every closed loan's dates ordered.
        #[test]
        fn loan_invariants_hold_under_any_event_order(
            ops in proptest::collection::vec(loan_op(), 0..32)
        ) {
            tokio_test::block_on(async move {
                let store = seeded().await;
                let register = RegisterHandler::new(store.clone());
                let issue = IssueHandler::new(store.clone());
                let ret = ReturnHandler::new(store.clone());

                register
                    .handle(DeviceNew {
                        device_id: 101,
                        device_name: "Laptop".to_string(),
                        location_id: 1,
                        note: None,
                    })
                    .await
                    .expect("registration should succeed");

                for op in ops {
                    // Rejected operations are valid outcomes here.
                    let _ = match op {
                        LoanOp::Issue(day) => {
                            issue
                                .handle(AssignmentIssue {
                                    device_id: 101,
                                    personal_id: 1,
                                    personal_name: "Ada Lovelace".to_string(),
                                    issued_at: date(2024, 3, day),
                                })
                                .await
                        }
                        LoanOp::Return(day) => {
                            ret.handle(AssignmentReturn {
                                device_id: 101,
                                returned_at: date(2024, 3, day),
                            })
                            .await
                        }
                    };

                    let history = store.assignments(101).await.expect("store should answer");
                    let open = history.iter().filter(|a| a.returned_at.is_none()).count();
                    prop_assert!(open <= 1, "more than one open loan in {:?}", history);
                    for loan in &history {
                        if let Some(returned) = loan.returned_at {
                            prop_assert!(
                                returned >= loan.issued_at,
                                "loan dates out of order in {:?}",
                                loan
                            );
                        }
                    }
                }
                Ok(())
            })?;
        }
    }
}
