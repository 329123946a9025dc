//! `PostgreSQL` implementation of the depot inventory store.
//!
//! This crate provides [`PostgresStore`], the production implementation of
//! the `InventoryStore` trait from `depot-core`. All concurrency control is
//! pushed into the database, since the ingestion pipeline and the
//! synchronous request path share rows but no memory:
//!
//! - Issuing a loan is a single `INSERT` guarded by the partial unique index
//!   `assignment_open_unique`; two racing issues for one device cannot both
//!   succeed, regardless of which path they arrive on.
//! - Closing a loan locks the open row with `SELECT ... FOR UPDATE` inside a
//!   transaction, so the "current open assignment" cannot change between
//!   being resolved and being updated.
//! - Registration resolves the device-type name and inserts the device in
//!   one statement.
//!
//! Constraint violations are translated into the business rejections from
//! `depot_core::store::Rejection`; everything else surfaces as a backend
//! fault. The schema lives in `migrations/` and is applied with
//! [`PostgresStore::migrate`].
//!
//! # Example
//!
//! ```ignore
//! use depot_postgres::PostgresStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresStore::connect("postgres://localhost/depot").await?;
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use depot_core::inventory::{
    Assignment, Device, Grade, IssueRequest, NewDevice, NewGrade, ReturnRequest,
};
use depot_core::store::{InventoryStore, Rejection, StoreError, StoreResult};
use sqlx::error::ErrorKind;
use sqlx::postgres::{PgPool, PgPoolOptions};

type DeviceRow = (i64, i32, i32, Option<String>);
type AssignmentRow = (i64, i64, i32, NaiveDate, Option<NaiveDate>);
type GradeRow = (i64, i64, i64, String, DateTime<Utc>);

fn device_from_row((serial_number, type_id, location_id, note): DeviceRow) -> Device {
    Device {
        serial_number,
        type_id,
        location_id,
        note,
    }
}

fn assignment_from_row(
    (assignment_id, device_id, person_id, issued_at, returned_at): AssignmentRow,
) -> Assignment {
    Assignment {
        assignment_id,
        device_id,
        person_id,
        issued_at,
        returned_at,
    }
}

fn grade_from_row((grade_id, student_id, module_id, grade_value, recorded_at): GradeRow) -> Grade {
    Grade {
        grade_id,
        student_id,
        module_id,
        grade_value,
        recorded_at,
    }
}

fn backend(context: &str, e: &sqlx::Error) -> StoreError {
    StoreError::Backend(format!("{context}: {e}"))
}

/// Constraint-level detail of a database error, if there is any.
fn violation(e: &sqlx::Error) -> Option<(ErrorKind, Option<&str>)> {
    match e {
        sqlx::Error::Database(db) => Some((db.kind(), db.constraint())),
        _ => None,
    }
}

/// PostgreSQL-backed inventory store.
///
/// Holds a connection pool; cloning is cheap and all clones share it.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a store over an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to the database and create a store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the connection cannot be
    /// established.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Backend(format!("failed to connect: {e}")))?;

        Ok(Self::new(pool))
    }

    /// Apply pending schema migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("migration failed: {e}")))?;
        Ok(())
    }

    /// The underlying connection pool.
    ///
    /// Useful for seeding reference data or running custom queries.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl InventoryStore for PostgresStore {
    async fn register_device(&self, device: NewDevice) -> StoreResult<Device> {
        // INSERT..SELECT resolves the type name in the same statement; zero
        // rows means the name did not match any device type.
        let inserted: Option<DeviceRow> = sqlx::query_as(
            "INSERT INTO device (serial_number, type_id, location_id, note)
             SELECT $1, dt.type_id, $3, $4
             FROM device_type dt
             WHERE dt.type_name = $2
             RETURNING serial_number, type_id, location_id, note",
        )
        .bind(device.serial_number)
        .bind(&device.type_name)
        .bind(device.location_id)
        .bind(device.note.as_deref())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| match violation(&e) {
            Some((ErrorKind::UniqueViolation, _)) => Rejection::DeviceExists {
                serial: device.serial_number,
            }
            .into(),
            Some((ErrorKind::ForeignKeyViolation, _)) => Rejection::UnknownLocation {
                id: device.location_id,
            }
            .into(),
            _ => backend("register device", &e),
        })?;

        let Some(row) = inserted else {
            return Err(Rejection::UnknownDeviceType {
                name: device.type_name,
            }
            .into());
        };

        tracing::debug!(serial = row.0, "device registered");
        Ok(device_from_row(row))
    }

    async fn issue_assignment(&self, request: IssueRequest) -> StoreResult<Assignment> {
        // Single statement; the partial unique index turns a concurrent
        // second issue into a unique violation instead of a lost update.
        let row: AssignmentRow = sqlx::query_as(
            "INSERT INTO assignment (device_id, person_id, issued_at)
             VALUES ($1, $2, $3)
             RETURNING assignment_id, device_id, person_id, issued_at, returned_at",
        )
        .bind(request.device_id)
        .bind(request.person_id)
        .bind(request.issued_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match violation(&e) {
            Some((ErrorKind::UniqueViolation, _)) => Rejection::AlreadyOnLoan {
                serial: request.device_id,
            }
            .into(),
            Some((ErrorKind::ForeignKeyViolation, Some(constraint)))
                if constraint.contains("person") =>
            {
                Rejection::UnknownPerson {
                    id: request.person_id,
                }
                .into()
            },
            Some((ErrorKind::ForeignKeyViolation, _)) => Rejection::UnknownDevice {
                serial: request.device_id,
            }
            .into(),
            _ => backend("issue assignment", &e),
        })?;

        tracing::debug!(
            serial = request.device_id,
            person = request.person_id,
            "assignment opened"
        );
        Ok(assignment_from_row(row))
    }

    async fn return_assignment(&self, request: ReturnRequest) -> StoreResult<Assignment> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| backend("begin return", &e))?;

        // Lock the open row so a concurrent issue or return on the same
        // device serializes behind this transaction. The partial unique
        // index guarantees at most one row matches.
        let open: Option<AssignmentRow> = sqlx::query_as(
            "SELECT assignment_id, device_id, person_id, issued_at, returned_at
             FROM assignment
             WHERE device_id = $1 AND returned_at IS NULL
             FOR UPDATE",
        )
        .bind(request.device_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| backend("resolve open assignment", &e))?;

        let Some((assignment_id, _, _, issued_at, _)) = open else {
            return Err(Rejection::NoOpenLoan {
                serial: request.device_id,
            }
            .into());
        };

        if request.returned_at < issued_at {
            return Err(Rejection::ReturnBeforeIssue {
                serial: request.device_id,
                issued: issued_at,
                returned: request.returned_at,
            }
            .into());
        }

        let row: AssignmentRow = sqlx::query_as(
            "UPDATE assignment SET returned_at = $1
             WHERE assignment_id = $2
             RETURNING assignment_id, device_id, person_id, issued_at, returned_at",
        )
        .bind(request.returned_at)
        .bind(assignment_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| backend("close assignment", &e))?;

        tx.commit()
            .await
            .map_err(|e| backend("commit return", &e))?;

        tracing::debug!(serial = request.device_id, "assignment closed");
        Ok(assignment_from_row(row))
    }

    async fn record_grade(&self, grade: NewGrade) -> StoreResult<Grade> {
        let row: GradeRow = sqlx::query_as(
            "INSERT INTO grade (student_id, module_id, grade_value)
             VALUES ($1, $2, $3)
             RETURNING grade_id, student_id, module_id, grade_value, recorded_at",
        )
        .bind(grade.student_id)
        .bind(grade.module_id)
        .bind(&grade.grade_value)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| backend("record grade", &e))?;

        tracing::debug!(
            student = grade.student_id,
            module = grade.module_id,
            "grade recorded"
        );
        Ok(grade_from_row(row))
    }

    async fn device(&self, serial_number: i64) -> StoreResult<Option<Device>> {
        let row: Option<DeviceRow> = sqlx::query_as(
            "SELECT serial_number, type_id, location_id, note
             FROM device
             WHERE serial_number = $1",
        )
        .bind(serial_number)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| backend("fetch device", &e))?;

        Ok(row.map(device_from_row))
    }

    async fn open_assignment(&self, device_id: i64) -> StoreResult<Option<Assignment>> {
        let row: Option<AssignmentRow> = sqlx::query_as(
            "SELECT assignment_id, device_id, person_id, issued_at, returned_at
             FROM assignment
             WHERE device_id = $1 AND returned_at IS NULL",
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| backend("fetch open assignment", &e))?;

        Ok(row.map(assignment_from_row))
    }

    async fn assignments(&self, device_id: i64) -> StoreResult<Vec<Assignment>> {
        let rows: Vec<AssignmentRow> = sqlx::query_as(
            "SELECT assignment_id, device_id, person_id, issued_at, returned_at
             FROM assignment
             WHERE device_id = $1
             ORDER BY issued_at, assignment_id",
        )
        .bind(device_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| backend("list assignments", &e))?;

        Ok(rows.into_iter().map(assignment_from_row).collect())
    }

    async fn grades(&self, student_id: i64) -> StoreResult<Vec<Grade>> {
        let rows: Vec<GradeRow> = sqlx::query_as(
            "SELECT grade_id, student_id, module_id, grade_value, recorded_at
             FROM grade
             WHERE student_id = $1
             ORDER BY recorded_at, grade_id",
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| backend("list grades", &e))?;

        Ok(rows.into_iter().map(grade_from_row).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Integration tests against a live database are in the tests/ directory.

    #[test]
    fn row_mapping_preserves_fields() {
        let device = device_from_row((101, 2, 5, Some("spare charger".to_string())));
        assert_eq!(device.serial_number, 101);
        assert_eq!(device.type_id, 2);
        assert_eq!(device.location_id, 5);
        assert_eq!(device.note.as_deref(), Some("spare charger"));
    }

    #[test]
    #[allow(clippy::expect_used)] // Panics: test dates are hard-coded and valid
    fn open_assignment_row_has_no_return_date() {
        let issued = NaiveDate::from_ymd_opt(2024, 3, 1).expect("valid test date");
        let assignment = assignment_from_row((1, 101, 7, issued, None));
        assert!(assignment.is_open());
        assert_eq!(assignment.issued_at, issued);
    }
}
