//! Derived-state maintenance hooks.
//!
//! Three pieces of state are derived, never caller-supplied: department
//! staff counts, patient scheduling state, and the patient/practitioner
//! association table. Each hook recomputes its target from base rows and is
//! idempotent, so callers re-run hooks freely after any mutation that might
//! have touched the inputs. Hooks run on the same connection as the
//! triggering write -- inside its transaction -- so derived state commits or
//! rolls back together with the base change and no statement-ordering
//! window exists where the two disagree.
//!
//! A hook whose target row no longer exists (a department deleted in the
//! same transaction, say) updates zero rows and succeeds.

use sqlx::PgConnection;

use crate::error::{map_db_err, StoreError};

/// `scheduling_state` value for a patient with at least one appointment.
pub const SCHEDULED: &str = "Scheduled";

/// `scheduling_state` value for a patient with no appointments.
pub const UNSCHEDULED: &str = "Unscheduled";

/// Recompute `total_practitioners` and `total_receptionists` for one
/// department from the staff rows currently in this shard.
///
/// # Errors
///
/// Returns [`StoreError::Sqlx`] on database failure.
pub async fn refresh_department_counts(
    conn: &mut PgConnection,
    department_id: i64,
) -> Result<(), StoreError> {
    let updated = sqlx::query(
        "UPDATE departments SET \
         total_practitioners = \
           (SELECT COUNT(*) FROM practitioners WHERE department_id = $1), \
         total_receptionists = \
           (SELECT COUNT(*) FROM receptionists WHERE department_id = $1) \
         WHERE department_id = $1",
    )
    .bind(department_id)
    .execute(&mut *conn)
    .await
    .map_err(map_db_err)?
    .rows_affected();
    tracing::debug!(department_id, updated, "Refreshed department staff counts");
    Ok(())
}

/// Recompute one patient's `scheduling_state` from the appointment rows
/// currently referencing them.
///
/// The patient is addressed by their full composite key; a patient listed
/// under two departments has two independent scheduling states.
///
/// # Errors
///
/// Returns [`StoreError::Sqlx`] on database failure.
pub async fn refresh_scheduling_state(
    conn: &mut PgConnection,
    patient_id: i64,
    department_id: i64,
) -> Result<(), StoreError> {
    let updated = sqlx::query(
        "UPDATE patients SET scheduling_state = CASE WHEN EXISTS \
           (SELECT 1 FROM appointments \
            WHERE patient_id = $1 AND department_id = $2) \
         THEN $3 ELSE $4 END \
         WHERE patient_id = $1 AND department_id = $2",
    )
    .bind(patient_id)
    .bind(department_id)
    .bind(SCHEDULED)
    .bind(UNSCHEDULED)
    .execute(&mut *conn)
    .await
    .map_err(map_db_err)?
    .rows_affected();
    tracing::debug!(patient_id, department_id, updated, "Refreshed scheduling state");
    Ok(())
}

/// Reconcile one `patient_of` association from the appointment rows
/// currently linking the pair.
///
/// Inserts the pair when a linking appointment exists (keeping an existing
/// row is fine), deletes it when none does. Converges to the same state
/// however many times it runs.
///
/// # Errors
///
/// Returns [`StoreError::Sqlx`] on database failure.
pub async fn reconcile_patient_of(
    conn: &mut PgConnection,
    patient_id: i64,
    practitioner_id: i64,
) -> Result<(), StoreError> {
    let linked: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM appointments \
         WHERE patient_id = $1 AND practitioner_id = $2)",
    )
    .bind(patient_id)
    .bind(practitioner_id)
    .fetch_one(&mut *conn)
    .await
    .map_err(map_db_err)?;

    if linked {
        sqlx::query(
            "INSERT INTO patient_of (patient_id, practitioner_id) \
             VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(patient_id)
        .bind(practitioner_id)
        .execute(&mut *conn)
        .await
        .map_err(map_db_err)?;
    } else {
        sqlx::query(
            "DELETE FROM patient_of \
             WHERE patient_id = $1 AND practitioner_id = $2",
        )
        .bind(patient_id)
        .bind(practitioner_id)
        .execute(&mut *conn)
        .await
        .map_err(map_db_err)?;
    }
    tracing::debug!(patient_id, practitioner_id, linked, "Reconciled patient_of");
    Ok(())
}
