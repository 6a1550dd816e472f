//! Per-entity CRUD with shard-local transactions.
//!
//! Every mutation routes to exactly one shard through the partition key and
//! runs inside one transaction on that shard: the base write, the
//! derived-state hooks, and (for creates) the readback of the persisted row
//! commit or roll back together. The single exception is an update that
//! moves a record's partition key to the other shard, which is handed to
//! the [`CrossShardMigrator`] and runs as two independent transactions.
//!
//! Updates and deletes report how many records matched; zero is an ordinary
//! result, not an error. Patch attributes outside an entity's mutable set
//! are skipped and logged, never fatal.

use std::collections::BTreeSet;

use sqlx::{PgConnection, Postgres, Row, Transaction};

use caduceus_types::{
    shard_of, EntityKind, Filter, ModelError, Patch, Record, ScalarValue, ShardId, PARTITION_KEY,
};

use crate::error::{map_db_err, StoreError};
use crate::maintain;
use crate::migrate::{int_attribute, CrossShardMigrator};
use crate::read::{target_shards, FederatedReader};
use crate::shards::ShardSet;
use crate::sql;

/// The mutation surface over both shards.
#[derive(Clone)]
pub struct RecordStore {
    shards: ShardSet,
}

impl RecordStore {
    /// Create a store over an existing shard set.
    #[must_use]
    pub const fn new(shards: ShardSet) -> Self {
        Self { shards }
    }

    /// A federated reader sharing this store's pools.
    #[must_use]
    pub fn reader(&self) -> FederatedReader {
        FederatedReader::new(self.shards.clone())
    }

    /// The underlying shard set.
    #[must_use]
    pub const fn shards(&self) -> &ShardSet {
        &self.shards
    }

    /// Create one record on the shard its partition key routes to.
    ///
    /// Generated attributes in the input are skipped and logged. The
    /// insert, the derived-state hooks, and the readback share one
    /// transaction; the returned record carries every database-assigned
    /// and derived column.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError`] variants for invalid input and
    /// [`StoreError::ConstraintViolation`] when the shard rejects the row,
    /// naming the violated rule.
    pub async fn create(&self, kind: EntityKind, record: &Record) -> Result<Record, StoreError> {
        let skipped = kind.validate_create(record)?;
        if !skipped.is_empty() {
            tracing::warn!(entity = %kind, fields = ?skipped, "Skipping generated attributes");
        }
        let key = kind.partition_key_of(record)?;
        let shard = shard_of(key)?;
        let writable = writable_subset(kind, record);

        let mut tx = self.shards.pool(shard).begin().await.map_err(map_db_err)?;
        let pk_filter = insert_record(&mut tx, kind, &writable).await?;
        derive_after_create(&mut tx, kind, &writable, key).await?;
        let rows = sql::select_records(&mut *tx, kind, &pk_filter).await?;
        let persisted = rows
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Sqlx(sqlx::Error::RowNotFound))?;
        tx.commit().await.map_err(map_db_err)?;
        tracing::info!(entity = %kind, %shard, "Created record");
        Ok(persisted)
    }

    /// Update every record matching an equality filter.
    ///
    /// Patch attributes outside the entity's mutable set are skipped and
    /// logged. Matches staying on their shard are patched in place, one
    /// transaction per shard, with derived state recomputed alongside. A
    /// match whose new partition key routes to the other shard is handed
    /// to the cross-shard migrator instead. Returns the total match count
    /// across both shards.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError`] variants for invalid input,
    /// [`StoreError::ConstraintViolation`] for rejected writes, and the
    /// migration errors described in [`crate::migrate`].
    pub async fn update(
        &self,
        kind: EntityKind,
        filter: &Filter,
        patch: &Patch,
    ) -> Result<u64, StoreError> {
        require_writable(kind)?;
        kind.validate_filter(filter)?;
        let screened = kind.screen_patch(patch)?;
        if !screened.skipped.is_empty() {
            tracing::warn!(
                entity = %kind,
                fields = ?screened.skipped,
                "Skipping immutable attributes in patch"
            );
        }

        let mut matched: u64 = 0;
        let mut migrating: Vec<Record> = Vec::new();
        for shard in target_shards(kind, filter)? {
            let records = sql::select_records(self.shards.pool(shard), kind, filter).await?;
            let mut in_place = Vec::new();
            for record in records {
                matched = matched.saturating_add(1);
                if needs_migration(kind, &record, &screened.applied)? {
                    migrating.push(record);
                } else {
                    in_place.push(record);
                }
            }
            if !in_place.is_empty() && !screened.applied.is_empty() {
                self.update_in_place(shard, kind, &in_place, &screened.applied)
                    .await?;
            }
        }

        let migrator = CrossShardMigrator::new(&self.shards);
        for record in &migrating {
            let replacement = patched_replacement(kind, record, &screened.applied);
            migrator.migrate(kind, record, &replacement).await?;
        }
        tracing::debug!(entity = %kind, matched, migrated = migrating.len(), "Update complete");
        Ok(matched)
    }

    /// Delete every record matching an equality filter.
    ///
    /// Each shard's matches are deleted in one transaction on that shard.
    /// Referential actions cascade within the shard: a department delete
    /// takes its staff, patients, and their appointments with it. Derived
    /// state the deleted rows influenced -- including state reached only
    /// through those cascades -- is recomputed before the commit. Returns
    /// the total match count across both shards.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError`] variants for invalid input and
    /// [`StoreError::Sqlx`] on database failure.
    pub async fn delete(&self, kind: EntityKind, filter: &Filter) -> Result<u64, StoreError> {
        require_writable(kind)?;
        kind.validate_filter(filter)?;
        let mut total: u64 = 0;
        for shard in target_shards(kind, filter)? {
            total = total.saturating_add(self.delete_in_shard(shard, kind, filter).await?);
        }
        tracing::debug!(entity = %kind, total, "Delete complete");
        Ok(total)
    }

    /// Patch a set of same-shard records in one transaction.
    async fn update_in_place(
        &self,
        shard: ShardId,
        kind: EntityKind,
        records: &[Record],
        applied: &Patch,
    ) -> Result<(), StoreError> {
        let mut tx = self.shards.pool(shard).begin().await.map_err(map_db_err)?;
        let set_columns: Vec<&str> = applied.keys().map(String::as_str).collect();
        for record in records {
            let pk = kind.primary_key_filter(record)?;
            let stmt = sql::update_statement(kind, &set_columns, &pk);
            let query = sql::bind_values(kind, sqlx::query(&stmt), applied);
            sql::bind_values(kind, query, &pk)
                .execute(&mut *tx)
                .await
                .map_err(map_db_err)?;
            derive_after_update(&mut tx, kind, record, applied).await?;
        }
        tx.commit().await.map_err(map_db_err)?;
        Ok(())
    }

    /// Delete one shard's matches and re-derive what they influenced.
    async fn delete_in_shard(
        &self,
        shard: ShardId,
        kind: EntityKind,
        filter: &Filter,
    ) -> Result<u64, StoreError> {
        let mut tx = self.shards.pool(shard).begin().await.map_err(map_db_err)?;
        let matches = sql::select_records(&mut *tx, kind, filter).await?;
        if matches.is_empty() {
            return Ok(0);
        }
        let hooks = DeleteHooks::capture(&mut tx, kind, &matches).await?;
        let stmt = sql::delete_statement(kind, filter);
        let deleted = sql::bind_values(kind, sqlx::query(&stmt), filter)
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?
            .rows_affected();
        hooks.apply(&mut tx).await?;
        tx.commit().await.map_err(map_db_err)?;
        tracing::info!(entity = %kind, %shard, deleted, "Deleted records");
        Ok(deleted)
    }
}

/// Derived state a batch of deletions influences, captured before the
/// cascade makes it unreachable. Shared with the cross-shard migrator,
/// whose source delete cascades the same way a plain delete does.
///
/// The sets may over-approximate; every hook is idempotent, so reconciling
/// an untouched pair is a no-op.
#[derive(Default)]
pub(crate) struct DeleteHooks {
    /// Departments whose staff counts need recomputing.
    departments: BTreeSet<i64>,
    /// (patient, department) pairs whose scheduling state needs recomputing.
    scheduling: BTreeSet<(i64, i64)>,
    /// (patient, practitioner) pairs whose association needs reconciling.
    associations: BTreeSet<(i64, i64)>,
}

impl DeleteHooks {
    pub(crate) async fn capture(
        tx: &mut Transaction<'_, Postgres>,
        kind: EntityKind,
        matches: &[Record],
    ) -> Result<Self, StoreError> {
        let mut hooks = Self::default();
        match kind {
            EntityKind::Receptionist => {
                hooks.capture_staff_departments(kind, matches)?;
                let ids = int_column(kind, matches, "employee_id")?;
                hooks
                    .capture_appointments_by(tx, "receptionist_id", &ids, true)
                    .await?;
            }
            EntityKind::Practitioner => {
                hooks.capture_staff_departments(kind, matches)?;
                let ids = int_column(kind, matches, "employee_id")?;
                // patient_of rows referencing these practitioners cascade
                // away with them; only scheduling state needs recomputing.
                hooks
                    .capture_appointments_by(tx, "practitioner_id", &ids, false)
                    .await?;
            }
            EntityKind::Patient => {
                let ids = int_column(kind, matches, "patient_id")?;
                let pairs: Vec<(i64, i64)> = sqlx::query_as(
                    "SELECT DISTINCT patient_id, practitioner_id \
                     FROM appointments WHERE patient_id = ANY($1)",
                )
                .bind(&ids)
                .fetch_all(&mut **tx)
                .await
                .map_err(map_db_err)?;
                hooks.associations.extend(pairs);
            }
            EntityKind::Appointment => {
                for record in matches {
                    let patient = int_attribute(kind, record, "patient_id")?;
                    let department = kind.partition_key_of(record)?;
                    let practitioner = int_attribute(kind, record, "practitioner_id")?;
                    hooks.scheduling.insert((patient, department));
                    hooks.associations.insert((patient, practitioner));
                }
            }
            EntityKind::Department => {
                // The delete cascades to the department's staff and
                // patients, and through them to every appointment any of
                // them touch -- including appointments of patients in
                // other departments of this shard, whose scheduling state
                // and surviving associations would otherwise go stale.
                let ids = int_column(kind, matches, "department_id")?;
                let rows: Vec<(i64, i64, i64)> = sqlx::query_as(
                    "SELECT DISTINCT patient_id, department_id, practitioner_id \
                     FROM appointments \
                     WHERE department_id = ANY($1) \
                        OR receptionist_id IN (SELECT employee_id FROM receptionists \
                           WHERE department_id = ANY($1)) \
                        OR practitioner_id IN (SELECT employee_id FROM practitioners \
                           WHERE department_id = ANY($1))",
                )
                .bind(&ids)
                .fetch_all(&mut **tx)
                .await
                .map_err(map_db_err)?;
                for (patient, department, practitioner) in rows {
                    hooks.scheduling.insert((patient, department));
                    hooks.associations.insert((patient, practitioner));
                }
            }
            EntityKind::PatientOf => {}
        }
        Ok(hooks)
    }

    fn capture_staff_departments(
        &mut self,
        kind: EntityKind,
        matches: &[Record],
    ) -> Result<(), StoreError> {
        for record in matches {
            self.departments.insert(kind.partition_key_of(record)?);
        }
        Ok(())
    }

    /// Capture the (patient, department) and optionally the
    /// (patient, practitioner) pairs of appointments referencing a set of
    /// staff identifiers, before those appointments cascade away.
    async fn capture_appointments_by(
        &mut self,
        tx: &mut Transaction<'_, Postgres>,
        column: &str,
        staff_ids: &[i64],
        with_associations: bool,
    ) -> Result<(), StoreError> {
        let stmt = format!(
            "SELECT DISTINCT patient_id, department_id, practitioner_id \
             FROM appointments WHERE {column} = ANY($1)"
        );
        let rows: Vec<(i64, i64, i64)> = sqlx::query_as(&stmt)
            .bind(staff_ids)
            .fetch_all(&mut **tx)
            .await
            .map_err(map_db_err)?;
        for (patient, department, practitioner) in rows {
            self.scheduling.insert((patient, department));
            if with_associations {
                self.associations.insert((patient, practitioner));
            }
        }
        Ok(())
    }

    pub(crate) async fn apply(&self, tx: &mut Transaction<'_, Postgres>) -> Result<(), StoreError> {
        for &department in &self.departments {
            maintain::refresh_department_counts(tx, department).await?;
        }
        for &(patient, department) in &self.scheduling {
            maintain::refresh_scheduling_state(tx, patient, department).await?;
        }
        for &(patient, practitioner) in &self.associations {
            maintain::reconcile_patient_of(tx, patient, practitioner).await?;
        }
        Ok(())
    }
}

/// Insert one record and return a filter addressing the persisted row.
async fn insert_record(
    tx: &mut Transaction<'_, Postgres>,
    kind: EntityKind,
    writable: &Record,
) -> Result<Filter, StoreError> {
    let columns: Vec<&str> = writable.keys().map(String::as_str).collect();
    if kind == EntityKind::Appointment {
        let stmt = sql::insert_statement(kind, &columns, Some("appointment_id"));
        let row = sql::bind_values(kind, sqlx::query(&stmt), writable)
            .fetch_one(&mut **tx)
            .await
            .map_err(map_db_err)?;
        let id: i64 = row.try_get("appointment_id")?;
        Ok(Filter::from([(
            "appointment_id".to_owned(),
            ScalarValue::Int(id),
        )]))
    } else {
        let stmt = sql::insert_statement(kind, &columns, None);
        sql::bind_values(kind, sqlx::query(&stmt), writable)
            .execute(&mut **tx)
            .await
            .map_err(map_db_err)?;
        kind.primary_key_filter(writable).map_err(StoreError::from)
    }
}

/// Re-derive the state a fresh record influences.
async fn derive_after_create(
    conn: &mut PgConnection,
    kind: EntityKind,
    record: &Record,
    partition_key: i64,
) -> Result<(), StoreError> {
    match kind {
        EntityKind::Receptionist | EntityKind::Practitioner => {
            maintain::refresh_department_counts(conn, partition_key).await?;
        }
        EntityKind::Patient => {
            let patient = int_attribute(kind, record, "patient_id")?;
            maintain::refresh_scheduling_state(conn, patient, partition_key).await?;
        }
        EntityKind::Appointment => {
            let patient = int_attribute(kind, record, "patient_id")?;
            let practitioner = int_attribute(kind, record, "practitioner_id")?;
            maintain::refresh_scheduling_state(conn, patient, partition_key).await?;
            maintain::reconcile_patient_of(conn, patient, practitioner).await?;
        }
        EntityKind::Department | EntityKind::PatientOf => {}
    }
    Ok(())
}

/// Re-derive the state a same-shard patch influences.
async fn derive_after_update(
    conn: &mut PgConnection,
    kind: EntityKind,
    original: &Record,
    applied: &Patch,
) -> Result<(), StoreError> {
    match kind {
        EntityKind::Receptionist | EntityKind::Practitioner => {
            let old_key = kind.partition_key_of(original)?;
            match applied.get(PARTITION_KEY).and_then(ScalarValue::as_int) {
                Some(new_key) if new_key != old_key => {
                    maintain::refresh_department_counts(conn, old_key).await?;
                    maintain::refresh_department_counts(conn, new_key).await?;
                }
                _ => {}
            }
        }
        EntityKind::Patient => {
            // A same-shard department change carries the patient's
            // appointments along through the cascading composite key.
            let old_key = kind.partition_key_of(original)?;
            let patient = int_attribute(kind, original, "patient_id")?;
            match applied.get(PARTITION_KEY).and_then(ScalarValue::as_int) {
                Some(new_key) if new_key != old_key => {
                    maintain::refresh_scheduling_state(conn, patient, new_key).await?;
                }
                _ => {}
            }
        }
        EntityKind::Appointment => {
            let department = kind.partition_key_of(original)?;
            let old_patient = int_attribute(kind, original, "patient_id")?;
            let old_practitioner = int_attribute(kind, original, "practitioner_id")?;
            let new_patient = applied
                .get("patient_id")
                .and_then(ScalarValue::as_int)
                .unwrap_or(old_patient);
            let new_practitioner = applied
                .get("practitioner_id")
                .and_then(ScalarValue::as_int)
                .unwrap_or(old_practitioner);
            for patient in BTreeSet::from([old_patient, new_patient]) {
                maintain::refresh_scheduling_state(conn, patient, department).await?;
            }
            let pairs = BTreeSet::from([
                (old_patient, old_practitioner),
                (old_patient, new_practitioner),
                (new_patient, old_practitioner),
                (new_patient, new_practitioner),
            ]);
            for (patient, practitioner) in pairs {
                maintain::reconcile_patient_of(conn, patient, practitioner).await?;
            }
        }
        EntityKind::Department | EntityKind::PatientOf => {}
    }
    Ok(())
}

/// Reject mutations of derived entities.
const fn require_writable(kind: EntityKind) -> Result<(), ModelError> {
    if kind.writable() {
        Ok(())
    } else {
        Err(ModelError::NotWritable {
            entity: kind.table(),
        })
    }
}

/// The caller-writable subset of a record (generated columns dropped).
fn writable_subset(kind: EntityKind, record: &Record) -> Record {
    record
        .iter()
        .filter(|(name, _)| kind.column(name).is_some_and(|c| !c.generated))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// Whether a patched record would route to the other shard.
fn needs_migration(
    kind: EntityKind,
    record: &Record,
    applied: &Patch,
) -> Result<bool, StoreError> {
    if !kind.migratable() {
        return Ok(false);
    }
    let Some(new_key) = applied.get(PARTITION_KEY).and_then(ScalarValue::as_int) else {
        return Ok(false);
    };
    let old_key = kind.partition_key_of(record)?;
    Ok(shard_of(new_key)? != shard_of(old_key)?)
}

/// The full post-patch record destined for the target shard.
fn patched_replacement(kind: EntityKind, original: &Record, applied: &Patch) -> Record {
    let mut replacement = writable_subset(kind, original);
    for (name, value) in applied {
        replacement.insert(name.clone(), value.clone());
    }
    replacement
}

/// Pull one integer column out of a batch of records.
fn int_column(
    kind: EntityKind,
    records: &[Record],
    name: &'static str,
) -> Result<Vec<i64>, StoreError> {
    records
        .iter()
        .map(|record| int_attribute(kind, record, name).map_err(StoreError::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receptionist(employee_id: i64, department_id: i64) -> Record {
        Record::from([
            ("employee_id".to_owned(), ScalarValue::Int(employee_id)),
            ("last_name".to_owned(), ScalarValue::from("Okafor")),
            ("first_name".to_owned(), ScalarValue::from("Ada")),
            ("department_id".to_owned(), ScalarValue::Int(department_id)),
        ])
    }

    #[test]
    fn parity_change_triggers_migration() {
        let record = receptionist(123_456, 1);
        let patch = Patch::from([("department_id".to_owned(), ScalarValue::Int(2))]);
        assert_eq!(
            needs_migration(EntityKind::Receptionist, &record, &patch).ok(),
            Some(true)
        );
    }

    #[test]
    fn same_parity_change_stays_in_place() {
        let record = receptionist(123_456, 1);
        let patch = Patch::from([("department_id".to_owned(), ScalarValue::Int(3))]);
        assert_eq!(
            needs_migration(EntityKind::Receptionist, &record, &patch).ok(),
            Some(false)
        );
    }

    #[test]
    fn non_migratable_entities_never_migrate() {
        let record = Record::from([("department_id".to_owned(), ScalarValue::Int(1))]);
        let patch = Patch::from([("department_id".to_owned(), ScalarValue::Int(2))]);
        assert_eq!(
            needs_migration(EntityKind::Department, &record, &patch).ok(),
            Some(false)
        );
    }

    #[test]
    fn replacement_overlays_patch_and_drops_generated() {
        let mut original = receptionist(123_456, 1);
        original.insert("last_name".to_owned(), ScalarValue::from("Okafor"));
        let patch = Patch::from([("department_id".to_owned(), ScalarValue::Int(2))]);
        let replacement = patched_replacement(EntityKind::Receptionist, &original, &patch);
        assert_eq!(replacement.get("department_id"), Some(&ScalarValue::Int(2)));
        assert_eq!(
            replacement.get("last_name"),
            Some(&ScalarValue::from("Okafor"))
        );
    }

    #[test]
    fn patient_replacement_never_carries_scheduling_state() {
        let original = Record::from([
            ("patient_id".to_owned(), ScalarValue::Int(4321)),
            ("department_id".to_owned(), ScalarValue::Int(1)),
            ("scheduling_state".to_owned(), ScalarValue::from("Scheduled")),
        ]);
        let patch = Patch::from([("department_id".to_owned(), ScalarValue::Int(2))]);
        let replacement = patched_replacement(EntityKind::Patient, &original, &patch);
        assert!(!replacement.contains_key("scheduling_state"));
    }

    #[test]
    fn derived_entities_reject_mutation() {
        assert!(require_writable(EntityKind::PatientOf).is_err());
        assert!(require_writable(EntityKind::Appointment).is_ok());
    }
}
