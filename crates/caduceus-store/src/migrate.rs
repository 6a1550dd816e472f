//! Cross-shard record relocation.
//!
//! When an update moves a record's partition key to the other shard, the
//! record is inserted into the new shard first and deleted from the old
//! shard second, as two independent shard-local transactions. There is no
//! distributed commit: a failure between the two phases leaves the record
//! present in both shards -- a detectable duplicate, reported as
//! [`StoreError::MigrationPartial`] -- rather than in neither. A failure in
//! the first phase leaves the source record untouched and is reported as
//! the retryable [`StoreError::MigrationFailed`].
//!
//! Deleting the source record cascades into its appointments (a patient's
//! through the composite patient key, a staff member's through the staff
//! foreign keys), so the delete transaction captures the derived pairs those
//! appointments influence first and reconciles them afterwards, exactly as a
//! plain delete does.

use caduceus_types::{shard_of, EntityKind, ModelError, Record, ScalarValue, ShardId};

use crate::error::{map_db_err, StoreError};
use crate::maintain;
use crate::shards::ShardSet;
use crate::sql;
use crate::store::DeleteHooks;

/// Where a migration stands; used for tracing, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MigrationPhase {
    /// Nothing written yet.
    Pending,
    /// New-shard insert committed; source record still present.
    CommittedNew,
    /// Source record deleted; migration complete.
    DeletedOld,
}

/// Relocates single records between the two shards.
///
/// Constructed by the record store when an update changes a migratable
/// record's partition key; not part of the public mutation surface.
pub struct CrossShardMigrator<'a> {
    shards: &'a ShardSet,
}

impl<'a> CrossShardMigrator<'a> {
    pub(crate) const fn new(shards: &'a ShardSet) -> Self {
        Self { shards }
    }

    /// Move one record to the shard its new partition key routes to.
    ///
    /// `original` is the row as it exists in the source shard;
    /// `replacement` is the full post-patch record (caller-writable
    /// columns only) destined for the target shard.
    pub(crate) async fn migrate(
        &self,
        kind: EntityKind,
        original: &Record,
        replacement: &Record,
    ) -> Result<(), StoreError> {
        let old_key = kind.partition_key_of(original)?;
        let new_key = kind.partition_key_of(replacement)?;
        let source = shard_of(old_key)?;
        let target = shard_of(new_key)?;
        if source == target {
            return Err(StoreError::MigrationFailed {
                reason: format!(
                    "department {new_key} routes to {target}, same as the source record"
                ),
            });
        }
        tracing::info!(
            entity = %kind, %source, %target,
            phase = ?MigrationPhase::Pending,
            "Starting cross-shard migration"
        );

        self.insert_copy(kind, replacement, target, new_key)
            .await
            .map_err(|err| StoreError::MigrationFailed {
                reason: err.to_string(),
            })?;
        tracing::info!(
            entity = %kind, %source, %target,
            phase = ?MigrationPhase::CommittedNew,
            "New-shard copy committed"
        );

        match self.delete_copy(kind, original, source).await {
            Ok(0) => self.compensate(kind, replacement, source, target).await,
            Ok(_) => {
                tracing::info!(
                    entity = %kind, %source, %target,
                    phase = ?MigrationPhase::DeletedOld,
                    "Cross-shard migration complete"
                );
                Ok(())
            }
            Err(err) => {
                tracing::error!(
                    entity = %kind, %source, %target, error = %err,
                    "Source delete failed after new-shard commit; duplicate left behind"
                );
                Err(StoreError::MigrationPartial {
                    entity: kind,
                    source_shard: source,
                    target,
                    reason: err.to_string(),
                })
            }
        }
    }

    /// Phase one: insert the replacement into the target shard and derive
    /// its dependent state there, in one transaction.
    async fn insert_copy(
        &self,
        kind: EntityKind,
        replacement: &Record,
        target: ShardId,
        new_key: i64,
    ) -> Result<(), StoreError> {
        let mut tx = self.shards.pool(target).begin().await.map_err(map_db_err)?;
        let columns: Vec<&str> = replacement.keys().map(String::as_str).collect();
        let stmt = sql::insert_statement(kind, &columns, None);
        sql::bind_values(kind, sqlx::query(&stmt), replacement)
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;
        match kind {
            EntityKind::Receptionist | EntityKind::Practitioner => {
                maintain::refresh_department_counts(&mut tx, new_key).await?;
            }
            EntityKind::Patient => {
                let patient_id = int_attribute(kind, replacement, "patient_id")?;
                maintain::refresh_scheduling_state(&mut tx, patient_id, new_key).await?;
            }
            _ => {}
        }
        tx.commit().await.map_err(map_db_err)?;
        Ok(())
    }

    /// Phase two: delete the source record by primary key and re-derive
    /// the state it leaves behind, in one transaction.
    ///
    /// The delete cascades into any appointments referencing the record,
    /// so the derived pairs those appointments influence are captured
    /// before the delete and reconciled after it, exactly as a plain
    /// delete does.
    ///
    /// Returns the number of rows deleted; zero means the source record
    /// disappeared between the phases and nothing was re-derived.
    async fn delete_copy(
        &self,
        kind: EntityKind,
        record: &Record,
        shard: ShardId,
    ) -> Result<u64, StoreError> {
        let mut tx = self.shards.pool(shard).begin().await.map_err(map_db_err)?;
        let hooks = DeleteHooks::capture(&mut tx, kind, std::slice::from_ref(record)).await?;

        let pk = kind.primary_key_filter(record)?;
        let stmt = sql::delete_statement(kind, &pk);
        let deleted = sql::bind_values(kind, sqlx::query(&stmt), &pk)
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?
            .rows_affected();
        if deleted == 0 {
            return Ok(0);
        }

        hooks.apply(&mut tx).await?;
        tx.commit().await.map_err(map_db_err)?;
        Ok(deleted)
    }

    /// The source record vanished after the new-shard commit: remove the
    /// copy so the concurrent delete wins, then report the migration as
    /// failed-but-clean.
    async fn compensate(
        &self,
        kind: EntityKind,
        replacement: &Record,
        source: ShardId,
        target: ShardId,
    ) -> Result<(), StoreError> {
        match self.delete_copy(kind, replacement, target).await {
            Ok(_) => Err(StoreError::MigrationFailed {
                reason: "source record disappeared during migration; \
                         new-shard copy removed"
                    .to_owned(),
            }),
            Err(err) => Err(StoreError::MigrationPartial {
                entity: kind,
                source_shard: source,
                target,
                reason: format!(
                    "source record disappeared and removing the new-shard \
                     copy failed: {err}"
                ),
            }),
        }
    }
}

/// Extract a required integer attribute from a record.
pub(crate) fn int_attribute(
    kind: EntityKind,
    record: &Record,
    name: &'static str,
) -> Result<i64, ModelError> {
    record
        .get(name)
        .and_then(ScalarValue::as_int)
        .ok_or_else(|| ModelError::MissingField {
            entity: kind.table(),
            field: name,
        })
}
