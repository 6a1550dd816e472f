//! Error types for the data layer.
//!
//! The taxonomy mirrors what a caller can act on: constraint violations are
//! rolled back in their shard and reported by rule name; a failed migration
//! insert leaves the source untouched and is retryable; a failed migration
//! delete leaves a detectable duplicate that must be surfaced, never
//! silently repaired. Zero matches is not an error anywhere -- operations
//! report match counts instead.

use caduceus_types::{EntityKind, ModelError, ShardId};

/// Errors that can occur in the data layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A record, filter, or patch failed model-level validation.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// A uniqueness, foreign-key, check, or not-null rule was violated.
    ///
    /// The triggering write was rolled back in its shard only.
    #[error("constraint violated: {which}")]
    ConstraintViolation {
        /// Name of the violated rule, as declared in the shard schema.
        which: String,
    },

    /// A cross-shard migration aborted before touching the source record.
    ///
    /// Fully recoverable: the original record is unchanged and the
    /// operation may be retried.
    #[error("migration failed, source record untouched: {reason}")]
    MigrationFailed {
        /// Why the new-shard insert did not commit.
        reason: String,
    },

    /// A migration committed its new-shard insert but failed to delete the
    /// source record, so the record now exists in both shards.
    ///
    /// Requires explicit reconciliation (or a retried delete); never
    /// resolved automatically.
    #[error(
        "migration of {entity} left a duplicate: committed to {target}, \
         delete from {source_shard} failed: {reason}"
    )]
    MigrationPartial {
        /// The migrated entity type.
        entity: EntityKind,
        /// Shard still holding the original record.
        source_shard: ShardId,
        /// Shard holding the committed copy.
        target: ShardId,
        /// Why the source delete failed.
        reason: String,
    },

    /// A `PostgreSQL` operation failed for a non-constraint reason.
    #[error("PostgreSQL error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// A schema migration failed on one of the shards.
    #[error("schema migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Map a [`sqlx::Error`] to [`StoreError`], surfacing constraint-class
/// database errors as [`StoreError::ConstraintViolation`] named after the
/// violated constraint.
pub(crate) fn map_db_err(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(ref db) = err {
        match db.kind() {
            sqlx::error::ErrorKind::UniqueViolation
            | sqlx::error::ErrorKind::ForeignKeyViolation
            | sqlx::error::ErrorKind::NotNullViolation
            | sqlx::error::ErrorKind::CheckViolation => {
                let which = db
                    .constraint()
                    .map_or_else(|| db.message().to_owned(), str::to_owned);
                return StoreError::ConstraintViolation { which };
            }
            _ => {}
        }
    }
    StoreError::Sqlx(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migration_partial_names_both_shards() {
        let err = StoreError::MigrationPartial {
            entity: EntityKind::Practitioner,
            source_shard: ShardId::One,
            target: ShardId::Zero,
            reason: "connection reset".to_owned(),
        };
        let text = err.to_string();
        assert!(text.contains("practitioners"));
        assert!(text.contains("shard 0"));
        assert!(text.contains("shard 1"));
    }

    #[test]
    fn model_errors_pass_through() {
        let err = StoreError::from(ModelError::InvalidKey(-7));
        assert!(err.to_string().contains("-7"));
    }
}
