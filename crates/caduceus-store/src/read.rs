//! Federated reads across both shards.
//!
//! A read runs the same filter on shard 0 then shard 1 and concatenates the
//! results, so the merged set is deterministic for a quiescent store. There
//! is no snapshot spanning the shards; each shard answers from its own
//! consistent state. An optional sort field orders the merged set
//! client-side, using the scalar ordering where NULL sorts first.
//!
//! Reads can attach related projections through read-only joins: the
//! department name for staff, patients, and appointments, and the patient
//! and practitioner names for appointments. The association queries
//! ([`FederatedReader::patients_of`], [`FederatedReader::practitioners_for`])
//! walk the derived `patient_of` table.

use sqlx::postgres::PgRow;
use sqlx::Row;

use caduceus_types::{
    shard_of, EntityKind, Filter, ModelError, Record, ScalarValue, ShardId, PARTITION_KEY,
};

use crate::error::{map_db_err, StoreError};
use crate::shards::ShardSet;
use crate::sql;

/// Options shaping a federated read.
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// Attribute to sort the merged result set by, ascending.
    pub order_by: Option<String>,
    /// Whether to attach related-entity projections (department name,
    /// appointment participant names).
    pub include_related: bool,
}

impl ReadOptions {
    /// Sort the merged results by one attribute, ascending.
    #[must_use]
    pub fn with_order_by(mut self, attribute: &str) -> Self {
        self.order_by = Some(attribute.to_owned());
        self
    }

    /// Attach related-entity projections to each record.
    #[must_use]
    pub const fn with_related(mut self) -> Self {
        self.include_related = true;
        self
    }
}

/// Related attributes attached when a read asks for them. All are text.
const fn related_columns(kind: EntityKind) -> &'static [&'static str] {
    match kind {
        EntityKind::Receptionist | EntityKind::Practitioner | EntityKind::Patient => {
            &["department_name"]
        }
        EntityKind::Appointment => &[
            "department_name",
            "patient_first_name",
            "patient_last_name",
            "practitioner_first_name",
            "practitioner_last_name",
        ],
        EntityKind::Department | EntityKind::PatientOf => &[],
    }
}

/// JOIN clauses backing the related projection, keyed on the base alias `t`.
const fn related_joins(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Receptionist | EntityKind::Practitioner | EntityKind::Patient => {
            " LEFT JOIN departments d ON d.department_id = t.department_id"
        }
        EntityKind::Appointment => {
            " LEFT JOIN departments d ON d.department_id = t.department_id \
              LEFT JOIN patients p ON p.patient_id = t.patient_id \
                AND p.department_id = t.department_id \
              LEFT JOIN practitioners pr ON pr.employee_id = t.practitioner_id"
        }
        EntityKind::Department | EntityKind::PatientOf => "",
    }
}

/// SELECT-list fragment for the related projection.
const fn related_select(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Receptionist | EntityKind::Practitioner | EntityKind::Patient => {
            ", d.name AS department_name"
        }
        EntityKind::Appointment => {
            ", d.name AS department_name, \
              p.first_name AS patient_first_name, \
              p.last_name AS patient_last_name, \
              pr.first_name AS practitioner_first_name, \
              pr.last_name AS practitioner_last_name"
        }
        EntityKind::Department | EntityKind::PatientOf => "",
    }
}

/// Read-only access to both shards.
#[derive(Clone)]
pub struct FederatedReader {
    shards: ShardSet,
}

impl FederatedReader {
    /// Create a reader over an existing shard set.
    #[must_use]
    pub const fn new(shards: ShardSet) -> Self {
        Self { shards }
    }

    /// Read all records of an entity matching an equality filter.
    ///
    /// A filter on the partition key is answered by the one shard it
    /// routes to; any other filter fans out to shard 0 then shard 1. The
    /// reported count is the length of the merged set; zero matches is an
    /// empty result, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError`] variants for unknown or ill-typed filter and
    /// sort attributes, and [`StoreError::Sqlx`] on database failure.
    pub async fn read(
        &self,
        kind: EntityKind,
        filter: &Filter,
        options: &ReadOptions,
    ) -> Result<Vec<Record>, StoreError> {
        kind.validate_filter(filter)?;
        if let Some(attribute) = options.order_by.as_deref() {
            check_sortable(kind, attribute, options.include_related)?;
        }

        let mut merged = Vec::new();
        for shard in target_shards(kind, filter)? {
            let mut rows = self.read_shard(shard, kind, filter, options).await?;
            merged.append(&mut rows);
        }
        if let Some(attribute) = options.order_by.as_deref() {
            sort_records(&mut merged, attribute);
        }
        tracing::debug!(entity = %kind, count = merged.len(), "Federated read");
        Ok(merged)
    }

    /// All patients associated with a practitioner through `patient_of`,
    /// from both shards.
    ///
    /// `projection` limits the attributes returned; `None` returns full
    /// patient records.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownField`] for projected attributes the
    /// patient entity does not have, and [`StoreError::Sqlx`] on database
    /// failure.
    pub async fn patients_of(
        &self,
        practitioner_id: i64,
        projection: Option<&[&str]>,
    ) -> Result<Vec<Record>, StoreError> {
        self.association_query(
            EntityKind::Patient,
            "SELECT {cols} FROM patient_of po \
             JOIN patients t ON t.patient_id = po.patient_id \
             WHERE po.practitioner_id = $1",
            practitioner_id,
            projection,
        )
        .await
    }

    /// All practitioners associated with a patient through `patient_of`,
    /// from both shards.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownField`] for projected attributes the
    /// practitioner entity does not have, and [`StoreError::Sqlx`] on
    /// database failure.
    pub async fn practitioners_for(
        &self,
        patient_id: i64,
        projection: Option<&[&str]>,
    ) -> Result<Vec<Record>, StoreError> {
        self.association_query(
            EntityKind::Practitioner,
            "SELECT {cols} FROM patient_of po \
             JOIN practitioners t ON t.employee_id = po.practitioner_id \
             WHERE po.patient_id = $1",
            patient_id,
            projection,
        )
        .await
    }

    /// Run one shard's share of a federated read.
    async fn read_shard(
        &self,
        shard: ShardId,
        kind: EntityKind,
        filter: &Filter,
        options: &ReadOptions,
    ) -> Result<Vec<Record>, StoreError> {
        let pool = self.shards.pool(shard);
        if !options.include_related || related_columns(kind).is_empty() {
            return sql::select_records(pool, kind, filter).await;
        }

        let base_columns: Vec<String> = kind
            .columns()
            .iter()
            .map(|c| format!("t.{}", c.name))
            .collect();
        let stmt = format!(
            "SELECT {}{} FROM {} t{}{}",
            base_columns.join(", "),
            related_select(kind),
            kind.table(),
            related_joins(kind),
            qualified_where(filter),
        );
        let rows = sql::bind_values(kind, sqlx::query(&stmt), filter)
            .fetch_all(pool)
            .await
            .map_err(map_db_err)?;
        rows.iter()
            .map(|row| {
                let mut record = sql::record_from_row(kind, row)?;
                attach_related(kind, row, &mut record)?;
                Ok(record)
            })
            .collect()
    }

    /// Run a `patient_of` walk on both shards with an optional projection.
    async fn association_query(
        &self,
        kind: EntityKind,
        template: &str,
        key: i64,
        projection: Option<&[&str]>,
    ) -> Result<Vec<Record>, StoreError> {
        let columns = projected_columns(kind, projection)?;
        let select_list = columns
            .iter()
            .map(|c| format!("t.{}", c.name))
            .collect::<Vec<_>>()
            .join(", ");
        let stmt = template.replace("{cols}", &select_list);

        let mut merged = Vec::new();
        for shard in ShardId::ALL {
            let rows = sqlx::query(&stmt)
                .bind(key)
                .fetch_all(self.shards.pool(shard))
                .await
                .map_err(map_db_err)?;
            for row in &rows {
                merged.push(record_from_columns(&columns, row)?);
            }
        }
        tracing::debug!(entity = %kind, key, count = merged.len(), "Association query");
        Ok(merged)
    }
}

/// Which shards a filter must consult: one when it pins the partition key,
/// both otherwise.
pub(crate) fn target_shards(kind: EntityKind, filter: &Filter) -> Result<Vec<ShardId>, StoreError> {
    let routed = if kind.column(PARTITION_KEY).is_some() {
        filter.get(PARTITION_KEY).and_then(ScalarValue::as_int)
    } else {
        None
    };
    if let Some(key) = routed {
        return Ok(vec![shard_of(key)?]);
    }
    Ok(ShardId::ALL.to_vec())
}

/// A sort attribute must be a declared column, or a related alias when the
/// related projection is requested.
fn check_sortable(
    kind: EntityKind,
    attribute: &str,
    include_related: bool,
) -> Result<(), ModelError> {
    if kind.column(attribute).is_some() {
        return Ok(());
    }
    if include_related && related_columns(kind).contains(&attribute) {
        return Ok(());
    }
    Err(ModelError::UnknownField {
        entity: kind.table(),
        field: attribute.to_owned(),
    })
}

/// Qualified ` WHERE t.a = $1 AND t.b = $2` fragment for joined selects.
fn qualified_where(filter: &Filter) -> String {
    if filter.is_empty() {
        return String::new();
    }
    let clauses: Vec<String> = filter
        .keys()
        .enumerate()
        .map(|(i, name)| format!("t.{name} = ${}", i.saturating_add(1)))
        .collect();
    format!(" WHERE {}", clauses.join(" AND "))
}

/// Resolve a projection to concrete columns, defaulting to all of them.
fn projected_columns(
    kind: EntityKind,
    projection: Option<&[&str]>,
) -> Result<Vec<&'static caduceus_types::Column>, ModelError> {
    let Some(names) = projection else {
        return Ok(kind.columns().iter().collect());
    };
    names
        .iter()
        .map(|name| {
            kind.column(name).ok_or_else(|| ModelError::UnknownField {
                entity: kind.table(),
                field: (*name).to_owned(),
            })
        })
        .collect()
}

/// Decode only the projected columns of a row.
fn record_from_columns(
    columns: &[&'static caduceus_types::Column],
    row: &PgRow,
) -> Result<Record, StoreError> {
    let mut record = Record::new();
    for column in columns {
        let value = match column.ty {
            caduceus_types::ColumnType::Int => row
                .try_get::<Option<i64>, _>(column.name)?
                .map_or(ScalarValue::Null, ScalarValue::Int),
            caduceus_types::ColumnType::Text => row
                .try_get::<Option<String>, _>(column.name)?
                .map_or(ScalarValue::Null, ScalarValue::Text),
            caduceus_types::ColumnType::Date => row
                .try_get::<Option<chrono::NaiveDate>, _>(column.name)?
                .map_or(ScalarValue::Null, ScalarValue::Date),
            caduceus_types::ColumnType::Time => row
                .try_get::<Option<chrono::NaiveTime>, _>(column.name)?
                .map_or(ScalarValue::Null, ScalarValue::Time),
        };
        record.insert(column.name.to_owned(), value);
    }
    Ok(record)
}

/// Attach the related text attributes of a joined row to a record.
fn attach_related(kind: EntityKind, row: &PgRow, record: &mut Record) -> Result<(), StoreError> {
    for &alias in related_columns(kind) {
        let value = row
            .try_get::<Option<String>, _>(alias)?
            .map_or(ScalarValue::Null, ScalarValue::Text);
        record.insert(alias.to_owned(), value);
    }
    Ok(())
}

/// Sort records by one attribute, ascending; records without it sort first.
fn sort_records(records: &mut [Record], attribute: &str) {
    records.sort_by(|a, b| {
        let left = a.get(attribute).unwrap_or(&ScalarValue::Null);
        let right = b.get(attribute).unwrap_or(&ScalarValue::Null);
        left.cmp(right)
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_puts_missing_values_first() {
        let mut records = vec![
            Record::from([("name".to_owned(), ScalarValue::from("Radiology"))]),
            Record::from([("total_rooms".to_owned(), ScalarValue::Int(4))]),
            Record::from([("name".to_owned(), ScalarValue::from("Oncology"))]),
        ];
        sort_records(&mut records, "name");
        assert!(records.first().is_some_and(|r| !r.contains_key("name")));
        assert_eq!(
            records.get(1).and_then(|r| r.get("name")),
            Some(&ScalarValue::from("Oncology"))
        );
    }

    #[test]
    fn qualified_where_prefixes_the_base_alias() {
        let filter = Filter::from([
            ("department_id".to_owned(), ScalarValue::Int(2)),
            ("notes".to_owned(), ScalarValue::from("follow-up")),
        ]);
        assert_eq!(
            qualified_where(&filter),
            " WHERE t.department_id = $1 AND t.notes = $2"
        );
    }

    #[test]
    fn projection_rejects_unknown_attributes() {
        let err = projected_columns(EntityKind::Patient, Some(&["favorite_color"]));
        assert!(matches!(err, Err(ModelError::UnknownField { .. })));
    }

    #[test]
    fn projection_defaults_to_all_columns() {
        let columns = projected_columns(EntityKind::Practitioner, None);
        assert_eq!(
            columns.map(|c| c.len()).ok(),
            Some(EntityKind::Practitioner.columns().len())
        );
    }

    #[test]
    fn appointments_project_participant_names() {
        assert!(related_columns(EntityKind::Appointment).contains(&"patient_first_name"));
        assert!(related_columns(EntityKind::Department).is_empty());
    }
}
