//! Parameterized SQL fragment construction and row decoding.
//!
//! All statements are assembled from schema metadata: attribute names are
//! validated against an entity's column table before any SQL is built, so
//! only declared column names ever reach a statement, and every value
//! travels as a bind parameter. Filters and patches iterate in `BTreeMap`
//! order, which keeps placeholder numbering and bind order in lockstep.

use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{Postgres, Row};

use caduceus_types::{Column, ColumnType, EntityKind, Filter, Record, ScalarValue};

use crate::error::{map_db_err, StoreError};

/// Comma-separated list of an entity's columns, for SELECT and RETURNING.
pub(crate) fn column_list(kind: EntityKind) -> String {
    kind.columns()
        .iter()
        .map(|c| c.name)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Build a ` WHERE a = $n AND b = $n+1` fragment for an equality filter.
///
/// Returns an empty string for an empty filter. `first_placeholder` lets
/// the fragment follow a SET list that already consumed placeholders.
pub(crate) fn where_clause(filter: &Filter, first_placeholder: usize) -> String {
    if filter.is_empty() {
        return String::new();
    }
    let clauses: Vec<String> = filter
        .keys()
        .enumerate()
        .map(|(i, name)| format!("{name} = ${}", first_placeholder.saturating_add(i)))
        .collect();
    format!(" WHERE {}", clauses.join(" AND "))
}

/// Build an `INSERT INTO t (a, b) VALUES ($1, $2)` statement for the given
/// attribute names, optionally with a RETURNING list.
pub(crate) fn insert_statement(
    kind: EntityKind,
    columns: &[&str],
    returning: Option<&str>,
) -> String {
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${i}")).collect();
    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        kind.table(),
        columns.join(", "),
        placeholders.join(", ")
    );
    if let Some(cols) = returning {
        sql.push_str(" RETURNING ");
        sql.push_str(cols);
    }
    sql
}

/// Build an `UPDATE t SET a = $1, b = $2 WHERE ...` statement; the WHERE
/// placeholders continue where the SET list stopped.
pub(crate) fn update_statement(kind: EntityKind, set_columns: &[&str], filter: &Filter) -> String {
    let assignments: Vec<String> = set_columns
        .iter()
        .enumerate()
        .map(|(i, name)| format!("{name} = ${}", i.saturating_add(1)))
        .collect();
    format!(
        "UPDATE {} SET {}{}",
        kind.table(),
        assignments.join(", "),
        where_clause(filter, set_columns.len().saturating_add(1))
    )
}

/// Build a `DELETE FROM t WHERE ...` statement.
pub(crate) fn delete_statement(kind: EntityKind, filter: &Filter) -> String {
    format!("DELETE FROM {}{}", kind.table(), where_clause(filter, 1))
}

/// Bind one scalar value, using the column type to give NULL a concrete
/// parameter type `PostgreSQL` can infer.
pub(crate) fn bind_scalar<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &'q ScalarValue,
    ty: ColumnType,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        ScalarValue::Int(v) => query.bind(*v),
        ScalarValue::Text(s) => query.bind(s.as_str()),
        ScalarValue::Date(d) => query.bind(*d),
        ScalarValue::Time(t) => query.bind(*t),
        ScalarValue::Null => match ty {
            ColumnType::Int => query.bind(Option::<i64>::None),
            ColumnType::Text => query.bind(Option::<String>::None),
            ColumnType::Date => query.bind(Option::<chrono::NaiveDate>::None),
            ColumnType::Time => query.bind(Option::<chrono::NaiveTime>::None),
        },
    }
}

/// Bind every value of an attribute map in iteration order.
pub(crate) fn bind_values<'q>(
    kind: EntityKind,
    mut query: Query<'q, Postgres, PgArguments>,
    values: &'q Filter,
) -> Query<'q, Postgres, PgArguments> {
    for (name, value) in values {
        let ty = kind.column(name).map_or(ColumnType::Text, |c| c.ty);
        query = bind_scalar(query, value, ty);
    }
    query
}

/// Decode one declared column from a row.
fn decode_column(row: &PgRow, column: &Column) -> Result<ScalarValue, StoreError> {
    let value = match column.ty {
        ColumnType::Int => row
            .try_get::<Option<i64>, _>(column.name)?
            .map_or(ScalarValue::Null, ScalarValue::Int),
        ColumnType::Text => row
            .try_get::<Option<String>, _>(column.name)?
            .map_or(ScalarValue::Null, ScalarValue::Text),
        ColumnType::Date => row
            .try_get::<Option<chrono::NaiveDate>, _>(column.name)?
            .map_or(ScalarValue::Null, ScalarValue::Date),
        ColumnType::Time => row
            .try_get::<Option<chrono::NaiveTime>, _>(column.name)?
            .map_or(ScalarValue::Null, ScalarValue::Time),
    };
    Ok(value)
}

/// Decode a full row into a [`Record`] using the entity's column table.
pub(crate) fn record_from_row(kind: EntityKind, row: &PgRow) -> Result<Record, StoreError> {
    let mut record = Record::new();
    for column in kind.columns() {
        record.insert(column.name.to_owned(), decode_column(row, column)?);
    }
    Ok(record)
}

/// Select all records of an entity matching a filter, on one executor
/// (a pool for plain reads, a transaction connection for mutations).
pub(crate) async fn select_records<'e, E>(
    executor: E,
    kind: EntityKind,
    filter: &Filter,
) -> Result<Vec<Record>, StoreError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let sql = format!(
        "SELECT {} FROM {}{}",
        column_list(kind),
        kind.table(),
        where_clause(filter, 1)
    );
    let query = bind_values(kind, sqlx::query(&sql), filter);
    let rows = query.fetch_all(executor).await.map_err(map_db_err)?;
    rows.iter().map(|row| record_from_row(kind, row)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn where_clause_numbers_placeholders_in_key_order() {
        let filter = Filter::from([
            ("department_id".to_owned(), ScalarValue::Int(2)),
            ("last_name".to_owned(), ScalarValue::from("Okafor")),
        ]);
        assert_eq!(
            where_clause(&filter, 1),
            " WHERE department_id = $1 AND last_name = $2"
        );
    }

    #[test]
    fn where_clause_honors_placeholder_offset() {
        let filter = Filter::from([("employee_id".to_owned(), ScalarValue::Int(123_456))]);
        assert_eq!(where_clause(&filter, 4), " WHERE employee_id = $4");
    }

    #[test]
    fn empty_filter_means_no_where() {
        assert_eq!(where_clause(&Filter::new(), 1), "");
    }

    #[test]
    fn insert_statement_shape() {
        let sql = insert_statement(
            EntityKind::Department,
            &["department_id", "name", "total_rooms"],
            None,
        );
        assert_eq!(
            sql,
            "INSERT INTO departments (department_id, name, total_rooms) \
             VALUES ($1, $2, $3)"
        );
    }

    #[test]
    fn insert_statement_with_returning() {
        let sql = insert_statement(EntityKind::Appointment, &["notes"], Some("appointment_id"));
        assert!(sql.ends_with("RETURNING appointment_id"));
    }

    #[test]
    fn update_statement_continues_placeholders_into_where() {
        let filter = Filter::from([("employee_id".to_owned(), ScalarValue::Int(123_456))]);
        let sql = update_statement(EntityKind::Receptionist, &["first_name", "last_name"], &filter);
        assert_eq!(
            sql,
            "UPDATE receptionists SET first_name = $1, last_name = $2 \
             WHERE employee_id = $3"
        );
    }

    #[test]
    fn delete_statement_shape() {
        let filter = Filter::from([("department_id".to_owned(), ScalarValue::Int(8))]);
        assert_eq!(
            delete_statement(EntityKind::Patient, &filter),
            "DELETE FROM patients WHERE department_id = $1"
        );
    }

    #[test]
    fn column_list_matches_declared_order() {
        assert_eq!(
            column_list(EntityKind::PatientOf),
            "patient_id, practitioner_id"
        );
    }
}
