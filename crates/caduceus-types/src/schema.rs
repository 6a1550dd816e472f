//! Per-entity schema metadata: columns, types, and mutation screening.
//!
//! Each entity declares its columns once, as a typed, exhaustive table.
//! Everything the store does -- create validation, filter validation, patch
//! screening, row decoding -- is driven by these tables, so a column can
//! never be writable in one code path and immutable in another. Derived
//! fields (department staff counts, patient scheduling state) and
//! database-assigned keys are marked `generated` and are never accepted
//! from a caller.

use crate::error::ModelError;
use crate::ids::{DepartmentId, EmployeeId, PatientId};
use crate::value::{Filter, Patch, Record, ScalarValue};

/// The scalar type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// 64-bit integer.
    Int,
    /// Text.
    Text,
    /// Calendar date.
    Date,
    /// Time of day.
    Time,
}

impl ColumnType {
    /// Human-readable name, for error messages.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Int => "integer",
            Self::Text => "text",
            Self::Date => "date",
            Self::Time => "time",
        }
    }

    /// Whether a scalar value is acceptable for this column type.
    ///
    /// `Null` is type-compatible with every column; nullability is a
    /// separate concern handled by the `required` flag and the schema.
    pub const fn accepts(self, value: &ScalarValue) -> bool {
        matches!(
            (self, value),
            (_, ScalarValue::Null)
                | (Self::Int, ScalarValue::Int(_))
                | (Self::Text, ScalarValue::Text(_))
                | (Self::Date, ScalarValue::Date(_))
                | (Self::Time, ScalarValue::Time(_))
        )
    }
}

/// A single column declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    /// Column name, as it appears in both shard schemas.
    pub name: &'static str,
    /// Scalar type.
    pub ty: ColumnType,
    /// Whether a create must supply this column.
    pub required: bool,
    /// Whether an update may patch this column.
    pub mutable: bool,
    /// Whether the value is assigned by the database or the maintainer,
    /// never by a caller.
    pub generated: bool,
}

impl Column {
    const fn new(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            required: true,
            mutable: true,
            generated: false,
        }
    }

    const fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    const fn immutable(mut self) -> Self {
        self.mutable = false;
        self
    }

    const fn generated(mut self) -> Self {
        self.generated = true;
        self.required = false;
        self.mutable = false;
        self
    }
}

/// Column name of the partition key on every partitioned entity.
pub const PARTITION_KEY: &str = "department_id";

const DEPARTMENT_COLUMNS: &[Column] = &[
    Column::new("department_id", ColumnType::Int).immutable(),
    Column::new("name", ColumnType::Text),
    Column::new("total_rooms", ColumnType::Int),
    Column::new("total_practitioners", ColumnType::Int).generated(),
    Column::new("total_receptionists", ColumnType::Int).generated(),
];

const RECEPTIONIST_COLUMNS: &[Column] = &[
    Column::new("employee_id", ColumnType::Int).immutable(),
    Column::new("last_name", ColumnType::Text),
    Column::new("first_name", ColumnType::Text),
    Column::new("department_id", ColumnType::Int),
];

const PRACTITIONER_COLUMNS: &[Column] = &[
    Column::new("employee_id", ColumnType::Int).immutable(),
    Column::new("last_name", ColumnType::Text),
    Column::new("first_name", ColumnType::Text),
    Column::new("license_number", ColumnType::Int),
    Column::new("title", ColumnType::Text),
    Column::new("department_id", ColumnType::Int),
    Column::new("specialty", ColumnType::Text).optional(),
];

const PATIENT_COLUMNS: &[Column] = &[
    Column::new("patient_id", ColumnType::Int).immutable(),
    Column::new("last_name", ColumnType::Text),
    Column::new("first_name", ColumnType::Text),
    Column::new("dob", ColumnType::Date),
    Column::new("gender", ColumnType::Text).optional(),
    Column::new("scheduling_state", ColumnType::Text).generated(),
    Column::new("department_id", ColumnType::Int),
    Column::new("insurance", ColumnType::Text).optional(),
    Column::new("past_procedures", ColumnType::Text).optional(),
    Column::new("notes", ColumnType::Text).optional(),
];

const APPOINTMENT_COLUMNS: &[Column] = &[
    Column::new("appointment_id", ColumnType::Int).generated(),
    Column::new("receptionist_id", ColumnType::Int),
    Column::new("patient_id", ColumnType::Int),
    Column::new("practitioner_id", ColumnType::Int),
    // The appointment's department is pinned to its patient's department
    // by a composite foreign key; relocating an appointment means deleting
    // and recreating it.
    Column::new("department_id", ColumnType::Int).immutable(),
    Column::new("appointment_date", ColumnType::Date),
    Column::new("appointment_time", ColumnType::Time),
    Column::new("notes", ColumnType::Text).optional(),
];

const PATIENT_OF_COLUMNS: &[Column] = &[
    Column::new("patient_id", ColumnType::Int).generated(),
    Column::new("practitioner_id", ColumnType::Int).generated(),
];

/// The entity types held in the shards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// A clinical department; owner of the partition key.
    Department,
    /// Front-desk staff.
    Receptionist,
    /// Licensed clinical staff.
    Practitioner,
    /// A patient, keyed by (patient, department).
    Patient,
    /// A scheduled appointment.
    Appointment,
    /// Derived patient/practitioner association; read-only.
    PatientOf,
}

impl EntityKind {
    /// Table name in both shard schemas.
    pub const fn table(self) -> &'static str {
        match self {
            Self::Department => "departments",
            Self::Receptionist => "receptionists",
            Self::Practitioner => "practitioners",
            Self::Patient => "patients",
            Self::Appointment => "appointments",
            Self::PatientOf => "patient_of",
        }
    }

    /// The full, ordered column table for this entity.
    pub const fn columns(self) -> &'static [Column] {
        match self {
            Self::Department => DEPARTMENT_COLUMNS,
            Self::Receptionist => RECEPTIONIST_COLUMNS,
            Self::Practitioner => PRACTITIONER_COLUMNS,
            Self::Patient => PATIENT_COLUMNS,
            Self::Appointment => APPOINTMENT_COLUMNS,
            Self::PatientOf => PATIENT_OF_COLUMNS,
        }
    }

    /// Whether callers may create/update/delete this entity directly.
    pub const fn writable(self) -> bool {
        !matches!(self, Self::PatientOf)
    }

    /// Whether a partition-key change relocates records of this entity
    /// to another shard.
    ///
    /// Departments' identifiers are immutable, and appointments are pinned
    /// to their patient's department, so only staff and patients migrate.
    pub const fn migratable(self) -> bool {
        matches!(self, Self::Receptionist | Self::Practitioner | Self::Patient)
    }

    /// Primary-key columns of this entity's table.
    ///
    /// Patients are keyed by (patient, department) because one person may
    /// be registered with several departments as distinct records.
    pub const fn primary_key(self) -> &'static [&'static str] {
        match self {
            Self::Department => &["department_id"],
            Self::Receptionist | Self::Practitioner => &["employee_id"],
            Self::Patient => &["patient_id", "department_id"],
            Self::Appointment => &["appointment_id"],
            Self::PatientOf => &["patient_id", "practitioner_id"],
        }
    }

    /// Build an equality filter addressing exactly the row a record came
    /// from, using this entity's primary-key columns.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::MissingField`] if the record lacks any
    /// primary-key attribute.
    pub fn primary_key_filter(self, record: &Record) -> Result<Filter, ModelError> {
        let mut filter = Filter::new();
        for &name in self.primary_key() {
            let value = record.get(name).ok_or_else(|| ModelError::MissingField {
                entity: self.table(),
                field: name,
            })?;
            filter.insert(name.to_owned(), value.clone());
        }
        Ok(filter)
    }

    /// Look up a column by name.
    pub fn column(self, name: &str) -> Option<&'static Column> {
        self.columns().iter().find(|c| c.name == name)
    }

    /// Extract the partition key from a record of this entity.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::MissingField`] if the record has no partition
    /// key, [`ModelError::WrongType`] if it is not an integer, or
    /// [`ModelError::InvalidKey`] if it is negative.
    pub fn partition_key_of(self, record: &Record) -> Result<i64, ModelError> {
        let value = record
            .get(PARTITION_KEY)
            .ok_or_else(|| ModelError::MissingField {
                entity: self.table(),
                field: PARTITION_KEY,
            })?;
        let key = value.as_int().ok_or_else(|| ModelError::WrongType {
            field: PARTITION_KEY.to_owned(),
            expected: "integer",
            actual: value.type_name(),
        })?;
        if key < 0 {
            return Err(ModelError::InvalidKey(key));
        }
        Ok(key)
    }

    /// Validate an equality filter against this entity's columns.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownField`] for attribute names the entity
    /// does not have and [`ModelError::WrongType`] for mismatched value
    /// types. `Null` is rejected because equality filters cannot match it.
    pub fn validate_filter(self, filter: &Filter) -> Result<(), ModelError> {
        for (name, value) in filter {
            let column = self.column(name).ok_or_else(|| ModelError::UnknownField {
                entity: self.table(),
                field: name.clone(),
            })?;
            if value.is_null() || !column.ty.accepts(value) {
                return Err(ModelError::WrongType {
                    field: name.clone(),
                    expected: column.ty.name(),
                    actual: value.type_name(),
                });
            }
        }
        Ok(())
    }

    /// Validate a create record: required fields present, names known,
    /// types correct, and fixed-width identifiers in range.
    ///
    /// Generated columns supplied by the caller are reported back as
    /// skipped rather than rejected, mirroring patch screening.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::NotWritable`] for derived entities, plus the
    /// same errors as [`EntityKind::validate_filter`] and the identifier
    /// width errors from [`crate::ids`].
    pub fn validate_create(self, record: &Record) -> Result<Vec<String>, ModelError> {
        if !self.writable() {
            return Err(ModelError::NotWritable {
                entity: self.table(),
            });
        }

        let mut skipped = Vec::new();
        for (name, value) in record {
            let column = self.column(name).ok_or_else(|| ModelError::UnknownField {
                entity: self.table(),
                field: name.clone(),
            })?;
            if column.generated {
                skipped.push(name.clone());
                continue;
            }
            if !column.ty.accepts(value) {
                return Err(ModelError::WrongType {
                    field: name.clone(),
                    expected: column.ty.name(),
                    actual: value.type_name(),
                });
            }
            if value.is_null() && column.required {
                return Err(ModelError::MissingField {
                    entity: self.table(),
                    field: column.name,
                });
            }
        }

        for column in self.columns() {
            if column.required && !record.contains_key(column.name) {
                return Err(ModelError::MissingField {
                    entity: self.table(),
                    field: column.name,
                });
            }
        }

        check_id_widths(record)?;
        Ok(skipped)
    }

    /// Screen a patch against this entity's mutable-field set.
    ///
    /// Unknown attribute names are errors; known-but-immutable attributes
    /// (identifiers, derived fields) are skipped and reported, never
    /// applied and never fatal. The partition key of a migratable entity
    /// is mutable and survives screening; the caller decides whether its
    /// new value means an in-place write or a migration.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownField`] or [`ModelError::WrongType`].
    pub fn screen_patch(self, patch: &Patch) -> Result<ScreenedPatch, ModelError> {
        let mut applied = Patch::new();
        let mut skipped = Vec::new();
        for (name, value) in patch {
            let column = self.column(name).ok_or_else(|| ModelError::UnknownField {
                entity: self.table(),
                field: name.clone(),
            })?;
            if !column.mutable {
                skipped.push(name.clone());
                continue;
            }
            if !column.ty.accepts(value) {
                return Err(ModelError::WrongType {
                    field: name.clone(),
                    expected: column.ty.name(),
                    actual: value.type_name(),
                });
            }
            if value.is_null() && column.required {
                return Err(ModelError::MissingField {
                    entity: self.table(),
                    field: column.name,
                });
            }
            applied.insert(name.clone(), value.clone());
        }
        check_id_widths(&applied)?;
        Ok(ScreenedPatch { applied, skipped })
    }

}

/// Enforce fixed-width and non-negative identifier rules on whatever
/// identifier attributes a map carries.
fn check_id_widths(values: &Record) -> Result<(), ModelError> {
    if let Some(v) = values.get("employee_id").and_then(ScalarValue::as_int) {
        EmployeeId::try_new(v)?;
    }
    if let Some(v) = values.get("patient_id").and_then(ScalarValue::as_int) {
        PatientId::try_new(v)?;
    }
    if let Some(v) = values.get(PARTITION_KEY).and_then(ScalarValue::as_int) {
        DepartmentId::try_new(v)?;
    }
    Ok(())
}

impl core::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.table())
    }
}

/// Result of screening a patch: the fields that will be applied and the
/// immutable fields that were skipped (to be logged, not applied).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenedPatch {
    /// The surviving, type-checked patch.
    pub applied: Patch,
    /// Names of immutable or generated fields the caller tried to set.
    pub skipped: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ScalarValue;

    fn department_record() -> Record {
        Record::from([
            ("department_id".to_owned(), ScalarValue::Int(2)),
            ("name".to_owned(), ScalarValue::from("Radiology")),
            ("total_rooms".to_owned(), ScalarValue::Int(12)),
        ])
    }

    #[test]
    fn every_partitioned_entity_declares_its_partition_key() {
        for kind in [
            EntityKind::Department,
            EntityKind::Receptionist,
            EntityKind::Practitioner,
            EntityKind::Patient,
            EntityKind::Appointment,
        ] {
            assert!(
                kind.column(PARTITION_KEY).is_some(),
                "{kind} lacks its partition key column"
            );
        }
    }

    #[test]
    fn derived_fields_are_not_settable() {
        let patch = Patch::from([
            ("total_practitioners".to_owned(), ScalarValue::Int(99)),
            ("name".to_owned(), ScalarValue::from("Oncology")),
        ]);
        let screened = EntityKind::Department.screen_patch(&patch);
        let screened = screened.unwrap_or_else(|_| ScreenedPatch {
            applied: Patch::new(),
            skipped: Vec::new(),
        });
        assert_eq!(screened.skipped, vec!["total_practitioners".to_owned()]);
        assert!(screened.applied.contains_key("name"));
    }

    #[test]
    fn scheduling_state_is_immutable() {
        let patch = Patch::from([(
            "scheduling_state".to_owned(),
            ScalarValue::from("Scheduled"),
        )]);
        let screened = EntityKind::Patient.screen_patch(&patch);
        assert!(screened.is_ok_and(|s| s.applied.is_empty() && s.skipped.len() == 1));
    }

    #[test]
    fn appointment_department_is_pinned() {
        let patch = Patch::from([("department_id".to_owned(), ScalarValue::Int(4))]);
        let screened = EntityKind::Appointment.screen_patch(&patch);
        assert!(screened.is_ok_and(|s| s.applied.is_empty()));
    }

    #[test]
    fn staff_department_is_patchable() {
        let patch = Patch::from([("department_id".to_owned(), ScalarValue::Int(4))]);
        let screened = EntityKind::Practitioner.screen_patch(&patch);
        assert!(screened.is_ok_and(|s| s.applied.contains_key("department_id")));
    }

    #[test]
    fn unknown_attribute_is_an_error() {
        let filter = Filter::from([("favorite_color".to_owned(), ScalarValue::from("blue"))]);
        assert!(matches!(
            EntityKind::Patient.validate_filter(&filter),
            Err(ModelError::UnknownField { .. })
        ));
    }

    #[test]
    fn filter_type_mismatch_is_an_error() {
        let filter = Filter::from([("department_id".to_owned(), ScalarValue::from("two"))]);
        assert!(matches!(
            EntityKind::Receptionist.validate_filter(&filter),
            Err(ModelError::WrongType { .. })
        ));
    }

    #[test]
    fn create_requires_all_required_fields() {
        let mut record = department_record();
        record.remove("total_rooms");
        assert!(matches!(
            EntityKind::Department.validate_create(&record),
            Err(ModelError::MissingField {
                field: "total_rooms",
                ..
            })
        ));
    }

    #[test]
    fn create_skips_generated_fields() {
        let mut record = department_record();
        record.insert("total_practitioners".to_owned(), ScalarValue::Int(5));
        let skipped = EntityKind::Department.validate_create(&record);
        assert_eq!(skipped.ok(), Some(vec!["total_practitioners".to_owned()]));
    }

    #[test]
    fn create_enforces_id_widths() {
        let record = Record::from([
            ("employee_id".to_owned(), ScalarValue::Int(12)),
            ("last_name".to_owned(), ScalarValue::from("Okafor")),
            ("first_name".to_owned(), ScalarValue::from("Ada")),
            ("department_id".to_owned(), ScalarValue::Int(2)),
        ]);
        assert!(matches!(
            EntityKind::Receptionist.validate_create(&record),
            Err(ModelError::InvalidWidth { digits: 6, .. })
        ));
    }

    #[test]
    fn derived_association_is_not_writable() {
        assert!(matches!(
            EntityKind::PatientOf.validate_create(&Record::new()),
            Err(ModelError::NotWritable { .. })
        ));
    }

    #[test]
    fn patient_primary_key_is_composite() {
        let record = Record::from([
            ("patient_id".to_owned(), ScalarValue::Int(4321)),
            ("department_id".to_owned(), ScalarValue::Int(7)),
            ("last_name".to_owned(), ScalarValue::from("Varga")),
        ]);
        let filter = EntityKind::Patient.primary_key_filter(&record);
        assert_eq!(
            filter.ok().map(|f| f.len()),
            Some(2),
            "composite key must carry both columns"
        );
    }

    #[test]
    fn primary_key_filter_requires_key_attributes() {
        let record = Record::from([("last_name".to_owned(), ScalarValue::from("Varga"))]);
        assert!(matches!(
            EntityKind::Receptionist.primary_key_filter(&record),
            Err(ModelError::MissingField {
                field: "employee_id",
                ..
            })
        ));
    }

    #[test]
    fn partition_key_extraction_rejects_negatives() {
        let record = Record::from([("department_id".to_owned(), ScalarValue::Int(-3))]);
        assert_eq!(
            EntityKind::Receptionist.partition_key_of(&record),
            Err(ModelError::InvalidKey(-3))
        );
    }
}
