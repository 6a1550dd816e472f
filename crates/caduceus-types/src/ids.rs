//! Type-safe identifier wrappers around `i64`.
//!
//! Every entity keeps a strongly-typed ID to prevent accidental mixing of
//! identifiers at compile time. Unlike surrogate UUIDs, these are
//! domain-assigned numbers: employee IDs are exactly six decimal digits and
//! patient IDs exactly four, enforced both here and by CHECK constraints in
//! each shard's schema.

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Generates a newtype wrapper around `i64` with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(pub i64);

        impl $name {
            /// Return the inner `i64` value.
            pub const fn into_inner(self) -> i64 {
                self.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id! {
    /// Identifier for a department; the source of every partition key.
    DepartmentId
}

define_id! {
    /// Identifier for a staff member (receptionist or practitioner).
    EmployeeId
}

define_id! {
    /// Identifier for a patient; unique only within a department.
    PatientId
}

define_id! {
    /// Per-shard auto-assigned identifier for an appointment.
    AppointmentId
}

/// Inclusive bounds for a six-digit employee ID.
const EMPLOYEE_ID_RANGE: (i64, i64) = (100_000, 999_999);

/// Inclusive bounds for a four-digit patient ID.
const PATIENT_ID_RANGE: (i64, i64) = (1_000, 9_999);

impl DepartmentId {
    /// Validate and wrap a department identifier.
    ///
    /// Department IDs feed the shard router directly, so negative values
    /// are rejected here with the same error the router would raise.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidKey`] for negative values.
    pub const fn try_new(value: i64) -> Result<Self, ModelError> {
        if value < 0 {
            return Err(ModelError::InvalidKey(value));
        }
        Ok(Self(value))
    }
}

impl EmployeeId {
    /// Validate and wrap a six-digit employee identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidWidth`] unless the value has exactly
    /// six decimal digits.
    pub const fn try_new(value: i64) -> Result<Self, ModelError> {
        if value < EMPLOYEE_ID_RANGE.0 || value > EMPLOYEE_ID_RANGE.1 {
            return Err(ModelError::InvalidWidth {
                what: "employee ID",
                digits: 6,
                value,
            });
        }
        Ok(Self(value))
    }
}

impl PatientId {
    /// Validate and wrap a four-digit patient identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidWidth`] unless the value has exactly
    /// four decimal digits.
    pub const fn try_new(value: i64) -> Result<Self, ModelError> {
        if value < PATIENT_ID_RANGE.0 || value > PATIENT_ID_RANGE.1 {
            return Err(ModelError::InvalidWidth {
                what: "patient ID",
                digits: 4,
                value,
            });
        }
        Ok(Self(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn employee_id_accepts_six_digits() {
        assert!(EmployeeId::try_new(100_000).is_ok());
        assert!(EmployeeId::try_new(999_999).is_ok());
    }

    #[test]
    fn employee_id_rejects_other_widths() {
        assert!(EmployeeId::try_new(99_999).is_err());
        assert!(EmployeeId::try_new(1_000_000).is_err());
        assert!(EmployeeId::try_new(-123_456).is_err());
    }

    #[test]
    fn patient_id_accepts_four_digits() {
        assert!(PatientId::try_new(1_000).is_ok());
        assert!(PatientId::try_new(9_999).is_ok());
    }

    #[test]
    fn patient_id_rejects_other_widths() {
        assert!(PatientId::try_new(999).is_err());
        assert!(PatientId::try_new(10_000).is_err());
    }

    #[test]
    fn department_id_rejects_negative() {
        assert_eq!(
            DepartmentId::try_new(-1),
            Err(ModelError::InvalidKey(-1)),
        );
        assert!(DepartmentId::try_new(0).is_ok());
    }

    #[test]
    fn id_display_matches_inner() {
        let dept = DepartmentId(42);
        assert_eq!(dept.to_string(), "42");
        assert_eq!(dept.into_inner(), 42);
    }
}
