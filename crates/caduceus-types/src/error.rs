//! Error types for the domain model.
//!
//! [`ModelError`] covers everything that can be rejected before a query is
//! ever issued: malformed partition keys, unknown attribute names, missing
//! required fields, and fixed-width identifier violations. Database-side
//! failures live in the store crate's error type.

/// Errors raised while validating records, filters, and partition keys.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    /// A partition key was negative or otherwise unroutable.
    #[error("invalid partition key: {0} (must be a non-negative integer)")]
    InvalidKey(i64),

    /// An attribute name does not exist on the target entity.
    #[error("unknown attribute `{field}` on {entity}")]
    UnknownField {
        /// Table name of the entity.
        entity: &'static str,
        /// The offending attribute name.
        field: String,
    },

    /// A required attribute was absent from a create record.
    #[error("missing required attribute `{field}` on {entity}")]
    MissingField {
        /// Table name of the entity.
        entity: &'static str,
        /// The absent attribute name.
        field: &'static str,
    },

    /// An attribute value has the wrong scalar type for its column.
    #[error("attribute `{field}` expects {expected}, got {actual}")]
    WrongType {
        /// The attribute name.
        field: String,
        /// Human-readable name of the expected scalar type.
        expected: &'static str,
        /// Human-readable name of the supplied scalar type.
        actual: &'static str,
    },

    /// A fixed-width identifier has the wrong number of decimal digits.
    #[error("{what} must be exactly {digits} digits, got {value}")]
    InvalidWidth {
        /// What kind of identifier was rejected.
        what: &'static str,
        /// The required decimal digit count.
        digits: u32,
        /// The rejected value.
        value: i64,
    },

    /// The entity is derived and cannot be written directly.
    #[error("{entity} is derived from appointment history and is not writable")]
    NotWritable {
        /// Table name of the derived entity.
        entity: &'static str,
    },
}
