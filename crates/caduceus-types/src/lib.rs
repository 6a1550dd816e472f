//! Shared domain model for the Caduceus sharded clinical-operations store.
//!
//! Clinical records (departments, staff, patients, appointments) are
//! partitioned across two independently-addressable relational shards by the
//! parity of their department identifier. This crate defines everything the
//! data layer needs to reason about those records without touching a
//! database:
//!
//! - [`ids`] -- strongly-typed integer identifiers with fixed-width checks
//! - [`shard`] -- the shard router, the single source of truth for placement
//! - [`value`] -- the scalar attribute value and the record/filter/patch maps
//! - [`schema`] -- per-entity column metadata and mutation screening
//! - [`error`] -- shared model error type
//!
//! The actual persistence lives in `caduceus-store`; this crate is pure and
//! synchronous so routing and screening rules can be tested in isolation.

pub mod error;
pub mod ids;
pub mod schema;
pub mod shard;
pub mod value;

// Re-export primary types for convenience.
pub use error::ModelError;
pub use ids::{AppointmentId, DepartmentId, EmployeeId, PatientId};
pub use schema::{Column, ColumnType, EntityKind, ScreenedPatch, PARTITION_KEY};
pub use shard::{shard_of, ShardId};
pub use value::{Filter, Patch, Record, ScalarValue};
