//! Two-shard `PostgreSQL` data layer for the Caduceus clinical-operations
//! store.
//!
//! Records are partitioned across two structurally identical `PostgreSQL`
//! schemas by the parity of their department identifier. Each shard is an
//! independent store with its own pool and its own transactions; nothing
//! spans both shards atomically.
//!
//! # Architecture
//!
//! ```text
//! Caller (external command layer)
//!     |
//!     +-- create/update/delete --> RecordStore
//!     |       |-- shard_of()             route to one shard
//!     |       |-- shard-local txn        mutate + re-derive, then commit
//!     |       +-- CrossShardMigrator     when the partition key moves
//!     |
//!     +-- read ------------------> FederatedReader
//!             |-- shard 0 query
//!             +-- shard 1 query          concatenated, optionally sorted
//! ```
//!
//! # Modules
//!
//! - [`shards`] -- connection pools and configuration for both shards
//! - [`store`] -- per-entity CRUD with shard-local transactions
//! - [`maintain`] -- derived-state maintenance hooks (counts, scheduling
//!   state, patient/practitioner associations)
//! - [`migrate`] -- cross-shard record relocation
//! - [`read`] -- federated reads with related-entity projections
//! - [`sql`] -- parameterized SQL fragment construction and row decoding
//! - [`error`] -- shared error types
//!
//! Uses [`sqlx`] with runtime query construction (not compile-time checked)
//! to avoid requiring a live database at build time. All queries are
//! parameterized to prevent SQL injection.

pub mod error;
pub mod maintain;
pub mod migrate;
pub mod read;
pub mod shards;
pub mod sql;
pub mod store;

// Re-export primary types for convenience.
pub use error::StoreError;
pub use read::{FederatedReader, ReadOptions};
pub use shards::{ShardSet, ShardsConfig};
pub use store::RecordStore;
