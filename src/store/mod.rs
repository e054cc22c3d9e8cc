//! Storage adapters: the seam between the CRUD engine and a concrete store.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::config::EntitySchema;
use crate::error::StoreError;
use crate::filter::Predicate;
use crate::query::QueryDescriptor;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// One row as a JSON object keyed by field name.
pub type Record = Map<String, Value>;

/// Executes query descriptors and writes for one backing store.
///
/// Implementations apply predicates, sort, pagination, required includes,
/// include attachment, projection and aggregation exactly as described by the
/// descriptor; nothing is post-filtered by the caller.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Insert one row. Omitted fields take the store default; returns the stored row.
    async fn insert(&self, entity: &EntitySchema, record: &Record) -> Result<Record, StoreError>;

    async fn select(&self, entity: &EntitySchema, query: &QueryDescriptor) -> Result<Vec<Record>, StoreError>;

    /// Distinct count of matching rows of `entity`; sort and pagination are ignored.
    async fn count(&self, entity: &EntitySchema, query: &QueryDescriptor) -> Result<u64, StoreError>;

    /// Apply `patch` to every matching row and return the rows after the change.
    async fn update(
        &self,
        entity: &EntitySchema,
        predicate: &Predicate,
        patch: &Record,
    ) -> Result<Vec<Record>, StoreError>;

    /// Remove every matching row and return the rows as they were.
    async fn delete(&self, entity: &EntitySchema, predicate: &Predicate) -> Result<Vec<Record>, StoreError>;

    /// Insert, or update the row whose `conflict` fields equal those of `record`.
    async fn upsert(
        &self,
        entity: &EntitySchema,
        record: &Record,
        conflict: &[String],
    ) -> Result<Record, StoreError>;
}
