//! Store collaborators that evaluate filtered collections

pub mod memory;
pub mod sql;

pub use memory::MemoryStore;
pub use sql::SeaOrmExecutor;

use async_trait::async_trait;

use crate::query_builders::FilteredCollection;
use crate::types::{Row, StoreError};

/// Evaluates collections against a relational store.
///
/// Implementations must not reinterpret store failures: whatever the store
/// raises is returned as-is.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Project `fields` (field paths) for every row of `collection`.
    ///
    /// A path through a many-to-many relation yields one row per related
    /// value and no row for owners without any. Rows are sorted by
    /// `order_by` when it is non-empty.
    async fn values(
        &self,
        collection: &FilteredCollection,
        fields: &[&str],
        order_by: &[&str],
    ) -> Result<Vec<Row>, StoreError>;

    /// Number of entities in `collection`
    async fn count(&self, collection: &FilteredCollection) -> Result<u64, StoreError>;
}

#[async_trait]
impl<T: QueryExecutor + ?Sized> QueryExecutor for &T {
    async fn values(
        &self,
        collection: &FilteredCollection,
        fields: &[&str],
        order_by: &[&str],
    ) -> Result<Vec<Row>, StoreError> {
        (**self).values(collection, fields, order_by).await
    }

    async fn count(&self, collection: &FilteredCollection) -> Result<u64, StoreError> {
        (**self).count(collection).await
    }
}
