use serde_json::Value as JsonValue;

use crate::executor::QueryExecutor;
use crate::key_types::RowKey;
use crate::query_builders::collection::FilteredCollection;
use crate::types::StoreError;

/// Related values of one many-to-many path, grouped by owner key
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelationBatch {
    groups: Vec<(RowKey, Vec<JsonValue>)>,
}

impl RelationBatch {
    /// Group `(owner, value)` pairs. Owners are stable-sorted so values keep
    /// the order the store returned them in; `null` values are dropped.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (RowKey, JsonValue)>) -> Self {
        let mut pairs: Vec<(RowKey, JsonValue)> =
            pairs.into_iter().filter(|(_, v)| !v.is_null()).collect();
        pairs.sort_by(|a, b| a.0.cmp(&b.0));

        let mut groups: Vec<(RowKey, Vec<JsonValue>)> = Vec::new();
        for (owner, value) in pairs {
            match groups.last_mut() {
                Some((last, values)) if *last == owner => values.push(value),
                _ => groups.push((owner, vec![value])),
            }
        }
        Self { groups }
    }

    /// Values linked to `owner`, empty when it has none
    pub fn values_for(&self, owner: &RowKey) -> &[JsonValue] {
        match self.groups.binary_search_by(|(key, _)| key.cmp(owner)) {
            Ok(index) => &self.groups[index].1,
            Err(_) => &[],
        }
    }

    pub fn owner_count(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Fetch every value of `path` for the whole collection in one query.
///
/// Distinct steps are dropped: filters never multiply owner rows, and
/// repeated related values belong to the owner.
pub async fn fetch_relation<E>(
    executor: &E,
    collection: &FilteredCollection,
    primary_key: &str,
    path: &str,
) -> Result<RelationBatch, StoreError>
where
    E: QueryExecutor + ?Sized,
{
    let rows = executor
        .values(&collection.without_distinct(), &[primary_key, path], &[primary_key])
        .await?;
    let fetched = rows.len();
    let batch = RelationBatch::from_pairs(rows.into_iter().filter_map(|mut row| {
        let owner = row.get(primary_key).and_then(RowKey::from_json)?;
        Some((owner, row.remove(path).unwrap_or(JsonValue::Null)))
    }));
    log::trace!(
        "{}.{}: {} related rows for {} owners",
        collection.entity(),
        path,
        fetched,
        batch.owner_count()
    );
    Ok(batch)
}
