//! In-process store of JSON rows and link tables

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::entity_metadata::{
    EntityMetadata, EntityMetadataProvider, RelationKind, ResolvedPath, StaticMetadata,
};
use crate::executor::QueryExecutor;
use crate::key_types::RowKey;
use crate::query_builders::FilteredCollection;
use crate::types::{
    json_type_name, FieldOp, Predicate, QueryStep, RefractionError, RefractionResult, Row,
    StoreError,
};

/// Rows held in memory, evaluated with the same lookup semantics as the SQL
/// backend: relation filters test for existence, exclusions are exact
/// complements, and many-to-many projections behave like inner joins.
#[derive(Debug, Clone)]
pub struct MemoryStore<M = StaticMetadata> {
    metadata: M,
    tables: HashMap<&'static str, Vec<Row>>,
    // (entity, relation) -> (owner key, target key) in insertion order
    links: HashMap<(&'static str, &'static str), Vec<(RowKey, RowKey)>>,
}

impl<M: EntityMetadataProvider> MemoryStore<M> {
    pub fn new(metadata: M) -> Self {
        Self {
            metadata,
            tables: HashMap::new(),
            links: HashMap::new(),
        }
    }

    pub fn metadata(&self) -> &M {
        &self.metadata
    }

    /// Add one row. The row must be a JSON object carrying the primary key.
    pub fn insert(&mut self, entity: &str, row: JsonValue) -> RefractionResult<()> {
        let meta = self.metadata.entity(entity)?;
        let JsonValue::Object(row) = row else {
            return Err(RefractionError::invalid_metadata(
                meta.name,
                format!("row must be a mapping, got {}", json_type_name(&row)),
            ));
        };
        if row
            .get(meta.primary_key_field)
            .and_then(RowKey::from_json)
            .is_none()
        {
            return Err(RefractionError::invalid_metadata(
                meta.name,
                format!("row is missing primary key '{}'", meta.primary_key_field),
            ));
        }
        let name = meta.name;
        self.tables.entry(name).or_default().push(row);
        Ok(())
    }

    /// Link an owner row to a target row through a many-to-many relation
    pub fn link(
        &mut self,
        entity: &str,
        relation: &str,
        owner: impl Into<RowKey>,
        target: impl Into<RowKey>,
    ) -> RefractionResult<()> {
        let meta = self.metadata.entity(entity)?;
        let descriptor = meta
            .relation(relation)
            .filter(|r| r.kind == RelationKind::ManyToMany)
            .ok_or_else(|| RefractionError::unknown_field(meta.name, relation))?;
        let key = (meta.name, descriptor.name);
        self.links
            .entry(key)
            .or_default()
            .push((owner.into(), target.into()));
        Ok(())
    }

    fn rows(&self, entity: &str) -> &[Row] {
        self.tables.get(entity).map(Vec::as_slice).unwrap_or(&[])
    }

    fn find_by_key(&self, meta: &EntityMetadata, key: &RowKey) -> Option<&Row> {
        self.rows(meta.name).iter().find(|row| {
            row.get(meta.primary_key_field)
                .and_then(RowKey::from_json)
                .as_ref()
                == Some(key)
        })
    }

    /// All values a path takes for one row
    fn path_values(
        &self,
        meta: &EntityMetadata,
        row: &Row,
        resolved: &ResolvedPath<'_>,
    ) -> Vec<JsonValue> {
        match resolved {
            ResolvedPath::Column(field) => {
                vec![row.get(field.name).cloned().unwrap_or(JsonValue::Null)]
            }
            ResolvedPath::ForeignKey {
                relation,
                target,
                field,
            } => {
                let stored = relation
                    .column
                    .and_then(|c| row.get(c))
                    .cloned()
                    .unwrap_or(JsonValue::Null);
                let Some(field) = field else {
                    return vec![stored];
                };
                let value = RowKey::from_json(&stored)
                    .and_then(|key| self.find_by_key(target, &key))
                    .and_then(|target_row| target_row.get(field.name).cloned())
                    .unwrap_or(JsonValue::Null);
                vec![value]
            }
            ResolvedPath::ManyToMany {
                relation,
                target,
                field,
            } => {
                let Some(owner) = row
                    .get(meta.primary_key_field)
                    .and_then(RowKey::from_json)
                else {
                    return Vec::new();
                };
                let links = self
                    .links
                    .get(&(meta.name, relation.name))
                    .map(Vec::as_slice)
                    .unwrap_or(&[]);
                links
                    .iter()
                    .filter(|(o, _)| *o == owner)
                    .filter_map(|(_, target_key)| match field {
                        None => Some(target_key.to_json()),
                        Some(field) => self
                            .find_by_key(target, target_key)
                            .map(|t| t.get(field.name).cloned().unwrap_or(JsonValue::Null)),
                    })
                    .collect()
            }
        }
    }

    fn matches(
        &self,
        meta: &EntityMetadata,
        row: &Row,
        predicate: &Predicate,
    ) -> RefractionResult<bool> {
        let resolved = self.metadata.resolve_path(meta.name, &predicate.path)?;
        let candidates = self.path_values(meta, row, &resolved);

        if predicate.op == FieldOp::IsNull {
            let expected = predicate.value.as_bool().ok_or_else(|| {
                StoreError::Custom(format!(
                    "'{}' expects a boolean, got {}",
                    predicate.lookup_expr(),
                    predicate.value
                ))
            })?;
            return Ok(candidates.iter().all(JsonValue::is_null) == expected);
        }

        for candidate in &candidates {
            if lookup_matches(predicate, candidate)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn evaluate(&self, collection: &FilteredCollection) -> RefractionResult<Vec<&Row>> {
        let meta = self.metadata.entity(collection.entity())?;
        let mut rows: Vec<&Row> = self.rows(meta.name).iter().collect();
        for step in collection.steps() {
            let (predicate, negated) = match step {
                QueryStep::Filter(p) => (p, false),
                QueryStep::Exclude(p) => (p, true),
                // Existence semantics never duplicate rows
                QueryStep::Distinct => continue,
            };
            let mut kept = Vec::with_capacity(rows.len());
            for row in rows {
                if self.matches(meta, row, predicate)? != negated {
                    kept.push(row);
                }
            }
            rows = kept;
        }
        Ok(rows)
    }

    fn project(
        &self,
        collection: &FilteredCollection,
        fields: &[&str],
        order_by: &[&str],
    ) -> RefractionResult<Vec<Row>> {
        let meta = self.metadata.entity(collection.entity())?;
        let resolved_fields = fields
            .iter()
            .map(|f| self.metadata.resolve_path(meta.name, f))
            .collect::<RefractionResult<Vec<_>>>()?;
        let resolved_order = order_by
            .iter()
            .map(|f| self.metadata.resolve_path(meta.name, f))
            .collect::<RefractionResult<Vec<_>>>()?;

        let mut out: Vec<(Vec<JsonValue>, Row)> = Vec::new();
        for row in self.evaluate(collection)? {
            // Cartesian product over multi-valued paths
            let mut partials: Vec<Row> = vec![Row::new()];
            for (name, resolved) in fields.iter().zip(&resolved_fields) {
                let values = self.path_values(meta, row, resolved);
                let mut next = Vec::with_capacity(partials.len() * values.len());
                for partial in &partials {
                    for value in &values {
                        let mut extended = partial.clone();
                        extended.insert((*name).to_string(), value.clone());
                        next.push(extended);
                    }
                }
                partials = next;
            }
            for partial in partials {
                let sort_key = order_by
                    .iter()
                    .zip(&resolved_order)
                    .map(|(name, resolved)| match partial.get(*name) {
                        Some(v) => v.clone(),
                        None => self
                            .path_values(meta, row, resolved)
                            .into_iter()
                            .next()
                            .unwrap_or(JsonValue::Null),
                    })
                    .collect();
                out.push((sort_key, partial));
            }
        }

        if !order_by.is_empty() {
            out.sort_by(|(a, _), (b, _)| {
                a.iter()
                    .zip(b)
                    .map(|(x, y)| compare_for_sort(x, y))
                    .find(|o| *o != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            });
        }

        let mut rows: Vec<Row> = out.into_iter().map(|(_, row)| row).collect();
        if collection.is_distinct() {
            let mut seen: HashSet<String> = HashSet::with_capacity(rows.len());
            let mut unique: Vec<Row> = Vec::with_capacity(rows.len());
            for row in rows {
                let key = serde_json::to_string(&row)
                    .map_err(|e| StoreError::Custom(e.to_string()))?;
                if seen.insert(key) {
                    unique.push(row);
                }
            }
            rows = unique;
        }
        Ok(rows)
    }
}

#[async_trait]
impl<M> QueryExecutor for MemoryStore<M>
where
    M: EntityMetadataProvider + Send + Sync,
{
    async fn values(
        &self,
        collection: &FilteredCollection,
        fields: &[&str],
        order_by: &[&str],
    ) -> Result<Vec<Row>, StoreError> {
        Ok(self.project(collection, fields, order_by)?)
    }

    async fn count(&self, collection: &FilteredCollection) -> Result<u64, StoreError> {
        Ok(self.evaluate(collection)?.len() as u64)
    }
}

fn lookup_matches(predicate: &Predicate, candidate: &JsonValue) -> Result<bool, StoreError> {
    let value = &predicate.value;
    Ok(match predicate.op {
        FieldOp::Exact => json_eq(candidate, value),
        FieldOp::IExact => match (candidate.as_str(), value.as_str()) {
            (Some(c), Some(v)) => c.to_lowercase() == v.to_lowercase(),
            _ => json_eq(candidate, value),
        },
        FieldOp::Contains | FieldOp::IContains | FieldOp::StartsWith | FieldOp::EndsWith => {
            let Some(haystack) = candidate.as_str() else {
                return Ok(false);
            };
            let needle = match value.as_str() {
                Some(s) => s.to_string(),
                None => value.to_string(),
            };
            match predicate.op {
                FieldOp::Contains => haystack.contains(&needle),
                FieldOp::IContains => haystack.to_lowercase().contains(&needle.to_lowercase()),
                FieldOp::StartsWith => haystack.starts_with(&needle),
                _ => haystack.ends_with(&needle),
            }
        }
        FieldOp::In => {
            let items = value.as_array().ok_or_else(|| {
                StoreError::Custom(format!(
                    "'{}' expects a list, got {}",
                    predicate.lookup_expr(),
                    json_type_name(value)
                ))
            })?;
            items.iter().any(|item| json_eq(candidate, item))
        }
        FieldOp::Gt => compare_json(candidate, value) == Some(Ordering::Greater),
        FieldOp::Gte => matches!(
            compare_json(candidate, value),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        FieldOp::Lt => compare_json(candidate, value) == Some(Ordering::Less),
        FieldOp::Lte => matches!(
            compare_json(candidate, value),
            Some(Ordering::Less | Ordering::Equal)
        ),
        FieldOp::IsNull => candidate.is_null() == value.as_bool().unwrap_or(false),
    })
}

fn json_eq(a: &JsonValue, b: &JsonValue) -> bool {
    match (a, b) {
        (JsonValue::Number(x), JsonValue::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn compare_json(a: &JsonValue, b: &JsonValue) -> Option<Ordering> {
    match (a, b) {
        (JsonValue::Number(x), JsonValue::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (JsonValue::String(x), JsonValue::String(y)) => Some(x.cmp(y)),
        (JsonValue::Bool(x), JsonValue::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

// Nulls sort first, mismatched types keep their relative order
fn compare_for_sort(a: &JsonValue, b: &JsonValue) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => compare_json(a, b).unwrap_or(Ordering::Equal),
    }
}
