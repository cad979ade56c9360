use serde_json::Value as JsonValue;
use tokio::sync::OnceCell;

use crate::entity_metadata::EntityMetadataProvider;
use crate::executor::QueryExecutor;
use crate::key_types::RowKey;
use crate::query_builders::collection::FilteredCollection;
use crate::query_builders::projection::{
    Conversion, ConversionRegistry, ExtraField, FieldProjection, Projection, ProjectionMapping,
    RelationField,
};
use crate::query_builders::relation_fetcher::{fetch_relation, RelationBatch};
use crate::types::{Record, RefractionError, RefractionResult};

/// Serializes a whole collection with one values query plus one query per
/// many-to-many relation, however many rows the collection holds.
pub struct BulkSerializer<'a, E: ?Sized, M: ?Sized> {
    pub executor: &'a E,
    pub metadata: &'a M,
    pub conversions: &'a ConversionRegistry,
}

impl<'a, E, M> BulkSerializer<'a, E, M>
where
    E: QueryExecutor + ?Sized,
    M: EntityMetadataProvider + ?Sized,
{
    pub fn new(executor: &'a E, metadata: &'a M, conversions: &'a ConversionRegistry) -> Self {
        Self {
            executor,
            metadata,
            conversions,
        }
    }

    pub async fn serialize_projection(
        &self,
        collection: &FilteredCollection,
        projection: &Projection,
    ) -> RefractionResult<Vec<Record>> {
        self.serialize(
            collection,
            &projection.mapping,
            &projection.relations,
            &projection.extras,
        )
        .await
    }

    pub async fn serialize(
        &self,
        collection: &FilteredCollection,
        mapping: &ProjectionMapping,
        relations: &[RelationField],
        extras: &[ExtraField],
    ) -> RefractionResult<Vec<Record>> {
        let meta = self.metadata.entity(collection.entity())?;
        let primary_key = meta.primary_key_field;
        if !mapping.contains_path(primary_key) {
            return Err(RefractionError::MissingPrimaryKeyMapping {
                entity: meta.name.to_string(),
                primary_key: primary_key.to_string(),
            });
        }
        let fields = self.resolve_conversions(mapping)?;

        let paths = mapping.paths();
        // One output row per base row: mapped paths cross foreign keys only
        for path in &paths {
            if self.metadata.resolve_path(meta.name, path)?.is_many_valued() {
                return Err(RefractionError::ManyValuedMapping {
                    entity: meta.name.to_string(),
                    path: path.to_string(),
                });
            }
        }
        let order_by: &[&str] = if relations.is_empty() {
            &[]
        } else {
            &[primary_key]
        };
        let rows = self.executor.values(collection, &paths, order_by).await?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        // Filled on the first row that reads the relation
        let batches: Vec<OnceCell<RelationBatch>> =
            relations.iter().map(|_| OnceCell::new()).collect();

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut record = Record::new();
            for (field, conversion) in &fields {
                let value = row.get(&field.path).cloned().unwrap_or(JsonValue::Null);
                record.insert(field.output.clone(), conversion.apply(value));
            }

            let owner = row.get(primary_key).and_then(RowKey::from_json);
            for (relation, cell) in relations.iter().zip(&batches) {
                let batch = cell
                    .get_or_try_init(|| {
                        fetch_relation(self.executor, collection, primary_key, &relation.path)
                    })
                    .await?;
                let values = owner
                    .as_ref()
                    .map(|key| batch.values_for(key).to_vec())
                    .unwrap_or_default();
                record.insert(relation.output.clone(), JsonValue::Array(values));
            }

            for extra in extras {
                extra.apply(&mut record);
            }
            records.push(record);
        }
        Ok(records)
    }

    fn resolve_conversions<'m>(
        &self,
        mapping: &'m ProjectionMapping,
    ) -> RefractionResult<Vec<(&'m FieldProjection, &'a Conversion)>> {
        mapping
            .entries()
            .iter()
            .map(|entry| {
                self.conversions
                    .get(&entry.conversion)
                    .map(|conversion| (entry, conversion))
                    .ok_or_else(|| RefractionError::UnknownConversion {
                        field: entry.path.clone(),
                        conversion: entry.conversion.clone(),
                    })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity_metadata::{
        EntityMetadata, FieldDescriptor, FieldType, RelationDescriptor, StaticMetadata, Through,
    };
    use crate::executor::MemoryStore;
    use serde_json::json;

    static ENTITIES: &[EntityMetadata] = &[
        EntityMetadata {
            name: "run",
            table_name: "runs",
            primary_key_field: "id",
            fields: &[
                FieldDescriptor::new("id", FieldType::Integer),
                FieldDescriptor::nullable("started", FieldType::DateTime),
                FieldDescriptor::nullable("elapsed", FieldType::Duration),
            ],
            relations: &[RelationDescriptor::many_to_many(
                "labels",
                "label",
                Through {
                    table: "run_labels",
                    owner_column: "run_id",
                    target_column: "label_id",
                },
            )],
        },
        EntityMetadata {
            name: "label",
            table_name: "labels",
            primary_key_field: "id",
            fields: &[
                FieldDescriptor::new("id", FieldType::Integer),
                FieldDescriptor::new("text", FieldType::String),
            ],
            relations: &[],
        },
    ];

    fn store() -> MemoryStore {
        let mut store = MemoryStore::new(StaticMetadata::new(ENTITIES));
        store
            .insert(
                "run",
                json!({"id": 1, "started": "2024-05-01T08:00:00Z", "elapsed": 3725}),
            )
            .unwrap();
        store
            .insert("run", json!({"id": 2, "started": null, "elapsed": null}))
            .unwrap();
        store.insert("label", json!({"id": 7, "text": "nightly"})).unwrap();
        store.link("run", "labels", 1, 7).unwrap();
        store
    }

    #[tokio::test]
    async fn test_converts_and_attaches_relations() {
        let store = store();
        let registry = ConversionRegistry::default();
        let serializer = BulkSerializer::new(&store, store.metadata(), &registry);
        let projection = Projection::new(
            ProjectionMapping::new()
                .field("id", "run_id")
                .convert("started", "started_at", "datetime")
                .convert("elapsed", "elapsed", "duration"),
        )
        .relation("labels", "label_ids")
        .relation("labels__text", "labels")
        .alias("run_id", "pk");

        let records = serializer
            .serialize_projection(&FilteredCollection::all("run"), &projection)
            .await
            .unwrap();
        assert_eq!(
            serde_json::to_value(&records).unwrap(),
            json!([
                {
                    "run_id": 1,
                    "started_at": "2024-05-01 08:00:00",
                    "elapsed": "1:02:05",
                    "label_ids": [7],
                    "labels": ["nightly"],
                    "pk": 1
                },
                {
                    "run_id": 2,
                    "started_at": null,
                    "elapsed": null,
                    "label_ids": [],
                    "labels": [],
                    "pk": 2
                }
            ])
        );
    }

    #[tokio::test]
    async fn test_validation_runs_before_queries() {
        let store = store();
        let registry = ConversionRegistry::default();
        let serializer = BulkSerializer::new(&store, store.metadata(), &registry);

        let err = serializer
            .serialize(
                &FilteredCollection::all("run"),
                &ProjectionMapping::new().field("started", "started"),
                &[],
                &[],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RefractionError::MissingPrimaryKeyMapping { ref primary_key, .. } if primary_key == "id"));

        let err = serializer
            .serialize(
                &FilteredCollection::all("run"),
                &ProjectionMapping::new().convert("id", "id", "epoch"),
                &[],
                &[],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RefractionError::UnknownConversion { ref conversion, .. } if conversion == "epoch"));
    }

    #[tokio::test]
    async fn test_rejects_many_valued_mapping_paths() {
        let store = store();
        let registry = ConversionRegistry::default();
        let serializer = BulkSerializer::new(&store, store.metadata(), &registry);

        let err = serializer
            .serialize(
                &FilteredCollection::all("run"),
                &ProjectionMapping::new()
                    .field("id", "id")
                    .field("labels__text", "label"),
                &[],
                &[],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RefractionError::ManyValuedMapping { ref path, .. } if path == "labels__text"));
        assert!(err.is_configuration_error());
    }
}
