use sea_orm::{Database, DatabaseConnection};
use serde_json::Value as JsonValue;

use crate::config::EngineConfig;
use crate::entity_metadata::{EntityMetadataProvider, StaticMetadata};
use crate::executor::{QueryExecutor, SeaOrmExecutor};
use crate::query_builders::{
    aggregate, BulkSerializer, ConversionRegistry, FilterBuilder, FilterKey, FilteredCollection,
    GroupByResult, Projection,
};
use crate::types::{Record, RefractionResult};

/// Entry point tying a store, its metadata and the conversion registry
/// together for search, projection and aggregation requests.
pub struct Engine<E, M = StaticMetadata> {
    executor: E,
    metadata: M,
    config: EngineConfig,
    conversions: ConversionRegistry,
}

impl Engine<SeaOrmExecutor<DatabaseConnection>> {
    /// Connect to `database_url` and serve the given entities over SQL
    pub async fn connect(
        database_url: &str,
        metadata: StaticMetadata,
        config: EngineConfig,
    ) -> RefractionResult<Self> {
        let conn = Database::connect(database_url).await?;
        let executor = SeaOrmExecutor::new(conn, metadata).with_config(&config);
        Ok(Self::with_config(executor, metadata, config))
    }
}

impl<E, M> Engine<E, M>
where
    E: QueryExecutor,
    M: EntityMetadataProvider + Sync,
{
    pub fn new(executor: E, metadata: M) -> Self {
        Self::with_config(executor, metadata, EngineConfig::default())
    }

    pub fn with_config(executor: E, metadata: M, config: EngineConfig) -> Self {
        let conversions = ConversionRegistry::new(&config.datetime_format);
        Self {
            executor,
            metadata,
            config,
            conversions,
        }
    }

    /// Make `name` available to projection mappings
    pub fn register_conversion<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&JsonValue) -> JsonValue + Send + Sync + 'static,
    {
        self.conversions.register(name, f);
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn metadata(&self) -> &M {
        &self.metadata
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn conversions(&self) -> &ConversionRegistry {
        &self.conversions
    }

    /// Compose the collection a query specification selects
    pub fn filter<K: FilterKey>(&self, query_spec: &JsonValue) -> RefractionResult<FilteredCollection> {
        self.metadata.entity(K::ENTITY)?;
        FilterBuilder::<K>::new().build(query_spec)
    }

    pub async fn search<K: FilterKey>(
        &self,
        query_spec: &JsonValue,
        projection: &Projection,
    ) -> RefractionResult<Vec<Record>> {
        let collection = self.filter::<K>(query_spec)?;
        self.project(&collection, projection).await
    }

    pub async fn project(
        &self,
        collection: &FilteredCollection,
        projection: &Projection,
    ) -> RefractionResult<Vec<Record>> {
        BulkSerializer::new(&self.executor, &self.metadata, &self.conversions)
            .serialize_projection(collection, projection)
            .await
    }

    pub async fn count<K: FilterKey>(&self, query_spec: &JsonValue) -> RefractionResult<u64> {
        let collection = self.filter::<K>(query_spec)?;
        Ok(self.executor.count(&collection).await?)
    }

    pub fn aggregate(
        &self,
        rows: &[Record],
        key_fields: &[&str],
        value_field: &str,
        rollup_name: Option<&str>,
    ) -> GroupByResult {
        aggregate(rows, key_fields, value_field, rollup_name)
    }
}
