pub mod collection;
pub mod filter;
pub mod group_by;
pub mod projection;
pub mod relation_fetcher;
pub mod serializer;

pub use collection::FilteredCollection;
pub use filter::{is_provided, is_truthy, FilterBuilder, FilterKey, Lookup, EXCLUDE_SUFFIX};
pub use group_by::{aggregate, GroupByResult, Subtotal, PERCENT_SUFFIX};
pub use projection::{
    Conversion, ConversionFn, ConversionRegistry, ExtraField, FieldProjection, Projection,
    ProjectionMapping, RelationField, IDENTITY,
};
pub use relation_fetcher::{fetch_relation, RelationBatch};
pub use serializer::BulkSerializer;
