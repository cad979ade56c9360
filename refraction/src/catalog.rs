//! Metadata, query keys and projections of the test-management entities:
//! users, products, tags, test plans and test cases.

use crate::entity_metadata::{
    EntityMetadata, FieldDescriptor, FieldType, RelationDescriptor, StaticMetadata, Through,
};
use crate::query_builders::{Lookup, Projection, ProjectionMapping};
use crate::types::FieldOp;

pub const USER: &str = "user";
pub const PRODUCT: &str = "product";
pub const TAG: &str = "tag";
pub const TEST_PLAN: &str = "test_plan";
pub const TEST_CASE: &str = "test_case";

pub static ENTITIES: &[EntityMetadata] = &[
    EntityMetadata {
        name: USER,
        table_name: "auth_user",
        primary_key_field: "id",
        fields: &[
            FieldDescriptor::new("id", FieldType::Integer),
            FieldDescriptor::new("username", FieldType::String),
            FieldDescriptor::nullable("email", FieldType::String),
            FieldDescriptor::new("is_active", FieldType::Boolean),
        ],
        relations: &[],
    },
    EntityMetadata {
        name: PRODUCT,
        table_name: "products",
        primary_key_field: "id",
        fields: &[
            FieldDescriptor::new("id", FieldType::Integer),
            FieldDescriptor::new("name", FieldType::String),
        ],
        relations: &[],
    },
    EntityMetadata {
        name: TAG,
        table_name: "tags",
        primary_key_field: "id",
        fields: &[
            FieldDescriptor::new("id", FieldType::Integer),
            FieldDescriptor::new("name", FieldType::String),
        ],
        relations: &[],
    },
    EntityMetadata {
        name: TEST_PLAN,
        table_name: "test_plans",
        primary_key_field: "id",
        fields: &[
            FieldDescriptor::new("id", FieldType::Integer),
            FieldDescriptor::new("name", FieldType::String),
            FieldDescriptor::nullable("text", FieldType::String),
            FieldDescriptor::new("create_date", FieldType::DateTime),
            FieldDescriptor::new("is_active", FieldType::Boolean),
        ],
        relations: &[
            RelationDescriptor::foreign_key("product", PRODUCT, "product_id", false),
            RelationDescriptor::foreign_key("author", USER, "author_id", true),
            RelationDescriptor::many_to_many(
                "tags",
                TAG,
                Through {
                    table: "test_plan_tags",
                    owner_column: "plan_id",
                    target_column: "tag_id",
                },
            ),
        ],
    },
    EntityMetadata {
        name: TEST_CASE,
        table_name: "test_cases",
        primary_key_field: "id",
        fields: &[
            FieldDescriptor::new("id", FieldType::Integer),
            FieldDescriptor::new("summary", FieldType::String),
            FieldDescriptor::new("create_date", FieldType::DateTime),
            FieldDescriptor::nullable("estimated_time", FieldType::Duration),
            FieldDescriptor::new("is_automated", FieldType::Boolean),
            FieldDescriptor::new("priority", FieldType::Integer),
        ],
        relations: &[
            RelationDescriptor::foreign_key("author", USER, "author_id", true),
            RelationDescriptor::foreign_key("default_tester", USER, "default_tester_id", true),
            RelationDescriptor::many_to_many(
                "tags",
                TAG,
                Through {
                    table: "test_case_tags",
                    owner_column: "case_id",
                    target_column: "tag_id",
                },
            ),
            RelationDescriptor::many_to_many(
                "plans",
                TEST_PLAN,
                Through {
                    table: "test_case_plans",
                    owner_column: "case_id",
                    target_column: "plan_id",
                },
            ),
        ],
    },
];

/// Registry over every catalog entity
pub static CATALOG: StaticMetadata = StaticMetadata::new(ENTITIES);

crate::filter_keys! {
    /// Query keys of the test plan search
    pub enum PlanKey for "test_plan" {
        Id = "pl_id" => Some(Lookup::new("id", FieldOp::In)),
        Summary = "pl_summary" => Some(Lookup::new("name", FieldOp::IContains)),
        Product = "pl_product" => Some(Lookup::new("product", FieldOp::Exact)),
        Author = "pl_author" => Some(Lookup::new("author__username", FieldOp::IExact)),
        Active = "pl_active" => Some(Lookup::new("is_active", FieldOp::Exact)),
        Tags = "pl_tags" => Some(Lookup::new("tags__name", FieldOp::In).distinct()),
        CreatedAfter = "pl_created_after" => Some(Lookup::new("create_date", FieldOp::Gte)),
        CreatedBefore = "pl_created_before" => Some(Lookup::new("create_date", FieldOp::Lte)),
        Kind = "pl_type" => None,
    }
    priority = [Id, Product, Tags, Summary, Author, Active, CreatedAfter, CreatedBefore, Kind];
}

crate::filter_keys! {
    /// Query keys of the test case search
    pub enum CaseKey for "test_case" {
        Id = "cs_id" => Some(Lookup::new("id", FieldOp::In)),
        Summary = "cs_summary" => Some(Lookup::new("summary", FieldOp::IContains)),
        Author = "cs_author" => Some(Lookup::new("author__username", FieldOp::IExact)),
        Tester = "cs_tester" => Some(Lookup::new("default_tester__username", FieldOp::IExact)),
        Automated = "cs_automated" => Some(Lookup::new("is_automated", FieldOp::Exact)),
        Priority = "cs_priority" => Some(Lookup::new("priority", FieldOp::In)),
        Tags = "cs_tags" => Some(Lookup::new("tags__name", FieldOp::In).distinct()),
        Plan = "cs_plan" => Some(Lookup::new("plans", FieldOp::In).distinct()),
    }
    priority = [Id, Plan, Tags, Summary, Author, Tester, Automated, Priority];
}

pub fn plan_projection() -> Projection {
    Projection::new(
        ProjectionMapping::new()
            .field("id", "plan_id")
            .field("name", "name")
            .field("product__name", "product")
            .field("author__username", "author")
            .convert("create_date", "create_date", "datetime")
            .field("is_active", "is_active"),
    )
    .relation("tags__name", "tags")
    .alias("plan_id", "id")
}

pub fn case_projection() -> Projection {
    Projection::new(
        ProjectionMapping::new()
            .field("id", "case_id")
            .field("summary", "summary")
            .field("author__username", "author")
            .field("default_tester__username", "default_tester")
            .convert("create_date", "create_date", "datetime")
            .convert("estimated_time", "estimated_time", "duration")
            .field("is_automated", "is_automated")
            .convert("priority", "priority", "string"),
    )
    .relation("tags__name", "tags")
    .relation("plans", "plan_ids")
    .alias("case_id", "id")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity_metadata::EntityMetadataProvider;
    use crate::query_builders::{FilterBuilder, FilterKey};
    use serde_json::json;

    #[test]
    fn test_catalog_is_valid() {
        StaticMetadata::validated(ENTITIES).unwrap();
        for key in PlanKey::ALL.iter().chain(PlanKey::PRIORITY) {
            if let Some(lookup) = key.lookup() {
                CATALOG.resolve_path(PlanKey::ENTITY, lookup.path).unwrap();
            }
        }
        for key in CaseKey::ALL {
            if let Some(lookup) = key.lookup() {
                CATALOG.resolve_path(CaseKey::ENTITY, lookup.path).unwrap();
            }
        }
    }

    #[test]
    fn test_projections_resolve() {
        for (entity, projection) in [(TEST_PLAN, plan_projection()), (TEST_CASE, case_projection())] {
            for path in projection.mapping.paths() {
                CATALOG.resolve_path(entity, path).unwrap();
            }
            for relation in &projection.relations {
                assert!(CATALOG.resolve_path(entity, &relation.path).unwrap().is_many_valued());
            }
            assert!(projection.mapping.contains_path(CATALOG.primary_key(entity).unwrap()));
        }
    }

    #[test]
    fn test_plan_search_shape() {
        let collection = FilterBuilder::<PlanKey>::new()
            .build(&json!({
                "pl_active": true,
                "pl_tags": ["smoke"],
                "pl_product": 2,
                "pl_type": "legacy",
                "pl_author": "ann",
                "pl_author_exclude": true,
            }))
            .unwrap();
        assert_eq!(
            collection.describe(),
            "test_plan.filter(product__exact=2).filter(tags__name__in=[\"smoke\"]).distinct()\
             .exclude(author__username__iexact=\"ann\").filter(is_active__exact=true)"
        );
    }
}
