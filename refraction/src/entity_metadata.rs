// Entity metadata structures and name resolution for relational paths

use crate::types::{RefractionError, RefractionResult};
use heck::ToUpperCamelCase;

/// Separator between a relation name and the field traversed on its target
pub const PATH_SEPARATOR: &str = "__";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Integer,
    Float,
    Boolean,
    DateTime,
    Duration,
}

#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub field_type: FieldType,
    pub nullable: bool,
}

impl FieldDescriptor {
    pub const fn new(name: &'static str, field_type: FieldType) -> Self {
        Self {
            name,
            field_type,
            nullable: false,
        }
    }

    pub const fn nullable(name: &'static str, field_type: FieldType) -> Self {
        Self {
            name,
            field_type,
            nullable: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    ForeignKey,
    ManyToMany,
}

/// Join table backing a many-to-many relation
#[derive(Debug, Clone)]
pub struct Through {
    pub table: &'static str,
    pub owner_column: &'static str,
    pub target_column: &'static str,
}

#[derive(Debug, Clone)]
pub struct RelationDescriptor {
    pub name: &'static str,
    pub kind: RelationKind,
    pub target_entity: &'static str,
    // Column on the owning table holding the target key (foreign keys only)
    pub column: Option<&'static str>,
    pub nullable: bool,
    // Join table (many-to-many only)
    pub through: Option<Through>,
}

impl RelationDescriptor {
    pub const fn foreign_key(
        name: &'static str,
        target_entity: &'static str,
        column: &'static str,
        nullable: bool,
    ) -> Self {
        Self {
            name,
            kind: RelationKind::ForeignKey,
            target_entity,
            column: Some(column),
            nullable,
            through: None,
        }
    }

    pub const fn many_to_many(
        name: &'static str,
        target_entity: &'static str,
        through: Through,
    ) -> Self {
        Self {
            name,
            kind: RelationKind::ManyToMany,
            target_entity,
            column: None,
            nullable: false,
            through: Some(through),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EntityMetadata {
    pub name: &'static str,
    pub table_name: &'static str,
    pub primary_key_field: &'static str,
    pub fields: &'static [FieldDescriptor],
    pub relations: &'static [RelationDescriptor],
}

impl EntityMetadata {
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn relation(&self, name: &str) -> Option<&RelationDescriptor> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// Check the structural invariants of an entity type
    pub fn validate(&self) -> RefractionResult<()> {
        if self.field(self.primary_key_field).is_none() {
            return Err(RefractionError::invalid_metadata(
                self.name,
                format!(
                    "primary key '{}' is not a scalar field",
                    self.primary_key_field
                ),
            ));
        }
        for relation in self.relations {
            if self.field(relation.name).is_some() {
                return Err(RefractionError::invalid_metadata(
                    self.name,
                    format!("relation '{}' collides with a scalar field", relation.name),
                ));
            }
            let well_formed = match relation.kind {
                RelationKind::ForeignKey => relation.column.is_some(),
                RelationKind::ManyToMany => relation.through.is_some(),
            };
            if !well_formed {
                return Err(RefractionError::invalid_metadata(
                    self.name,
                    format!("relation '{}' is missing its join columns", relation.name),
                ));
            }
        }
        Ok(())
    }
}

/// A field path resolved against entity metadata
#[derive(Debug, Clone, Copy)]
pub enum ResolvedPath<'m> {
    /// Scalar field on the entity itself
    Column(&'m FieldDescriptor),
    /// Foreign key traversal. `field` is `None` when the path names the
    /// relation itself, meaning the stored key.
    ForeignKey {
        relation: &'m RelationDescriptor,
        target: &'m EntityMetadata,
        field: Option<&'m FieldDescriptor>,
    },
    /// Many-to-many traversal. `field` is `None` for the target's key.
    ManyToMany {
        relation: &'m RelationDescriptor,
        target: &'m EntityMetadata,
        field: Option<&'m FieldDescriptor>,
    },
}

impl ResolvedPath<'_> {
    pub fn is_many_valued(&self) -> bool {
        matches!(self, ResolvedPath::ManyToMany { .. })
    }

    /// Whether a missing value can appear for this path
    pub fn is_nullable(&self) -> bool {
        match self {
            ResolvedPath::Column(field) => field.nullable,
            ResolvedPath::ForeignKey {
                relation, field, ..
            } => relation.nullable || field.is_some_and(|f| f.nullable),
            ResolvedPath::ManyToMany { .. } => false,
        }
    }
}

// Trait for entity metadata resolution
pub trait EntityMetadataProvider {
    fn get_entity_metadata(&self, entity_name: &str) -> Option<&EntityMetadata>;

    fn entity(&self, entity_name: &str) -> RefractionResult<&EntityMetadata> {
        self.get_entity_metadata(entity_name)
            .ok_or_else(|| RefractionError::unknown_entity(entity_name))
    }

    fn fields(&self, entity_name: &str) -> RefractionResult<&[FieldDescriptor]> {
        Ok(self.entity(entity_name)?.fields)
    }

    fn relations(&self, entity_name: &str) -> RefractionResult<&[RelationDescriptor]> {
        Ok(self.entity(entity_name)?.relations)
    }

    fn primary_key(&self, entity_name: &str) -> RefractionResult<&'static str> {
        Ok(self.entity(entity_name)?.primary_key_field)
    }

    /// Resolve a field path, traversing at most one relation
    fn resolve_path(&self, entity_name: &str, path: &str) -> RefractionResult<ResolvedPath<'_>> {
        let meta = self.entity(entity_name)?;
        let unknown = || RefractionError::unknown_field(entity_name, path);

        let (head, tail) = match path.split_once(PATH_SEPARATOR) {
            Some((head, tail)) => (head, Some(tail)),
            None => (path, None),
        };

        if tail.is_none() {
            if let Some(field) = meta.field(head) {
                return Ok(ResolvedPath::Column(field));
            }
        }

        let relation = meta.relation(head).ok_or_else(unknown)?;
        let target = self.entity(relation.target_entity)?;
        let field = match tail {
            Some(name) => Some(target.field(name).ok_or_else(unknown)?),
            None => None,
        };

        Ok(match relation.kind {
            RelationKind::ForeignKey => ResolvedPath::ForeignKey {
                relation,
                target,
                field,
            },
            RelationKind::ManyToMany => ResolvedPath::ManyToMany {
                relation,
                target,
                field,
            },
        })
    }
}

/// Slice-backed metadata registry
#[derive(Debug, Clone, Copy)]
pub struct StaticMetadata {
    entities: &'static [EntityMetadata],
}

impl StaticMetadata {
    pub const fn new(entities: &'static [EntityMetadata]) -> Self {
        Self { entities }
    }

    /// Build a registry after validating every entity it holds
    pub fn validated(entities: &'static [EntityMetadata]) -> RefractionResult<Self> {
        for meta in entities {
            meta.validate()?;
            for relation in meta.relations {
                if !entities.iter().any(|m| m.name == relation.target_entity) {
                    return Err(RefractionError::invalid_metadata(
                        meta.name,
                        format!(
                            "relation '{}' targets unknown entity '{}'",
                            relation.name, relation.target_entity
                        ),
                    ));
                }
            }
        }
        Ok(Self { entities })
    }

    pub fn entities(&self) -> &'static [EntityMetadata] {
        self.entities
    }
}

impl EntityMetadataProvider for StaticMetadata {
    // Namespace-aware resolution: exact, then without a `ns::` prefix, then PascalCase
    fn get_entity_metadata(&self, entity_name: &str) -> Option<&EntityMetadata> {
        if let Some(meta) = self.entities.iter().find(|meta| meta.name == entity_name) {
            return Some(meta);
        }

        let bare = entity_name
            .rsplit_once("::")
            .map(|(_, name)| name)
            .unwrap_or(entity_name);
        if let Some(meta) = self.entities.iter().find(|meta| meta.name == bare) {
            return Some(meta);
        }

        let pascal_case = bare.to_upper_camel_case();
        self.entities
            .iter()
            .find(|meta| meta.name.to_upper_camel_case() == pascal_case)
    }
}
