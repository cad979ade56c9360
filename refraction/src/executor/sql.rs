//! SQL backend compiling filtered collections with `sea_query`

use async_trait::async_trait;
use sea_orm::sea_query::{
    Alias, Condition, Expr, Func, JoinType, LikeExpr, Order, Query, SelectStatement, SimpleExpr,
};
use sea_orm::{ConnectionTrait, DbErr, FromQueryResult, JsonValue};

use crate::config::EngineConfig;
use crate::entity_metadata::{
    EntityMetadata, EntityMetadataProvider, FieldType, ResolvedPath, StaticMetadata,
};
use crate::executor::QueryExecutor;
use crate::key_types::{json_to_db_value, typed_db_value};
use crate::query_builders::FilteredCollection;
use crate::types::{json_type_name, FieldOp, Predicate, RefractionError, Row, StoreError};

/// Runs filtered collections against a SeaORM connection.
///
/// Relation predicates compile to `IN (subquery)` so filtering never
/// multiplies base rows; only projected many-to-many paths join.
pub struct SeaOrmExecutor<C, M = StaticMetadata> {
    conn: C,
    metadata: M,
    log_statements: bool,
}

impl<C, M> SeaOrmExecutor<C, M>
where
    C: ConnectionTrait,
    M: EntityMetadataProvider,
{
    pub fn new(conn: C, metadata: M) -> Self {
        Self {
            conn,
            metadata,
            log_statements: false,
        }
    }

    pub fn with_config(mut self, config: &EngineConfig) -> Self {
        self.log_statements = config.log_statements;
        self
    }

    pub fn connection(&self) -> &C {
        &self.conn
    }

    fn condition(
        &self,
        meta: &EntityMetadata,
        collection: &FilteredCollection,
    ) -> Result<Condition, StoreError> {
        let mut condition = Condition::all();
        for (predicate, negated) in collection.predicates() {
            condition = condition.add(self.compile_predicate(meta, predicate, negated)?);
        }
        Ok(condition)
    }

    fn compile_predicate(
        &self,
        meta: &EntityMetadata,
        predicate: &Predicate,
        negated: bool,
    ) -> Result<Condition, StoreError> {
        let resolved = self
            .metadata
            .resolve_path(meta.name, &predicate.path)
            .map_err(StoreError::from)?;
        let table = meta.table_name;
        let null_test = null_test(predicate)?;

        // Column on the owning table that an exclusion re-admits when NULL
        let mut own_column: Option<SimpleExpr> = None;
        let positive: Condition = match resolved {
            ResolvedPath::Column(field) => {
                let column = column_expr(table, field.name);
                own_column = Some(column.clone());
                Condition::all().add(lookup_condition(column, predicate, Some(field.field_type))?)
            }
            ResolvedPath::ForeignKey {
                relation,
                target,
                field,
            } => {
                let column_name = relation
                    .column
                    .ok_or_else(|| missing_join(meta, relation.name))?;
                let owner = column_expr(table, column_name);
                own_column = Some(owner.clone());
                match field {
                    None => Condition::all().add(lookup_condition(
                        owner,
                        predicate,
                        key_type(target),
                    )?),
                    Some(field) => {
                        let target_column = column_expr(target.table_name, field.name);
                        let keys_where = |cond: SimpleExpr| {
                            Query::select()
                                .expr(column_expr(target.table_name, target.primary_key_field))
                                .from(Alias::new(target.table_name))
                                .and_where(cond)
                                .to_owned()
                        };
                        if let Some(expected) = null_test {
                            let has_value = Condition::all()
                                .add(Expr::expr(owner.clone()).is_not_null())
                                .add(Expr::expr(owner).in_subquery(keys_where(
                                    Expr::expr(target_column).is_not_null(),
                                )));
                            if expected {
                                has_value.not()
                            } else {
                                has_value
                            }
                        } else {
                            let matching =
                                lookup_condition(target_column, predicate, Some(field.field_type))?;
                            Condition::all().add(Expr::expr(owner).in_subquery(keys_where(matching)))
                        }
                    }
                }
            }
            ResolvedPath::ManyToMany {
                relation,
                target,
                field,
            } => {
                let through = relation
                    .through
                    .as_ref()
                    .ok_or_else(|| missing_join(meta, relation.name))?;
                let owner = column_expr(table, meta.primary_key_field);
                let linked_owners = |cond: Option<SimpleExpr>| {
                    let mut select = Query::select();
                    select
                        .expr(column_expr(through.table, through.owner_column))
                        .from(Alias::new(through.table));
                    if field.is_some() {
                        select.inner_join(
                            Alias::new(target.table_name),
                            Expr::col((
                                Alias::new(target.table_name),
                                Alias::new(target.primary_key_field),
                            ))
                            .equals((Alias::new(through.table), Alias::new(through.target_column))),
                        );
                    }
                    if let Some(cond) = cond {
                        select.and_where(cond);
                    }
                    select
                };
                let (target_column, field_type) = match field {
                    Some(field) => (column_expr(target.table_name, field.name), Some(field.field_type)),
                    None => (column_expr(through.table, through.target_column), key_type(target)),
                };

                // An owner with no links counts as null; `exact null` matches a linked null
                if predicate.op == FieldOp::IsNull {
                    let non_null = field.map(|_| Expr::expr(target_column).is_not_null());
                    let has_value =
                        Condition::all().add(Expr::expr(owner).in_subquery(linked_owners(non_null)));
                    if expects_null(predicate)? {
                        has_value.not()
                    } else {
                        has_value
                    }
                } else {
                    let matching = lookup_condition(target_column, predicate, field_type)?;
                    Condition::all().add(Expr::expr(owner).in_subquery(linked_owners(Some(matching))))
                }
            }
        };

        if !negated {
            return Ok(positive);
        }
        let mut excluded = Condition::any().add(positive.not());
        // A null test already decides NULL rows itself
        if null_test.is_none() && resolved.is_nullable() {
            if let Some(column) = own_column {
                excluded = excluded.add(Expr::expr(column).is_null());
            }
        }
        Ok(excluded)
    }

    /// Expression selecting `path`, adding the joins it needs once
    fn select_expr(
        &self,
        meta: &EntityMetadata,
        select: &mut SelectStatement,
        joined: &mut Vec<&'static str>,
        path: &str,
    ) -> Result<SimpleExpr, StoreError> {
        let resolved = self
            .metadata
            .resolve_path(meta.name, path)
            .map_err(StoreError::from)?;
        let table = meta.table_name;
        Ok(match resolved {
            ResolvedPath::Column(field) => column_expr(table, field.name),
            ResolvedPath::ForeignKey {
                relation,
                target,
                field,
            } => {
                let column_name = relation
                    .column
                    .ok_or_else(|| missing_join(meta, relation.name))?;
                let Some(field) = field else {
                    return Ok(column_expr(table, column_name));
                };
                if !joined.contains(&relation.name) {
                    select.join_as(
                        JoinType::LeftJoin,
                        Alias::new(target.table_name),
                        Alias::new(relation.name),
                        Expr::col((Alias::new(relation.name), Alias::new(target.primary_key_field)))
                            .equals((Alias::new(table), Alias::new(column_name))),
                    );
                    joined.push(relation.name);
                }
                column_expr(relation.name, field.name)
            }
            ResolvedPath::ManyToMany {
                relation,
                target,
                field,
            } => {
                let through = relation
                    .through
                    .as_ref()
                    .ok_or_else(|| missing_join(meta, relation.name))?;
                let through_alias = format!("{}__through", relation.name);
                if !joined.contains(&through.table) {
                    select.join_as(
                        JoinType::InnerJoin,
                        Alias::new(through.table),
                        Alias::new(&through_alias),
                        Expr::col((Alias::new(&through_alias), Alias::new(through.owner_column)))
                            .equals((Alias::new(table), Alias::new(meta.primary_key_field))),
                    );
                    joined.push(through.table);
                }
                let Some(field) = field else {
                    return Ok(column_expr(&through_alias, through.target_column));
                };
                if !joined.contains(&relation.name) {
                    select.join_as(
                        JoinType::InnerJoin,
                        Alias::new(target.table_name),
                        Alias::new(relation.name),
                        Expr::col((Alias::new(relation.name), Alias::new(target.primary_key_field)))
                            .equals((Alias::new(&through_alias), Alias::new(through.target_column))),
                    );
                    joined.push(relation.name);
                }
                column_expr(relation.name, field.name)
            }
        })
    }

    fn log(&self, statement: &sea_orm::Statement) {
        if self.log_statements {
            log::debug!("{}", statement);
        }
    }
}

#[async_trait]
impl<C, M> QueryExecutor for SeaOrmExecutor<C, M>
where
    C: ConnectionTrait + Send + Sync,
    M: EntityMetadataProvider + Send + Sync,
{
    async fn values(
        &self,
        collection: &FilteredCollection,
        fields: &[&str],
        order_by: &[&str],
    ) -> Result<Vec<Row>, StoreError> {
        let meta = self
            .metadata
            .entity(collection.entity())
            .map_err(StoreError::from)?;

        let mut select = Query::select();
        select.from(Alias::new(meta.table_name));
        let mut joined = Vec::new();
        for path in fields {
            let expr = self.select_expr(meta, &mut select, &mut joined, path)?;
            select.expr_as(expr, Alias::new(*path));
        }
        for path in order_by {
            let expr = self.select_expr(meta, &mut select, &mut joined, path)?;
            select.order_by_expr(expr, Order::Asc);
        }
        if collection.is_distinct() {
            select.distinct();
        }
        select.cond_where(self.condition(meta, collection)?);

        let stmt = self.conn.get_database_backend().build(&select);
        self.log(&stmt);
        let results = self.conn.query_all(stmt).await?;

        let mut rows = Vec::with_capacity(results.len());
        for result in results {
            let mut row = match JsonValue::from_query_result(&result, "")? {
                JsonValue::Object(map) => map,
                other => {
                    return Err(DbErr::Custom(format!(
                        "expected a row mapping, got {}",
                        json_type_name(&other)
                    )))
                }
            };
            // Drivers omit columns whose value carries no type, i.e. NULL
            for path in fields {
                if !row.contains_key(*path) {
                    row.insert((*path).to_string(), JsonValue::Null);
                }
            }
            rows.push(row);
        }
        Ok(rows)
    }

    async fn count(&self, collection: &FilteredCollection) -> Result<u64, StoreError> {
        let meta = self
            .metadata
            .entity(collection.entity())
            .map_err(StoreError::from)?;
        let select = Query::select()
            .expr_as(Expr::cust("COUNT(*)"), Alias::new("count"))
            .from(Alias::new(meta.table_name))
            .cond_where(self.condition(meta, collection)?)
            .to_owned();

        let stmt = self.conn.get_database_backend().build(&select);
        self.log(&stmt);
        let count = match self.conn.query_one(stmt).await? {
            Some(row) => row.try_get::<i64>("", "count")?,
            None => 0,
        };
        Ok(count.max(0) as u64)
    }
}

// LIKE escape character; must not need quoting in any backend
const LIKE_ESCAPE: char = '!';

fn column_expr(table: &str, column: &str) -> SimpleExpr {
    Expr::col((Alias::new(table), Alias::new(column))).into()
}

fn missing_join(meta: &EntityMetadata, relation: &str) -> StoreError {
    RefractionError::invalid_metadata(
        meta.name,
        format!("relation '{}' is missing its join columns", relation),
    )
    .into()
}

fn expects_null(predicate: &Predicate) -> Result<bool, StoreError> {
    predicate.value.as_bool().ok_or_else(|| {
        DbErr::Custom(format!(
            "'{}' expects a boolean, got {}",
            predicate.lookup_expr(),
            predicate.value
        ))
    })
}

/// `Some(expected)` when the lookup asks whether the value is missing
fn null_test(predicate: &Predicate) -> Result<Option<bool>, StoreError> {
    match predicate.op {
        FieldOp::IsNull => expects_null(predicate).map(Some),
        FieldOp::Exact if predicate.value.is_null() => Ok(Some(true)),
        _ => Ok(None),
    }
}

fn key_type(target: &EntityMetadata) -> Option<FieldType> {
    target
        .field(target.primary_key_field)
        .map(|field| field.field_type)
}

fn scalar(
    predicate: &Predicate,
    value: &JsonValue,
    field_type: Option<FieldType>,
) -> Result<sea_orm::Value, StoreError> {
    let bound = match field_type {
        Some(field_type) => typed_db_value(value, field_type),
        None => json_to_db_value(value),
    };
    bound.ok_or_else(|| {
        DbErr::Custom(format!(
            "'{}' cannot compare against {} {}",
            predicate.lookup_expr(),
            json_type_name(value),
            value
        ))
    })
}

fn text(value: &JsonValue) -> String {
    match value.as_str() {
        Some(s) => s.to_string(),
        None => value.to_string(),
    }
}

fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, LIKE_ESCAPE | '%' | '_') {
            out.push(LIKE_ESCAPE);
        }
        out.push(c);
    }
    out
}

fn like(target: SimpleExpr, pattern: String) -> SimpleExpr {
    Expr::expr(target).like(LikeExpr::new(pattern).escape(LIKE_ESCAPE))
}

fn lower(target: SimpleExpr) -> SimpleExpr {
    SimpleExpr::FunctionCall(Func::lower(target))
}

fn lookup_condition(
    target: SimpleExpr,
    predicate: &Predicate,
    field_type: Option<FieldType>,
) -> Result<SimpleExpr, StoreError> {
    let value = &predicate.value;
    let bind = |value: &JsonValue| scalar(predicate, value, field_type);
    Ok(match predicate.op {
        FieldOp::Exact if value.is_null() => Expr::expr(target).is_null(),
        FieldOp::Exact => Expr::expr(target).eq(bind(value)?),
        FieldOp::IExact => match value.as_str() {
            Some(s) => Expr::expr(lower(target)).eq(s.to_lowercase()),
            None => Expr::expr(target).eq(bind(value)?),
        },
        FieldOp::Contains => like(target, format!("%{}%", escape_like(&text(value)))),
        FieldOp::IContains => like(
            lower(target),
            format!("%{}%", escape_like(&text(value).to_lowercase())),
        ),
        FieldOp::StartsWith => like(target, format!("{}%", escape_like(&text(value)))),
        FieldOp::EndsWith => like(target, format!("%{}", escape_like(&text(value)))),
        FieldOp::In => {
            let items = value.as_array().ok_or_else(|| {
                DbErr::Custom(format!(
                    "'{}' expects a list, got {}",
                    predicate.lookup_expr(),
                    json_type_name(value)
                ))
            })?;
            let values = items
                .iter()
                .map(bind)
                .collect::<Result<Vec<_>, _>>()?;
            Expr::expr(target).is_in(values)
        }
        FieldOp::Gt => Expr::expr(target).gt(bind(value)?),
        FieldOp::Gte => Expr::expr(target).gte(bind(value)?),
        FieldOp::Lt => Expr::expr(target).lt(bind(value)?),
        FieldOp::Lte => Expr::expr(target).lte(bind(value)?),
        FieldOp::IsNull => {
            if expects_null(predicate)? {
                Expr::expr(target).is_null()
            } else {
                Expr::expr(target).is_not_null()
            }
        }
    })
}
