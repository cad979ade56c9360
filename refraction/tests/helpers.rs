use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use refraction::{
    EntityMetadata, FieldDescriptor, FieldType, FieldOp, FilteredCollection, Lookup, MemoryStore,
    QueryExecutor, RelationDescriptor, Row, StaticMetadata, StoreError, Through,
};
use sea_orm::{ConnectionTrait, Database, DatabaseConnection};
use serde_json::json;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[allow(dead_code)]
pub static WIDGET_ENTITIES: &[EntityMetadata] = &[
    EntityMetadata {
        name: "widget",
        table_name: "widgets",
        primary_key_field: "id",
        fields: &[
            FieldDescriptor::new("id", FieldType::Integer),
            FieldDescriptor::new("name", FieldType::String),
            FieldDescriptor::new("is_active", FieldType::Boolean),
        ],
        relations: &[RelationDescriptor::many_to_many(
            "tags",
            "tag",
            Through {
                table: "widget_tags",
                owner_column: "widget_id",
                target_column: "tag_id",
            },
        )],
    },
    EntityMetadata {
        name: "tag",
        table_name: "tags",
        primary_key_field: "id",
        fields: &[
            FieldDescriptor::new("id", FieldType::Integer),
            FieldDescriptor::new("name", FieldType::String),
        ],
        relations: &[],
    },
];

#[allow(dead_code)]
pub static WIDGETS: StaticMetadata = StaticMetadata::new(WIDGET_ENTITIES);

refraction::filter_keys! {
    #[allow(dead_code)]
    pub enum WidgetKey for "widget" {
        Id = "w_id" => Some(Lookup::new("id", FieldOp::In)),
        Name = "w_name" => Some(Lookup::new("name", FieldOp::IContains)),
        Active = "w_active" => Some(Lookup::new("is_active", FieldOp::Exact)),
        Tags = "w_tags" => Some(Lookup::new("tags__name", FieldOp::In).distinct()),
    }
    priority = [Id, Tags, Name, Active];
}

/// Widget 1 tagged red and blue, widget 2 untagged, widget 3 tagged red
#[allow(dead_code)]
pub fn scenario_store() -> MemoryStore {
    let mut store = MemoryStore::new(WIDGETS);
    store.insert("tag", json!({"id": 1, "name": "red"})).unwrap();
    store.insert("tag", json!({"id": 2, "name": "blue"})).unwrap();
    for (id, name, active) in [(1, "Gear", true), (2, "Bolt", false), (3, "Nut", true)] {
        store
            .insert("widget", json!({"id": id, "name": name, "is_active": active}))
            .unwrap();
    }
    store.link("widget", "tags", 1, 1).unwrap();
    store.link("widget", "tags", 1, 2).unwrap();
    store.link("widget", "tags", 3, 1).unwrap();
    store
}

/// `n` widgets; every even widget is tagged red, every third blue
#[allow(dead_code)]
pub fn widget_store(n: i64) -> MemoryStore {
    let mut store = MemoryStore::new(WIDGETS);
    store.insert("tag", json!({"id": 1, "name": "red"})).unwrap();
    store.insert("tag", json!({"id": 2, "name": "blue"})).unwrap();
    for id in 1..=n {
        store
            .insert(
                "widget",
                json!({"id": id, "name": format!("widget-{}", id), "is_active": id % 5 != 0}),
            )
            .unwrap();
        if id % 2 == 0 {
            store.link("widget", "tags", id, 1).unwrap();
        }
        if id % 3 == 0 {
            store.link("widget", "tags", id, 2).unwrap();
        }
    }
    store
}

/// Executor wrapper recording how many queries reach the store
pub struct CountingExecutor<E> {
    pub inner: E,
    values_calls: AtomicUsize,
    count_calls: AtomicUsize,
}

#[allow(dead_code)]
impl<E> CountingExecutor<E> {
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            values_calls: AtomicUsize::new(0),
            count_calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.values_calls.load(Ordering::SeqCst) + self.count_calls.load(Ordering::SeqCst)
    }

    pub fn values_calls(&self) -> usize {
        self.values_calls.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.values_calls.store(0, Ordering::SeqCst);
        self.count_calls.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl<E: QueryExecutor> QueryExecutor for CountingExecutor<E> {
    async fn values(
        &self,
        collection: &FilteredCollection,
        fields: &[&str],
        order_by: &[&str],
    ) -> Result<Vec<Row>, StoreError> {
        self.values_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.values(collection, fields, order_by).await
    }

    async fn count(&self, collection: &FilteredCollection) -> Result<u64, StoreError> {
        self.count_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.count(collection).await
    }
}

#[allow(dead_code)]
pub async fn setup_test_db() -> DatabaseConnection {
    Database::connect("sqlite::memory:").await.unwrap()
}

/// In-memory SQLite database holding the catalog schema and a small data set
#[allow(dead_code)]
pub async fn setup_catalog_db() -> DatabaseConnection {
    let db = setup_test_db().await;
    db.execute_unprepared(
        r#"
        CREATE TABLE auth_user (id INTEGER PRIMARY KEY, username TEXT NOT NULL, email TEXT, is_active BOOLEAN NOT NULL);
        CREATE TABLE products (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
        CREATE TABLE tags (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
        CREATE TABLE test_plans (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            text TEXT,
            create_date TEXT NOT NULL,
            is_active BOOLEAN NOT NULL,
            product_id INTEGER NOT NULL REFERENCES products(id),
            author_id INTEGER REFERENCES auth_user(id)
        );
        CREATE TABLE test_plan_tags (plan_id INTEGER NOT NULL, tag_id INTEGER NOT NULL);
        CREATE TABLE test_cases (
            id INTEGER PRIMARY KEY,
            summary TEXT NOT NULL,
            create_date TEXT NOT NULL,
            estimated_time INTEGER,
            is_automated BOOLEAN NOT NULL,
            priority INTEGER NOT NULL,
            author_id INTEGER REFERENCES auth_user(id),
            default_tester_id INTEGER REFERENCES auth_user(id)
        );
        CREATE TABLE test_case_tags (case_id INTEGER NOT NULL, tag_id INTEGER NOT NULL);
        CREATE TABLE test_case_plans (case_id INTEGER NOT NULL, plan_id INTEGER NOT NULL);

        INSERT INTO auth_user VALUES (1, 'ann', 'ann@example.com', 1), (2, 'bob', NULL, 1);
        INSERT INTO products VALUES (1, 'Kernel'), (2, 'Browser');
        INSERT INTO tags VALUES (1, 'smoke'), (2, 'regression'), (3, 'perf');
        INSERT INTO test_plans VALUES
            (1, 'Kernel smoke', NULL, '2024-01-10 09:00:00', 1, 1, 1),
            (2, 'Kernel regression', 'full run', '2024-02-01 12:30:00', 1, 1, 2),
            (3, 'Browser legacy', NULL, '2023-11-05 08:15:00', 0, 2, NULL);
        INSERT INTO test_plan_tags VALUES (1, 1), (2, 1), (2, 2);
        INSERT INTO test_cases VALUES
            (1, 'Boot to login', '2024-01-11 10:00:00', 90, 1, 1, 1, 2),
            (2, 'Suspend and resume', '2024-01-12 10:00:00', 3725, 0, 2, 2, NULL),
            (3, 'Render 50% zoom', '2024-02-02 10:00:00', NULL, 0, 1, 1, 1);
        INSERT INTO test_case_tags VALUES (1, 1), (2, 2), (3, 3);
        INSERT INTO test_case_plans VALUES (1, 1), (1, 2), (2, 2);
        "#,
    )
    .await
    .unwrap();
    db
}

/// The data set of `setup_catalog_db`, held in memory
#[allow(dead_code)]
pub fn catalog_store() -> MemoryStore {
    let mut store = MemoryStore::new(refraction::catalog::CATALOG);
    let rows = [
        ("user", json!({"id": 1, "username": "ann", "email": "ann@example.com", "is_active": true})),
        ("user", json!({"id": 2, "username": "bob", "email": null, "is_active": true})),
        ("product", json!({"id": 1, "name": "Kernel"})),
        ("product", json!({"id": 2, "name": "Browser"})),
        ("tag", json!({"id": 1, "name": "smoke"})),
        ("tag", json!({"id": 2, "name": "regression"})),
        ("tag", json!({"id": 3, "name": "perf"})),
        ("test_plan", json!({"id": 1, "name": "Kernel smoke", "text": null, "create_date": "2024-01-10 09:00:00", "is_active": true, "product_id": 1, "author_id": 1})),
        ("test_plan", json!({"id": 2, "name": "Kernel regression", "text": "full run", "create_date": "2024-02-01 12:30:00", "is_active": true, "product_id": 1, "author_id": 2})),
        ("test_plan", json!({"id": 3, "name": "Browser legacy", "text": null, "create_date": "2023-11-05 08:15:00", "is_active": false, "product_id": 2, "author_id": null})),
        ("test_case", json!({"id": 1, "summary": "Boot to login", "create_date": "2024-01-11 10:00:00", "estimated_time": 90, "is_automated": true, "priority": 1, "author_id": 1, "default_tester_id": 2})),
        ("test_case", json!({"id": 2, "summary": "Suspend and resume", "create_date": "2024-01-12 10:00:00", "estimated_time": 3725, "is_automated": false, "priority": 2, "author_id": 2, "default_tester_id": null})),
        ("test_case", json!({"id": 3, "summary": "Render 50% zoom", "create_date": "2024-02-02 10:00:00", "estimated_time": null, "is_automated": false, "priority": 1, "author_id": 1, "default_tester_id": 1})),
    ];
    for (entity, row) in rows {
        store.insert(entity, row).unwrap();
    }
    for (plan, tag) in [(1, 1), (2, 1), (2, 2)] {
        store.link("test_plan", "tags", plan, tag).unwrap();
    }
    for (case, tag) in [(1, 1), (2, 2), (3, 3)] {
        store.link("test_case", "tags", case, tag).unwrap();
    }
    for (case, plan) in [(1, 1), (1, 2), (2, 2)] {
        store.link("test_case", "plans", case, plan).unwrap();
    }
    store
}
