//! In-process relational engine.
//!
//! Tables are vectors of JSON rows behind a mutex. Queries are evaluated by
//! filtering, grouping, ordering and shaping those rows; transactions are
//! table snapshots. It backs the test-suite and small embedded uses.

mod eval;
mod exec;
mod query;

pub use query::MemoryQuery;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde_json::Value;

use self::eval::{TIMESTAMP_FORMAT, lookup, values_equal};
use crate::{
    clauses::{AggregateFunction, Conditions},
    errors::RepoError,
    query::{Engine, SyncChanges},
    registry::ModelRegistry,
    types::{Entity, ModelSchema, RelationDef, Row},
};

/// Local scope body: arguments in, constraints out.
pub type ScopeFn = Arc<dyn Fn(&[Value]) -> Conditions + Send + Sync>;

#[derive(Debug, Clone, Default)]
struct Table {
    rows: Vec<Row>,
    next_id: i64,
}

impl Table {
    fn allocate(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn observe(&mut self, key: &Value) {
        if let Some(id) = key.as_i64() {
            self.next_id = self.next_id.max(id);
        }
    }
}

pub(crate) struct MemoryDatabase {
    tables: HashMap<String, Table>,
    snapshots: Vec<HashMap<String, Table>>,
    scopes: HashMap<(String, String), ScopeFn>,
    global_scopes: HashMap<String, Vec<(String, ScopeFn)>>,
    models: ModelRegistry,
}

fn now() -> Value {
    Value::from(Utc::now().format(TIMESTAMP_FORMAT).to_string())
}

fn key_of(model: &ModelSchema, row: &Row) -> Option<Value> {
    lookup(row, &model.primary_key).filter(|key| !key.is_null())
}

fn same_key(model: &ModelSchema, row: &Row, key: &Value) -> bool {
    key_of(model, row).is_some_and(|candidate| values_equal(&candidate, key))
}

/// Shared handle onto an in-memory database.
#[derive(Clone)]
pub struct MemoryEngine {
    db: Arc<Mutex<MemoryDatabase>>,
}

impl std::fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let db = self.lock();
        f.debug_struct("MemoryEngine")
            .field("tables", &db.tables.keys().collect::<Vec<_>>())
            .field("transaction_level", &db.snapshots.len())
            .finish()
    }
}

impl MemoryEngine {
    pub fn new(models: ModelRegistry) -> Self {
        Self {
            db: Arc::new(Mutex::new(MemoryDatabase {
                tables: HashMap::new(),
                snapshots: Vec::new(),
                scopes: HashMap::new(),
                global_scopes: HashMap::new(),
                models,
            })),
        }
    }

    pub fn models(&self) -> ModelRegistry {
        self.lock().models.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryDatabase> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a local scope callable through `scope(name, args)`.
    pub fn define_scope<F>(&self, model: &str, name: &str, scope: F)
    where
        F: Fn(&[Value]) -> Conditions + Send + Sync + 'static,
    {
        self.lock().scopes.insert((model.to_string(), name.to_string()), Arc::new(scope));
    }

    /// Registers a scope applied to every query on `model` unless disabled.
    pub fn define_global_scope<F>(&self, model: &str, name: &str, scope: F)
    where
        F: Fn(&[Value]) -> Conditions + Send + Sync + 'static,
    {
        self.lock()
            .global_scopes
            .entry(model.to_string())
            .or_default()
            .push((name.to_string(), Arc::new(scope)));
    }

    /// Appends rows verbatim, assigning an `id` to rows that lack one.
    pub fn seed<I>(&self, table: &str, rows: I)
    where
        I: IntoIterator<Item = Row>,
    {
        let mut db = self.lock();
        let table = db.tables.entry(table.to_string()).or_default();
        for mut row in rows {
            match row.get("id").cloned() {
                Some(id) => table.observe(&id),
                None => {
                    let id = table.allocate();
                    row.insert("id".to_string(), Value::from(id));
                }
            }
            table.rows.push(row);
        }
    }

    /// Every stored row of `table`, trashed ones included.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.lock().table_rows(table).to_vec()
    }

    fn matched_keys(db: &MemoryDatabase, query: &MemoryQuery) -> Result<Vec<Value>, RepoError> {
        Ok(db
            .filtered(query)?
            .iter()
            .filter_map(|row| key_of(&query.model, row))
            .collect())
    }
}

impl Engine for MemoryEngine {
    type Query = MemoryQuery;

    fn query(&self, model: &ModelSchema) -> Result<MemoryQuery, RepoError> {
        Ok(MemoryQuery::new(model.clone()))
    }

    async fn get(&self, query: MemoryQuery) -> Result<Vec<Entity>, RepoError> {
        let rows = self.lock().select_rows(&query)?;
        Ok(rows.into_iter().map(|row| Entity::from_row(query.model.name.clone(), row)).collect())
    }

    async fn count(&self, query: MemoryQuery) -> Result<u64, RepoError> {
        self.lock().count_rows(&query)
    }

    async fn aggregate(&self, query: MemoryQuery, function: AggregateFunction, column: &str) -> Result<Option<f64>, RepoError> {
        self.lock().aggregate_rows(&query, function, column)
    }

    async fn insert(&self, model: &ModelSchema, rows: Vec<Row>) -> Result<bool, RepoError> {
        let mut db = self.lock();
        let table = db.tables.entry(model.table.clone()).or_default();
        for mut row in rows {
            match key_of(model, &row) {
                Some(key) => table.observe(&key),
                None => {
                    let id = table.allocate();
                    row.insert(model.primary_key.clone(), Value::from(id));
                }
            }
            table.rows.push(row);
        }
        Ok(true)
    }

    async fn update(&self, query: MemoryQuery, values: Row) -> Result<u64, RepoError> {
        let mut db = self.lock();
        let keys = Self::matched_keys(&db, &query)?;
        let model = &query.model;
        let stamp = now();
        let table = db.tables.entry(model.table.clone()).or_default();
        let mut affected = 0;
        for row in table.rows.iter_mut() {
            if !keys.iter().any(|key| same_key(model, row, key)) {
                continue;
            }
            row.extend(values.iter().map(|(column, value)| (column.clone(), value.clone())));
            if model.timestamps && !values.contains_key("updated_at") {
                row.insert("updated_at".to_string(), stamp.clone());
            }
            affected += 1;
        }
        Ok(affected)
    }

    async fn delete(&self, query: MemoryQuery) -> Result<u64, RepoError> {
        let mut db = self.lock();
        let keys = Self::matched_keys(&db, &query)?;
        let model = &query.model;
        let stamp = now();
        let table = db.tables.entry(model.table.clone()).or_default();
        let before = table.rows.len();
        if model.soft_deletes {
            let mut affected = 0;
            for row in table.rows.iter_mut() {
                if keys.iter().any(|key| same_key(model, row, key)) && !exec::is_trashed(model, row) {
                    row.insert("deleted_at".to_string(), stamp.clone());
                    affected += 1;
                }
            }
            return Ok(affected);
        }
        table.rows.retain(|row| !keys.iter().any(|key| same_key(model, row, key)));
        Ok((before - table.rows.len()) as u64)
    }

    async fn save(&self, model: &ModelSchema, entity: &mut Entity) -> Result<(), RepoError> {
        let mut db = self.lock();
        let stamp = now();
        let table = db.tables.entry(model.table.clone()).or_default();

        if entity.exists {
            let Some(key) = entity.key(model).filter(|key| !key.is_null()).cloned() else {
                return Err(RepoError::query(format!("cannot update [{}] without a primary key", model.name)));
            };
            let mut dirty = entity.dirty();
            if dirty.is_empty() {
                return Ok(());
            }
            if model.timestamps {
                dirty.insert("updated_at".to_string(), stamp.clone());
                entity.set("updated_at", stamp);
            }
            let row = table.rows.iter_mut().find(|row| same_key(model, row, &key)).ok_or_else(|| {
                RepoError::EntityNotFound {
                    model: model.name.clone(),
                    id: key.to_string(),
                }
            })?;
            row.extend(dirty);
        } else {
            if model.timestamps {
                for column in ["created_at", "updated_at"] {
                    if entity.get(column).is_none() {
                        entity.set(column, stamp.clone());
                    }
                }
            }
            match entity.key(model).filter(|key| !key.is_null()).cloned() {
                Some(key) => table.observe(&key),
                None => {
                    let id = table.allocate();
                    entity.set(model.primary_key.clone(), id);
                }
            }
            table.rows.push(entity.attributes.clone());
            entity.exists = true;
        }
        entity.sync_original();
        Ok(())
    }

    async fn delete_entity(&self, model: &ModelSchema, entity: &Entity) -> Result<bool, RepoError> {
        let Some(key) = entity.key(model).cloned() else {
            return Ok(false);
        };
        let mut db = self.lock();
        let table = db.tables.entry(model.table.clone()).or_default();
        if model.soft_deletes {
            let stamp = now();
            let found = table
                .rows
                .iter_mut()
                .find(|row| same_key(model, row, &key) && !exec::is_trashed(model, row));
            return Ok(match found {
                Some(row) => {
                    row.insert("deleted_at".to_string(), stamp);
                    true
                }
                None => false,
            });
        }
        let before = table.rows.len();
        table.rows.retain(|row| !same_key(model, row, &key));
        Ok(table.rows.len() < before)
    }

    async fn restore_entity(&self, model: &ModelSchema, entity: &mut Entity) -> Result<bool, RepoError> {
        let Some(key) = entity.key(model).cloned() else {
            return Ok(false);
        };
        let mut db = self.lock();
        let table = db.tables.entry(model.table.clone()).or_default();
        let Some(row) = table.rows.iter_mut().find(|row| same_key(model, row, &key)) else {
            return Ok(false);
        };
        row.insert("deleted_at".to_string(), Value::Null);
        entity.set("deleted_at", Value::Null);
        entity.sync_original();
        Ok(true)
    }

    async fn sync_pivot(
        &self,
        _model: &ModelSchema,
        parent: &Entity,
        relation: &RelationDef,
        ids: &[Value],
        detaching: bool,
    ) -> Result<SyncChanges, RepoError> {
        let pivot = relation
            .pivot
            .as_ref()
            .ok_or_else(|| RepoError::query(format!("relation [{}] has no pivot table", relation.name)))?;
        let Some(parent_key) = parent.get(&relation.local_key).cloned() else {
            return Err(RepoError::query(format!(
                "cannot sync [{}] on a parent without [{}]",
                relation.name, relation.local_key
            )));
        };

        let mut db = self.lock();
        let table = db.tables.entry(pivot.table.clone()).or_default();
        let owned = |row: &Row| lookup(row, &pivot.foreign_pivot_key).is_some_and(|key| values_equal(&key, &parent_key));
        let current: Vec<Value> = table
            .rows
            .iter()
            .filter(|row| owned(*row))
            .filter_map(|row| lookup(row, &pivot.related_pivot_key))
            .collect();
        let wanted = |id: &Value| ids.iter().any(|candidate| values_equal(candidate, id));

        let mut changes = SyncChanges::default();
        if detaching {
            changes.detached = current.iter().filter(|id| !wanted(*id)).cloned().collect();
            table.rows.retain(|row| {
                !owned(row) || lookup(row, &pivot.related_pivot_key).is_some_and(|id| wanted(&id))
            });
        }
        for id in ids {
            let known = current.iter().chain(changes.attached.iter()).any(|seen| values_equal(seen, id));
            if known {
                continue;
            }
            let mut row = Row::new();
            row.insert(pivot.foreign_pivot_key.clone(), parent_key.clone());
            row.insert(pivot.related_pivot_key.clone(), id.clone());
            table.rows.push(row);
            changes.attached.push(id.clone());
        }
        Ok(changes)
    }

    async fn begin_transaction(&self) -> Result<(), RepoError> {
        let mut db = self.lock();
        let snapshot = db.tables.clone();
        db.snapshots.push(snapshot);
        log::debug!("memory engine: begin (level {})", db.snapshots.len());
        Ok(())
    }

    async fn commit(&self) -> Result<(), RepoError> {
        let mut db = self.lock();
        if db.snapshots.pop().is_some() {
            log::debug!("memory engine: commit (level {})", db.snapshots.len());
        }
        Ok(())
    }

    async fn rollback(&self) -> Result<(), RepoError> {
        let mut db = self.lock();
        if let Some(snapshot) = db.snapshots.pop() {
            db.tables = snapshot;
            log::debug!("memory engine: rollback (level {})", db.snapshots.len());
        }
        Ok(())
    }

    fn transaction_level(&self) -> usize {
        self.lock().snapshots.len()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::clauses::{Boolean, JoinClause, JoinKind, RelationConstraint, SortOrder, SubQuery};
    use crate::query::QueryBuilder;
    use crate::types::RelationDef;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => panic!("rows are objects"),
        }
    }

    fn user() -> ModelSchema {
        ModelSchema::new("User", "users")
            .with_fillable(["name", "age"])
            .with_relation(RelationDef::has_many("posts", "Post", "user_id"))
            .with_relation(RelationDef::belongs_to_many("tags", "Tag", "tag_user", "user_id", "tag_id"))
    }

    fn post() -> ModelSchema {
        ModelSchema::new("Post", "posts")
            .with_fillable(["title", "user_id"])
            .with_relation(RelationDef::belongs_to("author", "User", "user_id"))
            .with_soft_deletes()
    }

    fn tag() -> ModelSchema {
        ModelSchema::new("Tag", "tags").with_fillable(["label"])
    }

    fn engine() -> MemoryEngine {
        let models = ModelRegistry::new().with_model(user()).with_model(post()).with_model(tag());
        let engine = MemoryEngine::new(models);
        engine.seed(
            "users",
            [
                row(json!({"name": "evsign", "age": 24})),
                row(json!({"name": "omranic", "age": 26})),
                row(json!({"name": "ionut", "age": 28})),
                row(json!({"name": "evsign", "age": 25})),
            ],
        );
        engine.seed(
            "posts",
            [
                row(json!({"title": "first", "user_id": 1, "deleted_at": null})),
                row(json!({"title": "second", "user_id": 1, "deleted_at": null})),
                row(json!({"title": "third", "user_id": 2, "deleted_at": null})),
            ],
        );
        engine.seed("tags", [row(json!({"label": "rust"})), row(json!({"label": "go"}))]);
        engine
    }

    fn names(entities: &[Entity]) -> Vec<String> {
        entities
            .iter()
            .map(|entity| entity.get("name").and_then(Value::as_str).unwrap_or_default().to_string())
            .collect()
    }

    #[tokio::test]
    async fn and_binds_tighter_than_or() {
        let engine = engine();
        let query = engine
            .query(&user())
            .unwrap()
            .where_basic("name", "=", &json!("ionut"), Boolean::And)
            .where_basic("age", "=", &json!(26), Boolean::Or)
            .where_basic("name", "=", &json!("omranic"), Boolean::And);
        let found = engine.get(query).await.unwrap();
        assert_eq!(names(&found), vec!["omranic", "ionut"]);
    }

    #[tokio::test]
    async fn grouping_keeps_last_row_and_having_filters_groups() {
        let engine = engine();
        let grouped = engine.query(&user()).unwrap().group_by("name");
        assert_eq!(engine.count(grouped.clone()).await.unwrap(), 3);

        let over = grouped.clone().having("age", ">", &json!(24), Boolean::And);
        assert_eq!(engine.get(over).await.unwrap().len(), 3);

        let window = grouped
            .having("age", ">", &json!(24), Boolean::And)
            .having("age", "<", &json!(26), Boolean::And);
        let found = engine.get(window).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].get("age"), Some(&json!(25)));
    }

    #[tokio::test]
    async fn ordering_offset_and_limit() {
        let engine = engine();
        let query = engine
            .query(&user())
            .unwrap()
            .order_by("age", SortOrder::Desc)
            .offset(1)
            .limit(2);
        assert_eq!(names(&engine.get(query.clone()).await.unwrap()), vec!["omranic", "evsign"]);
        assert_eq!(engine.count(query).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn relation_existence_and_counts() {
        let engine = engine();
        let with_posts = engine.query(&user()).unwrap().has("posts", ">=", 2, None, Boolean::And);
        assert_eq!(names(&engine.get(with_posts).await.unwrap()), vec!["evsign"]);

        let without = engine.query(&user()).unwrap().doesnt_have("posts", None, Boolean::And);
        assert_eq!(engine.count(without).await.unwrap(), 2);

        let counted = engine
            .query(&user())
            .unwrap()
            .with_count(&RelationConstraint {
                relation: "posts".into(),
                conditions: None,
            })
            .limit(1);
        let first = engine.get(counted).await.unwrap();
        assert_eq!(first[0].get("posts_count"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn eager_loads_follow_relation_kind() {
        let engine = engine();
        let query = engine
            .query(&post())
            .unwrap()
            .with(&RelationConstraint {
                relation: "author".into(),
                conditions: None,
            })
            .limit(1);
        let found = engine.get(query).await.unwrap();
        assert_eq!(found[0].get("author").and_then(|a| a.get("name")), Some(&json!("evsign")));
    }

    #[tokio::test]
    async fn soft_deleted_rows_are_hidden_unless_trashed_requested() {
        let engine = engine();
        let first = engine.query(&post()).unwrap().where_eq("title", &json!("first"));
        assert_eq!(engine.delete(first).await.unwrap(), 1);
        assert_eq!(engine.count(engine.query(&post()).unwrap()).await.unwrap(), 2);
        assert_eq!(engine.count(engine.query(&post()).unwrap().with_trashed()).await.unwrap(), 3);
        assert_eq!(engine.rows("posts").len(), 3);
    }

    #[tokio::test]
    async fn joins_expose_qualified_columns() {
        let engine = engine();
        let query = engine
            .query(&post())
            .unwrap()
            .join(&JoinClause {
                table: "users".into(),
                first: "posts.user_id".into(),
                operator: "=".into(),
                second: "users.id".into(),
                kind: JoinKind::Inner,
                value_comparison: false,
            })
            .where_basic("users.name", "=", &json!("omranic"), Boolean::And);
        let found = engine.get(query).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].get("title"), Some(&json!("third")));
    }

    #[tokio::test]
    async fn exists_subqueries_and_scopes() {
        let engine = engine();
        engine.define_scope("User", "adult", |args| {
            Conditions::new().where_("age", ">=", args.first().cloned().unwrap_or(json!(18)))
        });
        let scoped = engine.query(&user()).unwrap().call_scope("adult", &[json!(26)]);
        assert_eq!(engine.count(scoped).await.unwrap(), 2);

        let conditions = Conditions::new().where_("label", "=", "rust");
        let exists = engine
            .query(&user())
            .unwrap()
            .where_exists(&SubQuery::new("tags", conditions), Boolean::And, false);
        assert_eq!(engine.count(exists).await.unwrap(), 4);

        let unknown = engine.query(&user()).unwrap().call_scope("missing", &[]);
        assert!(matches!(engine.count(unknown).await, Err(RepoError::Query { .. })));
    }

    #[tokio::test]
    async fn raw_clauses_are_rejected_at_execution() {
        let engine = engine();
        let query = engine.query(&user()).unwrap().where_raw("age > ?", &[json!(1)], Boolean::And);
        assert!(matches!(engine.get(query).await, Err(RepoError::Query { .. })));
    }

    #[tokio::test]
    async fn save_assigns_keys_and_tracks_dirty_columns() {
        let engine = engine();
        let schema = user();
        let mut entity = Entity::new("User");
        entity.fill(&schema, &row(json!({"name": "new", "age": 30})));
        engine.save(&schema, &mut entity).await.unwrap();
        assert_eq!(entity.get("id"), Some(&json!(5)));
        assert!(entity.exists);
        assert!(entity.get("created_at").is_some());

        entity.set("age", 31);
        engine.save(&schema, &mut entity).await.unwrap();
        let stored = engine.rows("users");
        assert_eq!(stored[4].get("age"), Some(&json!(31)));
        assert!(!entity.is_dirty());
    }

    #[tokio::test]
    async fn pivot_sync_attaches_and_detaches() {
        let engine = engine();
        let schema = user();
        let relation = schema.relation("tags").unwrap().clone();
        let parent = Entity::from_row("User", row(json!({"id": 1})));

        let changes = engine.sync_pivot(&schema, &parent, &relation, &[json!(1), json!(2)], true).await.unwrap();
        assert_eq!(changes.attached, vec![json!(1), json!(2)]);

        let changes = engine.sync_pivot(&schema, &parent, &relation, &[json!(2)], true).await.unwrap();
        assert_eq!(changes.detached, vec![json!(1)]);
        assert!(changes.attached.is_empty());
        assert_eq!(engine.rows("tag_user").len(), 1);

        let tagged = engine.query(&schema).unwrap().has("tags", ">=", 1, None, Boolean::And);
        assert_eq!(engine.count(tagged).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn rollback_restores_snapshot() {
        let engine = engine();
        engine.begin_transaction().await.unwrap();
        assert_eq!(engine.transaction_level(), 1);
        engine.delete(engine.query(&user()).unwrap()).await.unwrap();
        assert!(engine.rows("users").is_empty());
        engine.rollback().await.unwrap();
        assert_eq!(engine.transaction_level(), 0);
        assert_eq!(engine.rows("users").len(), 4);

        // Unbalanced calls are ignored.
        engine.commit().await.unwrap();
        engine.rollback().await.unwrap();
        assert_eq!(engine.rows("users").len(), 4);
    }
}
