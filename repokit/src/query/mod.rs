//! Boundary to the relational engine.
//!
//! [`QueryBuilder`] is the per-clause capability a query handle must offer so
//! that [`assemble`] can replay a [`ClauseStore`](crate::clauses::ClauseStore)
//! onto it. [`Engine`] executes finished handles and performs writes.

mod assembler;
mod recording;

pub use assembler::assemble;
pub use recording::{AppliedClause, RecordingQuery};

use serde_json::Value;

use crate::{
    clauses::{AggregateFunction, Boolean, Condition, Conditions, DatePart, JoinClause, RelationConstraint, SortOrder, SubQuery},
    errors::RepoError,
    types::{Entity, ModelSchema, Page, RelationDef, Row},
};

/// Query-handle capability consumed by the assembler.
///
/// Methods take the handle by value and return it, mirroring fluent ORM
/// builders. Provided methods are sugar over the required primitives.
pub trait QueryBuilder: Sized {
    fn where_basic(self, column: &str, operator: &str, value: &Value, boolean: Boolean) -> Self;
    fn where_in(self, column: &str, values: &[Value], boolean: Boolean, negate: bool) -> Self;
    fn where_null(self, column: &str, boolean: Boolean, negate: bool) -> Self;
    fn where_column(self, first: &str, operator: &str, second: &str, boolean: Boolean) -> Self;
    fn where_nested(self, conditions: &Conditions, boolean: Boolean) -> Self;
    fn where_between(self, column: &str, low: &Value, high: &Value, boolean: Boolean, negate: bool) -> Self;
    fn where_json_contains(self, column: &str, value: &Value, boolean: Boolean, negate: bool) -> Self;
    fn where_json_length(self, column: &str, operator: &str, length: i64, boolean: Boolean) -> Self;
    fn where_exists(self, query: &SubQuery, boolean: Boolean, negate: bool) -> Self;
    fn where_raw(self, sql: &str, bindings: &[Value], boolean: Boolean) -> Self;
    fn having_raw(self, sql: &str, bindings: &[Value], boolean: Boolean) -> Self;
    fn where_date_part(self, part: DatePart, column: &str, operator: &str, value: &str, boolean: Boolean) -> Self;
    fn has(self, relation: &str, operator: &str, count: i64, conditions: Option<&Conditions>, boolean: Boolean) -> Self;
    fn has_morph(
        self,
        relation: &str,
        types: &[String],
        operator: &str,
        count: i64,
        conditions: Option<&Conditions>,
        boolean: Boolean,
    ) -> Self;
    fn with(self, relation: &RelationConstraint) -> Self;
    fn join(self, join: &JoinClause) -> Self;
    fn with_count(self, relation: &RelationConstraint) -> Self;
    fn with_exists(self, relation: &RelationConstraint) -> Self;
    fn with_aggregate(self, relation: &str, column: &str, function: AggregateFunction) -> Self;
    fn call_scope(self, name: &str, args: &[Value]) -> Self;
    fn having(self, column: &str, operator: &str, value: &Value, boolean: Boolean) -> Self;
    fn with_trashed(self) -> Self;
    fn without_global_scopes(self) -> Self;
    fn select(self, columns: &[String]) -> Self;
    fn except(self, columns: &[String]) -> Self;
    fn offset(self, offset: u64) -> Self;
    fn limit(self, limit: u64) -> Self;
    fn group_by(self, column: &str) -> Self;
    fn order_by(self, column: &str, direction: SortOrder) -> Self;

    fn where_eq(self, column: &str, value: &Value) -> Self {
        self.where_basic(column, "=", value, Boolean::And)
    }

    fn where_has(self, relation: &str, conditions: Option<&Conditions>, boolean: Boolean) -> Self {
        self.has(relation, ">=", 1, conditions, boolean)
    }

    fn doesnt_have(self, relation: &str, conditions: Option<&Conditions>, boolean: Boolean) -> Self {
        self.has(relation, "<", 1, conditions, boolean)
    }

    /// Applies each condition at the top level, in order.
    fn apply_conditions(self, conditions: &Conditions) -> Self {
        conditions.iter().fold(self, |query, condition| match condition {
            Condition::Basic {
                column,
                operator,
                value,
                boolean,
            } => query.where_basic(column, operator, value, *boolean),
            Condition::In {
                column,
                values,
                boolean,
                negate,
            } => query.where_in(column, values, *boolean, *negate),
            Condition::Null { column, boolean, negate } => query.where_null(column, *boolean, *negate),
            Condition::Between {
                column,
                low,
                high,
                boolean,
                negate,
            } => query.where_between(column, low, high, *boolean, *negate),
            Condition::Column {
                first,
                operator,
                second,
                boolean,
            } => query.where_column(first, operator, second, *boolean),
            Condition::Nested { conditions, boolean } => query.where_nested(conditions, *boolean),
            Condition::Has {
                relation,
                operator,
                count,
                conditions,
                boolean,
            } => query.has(relation, operator, *count, conditions.as_ref(), *boolean),
            Condition::Raw { sql, bindings, boolean } => query.where_raw(sql, bindings, *boolean),
        })
    }
}

/// Changes made by a pivot sync.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncChanges {
    pub attached: Vec<Value>,
    pub detached: Vec<Value>,
}

/// Relational engine collaborator: builds query handles, executes them and writes rows.
///
/// Implementations are cheap handles onto shared state (a pool, or the
/// in-memory database), so they are `Clone`.
#[allow(async_fn_in_trait)]
pub trait Engine: Clone {
    type Query: QueryBuilder + Clone;

    /// A fresh query handle over the model's table, with global scopes armed.
    fn query(&self, model: &ModelSchema) -> Result<Self::Query, RepoError>;

    async fn get(&self, query: Self::Query) -> Result<Vec<Entity>, RepoError>;

    async fn first(&self, query: Self::Query) -> Result<Option<Entity>, RepoError> {
        Ok(self.get(query.limit(1)).await?.into_iter().next())
    }

    /// Row count ignoring offset and limit. Grouped queries count groups.
    async fn count(&self, query: Self::Query) -> Result<u64, RepoError>;

    /// Numeric aggregate over `column`; `None` when no row carries a number.
    async fn aggregate(&self, query: Self::Query, function: AggregateFunction, column: &str) -> Result<Option<f64>, RepoError>;

    async fn exists(&self, query: Self::Query) -> Result<bool, RepoError> {
        Ok(self.count(query).await? > 0)
    }

    async fn paginate(&self, query: Self::Query, per_page: u64, page: u64) -> Result<Page<Entity>, RepoError> {
        let per_page = per_page.max(1);
        let page = page.max(1);
        let total = self.count(query.clone()).await?;
        let items = self.get(query.offset((page - 1) * per_page).limit(per_page)).await?;
        Ok(Page {
            items,
            total: Some(total),
            per_page,
            current_page: page,
            more_pages: false,
        })
    }

    async fn simple_paginate(&self, query: Self::Query, per_page: u64, page: u64) -> Result<Page<Entity>, RepoError> {
        let per_page = per_page.max(1);
        let page = page.max(1);
        let mut items = self.get(query.offset((page - 1) * per_page).limit(per_page + 1)).await?;
        let more_pages = items.len() as u64 > per_page;
        items.truncate(per_page as usize);
        Ok(Page {
            items,
            total: None,
            per_page,
            current_page: page,
            more_pages,
        })
    }

    /// Raw bulk insert; no timestamps or events.
    async fn insert(&self, model: &ModelSchema, rows: Vec<Row>) -> Result<bool, RepoError>;

    /// Updates every row matched by `query`, returning the affected count.
    async fn update(&self, query: Self::Query, values: Row) -> Result<u64, RepoError>;

    /// Deletes every row matched by `query` (soft delete when the model supports it).
    async fn delete(&self, query: Self::Query) -> Result<u64, RepoError>;

    /// Inserts or updates a single entity, assigning keys and timestamps.
    async fn save(&self, model: &ModelSchema, entity: &mut Entity) -> Result<(), RepoError>;

    async fn delete_entity(&self, model: &ModelSchema, entity: &Entity) -> Result<bool, RepoError>;

    async fn restore_entity(&self, model: &ModelSchema, entity: &mut Entity) -> Result<bool, RepoError>;

    /// Replaces (or, without `detaching`, extends) the pivot membership of `parent`.
    async fn sync_pivot(
        &self,
        model: &ModelSchema,
        parent: &Entity,
        relation: &RelationDef,
        ids: &[Value],
        detaching: bool,
    ) -> Result<SyncChanges, RepoError>;

    async fn begin_transaction(&self) -> Result<(), RepoError>;
    async fn commit(&self) -> Result<(), RepoError>;
    async fn rollback(&self) -> Result<(), RepoError>;
    fn transaction_level(&self) -> usize;
}
