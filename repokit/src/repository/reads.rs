use serde_json::{Value, json};

use super::{Repository, display_key};
use crate::{
    clauses::{AggregateFunction, ClauseRecorder, Conditions},
    errors::RepoError,
    query::Engine,
    types::{Entity, Page},
};

impl<E: Engine> Repository<E> {
    pub async fn find(&mut self, id: impl Into<Value>) -> Result<Option<Entity>, RepoError> {
        let id = id.into();
        let key = self.model.primary_key.clone();
        self.where_(key, "=", id.clone());
        self.cached("find", json!([id]), |engine, query| async move { engine.first(query).await })
            .await
    }

    pub async fn find_many<I, V>(&mut self, ids: I) -> Result<Vec<Entity>, RepoError>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let ids: Vec<Value> = ids.into_iter().map(Into::into).collect();
        let key = self.model.primary_key.clone();
        self.where_in(key, ids.clone());
        self.cached("find_many", json!([ids]), |engine, query| async move { engine.get(query).await })
            .await
    }

    /// Like [`find`](Self::find), failing with `EntityNotFound` when nothing matches.
    pub async fn find_or_fail(&mut self, id: impl Into<Value>) -> Result<Entity, RepoError> {
        let id = id.into();
        self.find(id.clone()).await?.ok_or_else(|| RepoError::EntityNotFound {
            model: self.model.name.clone(),
            id: display_key(&id),
        })
    }

    /// Fails with `EntityNotFound` naming every id that matched no row.
    pub async fn find_many_or_fail<I, V>(&mut self, ids: I) -> Result<Vec<Entity>, RepoError>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let ids: Vec<Value> = ids.into_iter().map(Into::into).collect();
        let found = self.find_many(ids.clone()).await?;
        let missing: Vec<String> = ids
            .iter()
            .filter(|id| !found.iter().any(|entity| entity.key(&self.model) == Some(*id)))
            .map(display_key)
            .collect();
        if !missing.is_empty() {
            return Err(RepoError::EntityNotFound {
                model: self.model.name.clone(),
                id: missing.join(", "),
            });
        }
        Ok(found)
    }

    pub async fn find_by(&mut self, attribute: impl Into<String>, value: impl Into<Value>) -> Result<Option<Entity>, RepoError> {
        let (attribute, value) = (attribute.into(), value.into());
        self.where_(attribute.clone(), "=", value.clone());
        self.cached("find_by", json!([attribute, value]), |engine, query| async move {
            engine.first(query).await
        })
        .await
    }

    pub async fn find_first(&mut self) -> Result<Option<Entity>, RepoError> {
        self.cached("find_first", json!([]), |engine, query| async move { engine.first(query).await })
            .await
    }

    pub async fn first_where(
        &mut self,
        column: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<Option<Entity>, RepoError> {
        let (column, operator, value) = (column.into(), operator.into(), value.into());
        self.where_(column.clone(), operator.clone(), value.clone());
        self.cached("first_where", json!([column, operator, value]), |engine, query| async move {
            engine.first(query).await
        })
        .await
    }

    /// Newest row by `column` (usually `created_at`).
    pub async fn first_latest(&mut self, column: impl Into<String>) -> Result<Option<Entity>, RepoError> {
        let column = column.into();
        self.latest(column.clone());
        self.cached("first_latest", json!([column]), |engine, query| async move {
            engine.first(query).await
        })
        .await
    }

    pub async fn first_oldest(&mut self, column: impl Into<String>) -> Result<Option<Entity>, RepoError> {
        let column = column.into();
        self.oldest(column.clone());
        self.cached("first_oldest", json!([column]), |engine, query| async move {
            engine.first(query).await
        })
        .await
    }

    pub async fn find_all(&mut self) -> Result<Vec<Entity>, RepoError> {
        self.cached("find_all", json!([]), |engine, query| async move { engine.get(query).await })
            .await
    }

    pub async fn find_where(
        &mut self,
        column: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<Vec<Entity>, RepoError> {
        let (column, operator, value) = (column.into(), operator.into(), value.into());
        self.where_(column.clone(), operator.clone(), value.clone());
        self.cached("find_where", json!([column, operator, value]), |engine, query| async move {
            engine.get(query).await
        })
        .await
    }

    pub async fn find_where_in<I, V>(&mut self, column: impl Into<String>, values: I) -> Result<Vec<Entity>, RepoError>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let column = column.into();
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        self.where_in(column.clone(), values.clone());
        self.cached("find_where_in", json!([column, values]), |engine, query| async move {
            engine.get(query).await
        })
        .await
    }

    pub async fn find_where_not_in<I, V>(&mut self, column: impl Into<String>, values: I) -> Result<Vec<Entity>, RepoError>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let column = column.into();
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        self.where_not_in(column.clone(), values.clone());
        self.cached("find_where_not_in", json!([column, values]), |engine, query| async move {
            engine.get(query).await
        })
        .await
    }

    /// Rows with at least one related row through `relation`, optionally constrained.
    pub async fn find_where_has(
        &mut self,
        relation: impl Into<String>,
        conditions: Option<Conditions>,
    ) -> Result<Vec<Entity>, RepoError> {
        let relation = relation.into();
        let args = json!([relation, conditions]);
        match conditions {
            Some(conditions) => self.where_has(relation, conditions),
            None => self.has(relation, ">=", 1),
        };
        self.cached("find_where_has", args, |engine, query| async move { engine.get(query).await })
            .await
    }

    // ---- aggregates -------------------------------------------------------

    pub async fn count(&mut self) -> Result<u64, RepoError> {
        self.cached("count", json!([]), |engine, query| async move { engine.count(query).await })
            .await
    }

    async fn aggregate(&mut self, function: AggregateFunction, column: String) -> Result<Option<f64>, RepoError> {
        self.cached(function.as_str(), json!([column]), move |engine, query| async move {
            engine.aggregate(query, function, &column).await
        })
        .await
    }

    pub async fn min(&mut self, column: impl Into<String>) -> Result<Option<f64>, RepoError> {
        self.aggregate(AggregateFunction::Min, column.into()).await
    }

    pub async fn max(&mut self, column: impl Into<String>) -> Result<Option<f64>, RepoError> {
        self.aggregate(AggregateFunction::Max, column.into()).await
    }

    pub async fn avg(&mut self, column: impl Into<String>) -> Result<Option<f64>, RepoError> {
        self.aggregate(AggregateFunction::Avg, column.into()).await
    }

    /// Sum of `column`; zero when no row carries a number.
    pub async fn sum(&mut self, column: impl Into<String>) -> Result<f64, RepoError> {
        Ok(self.aggregate(AggregateFunction::Sum, column.into()).await?.unwrap_or(0.0))
    }

    pub async fn exists(&mut self) -> Result<bool, RepoError> {
        self.cached("exists", json!([]), |engine, query| async move { engine.exists(query).await })
            .await
    }

    /// Whether any row satisfies `column operator value` on top of the recorded clauses.
    pub async fn where_exists_exist(
        &mut self,
        column: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<bool, RepoError> {
        let (column, operator, value) = (column.into(), operator.into(), value.into());
        self.where_(column.clone(), operator.clone(), value.clone());
        self.cached("where_exists_exist", json!([column, operator, value]), |engine, query| async move {
            engine.exists(query).await
        })
        .await
    }

    // ---- pagination -------------------------------------------------------

    /// Length-aware page; `page` is 1-based.
    pub async fn paginate(&mut self, per_page: u64, page: u64) -> Result<Page<Entity>, RepoError> {
        self.cached("paginate", json!([per_page, page]), move |engine, query| async move {
            engine.paginate(query, per_page, page).await
        })
        .await
    }

    pub async fn simple_paginate(&mut self, per_page: u64, page: u64) -> Result<Page<Entity>, RepoError> {
        self.cached("simple_paginate", json!([per_page, page]), move |engine, query| async move {
            engine.simple_paginate(query, per_page, page).await
        })
        .await
    }
}
