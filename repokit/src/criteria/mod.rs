//! Reusable query modifiers pushed onto a repository.
//!
//! A [`Criterion`] records clauses into the store the repository is about to
//! execute, so criteria are fingerprinted and replayed like hand-written
//! clauses.

mod request;

pub use request::{RequestCriteria, RequestParams};

use serde_json::Value;

use crate::{
    clauses::{ClauseRecorder, ClauseStore, Conditions, SortOrder},
    errors::RepoError,
    types::ModelSchema,
};

pub trait Criterion: Send + Sync {
    /// Identifier used by `pop_criterion`.
    fn name(&self) -> &str;

    fn apply(&self, clauses: &mut ClauseStore, model: &ModelSchema) -> Result<(), RepoError>;
}

#[derive(Debug, Clone)]
pub struct WhereCriteria {
    column: String,
    operator: String,
    value: Value,
}

impl WhereCriteria {
    pub fn new(column: impl Into<String>, operator: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            operator: operator.into(),
            value: value.into(),
        }
    }
}

impl Criterion for WhereCriteria {
    fn name(&self) -> &str {
        "where"
    }

    fn apply(&self, clauses: &mut ClauseStore, _model: &ModelSchema) -> Result<(), RepoError> {
        clauses.where_(self.column.clone(), self.operator.clone(), self.value.clone());
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct OrWhereCriteria {
    column: String,
    operator: String,
    value: Value,
}

impl OrWhereCriteria {
    pub fn new(column: impl Into<String>, operator: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            operator: operator.into(),
            value: value.into(),
        }
    }
}

impl Criterion for OrWhereCriteria {
    fn name(&self) -> &str {
        "or_where"
    }

    fn apply(&self, clauses: &mut ClauseStore, _model: &ModelSchema) -> Result<(), RepoError> {
        clauses.or_where(self.column.clone(), self.operator.clone(), self.value.clone());
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct WhereInCriteria {
    column: String,
    values: Vec<Value>,
}

impl WhereInCriteria {
    pub fn new<I, V>(column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}

impl Criterion for WhereInCriteria {
    fn name(&self) -> &str {
        "where_in"
    }

    fn apply(&self, clauses: &mut ClauseStore, _model: &ModelSchema) -> Result<(), RepoError> {
        clauses.where_in(self.column.clone(), self.values.clone());
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct WhereBetweenCriteria {
    column: String,
    low: Value,
    high: Value,
}

impl WhereBetweenCriteria {
    pub fn new(column: impl Into<String>, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            low: low.into(),
            high: high.into(),
        }
    }
}

impl Criterion for WhereBetweenCriteria {
    fn name(&self) -> &str {
        "where_between"
    }

    fn apply(&self, clauses: &mut ClauseStore, _model: &ModelSchema) -> Result<(), RepoError> {
        clauses.where_between(self.column.clone(), self.low.clone(), self.high.clone());
        Ok(())
    }
}

/// Groups by one column or several.
#[derive(Debug, Clone)]
pub struct GroupByCriteria {
    columns: Vec<String>,
}

impl GroupByCriteria {
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            columns: vec![column.into()],
        }
    }

    pub fn many<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }
}

impl Criterion for GroupByCriteria {
    fn name(&self) -> &str {
        "group_by"
    }

    fn apply(&self, clauses: &mut ClauseStore, _model: &ModelSchema) -> Result<(), RepoError> {
        clauses.group_by(self.columns.iter().cloned());
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct OrderByCriteria {
    column: String,
    direction: SortOrder,
}

impl OrderByCriteria {
    pub fn new(column: impl Into<String>, direction: SortOrder) -> Self {
        Self {
            column: column.into(),
            direction,
        }
    }
}

impl Criterion for OrderByCriteria {
    fn name(&self) -> &str {
        "order_by"
    }

    fn apply(&self, clauses: &mut ClauseStore, _model: &ModelSchema) -> Result<(), RepoError> {
        clauses.order_by(self.column.clone(), self.direction);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OffsetCriteria(pub u64);

impl Criterion for OffsetCriteria {
    fn name(&self) -> &str {
        "offset"
    }

    fn apply(&self, clauses: &mut ClauseStore, _model: &ModelSchema) -> Result<(), RepoError> {
        clauses.offset(self.0);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LimitCriteria(pub u64);

impl Criterion for LimitCriteria {
    fn name(&self) -> &str {
        "limit"
    }

    fn apply(&self, clauses: &mut ClauseStore, _model: &ModelSchema) -> Result<(), RepoError> {
        clauses.limit(self.0);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OffsetLimitCriteria {
    pub offset: u64,
    pub limit: u64,
}

impl Criterion for OffsetLimitCriteria {
    fn name(&self) -> &str {
        "offset_limit"
    }

    fn apply(&self, clauses: &mut ClauseStore, _model: &ModelSchema) -> Result<(), RepoError> {
        clauses.offset(self.offset).limit(self.limit);
        Ok(())
    }
}

/// `LIKE %term%` across model columns and relation columns, OR-combined.
#[derive(Debug, Clone)]
pub struct SearchCriteria {
    term: String,
    columns: Vec<(Option<String>, String)>,
}

impl SearchCriteria {
    pub fn new(term: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            columns: Vec::new(),
        }
    }

    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.columns.push((None, column.into()));
        self
    }

    /// Searches `column` on rows reached through `relation`.
    pub fn relation_column(mut self, relation: impl Into<String>, column: impl Into<String>) -> Self {
        self.columns.push((Some(relation.into()), column.into()));
        self
    }
}

impl Criterion for SearchCriteria {
    fn name(&self) -> &str {
        "search"
    }

    fn apply(&self, clauses: &mut ClauseStore, _model: &ModelSchema) -> Result<(), RepoError> {
        let pattern = format!("%{}%", self.term);
        let group = self
            .columns
            .iter()
            .enumerate()
            .fold(Conditions::new(), |group, (index, (relation, column))| {
                let first = index == 0;
                match relation {
                    Some(relation) => {
                        let inner = Some(Conditions::new().where_(column.clone(), "like", pattern.clone()));
                        match first {
                            true => group.where_has(relation.clone(), inner),
                            false => group.or_where_has(relation.clone(), inner),
                        }
                    }
                    None if first => group.where_(column.clone(), "like", pattern.clone()),
                    None => group.or_where(column.clone(), "like", pattern.clone()),
                }
            });
        if !group.is_empty() {
            clauses.where_nested(group);
        }
        Ok(())
    }
}
