use serde_json::Value;

use super::eval::{Clause, Predicate, predicates, raw_unsupported};
use crate::{
    clauses::{
        AggregateFunction, Boolean, Conditions, DatePart, JoinClause, RelationConstraint, ScopeCall, SortOrder,
        SubQuery,
    },
    query::QueryBuilder,
    types::ModelSchema,
};

/// Query handle of the [`MemoryEngine`](super::MemoryEngine).
#[derive(Debug, Clone)]
pub struct MemoryQuery {
    pub(crate) model: ModelSchema,
    pub(crate) wheres: Vec<Clause>,
    pub(crate) havings: Vec<Clause>,
    pub(crate) eager: Vec<RelationConstraint>,
    pub(crate) joins: Vec<JoinClause>,
    pub(crate) counts: Vec<RelationConstraint>,
    pub(crate) exists: Vec<RelationConstraint>,
    pub(crate) aggregates: Vec<(String, String, AggregateFunction)>,
    pub(crate) scopes: Vec<ScopeCall>,
    pub(crate) with_trashed: bool,
    pub(crate) without_global_scopes: bool,
    pub(crate) select: Vec<String>,
    pub(crate) except: Vec<String>,
    pub(crate) offset: Option<u64>,
    pub(crate) limit: Option<u64>,
    pub(crate) group_by: Vec<String>,
    pub(crate) order_by: Vec<(String, SortOrder)>,
    /// Calls the engine cannot honour, reported when the query runs.
    pub(crate) errors: Vec<String>,
}

impl MemoryQuery {
    pub(crate) fn new(model: ModelSchema) -> Self {
        Self {
            model,
            wheres: Vec::new(),
            havings: Vec::new(),
            eager: Vec::new(),
            joins: Vec::new(),
            counts: Vec::new(),
            exists: Vec::new(),
            aggregates: Vec::new(),
            scopes: Vec::new(),
            with_trashed: false,
            without_global_scopes: false,
            select: Vec::new(),
            except: Vec::new(),
            offset: None,
            limit: None,
            group_by: Vec::new(),
            order_by: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn model(&self) -> &ModelSchema {
        &self.model
    }

    fn push(mut self, boolean: Boolean, predicate: Predicate) -> Self {
        self.wheres.push((boolean, predicate));
        self
    }

    fn convert(&mut self, conditions: Option<&Conditions>) -> Vec<Clause> {
        match conditions {
            Some(conditions) => predicates(conditions, &mut self.errors),
            None => Vec::new(),
        }
    }
}

impl QueryBuilder for MemoryQuery {
    fn where_basic(self, column: &str, operator: &str, value: &Value, boolean: Boolean) -> Self {
        self.push(
            boolean,
            Predicate::Compare {
                column: column.to_string(),
                operator: operator.to_string(),
                value: value.clone(),
            },
        )
    }

    fn where_in(self, column: &str, values: &[Value], boolean: Boolean, negate: bool) -> Self {
        self.push(
            boolean,
            Predicate::In {
                column: column.to_string(),
                values: values.to_vec(),
                negate,
            },
        )
    }

    fn where_null(self, column: &str, boolean: Boolean, negate: bool) -> Self {
        self.push(
            boolean,
            Predicate::Null {
                column: column.to_string(),
                negate,
            },
        )
    }

    fn where_column(self, first: &str, operator: &str, second: &str, boolean: Boolean) -> Self {
        self.push(
            boolean,
            Predicate::Columns {
                first: first.to_string(),
                operator: operator.to_string(),
                second: second.to_string(),
            },
        )
    }

    fn where_nested(mut self, conditions: &Conditions, boolean: Boolean) -> Self {
        let group = predicates(conditions, &mut self.errors);
        self.push(boolean, Predicate::Group(group))
    }

    fn where_between(self, column: &str, low: &Value, high: &Value, boolean: Boolean, negate: bool) -> Self {
        self.push(
            boolean,
            Predicate::Between {
                column: column.to_string(),
                low: low.clone(),
                high: high.clone(),
                negate,
            },
        )
    }

    fn where_json_contains(self, column: &str, value: &Value, boolean: Boolean, negate: bool) -> Self {
        self.push(
            boolean,
            Predicate::JsonContains {
                column: column.to_string(),
                value: value.clone(),
                negate,
            },
        )
    }

    fn where_json_length(self, column: &str, operator: &str, length: i64, boolean: Boolean) -> Self {
        self.push(
            boolean,
            Predicate::JsonLength {
                column: column.to_string(),
                operator: operator.to_string(),
                length,
            },
        )
    }

    fn where_exists(mut self, query: &SubQuery, boolean: Boolean, negate: bool) -> Self {
        let conditions = predicates(&query.conditions, &mut self.errors);
        self.push(
            boolean,
            Predicate::Exists {
                query: query.clone(),
                conditions,
                negate,
            },
        )
    }

    fn where_raw(mut self, sql: &str, _bindings: &[Value], _boolean: Boolean) -> Self {
        self.errors.push(raw_unsupported(sql));
        self
    }

    fn having_raw(mut self, sql: &str, _bindings: &[Value], _boolean: Boolean) -> Self {
        self.errors.push(raw_unsupported(sql));
        self
    }

    fn where_date_part(self, part: DatePart, column: &str, operator: &str, value: &str, boolean: Boolean) -> Self {
        self.push(
            boolean,
            Predicate::DatePart {
                part,
                column: column.to_string(),
                operator: operator.to_string(),
                value: value.to_string(),
            },
        )
    }

    fn has(mut self, relation: &str, operator: &str, count: i64, conditions: Option<&Conditions>, boolean: Boolean) -> Self {
        let conditions = self.convert(conditions);
        self.push(
            boolean,
            Predicate::Has {
                relation: relation.to_string(),
                operator: operator.to_string(),
                count,
                conditions,
                morph_types: None,
            },
        )
    }

    fn has_morph(
        mut self,
        relation: &str,
        types: &[String],
        operator: &str,
        count: i64,
        conditions: Option<&Conditions>,
        boolean: Boolean,
    ) -> Self {
        let conditions = self.convert(conditions);
        self.push(
            boolean,
            Predicate::Has {
                relation: relation.to_string(),
                operator: operator.to_string(),
                count,
                conditions,
                morph_types: Some(types.to_vec()),
            },
        )
    }

    fn with(mut self, relation: &RelationConstraint) -> Self {
        self.eager.push(relation.clone());
        self
    }

    fn join(mut self, join: &JoinClause) -> Self {
        self.joins.push(join.clone());
        self
    }

    fn with_count(mut self, relation: &RelationConstraint) -> Self {
        self.counts.push(relation.clone());
        self
    }

    fn with_exists(mut self, relation: &RelationConstraint) -> Self {
        self.exists.push(relation.clone());
        self
    }

    fn with_aggregate(mut self, relation: &str, column: &str, function: AggregateFunction) -> Self {
        self.aggregates.push((relation.to_string(), column.to_string(), function));
        self
    }

    fn call_scope(mut self, name: &str, args: &[Value]) -> Self {
        self.scopes.push(ScopeCall {
            name: name.to_string(),
            args: args.to_vec(),
        });
        self
    }

    fn having(mut self, column: &str, operator: &str, value: &Value, boolean: Boolean) -> Self {
        self.havings.push((
            boolean,
            Predicate::Compare {
                column: column.to_string(),
                operator: operator.to_string(),
                value: value.clone(),
            },
        ));
        self
    }

    fn with_trashed(mut self) -> Self {
        self.with_trashed = true;
        self
    }

    fn without_global_scopes(mut self) -> Self {
        self.without_global_scopes = true;
        self
    }

    fn select(mut self, columns: &[String]) -> Self {
        self.select.extend_from_slice(columns);
        self
    }

    fn except(mut self, columns: &[String]) -> Self {
        self.except.extend_from_slice(columns);
        self
    }

    fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    fn group_by(mut self, column: &str) -> Self {
        self.group_by.push(column.to_string());
        self
    }

    fn order_by(mut self, column: &str, direction: SortOrder) -> Self {
        self.order_by.push((column.to_string(), direction));
        self
    }
}
