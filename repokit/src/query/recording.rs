use serde::Serialize;
use serde_json::{Value, json};

use super::QueryBuilder;
use crate::clauses::{AggregateFunction, Boolean, Conditions, DatePart, JoinClause, RelationConstraint, SortOrder, SubQuery};

/// One builder call captured by [`RecordingQuery`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedClause {
    pub method: &'static str,
    pub args: Value,
}

/// A query handle that executes nothing and records every call it receives.
///
/// Used by `Repository::explain` and to check replay order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecordingQuery {
    applied: Vec<AppliedClause>,
}

impl RecordingQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn applied(&self) -> &[AppliedClause] {
        &self.applied
    }

    pub fn into_applied(self) -> Vec<AppliedClause> {
        self.applied
    }

    pub fn methods(&self) -> Vec<&'static str> {
        self.applied.iter().map(|clause| clause.method).collect()
    }

    fn record(mut self, method: &'static str, args: Value) -> Self {
        self.applied.push(AppliedClause { method, args });
        self
    }
}

impl QueryBuilder for RecordingQuery {
    fn where_basic(self, column: &str, operator: &str, value: &Value, boolean: Boolean) -> Self {
        self.record(
            "where",
            json!({"column": column, "operator": operator, "value": value, "boolean": boolean}),
        )
    }

    fn where_in(self, column: &str, values: &[Value], boolean: Boolean, negate: bool) -> Self {
        let method = if negate { "where_not_in" } else { "where_in" };
        self.record(method, json!({"column": column, "values": values, "boolean": boolean}))
    }

    fn where_null(self, column: &str, boolean: Boolean, negate: bool) -> Self {
        let method = if negate { "where_not_null" } else { "where_null" };
        self.record(method, json!({"column": column, "boolean": boolean}))
    }

    fn where_column(self, first: &str, operator: &str, second: &str, boolean: Boolean) -> Self {
        self.record(
            "where_column",
            json!({"first": first, "operator": operator, "second": second, "boolean": boolean}),
        )
    }

    fn where_nested(self, conditions: &Conditions, boolean: Boolean) -> Self {
        self.record("where_nested", json!({"conditions": conditions, "boolean": boolean}))
    }

    fn where_between(self, column: &str, low: &Value, high: &Value, boolean: Boolean, negate: bool) -> Self {
        let method = if negate { "where_not_between" } else { "where_between" };
        self.record(method, json!({"column": column, "values": [low, high], "boolean": boolean}))
    }

    fn where_json_contains(self, column: &str, value: &Value, boolean: Boolean, negate: bool) -> Self {
        let method = if negate { "where_json_doesnt_contain" } else { "where_json_contains" };
        self.record(method, json!({"column": column, "value": value, "boolean": boolean}))
    }

    fn where_json_length(self, column: &str, operator: &str, length: i64, boolean: Boolean) -> Self {
        self.record(
            "where_json_length",
            json!({"column": column, "operator": operator, "value": length, "boolean": boolean}),
        )
    }

    fn where_exists(self, query: &SubQuery, boolean: Boolean, negate: bool) -> Self {
        let method = if negate { "where_not_exists" } else { "where_exists" };
        self.record(method, json!({"query": query, "boolean": boolean}))
    }

    fn where_raw(self, sql: &str, bindings: &[Value], boolean: Boolean) -> Self {
        self.record("where_raw", json!({"sql": sql, "bindings": bindings, "boolean": boolean}))
    }

    fn having_raw(self, sql: &str, bindings: &[Value], boolean: Boolean) -> Self {
        self.record("having_raw", json!({"sql": sql, "bindings": bindings, "boolean": boolean}))
    }

    fn where_date_part(self, part: DatePart, column: &str, operator: &str, value: &str, boolean: Boolean) -> Self {
        let method = match part {
            DatePart::Date => "where_date",
            DatePart::Month => "where_month",
            DatePart::Day => "where_day",
            DatePart::Time => "where_time",
        };
        self.record(
            method,
            json!({"column": column, "operator": operator, "value": value, "boolean": boolean}),
        )
    }

    fn has(self, relation: &str, operator: &str, count: i64, conditions: Option<&Conditions>, boolean: Boolean) -> Self {
        self.record(
            "has",
            json!({
                "relation": relation,
                "operator": operator,
                "count": count,
                "conditions": conditions,
                "boolean": boolean,
            }),
        )
    }

    fn has_morph(
        self,
        relation: &str,
        types: &[String],
        operator: &str,
        count: i64,
        conditions: Option<&Conditions>,
        boolean: Boolean,
    ) -> Self {
        self.record(
            "has_morph",
            json!({
                "relation": relation,
                "types": types,
                "operator": operator,
                "count": count,
                "conditions": conditions,
                "boolean": boolean,
            }),
        )
    }

    fn with(self, relation: &RelationConstraint) -> Self {
        self.record("with", json!(relation))
    }

    fn join(self, join: &JoinClause) -> Self {
        self.record("join", json!(join))
    }

    fn with_count(self, relation: &RelationConstraint) -> Self {
        self.record("with_count", json!(relation))
    }

    fn with_exists(self, relation: &RelationConstraint) -> Self {
        self.record("with_exists", json!(relation))
    }

    fn with_aggregate(self, relation: &str, column: &str, function: AggregateFunction) -> Self {
        self.record(
            "with_aggregate",
            json!({"relation": relation, "column": column, "function": function}),
        )
    }

    fn call_scope(self, name: &str, args: &[Value]) -> Self {
        self.record("call_scope", json!({"name": name, "args": args}))
    }

    fn having(self, column: &str, operator: &str, value: &Value, boolean: Boolean) -> Self {
        self.record(
            "having",
            json!({"column": column, "operator": operator, "value": value, "boolean": boolean}),
        )
    }

    fn with_trashed(self) -> Self {
        self.record("with_trashed", Value::Null)
    }

    fn without_global_scopes(self) -> Self {
        self.record("without_global_scopes", Value::Null)
    }

    fn select(self, columns: &[String]) -> Self {
        self.record("select", json!(columns))
    }

    fn except(self, columns: &[String]) -> Self {
        self.record("except", json!(columns))
    }

    fn offset(self, offset: u64) -> Self {
        self.record("offset", json!(offset))
    }

    fn limit(self, limit: u64) -> Self {
        self.record("limit", json!(limit))
    }

    fn group_by(self, column: &str) -> Self {
        self.record("group_by", json!(column))
    }

    fn order_by(self, column: &str, direction: SortOrder) -> Self {
        self.record("order_by", json!({"column": column, "direction": direction}))
    }
}
