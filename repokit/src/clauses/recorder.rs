use serde_json::Value;

use super::{
    AggregateClause, BetweenClause, Boolean, ClauseStore, Conditions, DateClause, ExistsClause, HasClause,
    HavingClause, JoinClause, JoinKind, JsonContainsClause, JsonLengthClause, MorphHasClause, NestedClause,
    NullClause, OrderClause, RawClause, RelationConstraint, ScopeCall, SortOrder, SubQuery, WhenClause,
    WhereClause, WhereInClause,
};

fn values<I, V>(values: I) -> Vec<Value>
where
    I: IntoIterator<Item = V>,
    V: Into<Value>,
{
    values.into_iter().map(Into::into).collect()
}

fn strings<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

fn has_clause(relation: impl Into<String>, operator: &str, count: i64, conditions: Option<Conditions>, boolean: Boolean) -> HasClause {
    HasClause {
        relation: relation.into(),
        operator: operator.to_string(),
        count,
        conditions,
        boolean,
    }
}

/// Fluent recording methods, one per clause category.
///
/// Implementors only expose their [`ClauseStore`]; every method appends one
/// tuple and returns the implementor for chaining.
pub trait ClauseRecorder {
    fn clause_store(&mut self) -> &mut ClauseStore;

    // ---- basic filters --------------------------------------------------

    fn where_(&mut self, column: impl Into<String>, operator: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.clause_store().where_.push(WhereClause {
            column: column.into(),
            operator: operator.into(),
            value: value.into(),
            boolean: Boolean::And,
        });
        self
    }

    fn or_where(&mut self, column: impl Into<String>, operator: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.clause_store().or_where.push(WhereClause {
            column: column.into(),
            operator: operator.into(),
            value: value.into(),
            boolean: Boolean::Or,
        });
        self
    }

    fn where_in<I, V>(&mut self, column: impl Into<String>, items: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.clause_store().where_in.push(WhereInClause {
            column: column.into(),
            values: values(items),
            boolean: Boolean::And,
            negate: false,
        });
        self
    }

    fn where_not_in<I, V>(&mut self, column: impl Into<String>, items: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.clause_store().where_not_in.push(WhereInClause {
            column: column.into(),
            values: values(items),
            boolean: Boolean::And,
            negate: true,
        });
        self
    }

    fn where_nested(&mut self, conditions: Conditions) -> &mut Self {
        self.clause_store().where_nested.push(NestedClause {
            conditions,
            boolean: Boolean::And,
        });
        self
    }

    fn or_where_nested(&mut self, conditions: Conditions) -> &mut Self {
        self.clause_store().where_nested.push(NestedClause {
            conditions,
            boolean: Boolean::Or,
        });
        self
    }

    fn where_null(&mut self, column: impl Into<String>) -> &mut Self {
        self.clause_store().where_null.push(NullClause {
            column: column.into(),
            boolean: Boolean::And,
            negate: false,
        });
        self
    }

    fn where_not_null(&mut self, column: impl Into<String>) -> &mut Self {
        self.clause_store().where_null.push(NullClause {
            column: column.into(),
            boolean: Boolean::And,
            negate: true,
        });
        self
    }

    // ---- json -------------------------------------------------------------

    fn where_json_contains(&mut self, column: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.clause_store().where_json_contains.push(JsonContainsClause {
            column: column.into(),
            value: value.into(),
            boolean: Boolean::And,
            negate: false,
        });
        self
    }

    fn or_where_json_contains(&mut self, column: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.clause_store().or_where_json_contains.push(JsonContainsClause {
            column: column.into(),
            value: value.into(),
            boolean: Boolean::Or,
            negate: false,
        });
        self
    }

    fn where_json_doesnt_contain(&mut self, column: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.clause_store().where_json_doesnt_contain.push(JsonContainsClause {
            column: column.into(),
            value: value.into(),
            boolean: Boolean::And,
            negate: true,
        });
        self
    }

    fn where_json_length(&mut self, column: impl Into<String>, operator: impl Into<String>, length: i64) -> &mut Self {
        self.clause_store().where_json_length.push(JsonLengthClause {
            column: column.into(),
            operator: operator.into(),
            length,
            boolean: Boolean::And,
        });
        self
    }

    fn when(&mut self, condition: bool, then: Conditions, otherwise: Option<Conditions>) -> &mut Self {
        self.clause_store().when.push(WhenClause {
            condition,
            then,
            otherwise,
        });
        self
    }

    // ---- ranges, exists, raw ------------------------------------------------

    fn where_between(&mut self, column: impl Into<String>, low: impl Into<Value>, high: impl Into<Value>) -> &mut Self {
        self.clause_store().where_between.push(BetweenClause {
            column: column.into(),
            low: low.into(),
            high: high.into(),
            boolean: Boolean::And,
            negate: false,
        });
        self
    }

    fn or_where_between(&mut self, column: impl Into<String>, low: impl Into<Value>, high: impl Into<Value>) -> &mut Self {
        self.clause_store().or_where_between.push(BetweenClause {
            column: column.into(),
            low: low.into(),
            high: high.into(),
            boolean: Boolean::Or,
            negate: false,
        });
        self
    }

    fn where_not_between(&mut self, column: impl Into<String>, low: impl Into<Value>, high: impl Into<Value>) -> &mut Self {
        self.clause_store().where_not_between.push(BetweenClause {
            column: column.into(),
            low: low.into(),
            high: high.into(),
            boolean: Boolean::And,
            negate: true,
        });
        self
    }

    fn where_exists(&mut self, query: SubQuery) -> &mut Self {
        self.clause_store().where_exists.push(ExistsClause {
            query,
            boolean: Boolean::And,
            negate: false,
        });
        self
    }

    fn where_not_exists(&mut self, query: SubQuery) -> &mut Self {
        self.clause_store().where_exists.push(ExistsClause {
            query,
            boolean: Boolean::And,
            negate: true,
        });
        self
    }

    fn where_raw(&mut self, sql: impl Into<String>, bindings: Vec<Value>) -> &mut Self {
        self.clause_store().where_raw.push(RawClause {
            sql: sql.into(),
            bindings,
            boolean: Boolean::And,
        });
        self
    }

    fn or_where_raw(&mut self, sql: impl Into<String>, bindings: Vec<Value>) -> &mut Self {
        self.clause_store().or_where_raw.push(RawClause {
            sql: sql.into(),
            bindings,
            boolean: Boolean::Or,
        });
        self
    }

    fn having_raw(&mut self, sql: impl Into<String>, bindings: Vec<Value>) -> &mut Self {
        self.clause_store().having_raw.push(RawClause {
            sql: sql.into(),
            bindings,
            boolean: Boolean::And,
        });
        self
    }

    // ---- dates ------------------------------------------------------------

    fn where_date(&mut self, column: impl Into<String>, operator: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let clause = date_clause(column, operator, value);
        self.clause_store().where_date.push(clause);
        self
    }

    fn where_month(&mut self, column: impl Into<String>, operator: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let clause = date_clause(column, operator, value);
        self.clause_store().where_month.push(clause);
        self
    }

    fn where_day(&mut self, column: impl Into<String>, operator: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let clause = date_clause(column, operator, value);
        self.clause_store().where_day.push(clause);
        self
    }

    fn where_time(&mut self, column: impl Into<String>, operator: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let clause = date_clause(column, operator, value);
        self.clause_store().where_time.push(clause);
        self
    }

    // ---- relation existence -----------------------------------------------

    fn has(&mut self, relation: impl Into<String>, operator: &str, count: i64) -> &mut Self {
        let clause = has_clause(relation, operator, count, None, Boolean::And);
        self.clause_store().has.push(clause);
        self
    }

    fn or_has(&mut self, relation: impl Into<String>, operator: &str, count: i64) -> &mut Self {
        let clause = has_clause(relation, operator, count, None, Boolean::Or);
        self.clause_store().or_has.push(clause);
        self
    }

    fn where_has(&mut self, relation: impl Into<String>, conditions: Conditions) -> &mut Self {
        let clause = has_clause(relation, ">=", 1, Some(conditions), Boolean::And);
        self.clause_store().where_has.push(clause);
        self
    }

    fn or_where_has(&mut self, relation: impl Into<String>, conditions: Conditions) -> &mut Self {
        let clause = has_clause(relation, ">=", 1, Some(conditions), Boolean::Or);
        self.clause_store().or_where_has.push(clause);
        self
    }

    fn doesnt_have(&mut self, relation: impl Into<String>) -> &mut Self {
        let clause = has_clause(relation, "<", 1, None, Boolean::And);
        self.clause_store().doesnt_have.push(clause);
        self
    }

    fn or_doesnt_have(&mut self, relation: impl Into<String>) -> &mut Self {
        let clause = has_clause(relation, "<", 1, None, Boolean::Or);
        self.clause_store().or_doesnt_have.push(clause);
        self
    }

    fn where_doesnt_have(&mut self, relation: impl Into<String>, conditions: Conditions) -> &mut Self {
        let clause = has_clause(relation, "<", 1, Some(conditions), Boolean::And);
        self.clause_store().where_doesnt_have.push(clause);
        self
    }

    fn or_where_doesnt_have(&mut self, relation: impl Into<String>, conditions: Conditions) -> &mut Self {
        let clause = has_clause(relation, "<", 1, Some(conditions), Boolean::Or);
        self.clause_store().or_where_doesnt_have.push(clause);
        self
    }

    fn has_morph<I, S>(&mut self, relation: impl Into<String>, types: I, operator: &str, count: i64) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.clause_store().has_morph.push(MorphHasClause {
            relation: relation.into(),
            types: strings(types),
            operator: operator.to_string(),
            count,
            conditions: None,
            boolean: Boolean::And,
        });
        self
    }

    fn where_has_morph<I, S>(&mut self, relation: impl Into<String>, types: I, conditions: Conditions) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.clause_store().where_has_morph.push(MorphHasClause {
            relation: relation.into(),
            types: strings(types),
            operator: ">=".to_string(),
            count: 1,
            conditions: Some(conditions),
            boolean: Boolean::And,
        });
        self
    }

    // ---- eager loading and joins ------------------------------------------

    fn with<I, S>(&mut self, relations: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = self.clause_store();
        for relation in relations {
            store.relations.push(RelationConstraint {
                relation: relation.into(),
                conditions: None,
            });
        }
        self
    }

    fn with_constrained(&mut self, relation: impl Into<String>, conditions: Conditions) -> &mut Self {
        self.clause_store().relations.push(RelationConstraint {
            relation: relation.into(),
            conditions: Some(conditions),
        });
        self
    }

    fn join(&mut self, table: impl Into<String>, first: impl Into<String>, operator: impl Into<String>, second: impl Into<String>) -> &mut Self {
        self.join_clause(JoinClause {
            table: table.into(),
            first: first.into(),
            operator: operator.into(),
            second: second.into(),
            kind: JoinKind::Inner,
            value_comparison: false,
        })
    }

    fn left_join(&mut self, table: impl Into<String>, first: impl Into<String>, operator: impl Into<String>, second: impl Into<String>) -> &mut Self {
        self.join_clause(JoinClause {
            table: table.into(),
            first: first.into(),
            operator: operator.into(),
            second: second.into(),
            kind: JoinKind::Left,
            value_comparison: false,
        })
    }

    fn join_clause(&mut self, clause: JoinClause) -> &mut Self {
        self.clause_store().join.push(clause);
        self
    }

    // ---- relation aggregates ----------------------------------------------

    fn with_count(&mut self, relation: impl Into<String>) -> &mut Self {
        self.clause_store().with_count.push(RelationConstraint {
            relation: relation.into(),
            conditions: None,
        });
        self
    }

    fn with_exists(&mut self, relation: impl Into<String>) -> &mut Self {
        self.clause_store().with_exists.push(RelationConstraint {
            relation: relation.into(),
            conditions: None,
        });
        self
    }

    fn with_sum(&mut self, relation: impl Into<String>, column: impl Into<String>) -> &mut Self {
        let clause = aggregate_clause(relation, column);
        self.clause_store().with_sum.push(clause);
        self
    }

    fn with_max(&mut self, relation: impl Into<String>, column: impl Into<String>) -> &mut Self {
        let clause = aggregate_clause(relation, column);
        self.clause_store().with_max.push(clause);
        self
    }

    fn with_min(&mut self, relation: impl Into<String>, column: impl Into<String>) -> &mut Self {
        let clause = aggregate_clause(relation, column);
        self.clause_store().with_min.push(clause);
        self
    }

    fn with_avg(&mut self, relation: impl Into<String>, column: impl Into<String>) -> &mut Self {
        let clause = aggregate_clause(relation, column);
        self.clause_store().with_avg.push(clause);
        self
    }

    // ---- scopes and shaping -----------------------------------------------

    /// Records a named scope. Recording the same name again replaces its arguments in place.
    fn scope(&mut self, name: impl Into<String>, args: Vec<Value>) -> &mut Self {
        let name = name.into();
        let scopes = &mut self.clause_store().scopes;
        match scopes.iter_mut().find(|scope| scope.name == name) {
            Some(existing) => existing.args = args,
            None => scopes.push(ScopeCall { name, args }),
        }
        self
    }

    fn having(&mut self, column: impl Into<String>, operator: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.clause_store().having.push(HavingClause {
            column: column.into(),
            operator: operator.into(),
            value: value.into(),
            boolean: Boolean::And,
        });
        self
    }

    fn or_having(&mut self, column: impl Into<String>, operator: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.clause_store().having.push(HavingClause {
            column: column.into(),
            operator: operator.into(),
            value: value.into(),
            boolean: Boolean::Or,
        });
        self
    }

    fn with_trashed(&mut self) -> &mut Self {
        self.clause_store().with_trashed = true;
        self
    }

    fn without_global_scopes(&mut self) -> &mut Self {
        self.clause_store().without_global_scopes = true;
        self
    }

    fn select<I, S>(&mut self, columns: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.clause_store().select.extend(strings(columns));
        self
    }

    fn except<I, S>(&mut self, columns: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.clause_store().except.extend(strings(columns));
        self
    }

    // ---- pagination and ordering ------------------------------------------

    fn offset(&mut self, offset: u64) -> &mut Self {
        self.clause_store().offset = Some(offset);
        self
    }

    fn limit(&mut self, limit: u64) -> &mut Self {
        self.clause_store().limit = Some(limit);
        self
    }

    fn group_by<I, S>(&mut self, columns: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.clause_store().group_by.extend(strings(columns));
        self
    }

    fn order_by(&mut self, column: impl Into<String>, direction: SortOrder) -> &mut Self {
        self.clause_store().order_by.push(OrderClause {
            column: column.into(),
            direction,
        });
        self
    }

    fn latest(&mut self, column: impl Into<String>) -> &mut Self {
        self.order_by(column, SortOrder::Desc)
    }

    fn oldest(&mut self, column: impl Into<String>) -> &mut Self {
        self.order_by(column, SortOrder::Asc)
    }
}

fn date_clause(column: impl Into<String>, operator: impl Into<String>, value: impl Into<String>) -> DateClause {
    DateClause {
        column: column.into(),
        operator: operator.into(),
        value: value.into(),
        boolean: Boolean::And,
    }
}

fn aggregate_clause(relation: impl Into<String>, column: impl Into<String>) -> AggregateClause {
    AggregateClause {
        relation: relation.into(),
        column: column.into(),
    }
}

impl ClauseRecorder for ClauseStore {
    fn clause_store(&mut self) -> &mut ClauseStore {
        self
    }
}
