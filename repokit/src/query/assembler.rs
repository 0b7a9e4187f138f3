use super::QueryBuilder;
use crate::clauses::{
    AggregateClause, AggregateFunction, BetweenClause, ClauseStore, DateClause, DatePart, HasClause,
    JsonContainsClause, MorphHasClause, RawClause, WhereClause, WhereInClause,
};

/// Replays every recorded clause onto `query` in category order.
///
/// 1. basic filters, `when`, ranges, exists, raw filters, raw having
/// 2. date parts
/// 3. relation existence
/// 4. eager loads, then joins
/// 5. relation aggregates
/// 6. scopes, having, trashed, global scope removal, projection
/// 7. offset, limit, group by, order by
///
/// Filters therefore compose before any shaping or pagination. The store is not modified.
pub fn assemble<Q: QueryBuilder>(store: &ClauseStore, query: Q) -> Q {
    let query = apply_filters(store, query);
    let query = apply_dates(store, query);
    let query = apply_relation_filters(store, query);
    let query = apply_loads(store, query);
    let query = apply_aggregates(store, query);
    let query = apply_shaping(store, query);
    apply_pagination(store, query)
}

fn wheres<Q: QueryBuilder>(query: Q, clauses: &[WhereClause]) -> Q {
    clauses.iter().fold(query, |query, clause| {
        query.where_basic(&clause.column, &clause.operator, &clause.value, clause.boolean)
    })
}

fn where_ins<Q: QueryBuilder>(query: Q, clauses: &[WhereInClause]) -> Q {
    clauses.iter().fold(query, |query, clause| {
        query.where_in(&clause.column, &clause.values, clause.boolean, clause.negate)
    })
}

fn json_contains<Q: QueryBuilder>(query: Q, clauses: &[JsonContainsClause]) -> Q {
    clauses.iter().fold(query, |query, clause| {
        query.where_json_contains(&clause.column, &clause.value, clause.boolean, clause.negate)
    })
}

fn betweens<Q: QueryBuilder>(query: Q, clauses: &[BetweenClause]) -> Q {
    clauses.iter().fold(query, |query, clause| {
        query.where_between(&clause.column, &clause.low, &clause.high, clause.boolean, clause.negate)
    })
}

fn raws<Q: QueryBuilder>(query: Q, clauses: &[RawClause]) -> Q {
    clauses
        .iter()
        .fold(query, |query, clause| query.where_raw(&clause.sql, &clause.bindings, clause.boolean))
}

fn apply_filters<Q: QueryBuilder>(store: &ClauseStore, query: Q) -> Q {
    let query = wheres(query, &store.where_);
    let query = wheres(query, &store.or_where);
    let query = where_ins(query, &store.where_in);
    let query = where_ins(query, &store.where_not_in);
    let query = store
        .where_nested
        .iter()
        .fold(query, |query, clause| query.where_nested(&clause.conditions, clause.boolean));
    let query = store
        .where_null
        .iter()
        .fold(query, |query, clause| query.where_null(&clause.column, clause.boolean, clause.negate));
    let query = json_contains(query, &store.where_json_contains);
    let query = json_contains(query, &store.or_where_json_contains);
    let query = json_contains(query, &store.where_json_doesnt_contain);
    let query = store.where_json_length.iter().fold(query, |query, clause| {
        query.where_json_length(&clause.column, &clause.operator, clause.length, clause.boolean)
    });
    let query = store.when.iter().fold(query, |query, clause| {
        match (clause.condition, clause.otherwise.as_ref()) {
            (true, _) => query.apply_conditions(&clause.then),
            (false, Some(otherwise)) => query.apply_conditions(otherwise),
            (false, None) => query,
        }
    });
    let query = betweens(query, &store.where_between);
    let query = betweens(query, &store.or_where_between);
    let query = betweens(query, &store.where_not_between);
    let query = store
        .where_exists
        .iter()
        .fold(query, |query, clause| query.where_exists(&clause.query, clause.boolean, clause.negate));
    let query = raws(query, &store.where_raw);
    let query = raws(query, &store.or_where_raw);
    store
        .having_raw
        .iter()
        .fold(query, |query, clause| query.having_raw(&clause.sql, &clause.bindings, clause.boolean))
}

fn dates<Q: QueryBuilder>(query: Q, part: DatePart, clauses: &[DateClause]) -> Q {
    clauses.iter().fold(query, |query, clause| {
        query.where_date_part(part, &clause.column, &clause.operator, &clause.value, clause.boolean)
    })
}

fn apply_dates<Q: QueryBuilder>(store: &ClauseStore, query: Q) -> Q {
    let query = dates(query, DatePart::Date, &store.where_date);
    let query = dates(query, DatePart::Month, &store.where_month);
    let query = dates(query, DatePart::Day, &store.where_day);
    dates(query, DatePart::Time, &store.where_time)
}

fn has_clauses<Q: QueryBuilder>(query: Q, clauses: &[HasClause]) -> Q {
    clauses.iter().fold(query, |query, clause| {
        query.has(
            &clause.relation,
            &clause.operator,
            clause.count,
            clause.conditions.as_ref(),
            clause.boolean,
        )
    })
}

fn morph_clauses<Q: QueryBuilder>(query: Q, clauses: &[MorphHasClause]) -> Q {
    clauses.iter().fold(query, |query, clause| {
        query.has_morph(
            &clause.relation,
            &clause.types,
            &clause.operator,
            clause.count,
            clause.conditions.as_ref(),
            clause.boolean,
        )
    })
}

fn apply_relation_filters<Q: QueryBuilder>(store: &ClauseStore, query: Q) -> Q {
    let query = has_clauses(query, &store.has);
    let query = has_clauses(query, &store.or_has);
    let query = has_clauses(query, &store.where_has);
    let query = has_clauses(query, &store.doesnt_have);
    let query = has_clauses(query, &store.or_doesnt_have);
    let query = has_clauses(query, &store.where_doesnt_have);
    let query = has_clauses(query, &store.or_where_doesnt_have);
    let query = has_clauses(query, &store.or_where_has);
    let query = morph_clauses(query, &store.has_morph);
    morph_clauses(query, &store.where_has_morph)
}

fn apply_loads<Q: QueryBuilder>(store: &ClauseStore, query: Q) -> Q {
    let query = store.relations.iter().fold(query, |query, relation| query.with(relation));
    store.join.iter().fold(query, |query, join| query.join(join))
}

fn relation_aggregates<Q: QueryBuilder>(query: Q, function: AggregateFunction, clauses: &[AggregateClause]) -> Q {
    clauses.iter().fold(query, |query, clause| {
        query.with_aggregate(&clause.relation, &clause.column, function)
    })
}

fn apply_aggregates<Q: QueryBuilder>(store: &ClauseStore, query: Q) -> Q {
    let query = store.with_count.iter().fold(query, |query, relation| query.with_count(relation));
    let query = store.with_exists.iter().fold(query, |query, relation| query.with_exists(relation));
    let query = relation_aggregates(query, AggregateFunction::Sum, &store.with_sum);
    let query = relation_aggregates(query, AggregateFunction::Max, &store.with_max);
    let query = relation_aggregates(query, AggregateFunction::Min, &store.with_min);
    relation_aggregates(query, AggregateFunction::Avg, &store.with_avg)
}

fn apply_shaping<Q: QueryBuilder>(store: &ClauseStore, query: Q) -> Q {
    let query = store
        .scopes
        .iter()
        .fold(query, |query, scope| query.call_scope(&scope.name, &scope.args));
    let mut query = store.having.iter().fold(query, |query, clause| {
        query.having(&clause.column, &clause.operator, &clause.value, clause.boolean)
    });
    if store.with_trashed {
        query = query.with_trashed();
    }
    if store.without_global_scopes {
        query = query.without_global_scopes();
    }
    if !store.select.is_empty() {
        query = query.select(&store.select);
    }
    if !store.except.is_empty() {
        query = query.except(&store.except);
    }
    query
}

fn apply_pagination<Q: QueryBuilder>(store: &ClauseStore, mut query: Q) -> Q {
    if let Some(offset) = store.offset.filter(|offset| *offset > 0) {
        query = query.offset(offset);
    }
    if let Some(limit) = store.limit.filter(|limit| *limit > 0) {
        query = query.limit(limit);
    }
    let query = store.group_by.iter().fold(query, |query, column| query.group_by(column));
    store
        .order_by
        .iter()
        .fold(query, |query, order| query.order_by(&order.column, order.direction))
}
