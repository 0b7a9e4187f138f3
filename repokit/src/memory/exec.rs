use std::collections::HashMap;

use serde_json::Value;

use super::{
    MemoryDatabase,
    eval::{
        Clause, Predicate, compare, compare_count, compare_date_part, json_contains, json_length, lookup, numeric,
        predicates, sort_cmp, values_equal,
    },
    query::MemoryQuery,
};
use crate::{
    clauses::{AggregateFunction, Boolean, Conditions, JoinClause, JoinKind, RelationConstraint, SortOrder},
    errors::RepoError,
    types::{ModelSchema, RelationDef, RelationKind, Row},
};

pub(crate) fn is_trashed(model: &ModelSchema, row: &Row) -> bool {
    model.soft_deletes && row.get("deleted_at").is_some_and(|value| !value.is_null())
}

fn checked(conditions: &Conditions) -> Result<Vec<Clause>, RepoError> {
    let mut errors = Vec::new();
    let clauses = predicates(conditions, &mut errors);
    match errors.is_empty() {
        true => Ok(clauses),
        false => Err(RepoError::query(errors.join("; "))),
    }
}

impl MemoryDatabase {
    pub(crate) fn table_rows(&self, table: &str) -> &[Row] {
        self.tables.get(table).map(|table| table.rows.as_slice()).unwrap_or_default()
    }

    fn relation<'m>(&self, model: &'m ModelSchema, name: &str) -> Result<&'m RelationDef, RepoError> {
        model.relation(name).ok_or_else(|| {
            RepoError::query(format!("call to undefined relationship [{name}] on model [{}]", model.name))
        })
    }

    fn scope_clauses(&self, model: &ModelSchema, name: &str, args: &[Value]) -> Result<Vec<Clause>, RepoError> {
        let scope = self
            .scopes
            .get(&(model.name.clone(), name.to_string()))
            .ok_or_else(|| RepoError::query(format!("call to undefined scope [{name}] on model [{}]", model.name)))?;
        checked(&scope(args))
    }

    fn global_clauses(&self, model: &ModelSchema) -> Result<Vec<Clause>, RepoError> {
        let Some(scopes) = self.global_scopes.get(&model.name) else {
            return Ok(Vec::new());
        };
        scopes
            .iter()
            .map(|(_, scope)| Ok((Boolean::And, Predicate::Group(checked(&scope(&[]))?))))
            .collect()
    }

    /// Rows a fresh query over `model` can see: not trashed, passing global scopes.
    pub(crate) fn visible_rows(&self, model: &ModelSchema) -> Result<Vec<Row>, RepoError> {
        let globals = self.global_clauses(model)?;
        let mut visible = Vec::new();
        for row in self.table_rows(&model.table) {
            if !is_trashed(model, row) && self.matches(model, row, &globals)? {
                visible.push(row.clone());
            }
        }
        Ok(visible)
    }

    // ---- predicate evaluation ---------------------------------------------

    /// Evaluates a clause list with SQL precedence (AND binds tighter than OR).
    pub(crate) fn matches(&self, model: &ModelSchema, row: &Row, clauses: &[Clause]) -> Result<bool, RepoError> {
        let mut any = false;
        let mut current: Option<bool> = None;
        for (boolean, predicate) in clauses {
            current = Some(match (boolean, current) {
                (_, None) => self.eval(model, row, predicate)?,
                (Boolean::And, Some(previous)) => previous && self.eval(model, row, predicate)?,
                (Boolean::Or, Some(previous)) => {
                    any |= previous;
                    self.eval(model, row, predicate)?
                }
            });
        }
        Ok(any || current.unwrap_or(true))
    }

    fn eval(&self, model: &ModelSchema, row: &Row, predicate: &Predicate) -> Result<bool, RepoError> {
        match predicate {
            Predicate::Compare {
                column,
                operator,
                value,
            } => compare(operator, lookup(row, column).as_ref(), value),
            Predicate::Columns {
                first,
                operator,
                second,
            } => match lookup(row, second) {
                Some(right) => compare(operator, lookup(row, first).as_ref(), &right),
                None => Ok(false),
            },
            Predicate::In { column, values, negate } => {
                let Some(value) = lookup(row, column).filter(|value| !value.is_null()) else {
                    return Ok(false);
                };
                let found = values.iter().any(|candidate| values_equal(&value, candidate));
                Ok(found != *negate)
            }
            Predicate::Null { column, negate } => {
                let is_null = lookup(row, column).is_none_or(|value| value.is_null());
                Ok(is_null != *negate)
            }
            Predicate::Between {
                column,
                low,
                high,
                negate,
            } => {
                let value = lookup(row, column);
                if value.as_ref().is_none_or(Value::is_null) {
                    return Ok(false);
                }
                let inside = compare(">=", value.as_ref(), low)? && compare("<=", value.as_ref(), high)?;
                Ok(inside != *negate)
            }
            Predicate::JsonContains { column, value, negate } => {
                Ok(json_contains(lookup(row, column), value) != *negate)
            }
            Predicate::JsonLength {
                column,
                operator,
                length,
            } => match json_length(lookup(row, column)) {
                Some(actual) => compare_count(actual, operator, *length),
                None => Ok(false),
            },
            Predicate::DatePart {
                part,
                column,
                operator,
                value,
            } => compare_date_part(*part, lookup(row, column), operator, value),
            Predicate::Group(clauses) => self.matches(model, row, clauses),
            Predicate::Has {
                relation,
                operator,
                count,
                conditions,
                morph_types,
            } => {
                let found = self.count_related(model, row, relation, conditions, morph_types.as_deref())?;
                compare_count(found, operator, *count)
            }
            Predicate::Exists {
                query,
                conditions,
                negate,
            } => {
                let sub_model = self
                    .models
                    .get_by_table(&query.table)
                    .unwrap_or_else(|| ModelSchema::new(query.table.clone(), query.table.clone()));
                let mut found = false;
                for candidate in self.table_rows(&query.table) {
                    if self.matches(&sub_model, candidate, conditions)? {
                        found = true;
                        break;
                    }
                }
                Ok(found != *negate)
            }
        }
    }

    fn count_related(
        &self,
        model: &ModelSchema,
        row: &Row,
        path: &str,
        conditions: &[Clause],
        morph_types: Option<&[String]>,
    ) -> Result<usize, RepoError> {
        let (head, tail) = split_path(path);
        let relation = self.relation(model, head)?;
        let Some((related_model, related)) = self.related(model, row, relation)? else {
            return Ok(0);
        };
        if let Some(types) = morph_types.filter(|_| relation.kind == RelationKind::MorphTo) {
            if !types.iter().any(|name| *name == related_model.name) {
                return Ok(0);
            }
        }
        let mut found = 0;
        for candidate in &related {
            let hit = match tail {
                Some(rest) => self.count_related(&related_model, candidate, rest, conditions, None)? > 0,
                None => self.matches(&related_model, candidate, conditions)?,
            };
            if hit {
                found += 1;
            }
        }
        Ok(found)
    }

    // ---- relations --------------------------------------------------------

    /// Rows related to `row` through `relation`, with the related model.
    /// `None` when a polymorphic owner points at no resolvable model.
    pub(crate) fn related(
        &self,
        model: &ModelSchema,
        row: &Row,
        relation: &RelationDef,
    ) -> Result<Option<(ModelSchema, Vec<Row>)>, RepoError> {
        let key_matches = |candidate: &Row, column: &str, key: &Option<Value>| match (lookup(candidate, column), key) {
            (Some(left), Some(right)) => values_equal(&left, right),
            _ => false,
        };

        match relation.kind {
            RelationKind::HasOne | RelationKind::HasMany | RelationKind::MorphOne | RelationKind::MorphMany => {
                let related_model = self.models.resolve(&relation.related)?;
                let key = lookup(row, &relation.local_key).filter(|value| !value.is_null());
                let morph_type = relation.morph_type.as_deref();
                let rows = self
                    .visible_rows(&related_model)?
                    .into_iter()
                    .filter(|candidate| key_matches(candidate, &relation.foreign_key, &key))
                    .filter(|candidate| match morph_type {
                        Some(column) => lookup(candidate, column).as_ref().and_then(Value::as_str) == Some(model.name.as_str()),
                        None => true,
                    })
                    .collect();
                Ok(Some((related_model, rows)))
            }
            RelationKind::BelongsTo => {
                let related_model = self.models.resolve(&relation.related)?;
                let key = lookup(row, &relation.foreign_key).filter(|value| !value.is_null());
                let rows = self
                    .visible_rows(&related_model)?
                    .into_iter()
                    .filter(|candidate| key_matches(candidate, &relation.local_key, &key))
                    .collect();
                Ok(Some((related_model, rows)))
            }
            RelationKind::BelongsToMany => {
                let related_model = self.models.resolve(&relation.related)?;
                let Some(pivot) = relation.pivot.as_ref() else {
                    return Err(RepoError::query(format!("relation [{}] has no pivot table", relation.name)));
                };
                let key = lookup(row, &relation.local_key).filter(|value| !value.is_null());
                let ids: Vec<Value> = self
                    .table_rows(&pivot.table)
                    .iter()
                    .filter(|entry| key_matches(entry, &pivot.foreign_pivot_key, &key))
                    .filter_map(|entry| lookup(entry, &pivot.related_pivot_key))
                    .collect();
                let rows = self
                    .visible_rows(&related_model)?
                    .into_iter()
                    .filter(|candidate| {
                        lookup(candidate, &related_model.primary_key)
                            .is_some_and(|id| ids.iter().any(|wanted| values_equal(&id, wanted)))
                    })
                    .collect();
                Ok(Some((related_model, rows)))
            }
            RelationKind::MorphTo => {
                let type_column = relation.morph_type.clone().unwrap_or_else(|| format!("{}_type", relation.name));
                let Some(related_model) = lookup(row, &type_column)
                    .as_ref()
                    .and_then(Value::as_str)
                    .and_then(|name| self.models.get(name))
                else {
                    return Ok(None);
                };
                let key = lookup(row, &relation.foreign_key).filter(|value| !value.is_null());
                let primary_key = related_model.primary_key.clone();
                let rows = self
                    .visible_rows(&related_model)?
                    .into_iter()
                    .filter(|candidate| key_matches(candidate, &primary_key, &key))
                    .collect();
                Ok(Some((related_model, rows)))
            }
        }
    }

    fn filter_rows(&self, model: &ModelSchema, rows: Vec<Row>, conditions: Option<&Conditions>) -> Result<Vec<Row>, RepoError> {
        let Some(conditions) = conditions else {
            return Ok(rows);
        };
        let clauses = checked(conditions)?;
        let mut kept = Vec::with_capacity(rows.len());
        for row in rows {
            if self.matches(model, &row, &clauses)? {
                kept.push(row);
            }
        }
        Ok(kept)
    }

    /// Loads `path` (dot-separated for nested relations) for one row.
    fn load(&self, model: &ModelSchema, row: &Row, path: &str, conditions: Option<&Conditions>) -> Result<(String, Value), RepoError> {
        let (head, tail) = split_path(path);
        let relation = self.relation(model, head)?;
        let Some((related_model, mut related)) = self.related(model, row, relation)? else {
            return Ok((head.to_string(), Value::Null));
        };
        match tail {
            None => related = self.filter_rows(&related_model, related, conditions)?,
            Some(rest) => {
                for child in related.iter_mut() {
                    let (key, value) = self.load(&related_model, child, rest, conditions)?;
                    child.insert(key, value);
                }
            }
        }
        let value = if relation.kind.is_singular() {
            related.into_iter().next().map(Value::Object).unwrap_or(Value::Null)
        } else {
            Value::Array(related.into_iter().map(Value::Object).collect())
        };
        Ok((head.to_string(), value))
    }

    fn related_for_aggregate(&self, model: &ModelSchema, row: &Row, constraint: &RelationConstraint) -> Result<Vec<Row>, RepoError> {
        let relation = self.relation(model, &constraint.relation)?;
        match self.related(model, row, relation)? {
            Some((related_model, rows)) => self.filter_rows(&related_model, rows, constraint.conditions.as_ref()),
            None => Ok(Vec::new()),
        }
    }

    // ---- read pipeline ----------------------------------------------------

    fn join_rows(&self, join: &JoinClause, rows: Vec<Row>) -> Result<Vec<Row>, RepoError> {
        let right_rows = self.table_rows(&join.table);
        let combine = |left: &Row, right: &Row| {
            let mut combined = left.clone();
            for (column, value) in right {
                combined.insert(format!("{}.{}", join.table, column), value.clone());
                combined.entry(column.clone()).or_insert_with(|| value.clone());
            }
            combined
        };
        let on = |combined: &Row| -> Result<bool, RepoError> {
            if join.kind == JoinKind::Cross {
                return Ok(true);
            }
            let right = if join.value_comparison {
                Some(Value::from(join.second.clone()))
            } else {
                lookup(combined, &join.second)
            };
            match right {
                Some(right) => compare(&join.operator, lookup(combined, &join.first).as_ref(), &right),
                None => Ok(false),
            }
        };

        let mut joined = Vec::new();
        let mut matched_right = vec![false; right_rows.len()];
        for left in &rows {
            let mut matched = false;
            for (index, right) in right_rows.iter().enumerate() {
                let combined = combine(left, right);
                if on(&combined)? {
                    matched = true;
                    matched_right[index] = true;
                    joined.push(combined);
                }
            }
            if !matched && join.kind == JoinKind::Left {
                joined.push(left.clone());
            }
        }
        if join.kind == JoinKind::Right {
            for (index, right) in right_rows.iter().enumerate() {
                if !matched_right[index] {
                    joined.push(combine(&Row::new(), right));
                }
            }
        }
        Ok(joined)
    }

    /// Rows matching every filter, scope and join; before grouping and pagination.
    pub(crate) fn filtered(&self, query: &MemoryQuery) -> Result<Vec<Row>, RepoError> {
        if !query.errors.is_empty() {
            return Err(RepoError::query(query.errors.join("; ")));
        }
        let model = &query.model;

        let mut clauses: Vec<Clause> = vec![(Boolean::And, Predicate::Group(query.wheres.clone()))];
        for scope in &query.scopes {
            let scoped = self.scope_clauses(model, &scope.name, &scope.args)?;
            clauses.push((Boolean::And, Predicate::Group(scoped)));
        }
        if !query.without_global_scopes {
            clauses.extend(self.global_clauses(model)?);
        }

        let mut rows: Vec<Row> = self
            .table_rows(&model.table)
            .iter()
            .filter(|row| query.with_trashed || !is_trashed(model, row))
            .cloned()
            .collect();
        for join in &query.joins {
            rows = self.join_rows(join, rows)?;
        }

        let mut kept = Vec::with_capacity(rows.len());
        for row in rows {
            if self.matches(model, &row, &clauses)? {
                kept.push(row);
            }
        }
        Ok(kept)
    }

    /// Collapses groups (the last row of each group represents it) and applies `having`.
    fn grouped(&self, query: &MemoryQuery, rows: Vec<Row>) -> Result<Vec<Row>, RepoError> {
        let rows = if query.group_by.is_empty() {
            rows
        } else {
            let mut order: Vec<String> = Vec::new();
            let mut groups: HashMap<String, Row> = HashMap::new();
            for row in rows {
                let key: Vec<Value> = query
                    .group_by
                    .iter()
                    .map(|column| lookup(&row, column).unwrap_or(Value::Null))
                    .collect();
                let key = Value::Array(key).to_string();
                if !groups.contains_key(&key) {
                    order.push(key.clone());
                }
                groups.insert(key, row);
            }
            order.into_iter().filter_map(|key| groups.remove(&key)).collect()
        };
        if query.havings.is_empty() {
            return Ok(rows);
        }
        let mut kept = Vec::with_capacity(rows.len());
        for row in rows {
            if self.matches(&query.model, &row, &query.havings)? {
                kept.push(row);
            }
        }
        Ok(kept)
    }

    fn shape(&self, query: &MemoryQuery, row: Row) -> Result<Row, RepoError> {
        let model = &query.model;
        let mut extras = Row::new();

        for constraint in &query.counts {
            let related = self.related_for_aggregate(model, &row, constraint)?;
            extras.insert(format!("{}_count", constraint.relation), Value::from(related.len() as u64));
        }
        for constraint in &query.exists {
            let related = self.related_for_aggregate(model, &row, constraint)?;
            extras.insert(format!("{}_exists", constraint.relation), Value::Bool(!related.is_empty()));
        }
        for (relation, column, function) in &query.aggregates {
            let constraint = RelationConstraint {
                relation: relation.clone(),
                conditions: None,
            };
            let related = self.related_for_aggregate(model, &row, &constraint)?;
            let values: Vec<f64> = related.iter().filter_map(|r| lookup(r, column)).filter_map(|v| numeric(&v)).collect();
            let key = format!("{relation}_{}_{column}", function.as_str());
            extras.insert(key, aggregate_value(*function, &values));
        }

        let mut loads: Vec<&RelationConstraint> = query.eager.iter().collect();
        loads.sort_by_key(|load| load.relation.matches('.').count());
        for load in loads {
            let (key, value) = self.load(model, &row, &load.relation, load.conditions.as_ref())?;
            extras.insert(key, value);
        }

        let mut shaped = project(row, &query.select, &query.except);
        shaped.extend(extras);
        Ok(shaped)
    }

    pub(crate) fn select_rows(&self, query: &MemoryQuery) -> Result<Vec<Row>, RepoError> {
        let rows = self.filtered(query)?;
        let mut rows = self.grouped(query, rows)?;

        if !query.order_by.is_empty() {
            rows.sort_by(|left, right| {
                query
                    .order_by
                    .iter()
                    .map(|(column, direction)| {
                        let ordering = sort_cmp(lookup(left, column).as_ref(), lookup(right, column).as_ref());
                        match direction {
                            SortOrder::Asc => ordering,
                            SortOrder::Desc => ordering.reverse(),
                        }
                    })
                    .find(|ordering| ordering.is_ne())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }

        let offset = query.offset.unwrap_or(0) as usize;
        let limit = query.limit.map(|limit| limit as usize).unwrap_or(usize::MAX);
        rows.into_iter()
            .skip(offset)
            .take(limit)
            .map(|row| self.shape(query, row))
            .collect()
    }

    pub(crate) fn count_rows(&self, query: &MemoryQuery) -> Result<u64, RepoError> {
        let rows = self.filtered(query)?;
        Ok(self.grouped(query, rows)?.len() as u64)
    }

    pub(crate) fn aggregate_rows(&self, query: &MemoryQuery, function: AggregateFunction, column: &str) -> Result<Option<f64>, RepoError> {
        let rows = self.filtered(query)?;
        let values: Vec<f64> = rows.iter().filter_map(|row| lookup(row, column)).filter_map(|v| numeric(&v)).collect();
        Ok(aggregate_value(function, &values).as_f64())
    }
}

fn split_path(path: &str) -> (&str, Option<&str>) {
    match path.split_once('.') {
        Some((head, tail)) => (head, Some(tail)),
        None => (path, None),
    }
}

fn aggregate_value(function: AggregateFunction, values: &[f64]) -> Value {
    let number = |value: f64| serde_json::Number::from_f64(value).map(Value::Number).unwrap_or(Value::Null);
    match function {
        AggregateFunction::Count => Value::from(values.len() as u64),
        AggregateFunction::Sum => number(values.iter().sum()),
        AggregateFunction::Max => values.iter().copied().reduce(f64::max).map(number).unwrap_or(Value::Null),
        AggregateFunction::Min => values.iter().copied().reduce(f64::min).map(number).unwrap_or(Value::Null),
        AggregateFunction::Avg if values.is_empty() => Value::Null,
        AggregateFunction::Avg => number(values.iter().sum::<f64>() / values.len() as f64),
    }
}

fn project(mut row: Row, select: &[String], except: &[String]) -> Row {
    let short = |column: &str| column.rsplit_once('.').map(|(_, name)| name).unwrap_or(column).to_string();
    if !select.is_empty() && !select.iter().any(|column| column == "*" || column.ends_with(".*")) {
        let wanted: Vec<String> = select.iter().map(|column| short(column)).collect();
        row.retain(|column, _| wanted.contains(column));
    }
    for column in except {
        row.remove(&short(column));
    }
    row
}
