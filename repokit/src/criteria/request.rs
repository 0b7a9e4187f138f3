use std::collections::BTreeMap;

use serde_json::Value;

use super::Criterion;
use crate::{
    clauses::{Boolean, ClauseRecorder, ClauseStore, Condition, Conditions, JoinClause, JoinKind, SortOrder},
    config::CriteriaSettings,
    errors::RepoError,
    types::ModelSchema,
};

/// Query-string parameters of the current request.
pub type RequestParams = BTreeMap<String, String>;

/// Translates request parameters into clauses.
///
/// Understands `search`, `searchFields`, `searchJoin`, `orderBy`, `sortedBy`,
/// `filter`, `with` and `withCount` (names configurable through
/// [`CriteriaSettings`]). Searches only touch the repository's searchable
/// fields.
#[derive(Debug, Clone)]
pub struct RequestCriteria {
    params: RequestParams,
    settings: CriteriaSettings,
    /// Searchable field and its default condition.
    searchable: Vec<(String, String)>,
}

impl RequestCriteria {
    pub fn new(params: RequestParams, settings: CriteriaSettings, searchable: Vec<(String, String)>) -> Self {
        Self {
            params,
            settings,
            searchable,
        }
    }

    fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str).filter(|value| !value.trim().is_empty())
    }

    /// Narrows the searchable fields to those named in `searchFields`, letting
    /// `field:condition` override a field's condition when the condition is accepted.
    fn fields(&self, requested: Option<&str>) -> Result<Vec<(String, String)>, RepoError> {
        let Some(requested) = requested else {
            return Ok(self.searchable.clone());
        };
        let mut overrides: BTreeMap<&str, &str> = BTreeMap::new();
        let mut names = Vec::new();
        for item in requested.split(';') {
            match item.split_once(':') {
                Some((field, condition)) if self.settings.accepted_conditions.iter().any(|c| c == condition) => {
                    overrides.insert(field, condition);
                    names.push(field);
                }
                _ => names.push(item),
            }
        }
        let fields: Vec<(String, String)> = self
            .searchable
            .iter()
            .filter(|(field, _)| names.contains(&field.as_str()))
            .map(|(field, condition)| {
                let condition = overrides.get(field.as_str()).copied().unwrap_or(condition.as_str());
                (field.clone(), condition.to_string())
            })
            .collect();
        if fields.is_empty() {
            return Err(RepoError::InvalidRequest {
                message: format!("fields [{}] are not accepted for search", names.join(",")),
            });
        }
        Ok(fields)
    }

    fn search_group(&self, model: &ModelSchema, search: &str) -> Result<Conditions, RepoError> {
        let params = &self.settings.params;
        let fields = self.fields(self.param(&params.search_fields))?;
        let data = search_data(search);
        let term = search_value(search);
        let force_and = self.param(&params.search_join).is_some_and(|join| join.eq_ignore_ascii_case("and"));

        let mut group = Conditions::new();
        for (field, condition) in fields {
            let condition = condition.trim().to_lowercase();
            let fuzzy = condition == "like" || condition == "ilike";
            let raw = match (data.get(field.as_str()), term) {
                (Some(value), _) => Some(*value),
                (None, Some(term)) if condition != "in" && condition != "between" => Some(term),
                _ => None,
            };
            let Some(raw) = raw else {
                continue;
            };

            let (relation, column) = match field.rsplit_once('.') {
                Some((relation, column)) if !relation.is_empty() => (Some(relation.to_string()), column.to_string()),
                _ => (None, field.clone()),
            };
            let target = match relation {
                Some(_) => column.clone(),
                None => format!("{}.{column}", model.table),
            };

            let filter = match condition.as_str() {
                "in" => {
                    let values: Vec<&str> = raw.split(',').collect();
                    if values[0].trim().is_empty() || values[0] == column {
                        continue;
                    }
                    Condition::In {
                        column: target,
                        values: values.into_iter().map(Value::from).collect(),
                        boolean: Boolean::And,
                        negate: false,
                    }
                }
                "between" => {
                    let bounds: Vec<&str> = raw.split(',').collect();
                    if bounds.len() < 2 {
                        continue;
                    }
                    Condition::Between {
                        column: target,
                        low: Value::from(bounds[0]),
                        high: Value::from(bounds[1]),
                        boolean: Boolean::And,
                        negate: false,
                    }
                }
                _ => Condition::Basic {
                    column: target,
                    operator: condition.clone(),
                    value: Value::from(if fuzzy { format!("%{raw}%") } else { raw.to_string() }),
                    boolean: Boolean::And,
                },
            };

            let boolean = if group.is_empty() || force_and { Boolean::And } else { Boolean::Or };
            group = match relation {
                Some(relation) => group.push(Condition::Has {
                    relation,
                    operator: ">=".to_string(),
                    count: 1,
                    conditions: Some(Conditions::new().push(filter)),
                    boolean,
                }),
                None => group.push(with_boolean(filter, boolean)),
            };
        }
        Ok(group)
    }

    fn order(&self, clauses: &mut ClauseStore, model: &ModelSchema, order_by: &str) {
        let params = &self.settings.params;
        let sorted: Vec<&str> = self.param(&params.sorted_by).unwrap_or("asc").split(';').collect();
        for (index, item) in order_by.split(';').enumerate() {
            let direction = SortOrder::parse_lenient(sorted.get(index).or(sorted.first()).copied().unwrap_or("asc"));
            let Some((table, column)) = item.split_once('|') else {
                clauses.order_by(item, direction);
                continue;
            };

            // `table|column`, `table:key|column` or `table:key,local|column`.
            let (sort_table, key, local) = match table.split_once(':') {
                Some((sort_table, keys)) => match keys.split_once(',') {
                    Some((key, local)) => (sort_table, key.to_string(), local),
                    None => (sort_table, keys.to_string(), "id"),
                },
                None => (table, format!("{}_id", singular(table)), "id"),
            };
            clauses
                .join_clause(JoinClause {
                    table: sort_table.to_string(),
                    first: format!("{}.{key}", model.table),
                    operator: "=".to_string(),
                    second: format!("{sort_table}.{local}"),
                    kind: JoinKind::Left,
                    value_comparison: false,
                })
                .order_by(format!("{sort_table}.{column}"), direction)
                .select([format!("{}.*", model.table)]);
        }
    }
}

impl Criterion for RequestCriteria {
    fn name(&self) -> &str {
        "request"
    }

    fn apply(&self, clauses: &mut ClauseStore, model: &ModelSchema) -> Result<(), RepoError> {
        let params = &self.settings.params;

        if let Some(search) = self.param(&params.search).filter(|_| !self.searchable.is_empty()) {
            let group = self.search_group(model, search)?;
            if !group.is_empty() {
                clauses.where_nested(group);
            }
        }
        if let Some(order_by) = self.param(&params.order_by) {
            self.order(clauses, model, order_by);
        }
        if let Some(filter) = self.param(&params.filter) {
            clauses.select(filter.split(';'));
        }
        if let Some(with) = self.param(&params.with) {
            clauses.with(with.split(';'));
        }
        if let Some(with_count) = self.param(&params.with_count) {
            for relation in with_count.split(';') {
                clauses.with_count(relation);
            }
        }
        Ok(())
    }
}

fn with_boolean(condition: Condition, boolean: Boolean) -> Condition {
    match condition {
        Condition::Basic {
            column,
            operator,
            value,
            ..
        } => Condition::Basic {
            column,
            operator,
            value,
            boolean,
        },
        Condition::In { column, values, negate, .. } => Condition::In {
            column,
            values,
            boolean,
            negate,
        },
        Condition::Between {
            column,
            low,
            high,
            negate,
            ..
        } => Condition::Between {
            column,
            low,
            high,
            boolean,
            negate,
        },
        other => other,
    }
}

/// `field:value;field:value` pairs of a search string.
fn search_data(search: &str) -> BTreeMap<&str, &str> {
    if !search.contains(':') {
        return BTreeMap::new();
    }
    search
        .split(';')
        .filter_map(|pair| {
            let mut parts = pair.split(':');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(field), Some(value), None) => Some((field, value)),
                _ => None,
            }
        })
        .collect()
}

/// The free-text part of a search string: the whole string when it carries no
/// field pairs, otherwise the first segment without a `:`.
fn search_value(search: &str) -> Option<&str> {
    if !search.contains([';', ':']) {
        return Some(search);
    }
    search.split(';').find(|segment| !segment.contains(':'))
}

fn singular(table: &str) -> &str {
    table.strip_suffix('s').unwrap_or(table)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn model() -> ModelSchema {
        ModelSchema::new("User", "users")
    }

    fn criteria(pairs: &[(&str, &str)], searchable: &[(&str, &str)]) -> RequestCriteria {
        RequestCriteria::new(
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            CriteriaSettings::default(),
            searchable.iter().map(|(f, c)| (f.to_string(), c.to_string())).collect(),
        )
    }

    fn conditions(store: &ClauseStore) -> Vec<Condition> {
        store.where_nested[0].conditions.iter().cloned().collect()
    }

    #[test]
    fn plain_search_ors_across_fields() {
        let mut store = ClauseStore::new();
        criteria(&[("search", "ev")], &[("name", "like"), ("email", "=")])
            .apply(&mut store, &model())
            .unwrap();

        let found = conditions(&store);
        assert_eq!(
            found,
            vec![
                Condition::Basic {
                    column: "users.name".into(),
                    operator: "like".into(),
                    value: json!("%ev%"),
                    boolean: Boolean::And,
                },
                Condition::Basic {
                    column: "users.email".into(),
                    operator: "=".into(),
                    value: json!("ev"),
                    boolean: Boolean::Or,
                },
            ]
        );
    }

    #[test]
    fn field_pairs_and_search_join() {
        let mut store = ClauseStore::new();
        criteria(
            &[("search", "name:ev;age:25"), ("searchJoin", "and")],
            &[("name", "like"), ("age", "="), ("posts.title", "like")],
        )
        .apply(&mut store, &model())
        .unwrap();

        let found = conditions(&store);
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|condition| condition.boolean() == Boolean::And));
    }

    #[test]
    fn relation_fields_search_through_has() {
        let mut store = ClauseStore::new();
        criteria(&[("search", "rust")], &[("posts.title", "like")])
            .apply(&mut store, &model())
            .unwrap();
        let found = conditions(&store);
        assert!(matches!(&found[0], Condition::Has { relation, conditions: Some(_), .. } if relation == "posts"));
    }

    #[test]
    fn search_fields_restrict_and_override_conditions() {
        let mut store = ClauseStore::new();
        criteria(&[("search", "ev"), ("searchFields", "name:like")], &[("name", "="), ("email", "=")])
            .apply(&mut store, &model())
            .unwrap();
        let found = conditions(&store);
        assert_eq!(found.len(), 1);
        assert!(matches!(&found[0], Condition::Basic { operator, .. } if operator == "like"));

        let err = criteria(&[("search", "ev"), ("searchFields", "nope")], &[("name", "=")])
            .apply(&mut ClauseStore::new(), &model())
            .unwrap_err();
        assert!(matches!(err, RepoError::InvalidRequest { .. }));
    }

    #[test]
    fn in_and_between_need_explicit_values() {
        let mut store = ClauseStore::new();
        criteria(&[("search", "age:24,26")], &[("age", "between"), ("id", "in")])
            .apply(&mut store, &model())
            .unwrap();
        let found = conditions(&store);
        assert_eq!(found.len(), 1);
        assert!(matches!(&found[0], Condition::Between { low, high, .. } if *low == json!("24") && *high == json!("26")));
    }

    #[test]
    fn ordering_projection_and_loads() {
        let mut store = ClauseStore::new();
        criteria(
            &[
                ("orderBy", "age;teams|title"),
                ("sortedBy", "desc;asc"),
                ("filter", "id;name"),
                ("with", "posts;tags"),
                ("withCount", "posts"),
            ],
            &[],
        )
        .apply(&mut store, &model())
        .unwrap();

        assert_eq!(store.order_by[0].column, "age");
        assert_eq!(store.order_by[0].direction, SortOrder::Desc);
        assert_eq!(store.order_by[1].column, "teams.title");
        assert_eq!(store.order_by[1].direction, SortOrder::Asc);
        assert_eq!(store.join[0].first, "users.team_id");
        assert_eq!(store.join[0].second, "teams.id");
        assert_eq!(store.join[0].kind, JoinKind::Left);
        assert_eq!(store.select, vec!["users.*", "id", "name"]);
        assert_eq!(store.relations.len(), 2);
        assert_eq!(store.with_count[0].relation, "posts");
    }

    #[test]
    fn explicit_join_keys() {
        let mut store = ClauseStore::new();
        criteria(&[("orderBy", "people:owner_id,uuid|name")], &[])
            .apply(&mut store, &model())
            .unwrap();
        assert_eq!(store.join[0].first, "users.owner_id");
        assert_eq!(store.join[0].second, "people.uuid");
    }

    #[test]
    fn search_string_parsing() {
        assert_eq!(search_value("plain"), Some("plain"));
        assert_eq!(search_value("name:ev;free"), Some("free"));
        assert_eq!(search_value("name:ev"), None);
        assert_eq!(search_data("name:ev;age:25").get("age"), Some(&"25"));
        assert!(search_data("plain").is_empty());
    }
}
