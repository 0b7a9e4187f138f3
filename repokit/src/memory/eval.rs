use std::cmp::Ordering;

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use regex::RegexBuilder;
use serde_json::Value;

use crate::{
    clauses::{Boolean, Condition, Conditions, DatePart, SubQuery},
    errors::RepoError,
    types::Row,
};

pub(crate) const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub(crate) type Clause = (Boolean, Predicate);

/// Engine-side filter tree built from builder calls.
#[derive(Debug, Clone)]
pub(crate) enum Predicate {
    Compare {
        column: String,
        operator: String,
        value: Value,
    },
    Columns {
        first: String,
        operator: String,
        second: String,
    },
    In {
        column: String,
        values: Vec<Value>,
        negate: bool,
    },
    Null {
        column: String,
        negate: bool,
    },
    Between {
        column: String,
        low: Value,
        high: Value,
        negate: bool,
    },
    JsonContains {
        column: String,
        value: Value,
        negate: bool,
    },
    JsonLength {
        column: String,
        operator: String,
        length: i64,
    },
    DatePart {
        part: DatePart,
        column: String,
        operator: String,
        value: String,
    },
    Group(Vec<Clause>),
    Has {
        relation: String,
        operator: String,
        count: i64,
        conditions: Vec<Clause>,
        morph_types: Option<Vec<String>>,
    },
    Exists {
        query: SubQuery,
        conditions: Vec<Clause>,
        negate: bool,
    },
}

/// Converts serializable conditions into predicates. Raw SQL cannot be
/// evaluated in memory and is reported through `errors`.
pub(crate) fn predicates(conditions: &Conditions, errors: &mut Vec<String>) -> Vec<Clause> {
    conditions
        .iter()
        .map(|condition| {
            let predicate = match condition {
                Condition::Basic {
                    column, operator, value, ..
                } => Predicate::Compare {
                    column: column.clone(),
                    operator: operator.clone(),
                    value: value.clone(),
                },
                Condition::In {
                    column, values, negate, ..
                } => Predicate::In {
                    column: column.clone(),
                    values: values.clone(),
                    negate: *negate,
                },
                Condition::Null { column, negate, .. } => Predicate::Null {
                    column: column.clone(),
                    negate: *negate,
                },
                Condition::Between {
                    column,
                    low,
                    high,
                    negate,
                    ..
                } => Predicate::Between {
                    column: column.clone(),
                    low: low.clone(),
                    high: high.clone(),
                    negate: *negate,
                },
                Condition::Column {
                    first, operator, second, ..
                } => Predicate::Columns {
                    first: first.clone(),
                    operator: operator.clone(),
                    second: second.clone(),
                },
                Condition::Nested { conditions, .. } => Predicate::Group(predicates(conditions, errors)),
                Condition::Has {
                    relation,
                    operator,
                    count,
                    conditions,
                    ..
                } => Predicate::Has {
                    relation: relation.clone(),
                    operator: operator.clone(),
                    count: *count,
                    conditions: conditions
                        .as_ref()
                        .map(|conditions| predicates(conditions, errors))
                        .unwrap_or_default(),
                    morph_types: None,
                },
                Condition::Raw { sql, .. } => {
                    errors.push(raw_unsupported(sql));
                    Predicate::Group(Vec::new())
                }
            };
            (condition.boolean(), predicate)
        })
        .collect()
}

pub(crate) fn raw_unsupported(sql: &str) -> String {
    format!("raw SQL is not supported by the in-memory engine: {sql}")
}

/// Reads `column` from a row. Accepts `table.column` and `column->json->path`.
pub(crate) fn lookup(row: &Row, column: &str) -> Option<Value> {
    let mut segments = column.split("->");
    let base = segments.next().unwrap_or(column);
    let mut value = row
        .get(base)
        .or_else(|| base.rsplit_once('.').and_then(|(_, short)| row.get(short)))?
        .clone();
    for segment in segments {
        value = match as_json(value) {
            Value::Object(mut map) => map.remove(segment)?,
            Value::Array(mut items) => {
                let index: usize = segment.parse().ok()?;
                if index >= items.len() {
                    return None;
                }
                items.swap_remove(index)
            }
            _ => return None,
        };
    }
    Some(value)
}

/// Decodes JSON documents stored as strings.
fn as_json(value: Value) -> Value {
    if let Value::String(raw) = &value {
        if raw.starts_with(['[', '{']) {
            if let Ok(decoded) = serde_json::from_str(raw) {
                return decoded;
            }
        }
    }
    value
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(raw) => raw.trim().parse().ok(),
        Value::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
        _ => None,
    }
}

pub(crate) fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(raw) => raw.trim().parse().ok(),
        _ => None,
    }
}

/// SQL-ish comparison. `None` when the values are not comparable (including nulls).
pub(crate) fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Number(_), _) | (_, Value::Number(_)) | (Value::Bool(_), _) | (_, Value::Bool(_)) => {
            as_f64(left)?.partial_cmp(&as_f64(right)?)
        }
        _ => (left == right).then_some(Ordering::Equal),
    }
}

/// Total order used for sorting: nulls first, incomparable values keep their order.
pub(crate) fn sort_cmp(left: Option<&Value>, right: Option<&Value>) -> Ordering {
    let left = left.filter(|value| !value.is_null());
    let right = right.filter(|value| !value.is_null());
    match (left, right) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => compare_values(a, b).unwrap_or(Ordering::Equal),
    }
}

pub(crate) fn values_equal(left: &Value, right: &Value) -> bool {
    compare_values(left, right) == Some(Ordering::Equal)
}

fn text(value: &Value) -> String {
    match value {
        Value::String(raw) => raw.clone(),
        other => other.to_string(),
    }
}

fn like(value: &Value, pattern: &Value) -> bool {
    let mut expression = String::from("^");
    for ch in text(pattern).chars() {
        match ch {
            '%' => expression.push_str(".*"),
            '_' => expression.push('.'),
            other => expression.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    expression.push('$');
    RegexBuilder::new(&expression)
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()
        .is_ok_and(|regex| regex.is_match(&text(value)))
}

/// Applies a comparison operator. A missing or null left side only matches null checks.
pub(crate) fn compare(operator: &str, left: Option<&Value>, right: &Value) -> Result<bool, RepoError> {
    let left = left.filter(|value| !value.is_null());
    let operator = operator.trim().to_ascii_lowercase();
    if right.is_null() {
        return match operator.as_str() {
            "=" | "==" | "is" => Ok(left.is_none()),
            "!=" | "<>" | "is not" => Ok(left.is_some()),
            _ => Ok(false),
        };
    }
    let Some(left) = left else {
        return Ok(false);
    };
    let ordering = compare_values(left, right);
    Ok(match operator.as_str() {
        "=" | "==" => ordering == Some(Ordering::Equal),
        "!=" | "<>" => ordering.is_some_and(|ordering| ordering != Ordering::Equal),
        "<" => ordering == Some(Ordering::Less),
        ">" => ordering == Some(Ordering::Greater),
        "<=" => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
        ">=" => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
        "like" | "ilike" => like(left, right),
        "not like" | "not ilike" => !like(left, right),
        other => {
            return Err(RepoError::query(format!("unsupported comparison operator [{other}]")));
        }
    })
}

pub(crate) fn compare_count(count: usize, operator: &str, expected: i64) -> Result<bool, RepoError> {
    let actual = Value::from(count as u64);
    compare(operator, Some(&actual), &Value::from(expected))
}

pub(crate) fn json_contains(haystack: Option<Value>, needle: &Value) -> bool {
    let Some(haystack) = haystack.map(as_json) else {
        return false;
    };
    contains(&haystack, needle)
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match (haystack, needle) {
        (Value::Array(items), Value::Array(wanted)) => {
            wanted.iter().all(|want| items.iter().any(|item| contains(item, want)))
        }
        (Value::Array(items), scalar) => items.iter().any(|item| item == scalar || values_equal(item, scalar)),
        (Value::Object(map), Value::Object(wanted)) => wanted
            .iter()
            .all(|(key, want)| map.get(key).is_some_and(|have| contains(have, want))),
        (left, right) => left == right || values_equal(left, right),
    }
}

pub(crate) fn json_length(value: Option<Value>) -> Option<usize> {
    match value.map(as_json)? {
        Value::Array(items) => Some(items.len()),
        Value::Object(map) => Some(map.len()),
        Value::Null => None,
        _ => Some(1),
    }
}

fn parse_datetime(value: &Value) -> Option<NaiveDateTime> {
    let raw = value.as_str()?.trim();
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .ok()
        .or_else(|| chrono::DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.naive_utc()))
        .or_else(|| NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok().and_then(|d| d.and_hms_opt(0, 0, 0)))
}

/// Compares one calendar component of a timestamp column.
pub(crate) fn compare_date_part(part: DatePart, stored: Option<Value>, operator: &str, value: &str) -> Result<bool, RepoError> {
    let Some(moment) = stored.as_ref().and_then(parse_datetime) else {
        return Ok(false);
    };
    let (left, right) = match part {
        DatePart::Date => (Value::from(moment.format("%Y-%m-%d").to_string()), Value::from(value)),
        DatePart::Time => (Value::from(moment.format("%H:%M:%S").to_string()), Value::from(value)),
        DatePart::Month => (Value::from(moment.month()), numeric_text(value)),
        DatePart::Day => (Value::from(moment.day()), numeric_text(value)),
    };
    compare(operator, Some(&left), &right)
}

fn numeric_text(value: &str) -> Value {
    value.trim().parse::<i64>().map(Value::from).unwrap_or_else(|_| Value::from(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn lookup_handles_qualified_and_json_paths() {
        let row = row(json!({"name": "a", "meta": "{\"tags\": [\"x\", \"y\"]}", "settings": {"theme": "dark"}}));
        assert_eq!(lookup(&row, "users.name"), Some(json!("a")));
        assert_eq!(lookup(&row, "meta->tags->1"), Some(json!("y")));
        assert_eq!(lookup(&row, "settings->theme"), Some(json!("dark")));
        assert_eq!(lookup(&row, "settings->missing"), None);
    }

    #[test]
    fn comparisons_coerce_numeric_strings() {
        assert!(compare(">", Some(&json!("25")), &json!(24)).unwrap());
        assert!(compare("=", Some(&json!(1)), &json!(1.0)).unwrap());
        assert!(!compare("<", None, &json!(1)).unwrap());
        assert!(compare("=", None, &Value::Null).unwrap());
        assert!(compare("<>", Some(&json!("a")), &json!("b")).unwrap());
        assert!(compare("between", Some(&json!(1)), &json!(1)).is_err());
    }

    #[test]
    fn like_is_case_insensitive_and_escapes_regex() {
        assert!(compare("like", Some(&json!("Evsign")), &json!("%sig%")).unwrap());
        assert!(compare("like", Some(&json!("a.c")), &json!("a.c")).unwrap());
        assert!(!compare("like", Some(&json!("abc")), &json!("a.c")).unwrap());
        assert!(compare("not like", Some(&json!("abc")), &json!("x%")).unwrap());
        assert!(compare("like", Some(&json!("abc")), &json!("a_c")).unwrap());
    }

    #[test]
    fn json_contains_scalars_and_arrays() {
        assert!(json_contains(Some(json!(["en", "fr"])), &json!("fr")));
        assert!(json_contains(Some(json!(["en", "fr"])), &json!(["en", "fr"])));
        assert!(!json_contains(Some(json!(["en"])), &json!(["en", "de"])));
        assert!(json_contains(Some(json!({"a": 1, "b": 2})), &json!({"a": 1})));
        assert_eq!(json_length(Some(json!("[1,2,3]"))), Some(3));
    }

    #[test]
    fn date_parts() {
        let stored = Some(json!("2024-03-15 10:30:00"));
        assert!(compare_date_part(DatePart::Date, stored.clone(), "=", "2024-03-15").unwrap());
        assert!(compare_date_part(DatePart::Month, stored.clone(), "=", "3").unwrap());
        assert!(compare_date_part(DatePart::Day, stored.clone(), ">", "10").unwrap());
        assert!(compare_date_part(DatePart::Time, stored, ">=", "10:00:00").unwrap());
        assert!(!compare_date_part(DatePart::Date, Some(json!("not a date")), "=", "2024-03-15").unwrap());
    }
}
