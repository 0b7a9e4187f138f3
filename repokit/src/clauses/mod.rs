//! Accumulated, not-yet-applied query modifications.
//!
//! A [`ClauseStore`] keeps one ordered list per clause category. Recording
//! methods (see [`ClauseRecorder`]) only append; nothing is validated here,
//! column and operator validity is the query engine's concern. The store is
//! replayed by [`assemble`](crate::query::assemble), hashed by
//! [`fingerprint`](crate::fingerprint::fingerprint) and cleared with
//! [`ClauseStore::reset`] after every terminal operation.

mod conditions;
mod recorder;

pub use conditions::{Boolean, Condition, Conditions, SubQuery};
pub use recorder::ClauseRecorder;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }

    /// Parses `asc`/`desc` case-insensitively, falling back to ascending.
    pub fn parse_lenient(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("desc") {
            SortOrder::Desc
        } else {
            SortOrder::Asc
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JoinKind {
    #[default]
    Inner,
    Left,
    Right,
    Cross,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatePart {
    Date,
    Month,
    Day,
    Time,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFunction {
    Count,
    Sum,
    Max,
    Min,
    Avg,
}

impl AggregateFunction {
    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            AggregateFunction::Count => "count",
            AggregateFunction::Sum => "sum",
            AggregateFunction::Max => "max",
            AggregateFunction::Min => "min",
            AggregateFunction::Avg => "avg",
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Clause tuples
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhereClause {
    pub column: String,
    pub operator: String,
    pub value: Value,
    pub boolean: Boolean,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhereInClause {
    pub column: String,
    pub values: Vec<Value>,
    pub boolean: Boolean,
    pub negate: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NestedClause {
    pub conditions: Conditions,
    pub boolean: Boolean,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NullClause {
    pub column: String,
    pub boolean: Boolean,
    pub negate: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonContainsClause {
    pub column: String,
    pub value: Value,
    pub boolean: Boolean,
    pub negate: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonLengthClause {
    pub column: String,
    pub operator: String,
    pub length: i64,
    pub boolean: Boolean,
}

/// Conditions applied only when `condition` holds, with an optional fallback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhenClause {
    pub condition: bool,
    pub then: Conditions,
    pub otherwise: Option<Conditions>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetweenClause {
    pub column: String,
    pub low: Value,
    pub high: Value,
    pub boolean: Boolean,
    pub negate: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExistsClause {
    pub query: SubQuery,
    pub boolean: Boolean,
    pub negate: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawClause {
    pub sql: String,
    pub bindings: Vec<Value>,
    pub boolean: Boolean,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateClause {
    pub column: String,
    pub operator: String,
    pub value: String,
    pub boolean: Boolean,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HasClause {
    pub relation: String,
    pub operator: String,
    pub count: i64,
    pub conditions: Option<Conditions>,
    pub boolean: Boolean,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MorphHasClause {
    pub relation: String,
    pub types: Vec<String>,
    pub operator: String,
    pub count: i64,
    pub conditions: Option<Conditions>,
    pub boolean: Boolean,
}

/// A relation name with optional constraints, used by eager loads and counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationConstraint {
    pub relation: String,
    pub conditions: Option<Conditions>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinClause {
    pub table: String,
    pub first: String,
    pub operator: String,
    pub second: String,
    pub kind: JoinKind,
    /// `second` is a literal value rather than a column.
    pub value_comparison: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateClause {
    pub relation: String,
    pub column: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeCall {
    pub name: String,
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HavingClause {
    pub column: String,
    pub operator: String,
    pub value: Value,
    pub boolean: Boolean,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderClause {
    pub column: String,
    pub direction: SortOrder,
}

// ════════════════════════════════════════════════════════════════════════════
// Store
// ════════════════════════════════════════════════════════════════════════════

/// One ordered sequence per clause category, plus the scalar modifiers.
///
/// Field order is the serialization order and therefore part of the fingerprint.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ClauseStore {
    #[serde(rename = "where")]
    pub where_: Vec<WhereClause>,
    pub or_where: Vec<WhereClause>,
    pub where_in: Vec<WhereInClause>,
    pub where_not_in: Vec<WhereInClause>,
    pub where_nested: Vec<NestedClause>,
    pub where_null: Vec<NullClause>,
    pub where_json_contains: Vec<JsonContainsClause>,
    pub or_where_json_contains: Vec<JsonContainsClause>,
    pub where_json_doesnt_contain: Vec<JsonContainsClause>,
    pub where_json_length: Vec<JsonLengthClause>,
    pub when: Vec<WhenClause>,
    pub where_between: Vec<BetweenClause>,
    pub or_where_between: Vec<BetweenClause>,
    pub where_not_between: Vec<BetweenClause>,
    pub where_exists: Vec<ExistsClause>,
    pub where_raw: Vec<RawClause>,
    pub or_where_raw: Vec<RawClause>,
    pub having_raw: Vec<RawClause>,

    pub where_date: Vec<DateClause>,
    pub where_month: Vec<DateClause>,
    pub where_day: Vec<DateClause>,
    pub where_time: Vec<DateClause>,

    pub has: Vec<HasClause>,
    pub or_has: Vec<HasClause>,
    pub where_has: Vec<HasClause>,
    pub or_where_has: Vec<HasClause>,
    pub doesnt_have: Vec<HasClause>,
    pub or_doesnt_have: Vec<HasClause>,
    pub where_doesnt_have: Vec<HasClause>,
    pub or_where_doesnt_have: Vec<HasClause>,
    pub has_morph: Vec<MorphHasClause>,
    pub where_has_morph: Vec<MorphHasClause>,

    pub relations: Vec<RelationConstraint>,
    pub join: Vec<JoinClause>,

    pub with_count: Vec<RelationConstraint>,
    pub with_exists: Vec<RelationConstraint>,
    pub with_sum: Vec<AggregateClause>,
    pub with_max: Vec<AggregateClause>,
    pub with_min: Vec<AggregateClause>,
    pub with_avg: Vec<AggregateClause>,

    pub scopes: Vec<ScopeCall>,
    pub having: Vec<HavingClause>,
    pub with_trashed: bool,
    pub without_global_scopes: bool,
    pub select: Vec<String>,
    pub except: Vec<String>,

    pub offset: Option<u64>,
    pub limit: Option<u64>,
    pub group_by: Vec<String>,
    pub order_by: Vec<OrderClause>,
}

impl ClauseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears every sequence and scalar. Idempotent.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Moves the accumulated clauses out, leaving an empty store behind.
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }
}
