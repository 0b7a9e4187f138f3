use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How a condition joins the conditions before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Boolean {
    #[default]
    And,
    Or,
}

impl Boolean {
    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            Boolean::And => "and",
            Boolean::Or => "or",
        }
    }
}

/// A single filter inside a nested group, a `when` branch, a relation constraint or a sub-query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    Basic {
        column: String,
        operator: String,
        value: Value,
        boolean: Boolean,
    },
    In {
        column: String,
        values: Vec<Value>,
        boolean: Boolean,
        negate: bool,
    },
    Null {
        column: String,
        boolean: Boolean,
        negate: bool,
    },
    Between {
        column: String,
        low: Value,
        high: Value,
        boolean: Boolean,
        negate: bool,
    },
    Column {
        first: String,
        operator: String,
        second: String,
        boolean: Boolean,
    },
    Nested {
        conditions: Conditions,
        boolean: Boolean,
    },
    Has {
        relation: String,
        operator: String,
        count: i64,
        conditions: Option<Conditions>,
        boolean: Boolean,
    },
    Raw {
        sql: String,
        bindings: Vec<Value>,
        boolean: Boolean,
    },
}

impl Condition {
    pub fn boolean(&self) -> Boolean {
        match self {
            Condition::Basic { boolean, .. }
            | Condition::In { boolean, .. }
            | Condition::Null { boolean, .. }
            | Condition::Between { boolean, .. }
            | Condition::Column { boolean, .. }
            | Condition::Nested { boolean, .. }
            | Condition::Has { boolean, .. }
            | Condition::Raw { boolean, .. } => *boolean,
        }
    }
}

/// An ordered, serializable list of conditions.
///
/// Stands in for the closures an ORM would take for nested `where` groups and
/// relation constraints, so that every recorded constraint can be fingerprinted.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Conditions(Vec<Condition>);

impl Conditions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Condition> {
        self.0.iter()
    }

    pub fn push(mut self, condition: Condition) -> Self {
        self.0.push(condition);
        self
    }

    pub fn where_(self, column: impl Into<String>, operator: impl Into<String>, value: impl Into<Value>) -> Self {
        self.basic(column, operator, value, Boolean::And)
    }

    pub fn or_where(self, column: impl Into<String>, operator: impl Into<String>, value: impl Into<Value>) -> Self {
        self.basic(column, operator, value, Boolean::Or)
    }

    fn basic(
        self,
        column: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<Value>,
        boolean: Boolean,
    ) -> Self {
        self.push(Condition::Basic {
            column: column.into(),
            operator: operator.into(),
            value: value.into(),
            boolean,
        })
    }

    pub fn where_in<I, V>(self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.push(Condition::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
            boolean: Boolean::And,
            negate: false,
        })
    }

    pub fn where_not_in<I, V>(self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.push(Condition::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
            boolean: Boolean::And,
            negate: true,
        })
    }

    pub fn where_null(self, column: impl Into<String>) -> Self {
        self.push(Condition::Null {
            column: column.into(),
            boolean: Boolean::And,
            negate: false,
        })
    }

    pub fn where_not_null(self, column: impl Into<String>) -> Self {
        self.push(Condition::Null {
            column: column.into(),
            boolean: Boolean::And,
            negate: true,
        })
    }

    pub fn where_between(self, column: impl Into<String>, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        self.push(Condition::Between {
            column: column.into(),
            low: low.into(),
            high: high.into(),
            boolean: Boolean::And,
            negate: false,
        })
    }

    pub fn where_column(self, first: impl Into<String>, operator: impl Into<String>, second: impl Into<String>) -> Self {
        self.push(Condition::Column {
            first: first.into(),
            operator: operator.into(),
            second: second.into(),
            boolean: Boolean::And,
        })
    }

    pub fn nested(self, conditions: Conditions) -> Self {
        self.push(Condition::Nested {
            conditions,
            boolean: Boolean::And,
        })
    }

    pub fn or_nested(self, conditions: Conditions) -> Self {
        self.push(Condition::Nested {
            conditions,
            boolean: Boolean::Or,
        })
    }

    pub fn where_has(self, relation: impl Into<String>, conditions: Option<Conditions>) -> Self {
        self.has(relation, conditions, Boolean::And)
    }

    pub fn or_where_has(self, relation: impl Into<String>, conditions: Option<Conditions>) -> Self {
        self.has(relation, conditions, Boolean::Or)
    }

    fn has(self, relation: impl Into<String>, conditions: Option<Conditions>, boolean: Boolean) -> Self {
        self.push(Condition::Has {
            relation: relation.into(),
            operator: ">=".to_string(),
            count: 1,
            conditions,
            boolean,
        })
    }

    pub fn where_raw(self, sql: impl Into<String>, bindings: Vec<Value>) -> Self {
        self.push(Condition::Raw {
            sql: sql.into(),
            bindings,
            boolean: Boolean::And,
        })
    }
}

impl FromIterator<Condition> for Conditions {
    fn from_iter<T: IntoIterator<Item = Condition>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Conditions {
    type Item = &'a Condition;
    type IntoIter = std::slice::Iter<'a, Condition>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// An uncorrelated sub-query used by `where exists`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubQuery {
    pub table: String,
    pub conditions: Conditions,
}

impl SubQuery {
    pub fn new(table: impl Into<String>, conditions: Conditions) -> Self {
        Self {
            table: table.into(),
            conditions,
        }
    }
}
