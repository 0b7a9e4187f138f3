use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Attribute map of a single row.
pub type Row = Map<String, Value>;

/// Identity of the repository that owns a model, used for event names and cache tags.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepositoryIdentity {
    /// Short identifier, e.g. `users`. Prefixes event names and tags the cache.
    pub id: String,
    /// Repository class name, e.g. `UserRepository`. Prefixes cache keys.
    pub class: String,
}

impl RepositoryIdentity {
    pub fn new(id: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            class: class.into(),
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Relations
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    HasOne,
    HasMany,
    BelongsTo,
    BelongsToMany,
    MorphOne,
    MorphMany,
    MorphTo,
}

impl RelationKind {
    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            RelationKind::HasOne => "HasOne",
            RelationKind::HasMany => "HasMany",
            RelationKind::BelongsTo => "BelongsTo",
            RelationKind::BelongsToMany => "BelongsToMany",
            RelationKind::MorphOne => "MorphOne",
            RelationKind::MorphMany => "MorphMany",
            RelationKind::MorphTo => "MorphTo",
        }
    }

    /// Whether eager loading yields a single row (or null) rather than a list.
    pub const fn is_singular(self) -> bool {
        matches!(
            self,
            RelationKind::HasOne | RelationKind::BelongsTo | RelationKind::MorphOne | RelationKind::MorphTo
        )
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PivotTable {
    pub table: String,
    /// Column pointing back at the declaring model.
    pub foreign_pivot_key: String,
    /// Column pointing at the related model.
    pub related_pivot_key: String,
}

/// A relation accessor declared on a model.
///
/// Key semantics depend on the kind:
/// - `HasOne`/`HasMany`: `related.foreign_key = self.local_key`
/// - `BelongsTo`: `self.foreign_key = related.local_key` (the owner key)
/// - `BelongsToMany`: joined through `pivot`, `local_key` is the parent key
/// - `MorphOne`/`MorphMany`: as `HasMany`, plus `related.morph_type = self model name`
/// - `MorphTo`: `self.morph_type` names the related model, `self.foreign_key` its key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDef {
    pub name: String,
    pub kind: RelationKind,
    pub related: String,
    pub foreign_key: String,
    pub local_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pivot: Option<PivotTable>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub morph_type: Option<String>,
}

impl RelationDef {
    fn new(name: impl Into<String>, kind: RelationKind, related: impl Into<String>, foreign_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            related: related.into(),
            foreign_key: foreign_key.into(),
            local_key: "id".to_string(),
            pivot: None,
            morph_type: None,
        }
    }

    pub fn has_one(name: impl Into<String>, related: impl Into<String>, foreign_key: impl Into<String>) -> Self {
        Self::new(name, RelationKind::HasOne, related, foreign_key)
    }

    pub fn has_many(name: impl Into<String>, related: impl Into<String>, foreign_key: impl Into<String>) -> Self {
        Self::new(name, RelationKind::HasMany, related, foreign_key)
    }

    pub fn belongs_to(name: impl Into<String>, related: impl Into<String>, foreign_key: impl Into<String>) -> Self {
        Self::new(name, RelationKind::BelongsTo, related, foreign_key)
    }

    pub fn belongs_to_many(
        name: impl Into<String>,
        related: impl Into<String>,
        pivot_table: impl Into<String>,
        foreign_pivot_key: impl Into<String>,
        related_pivot_key: impl Into<String>,
    ) -> Self {
        let mut relation = Self::new(name, RelationKind::BelongsToMany, related, "");
        relation.pivot = Some(PivotTable {
            table: pivot_table.into(),
            foreign_pivot_key: foreign_pivot_key.into(),
            related_pivot_key: related_pivot_key.into(),
        });
        relation
    }

    pub fn morph_one(name: impl Into<String>, related: impl Into<String>, morph_name: &str) -> Self {
        let mut relation = Self::new(name, RelationKind::MorphOne, related, format!("{morph_name}_id"));
        relation.morph_type = Some(format!("{morph_name}_type"));
        relation
    }

    pub fn morph_many(name: impl Into<String>, related: impl Into<String>, morph_name: &str) -> Self {
        let mut relation = Self::new(name, RelationKind::MorphMany, related, format!("{morph_name}_id"));
        relation.morph_type = Some(format!("{morph_name}_type"));
        relation
    }

    pub fn morph_to(name: impl Into<String>) -> Self {
        let name = name.into();
        let mut relation = Self::new(name.clone(), RelationKind::MorphTo, "", format!("{name}_id"));
        relation.morph_type = Some(format!("{name}_type"));
        relation
    }

    pub fn with_local_key(mut self, local_key: impl Into<String>) -> Self {
        self.local_key = local_key.into();
        self
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Models
// ════════════════════════════════════════════════════════════════════════════

/// Introspection data for a model: table, keys, mass-assignable columns and relations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSchema {
    pub name: String,
    pub table: String,
    pub primary_key: String,
    pub fillable: Vec<String>,
    pub relations: Vec<RelationDef>,
    /// Names of local scopes callable through the repository.
    pub scopes: Vec<String>,
    pub soft_deletes: bool,
    pub timestamps: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<RepositoryIdentity>,
}

impl ModelSchema {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            primary_key: "id".to_string(),
            fillable: Vec::new(),
            relations: Vec::new(),
            scopes: Vec::new(),
            soft_deletes: false,
            timestamps: true,
            repository: None,
        }
    }

    pub fn with_primary_key(mut self, primary_key: impl Into<String>) -> Self {
        self.primary_key = primary_key.into();
        self
    }

    pub fn with_fillable<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fillable.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn with_relation(mut self, relation: RelationDef) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scopes.push(scope.into());
        self
    }

    pub fn with_soft_deletes(mut self) -> Self {
        self.soft_deletes = true;
        self
    }

    pub fn without_timestamps(mut self) -> Self {
        self.timestamps = false;
        self
    }

    pub fn with_repository(mut self, identity: RepositoryIdentity) -> Self {
        self.repository = Some(identity);
        self
    }

    pub fn relation(&self, name: &str) -> Option<&RelationDef> {
        self.relations.iter().find(|relation| relation.name == name)
    }

    pub fn is_fillable(&self, column: &str) -> bool {
        self.fillable.iter().any(|candidate| candidate == column)
    }

    pub fn has_scope(&self, name: &str) -> bool {
        self.scopes.iter().any(|scope| scope == name)
    }

    /// Keeps only the mass-assignable attributes.
    pub fn fillable_attributes(&self, attributes: &Row) -> Row {
        attributes
            .iter()
            .filter(|(key, _)| self.is_fillable(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Entities
// ════════════════════════════════════════════════════════════════════════════

/// A row loaded from (or destined for) a model's table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub model: String,
    pub attributes: Row,
    #[serde(default)]
    pub original: Row,
    #[serde(default)]
    pub exists: bool,
}

impl Entity {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            attributes: Row::new(),
            original: Row::new(),
            exists: false,
        }
    }

    /// Wraps a persisted row.
    pub fn from_row(model: impl Into<String>, row: Row) -> Self {
        Self {
            model: model.into(),
            original: row.clone(),
            attributes: row,
            exists: true,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key).filter(|value| !value.is_null())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(key.into(), value.into());
    }

    /// Primary key value, if assigned.
    pub fn key(&self, schema: &ModelSchema) -> Option<&Value> {
        self.get(&schema.primary_key)
    }

    /// Mass-assigns the fillable subset of `attributes`.
    pub fn fill(&mut self, schema: &ModelSchema, attributes: &Row) -> &mut Self {
        for (key, value) in schema.fillable_attributes(attributes) {
            self.attributes.insert(key, value);
        }
        self
    }

    /// Attributes changed since the entity was loaded or last saved.
    pub fn dirty(&self) -> Row {
        self.attributes
            .iter()
            .filter(|(key, value)| self.original.get(key.as_str()) != Some(*value))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty().is_empty()
    }

    pub fn sync_original(&mut self) {
        self.original = self.attributes.clone();
    }
}

/// A page of results. `total` is only known for length-aware pagination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: Option<u64>,
    pub per_page: u64,
    pub current_page: u64,
    /// Set by simple pagination, which probes one row past the page instead of counting.
    #[serde(default)]
    pub more_pages: bool,
}

impl<T> Page<T> {
    #[inline]
    pub fn has_more(&self) -> bool {
        match self.total {
            Some(total) => self.current_page * self.per_page < total,
            None => self.more_pages,
        }
    }

    pub fn last_page(&self) -> Option<u64> {
        self.total.map(|total| total.div_ceil(self.per_page.max(1)).max(1))
    }
}
