//! Nested writes: splitting relation payloads out of an attribute map and
//! persisting them once the owning entity is saved.

use std::collections::BTreeMap;

use serde_json::{Value, json};

use crate::{
    errors::RepoError,
    events::{EntityEvent, EntityEventKind},
    query::{Engine, QueryBuilder},
    registry::ModelRegistry,
    types::{Entity, ModelSchema, RelationDef, RelationKind, RepositoryIdentity, Row},
};

/// A relation payload found in an attribute map.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationDescriptor {
    pub values: Value,
    pub kind: RelationKind,
}

pub type Relations = BTreeMap<String, RelationDescriptor>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Create,
    Update,
}

/// Splits `attributes` into relation payloads and the remaining plain attributes.
///
/// Candidates are keys that are not fillable columns; a candidate becomes a
/// relation only if the model declares an accessor of that name. Relation
/// keys are removed from the returned attribute map.
pub fn extract_relations(model: &ModelSchema, attributes: &Row) -> (Relations, Row) {
    let mut relations = Relations::new();
    let mut plain = Row::new();
    for (key, value) in attributes {
        let relation = (!model.is_fillable(key)).then(|| model.relation(key)).flatten();
        match relation {
            Some(relation) => {
                relations.insert(
                    key.clone(),
                    RelationDescriptor {
                        values: value.clone(),
                        kind: relation.kind,
                    },
                );
            }
            None => {
                plain.insert(key.clone(), value.clone());
            }
        }
    }
    (relations, plain)
}

/// Identity events for `model` are published under.
pub(crate) fn identity_of(model: &ModelSchema) -> RepositoryIdentity {
    model
        .repository
        .clone()
        .unwrap_or_else(|| RepositoryIdentity::new(model.table.clone(), format!("{}Repository", model.name)))
}

fn as_list(values: &Value) -> Vec<Value> {
    match values {
        Value::Array(items) => items.clone(),
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    }
}

fn as_row(values: &Value) -> Option<Row> {
    match values {
        Value::Object(map) => Some(map.clone()),
        _ => None,
    }
}

/// Persists relation payloads for a saved entity.
pub struct RelationSync<'a, E: Engine> {
    engine: &'a E,
    models: &'a ModelRegistry,
    raised: Vec<EntityEvent>,
}

impl<'a, E: Engine> RelationSync<'a, E> {
    pub fn new(engine: &'a E, models: &'a ModelRegistry) -> Self {
        Self {
            engine,
            models,
            raised: Vec::new(),
        }
    }

    /// Writes every relation and returns the events the writes raised, in
    /// order. Delivering them (now or after commit) is up to the caller.
    pub async fn sync(
        mut self,
        model: &ModelSchema,
        entity: &mut Entity,
        relations: &Relations,
        mode: SyncMode,
        detaching: bool,
    ) -> Result<Vec<EntityEvent>, RepoError> {
        for (accessor, descriptor) in relations {
            let relation = model.relation(accessor).cloned().ok_or_else(|| RepoError::UnsupportedRelationKind {
                accessor: accessor.clone(),
                kind: descriptor.kind.to_string(),
            })?;
            log::debug!("syncing {}.{accessor} ({}, {mode:?})", model.name, relation.kind);
            match relation.kind {
                RelationKind::BelongsToMany => self.belongs_to_many(model, entity, &relation, &descriptor.values, detaching).await?,
                RelationKind::HasMany => self.has_many(entity, &relation, &descriptor.values, mode).await?,
                RelationKind::HasOne | RelationKind::MorphOne => {
                    self.has_one(model, entity, &relation, &descriptor.values, mode).await?
                }
                RelationKind::BelongsTo => self.belongs_to(model, entity, &relation, &descriptor.values, mode).await?,
                kind => {
                    return Err(RepoError::UnsupportedRelationKind {
                        accessor: accessor.clone(),
                        kind: kind.to_string(),
                    });
                }
            }
        }
        Ok(self.raised)
    }

    fn raise(&mut self, related: &ModelSchema, kind: EntityEventKind, payload: Value) {
        self.raised.push(EntityEvent::new(identity_of(related), kind, payload));
    }

    fn parent_key(entity: &Entity, relation: &RelationDef) -> Result<Value, RepoError> {
        entity.get(&relation.local_key).cloned().ok_or_else(|| {
            RepoError::query(format!(
                "cannot sync [{}] before the parent has a [{}]",
                relation.name, relation.local_key
            ))
        })
    }

    /// Children of `entity` through a has-one/has-many (or morph-one) relation.
    fn children(&self, related: &ModelSchema, parent: &ModelSchema, relation: &RelationDef, key: &Value) -> Result<E::Query, RepoError> {
        let mut query = self.engine.query(related)?.where_eq(&relation.foreign_key, key);
        if let Some(column) = &relation.morph_type {
            query = query.where_eq(column, &Value::from(parent.name.clone()));
        }
        Ok(query)
    }

    async fn belongs_to_many(
        &mut self,
        model: &ModelSchema,
        entity: &Entity,
        relation: &RelationDef,
        values: &Value,
        detaching: bool,
    ) -> Result<(), RepoError> {
        let related = self.models.resolve(&relation.related)?;
        let ids: Vec<Value> = as_list(values)
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(map) => map.get(&related.primary_key).cloned(),
                other => Some(other),
            })
            .collect();
        let changes = self.engine.sync_pivot(model, entity, relation, &ids, detaching).await?;
        self.raise(
            &related,
            EntityEventKind::Updated,
            json!({"relation": relation.name, "attached": changes.attached, "detached": changes.detached}),
        );
        Ok(())
    }

    async fn has_many(&mut self, entity: &Entity, relation: &RelationDef, values: &Value, mode: SyncMode) -> Result<(), RepoError> {
        let related = self.models.resolve(&relation.related)?;
        let parent = self.models.resolve(&entity.model)?;
        let key = Self::parent_key(entity, relation)?;

        match mode {
            SyncMode::Create => {
                for item in as_list(values) {
                    let Some(attributes) = as_row(&item) else {
                        continue;
                    };
                    let mut child = Entity::new(related.name.clone());
                    child.fill(&related, &attributes);
                    child.set(relation.foreign_key.clone(), key.clone());
                    self.engine.save(&related, &mut child).await?;
                    self.raise(&related, EntityEventKind::Created, Value::Object(child.attributes));
                }
            }
            SyncMode::Update => {
                let items = match values {
                    Value::Object(_) => vec![values.clone()],
                    other => as_list(other),
                };
                for item in items {
                    let Some(mut attributes) = as_row(&item) else {
                        continue;
                    };
                    let mut query = self.children(&related, &parent, relation, &key)?;
                    if let Some(id) = attributes.remove(&related.primary_key) {
                        query = query.where_eq(&related.primary_key, &id);
                    }
                    let changes = related.fillable_attributes(&attributes);
                    let affected = self.engine.update(query, changes.clone()).await?;
                    self.raise(&related, EntityEventKind::Updated, json!({"affected": affected, "attributes": changes}));
                }
            }
        }
        Ok(())
    }

    async fn has_one(
        &mut self,
        model: &ModelSchema,
        entity: &Entity,
        relation: &RelationDef,
        values: &Value,
        mode: SyncMode,
    ) -> Result<(), RepoError> {
        let related = self.models.resolve(&relation.related)?;
        let key = Self::parent_key(entity, relation)?;
        let Some(attributes) = as_row(values) else {
            return Ok(());
        };

        match mode {
            SyncMode::Create => {
                let mut child = Entity::new(related.name.clone());
                child.fill(&related, &attributes);
                child.set(relation.foreign_key.clone(), key);
                if let Some(column) = &relation.morph_type {
                    child.set(column.clone(), model.name.clone());
                }
                self.engine.save(&related, &mut child).await?;
                self.raise(&related, EntityEventKind::Created, Value::Object(child.attributes));
            }
            SyncMode::Update => {
                let query = self.children(&related, model, relation, &key)?.limit(1);
                let changes = related.fillable_attributes(&attributes);
                let affected = self.engine.update(query, changes.clone()).await?;
                self.raise(&related, EntityEventKind::Updated, json!({"affected": affected, "attributes": changes}));
            }
        }
        Ok(())
    }

    /// Creates (or points at) the owner of `entity` and stores its key on `entity`.
    async fn belongs_to(
        &mut self,
        model: &ModelSchema,
        entity: &mut Entity,
        relation: &RelationDef,
        values: &Value,
        mode: SyncMode,
    ) -> Result<(), RepoError> {
        let owner = self.models.resolve(&relation.related)?;

        let Some(attributes) = as_row(values) else {
            // A scalar payload is the owner's key: associate without touching the owner.
            if !values.is_null() {
                entity.set(relation.foreign_key.clone(), values.clone());
                self.engine.save(model, entity).await?;
            }
            return Ok(());
        };

        match (mode, entity.get(&relation.foreign_key).cloned()) {
            (SyncMode::Update, Some(owner_key)) => {
                let query = self.engine.query(&owner)?.where_eq(&relation.local_key, &owner_key);
                let changes = owner.fillable_attributes(&attributes);
                let affected = self.engine.update(query, changes.clone()).await?;
                self.raise(&owner, EntityEventKind::Updated, json!({"affected": affected, "attributes": changes}));
            }
            _ => {
                let mut created = Entity::new(owner.name.clone());
                created.fill(&owner, &attributes);
                self.engine.save(&owner, &mut created).await?;
                if let Some(owner_key) = created.get(&relation.local_key).cloned() {
                    entity.set(relation.foreign_key.clone(), owner_key);
                    self.engine.save(model, entity).await?;
                }
                self.raise(&owner, EntityEventKind::Created, Value::Object(created.attributes));
            }
        }
        Ok(())
    }
}
