use serde_json::{Value, json};

use super::{Repository, display_key};
use crate::{
    clauses::{Boolean, ClauseRecorder},
    config::ClearOn,
    errors::RepoError,
    events::{EntityEvent, EntityEventKind},
    query::{Engine, QueryBuilder},
    relations::{Relations, RelationSync, SyncMode, extract_relations},
    types::{Entity, RepositoryIdentity, Row},
};

/// `(column, operator, value)` used by `update_or_create` and `update_or_insert`.
pub type AttributeCondition = (String, String, Value);

impl<E: Engine> Repository<E> {
    // ---- events -----------------------------------------------------------

    fn event(&self, kind: EntityEventKind, payload: Value) -> EntityEvent {
        EntityEvent::new(self.identity.clone(), kind, payload)
    }

    /// Dispatches a "before" event straight away.
    fn announce(&self, kind: EntityEventKind, payload: Value) {
        self.context.events.dispatch(&self.event(kind, payload));
    }

    /// Raises an "after" event for this repository.
    async fn raise(&self, kind: EntityEventKind, payload: Value) {
        self.settle(self.event(kind, payload)).await;
    }

    /// Flushes the cache of the event's repository right away, whatever the
    /// transaction depth, then delivers the event (and the `cache.flushed`
    /// notice) now or once the open transaction commits.
    async fn settle(&self, event: EntityEvent) {
        let flushed = self.clear_after(&event).await;
        let level = self.context.engine.transaction_level();
        for event in std::iter::once(event).chain(flushed) {
            if let Some(event) = self.context.commit_queue.defer(level, event) {
                self.context.events.dispatch(&event);
            }
        }
    }

    async fn settle_all(&self, events: Vec<EntityEvent>) {
        for event in events {
            self.settle(event).await;
        }
    }

    /// Flushes the owning repository's cache when the configured `clear_on`
    /// set asks for it, returning the `cache.flushed` notice.
    async fn clear_after(&self, event: &EntityEvent) -> Option<EntityEvent> {
        let trigger = match event.kind {
            EntityEventKind::Created => ClearOn::Create,
            EntityEventKind::Updated => ClearOn::Update,
            EntityEventKind::Deleted => ClearOn::Delete,
            EntityEventKind::Restored => ClearOn::Restore,
            _ => return None,
        };
        let settings = &self.context.config.cache;
        let clear_enabled = event.repository != self.identity || self.cache_clear_enabled;
        if !settings.enabled || !clear_enabled || !settings.clears_on(trigger) {
            return None;
        }
        self.flush_owner(&event.repository, json!({"trigger": event.kind})).await
    }

    async fn flush_owner(&self, owner: &RepositoryIdentity, payload: Value) -> Option<EntityEvent> {
        if let Err(err) = self.cache.flush(&owner.class, &owner.id, &self.cache_driver).await {
            log::warn!("{}: cache flush failed: {err}", owner.class);
            return None;
        }
        Some(EntityEvent::new(owner.clone(), EntityEventKind::CacheFlushed, payload))
    }

    // ---- helpers ----------------------------------------------------------

    /// Uncached lookup by primary key.
    async fn fetch(&self, id: &Value, with_trashed: bool) -> Result<Option<Entity>, RepoError> {
        let engine = &self.context.engine;
        let mut query = engine.query(&self.model)?.where_eq(&self.model.primary_key, id);
        if with_trashed {
            query = query.with_trashed();
        }
        engine.first(query).await
    }

    fn matching(&self, conditions: &[AttributeCondition]) -> Result<E::Query, RepoError> {
        let query = self.context.engine.query(&self.model)?;
        Ok(conditions.iter().fold(query, |query, (column, operator, value)| {
            query.where_basic(column, operator, value, Boolean::And)
        }))
    }

    async fn sync_relations(
        &self,
        entity: &mut Entity,
        relations: &Relations,
        mode: SyncMode,
    ) -> Result<bool, RepoError> {
        if relations.is_empty() {
            return Ok(false);
        }
        let raised = RelationSync::new(&self.context.engine, &self.context.models)
            .sync(&self.model, entity, relations, mode, true)
            .await?;
        self.settle_all(raised).await;
        Ok(true)
    }

    // ---- create / update --------------------------------------------------

    /// Creates an entity from the fillable attributes. With `sync_relations`,
    /// relation payloads in `attributes` are written once the entity is saved.
    pub async fn create(&mut self, attributes: &Row, sync_relations: bool) -> Result<Entity, RepoError> {
        self.reset();
        let (relations, plain) = extract_relations(&self.model, attributes);
        self.announce(EntityEventKind::Creating, Value::Object(plain.clone()));

        let mut entity = Entity::new(self.model.name.clone());
        entity.fill(&self.model, &plain);
        self.context.engine.save(&self.model, &mut entity).await?;
        if sync_relations {
            self.sync_relations(&mut entity, &relations, SyncMode::Create).await?;
        }
        log::debug!("{}: created {:?}", self.identity.class, entity.key(&self.model));
        self.raise(EntityEventKind::Created, Value::Object(entity.attributes.clone()))
            .await;
        Ok(entity)
    }

    pub async fn update(&mut self, id: impl Into<Value>, attributes: &Row, sync_relations: bool) -> Result<Entity, RepoError> {
        self.reset();
        let id = id.into();
        let entity = self.fetch(&id, false).await?.ok_or_else(|| RepoError::EntityNotFound {
            model: self.model.name.clone(),
            id: display_key(&id),
        })?;
        self.update_entity(entity, attributes, sync_relations).await
    }

    /// Fills and saves a loaded entity. `updated` fires only if attributes
    /// changed or relations were written.
    pub async fn update_entity(
        &mut self,
        mut entity: Entity,
        attributes: &Row,
        sync_relations: bool,
    ) -> Result<Entity, RepoError> {
        self.reset();
        let (relations, plain) = extract_relations(&self.model, attributes);
        self.announce(
            EntityEventKind::Updating,
            json!({"id": entity.key(&self.model), "attributes": plain}),
        );

        entity.fill(&self.model, &plain);
        let dirty = entity.is_dirty();
        if dirty {
            self.context.engine.save(&self.model, &mut entity).await?;
        }
        let synced = sync_relations && self.sync_relations(&mut entity, &relations, SyncMode::Update).await?;
        if dirty || synced {
            self.raise(EntityEventKind::Updated, Value::Object(entity.attributes.clone()))
                .await;
        }
        Ok(entity)
    }

    /// Updates every row matching the recorded clauses and returns the affected count.
    ///
    /// With `sync_relations`, matched entities are loaded first and each gets
    /// its relation payloads written.
    pub async fn update_set(&mut self, attributes: &Row, sync_relations: bool) -> Result<u64, RepoError> {
        let (_, query) = self.prepare()?;
        let (relations, plain) = extract_relations(&self.model, attributes);
        let values = self.model.fillable_attributes(&plain);
        let targets = match sync_relations && !relations.is_empty() {
            true => self.context.engine.get(query.clone()).await?,
            false => Vec::new(),
        };

        let affected = match values.is_empty() {
            true => 0,
            false => self.context.engine.update(query, values.clone()).await?,
        };
        for mut entity in targets {
            self.sync_relations(&mut entity, &relations, SyncMode::Update).await?;
        }
        if affected > 0 || (sync_relations && !relations.is_empty()) {
            self.raise(EntityEventKind::Updated, json!({"affected": affected, "attributes": values}))
                .await;
        }
        Ok(affected)
    }

    /// Updates `id` when given, creates otherwise.
    pub async fn store(&mut self, id: Option<Value>, attributes: &Row, sync_relations: bool) -> Result<Entity, RepoError> {
        match id {
            Some(id) => self.update(id, attributes, sync_relations).await,
            None => self.create(attributes, sync_relations).await,
        }
    }

    /// Loads `id`, or creates an entity from `attributes` when it does not exist.
    pub async fn find_or_new(&mut self, id: impl Into<Value>, attributes: &Row, sync_relations: bool) -> Result<Entity, RepoError> {
        self.reset();
        match self.fetch(&id.into(), false).await? {
            Some(entity) => Ok(entity),
            None => self.create(attributes, sync_relations).await,
        }
    }

    /// Updates every row matching `conditions`, or creates one.
    ///
    /// When exactly one row matches, or none, the first condition's column and
    /// value are merged into `attributes` before writing.
    pub async fn update_or_create(
        &mut self,
        conditions: &[AttributeCondition],
        attributes: &Row,
        sync_relations: bool,
    ) -> Result<Vec<Entity>, RepoError> {
        self.reset();
        let query = self.matching(conditions)?;
        let mut found = self.context.engine.get(query).await?;
        if found.len() > 1 {
            let mut updated = Vec::with_capacity(found.len());
            for entity in found {
                updated.push(self.update_entity(entity, attributes, sync_relations).await?);
            }
            return Ok(updated);
        }

        let merged = merge_first(conditions, attributes);
        let entity = match found.pop() {
            Some(entity) => self.update_entity(entity, &merged, sync_relations).await?,
            None => self.create(&merged, sync_relations).await?,
        };
        Ok(vec![entity])
    }

    /// Bulk-updates rows matching `conditions`, or inserts a raw row when none match.
    pub async fn update_or_insert(&mut self, conditions: &[AttributeCondition], attributes: &Row) -> Result<bool, RepoError> {
        self.reset();
        let query = self.matching(conditions)?;
        let engine = &self.context.engine;
        if engine.exists(query.clone()).await? {
            let values = self.model.fillable_attributes(attributes);
            if values.is_empty() {
                return Ok(true);
            }
            let affected = engine.update(query, values.clone()).await?;
            self.raise(EntityEventKind::Updated, json!({"affected": affected, "attributes": values}))
                .await;
            return Ok(true);
        }
        let row = merge_first(conditions, attributes);
        let inserted = engine.insert(&self.model, vec![row]).await?;
        if inserted {
            self.forget_after(ClearOn::Create).await;
        }
        Ok(inserted)
    }

    /// Raw bulk insert: no timestamps and no lifecycle events.
    pub async fn insert(&mut self, rows: Vec<Row>) -> Result<bool, RepoError> {
        self.reset();
        let inserted = self.context.engine.insert(&self.model, rows).await?;
        if inserted {
            self.forget_after(ClearOn::Create).await;
        }
        Ok(inserted)
    }

    /// Flushes this repository's cache for an eventless write, honouring `clear_on`.
    async fn forget_after(&self, trigger: ClearOn) {
        let settings = &self.context.config.cache;
        if !settings.enabled || !self.cache_clear_enabled || !settings.clears_on(trigger) {
            return;
        }
        if let Err(err) = self.forget_cache().await {
            log::warn!("{}: cache flush failed: {err}", self.identity.class);
        }
    }

    // ---- delete / restore -------------------------------------------------

    /// Deletes `id`, returning the deleted entity, or `None` if it did not exist.
    pub async fn delete(&mut self, id: impl Into<Value>) -> Result<Option<Entity>, RepoError> {
        self.reset();
        let Some(entity) = self.fetch(&id.into(), false).await? else {
            return Ok(None);
        };
        self.delete_entity(entity).await.map(Some)
    }

    pub async fn delete_entity(&mut self, entity: Entity) -> Result<Entity, RepoError> {
        self.reset();
        self.announce(EntityEventKind::Deleting, Value::Object(entity.attributes.clone()));
        self.context.engine.delete_entity(&self.model, &entity).await?;
        self.raise(EntityEventKind::Deleted, Value::Object(entity.attributes.clone()))
            .await;
        Ok(entity)
    }

    /// Deletes every row matching the recorded clauses.
    pub async fn deletes(&mut self) -> Result<bool, RepoError> {
        let (_, query) = self.prepare()?;
        let affected = self.context.engine.delete(query).await?;
        if affected > 0 {
            self.raise(EntityEventKind::Deleted, json!({"affected": affected})).await;
        }
        Ok(affected > 0)
    }

    pub async fn deletes_by<I, V>(&mut self, column: impl Into<String>, values: I) -> Result<u64, RepoError>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.where_in(column, values);
        let (_, query) = self.prepare()?;
        let affected = self.context.engine.delete(query).await?;
        if affected > 0 {
            self.raise(EntityEventKind::Deleted, json!({"affected": affected})).await;
        }
        Ok(affected)
    }

    /// Restores a soft-deleted entity.
    pub async fn restore(&mut self, id: impl Into<Value>) -> Result<Option<Entity>, RepoError> {
        self.reset();
        let Some(mut entity) = self.fetch(&id.into(), true).await? else {
            return Ok(None);
        };
        self.announce(EntityEventKind::Restoring, Value::Object(entity.attributes.clone()));
        self.context.engine.restore_entity(&self.model, &mut entity).await?;
        let restored = self.event(EntityEventKind::Restored, Value::Object(entity.attributes.clone()));
        let flushed = self.clear_after(&restored).await;
        for event in std::iter::once(restored).chain(flushed) {
            self.context.events.dispatch(&event);
        }
        Ok(Some(entity))
    }

    // ---- transactions -----------------------------------------------------

    pub async fn begin_transaction(&self) -> Result<(), RepoError> {
        self.context.engine.begin_transaction().await
    }

    /// Commits and, once the outermost transaction is closed, delivers the queued events.
    pub async fn commit(&self) -> Result<(), RepoError> {
        let engine = &self.context.engine;
        engine.commit().await?;
        for event in self.context.commit_queue.committed(engine.transaction_level()) {
            self.context.events.dispatch(&event);
        }
        Ok(())
    }

    /// Rolls back and drops the events queued inside the rolled-back level.
    ///
    /// Reads cached inside the transaction may hold rolled-back rows, so this
    /// repository's cache and the cache of every repository with a discarded
    /// event are flushed, regardless of `clear_on`.
    pub async fn rollback(&self) -> Result<(), RepoError> {
        let engine = &self.context.engine;
        engine.rollback().await?;
        let dropped = self.context.commit_queue.rolled_back(engine.transaction_level());
        if !self.context.config.cache.enabled {
            return Ok(());
        }
        let mut owners = vec![self.identity.clone()];
        for event in dropped {
            if !owners.contains(&event.repository) {
                owners.push(event.repository);
            }
        }
        for owner in &owners {
            if let Some(notice) = self.flush_owner(owner, json!({"trigger": "rollback"})).await {
                self.context.events.dispatch(&notice);
            }
        }
        Ok(())
    }
}

/// `attributes` plus the first condition's column and value, unless already present.
fn merge_first(conditions: &[AttributeCondition], attributes: &Row) -> Row {
    let mut merged = attributes.clone();
    if let Some((column, _, value)) = conditions.first() {
        merged.entry(column.clone()).or_insert_with(|| value.clone());
    }
    merged
}
