//! Typed lifecycle events and after-commit delivery.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::RepositoryIdentity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityEventKind {
    Creating,
    Created,
    Updating,
    Updated,
    Deleting,
    Deleted,
    Restoring,
    Restored,
    CacheFlushed,
}

impl EntityEventKind {
    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            EntityEventKind::Creating => "creating",
            EntityEventKind::Created => "created",
            EntityEventKind::Updating => "updating",
            EntityEventKind::Updated => "updated",
            EntityEventKind::Deleting => "deleting",
            EntityEventKind::Deleted => "deleted",
            EntityEventKind::Restoring => "restoring",
            EntityEventKind::Restored => "restored",
            EntityEventKind::CacheFlushed => "cache.flushed",
        }
    }
}

impl fmt::Display for EntityEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityEvent {
    pub repository: RepositoryIdentity,
    pub kind: EntityEventKind,
    pub payload: Value,
}

impl EntityEvent {
    pub fn new(repository: RepositoryIdentity, kind: EntityEventKind, payload: Value) -> Self {
        Self {
            repository,
            kind,
            payload,
        }
    }

    /// `{repository id}.entity.{kind}`, e.g. `users.entity.created`.
    pub fn name(&self) -> String {
        format!("{}.entity.{}", self.repository.id, self.kind)
    }
}

/// Which repositories a listener hears from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerScope {
    Any,
    Repository(String),
}

impl ListenerScope {
    fn matches(&self, identity: &RepositoryIdentity) -> bool {
        match self {
            ListenerScope::Any => true,
            ListenerScope::Repository(id) => *id == identity.id,
        }
    }
}

type Listener = Arc<dyn Fn(&EntityEvent) + Send + Sync>;

struct Subscription {
    scope: ListenerScope,
    kind: Option<EntityEventKind>,
    listener: Listener,
}

/// Subscription registry keyed by repository and event kind.
#[derive(Clone, Default)]
pub struct EventBus {
    subscriptions: Arc<RwLock<Vec<Subscription>>>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.subscriptions.read().unwrap_or_else(PoisonError::into_inner).len();
        f.debug_struct("EventBus").field("subscriptions", &count).finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listens for one kind of event. `None` listens for every kind.
    pub fn subscribe<F>(&self, scope: ListenerScope, kind: Option<EntityEventKind>, listener: F)
    where
        F: Fn(&EntityEvent) + Send + Sync + 'static,
    {
        let mut subscriptions = self.subscriptions.write().unwrap_or_else(PoisonError::into_inner);
        subscriptions.push(Subscription {
            scope,
            kind,
            listener: Arc::new(listener),
        });
    }

    pub fn dispatch(&self, event: &EntityEvent) {
        let listeners: Vec<Listener> = {
            let subscriptions = self.subscriptions.read().unwrap_or_else(PoisonError::into_inner);
            subscriptions
                .iter()
                .filter(|sub| sub.scope.matches(&event.repository) && sub.kind.is_none_or(|kind| kind == event.kind))
                .map(|sub| Arc::clone(&sub.listener))
                .collect()
        };
        log::debug!("dispatching {} to {} listener(s)", event.name(), listeners.len());
        for listener in listeners {
            listener(event);
        }
    }
}

/// Events held back until the enclosing transaction commits.
///
/// Each event remembers the transaction depth it was queued at. Committing the
/// outermost transaction releases everything; rolling back discards the events
/// queued inside the rolled-back level.
#[derive(Debug, Clone, Default)]
pub struct CommitQueue {
    pending: Arc<Mutex<Vec<(usize, EntityEvent)>>>,
}

impl CommitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `event` at `level`. Outside a transaction the event is returned for immediate delivery.
    pub fn defer(&self, level: usize, event: EntityEvent) -> Option<EntityEvent> {
        if level == 0 {
            return Some(event);
        }
        self.lock().push((level, event));
        None
    }

    /// Called after a commit leaves the engine at `level`; returns events now due.
    pub fn committed(&self, level: usize) -> Vec<EntityEvent> {
        let mut pending = self.lock();
        if level == 0 {
            return pending.drain(..).map(|(_, event)| event).collect();
        }
        for (queued_at, _) in pending.iter_mut() {
            if *queued_at > level {
                *queued_at = level;
            }
        }
        Vec::new()
    }

    /// Called after a rollback leaves the engine at `level`; returns the discarded events.
    pub fn rolled_back(&self, level: usize) -> Vec<EntityEvent> {
        let mut pending = self.lock();
        let (kept, dropped): (Vec<_>, Vec<_>) = pending.drain(..).partition(|(queued_at, _)| *queued_at <= level);
        *pending = kept;
        dropped.into_iter().map(|(_, event)| event).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(usize, EntityEvent)>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
