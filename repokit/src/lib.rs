//! repokit: a query-recording repository layer over a relational engine.
//!
//! Repositories accumulate query clauses, replay them onto an [`Engine`]
//! query on a terminal call, cache results under a fingerprint of the call,
//! persist nested relation payloads and publish typed lifecycle events.

pub mod cache;
pub mod clauses;
pub mod config;
pub mod criteria;
pub mod errors;
pub mod events;
pub mod fingerprint;
pub mod memory;
pub mod query;
pub mod registry;
pub mod relations;
pub mod repository;
pub mod types;

pub use cache::{CacheLifetime, CacheManager, CacheOrchestrator, CacheStore, KeyIndex, MemoryCacheStore, RedisCacheStore};
pub use clauses::{Boolean, ClauseRecorder, ClauseStore, Condition, Conditions, SortOrder, SubQuery};
pub use config::{CacheSettings, ClearOn, CriteriaSettings, RepositoryConfig};
pub use criteria::{Criterion, RequestCriteria, RequestParams};
pub use errors::RepoError;
pub use events::{CommitQueue, EntityEvent, EntityEventKind, EventBus, ListenerScope};
pub use fingerprint::{FingerprintInput, fingerprint};
pub use memory::{MemoryEngine, MemoryQuery};
pub use query::{Engine, QueryBuilder, RecordingQuery, SyncChanges, assemble};
pub use registry::{ModelRegistration, ModelRegistry};
pub use relations::{RelationDescriptor, Relations, SyncMode, extract_relations};
pub use repository::{AttributeCondition, Repository, RepositoryContext, RepositoryDefinition};
pub use types::{Entity, ModelSchema, Page, PivotTable, RelationDef, RelationKind, RepositoryIdentity, Row};

// Re-exported so `inventory::submit!` works without a direct dependency.
pub use inventory;
