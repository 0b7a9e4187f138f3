use std::borrow::Cow;

use thiserror::Error;

/// Top-level error type returned by repositories and their collaborators.
#[derive(Debug, Error)]
pub enum RepoError {
    /// A find-or-fail lookup matched no row.
    #[error("no query results for model [{model}] {id}")]
    EntityNotFound { model: String, id: String },

    /// The configured model name is not registered.
    #[error("model class [{model}] could not be resolved")]
    UnresolvedModelClass { model: String },

    /// A nested write targeted a relation the sync engine cannot persist.
    #[error("relation [{accessor}] of kind {kind} is not supported for nested writes")]
    UnsupportedRelationKind { accessor: String, kind: String },

    /// Fingerprint, cache payload or key index could not be (de)serialized.
    #[error("serialization failed for {context}: {message}")]
    Serialization { context: &'static str, message: String },

    /// A collaborator was not provided by the repository context.
    #[error("unable to resolve [{service}] from the repository context")]
    ContainerResolution { service: String },

    /// Cache store rejected an operation.
    #[error("cache error: {message}")]
    Cache { message: String },

    /// Underlying Redis command failed.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Filesystem access for the cache key index failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be parsed.
    #[error("invalid configuration: {message}")]
    Config { message: String },

    /// The query engine rejected an assembled query.
    #[error("query error: {message}")]
    Query { message: String },

    /// Invalid input supplied to a repository operation.
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("{message}")]
    Other { message: Cow<'static, str> },
}

impl RepoError {
    pub(crate) fn serialization(context: &'static str, err: impl std::fmt::Display) -> Self {
        RepoError::Serialization {
            context,
            message: err.to_string(),
        }
    }

    pub(crate) fn query(message: impl Into<String>) -> Self {
        RepoError::Query { message: message.into() }
    }
}
