use thiserror::Error;

use crate::store::Key;

/// A stored item could not be turned back into its entity.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("could not parse {entity}: {reason}")]
pub struct DecodeError {
    pub entity: &'static str,
    pub reason: String,
}

impl DecodeError {
    pub fn new(entity: &'static str, reason: impl Into<String>) -> Self {
        Self {
            entity,
            reason: reason.into(),
        }
    }
}

/// A rollup was asked to summarize visits that do not belong together.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvariantError {
    #[error("cannot summarize an empty set of visits")]
    EmptyPartition,
    #[error("visit for {found} does not belong to the rollup of {expected}")]
    SlugMismatch { expected: String, found: String },
    #[error("visit titled {found:?} does not match rollup title {expected:?}")]
    TitleMismatch { expected: String, found: String },
    #[error("visit in period {found} does not belong to period {expected}")]
    PeriodMismatch { expected: String, found: String },
    #[error("visit from session {found} does not belong to session {expected}")]
    SessionMismatch { expected: String, found: String },
}

/// Outcome of a single storage call that did not succeed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("item already exists: {0}")]
    AlreadyExists(Key),
    #[error("item does not exist: {0}")]
    NotFound(Key),
    #[error("{op} failed: {reason}")]
    Unavailable { op: &'static str, reason: String },
}

impl StoreError {
    pub fn unavailable(op: &'static str, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            op,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{entity} already in table {key}")]
    AlreadyExists { entity: &'static str, key: Key },

    #[error("{entity} not in table {key}")]
    NotFound { entity: &'static str, key: Key },

    /// Transport or service failure; the caller decides whether to retry.
    #[error("could not {action}: {reason}")]
    Unavailable { action: String, reason: String },

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Invariant(#[from] InvariantError),

    #[error("bad export: {0}")]
    Export(String),

    #[error("location lookup failed: {0}")]
    Lookup(String),

    #[error("missing or invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Tags a store failure with the entity and action that caused it.
    pub fn from_store(entity: &'static str, action: &str, err: StoreError) -> Self {
        match err {
            StoreError::AlreadyExists(key) => Error::AlreadyExists { entity, key },
            StoreError::NotFound(key) => Error::NotFound { entity, key },
            StoreError::Unavailable { reason, .. } => Error::Unavailable {
                action: action.to_string(),
                reason,
            },
        }
    }

    /// Conditional failures are final; only transport problems are worth a retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Unavailable { .. } | Error::Lookup(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conditional_failures_keep_entity_and_key() {
        let key = Key::new("VISITOR#0.0.0.0", "#VISITOR");
        let err = Error::from_store(
            "visitor",
            "add visitor",
            StoreError::AlreadyExists(key.clone()),
        );
        assert_eq!(
            err.to_string(),
            "visitor already in table VISITOR#0.0.0.0 / #VISITOR"
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn unavailable_is_retryable() {
        let err = Error::from_store(
            "session",
            "add session",
            StoreError::unavailable("put_item", "timeout"),
        );
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "could not add session: timeout");
    }

    #[test]
    fn decode_error_names_entity() {
        let err = DecodeError::new("browser", "missing App");
        assert_eq!(err.to_string(), "could not parse browser: missing App");
    }
}
