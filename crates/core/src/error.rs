/// Error taxonomy shared by the stores, the log store and the registry.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    /// A stored value could not be decoded. `key` names the offending
    /// coordination key or `collection/id` document.
    #[error("Corrupt value at {key}: {reason}")]
    Corrupt { key: String, reason: String },

    /// Transport or connection failure from an external store.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn corrupt(key: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Corrupt {
            key: key.into(),
            reason: reason.to_string(),
        }
    }

    /// Wrap any transport-level error as [`CoreError::StoreUnavailable`].
    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        Self::StoreUnavailable(err.to_string())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_not_found() {
        let err = CoreError::not_found("job log", "0192f0c4");
        assert_eq!(err.to_string(), "Entity not found: job log with id 0192f0c4");
        assert!(err.is_not_found());
    }

    #[test]
    fn display_corrupt_names_key() {
        let err = CoreError::corrupt("/jobwatch/group/g1", "expected value at line 1");
        assert_eq!(
            err.to_string(),
            "Corrupt value at /jobwatch/group/g1: expected value at line 1"
        );
        assert!(!err.is_not_found());
    }

    #[test]
    fn unavailable_wraps_message() {
        let inner = std::io::Error::other("connection refused");
        let err = CoreError::unavailable(inner);
        assert_eq!(err.to_string(), "Store unavailable: connection refused");
    }
}
