use thiserror::Error;

/// Errors produced while building definitions and locations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    /// The base location or a request path cannot be turned into a location.
    #[error("invalid location {location:?}: {reason}")]
    InvalidLocation { location: String, reason: String },

    /// A repository definition violates one of its invariants.
    #[error("invalid repository definition {name:?}: {reason}")]
    InvalidDefinition { name: String, reason: String },

    /// The backend type string names no known backend.
    #[error("unknown backend type: {0}")]
    UnknownBackend(String),
}

impl TypeError {
    pub(crate) fn location(location: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidLocation {
            location: location.into(),
            reason: reason.into(),
        }
    }
}

/// Result alias for type-level operations.
pub type TypeResult<T> = Result<T, TypeError>;
