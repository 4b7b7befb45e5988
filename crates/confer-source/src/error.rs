use confer_format::FormatError;
use confer_types::{BackendKind, TypeError};
use thiserror::Error;

/// Errors from stream source operations.
///
/// A missing document is not an error: reads return `Ok(None)` for it.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The request path or repository definition cannot be resolved.
    #[error(transparent)]
    Location(#[from] TypeError),

    /// No processor for the document, or a write target's format.
    #[error(transparent)]
    Format(#[from] FormatError),

    /// The backend failed for a reason other than a missing document.
    #[error("backend error at {location}{}: {message}", status_suffix(.status))]
    Backend {
        location: String,
        status: Option<u16>,
        message: String,
    },

    /// The source has not been initialized yet.
    #[error("source {repo:?} is not initialized")]
    NotReady { repo: String },

    /// The source has been closed.
    #[error("source {repo:?} is closed")]
    Closed { repo: String },

    /// `init` was called on a source that is already running.
    #[error("source {repo:?} is already initialized")]
    AlreadyInitialized { repo: String },

    /// The backend does not accept writes.
    #[error("repository {repo:?} is read-only")]
    ReadOnly { repo: String },

    /// No constructor is registered for the backend kind.
    #[error("no stream source registered for backend {0}")]
    Unsupported(BackendKind),
}

impl SourceError {
    /// A backend fault at `location`.
    pub fn backend(
        location: impl ToString,
        status: Option<u16>,
        message: impl ToString,
    ) -> Self {
        Self::Backend {
            location: location.to_string(),
            status,
            message: message.to_string(),
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (status {s})")).unwrap_or_default()
}

/// Result alias for stream source operations.
pub type SourceResult<T> = Result<T, SourceError>;
