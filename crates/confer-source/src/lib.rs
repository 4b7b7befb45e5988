//! Stream sources: backend connectors that fetch and store configuration
//! documents for one repository each.
//!
//! Every backend implements [`StreamSource`]. A backend only moves raw bytes
//! ([`StreamSource::stream_file`], [`StreamSource::write_file`]); the shared
//! pipeline in [`StreamSource::stream`] and [`StreamSource::put`] resolves
//! request paths, selects a processor and decodes or encodes the document.
//!
//! # Backends
//!
//! - [`ObjectStorageSource`] -- buckets reached through a host-supplied
//!   [`ObjectClient`]; [`InMemoryObjectClient`] for tests and embedding
//! - [`FileStreamSource`] -- a local directory
//! - [`EmbeddedStreamSource`] -- a read-only [`ResourceBundle`] compiled into
//!   or loaded by the binary
//! - [`GitStreamSource`] -- a branch of a local git clone
//!
//! [`SourceRegistry`] builds the right source for a
//! [`RepositoryDefinition`](confer_types::RepositoryDefinition).
//!
//! # Lifecycle
//!
//! Sources start uninitialized. `init` connects the backend client, after
//! which any number of requests may run concurrently; `close` releases it
//! for good. Requests outside the ready state fail with
//! [`SourceError::NotReady`] or [`SourceError::Closed`].
//!
//! # Outcomes
//!
//! - a missing document is `Ok(None)`, never an error
//! - a document that fails to decode is returned with an empty mapping and
//!   a [`decode_failure`](confer_types::PropertyPacket::decode_failure)
//! - a write succeeds only when the backend acknowledges it with a token;
//!   backend and encode failures are reported as `Ok(false)`

pub mod context;
pub mod digest;
pub mod embedded;
pub mod error;
pub mod file;
pub mod git;
pub mod lifecycle;
pub mod memory;
pub mod object;
pub mod registry;
pub mod traits;

pub use context::SourceContext;
pub use embedded::{EmbeddedStreamSource, ResourceBundle};
pub use error::{SourceError, SourceResult};
pub use file::FileStreamSource;
pub use git::GitStreamSource;
pub use lifecycle::{ClientSlot, LifecycleState};
pub use memory::{InMemoryObjectClient, ObjectMeta};
pub use object::{
    GetObjectOutput, ObjectAddress, ObjectClient, ObjectClientError, ObjectClientFactory,
    ObjectStorageSource, PutObjectOutput, PutObjectRequest, SharedClientFactory,
};
pub use registry::SourceRegistry;
pub use traits::{StreamSource, WriteRequest, WriteTarget, CONTENT_TYPE};
