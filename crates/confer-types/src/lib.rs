//! Foundation types for confer.
//!
//! Every other confer crate depends on `confer-types`. It holds the static
//! description of a repository, the resolver that turns request paths into
//! backend locations, and the packets that carry documents through the
//! fetch/decode and encode/write pipelines.
//!
//! # Key Types
//!
//! - [`RepositoryDefinition`] and [`BackendKind`]: one configured repository
//! - [`LocationBuilder`]: request path to resolved [`Url`]
//! - [`StreamPacket`]: raw fetched body with length and change token
//! - [`PropertyPacket`]: ordered [`Properties`] plus document metadata

pub mod error;
pub mod location;
pub mod packet;
pub mod repository;
pub mod value;

pub use error::{TypeError, TypeResult};
pub use location::{backend_key, file_name, looks_like_file, LocationBuilder};
pub use packet::{ByteStream, PropertyPacket, StreamPacket};
pub use repository::{BackendKind, RepositoryDefinition};
pub use url::Url;
pub use value::{flatten, scalar_text, Number, Properties, Value};
