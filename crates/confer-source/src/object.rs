//! Object-storage backend.
//!
//! Documents live in a bucket under keys derived from the resolved location.
//! The wire client is supplied by the host through an [`ObjectClientFactory`];
//! [`ObjectStorageSource`] only knows how to address objects and interpret
//! the client's answers.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use confer_format::ProcessorSelector;
use confer_types::{
    backend_key, BackendKind, ByteStream, LocationBuilder, RepositoryDefinition, StreamPacket,
    TypeError, Url,
};
use thiserror::Error;
use tracing::{debug, error, info, trace};

use crate::context::SourceContext;
use crate::error::{SourceError, SourceResult};
use crate::lifecycle::LifecycleState;
use crate::traits::{StreamSource, WriteRequest};

/// Status a client reports for a missing object.
pub const NOT_FOUND: u16 = 404;

/// Failure reported by an object client.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ObjectClientError {
    /// Service status code, when the service answered.
    pub status: Option<u16>,
    pub message: String,
}

impl ObjectClientError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Some(NOT_FOUND), message)
    }

    pub fn is_not_found(&self) -> bool {
        self.status == Some(NOT_FOUND)
    }
}

/// Body and metadata of a fetched object.
pub struct GetObjectOutput {
    pub body: ByteStream,
    pub content_length: u64,
    pub etag: Option<String>,
}

impl fmt::Debug for GetObjectOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GetObjectOutput")
            .field("content_length", &self.content_length)
            .field("etag", &self.etag)
            .finish_non_exhaustive()
    }
}

/// An object upload with its metadata.
#[derive(Clone, Debug, PartialEq)]
pub struct PutObjectRequest {
    pub bucket: String,
    pub key: String,
    pub body: Bytes,
    pub content_type: String,
    pub content_disposition: String,
    pub content_length: u64,
    pub last_modified: DateTime<Utc>,
    /// User metadata, taken from `meta.*` repository options.
    pub metadata: BTreeMap<String, String>,
}

/// Acknowledgement of an upload.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PutObjectOutput {
    pub etag: Option<String>,
}

/// Connected client for an object-storage service.
///
/// Implementations must be safe for concurrent use; one client serves all
/// requests of a source.
#[async_trait]
pub trait ObjectClient: Send + Sync {
    /// Fetch an object. A missing object is an error with status `404`.
    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<GetObjectOutput, ObjectClientError>;

    /// Upload an object, replacing any previous version.
    async fn put_object(
        &self,
        request: PutObjectRequest,
    ) -> Result<PutObjectOutput, ObjectClientError>;

    /// Release connections. Called once by `close`.
    async fn shutdown(&self) {}
}

/// Builds the client for a repository at `init`.
///
/// Credentials, region and endpoint come from the host; the definition's
/// options are available to factories that read them.
#[async_trait]
pub trait ObjectClientFactory: Send + Sync {
    async fn connect(
        &self,
        definition: &RepositoryDefinition,
    ) -> Result<Arc<dyn ObjectClient>, ObjectClientError>;
}

/// Factory handing out a client the host has already connected.
#[derive(Clone)]
pub struct SharedClientFactory {
    client: Arc<dyn ObjectClient>,
}

impl SharedClientFactory {
    pub fn new(client: Arc<dyn ObjectClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectClientFactory for SharedClientFactory {
    async fn connect(
        &self,
        _definition: &RepositoryDefinition,
    ) -> Result<Arc<dyn ObjectClient>, ObjectClientError> {
        Ok(Arc::clone(&self.client))
    }
}

/// Bucket and key of an object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectAddress {
    pub bucket: String,
    pub key: String,
}

impl ObjectAddress {
    /// Extract the bucket and key from an object location.
    ///
    /// Accepts `s3://bucket/key`, virtual-host style
    /// `https://bucket.s3.region.amazonaws.com/key` and path style
    /// `https://s3.region.amazonaws.com/bucket/key`.
    pub fn parse(location: &Url) -> SourceResult<Self> {
        let host = location.host_str().unwrap_or_default();
        let key = backend_key(location);

        let address = match location.scheme() {
            "s3" => Self {
                bucket: host.to_string(),
                key,
            },
            "http" | "https" if is_amazon_host(host) => {
                if let Some(bucket) = virtual_host_bucket(host) {
                    Self {
                        bucket: bucket.to_string(),
                        key,
                    }
                } else {
                    let (bucket, rest) = key.split_once('/').unwrap_or((key.as_str(), ""));
                    Self {
                        bucket: bucket.to_string(),
                        key: rest.to_string(),
                    }
                }
            }
            _ => {
                return Err(invalid(
                    location,
                    "not an object-storage location (expected s3:// or an amazonaws.com url)",
                ))
            }
        };

        if address.bucket.is_empty() {
            return Err(invalid(location, "location names no bucket"));
        }
        Ok(address)
    }
}

impl fmt::Display for ObjectAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

fn is_amazon_host(host: &str) -> bool {
    host == "amazonaws.com" || host.ends_with(".amazonaws.com")
}

/// `bucket` from `bucket.s3.amazonaws.com` or `bucket.s3-region.amazonaws.com`.
fn virtual_host_bucket(host: &str) -> Option<&str> {
    if host.starts_with("s3.") || host.starts_with("s3-") {
        return None;
    }
    let idx = host.find(".s3.").or_else(|| host.find(".s3-"))?;
    Some(&host[..idx])
}

fn invalid(location: &Url, reason: &str) -> SourceError {
    TypeError::InvalidLocation {
        location: location.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

/// Stream source over an object-storage bucket.
pub struct ObjectStorageSource {
    ctx: SourceContext<dyn ObjectClient>,
    factory: Arc<dyn ObjectClientFactory>,
    bucket: String,
    metadata: BTreeMap<String, String>,
}

impl ObjectStorageSource {
    /// Create a source for `definition`. The bucket is taken from the base
    /// location, which must be an object-storage location.
    pub fn new(
        definition: RepositoryDefinition,
        factory: Arc<dyn ObjectClientFactory>,
    ) -> SourceResult<Self> {
        let ctx = SourceContext::new(definition, BackendKind::ObjectStorage)?;
        let bucket = ObjectAddress::parse(ctx.locations().base())?.bucket;
        let metadata = ctx
            .definition()
            .options
            .iter()
            .filter_map(|(k, v)| k.strip_prefix("meta.").map(|k| (k.to_string(), v.clone())))
            .collect();
        Ok(Self {
            ctx,
            factory,
            bucket,
            metadata,
        })
    }

    /// Use a selector shared with other sources.
    pub fn with_processors(mut self, processors: Arc<ProcessorSelector>) -> Self {
        self.ctx = self.ctx.with_processors(processors);
        self
    }

    /// Bucket named by the base location.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl StreamSource for ObjectStorageSource {
    fn source_config(&self) -> &RepositoryDefinition {
        self.ctx.definition()
    }

    fn locations(&self) -> &LocationBuilder {
        self.ctx.locations()
    }

    fn processors(&self) -> &ProcessorSelector {
        self.ctx.processors()
    }

    fn state(&self) -> LifecycleState {
        self.ctx.client().state()
    }

    async fn init(&self) -> SourceResult<()> {
        let slot = self.ctx.client();
        slot.ensure_uninitialized()?;
        let repo = &self.ctx.definition().name;

        let client = self
            .factory
            .connect(self.ctx.definition())
            .await
            .map_err(|e| {
                error!(repo = %repo, bucket = %self.bucket, error = %e, "could not connect object client");
                SourceError::backend(self.ctx.locations().base(), e.status, e.message)
            })?;

        if let Err((err, client)) = slot.install(client) {
            client.shutdown().await;
            return Err(err);
        }
        info!(repo = %repo, bucket = %self.bucket, "object storage source ready");
        Ok(())
    }

    async fn close(&self) -> SourceResult<()> {
        let client = self.ctx.client().take()?;
        client.shutdown().await;
        info!(repo = %self.ctx.definition().name, "object storage source closed");
        Ok(())
    }

    async fn stream_file(&self, path: &str) -> SourceResult<Option<StreamPacket>> {
        let client = self.ctx.client().client()?;
        let location = self.prototype_location(path)?;
        let address = ObjectAddress::parse(&location)?;

        debug!(bucket = %address.bucket, key = %address.key, "requesting object");
        let start = Instant::now();
        match client.get_object(&address.bucket, &address.key).await {
            Ok(output) => {
                trace!(
                    key = %address.key,
                    bytes = output.content_length,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "fetched object"
                );
                let packet = StreamPacket::from_stream(location, output.body, output.content_length);
                Ok(Some(match output.etag {
                    Some(etag) => packet.with_change_token(etag),
                    None => packet,
                }))
            }
            Err(e) if e.is_not_found() => {
                debug!(bucket = %address.bucket, key = %address.key, "no object at key");
                Ok(None)
            }
            Err(e) => {
                error!(%address, status = ?e.status, error = %e, "object fetch failed");
                Err(SourceError::backend(&location, e.status, e.message))
            }
        }
    }

    async fn write_file(&self, request: WriteRequest) -> SourceResult<Option<String>> {
        let client = self.ctx.client().client()?;
        let address = ObjectAddress::parse(&request.location)?;

        let put = PutObjectRequest {
            content_type: request.content_type.to_string(),
            content_disposition: request.content_disposition(),
            content_length: request.content_length(),
            last_modified: request.last_modified,
            metadata: self.metadata.clone(),
            bucket: address.bucket.clone(),
            key: address.key.clone(),
            body: request.body,
        };
        let bytes = put.content_length;

        debug!(bucket = %address.bucket, key = %address.key, bytes, "uploading object");
        let start = Instant::now();
        let output = client.put_object(put).await.map_err(|e| {
            error!(%address, status = ?e.status, error = %e, "object upload failed");
            SourceError::backend(&request.location, e.status, e.message)
        })?;
        trace!(
            key = %address.key,
            bytes,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "uploaded object"
        );
        Ok(output.etag)
    }
}

impl fmt::Debug for ObjectStorageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStorageSource")
            .field("repo", &self.ctx.definition().name)
            .field("bucket", &self.bucket)
            .field("state", &self.state())
            .finish()
    }
}
