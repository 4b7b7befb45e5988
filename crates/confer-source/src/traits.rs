use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use confer_format::ProcessorSelector;
use confer_types::{
    file_name, LocationBuilder, PropertyPacket, RepositoryDefinition, StreamPacket, Url,
};
use tracing::{debug, error, warn};

use crate::error::{SourceError, SourceResult};
use crate::lifecycle::LifecycleState;

/// Content type sent with every write.
pub const CONTENT_TYPE: &str = "application/octet-stream";

/// Where a write goes and which format it is encoded in.
///
/// `path` is resolved like a read path. `format_name` only selects the
/// processor, so a document can be written under one name in the format of
/// another.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteTarget {
    pub path: String,
    pub format_name: String,
}

impl WriteTarget {
    pub fn new(path: impl Into<String>, format_name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            format_name: format_name.into(),
        }
    }

    /// Write to `path` in the format of the repository's file name.
    pub fn canonical(definition: &RepositoryDefinition, path: impl Into<String>) -> Self {
        let format_name = if definition.file_name.is_empty() {
            definition
                .location_builder()
                .map(|b| b.default_file_name().to_string())
                .unwrap_or_default()
        } else {
            definition.file_name.clone()
        };
        Self::new(path, format_name)
    }
}

/// An encoded document ready for a backend, with its metadata.
#[derive(Clone, Debug)]
pub struct WriteRequest {
    pub location: Url,
    pub body: Bytes,
    pub content_type: &'static str,
    /// Name advertised in the content disposition.
    pub file_name: String,
    pub last_modified: DateTime<Utc>,
}

impl WriteRequest {
    pub fn new(location: Url, body: Bytes, file_name: impl Into<String>) -> Self {
        Self {
            location,
            body,
            content_type: CONTENT_TYPE,
            file_name: file_name.into(),
            last_modified: Utc::now(),
        }
    }

    pub fn content_length(&self) -> u64 {
        self.body.len() as u64
    }

    pub fn content_disposition(&self) -> String {
        format!("attachment; filename={}", self.file_name)
    }
}

/// A backend connector serving one repository.
///
/// Backends implement the lifecycle, the raw byte operations
/// ([`StreamSource::stream_file`] and [`StreamSource::write_file`]) and the
/// accessors. Decoding and encoding are shared: [`StreamSource::stream`] and
/// [`StreamSource::put`] run every backend through the same selector
/// pipeline.
///
/// All methods take `&self`; sources are shared across concurrent requests
/// behind an `Arc`.
#[async_trait]
pub trait StreamSource: Send + Sync {
    /// The repository this source serves.
    fn source_config(&self) -> &RepositoryDefinition;

    /// Resolver for this repository's request paths.
    fn locations(&self) -> &LocationBuilder;

    /// Processors used to decode and encode documents.
    fn processors(&self) -> &ProcessorSelector;

    fn state(&self) -> LifecycleState;

    /// Backend type string, e.g. `s3`.
    fn source_name(&self) -> &str {
        self.source_config().backend.as_str()
    }

    /// Resolve `path` to the location a read or write would use.
    fn prototype_location(&self, path: &str) -> SourceResult<Url> {
        Ok(self.locations().build(path)?)
    }

    /// Fail with `NotReady` or `Closed` unless the source is ready.
    fn ensure_ready(&self) -> SourceResult<()> {
        let repo = self.source_config().name.clone();
        match self.state() {
            LifecycleState::Ready => Ok(()),
            LifecycleState::Uninitialized => Err(SourceError::NotReady { repo }),
            LifecycleState::Closed => Err(SourceError::Closed { repo }),
        }
    }

    /// Acquire the backend client. Called once before any request.
    async fn init(&self) -> SourceResult<()>;

    /// Release the backend client. The source cannot be used afterwards.
    async fn close(&self) -> SourceResult<()>;

    /// Open the raw document at `path`.
    ///
    /// Returns `Ok(None)` when the backend reports the document missing.
    async fn stream_file(&self, path: &str) -> SourceResult<Option<StreamPacket>>;

    /// Store an encoded document.
    ///
    /// Returns the backend's acknowledgement token, or `None` if the backend
    /// accepted the write without one.
    async fn write_file(&self, request: WriteRequest) -> SourceResult<Option<String>>;

    /// Fetch and decode the document at `path`.
    ///
    /// A document that cannot be decoded is still returned: its mapping is
    /// empty and [`PropertyPacket::decode_failure`] says why. An unsupported
    /// file extension fails with [`confer_format::FormatError::NoProcessor`].
    async fn stream(&self, path: &str) -> SourceResult<Option<PropertyPacket>> {
        self.ensure_ready()?;
        let location = self.prototype_location(path)?;
        let processor = self.processors().select(&file_name(&location))?;

        let Some(file) = self.stream_file(path).await? else {
            debug!(repo = %self.source_config().name, %location, "document not found");
            return Ok(None);
        };
        let location = file.location().clone();
        let token = file.change_token().map(str::to_owned);
        let body = file
            .into_bytes()
            .await
            .map_err(|e| SourceError::backend(&location, None, e))?;

        let decoded = processor.decode(&body);
        let mut packet = PropertyPacket::fetched(location, body, token);
        match decoded {
            Ok(properties) => packet.merge(properties),
            Err(e) => {
                warn!(
                    repo = %self.source_config().name,
                    path = %path,
                    processor = processor.name(),
                    error = %e,
                    "document fetched but could not be decoded"
                );
                packet.mark_decode_failure(e.to_string());
            }
        }
        Ok(Some(packet))
    }

    /// Encode `packet` and write it to `target`.
    ///
    /// Returns `Ok(true)` only when the backend acknowledges the write with
    /// a token. Encode and backend failures are logged and reported as
    /// `Ok(false)`; lifecycle, location and processor-selection errors are
    /// returned.
    async fn write(&self, target: &WriteTarget, packet: &PropertyPacket) -> SourceResult<bool> {
        self.ensure_ready()?;
        let repo = &self.source_config().name;
        let location = self.prototype_location(&target.path)?;
        let processor = self.processors().select(&target.format_name)?;

        let body = match processor.encode(packet.properties()) {
            Ok(body) => Bytes::from(body),
            Err(e) => {
                warn!(repo = %repo, %location, error = %e, "could not encode document");
                return Ok(false);
            }
        };

        let request = WriteRequest::new(location.clone(), body, target.format_name.clone());
        match self.write_file(request).await {
            Ok(Some(token)) if !token.is_empty() => {
                debug!(repo = %repo, %location, token = %token, "document written");
                Ok(true)
            }
            Ok(_) => {
                warn!(repo = %repo, %location, "backend accepted write without a token");
                Ok(false)
            }
            Err(e @ SourceError::Backend { .. }) => {
                error!(repo = %repo, %location, error = %e, "write failed");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Write `packet` to `path` in the repository's configured format.
    async fn put(&self, path: &str, packet: &PropertyPacket) -> SourceResult<bool> {
        let target = WriteTarget::canonical(self.source_config(), path);
        self.write(&target, packet).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use confer_format::FormatError;
    use confer_types::BackendKind;

    use super::*;
    use crate::context::SourceContext;

    /// Scripted backend over a map of keys to bodies.
    struct ScriptedSource {
        ctx: SourceContext<()>,
        docs: Mutex<HashMap<String, Bytes>>,
        ack: Option<String>,
        fail_writes: bool,
    }

    impl ScriptedSource {
        fn new(file_name: &str) -> Self {
            let def = RepositoryDefinition::new("scripted", BackendKind::File, "file:///cfg/", file_name);
            let ctx = SourceContext::new(def, BackendKind::File).unwrap();
            ctx.client().install(Arc::new(())).unwrap();
            Self {
                ctx,
                docs: Mutex::new(HashMap::new()),
                ack: Some("v1".into()),
                fail_writes: false,
            }
        }

        fn with_doc(self, key: &str, body: &'static str) -> Self {
            self.docs
                .lock()
                .unwrap()
                .insert(key.to_string(), Bytes::from_static(body.as_bytes()));
            self
        }
    }

    #[async_trait]
    impl StreamSource for ScriptedSource {
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
            Ok(())
        }
        async fn close(&self) -> SourceResult<()> {
            self.ctx.client().take().map(|_| ())
        }
        async fn stream_file(&self, path: &str) -> SourceResult<Option<StreamPacket>> {
            let location = self.prototype_location(path)?;
            let key = confer_types::backend_key(&location);
            let body = self.docs.lock().unwrap().get(&key).cloned();
            Ok(body.map(|b| StreamPacket::from_bytes(location, b).with_change_token("etag")))
        }
        async fn write_file(&self, request: WriteRequest) -> SourceResult<Option<String>> {
            if self.fail_writes {
                return Err(SourceError::backend(&request.location, Some(500), "boom"));
            }
            let key = confer_types::backend_key(&request.location);
            self.docs.lock().unwrap().insert(key, request.body);
            Ok(self.ack.clone())
        }
    }

    fn packet(pairs: &[(&str, &str)]) -> PropertyPacket {
        let mut packet = PropertyPacket::new();
        for (k, v) in pairs {
            packet.insert(*k, *v);
        }
        packet
    }

    #[tokio::test]
    async fn stream_decodes_by_resolved_file_name() {
        let source = ScriptedSource::new("app.yaml").with_doc("cfg/app.yaml", "a: 1\nb: two\n");
        let packet = source.stream("").await.unwrap().unwrap();
        assert_eq!(packet.get("a"), Some(&serde_json::json!(1)));
        assert_eq!(packet.get("b"), Some(&serde_json::json!("two")));
        assert_eq!(packet.change_token(), Some("etag"));
        assert_eq!(packet.location().unwrap().as_str(), "file:///cfg/app.yaml");
        assert!(packet.decode_failure().is_none());
    }

    #[tokio::test]
    async fn missing_document_is_none() {
        let source = ScriptedSource::new("app.yaml");
        assert!(source.stream("nested/").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn undecodable_document_keeps_diagnostics() {
        let source = ScriptedSource::new("app.json").with_doc("cfg/app.json", "{not json");
        let packet = source.stream("").await.unwrap().unwrap();
        assert!(packet.is_empty());
        assert!(packet.decode_failure().is_some());
        assert_eq!(packet.content_length(), 9);
        assert_eq!(packet.body().unwrap().as_ref(), b"{not json");
    }

    #[tokio::test]
    async fn unknown_extension_fails_fast() {
        let source = ScriptedSource::new("app.yaml").with_doc("cfg/app.toml", "a = 1");
        let err = source.stream("app.toml").await.unwrap_err();
        assert!(matches!(
            err,
            SourceError::Format(FormatError::NoProcessor { .. })
        ));
    }

    #[tokio::test]
    async fn put_uses_repository_format() {
        let source = ScriptedSource::new("app.properties");
        let written = source
            .put("app.properties", &packet(&[("a", "1"), ("b", "2")]))
            .await
            .unwrap();
        assert!(written);

        let read = source.stream("app.properties").await.unwrap().unwrap();
        let keys: Vec<&str> = read.properties().keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn write_target_decouples_path_and_format() {
        let source = ScriptedSource::new("app.properties");
        let target = WriteTarget::new("exported.json", "app.json");
        assert!(source.write(&target, &packet(&[("k", "v")])).await.unwrap());
        let body = source.docs.lock().unwrap()["cfg/exported.json"].clone();
        assert_eq!(std::str::from_utf8(&body).unwrap(), "{\n  \"k\": \"v\"\n}\n");
    }

    #[tokio::test]
    async fn write_without_token_is_not_a_success() {
        let mut source = ScriptedSource::new("app.yaml");
        source.ack = Some(String::new());
        assert!(!source.put("", &packet(&[("a", "1")])).await.unwrap());
        source.ack = None;
        assert!(!source.put("", &packet(&[("a", "1")])).await.unwrap());
    }

    #[tokio::test]
    async fn backend_write_failure_is_false() {
        let mut source = ScriptedSource::new("app.yaml");
        source.fail_writes = true;
        assert!(!source.put("", &packet(&[("a", "1")])).await.unwrap());
    }

    #[tokio::test]
    async fn closed_source_rejects_requests() {
        let source = ScriptedSource::new("app.yaml");
        source.close().await.unwrap();
        assert!(matches!(
            source.stream("").await,
            Err(SourceError::Closed { .. })
        ));
        assert!(matches!(
            source.put("", &PropertyPacket::new()).await,
            Err(SourceError::Closed { .. })
        ));
    }

    #[test]
    fn canonical_target_falls_back_to_base_file_name() {
        let def = RepositoryDefinition::new("r", BackendKind::ObjectStorage, "s3://b/c/app.yaml", "");
        let target = WriteTarget::canonical(&def, "env/");
        assert_eq!(target, WriteTarget::new("env/", "app.yaml"));
    }

    #[test]
    fn write_request_metadata() {
        let location = Url::parse("s3://b/c/app.yaml").unwrap();
        let request = WriteRequest::new(location, Bytes::from_static(b"a: 1\n"), "app.yaml");
        assert_eq!(request.content_type, "application/octet-stream");
        assert_eq!(request.content_length(), 5);
        assert_eq!(request.content_disposition(), "attachment; filename=app.yaml");
    }
}
