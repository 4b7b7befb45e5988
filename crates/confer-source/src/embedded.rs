//! Resources shipped inside the binary (`classpath:/config/`).

use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use confer_format::ProcessorSelector;
use confer_types::{backend_key, BackendKind, LocationBuilder, RepositoryDefinition, StreamPacket};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::context::SourceContext;
use crate::digest::content_hash;
use crate::error::{SourceError, SourceResult};
use crate::lifecycle::LifecycleState;
use crate::traits::{StreamSource, WriteRequest};

#[derive(Clone, Debug, PartialEq, Eq)]
struct Resource {
    data: Bytes,
    hash: String,
}

/// Immutable table of root-relative keys to document bytes.
///
/// ```
/// use confer_source::ResourceBundle;
///
/// let bundle = ResourceBundle::new()
///     .with("config/app.yaml", &b"server:\n  port: 8080\n"[..]);
/// assert!(bundle.contains("/config/app.yaml"));
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResourceBundle {
    entries: BTreeMap<String, Resource>,
}

impl ResourceBundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bundle of static entries, typically from `include_bytes!`.
    pub fn from_static(entries: &[(&str, &'static [u8])]) -> Self {
        entries
            .iter()
            .fold(Self::new(), |bundle, &(key, data)| {
                bundle.with(key, Bytes::from_static(data))
            })
    }

    /// Load every file under `dir`, keyed by its path relative to `dir`.
    pub fn load_dir(dir: &Path) -> io::Result<Self> {
        let mut bundle = Self::new();
        for entry in WalkDir::new(dir).follow_links(true) {
            let entry = entry.map_err(io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(dir)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let data = std::fs::read(entry.path())?;
            bundle.insert(key, data);
        }
        Ok(bundle)
    }

    /// Builder-style [`ResourceBundle::insert`].
    pub fn with(mut self, key: impl Into<String>, data: impl Into<Bytes>) -> Self {
        self.insert(key, data);
        self
    }

    /// Add or replace an entry. Leading separators in `key` are ignored.
    pub fn insert(&mut self, key: impl Into<String>, data: impl Into<Bytes>) {
        let data = data.into();
        let hash = content_hash(&data);
        self.entries
            .insert(normalize(&key.into()), Resource { data, hash });
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(&normalize(key))
    }

    /// Bytes and content hash stored under `key`.
    pub fn get(&self, key: &str) -> Option<(&Bytes, &str)> {
        self.entries
            .get(&normalize(key))
            .map(|r| (&r.data, r.hash.as_str()))
    }

    /// Sorted keys.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn normalize(key: &str) -> String {
    key.trim_start_matches('/').to_string()
}

/// Read-only stream source over a [`ResourceBundle`].
#[derive(Debug)]
pub struct EmbeddedStreamSource {
    ctx: SourceContext<ResourceBundle>,
    bundle: Arc<ResourceBundle>,
}

impl EmbeddedStreamSource {
    pub fn new(definition: RepositoryDefinition, bundle: Arc<ResourceBundle>) -> SourceResult<Self> {
        let ctx = SourceContext::new(definition, BackendKind::Classpath)?;
        Ok(Self { ctx, bundle })
    }

    /// Use a selector shared with other sources.
    pub fn with_processors(mut self, processors: Arc<ProcessorSelector>) -> Self {
        self.ctx = self.ctx.with_processors(processors);
        self
    }
}

#[async_trait]
impl StreamSource for EmbeddedStreamSource {
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
        self.ctx
            .client()
            .install(Arc::clone(&self.bundle))
            .map_err(|(err, _)| err)?;
        info!(
            repo = %self.ctx.definition().name,
            resources = self.bundle.len(),
            "embedded source ready"
        );
        Ok(())
    }

    async fn close(&self) -> SourceResult<()> {
        self.ctx.client().take().map(|_| ())
    }

    async fn stream_file(&self, path: &str) -> SourceResult<Option<StreamPacket>> {
        let bundle = self.ctx.client().client()?;
        let location = self.prototype_location(path)?;
        let key = backend_key(&location);
        debug!(key = %key, "looking up embedded resource");

        Ok(bundle.get(&key).map(|(data, hash)| {
            StreamPacket::from_bytes(location, data.clone()).with_change_token(hash)
        }))
    }

    async fn write_file(&self, _request: WriteRequest) -> SourceResult<Option<String>> {
        self.ctx.client().client()?;
        Err(SourceError::ReadOnly {
            repo: self.ctx.definition().name.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use confer_types::PropertyPacket;
    use serde_json::json;

    use super::*;

    fn bundle() -> Arc<ResourceBundle> {
        Arc::new(ResourceBundle::from_static(&[
            ("config/app.yaml", &b"name: demo\n"[..]),
            ("config/env/prod/app.yaml", &b"name: prod\n"[..]),
            ("config/broken.json", &b"{"[..]),
        ]))
    }

    async fn ready(file_name: &str) -> EmbeddedStreamSource {
        let def = RepositoryDefinition::new("builtin", BackendKind::Classpath, "classpath:/config/", file_name);
        let source = EmbeddedStreamSource::new(def, bundle()).unwrap();
        source.init().await.unwrap();
        source
    }

    #[tokio::test]
    async fn serves_resources_by_root_relative_key() {
        let source = ready("app.yaml").await;
        let packet = source.stream("").await.unwrap().unwrap();
        assert_eq!(packet.get("name"), Some(&json!("demo")));

        let prod = source.stream("env/prod/").await.unwrap().unwrap();
        assert_eq!(prod.get("name"), Some(&json!("prod")));
        assert_ne!(packet.change_token(), prod.change_token());
    }

    #[tokio::test]
    async fn missing_resource_is_none() {
        let source = ready("app.yaml").await;
        assert!(source.stream("env/dev/").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn broken_resource_is_present_but_empty() {
        let source = ready("app.yaml").await;
        let packet = source.stream("broken.json").await.unwrap().unwrap();
        assert!(packet.is_empty());
        assert!(packet.decode_failure().is_some());
    }

    #[tokio::test]
    async fn writes_are_rejected() {
        let source = ready("app.yaml").await;
        let err = source.put("", &PropertyPacket::new()).await.unwrap_err();
        assert!(matches!(err, SourceError::ReadOnly { .. }));
    }

    #[tokio::test]
    async fn lifecycle() {
        let def = RepositoryDefinition::new("b", BackendKind::Classpath, "classpath:/config/", "app.yaml");
        let source = EmbeddedStreamSource::new(def, bundle()).unwrap();
        assert!(matches!(
            source.stream("").await,
            Err(SourceError::NotReady { .. })
        ));
        source.init().await.unwrap();
        assert!(matches!(
            source.init().await,
            Err(SourceError::AlreadyInitialized { .. })
        ));
        source.close().await.unwrap();
        assert!(matches!(
            source.stream("").await,
            Err(SourceError::Closed { .. })
        ));
    }

    #[test]
    fn load_dir_uses_forward_slash_keys() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("config/env")).unwrap();
        std::fs::write(dir.path().join("config/app.yaml"), "a: 1").unwrap();
        std::fs::write(dir.path().join("config/env/app.json"), "{}").unwrap();

        let bundle = ResourceBundle::load_dir(dir.path()).unwrap();
        let keys: Vec<&str> = bundle.keys().collect();
        assert_eq!(keys, vec!["config/app.yaml", "config/env/app.json"]);
        assert_eq!(bundle.get("/config/app.yaml").unwrap().0.as_ref(), b"a: 1");
    }
}
