//! Local filesystem backend.

use std::fs::Metadata;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, UNIX_EPOCH};

use async_trait::async_trait;
use confer_format::ProcessorSelector;
use confer_types::{
    BackendKind, LocationBuilder, RepositoryDefinition, StreamPacket, TypeError, Url,
};
use tracing::{debug, error, info, trace};

use crate::context::SourceContext;
use crate::error::{SourceError, SourceResult};
use crate::lifecycle::LifecycleState;
use crate::traits::{StreamSource, WriteRequest};

/// Root directory of a ready filesystem source.
#[derive(Debug)]
struct FileRoot {
    dir: PathBuf,
}

/// Stream source over a directory (`file:///srv/config/`).
///
/// The change token combines modification time and length. Writes replace
/// the destination atomically through a temporary file in the same
/// directory. Setting option `create = "true"` creates a missing root
/// directory at `init`.
#[derive(Debug)]
pub struct FileStreamSource {
    ctx: SourceContext<FileRoot>,
    root: PathBuf,
}

impl FileStreamSource {
    pub fn new(definition: RepositoryDefinition) -> SourceResult<Self> {
        let ctx = SourceContext::new(definition, BackendKind::File)?;
        let root = local_path(ctx.locations().base())?;
        Ok(Self { ctx, root })
    }

    /// Use a selector shared with other sources.
    pub fn with_processors(mut self, processors: Arc<ProcessorSelector>) -> Self {
        self.ctx = self.ctx.with_processors(processors);
        self
    }

    /// Directory the repository is served from.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn local_path(location: &Url) -> SourceResult<PathBuf> {
    if location.scheme() != "file" {
        return Err(TypeError::InvalidLocation {
            location: location.to_string(),
            reason: "expected a file:// location".to_string(),
        }
        .into());
    }
    location.to_file_path().map_err(|()| {
        TypeError::InvalidLocation {
            location: location.to_string(),
            reason: "location is not a local path".to_string(),
        }
        .into()
    })
}

/// Local path for `location`, which must lie inside `root`.
fn path_under(root: &Path, location: &Url) -> SourceResult<PathBuf> {
    let path = local_path(location)?;
    let escapes = path
        .components()
        .any(|c| matches!(c, Component::ParentDir));
    if escapes || !path.starts_with(root) {
        return Err(TypeError::InvalidLocation {
            location: location.to_string(),
            reason: "location is outside the repository root".to_string(),
        }
        .into());
    }
    Ok(path)
}

/// Change token from modification time and length.
fn change_token(meta: &Metadata) -> Option<String> {
    let modified = meta.modified().ok()?.duration_since(UNIX_EPOCH).ok()?;
    Some(format!("{:x}-{:x}", modified.as_nanos(), meta.len()))
}

/// Replace `target` with `data` through a temporary file in its directory.
fn write_atomically(target: &Path, data: &[u8]) -> io::Result<Option<String>> {
    let dir = target.parent().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "target has no parent directory")
    })?;
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    let file = tmp.persist(target).map_err(|e| e.error)?;
    Ok(change_token(&file.metadata()?))
}

#[async_trait]
impl StreamSource for FileStreamSource {
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
        let base = self.ctx.locations().base();

        match tokio::fs::metadata(&self.root).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(SourceError::backend(base, None, "root is not a directory"));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound && self.ctx.definition().flag("create") => {
                tokio::fs::create_dir_all(&self.root)
                    .await
                    .map_err(|e| SourceError::backend(base, None, e))?;
                info!(root = %self.root.display(), "created repository root");
            }
            Err(e) => return Err(SourceError::backend(base, None, e)),
        }

        slot.install(Arc::new(FileRoot {
            dir: self.root.clone(),
        }))
        .map_err(|(err, _)| err)?;
        info!(repo = %self.ctx.definition().name, root = %self.root.display(), "filesystem source ready");
        Ok(())
    }

    async fn close(&self) -> SourceResult<()> {
        self.ctx.client().take()?;
        info!(repo = %self.ctx.definition().name, "filesystem source closed");
        Ok(())
    }

    async fn stream_file(&self, path: &str) -> SourceResult<Option<StreamPacket>> {
        let root = self.ctx.client().client()?;
        let location = self.prototype_location(path)?;
        let file_path = path_under(&root.dir, &location)?;
        debug!(root = %root.dir.display(), file = %file_path.display(), "opening file");

        let start = Instant::now();
        let file = match tokio::fs::File::open(&file_path).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(file = %file_path.display(), "no such file");
                return Ok(None);
            }
            Err(e) => {
                error!(file = %file_path.display(), error = %e, "could not open file");
                return Err(SourceError::backend(&location, None, e));
            }
        };
        let meta = file
            .metadata()
            .await
            .map_err(|e| SourceError::backend(&location, None, e))?;
        if meta.is_dir() {
            debug!(file = %file_path.display(), "path is a directory");
            return Ok(None);
        }
        trace!(
            file = %file_path.display(),
            bytes = meta.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "opened file"
        );

        let packet = StreamPacket::new(location, file, meta.len());
        Ok(Some(match change_token(&meta) {
            Some(token) => packet.with_change_token(token),
            None => packet,
        }))
    }

    async fn write_file(&self, request: WriteRequest) -> SourceResult<Option<String>> {
        let root = self.ctx.client().client()?;
        let target = path_under(&root.dir, &request.location)?;

        let start = Instant::now();
        let bytes = request.content_length();
        let body = request.body;
        let dest = target.clone();
        let token = tokio::task::spawn_blocking(move || write_atomically(&dest, &body))
            .await
            .map_err(|e| SourceError::backend(&request.location, None, e))?
            .map_err(|e| {
                error!(file = %target.display(), error = %e, "could not write file");
                SourceError::backend(&request.location, None, e)
            })?;
        trace!(
            file = %target.display(),
            bytes,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "wrote file"
        );
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use confer_types::PropertyPacket;
    use serde_json::json;

    use super::*;

    fn definition(dir: &Path, file_name: &str) -> RepositoryDefinition {
        let uri = Url::from_directory_path(dir).unwrap();
        RepositoryDefinition::new("local", BackendKind::File, uri.as_str(), file_name)
    }

    async fn ready(dir: &Path, file_name: &str) -> FileStreamSource {
        let source = FileStreamSource::new(definition(dir, file_name)).unwrap();
        source.init().await.unwrap();
        source
    }

    #[tokio::test]
    async fn reads_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("env")).unwrap();
        std::fs::write(dir.path().join("env/app.yaml"), "server:\n  port: 8080\n").unwrap();

        let source = ready(dir.path(), "app.yaml").await;
        let packet = source.stream("env/").await.unwrap().unwrap();
        assert_eq!(packet.get("server"), Some(&json!({"port": 8080})));
        assert!(packet.change_token().is_some());
        assert_eq!(packet.content_length(), 21);
    }

    #[tokio::test]
    async fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let source = ready(dir.path(), "app.yaml").await;
        assert!(source.stream("").await.unwrap().is_none());
        assert!(source.stream_file("deep/er/").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_creates_parents_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let source = ready(dir.path(), "app.properties").await;

        let mut packet = PropertyPacket::new();
        packet.insert("a", "1");
        packet.insert("b", "2");
        assert!(source.put("team/app.properties", &packet).await.unwrap());

        let written = std::fs::read_to_string(dir.path().join("team/app.properties")).unwrap();
        assert_eq!(written, "a=1\nb=2\n");

        let read = source.stream("team/").await.unwrap().unwrap();
        let keys: Vec<&str> = read.properties().keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn reads_cannot_leave_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().join("repo");
        std::fs::create_dir_all(&repo).unwrap();
        std::fs::write(dir.path().join("secret.yaml"), "password: hunter2\n").unwrap();

        let source = ready(&repo, "app.yaml").await;
        for path in ["%2e%2e/secret.yaml", "..\\secret.yaml", ".%2e/secret.yaml"] {
            let err = source.stream(path).await.unwrap_err();
            assert!(
                matches!(err, SourceError::Location(TypeError::InvalidLocation { .. })),
                "{path}"
            );
        }
    }

    #[test]
    fn paths_outside_root_are_rejected() {
        let root = Path::new("/srv/config");
        let inside = Url::parse("file:///srv/config/env/app.yaml").unwrap();
        assert_eq!(
            path_under(root, &inside).unwrap(),
            PathBuf::from("/srv/config/env/app.yaml")
        );
        let outside = Url::parse("file:///srv/other/app.yaml").unwrap();
        assert!(path_under(root, &outside).is_err());
    }

    #[tokio::test]
    async fn overwrite_changes_token() {
        let dir = tempfile::tempdir().unwrap();
        let source = ready(dir.path(), "app.json").await;

        let mut packet = PropertyPacket::new();
        packet.insert("v", 1);
        assert!(source.put("", &packet).await.unwrap());
        let first = source.stream("").await.unwrap().unwrap();

        packet.insert("extra", "longer body");
        assert!(source.put("", &packet).await.unwrap());
        let second = source.stream("").await.unwrap().unwrap();

        assert_ne!(first.change_token(), second.change_token());
        assert_eq!(second.get("extra"), Some(&json!("longer body")));
    }

    #[tokio::test]
    async fn malformed_file_is_present_but_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.yaml"), "key: [unclosed\n").unwrap();
        let source = ready(dir.path(), "app.yaml").await;
        let packet = source.stream("").await.unwrap().unwrap();
        assert!(packet.is_empty());
        assert!(packet.decode_failure().is_some());
    }

    #[tokio::test]
    async fn init_requires_directory_unless_create() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("not-yet");

        let source = FileStreamSource::new(definition(&missing, "app.yaml")).unwrap();
        assert!(matches!(
            source.init().await,
            Err(SourceError::Backend { .. })
        ));
        assert_eq!(source.state(), LifecycleState::Uninitialized);

        let def = definition(&missing, "app.yaml").with_option("create", "true");
        let source = FileStreamSource::new(def).unwrap();
        source.init().await.unwrap();
        assert!(missing.is_dir());

        let file = dir.path().join("plain.txt");
        std::fs::write(&file, "x").unwrap();
        let source = FileStreamSource::new(definition(&file, "app.yaml")).unwrap();
        assert!(source.init().await.is_err());
    }

    #[tokio::test]
    async fn requests_before_init_and_after_close_fail() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileStreamSource::new(definition(dir.path(), "app.yaml")).unwrap();
        assert!(matches!(
            source.stream_file("").await,
            Err(SourceError::NotReady { .. })
        ));
        source.init().await.unwrap();
        source.close().await.unwrap();
        assert!(matches!(
            source.stream("").await,
            Err(SourceError::Closed { .. })
        ));
        assert!(matches!(source.close().await, Err(SourceError::Closed { .. })));
    }

    #[test]
    fn rejects_non_file_base() {
        let def = RepositoryDefinition::new("x", BackendKind::File, "s3://bucket/", "app.yaml");
        assert!(matches!(
            FileStreamSource::new(def),
            Err(SourceError::Location(TypeError::InvalidLocation { .. }))
        ));
    }
}
